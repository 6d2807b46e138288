use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{require_kid, require_parent};
use crate::models::{ContentStatus, ProfileChangeRequest, ProfileChanges, User};
use crate::utils::sanitize_input;
use crate::AppState;

use super::model::{PendingRequestsResponse, RequestChangesBody, ReviewAction, ReviewBody};

/// Kid asks for profile edits.  Only the fields that actually differ from
/// the current profile are recorded, alongside a snapshot of it.
pub async fn request_changes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<RequestChangesBody>,
) -> Result<(StatusCode, Json<ProfileChangeRequest>), AppError> {
    require_kid(&user)?;

    let parent_id = user
        .parent_account
        .clone()
        .ok_or_else(|| AppError::validation("NO_PARENT_LINKED", "No parent linked to this account"))?;

    let clean = |v: &Option<String>| {
        v.as_deref()
            .map(sanitize_input)
            .filter(|s| !s.is_empty())
    };
    let changes = ProfileChanges {
        display_name: clean(&body.display_name).filter(|v| Some(v) != user.profile.display_name.as_ref()),
        avatar: clean(&body.avatar).filter(|v| Some(v) != user.profile.avatar.as_ref()),
        school: clean(&body.school).filter(|v| Some(v) != user.profile.school.as_ref()),
        grade: clean(&body.grade).filter(|v| Some(v) != user.profile.grade.as_ref()),
    };
    if changes.is_empty() {
        return Err(AppError::validation("NO_CHANGES", "Nothing differs from the current profile"));
    }

    if state
        .store
        .find_pending_change_request_for(&user.id)
        .await?
        .is_some()
    {
        return Err(AppError::conflict(
            "ALREADY_PENDING",
            "A change request is already waiting for review",
        ));
    }

    let request = ProfileChangeRequest {
        id: Uuid::new_v4().to_string(),
        kid_id: user.id.clone(),
        parent_id,
        changes,
        current_profile: user.profile.clone(),
        status: ContentStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
        rejection_reason: None,
        created_at: Utc::now(),
    };
    state.store.insert_change_request(&request).await?;

    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn pending_requests(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<PendingRequestsResponse>, AppError> {
    require_parent(&user)?;

    let requests = state.store.list_pending_change_requests(&user.id).await?;
    Ok(Json(PendingRequestsResponse { requests }))
}

pub async fn review_request(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(request_id): Path<String>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<ProfileChangeRequest>, AppError> {
    require_parent(&user)?;

    let request = state
        .store
        .find_change_request(&request_id)
        .await?
        .ok_or_else(|| AppError::not_found("REQUEST_NOT_FOUND", "Change request not found"))?;

    if request.parent_id != user.id {
        return Err(AppError::forbidden("NOT_YOUR_CHILD", "This request belongs to another parent"));
    }
    if request.status != ContentStatus::Pending {
        return Err(AppError::conflict("ALREADY_PROCESSED", "Request was already reviewed"));
    }

    let now = Utc::now();
    let (status, reason) = match body.action {
        ReviewAction::Approve => {
            let kid = state
                .store
                .find_user(&request.kid_id)
                .await?
                .ok_or_else(|| AppError::not_found("USER_NOT_FOUND", "Account not found"))?;

            // Apply exactly the requested fields to the kid's live profile.
            let mut profile = kid.profile;
            if let Some(v) = &request.changes.display_name {
                profile.display_name = Some(v.clone());
            }
            if let Some(v) = &request.changes.avatar {
                profile.avatar = Some(v.clone());
            }
            if let Some(v) = &request.changes.school {
                profile.school = Some(v.clone());
            }
            if let Some(v) = &request.changes.grade {
                profile.grade = Some(v.clone());
            }
            state.store.update_profile(&kid.id, &profile).await?;

            (ContentStatus::Approved, None)
        }
        ReviewAction::Reject => {
            let reason = body
                .reason
                .as_deref()
                .map(sanitize_input)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "Rejected by parent".to_string());
            (ContentStatus::Rejected, Some(reason))
        }
    };

    state
        .store
        .update_change_request_review(&request.id, status, &user.id, now, reason.as_deref())
        .await?;

    Ok(Json(ProfileChangeRequest {
        status,
        reviewed_by: Some(user.id),
        reviewed_at: Some(now),
        rejection_reason: reason,
        ..request
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::models::{MonitoringLevel, Profile, UserType, Verification};
    use crate::store::MemoryStore;

    use super::*;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), Config::for_tests())
    }

    async fn seed_family(state: &AppState) -> (User, User) {
        let parent = User {
            id: "dana-id".into(),
            email: "dana@example.com".into(),
            user_type: UserType::Parent,
            profile: Profile::default(),
            verification: Verification::default(),
            monitoring_level: MonitoringLevel::Full,
            parent_account: None,
            is_active: true,
            password_hash: "x".into(),
            last_login: None,
            created_at: Utc::now(),
        };
        let kid = User {
            id: "mina-id".into(),
            email: "mina@example.com".into(),
            user_type: UserType::Kid,
            profile: Profile {
                display_name: Some("Mina".into()),
                school: Some("Riverdale".into()),
                ..Profile::default()
            },
            verification: Verification::default(),
            monitoring_level: MonitoringLevel::Full,
            parent_account: Some(parent.id.clone()),
            is_active: true,
            password_hash: "x".into(),
            last_login: None,
            created_at: Utc::now(),
        };
        state.store.insert_user(&parent).await.unwrap();
        state.store.insert_user(&kid).await.unwrap();
        state.store.upsert_parent_child(&parent.id, &kid.id).await.unwrap();
        (parent, kid)
    }

    #[tokio::test]
    async fn approval_applies_exactly_the_requested_fields() {
        let state = state();
        let (parent, kid) = seed_family(&state).await;

        let (_, Json(request)) = request_changes(
            State(state.clone()),
            Extension(kid.clone()),
            Json(RequestChangesBody {
                display_name: Some("Mina the Great".into()),
                avatar: Some("rocket".into()),
                ..RequestChangesBody::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(request.current_profile.display_name.as_deref(), Some("Mina"));

        let Json(reviewed) = review_request(
            State(state.clone()),
            Extension(parent),
            Path(request.id),
            Json(ReviewBody {
                action: ReviewAction::Approve,
                reason: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(reviewed.status, ContentStatus::Approved);

        let updated = state.store.find_user(&kid.id).await.unwrap().unwrap();
        assert_eq!(updated.profile.display_name.as_deref(), Some("Mina the Great"));
        assert_eq!(updated.profile.avatar.as_deref(), Some("rocket"));
        // Untouched fields survive.
        assert_eq!(updated.profile.school.as_deref(), Some("Riverdale"));
    }

    #[tokio::test]
    async fn identical_values_count_as_no_changes() {
        let state = state();
        let (_, kid) = seed_family(&state).await;

        let err = request_changes(
            State(state),
            Extension(kid),
            Json(RequestChangesBody {
                display_name: Some("Mina".into()),
                ..RequestChangesBody::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NO_CHANGES");
    }

    #[tokio::test]
    async fn one_pending_request_at_a_time() {
        let state = state();
        let (_, kid) = seed_family(&state).await;

        let body = || RequestChangesBody {
            display_name: Some("Mina v2".into()),
            ..RequestChangesBody::default()
        };
        request_changes(State(state.clone()), Extension(kid.clone()), Json(body()))
            .await
            .unwrap();

        let err = request_changes(State(state), Extension(kid), Json(body()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_PENDING");
    }

    #[tokio::test]
    async fn unlinked_kid_cannot_request() {
        let state = state();
        let (_, mut kid) = seed_family(&state).await;
        kid.parent_account = None;

        let err = request_changes(
            State(state),
            Extension(kid),
            Json(RequestChangesBody {
                display_name: Some("New name".into()),
                ..RequestChangesBody::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NO_PARENT_LINKED");
    }

    #[tokio::test]
    async fn double_review_is_refused() {
        let state = state();
        let (parent, kid) = seed_family(&state).await;

        let (_, Json(request)) = request_changes(
            State(state.clone()),
            Extension(kid),
            Json(RequestChangesBody {
                display_name: Some("Mina v2".into()),
                ..RequestChangesBody::default()
            }),
        )
        .await
        .unwrap();

        let Json(rejected) = review_request(
            State(state.clone()),
            Extension(parent.clone()),
            Path(request.id.clone()),
            Json(ReviewBody {
                action: ReviewAction::Reject,
                reason: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Rejected by parent"));

        let err = review_request(
            State(state),
            Extension(parent),
            Path(request.id),
            Json(ReviewBody {
                action: ReviewAction::Approve,
                reason: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "ALREADY_PROCESSED");
    }
}
