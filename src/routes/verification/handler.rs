use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;

use crate::error::AppError;
use crate::middleware::auth::require_parent;
use crate::models::{User, UserType, Verification};
use crate::AppState;

use super::model::{VerifyChildRequest, VerifyChildResponse};

/// Parent vouches for a kid account: links the two and flips the
/// parent-verified tick.  Safe to repeat.
pub async fn verify_child(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<VerifyChildRequest>,
) -> Result<Json<VerifyChildResponse>, AppError> {
    require_parent(&user)?;

    let child = state
        .store
        .find_user(&req.child_id)
        .await?
        .filter(|u| u.is_active && u.user_type == UserType::Kid)
        .ok_or_else(|| AppError::not_found("CHILD_NOT_FOUND", "Child account not found"))?;

    state.store.upsert_parent_child(&user.id, &child.id).await?;
    state.store.set_parent_account(&child.id, &user.id).await?;

    let verification = Verification {
        parent_verified: true,
        school_verified: child.verification.school_verified,
        verified_at: Some(Utc::now()),
    };
    state.store.update_verification(&child.id, &verification).await?;

    Ok(Json(VerifyChildResponse {
        child_id: child.id,
        verification,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::models::{MonitoringLevel, Profile};
    use crate::store::MemoryStore;

    use super::*;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), Config::for_tests())
    }

    async fn seed_user(state: &AppState, name: &str, user_type: UserType) -> User {
        let user = User {
            id: format!("{name}-id"),
            email: format!("{name}@example.com"),
            user_type,
            profile: Profile::default(),
            verification: Verification::default(),
            monitoring_level: MonitoringLevel::Full,
            parent_account: None,
            is_active: true,
            password_hash: "x".into(),
            last_login: None,
            created_at: Utc::now(),
        };
        state.store.insert_user(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn verification_links_and_ticks_idempotently() {
        let state = state();
        let parent = seed_user(&state, "dana", UserType::Parent).await;
        let kid = seed_user(&state, "mina", UserType::Kid).await;

        for _ in 0..2 {
            verify_child(
                State(state.clone()),
                Extension(parent.clone()),
                Json(VerifyChildRequest {
                    child_id: kid.id.clone(),
                }),
            )
            .await
            .unwrap();
        }

        let stored = state.store.find_user(&kid.id).await.unwrap().unwrap();
        assert!(stored.verification.parent_verified);
        assert!(!stored.verification.school_verified);
        assert_eq!(stored.parent_account.as_deref(), Some(parent.id.as_str()));
        assert!(state.store.is_parent_of(&parent.id, &kid.id).await.unwrap());
        assert_eq!(state.store.list_child_ids(&parent.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn parents_cannot_be_verified_as_children() {
        let state = state();
        let parent = seed_user(&state, "dana", UserType::Parent).await;
        let other = seed_user(&state, "lee", UserType::Parent).await;

        let err = verify_child(
            State(state),
            Extension(parent),
            Json(VerifyChildRequest { child_id: other.id }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CHILD_NOT_FOUND");
    }
}
