use std::collections::HashSet;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{Duration, Utc};

use crate::config::limits;
use crate::error::AppError;
use crate::models::{FriendCode, FriendshipStatus, User, UserSummary, UserType};
use crate::store::{Store, StoreError};
use crate::utils::{generate_code, is_valid_code, sanitize_input};
use crate::AppState;

use super::model::{
    AddByCodeRequest, AddFriendResponse, FriendCodeResponse, FriendIdRequest, FriendsResponse,
    SearchHit, SearchParams, SearchResponse,
};

const MINT_ATTEMPTS: usize = 5;

/// Returns the caller's live friend code, minting a fresh one only when the
/// previous code has expired.
pub async fn my_code(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<FriendCodeResponse>, AppError> {
    let now = Utc::now();

    if let Some(existing) = state.store.find_friend_code_for(&user.id).await? {
        if !existing.is_expired(now) {
            return Ok(Json(FriendCodeResponse {
                code: existing.code,
                expires_at: existing.expires_at,
                created_at: existing.created_at,
            }));
        }
    }

    for _ in 0..MINT_ATTEMPTS {
        let code = generate_code(limits::FRIEND_CODE_LEN);
        if state.store.find_friend_code(&code).await?.is_some() {
            continue;
        }
        let minted = FriendCode {
            user_id: user.id.clone(),
            code,
            expires_at: now + Duration::hours(limits::FRIEND_CODE_EXPIRY_HOURS),
            created_at: now,
        };
        state.store.upsert_friend_code(&minted).await?;
        return Ok(Json(FriendCodeResponse {
            code: minted.code,
            expires_at: minted.expires_at,
            created_at: minted.created_at,
        }));
    }

    Err(AppError::Internal(StoreError::Unavailable(
        "could not mint a unique friend code".into(),
    )))
}

pub async fn add_by_code(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<AddByCodeRequest>,
) -> Result<Json<AddFriendResponse>, AppError> {
    let input = sanitize_input(&req.code).to_uppercase();
    if !is_valid_code(&input, limits::FRIEND_CODE_LEN) {
        return Err(AppError::validation("INVALID_FRIEND_CODE", "Friend code format is invalid"));
    }

    let code = state
        .store
        .find_friend_code(&input)
        .await?
        .ok_or_else(|| AppError::not_found("FRIEND_CODE_NOT_FOUND", "Friend code not found"))?;

    if code.is_expired(Utc::now()) {
        return Err(AppError::expired("FRIEND_CODE_EXPIRED", "Friend code has expired"));
    }
    if code.user_id == user.id {
        return Err(AppError::validation("CANNOT_ADD_SELF", "You cannot add yourself"));
    }

    let owner = state
        .store
        .find_user(&code.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::not_found("FRIEND_NOT_FOUND", "User not found"))?;

    if owner.user_type != user.user_type {
        return Err(AppError::forbidden(
            "USER_TYPE_MISMATCH",
            "Friendships connect accounts of the same type",
        ));
    }

    if let Some(existing) = state.store.find_friendship(&user.id, &owner.id).await? {
        if existing.status == FriendshipStatus::Accepted {
            return Err(AppError::conflict("ALREADY_FRIENDS", "You are already friends"));
        }
    }

    // Code redemption skips the request step: both edges land accepted.
    state
        .store
        .upsert_friendship(&user.id, &owner.id, FriendshipStatus::Accepted)
        .await?;
    state
        .store
        .upsert_friendship(&owner.id, &user.id, FriendshipStatus::Accepted)
        .await?;

    connect_parents(state.store.as_ref(), &user, &owner).await?;

    Ok(Json(AddFriendResponse {
        friend: UserSummary::of(&owner),
        status: FriendshipStatus::Accepted,
    }))
}

pub async fn request_friend(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<FriendIdRequest>,
) -> Result<Json<AddFriendResponse>, AppError> {
    if req.friend_id.is_empty() {
        return Err(AppError::validation("FRIEND_ID_REQUIRED", "friendId is required"));
    }
    if req.friend_id == user.id {
        return Err(AppError::validation("CANNOT_ADD_SELF", "You cannot add yourself"));
    }

    let friend = state
        .store
        .find_user(&req.friend_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::not_found("FRIEND_NOT_FOUND", "User not found"))?;

    if friend.user_type != user.user_type {
        return Err(AppError::forbidden(
            "USER_TYPE_MISMATCH",
            "Friendships connect accounts of the same type",
        ));
    }

    for (a, b) in [(&user.id, &friend.id), (&friend.id, &user.id)] {
        if let Some(edge) = state.store.find_friendship(a, b).await? {
            return Err(match edge.status {
                FriendshipStatus::Accepted => {
                    AppError::conflict("ALREADY_FRIENDS", "You are already friends")
                }
                FriendshipStatus::Pending => {
                    AppError::conflict("REQUEST_PENDING", "A friend request is already pending")
                }
            });
        }
    }

    state
        .store
        .upsert_friendship(&user.id, &friend.id, FriendshipStatus::Pending)
        .await?;

    Ok(Json(AddFriendResponse {
        friend: UserSummary::of(&friend),
        status: FriendshipStatus::Pending,
    }))
}

pub async fn accept_friend(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<FriendIdRequest>,
) -> Result<Json<AddFriendResponse>, AppError> {
    if req.friend_id.is_empty() {
        return Err(AppError::validation("FRIEND_ID_REQUIRED", "friendId is required"));
    }

    let friend = state
        .store
        .find_user(&req.friend_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::not_found("FRIEND_NOT_FOUND", "User not found"))?;

    let mut pending = false;
    for (a, b) in [(&friend.id, &user.id), (&user.id, &friend.id)] {
        if let Some(edge) = state.store.find_friendship(a, b).await? {
            if edge.status == FriendshipStatus::Pending {
                pending = true;
                break;
            }
        }
    }
    if !pending {
        return Err(AppError::not_found(
            "FRIEND_REQUEST_NOT_FOUND",
            "No pending friend request from this user",
        ));
    }

    state
        .store
        .upsert_friendship(&user.id, &friend.id, FriendshipStatus::Accepted)
        .await?;
    state
        .store
        .upsert_friendship(&friend.id, &user.id, FriendshipStatus::Accepted)
        .await?;

    connect_parents(state.store.as_ref(), &user, &friend).await?;

    Ok(Json(AddFriendResponse {
        friend: UserSummary::of(&friend),
        status: FriendshipStatus::Accepted,
    }))
}

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<FriendsResponse>, AppError> {
    let ids = state
        .store
        .list_friend_ids(&user.id, FriendshipStatus::Accepted)
        .await?;

    let mut friends = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(friend) = state.store.find_user(&id).await? {
            friends.push(UserSummary::of(&friend));
        }
    }

    Ok(Json(FriendsResponse { friends }))
}

pub async fn search(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = sanitize_input(&params.query);
    if query.chars().count() < 2 {
        return Err(AppError::validation(
            "INVALID_SEARCH_QUERY",
            "Search query must be at least 2 characters",
        ));
    }

    let matches = state
        .store
        .search_users(user.user_type, &user.id, &query, limits::SEARCH_LIMIT)
        .await?;

    let friend_ids: HashSet<String> = state
        .store
        .list_friend_ids(&user.id, FriendshipStatus::Accepted)
        .await?
        .into_iter()
        .collect();

    Ok(Json(SearchResponse {
        results: matches
            .iter()
            .map(|hit| SearchHit {
                user: UserSummary::of(hit),
                is_friend: friend_ids.contains(&hit.id),
            })
            .collect(),
    }))
}

/// When two fully verified kids become friends, their parents get an
/// inferred connection so they can see who is on the other side.
async fn connect_parents(store: &dyn Store, a: &User, b: &User) -> Result<(), AppError> {
    if a.user_type != UserType::Kid || b.user_type != UserType::Kid {
        return Ok(());
    }
    if !a.is_fully_verified() || !b.is_fully_verified() {
        return Ok(());
    }
    if let (Some(parent_a), Some(parent_b)) = (&a.parent_account, &b.parent_account) {
        if parent_a != parent_b {
            store.upsert_parent_connection(parent_a, parent_b).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use chrono::Duration;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::models::{MonitoringLevel, Profile, Verification};
    use crate::store::MemoryStore;

    use super::*;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), Config::for_tests())
    }

    async fn seed_user(state: &AppState, name: &str, user_type: UserType) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: format!("{name}@example.com"),
            user_type,
            profile: Profile {
                display_name: Some(name.to_string()),
                ..Profile::default()
            },
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
    async fn my_code_is_idempotent_until_expiry() {
        let state = state();
        let kid = seed_user(&state, "mina", UserType::Kid).await;

        let Json(first) = my_code(State(state.clone()), Extension(kid.clone())).await.unwrap();
        let Json(second) = my_code(State(state.clone()), Extension(kid.clone())).await.unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(first.created_at, second.created_at);
        assert!(first.created_at < first.expires_at);

        // Force expiry and confirm a new code is minted.
        let stale = FriendCode {
            user_id: kid.id.clone(),
            code: first.code.clone(),
            expires_at: Utc::now() - Duration::hours(1),
            created_at: Utc::now() - Duration::hours(25),
        };
        state.store.upsert_friend_code(&stale).await.unwrap();

        let Json(third) = my_code(State(state), Extension(kid)).await.unwrap();
        assert_ne!(third.code, first.code);
    }

    #[tokio::test]
    async fn add_by_code_creates_both_edges() {
        let state = state();
        let mina = seed_user(&state, "mina", UserType::Kid).await;
        let theo = seed_user(&state, "theo", UserType::Kid).await;

        let Json(code) = my_code(State(state.clone()), Extension(mina.clone())).await.unwrap();

        let Json(added) = add_by_code(
            State(state.clone()),
            Extension(theo.clone()),
            Json(AddByCodeRequest { code: code.code }),
        )
        .await
        .unwrap();
        assert_eq!(added.friend.id, mina.id);
        assert_eq!(added.status, FriendshipStatus::Accepted);

        for (a, b) in [(&mina.id, &theo.id), (&theo.id, &mina.id)] {
            let edge = state.store.find_friendship(a, b).await.unwrap().unwrap();
            assert_eq!(edge.status, FriendshipStatus::Accepted);
        }
    }

    #[tokio::test]
    async fn own_code_is_rejected() {
        let state = state();
        let mina = seed_user(&state, "mina", UserType::Kid).await;
        let Json(code) = my_code(State(state.clone()), Extension(mina.clone())).await.unwrap();

        let err = add_by_code(
            State(state),
            Extension(mina),
            Json(AddByCodeRequest { code: code.code }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CANNOT_ADD_SELF");
    }

    #[tokio::test]
    async fn kid_cannot_add_parent_by_code() {
        let state = state();
        let parent = seed_user(&state, "dana", UserType::Parent).await;
        let kid = seed_user(&state, "mina", UserType::Kid).await;

        let Json(code) = my_code(State(state.clone()), Extension(parent)).await.unwrap();

        let err = add_by_code(
            State(state),
            Extension(kid),
            Json(AddByCodeRequest { code: code.code }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "USER_TYPE_MISMATCH");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn request_then_accept_flow() {
        let state = state();
        let mina = seed_user(&state, "mina", UserType::Kid).await;
        let theo = seed_user(&state, "theo", UserType::Kid).await;

        let Json(requested) = request_friend(
            State(state.clone()),
            Extension(mina.clone()),
            Json(FriendIdRequest {
                friend_id: theo.id.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(requested.status, FriendshipStatus::Pending);

        // A duplicate request from either side is refused.
        let err = request_friend(
            State(state.clone()),
            Extension(theo.clone()),
            Json(FriendIdRequest {
                friend_id: mina.id.clone(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "REQUEST_PENDING");

        let Json(accepted) = accept_friend(
            State(state.clone()),
            Extension(theo.clone()),
            Json(FriendIdRequest {
                friend_id: mina.id.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(accepted.status, FriendshipStatus::Accepted);

        let Json(friends) = list_friends(State(state), Extension(mina)).await.unwrap();
        assert_eq!(friends.friends.len(), 1);
        assert_eq!(friends.friends[0].id, theo.id);
    }

    #[tokio::test]
    async fn verified_kid_friendship_connects_parents() {
        let state = state();
        let parent_a = seed_user(&state, "dana", UserType::Parent).await;
        let parent_b = seed_user(&state, "lee", UserType::Parent).await;

        let mut mina = seed_user(&state, "mina", UserType::Kid).await;
        let mut theo = seed_user(&state, "theo", UserType::Kid).await;
        for (kid, parent) in [(&mut mina, &parent_a), (&mut theo, &parent_b)] {
            kid.parent_account = Some(parent.id.clone());
            kid.verification = Verification {
                parent_verified: true,
                school_verified: true,
                verified_at: Some(Utc::now()),
            };
            state.store.set_parent_account(&kid.id, &parent.id).await.unwrap();
            state
                .store
                .update_verification(&kid.id, &kid.verification)
                .await
                .unwrap();
        }

        let Json(code) = my_code(State(state.clone()), Extension(mina.clone())).await.unwrap();
        add_by_code(
            State(state.clone()),
            Extension(theo),
            Json(AddByCodeRequest { code: code.code }),
        )
        .await
        .unwrap();

        let connections = state.store.list_parent_connections(&parent_a.id).await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].parent_id, parent_b.id);
    }

    #[tokio::test]
    async fn search_requires_two_characters() {
        let state = state();
        let mina = seed_user(&state, "mina", UserType::Kid).await;

        let err = search(
            State(state),
            Extension(mina),
            Query(SearchParams { query: "m".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_SEARCH_QUERY");
    }

    #[tokio::test]
    async fn search_matches_same_type_and_flags_friends() {
        let state = state();
        let mina = seed_user(&state, "mina", UserType::Kid).await;
        let theo = seed_user(&state, "theodore", UserType::Kid).await;
        seed_user(&state, "theo-parent", UserType::Parent).await;

        state
            .store
            .upsert_friendship(&mina.id, &theo.id, FriendshipStatus::Accepted)
            .await
            .unwrap();

        let Json(hits) = search(
            State(state),
            Extension(mina),
            Query(SearchParams {
                query: "THEO".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(hits.results.len(), 1);
        assert_eq!(hits.results[0].user.id, theo.id);
        assert!(hits.results[0].is_friend);
    }
}
