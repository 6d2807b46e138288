use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;

use crate::error::AppError;
use crate::models::{Profile, User};
use crate::AppState;

use super::model::{DeleteResponse, ExportResponse};

pub async fn export_my_data(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<ExportResponse>, AppError> {
    let posts = state.store.list_posts_by_author(&user.id).await?;
    let comments = state.store.list_comments_by_author(&user.id).await?;
    let reactions = state.store.list_reactions_by_user(&user.id).await?;
    let messages = state.store.list_messages_for(&user.id, None, i64::MAX).await?;
    let friendships = state.store.list_friendships_of(&user.id).await?;

    Ok(Json(ExportResponse {
        exported_at: Utc::now(),
        user,
        posts,
        comments,
        reactions,
        messages,
        friendships,
    }))
}

/// Account deletion: the user row survives as an inactive tombstone, all
/// owned content is purged.
pub async fn delete_my_account(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.store.purge_user_data(&user.id).await?;

    let tombstone = Profile {
        display_name: Some("Deleted user".into()),
        ..Profile::default()
    };
    state.store.deactivate_user(&user.id, &tombstone).await?;

    Ok(Json(DeleteResponse { deleted: true }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::models::{
        ContentStatus, FriendshipStatus, MonitoringLevel, Post, UserType, Verification,
    };
    use crate::store::MemoryStore;

    use super::*;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), Config::for_tests())
    }

    async fn seed_kid(state: &AppState, name: &str) -> User {
        let kid = User {
            id: format!("{name}-id"),
            email: format!("{name}@example.com"),
            user_type: UserType::Kid,
            profile: Profile {
                display_name: Some(name.to_string()),
                ..Profile::default()
            },
            verification: Verification::default(),
            monitoring_level: MonitoringLevel::Partial,
            parent_account: None,
            is_active: true,
            password_hash: "x".into(),
            last_login: None,
            created_at: Utc::now(),
        };
        state.store.insert_user(&kid).await.unwrap();
        kid
    }

    async fn seed_post(state: &AppState, author: &User, content: &str) -> Post {
        let post = Post {
            id: format!("post-{content}"),
            author_id: author.id.clone(),
            content: content.into(),
            image_url: None,
            status: ContentStatus::Approved,
            moderated_by: None,
            moderated_at: None,
            rejection_reason: None,
            created_at: Utc::now(),
        };
        state.store.insert_post(&post).await.unwrap();
        post
    }

    #[tokio::test]
    async fn export_collects_everything_owned() {
        let state = state();
        let mina = seed_kid(&state, "mina").await;
        let theo = seed_kid(&state, "theo").await;

        let post = seed_post(&state, &mina, "mine").await;
        state.store.toggle_like(&post.id, &mina.id).await.unwrap();
        state
            .store
            .upsert_friendship(&mina.id, &theo.id, FriendshipStatus::Accepted)
            .await
            .unwrap();

        let Json(export) = export_my_data(State(state), Extension(mina)).await.unwrap();
        assert_eq!(export.posts.len(), 1);
        assert_eq!(export.reactions.len(), 1);
        assert_eq!(export.friendships.len(), 1);
    }

    #[tokio::test]
    async fn deletion_tombstones_the_user_and_purges_content() {
        let state = state();
        let mina = seed_kid(&state, "mina").await;
        let theo = seed_kid(&state, "theo").await;

        let post = seed_post(&state, &mina, "gone").await;
        state
            .store
            .upsert_friendship(&mina.id, &theo.id, FriendshipStatus::Accepted)
            .await
            .unwrap();
        state
            .store
            .upsert_friendship(&theo.id, &mina.id, FriendshipStatus::Accepted)
            .await
            .unwrap();

        delete_my_account(State(state.clone()), Extension(mina.clone())).await.unwrap();

        let stored = state.store.find_user(&mina.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.profile.display_name.as_deref(), Some("Deleted user"));
        assert!(state.store.find_post(&post.id).await.unwrap().is_none());
        assert!(state
            .store
            .list_friend_ids(&theo.id, FriendshipStatus::Accepted)
            .await
            .unwrap()
            .is_empty());
    }
}
