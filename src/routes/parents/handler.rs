use axum::extract::{Path, State};
use axum::{Extension, Json};

use crate::config::limits;
use crate::error::AppError;
use crate::middleware::auth::require_parent;
use crate::models::{FriendshipStatus, User, UserSummary};
use crate::routes::auth::model::UserPayload;
use crate::AppState;

use super::model::{
    ChildDetailResponse, ChildOverview, ConnectionView, ConnectionsResponse, DashboardResponse,
};

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<DashboardResponse>, AppError> {
    require_parent(&user)?;

    let child_ids = state.store.list_child_ids(&user.id).await?;

    let mut children = Vec::with_capacity(child_ids.len());
    for id in &child_ids {
        if let Some(child) = state.store.find_user(id).await? {
            children.push(ChildOverview {
                summary: UserSummary::of(&child),
                monitoring_level: child.monitoring_level,
                last_login: child.last_login,
            });
        }
    }

    let recent_messages = state
        .store
        .list_messages_involving(&child_ids, limits::DASHBOARD_ACTIVITY_LIMIT)
        .await?;

    Ok(Json(DashboardResponse {
        children,
        recent_messages,
    }))
}

pub async fn child_detail(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(child_id): Path<String>,
) -> Result<Json<ChildDetailResponse>, AppError> {
    require_parent(&user)?;

    if !state.store.is_parent_of(&user.id, &child_id).await? {
        return Err(AppError::forbidden("NOT_YOUR_CHILD", "No link to this child"));
    }

    let child = state
        .store
        .find_user(&child_id)
        .await?
        .ok_or_else(|| AppError::not_found("CHILD_NOT_FOUND", "Child account not found"))?;

    let friend_ids = state
        .store
        .list_friend_ids(&child.id, FriendshipStatus::Accepted)
        .await?;
    let mut friends = Vec::with_capacity(friend_ids.len());
    for id in friend_ids {
        if let Some(friend) = state.store.find_user(&id).await? {
            friends.push(UserSummary::of(&friend));
        }
    }

    let messages = state
        .store
        .list_messages_for(&child.id, None, limits::MESSAGE_PAGE_LIMIT)
        .await?;

    Ok(Json(ChildDetailResponse {
        child: UserPayload::of(child),
        friends,
        messages,
    }))
}

pub async fn connections(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<ConnectionsResponse>, AppError> {
    require_parent(&user)?;

    let links = state.store.list_parent_connections(&user.id).await?;

    let mut connections = Vec::with_capacity(links.len());
    for link in links {
        if let Some(other) = state.store.find_user(&link.parent_id).await? {
            connections.push(ConnectionView {
                parent: UserSummary::of(&other),
                connected_at: link.connected_at,
            });
        }
    }

    Ok(Json(ConnectionsResponse { connections }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::config::Config;
    use crate::models::{MonitoringLevel, Profile, UserType, Verification};
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
    async fn dashboard_lists_children() {
        let state = state();
        let parent = seed_user(&state, "dana", UserType::Parent).await;
        let mina = seed_user(&state, "mina", UserType::Kid).await;
        let theo = seed_user(&state, "theo", UserType::Kid).await;
        for kid in [&mina, &theo] {
            state.store.upsert_parent_child(&parent.id, &kid.id).await.unwrap();
        }

        let Json(dash) = dashboard(State(state), Extension(parent)).await.unwrap();
        assert_eq!(dash.children.len(), 2);
        assert!(dash.recent_messages.is_empty());
    }

    #[tokio::test]
    async fn child_detail_requires_the_link() {
        let state = state();
        let parent = seed_user(&state, "dana", UserType::Parent).await;
        let kid = seed_user(&state, "mina", UserType::Kid).await;

        let err = child_detail(
            State(state.clone()),
            Extension(parent.clone()),
            Path(kid.id.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NOT_YOUR_CHILD");

        state.store.upsert_parent_child(&parent.id, &kid.id).await.unwrap();
        let Json(detail) = child_detail(State(state), Extension(parent), Path(kid.id.clone()))
            .await
            .unwrap();
        assert_eq!(detail.child.user.id, kid.id);
    }

    #[tokio::test]
    async fn kids_cannot_open_the_dashboard() {
        let state = state();
        let kid = seed_user(&state, "mina", UserType::Kid).await;

        let err = dashboard(State(state), Extension(kid)).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_PERMISSIONS");
    }
}
