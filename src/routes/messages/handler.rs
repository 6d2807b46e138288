use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use crate::config::limits;
use crate::error::AppError;
use crate::middleware::auth::require_parent;
use crate::models::{ContentStatus, FriendshipStatus, Message, User};
use crate::moderation::initial_status;
use crate::utils::{sanitize_input, sanitize_text};
use crate::AppState;

use super::model::{
    ListParams, MessagesResponse, ModerateAction, ModerateRequest, ModerateResponse,
    SendMessageRequest,
};

pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    if req.receiver_id == user.id {
        return Err(AppError::validation("CANNOT_MESSAGE_SELF", "You cannot message yourself"));
    }

    let receiver = state
        .store
        .find_user(&req.receiver_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::not_found("RECEIVER_NOT_FOUND", "Receiver not found"))?;

    if receiver.user_type != user.user_type {
        return Err(AppError::forbidden(
            "USER_TYPE_MISMATCH",
            "Messages connect accounts of the same type",
        ));
    }

    match state.store.find_friendship(&user.id, &receiver.id).await? {
        Some(edge) if edge.status == FriendshipStatus::Accepted => {}
        Some(_) => {
            return Err(AppError::forbidden(
                "FRIENDSHIP_PENDING",
                "Your friend request has not been accepted yet",
            ));
        }
        None => {
            return Err(AppError::forbidden("NOT_FRIENDS", "You can only message friends"));
        }
    }

    let content = sanitize_input(&req.content);
    if content.is_empty() {
        return Err(AppError::validation("CONTENT_REQUIRED", "Message content is required"));
    }
    if content.chars().count() > limits::MAX_MESSAGE_LEN {
        return Err(AppError::validation(
            "CONTENT_TOO_LONG",
            format!("Messages are limited to {} characters", limits::MAX_MESSAGE_LEN),
        ));
    }

    let message = Message {
        id: Uuid::new_v4().to_string(),
        sender_id: user.id.clone(),
        receiver_id: receiver.id,
        content: sanitize_text(&content),
        status: initial_status(user.user_type, user.monitoring_level),
        moderated_by: None,
        moderated_at: None,
        is_read: false,
        read_at: None,
        created_at: Utc::now(),
    };
    state.store.insert_message(&message).await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Lists the caller's messages oldest-first.  Senders always see their own;
/// received messages only show once approved.  Listing stamps read receipts
/// on the approved messages it delivers and nothing else.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(params): Query<ListParams>,
) -> Result<Json<MessagesResponse>, AppError> {
    let counterpart = params.conversation_with.as_deref();

    state
        .store
        .mark_messages_read(&user.id, counterpart, Utc::now())
        .await?;

    let mut messages: Vec<Message> = state
        .store
        .list_messages_for(&user.id, counterpart, limits::MESSAGE_PAGE_LIMIT)
        .await?
        .into_iter()
        .filter(|m| {
            m.sender_id == user.id
                || (m.receiver_id == user.id && m.status == ContentStatus::Approved)
        })
        .collect();
    messages.reverse();

    Ok(Json(MessagesResponse { messages }))
}

pub async fn pending_messages(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<MessagesResponse>, AppError> {
    require_parent(&user)?;

    let children = state.store.list_child_ids(&user.id).await?;
    let messages = state
        .store
        .list_messages_involving(&children, limits::MESSAGE_PAGE_LIMIT)
        .await?
        .into_iter()
        .filter(|m| m.status == ContentStatus::Pending)
        .collect();

    Ok(Json(MessagesResponse { messages }))
}

pub async fn moderate_message(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(message_id): Path<String>,
    Json(req): Json<ModerateRequest>,
) -> Result<Json<ModerateResponse>, AppError> {
    require_parent(&user)?;

    let message = state
        .store
        .find_message(&message_id)
        .await?
        .ok_or_else(|| AppError::not_found("MESSAGE_NOT_FOUND", "Message not found"))?;

    // Either side's parent may act on a message.
    let linked = state.store.is_parent_of(&user.id, &message.sender_id).await?
        || state.store.is_parent_of(&user.id, &message.receiver_id).await?;
    if !linked {
        return Err(AppError::forbidden("NOT_YOUR_CHILD", "No link to either participant"));
    }

    match req.action {
        ModerateAction::Delete => {
            state.store.delete_message(&message.id).await?;
            Ok(Json(ModerateResponse {
                message: None,
                deleted: true,
            }))
        }
        action => {
            let status = if action == ModerateAction::Approve {
                ContentStatus::Approved
            } else {
                ContentStatus::Rejected
            };
            let now = Utc::now();
            state
                .store
                .update_message_review(&message.id, status, &user.id, now)
                .await?;
            Ok(Json(ModerateResponse {
                message: Some(Message {
                    status,
                    moderated_by: Some(user.id),
                    moderated_at: Some(now),
                    ..message
                }),
                deleted: false,
            }))
        }
    }
}
