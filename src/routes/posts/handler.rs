use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use crate::config::limits;
use crate::error::AppError;
use crate::middleware::auth::{require_kid, require_parent};
use crate::models::{ContentStatus, FriendshipStatus, Post, User, UserSummary, UserType};
use crate::moderation::initial_status;
use crate::store::Store;
use crate::utils::{sanitize_input, sanitize_text};
use crate::AppState;

use super::model::{
    CommentRequest, CommentView, CreatePostRequest, FeedResponse, LikeResponse,
    PendingPostsResponse, PostView, ReviewAction, ReviewRequest,
};

pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    require_kid(&user)?;

    let content = sanitize_input(&req.content);
    if content.is_empty() {
        return Err(AppError::validation("CONTENT_REQUIRED", "Post content is required"));
    }
    if content.chars().count() > limits::MAX_POST_LEN {
        return Err(AppError::validation(
            "CONTENT_TOO_LONG",
            format!("Posts are limited to {} characters", limits::MAX_POST_LEN),
        ));
    }

    let post = Post {
        id: Uuid::new_v4().to_string(),
        author_id: user.id.clone(),
        content: sanitize_text(&content),
        image_url: req.image_url,
        status: initial_status(user.user_type, user.monitoring_level),
        moderated_by: None,
        moderated_at: None,
        rejection_reason: None,
        created_at: Utc::now(),
    };
    state.store.insert_post(&post).await?;

    Ok((StatusCode::CREATED, Json(post)))
}

/// Approved posts from the caller's circle: friends for kids, children for
/// parents, plus the caller's own.
pub async fn feed(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<FeedResponse>, AppError> {
    let authors = circle_of(state.store.as_ref(), &user).await?;
    let posts = state
        .store
        .list_posts_by_authors(&authors, ContentStatus::Approved, limits::FEED_LIMIT)
        .await?;

    let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
    let likes = state.store.list_likes(&post_ids).await?;
    let comments = state.store.list_comments(&post_ids).await?;

    let mut people: HashMap<String, UserSummary> = HashMap::new();
    for id in posts
        .iter()
        .map(|p| &p.author_id)
        .chain(comments.iter().map(|c| &c.author_id))
    {
        if !people.contains_key(id) {
            if let Some(author) = state.store.find_user(id).await? {
                people.insert(id.clone(), UserSummary::of(&author));
            }
        }
    }

    let unknown = |id: &str| UserSummary {
        id: id.to_string(),
        display_name: "Unknown".into(),
        avatar: None,
        is_verified: false,
    };

    let views = posts
        .into_iter()
        .map(|post| {
            let like_ids: Vec<String> = likes
                .iter()
                .filter(|l| l.post_id == post.id)
                .map(|l| l.user_id.clone())
                .collect();
            let is_liked = like_ids.iter().any(|id| *id == user.id);
            let comment_views = comments
                .iter()
                .filter(|c| c.post_id == post.id)
                .map(|c| CommentView {
                    id: c.id.clone(),
                    author: people.get(&c.author_id).cloned().unwrap_or_else(|| unknown(&c.author_id)),
                    content: c.content.clone(),
                    created_at: c.created_at,
                })
                .collect();
            PostView {
                author: people
                    .get(&post.author_id)
                    .cloned()
                    .unwrap_or_else(|| unknown(&post.author_id)),
                id: post.id,
                content: post.content,
                image_url: post.image_url,
                status: post.status,
                likes: like_ids,
                is_liked,
                comments: comment_views,
                created_at: post.created_at,
            }
        })
        .collect();

    Ok(Json(FeedResponse { posts: views }))
}

pub async fn pending_posts(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<PendingPostsResponse>, AppError> {
    require_parent(&user)?;

    let children = state.store.list_child_ids(&user.id).await?;
    let posts = state
        .store
        .list_posts_by_authors(&children, ContentStatus::Pending, limits::FEED_LIMIT)
        .await?;

    Ok(Json(PendingPostsResponse { posts }))
}

pub async fn review_post(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(post_id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<Post>, AppError> {
    require_parent(&user)?;

    let post = state
        .store
        .find_post(&post_id)
        .await?
        .ok_or_else(|| AppError::not_found("POST_NOT_FOUND", "Post not found"))?;

    if !state.store.is_parent_of(&user.id, &post.author_id).await? {
        return Err(AppError::forbidden("NOT_YOUR_CHILD", "No link to this post's author"));
    }

    let (status, reason) = match req.action {
        ReviewAction::Approve => (ContentStatus::Approved, None),
        ReviewAction::Reject => {
            let reason = req
                .reason
                .as_deref()
                .map(sanitize_input)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "Post rejected by parent".to_string());
            (ContentStatus::Rejected, Some(reason))
        }
    };

    let now = Utc::now();
    state
        .store
        .update_post_review(&post.id, status, &user.id, now, reason.as_deref())
        .await?;

    Ok(Json(Post {
        status,
        moderated_by: Some(user.id),
        moderated_at: Some(now),
        rejection_reason: reason,
        ..post
    }))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(post_id): Path<String>,
) -> Result<Json<LikeResponse>, AppError> {
    require_kid(&user)?;

    let post = visible_approved_post(state.store.as_ref(), &user, &post_id).await?;
    let liked = state.store.toggle_like(&post.id, &user.id).await?;
    let likes_count = state.store.list_likes(&[post.id]).await?.len();
    Ok(Json(LikeResponse { liked, likes_count }))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(post_id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentView>), AppError> {
    require_kid(&user)?;

    let content = sanitize_input(&req.content);
    if content.is_empty() {
        return Err(AppError::validation("CONTENT_REQUIRED", "Comment content is required"));
    }
    if content.chars().count() > limits::MAX_COMMENT_LEN {
        return Err(AppError::validation(
            "CONTENT_TOO_LONG",
            format!("Comments are limited to {} characters", limits::MAX_COMMENT_LEN),
        ));
    }

    let post = visible_approved_post(state.store.as_ref(), &user, &post_id).await?;

    let comment = crate::models::Comment {
        id: Uuid::new_v4().to_string(),
        post_id: post.id,
        author_id: user.id.clone(),
        content: sanitize_text(&content),
        created_at: Utc::now(),
    };
    state.store.insert_comment(&comment).await?;

    Ok((
        StatusCode::CREATED,
        Json(CommentView {
            id: comment.id,
            author: UserSummary::of(&user),
            content: comment.content,
            created_at: comment.created_at,
        }),
    ))
}

/// Who the caller's feed draws from.
async fn circle_of(store: &dyn Store, user: &User) -> Result<Vec<String>, AppError> {
    let mut authors = match user.user_type {
        UserType::Kid => store.list_friend_ids(&user.id, FriendshipStatus::Accepted).await?,
        UserType::Parent => store.list_child_ids(&user.id).await?,
    };
    authors.push(user.id.clone());
    Ok(authors)
}

/// Likes and comments only land on approved posts the caller can see:
/// their own, a friend's, or a child's.
async fn visible_approved_post(
    store: &dyn Store,
    user: &User,
    post_id: &str,
) -> Result<Post, AppError> {
    let post = store
        .find_post(post_id)
        .await?
        .ok_or_else(|| AppError::not_found("POST_NOT_FOUND", "Post not found"))?;

    if post.status != ContentStatus::Approved {
        return Err(AppError::forbidden("POST_NOT_APPROVED", "Post is not approved"));
    }

    let visible = post.author_id == user.id
        || store
            .find_friendship(&user.id, &post.author_id)
            .await?
            .is_some_and(|f| f.status == FriendshipStatus::Accepted)
        || store.is_parent_of(&user.id, &post.author_id).await?;
    if !visible {
        return Err(AppError::forbidden("NOT_FRIENDS", "You cannot see this post"));
    }

    Ok(post)
}
