use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Comment, Friendship, Message, Post, Reaction, User};

/// Everything we hold about an account, in one payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub exported_at: DateTime<Utc>,
    pub user: User,
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
    pub reactions: Vec<Reaction>,
    pub messages: Vec<Message>,
    pub friendships: Vec<Friendship>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}
