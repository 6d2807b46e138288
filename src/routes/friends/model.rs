use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserSummary;

#[derive(Debug, Deserialize)]
pub struct AddByCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendIdRequest {
    #[serde(default)]
    pub friend_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendCodeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendsResponse {
    pub friends: Vec<UserSummary>,
}

/// Search hit: user summary plus whether an accepted edge already exists.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub user: UserSummary,
    pub is_friend: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFriendResponse {
    pub friend: UserSummary,
    pub status: crate::models::FriendshipStatus,
}
