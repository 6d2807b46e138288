use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::User;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub user_type: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCodeRequest {
    pub child_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginWithCodeRequest {
    pub code: String,
}

/// User as the API returns it, with the derived verification bit attached.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    #[serde(flatten)]
    pub user: User,
    pub is_fully_verified: bool,
}

impl UserPayload {
    pub fn of(user: User) -> Self {
        let is_fully_verified = user.is_fully_verified();
        UserPayload {
            user,
            is_fully_verified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCodeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}
