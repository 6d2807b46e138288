use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Kid,
    Parent,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Kid => "kid",
            UserType::Parent => "parent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "kid" => Some(UserType::Kid),
            "parent" => Some(UserType::Parent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringLevel {
    Full,
    Partial,
}

impl MonitoringLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringLevel::Full => "full",
            MonitoringLevel::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(MonitoringLevel::Full),
            "partial" => Some(MonitoringLevel::Partial),
            _ => None,
        }
    }

    /// Monitoring derives from age at verification time: 13 and up gets
    /// partial monitoring, younger (or unknown birth date) gets full.
    pub fn for_age(age: Option<i32>) -> Self {
        match age {
            Some(age) if age >= 13 => MonitoringLevel::Partial,
            _ => MonitoringLevel::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Pending,
    Approved,
    Rejected,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Approved => "approved",
            ContentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ContentStatus::Pending),
            "approved" => Some(ContentStatus::Approved),
            "rejected" => Some(ContentStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendshipStatus::Pending),
            "accepted" => Some(FriendshipStatus::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub school: Option<String>,
    pub grade: Option<String>,
}

impl Profile {
    pub fn display_name_or(&self, fallback: &str) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Verification {
    pub parent_verified: bool,
    pub school_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub user_type: UserType,
    pub profile: Profile,
    pub verification: Verification,
    pub monitoring_level: MonitoringLevel,
    pub parent_account: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Two-tick verification: kids need both the parent link and a school
    /// code; parents never need school verification.
    pub fn is_fully_verified(&self) -> bool {
        match self.user_type {
            UserType::Kid => {
                self.verification.parent_verified && self.verification.school_verified
            }
            UserType::Parent => true,
        }
    }

    pub fn display_name(&self) -> String {
        self.profile.display_name_or(&self.email)
    }
}

/// One directed edge of a friendship.  An accepted friendship is always two
/// rows, (A,B) and (B,A), both `accepted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub user_id: String,
    pub friend_id: String,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FriendCode {
    pub user_id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl FriendCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub status: ContentStatus,
    pub moderated_by: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A "like" row, unique per (post_id, user_id).  Toggling is a conditional
/// delete-else-insert against that key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub post_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub status: ContentStatus,
    pub moderated_by: Option<String>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The requested profile diff.  Only present fields are applied on approval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub school: Option<String>,
    pub grade: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.avatar.is_none()
            && self.school.is_none()
            && self.grade.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChangeRequest {
    pub id: String,
    pub kid_id: String,
    pub parent_id: String,
    pub changes: ProfileChanges,
    pub current_profile: Profile,
    pub status: ContentStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SchoolCode {
    pub id: String,
    pub code: String,
    pub school_name: String,
    pub grade: String,
    pub assigned_to: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A short-lived code a parent mints so a child device can log in without a
/// password.  Exchanged exactly once for a code-login scoped token.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LoginCode {
    pub code: String,
    pub child_id: String,
    pub parent_id: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentConnection {
    pub parent_id: String,
    pub connected_at: DateTime<Utc>,
}

/// Compact user shape returned by friend lists and search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub is_verified: bool,
}

impl UserSummary {
    pub fn of(user: &User) -> Self {
        UserSummary {
            id: user.id.clone(),
            display_name: user.display_name(),
            avatar: user.profile.avatar.clone(),
            is_verified: user.is_fully_verified(),
        }
    }
}
