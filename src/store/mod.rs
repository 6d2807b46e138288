use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Comment, ContentStatus, Friendship, FriendshipStatus, FriendCode, LoginCode, Message,
    MonitoringLevel, ParentConnection, Post, Profile, ProfileChangeRequest, Reaction, SchoolCode,
    User, UserType, Verification,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence seam.  Every domain operation talks to the store through this
/// trait; the Postgres implementation backs production and the in-memory one
/// backs tests and zero-dependency local runs.
///
/// Operations that the spec requires to be race-safe (edge upserts, code
/// claims, like toggles) are expressed as single store calls so each
/// implementation can make them atomic with its own primitives.
#[async_trait]
pub trait Store: Send + Sync {
    // ── users ────────────────────────────────────────────────────────────
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn update_profile(&self, id: &str, profile: &Profile) -> Result<(), StoreError>;
    async fn update_verification(&self, id: &str, v: &Verification) -> Result<(), StoreError>;
    async fn set_parent_account(&self, child_id: &str, parent_id: &str) -> Result<(), StoreError>;
    async fn set_monitoring_level(
        &self,
        id: &str,
        level: MonitoringLevel,
    ) -> Result<(), StoreError>;
    async fn set_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
    /// Soft delete: flips is_active off and replaces the profile with a
    /// tombstone.  Hard deletion of content is `purge_user_data`.
    async fn deactivate_user(&self, id: &str, tombstone: &Profile) -> Result<(), StoreError>;
    /// Case-insensitive substring match over display/first/last name among
    /// active users of `user_type`, excluding `exclude`.
    async fn search_users(
        &self,
        user_type: UserType,
        exclude: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<User>, StoreError>;

    // ── relationship graph ───────────────────────────────────────────────
    /// Upsert keyed on (user_id, friend_id); a second writer racing on the
    /// same pair lands on the same row.
    async fn upsert_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
        status: FriendshipStatus,
    ) -> Result<(), StoreError>;
    async fn find_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
    ) -> Result<Option<Friendship>, StoreError>;
    async fn list_friend_ids(
        &self,
        user_id: &str,
        status: FriendshipStatus,
    ) -> Result<Vec<String>, StoreError>;
    async fn list_friendships_of(&self, user_id: &str) -> Result<Vec<Friendship>, StoreError>;

    async fn find_friend_code_for(&self, user_id: &str) -> Result<Option<FriendCode>, StoreError>;
    async fn find_friend_code(&self, code: &str) -> Result<Option<FriendCode>, StoreError>;
    /// One code row per owner; re-minting overwrites the previous code.
    async fn upsert_friend_code(&self, code: &FriendCode) -> Result<(), StoreError>;

    async fn upsert_parent_child(&self, parent_id: &str, child_id: &str) -> Result<(), StoreError>;
    async fn list_child_ids(&self, parent_id: &str) -> Result<Vec<String>, StoreError>;
    async fn is_parent_of(&self, parent_id: &str, child_id: &str) -> Result<bool, StoreError>;
    /// Unordered, idempotent parent-to-parent connection.
    async fn upsert_parent_connection(&self, a: &str, b: &str) -> Result<(), StoreError>;
    async fn list_parent_connections(
        &self,
        parent_id: &str,
    ) -> Result<Vec<ParentConnection>, StoreError>;

    // ── posts ────────────────────────────────────────────────────────────
    async fn insert_post(&self, post: &Post) -> Result<(), StoreError>;
    async fn find_post(&self, id: &str) -> Result<Option<Post>, StoreError>;
    async fn update_post_review(
        &self,
        id: &str,
        status: ContentStatus,
        moderated_by: &str,
        moderated_at: DateTime<Utc>,
        rejection_reason: Option<&str>,
    ) -> Result<(), StoreError>;
    /// Posts by any of `author_ids` with `status`, newest first, capped.
    async fn list_posts_by_authors(
        &self,
        author_ids: &[String],
        status: ContentStatus,
        limit: i64,
    ) -> Result<Vec<Post>, StoreError>;
    async fn list_posts_by_author(&self, author_id: &str) -> Result<Vec<Post>, StoreError>;
    /// Flips like membership for (post_id, user_id); returns whether the
    /// user now likes the post.
    async fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<bool, StoreError>;
    async fn list_likes(&self, post_ids: &[String]) -> Result<Vec<Reaction>, StoreError>;
    async fn list_reactions_by_user(&self, user_id: &str) -> Result<Vec<Reaction>, StoreError>;
    async fn insert_comment(&self, comment: &Comment) -> Result<(), StoreError>;
    async fn list_comments(&self, post_ids: &[String]) -> Result<Vec<Comment>, StoreError>;
    async fn list_comments_by_author(&self, author_id: &str) -> Result<Vec<Comment>, StoreError>;

    // ── messages ─────────────────────────────────────────────────────────
    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;
    async fn find_message(&self, id: &str) -> Result<Option<Message>, StoreError>;
    /// Messages where `user_id` is sender or receiver, optionally narrowed
    /// to one counterpart, newest first, capped.
    async fn list_messages_for(
        &self,
        user_id: &str,
        counterpart: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;
    async fn list_messages_involving(
        &self,
        user_ids: &[String],
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;
    /// Read receipts: marks approved unread messages addressed to
    /// `receiver_id` (optionally from one counterpart) as read.  Never
    /// touches moderation status.
    async fn mark_messages_read(
        &self,
        receiver_id: &str,
        counterpart: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn update_message_review(
        &self,
        id: &str,
        status: ContentStatus,
        moderated_by: &str,
        moderated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn delete_message(&self, id: &str) -> Result<(), StoreError>;

    // ── profile change requests ──────────────────────────────────────────
    async fn insert_change_request(&self, r: &ProfileChangeRequest) -> Result<(), StoreError>;
    async fn find_change_request(
        &self,
        id: &str,
    ) -> Result<Option<ProfileChangeRequest>, StoreError>;
    async fn find_pending_change_request_for(
        &self,
        kid_id: &str,
    ) -> Result<Option<ProfileChangeRequest>, StoreError>;
    async fn list_pending_change_requests(
        &self,
        parent_id: &str,
    ) -> Result<Vec<ProfileChangeRequest>, StoreError>;
    async fn update_change_request_review(
        &self,
        id: &str,
        status: ContentStatus,
        reviewed_by: &str,
        reviewed_at: DateTime<Utc>,
        rejection_reason: Option<&str>,
    ) -> Result<(), StoreError>;

    // ── school codes ─────────────────────────────────────────────────────
    async fn insert_school_code(&self, code: &SchoolCode) -> Result<(), StoreError>;
    async fn find_school_code(&self, code: &str) -> Result<Option<SchoolCode>, StoreError>;
    /// Conditional single-use claim: succeeds only while the code is
    /// unassigned, so two racing kids cannot both take it.
    async fn claim_school_code(
        &self,
        id: &str,
        kid_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // ── login codes ──────────────────────────────────────────────────────
    /// One active code per child; re-minting overwrites.
    async fn upsert_login_code(&self, code: &LoginCode) -> Result<(), StoreError>;
    async fn find_login_code(&self, code: &str) -> Result<Option<LoginCode>, StoreError>;
    async fn find_login_code_for(&self, child_id: &str) -> Result<Option<LoginCode>, StoreError>;
    /// Conditional single-use claim, mirroring `claim_school_code`.
    async fn consume_login_code(&self, code: &str) -> Result<bool, StoreError>;

    // ── account erasure ──────────────────────────────────────────────────
    /// Hard-deletes everything the user owns or participates in: posts,
    /// comments, reactions, messages, friendship edges, codes, change
    /// requests, and parent links.
    async fn purge_user_data(&self, user_id: &str) -> Result<(), StoreError>;
}
