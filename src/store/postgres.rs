use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::models::{
    Comment, ContentStatus, Friendship, FriendshipStatus, FriendCode, LoginCode, Message,
    MonitoringLevel, ParentConnection, Post, Profile, ProfileChangeRequest, Reaction, SchoolCode,
    User, UserType, Verification,
};

use super::{Store, StoreError};

/// Postgres-backed store.  Queries are runtime-checked so the crate builds
/// without a live database; the schema lives in `migrations/`.
///
/// Race-sensitive operations map onto Postgres primitives: pair-keyed
/// upserts for friendship edges and codes, conditional UPDATEs for
/// single-use code claims, and delete-else-insert against a unique key for
/// like toggles.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_user_type(s: &str) -> Result<UserType, StoreError> {
    UserType::parse(s).ok_or_else(|| StoreError::Corrupt(format!("user_type {s:?}")))
}

fn parse_monitoring(s: &str) -> Result<MonitoringLevel, StoreError> {
    MonitoringLevel::parse(s).ok_or_else(|| StoreError::Corrupt(format!("monitoring_level {s:?}")))
}

fn parse_content_status(s: &str) -> Result<ContentStatus, StoreError> {
    ContentStatus::parse(s).ok_or_else(|| StoreError::Corrupt(format!("status {s:?}")))
}

fn parse_friendship_status(s: &str) -> Result<FriendshipStatus, StoreError> {
    FriendshipStatus::parse(s).ok_or_else(|| StoreError::Corrupt(format!("status {s:?}")))
}

/// Escapes LIKE wildcards in a user-supplied search term.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    user_type: String,
    profile: Json<Profile>,
    verification: Json<Verification>,
    monitoring_level: String,
    parent_account: Option<String>,
    is_active: bool,
    password_hash: String,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, StoreError> {
        Ok(User {
            user_type: parse_user_type(&row.user_type)?,
            monitoring_level: parse_monitoring(&row.monitoring_level)?,
            id: row.id,
            email: row.email,
            profile: row.profile.0,
            verification: row.verification.0,
            parent_account: row.parent_account,
            is_active: row.is_active,
            password_hash: row.password_hash,
            last_login: row.last_login,
            created_at: row.created_at,
        })
    }
}

const SELECT_USER: &str = "SELECT id, email, user_type, profile, verification, monitoring_level, \
                           parent_account, is_active, password_hash, last_login, created_at \
                           FROM users";

#[derive(FromRow)]
struct FriendshipRow {
    user_id: String,
    friend_id: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<FriendshipRow> for Friendship {
    type Error = StoreError;

    fn try_from(row: FriendshipRow) -> Result<Self, StoreError> {
        Ok(Friendship {
            status: parse_friendship_status(&row.status)?,
            user_id: row.user_id,
            friend_id: row.friend_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct PostRow {
    id: String,
    author_id: String,
    content: String,
    image_url: Option<String>,
    status: String,
    moderated_by: Option<String>,
    moderated_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, StoreError> {
        Ok(Post {
            status: parse_content_status(&row.status)?,
            id: row.id,
            author_id: row.author_id,
            content: row.content,
            image_url: row.image_url,
            moderated_by: row.moderated_by,
            moderated_at: row.moderated_at,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
        })
    }
}

const SELECT_POST: &str = "SELECT id, author_id, content, image_url, status, moderated_by, \
                           moderated_at, rejection_reason, created_at FROM posts";

#[derive(FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    receiver_id: String,
    content: String,
    status: String,
    moderated_by: Option<String>,
    moderated_at: Option<DateTime<Utc>>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, StoreError> {
        Ok(Message {
            status: parse_content_status(&row.status)?,
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            moderated_by: row.moderated_by,
            moderated_at: row.moderated_at,
            is_read: row.is_read,
            read_at: row.read_at,
            created_at: row.created_at,
        })
    }
}

const SELECT_MESSAGE: &str = "SELECT id, sender_id, receiver_id, content, status, moderated_by, \
                              moderated_at, is_read, read_at, created_at FROM messages";

#[derive(FromRow)]
struct ChangeRequestRow {
    id: String,
    kid_id: String,
    parent_id: String,
    changes: Json<crate::models::ProfileChanges>,
    current_profile: Json<Profile>,
    status: String,
    reviewed_by: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChangeRequestRow> for ProfileChangeRequest {
    type Error = StoreError;

    fn try_from(row: ChangeRequestRow) -> Result<Self, StoreError> {
        Ok(ProfileChangeRequest {
            status: parse_content_status(&row.status)?,
            id: row.id,
            kid_id: row.kid_id,
            parent_id: row.parent_id,
            changes: row.changes.0,
            current_profile: row.current_profile.0,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
        })
    }
}

const SELECT_CHANGE_REQUEST: &str =
    "SELECT id, kid_id, parent_id, changes, current_profile, status, reviewed_by, reviewed_at, \
     rejection_reason, created_at FROM profile_change_requests";

#[async_trait]
impl Store for PostgresStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, email, user_type, profile, verification, monitoring_level, \
             parent_account, is_active, password_hash, last_login, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(user.user_type.as_str())
        .bind(Json(&user.profile))
        .bind(Json(&user.verification))
        .bind(user.monitoring_level.as_str())
        .bind(&user.parent_account)
        .bind(user.is_active)
        .bind(&user.password_hash)
        .bind(user.last_login)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE email = $1"))
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn update_profile(&self, id: &str, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET profile = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(profile))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_verification(&self, id: &str, v: &Verification) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET verification = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(v))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_parent_account(&self, child_id: &str, parent_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET parent_account = $2 WHERE id = $1")
            .bind(child_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_monitoring_level(
        &self,
        id: &str,
        level: MonitoringLevel,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET monitoring_level = $2 WHERE id = $1")
            .bind(id)
            .bind(level.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_user(&self, id: &str, tombstone: &Profile) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET is_active = FALSE, profile = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(tombstone))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_users(
        &self,
        user_type: UserType,
        exclude: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<User>, StoreError> {
        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} WHERE user_type = $1 AND is_active AND id <> $2 \
             AND (profile->>'displayName' ILIKE $3 \
                  OR profile->>'firstName' ILIKE $3 \
                  OR profile->>'lastName' ILIKE $3) \
             ORDER BY id LIMIT $4"
        ))
        .bind(user_type.as_str())
        .bind(exclude)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn upsert_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
        status: FriendshipStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO friendships (user_id, friend_id, status, created_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (user_id, friend_id) DO UPDATE SET status = EXCLUDED.status",
        )
        .bind(user_id)
        .bind(friend_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
    ) -> Result<Option<Friendship>, StoreError> {
        sqlx::query_as::<_, FriendshipRow>(
            "SELECT user_id, friend_id, status, created_at FROM friendships \
             WHERE user_id = $1 AND friend_id = $2",
        )
        .bind(user_id)
        .bind(friend_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Friendship::try_from)
        .transpose()
    }

    async fn list_friend_ids(
        &self,
        user_id: &str,
        status: FriendshipStatus,
    ) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT friend_id FROM friendships WHERE user_id = $1 AND status = $2 \
             ORDER BY friend_id",
        )
        .bind(user_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_friendships_of(&self, user_id: &str) -> Result<Vec<Friendship>, StoreError> {
        let rows = sqlx::query_as::<_, FriendshipRow>(
            "SELECT user_id, friend_id, status, created_at FROM friendships \
             WHERE user_id = $1 OR friend_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Friendship::try_from).collect()
    }

    async fn find_friend_code_for(&self, user_id: &str) -> Result<Option<FriendCode>, StoreError> {
        Ok(sqlx::query_as::<_, FriendCode>(
            "SELECT user_id, code, expires_at, created_at FROM friend_codes WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_friend_code(&self, code: &str) -> Result<Option<FriendCode>, StoreError> {
        Ok(sqlx::query_as::<_, FriendCode>(
            "SELECT user_id, code, expires_at, created_at FROM friend_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_friend_code(&self, code: &FriendCode) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO friend_codes (user_id, code, expires_at, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at, \
                 created_at = EXCLUDED.created_at",
        )
        .bind(&code.user_id)
        .bind(&code.code)
        .bind(code.expires_at)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_parent_child(&self, parent_id: &str, child_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO parent_children (parent_id, child_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(parent_id)
        .bind(child_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_child_ids(&self, parent_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT child_id FROM parent_children WHERE parent_id = $1")
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn is_parent_of(&self, parent_id: &str, child_id: &str) -> Result<bool, StoreError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM parent_children WHERE parent_id = $1 AND child_id = $2)",
        )
        .bind(parent_id)
        .bind(child_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn upsert_parent_connection(&self, a: &str, b: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO parent_connections (parent_a, parent_b, connected_at) \
             VALUES (LEAST($1, $2), GREATEST($1, $2), NOW()) \
             ON CONFLICT DO NOTHING",
        )
        .bind(a)
        .bind(b)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_parent_connections(
        &self,
        parent_id: &str,
    ) -> Result<Vec<ParentConnection>, StoreError> {
        let rows: Vec<(String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT parent_a, parent_b, connected_at FROM parent_connections \
             WHERE parent_a = $1 OR parent_b = $1",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(a, b, at)| ParentConnection {
                parent_id: if a == parent_id { b } else { a },
                connected_at: at,
            })
            .collect())
    }

    async fn insert_post(&self, post: &Post) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO posts (id, author_id, content, image_url, status, moderated_by, \
             moderated_at, rejection_reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&post.id)
        .bind(&post.author_id)
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(post.status.as_str())
        .bind(&post.moderated_by)
        .bind(post.moderated_at)
        .bind(&post.rejection_reason)
        .bind(post.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_post(&self, id: &str) -> Result<Option<Post>, StoreError> {
        sqlx::query_as::<_, PostRow>(&format!("{SELECT_POST} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Post::try_from)
            .transpose()
    }

    async fn update_post_review(
        &self,
        id: &str,
        status: ContentStatus,
        moderated_by: &str,
        moderated_at: DateTime<Utc>,
        rejection_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE posts SET status = $2, moderated_by = $3, moderated_at = $4, \
             rejection_reason = $5 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(moderated_by)
        .bind(moderated_at)
        .bind(rejection_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_posts_by_authors(
        &self,
        author_ids: &[String],
        status: ContentStatus,
        limit: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "{SELECT_POST} WHERE status = $1 AND author_id = ANY($2) \
             ORDER BY created_at DESC, id DESC LIMIT $3"
        ))
        .bind(status.as_str())
        .bind(author_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Post::try_from).collect()
    }

    async fn list_posts_by_author(&self, author_id: &str) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "{SELECT_POST} WHERE author_id = $1 ORDER BY created_at DESC"
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Post::try_from).collect()
    }

    async fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let removed = sqlx::query("DELETE FROM reactions WHERE post_id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed > 0 {
            return Ok(false);
        }

        // The unique key absorbs a concurrent insert of the same like.
        let inserted = sqlx::query(
            "INSERT INTO reactions (post_id, user_id, created_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT DO NOTHING",
        )
        .bind(post_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn list_likes(&self, post_ids: &[String]) -> Result<Vec<Reaction>, StoreError> {
        Ok(sqlx::query_as::<_, Reaction>(
            "SELECT post_id, user_id, created_at FROM reactions WHERE post_id = ANY($1)",
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_reactions_by_user(&self, user_id: &str) -> Result<Vec<Reaction>, StoreError> {
        Ok(sqlx::query_as::<_, Reaction>(
            "SELECT post_id, user_id, created_at FROM reactions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO comments (id, post_id, author_id, content, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&comment.id)
        .bind(&comment.post_id)
        .bind(&comment.author_id)
        .bind(&comment.content)
        .bind(comment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_comments(&self, post_ids: &[String]) -> Result<Vec<Comment>, StoreError> {
        Ok(sqlx::query_as::<_, Comment>(
            "SELECT id, post_id, author_id, content, created_at FROM comments \
             WHERE post_id = ANY($1) ORDER BY created_at",
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_comments_by_author(&self, author_id: &str) -> Result<Vec<Comment>, StoreError> {
        Ok(sqlx::query_as::<_, Comment>(
            "SELECT id, post_id, author_id, content, created_at FROM comments \
             WHERE author_id = $1 ORDER BY created_at DESC",
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, content, status, moderated_by, \
             moderated_at, is_read, read_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(&message.moderated_by)
        .bind(message.moderated_at)
        .bind(message.is_read)
        .bind(message.read_at)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        sqlx::query_as::<_, MessageRow>(&format!("{SELECT_MESSAGE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Message::try_from)
            .transpose()
    }

    async fn list_messages_for(
        &self,
        user_id: &str,
        counterpart: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = match counterpart {
            Some(other) => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    "{SELECT_MESSAGE} WHERE (sender_id = $1 AND receiver_id = $2) \
                     OR (sender_id = $2 AND receiver_id = $1) \
                     ORDER BY created_at DESC, id DESC LIMIT $3"
                ))
                .bind(user_id)
                .bind(other)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    "{SELECT_MESSAGE} WHERE sender_id = $1 OR receiver_id = $1 \
                     ORDER BY created_at DESC, id DESC LIMIT $2"
                ))
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn list_messages_involving(
        &self,
        user_ids: &[String],
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "{SELECT_MESSAGE} WHERE sender_id = ANY($1) OR receiver_id = ANY($1) \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(user_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn mark_messages_read(
        &self,
        receiver_id: &str,
        counterpart: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match counterpart {
            Some(other) => {
                sqlx::query(
                    "UPDATE messages SET is_read = TRUE, read_at = $3 \
                     WHERE receiver_id = $1 AND sender_id = $2 \
                     AND status = 'approved' AND NOT is_read",
                )
                .bind(receiver_id)
                .bind(other)
                .bind(at)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE messages SET is_read = TRUE, read_at = $2 \
                     WHERE receiver_id = $1 AND status = 'approved' AND NOT is_read",
                )
                .bind(receiver_id)
                .bind(at)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn update_message_review(
        &self,
        id: &str,
        status: ContentStatus,
        moderated_by: &str,
        moderated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE messages SET status = $2, moderated_by = $3, moderated_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(moderated_by)
        .bind(moderated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_change_request(&self, r: &ProfileChangeRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO profile_change_requests (id, kid_id, parent_id, changes, \
             current_profile, status, reviewed_by, reviewed_at, rejection_reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&r.id)
        .bind(&r.kid_id)
        .bind(&r.parent_id)
        .bind(Json(&r.changes))
        .bind(Json(&r.current_profile))
        .bind(r.status.as_str())
        .bind(&r.reviewed_by)
        .bind(r.reviewed_at)
        .bind(&r.rejection_reason)
        .bind(r.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_change_request(
        &self,
        id: &str,
    ) -> Result<Option<ProfileChangeRequest>, StoreError> {
        sqlx::query_as::<_, ChangeRequestRow>(&format!("{SELECT_CHANGE_REQUEST} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ProfileChangeRequest::try_from)
            .transpose()
    }

    async fn find_pending_change_request_for(
        &self,
        kid_id: &str,
    ) -> Result<Option<ProfileChangeRequest>, StoreError> {
        sqlx::query_as::<_, ChangeRequestRow>(&format!(
            "{SELECT_CHANGE_REQUEST} WHERE kid_id = $1 AND status = 'pending' LIMIT 1"
        ))
        .bind(kid_id)
        .fetch_optional(&self.pool)
        .await?
        .map(ProfileChangeRequest::try_from)
        .transpose()
    }

    async fn list_pending_change_requests(
        &self,
        parent_id: &str,
    ) -> Result<Vec<ProfileChangeRequest>, StoreError> {
        let rows = sqlx::query_as::<_, ChangeRequestRow>(&format!(
            "{SELECT_CHANGE_REQUEST} WHERE parent_id = $1 AND status = 'pending' \
             ORDER BY created_at DESC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProfileChangeRequest::try_from).collect()
    }

    async fn update_change_request_review(
        &self,
        id: &str,
        status: ContentStatus,
        reviewed_by: &str,
        reviewed_at: DateTime<Utc>,
        rejection_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE profile_change_requests SET status = $2, reviewed_by = $3, \
             reviewed_at = $4, rejection_reason = $5 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reviewed_by)
        .bind(reviewed_at)
        .bind(rejection_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_school_code(&self, code: &SchoolCode) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO school_codes (id, code, school_name, grade, assigned_to, used_at, \
             expires_at, is_active, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&code.id)
        .bind(&code.code)
        .bind(&code.school_name)
        .bind(&code.grade)
        .bind(&code.assigned_to)
        .bind(code.used_at)
        .bind(code.expires_at)
        .bind(code.is_active)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_school_code(&self, code: &str) -> Result<Option<SchoolCode>, StoreError> {
        Ok(sqlx::query_as::<_, SchoolCode>(
            "SELECT id, code, school_name, grade, assigned_to, used_at, expires_at, is_active, \
             created_at FROM school_codes WHERE code = $1 AND is_active",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn claim_school_code(
        &self,
        id: &str,
        kid_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE school_codes SET assigned_to = $2, used_at = $3 \
             WHERE id = $1 AND assigned_to IS NULL",
        )
        .bind(id)
        .bind(kid_id)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn upsert_login_code(&self, code: &LoginCode) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO login_codes (child_id, parent_id, code, expires_at, used, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (child_id) DO UPDATE \
             SET parent_id = EXCLUDED.parent_id, code = EXCLUDED.code, \
                 expires_at = EXCLUDED.expires_at, used = EXCLUDED.used, \
                 created_at = EXCLUDED.created_at",
        )
        .bind(&code.child_id)
        .bind(&code.parent_id)
        .bind(&code.code)
        .bind(code.expires_at)
        .bind(code.used)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_login_code(&self, code: &str) -> Result<Option<LoginCode>, StoreError> {
        Ok(sqlx::query_as::<_, LoginCode>(
            "SELECT code, child_id, parent_id, expires_at, used, created_at \
             FROM login_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_login_code_for(&self, child_id: &str) -> Result<Option<LoginCode>, StoreError> {
        Ok(sqlx::query_as::<_, LoginCode>(
            "SELECT code, child_id, parent_id, expires_at, used, created_at \
             FROM login_codes WHERE child_id = $1",
        )
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn consume_login_code(&self, code: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query("UPDATE login_codes SET used = TRUE WHERE code = $1 AND NOT used")
            .bind(code)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn purge_user_data(&self, user_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM reactions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM comments WHERE author_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM posts WHERE author_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE sender_id = $1 OR receiver_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM friendships WHERE user_id = $1 OR friend_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM friend_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM profile_change_requests WHERE kid_id = $1 OR parent_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM parent_children WHERE parent_id = $1 OR child_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM login_codes WHERE child_id = $1 OR parent_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
