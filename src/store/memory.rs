use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{
    Comment, ContentStatus, Friendship, FriendshipStatus, FriendCode, LoginCode, Message,
    MonitoringLevel, ParentConnection, Post, Profile, ProfileChangeRequest, Reaction, SchoolCode,
    User, UserType, Verification,
};

use super::{Store, StoreError};

/// In-memory store.  One writer lock over the whole state gives every
/// multi-row operation the atomicity the Postgres store gets from
/// constraints and conditional updates.  Used by tests and by local runs
/// without DATABASE_URL.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    friendships: HashMap<(String, String), Friendship>,
    friend_codes: HashMap<String, FriendCode>,
    parent_children: Vec<(String, String)>,
    parent_connections: Vec<(String, String, DateTime<Utc>)>,
    posts: HashMap<String, Post>,
    reactions: HashMap<(String, String), Reaction>,
    comments: Vec<Comment>,
    messages: HashMap<String, Message>,
    change_requests: HashMap<String, ProfileChangeRequest>,
    school_codes: HashMap<String, SchoolCode>,
    login_codes: HashMap<String, LoginCode>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

/// Canonical unordered pair for parent connections.
fn unordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_lowercase();
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_profile(&self, id: &str, profile: &Profile) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(id) {
            user.profile = profile.clone();
        }
        Ok(())
    }

    async fn update_verification(&self, id: &str, v: &Verification) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(id) {
            user.verification = v.clone();
        }
        Ok(())
    }

    async fn set_parent_account(&self, child_id: &str, parent_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(child_id) {
            user.parent_account = Some(parent_id.to_string());
        }
        Ok(())
    }

    async fn set_monitoring_level(
        &self,
        id: &str,
        level: MonitoringLevel,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(id) {
            user.monitoring_level = level;
        }
        Ok(())
    }

    async fn set_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn deactivate_user(&self, id: &str, tombstone: &Profile) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(id) {
            user.is_active = false;
            user.profile = tombstone.clone();
        }
        Ok(())
    }

    async fn search_users(
        &self,
        user_type: UserType,
        exclude: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<User>, StoreError> {
        let needle = query.to_lowercase();
        let inner = self.inner.read().await;
        let mut hits: Vec<User> = inner
            .users
            .values()
            .filter(|u| u.user_type == user_type && u.is_active && u.id != exclude)
            .filter(|u| {
                [
                    &u.profile.display_name,
                    &u.profile.first_name,
                    &u.profile.last_name,
                ]
                .into_iter()
                .flatten()
                .any(|name| name.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn upsert_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
        status: FriendshipStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = pair_key(user_id, friend_id);
        match inner.friendships.get_mut(&key) {
            Some(edge) => edge.status = status,
            None => {
                inner.friendships.insert(
                    key,
                    Friendship {
                        user_id: user_id.to_string(),
                        friend_id: friend_id.to_string(),
                        status,
                        created_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn find_friendship(
        &self,
        user_id: &str,
        friend_id: &str,
    ) -> Result<Option<Friendship>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .friendships
            .get(&pair_key(user_id, friend_id))
            .cloned())
    }

    async fn list_friend_ids(
        &self,
        user_id: &str,
        status: FriendshipStatus,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner
            .friendships
            .values()
            .filter(|f| f.user_id == user_id && f.status == status)
            .map(|f| f.friend_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_friendships_of(&self, user_id: &str) -> Result<Vec<Friendship>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .friendships
            .values()
            .filter(|f| f.user_id == user_id || f.friend_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_friend_code_for(&self, user_id: &str) -> Result<Option<FriendCode>, StoreError> {
        Ok(self.inner.read().await.friend_codes.get(user_id).cloned())
    }

    async fn find_friend_code(&self, code: &str) -> Result<Option<FriendCode>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .friend_codes
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn upsert_friend_code(&self, code: &FriendCode) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.friend_codes.insert(code.user_id.clone(), code.clone());
        Ok(())
    }

    async fn upsert_parent_child(&self, parent_id: &str, child_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let link = (parent_id.to_string(), child_id.to_string());
        if !inner.parent_children.contains(&link) {
            inner.parent_children.push(link);
        }
        Ok(())
    }

    async fn list_child_ids(&self, parent_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .parent_children
            .iter()
            .filter(|(p, _)| p == parent_id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn is_parent_of(&self, parent_id: &str, child_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .parent_children
            .iter()
            .any(|(p, c)| p == parent_id && c == child_id))
    }

    async fn upsert_parent_connection(&self, a: &str, b: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let (x, y) = unordered(a, b);
        if !inner
            .parent_connections
            .iter()
            .any(|(p, q, _)| *p == x && *q == y)
        {
            inner.parent_connections.push((x, y, Utc::now()));
        }
        Ok(())
    }

    async fn list_parent_connections(
        &self,
        parent_id: &str,
    ) -> Result<Vec<ParentConnection>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .parent_connections
            .iter()
            .filter_map(|(a, b, at)| {
                if a == parent_id {
                    Some(ParentConnection {
                        parent_id: b.clone(),
                        connected_at: *at,
                    })
                } else if b == parent_id {
                    Some(ParentConnection {
                        parent_id: a.clone(),
                        connected_at: *at,
                    })
                } else {
                    None
                }
            })
            .collect())
    }

    async fn insert_post(&self, post: &Post) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.posts.insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn find_post(&self, id: &str) -> Result<Option<Post>, StoreError> {
        Ok(self.inner.read().await.posts.get(id).cloned())
    }

    async fn update_post_review(
        &self,
        id: &str,
        status: ContentStatus,
        moderated_by: &str,
        moderated_at: DateTime<Utc>,
        rejection_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(post) = inner.posts.get_mut(id) {
            post.status = status;
            post.moderated_by = Some(moderated_by.to_string());
            post.moderated_at = Some(moderated_at);
            post.rejection_reason = rejection_reason.map(|r| r.to_string());
        }
        Ok(())
    }

    async fn list_posts_by_authors(
        &self,
        author_ids: &[String],
        status: ContentStatus,
        limit: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let inner = self.inner.read().await;
        let mut posts: Vec<Post> = inner
            .posts
            .values()
            .filter(|p| p.status == status && author_ids.contains(&p.author_id))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts.truncate(limit as usize);
        Ok(posts)
    }

    async fn list_posts_by_author(&self, author_id: &str) -> Result<Vec<Post>, StoreError> {
        let inner = self.inner.read().await;
        let mut posts: Vec<Post> = inner
            .posts
            .values()
            .filter(|p| p.author_id == author_id)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = pair_key(post_id, user_id);
        if inner.reactions.remove(&key).is_some() {
            Ok(false)
        } else {
            inner.reactions.insert(
                key,
                Reaction {
                    post_id: post_id.to_string(),
                    user_id: user_id.to_string(),
                    created_at: Utc::now(),
                },
            );
            Ok(true)
        }
    }

    async fn list_likes(&self, post_ids: &[String]) -> Result<Vec<Reaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .reactions
            .values()
            .filter(|r| post_ids.contains(&r.post_id))
            .cloned()
            .collect())
    }

    async fn list_reactions_by_user(&self, user_id: &str) -> Result<Vec<Reaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .reactions
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.comments.push(comment.clone());
        Ok(())
    }

    async fn list_comments(&self, post_ids: &[String]) -> Result<Vec<Comment>, StoreError> {
        let inner = self.inner.read().await;
        let mut comments: Vec<Comment> = inner
            .comments
            .iter()
            .filter(|c| post_ids.contains(&c.post_id))
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn list_comments_by_author(&self, author_id: &str) -> Result<Vec<Comment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .comments
            .iter()
            .filter(|c| c.author_id == author_id)
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn find_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.read().await.messages.get(id).cloned())
    }

    async fn list_messages_for(
        &self,
        user_id: &str,
        counterpart: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.sender_id == user_id || m.receiver_id == user_id)
            .filter(|m| match counterpart {
                Some(other) => m.sender_id == other || m.receiver_id == other,
                None => true,
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn list_messages_involving(
        &self,
        user_ids: &[String],
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| user_ids.contains(&m.sender_id) || user_ids.contains(&m.receiver_id))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn mark_messages_read(
        &self,
        receiver_id: &str,
        counterpart: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for message in inner.messages.values_mut() {
            if message.receiver_id == receiver_id
                && message.status == ContentStatus::Approved
                && !message.is_read
                && counterpart.is_none_or(|other| message.sender_id == other)
            {
                message.is_read = true;
                message.read_at = Some(at);
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
        let mut inner = self.inner.write().await;
        if let Some(message) = inner.messages.get_mut(id) {
            message.status = status;
            message.moderated_by = Some(moderated_by.to_string());
            message.moderated_at = Some(moderated_at);
        }
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.messages.remove(id);
        Ok(())
    }

    async fn insert_change_request(&self, r: &ProfileChangeRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.change_requests.insert(r.id.clone(), r.clone());
        Ok(())
    }

    async fn find_change_request(
        &self,
        id: &str,
    ) -> Result<Option<ProfileChangeRequest>, StoreError> {
        Ok(self.inner.read().await.change_requests.get(id).cloned())
    }

    async fn find_pending_change_request_for(
        &self,
        kid_id: &str,
    ) -> Result<Option<ProfileChangeRequest>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .change_requests
            .values()
            .find(|r| r.kid_id == kid_id && r.status == ContentStatus::Pending)
            .cloned())
    }

    async fn list_pending_change_requests(
        &self,
        parent_id: &str,
    ) -> Result<Vec<ProfileChangeRequest>, StoreError> {
        let inner = self.inner.read().await;
        let mut requests: Vec<ProfileChangeRequest> = inner
            .change_requests
            .values()
            .filter(|r| r.parent_id == parent_id && r.status == ContentStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn update_change_request_review(
        &self,
        id: &str,
        status: ContentStatus,
        reviewed_by: &str,
        reviewed_at: DateTime<Utc>,
        rejection_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(request) = inner.change_requests.get_mut(id) {
            request.status = status;
            request.reviewed_by = Some(reviewed_by.to_string());
            request.reviewed_at = Some(reviewed_at);
            request.rejection_reason = rejection_reason.map(|r| r.to_string());
        }
        Ok(())
    }

    async fn insert_school_code(&self, code: &SchoolCode) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.school_codes.insert(code.id.clone(), code.clone());
        Ok(())
    }

    async fn find_school_code(&self, code: &str) -> Result<Option<SchoolCode>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .school_codes
            .values()
            .find(|c| c.code == code && c.is_active)
            .cloned())
    }

    async fn claim_school_code(
        &self,
        id: &str,
        kid_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.school_codes.get_mut(id) {
            Some(code) if code.assigned_to.is_none() => {
                code.assigned_to = Some(kid_id.to_string());
                code.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_login_code(&self, code: &LoginCode) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.login_codes.insert(code.child_id.clone(), code.clone());
        Ok(())
    }

    async fn find_login_code(&self, code: &str) -> Result<Option<LoginCode>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .login_codes
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn find_login_code_for(&self, child_id: &str) -> Result<Option<LoginCode>, StoreError> {
        Ok(self.inner.read().await.login_codes.get(child_id).cloned())
    }

    async fn consume_login_code(&self, code: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.login_codes.values_mut().find(|c| c.code == code) {
            Some(entry) if !entry.used => {
                entry.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_user_data(&self, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.posts.retain(|_, p| p.author_id != user_id);
        inner.comments.retain(|c| c.author_id != user_id);
        inner.reactions.retain(|_, r| r.user_id != user_id);
        inner
            .messages
            .retain(|_, m| m.sender_id != user_id && m.receiver_id != user_id);
        inner
            .friendships
            .retain(|_, f| f.user_id != user_id && f.friend_id != user_id);
        inner.friend_codes.remove(user_id);
        inner
            .change_requests
            .retain(|_, r| r.kid_id != user_id && r.parent_id != user_id);
        inner
            .parent_children
            .retain(|(p, c)| p != user_id && c != user_id);
        inner
            .login_codes
            .retain(|_, c| c.child_id != user_id && c.parent_id != user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn friendship_upsert_is_idempotent_on_the_pair() {
        let store = MemoryStore::new();
        store
            .upsert_friendship("a", "b", FriendshipStatus::Pending)
            .await
            .unwrap();
        store
            .upsert_friendship("a", "b", FriendshipStatus::Accepted)
            .await
            .unwrap();

        let edge = store.find_friendship("a", "b").await.unwrap().unwrap();
        assert_eq!(edge.status, FriendshipStatus::Accepted);
        assert_eq!(
            store
                .list_friend_ids("a", FriendshipStatus::Accepted)
                .await
                .unwrap(),
            vec!["b".to_string()]
        );
    }

    #[tokio::test]
    async fn like_toggle_is_involutive() {
        let store = MemoryStore::new();
        assert!(store.toggle_like("p1", "u1").await.unwrap());
        assert!(!store.toggle_like("p1", "u1").await.unwrap());
        assert!(store.list_likes(&["p1".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn school_code_claim_is_single_use() {
        let store = MemoryStore::new();
        let code = SchoolCode {
            id: "sc1".into(),
            code: "ABC234".into(),
            school_name: "Northside".into(),
            grade: "5".into(),
            assigned_to: None,
            used_at: None,
            expires_at: Utc::now() + chrono::Duration::days(30),
            is_active: true,
            created_at: Utc::now(),
        };
        store.insert_school_code(&code).await.unwrap();

        assert!(store.claim_school_code("sc1", "kid-a", Utc::now()).await.unwrap());
        assert!(!store.claim_school_code("sc1", "kid-b", Utc::now()).await.unwrap());

        let claimed = store.find_school_code("ABC234").await.unwrap().unwrap();
        assert_eq!(claimed.assigned_to.as_deref(), Some("kid-a"));
    }

    #[tokio::test]
    async fn parent_connection_pair_is_unordered_and_idempotent() {
        let store = MemoryStore::new();
        store.upsert_parent_connection("p2", "p1").await.unwrap();
        store.upsert_parent_connection("p1", "p2").await.unwrap();

        assert_eq!(store.list_parent_connections("p1").await.unwrap().len(), 1);
        assert_eq!(store.list_parent_connections("p2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_read_skips_pending_messages() {
        let store = MemoryStore::new();
        let mut message = Message {
            id: "m1".into(),
            sender_id: "a".into(),
            receiver_id: "b".into(),
            content: "hi".into(),
            status: ContentStatus::Pending,
            moderated_by: None,
            moderated_at: None,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };
        store.insert_message(&message).await.unwrap();
        message.id = "m2".into();
        message.status = ContentStatus::Approved;
        store.insert_message(&message).await.unwrap();

        store.mark_messages_read("b", None, Utc::now()).await.unwrap();

        let pending = store.find_message("m1").await.unwrap().unwrap();
        let approved = store.find_message("m2").await.unwrap().unwrap();
        assert!(!pending.is_read);
        assert_eq!(pending.status, ContentStatus::Pending);
        assert!(approved.is_read);
    }
}
