//! In-process backend, used by tests and by `driver: memory`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ConnectionManager, Connector};
use crate::post::Post;
use crate::repository::{Page, PostQuery, Repository, Result, StorageError, UserFilter};
use crate::user::User;

/// Data kept by the memory backend. Survives reconnections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    posts: RwLock<HashMap<String, Post>>,
}

/// Hands out the same [`MemoryStore`] on every open.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = Arc<MemoryStore>;

    async fn open(&self) -> Result<Arc<MemoryStore>> {
        Ok(Arc::clone(&self.store))
    }

    async fn ping(&self, _store: &Arc<MemoryStore>) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _store: Arc<MemoryStore>) {}

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}

/// [`Repository`] kept in process memory.
pub struct MemoryRepository {
    manager: Arc<ConnectionManager<MemoryConnector>>,
}

impl MemoryRepository {
    pub fn new(manager: Arc<ConnectionManager<MemoryConnector>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_user(&self, filter: &UserFilter) -> Result<Option<User>> {
        let store = self.manager.connection()?;
        let users = store.users.read();
        Ok(users.values().find(|user| filter.matches(user)).cloned())
    }

    async fn find_users(&self, ids: &[String]) -> Result<Vec<User>> {
        let store = self.manager.connection()?;
        let users = store.users.read();
        Ok(ids.iter().filter_map(|id| users.get(id)).cloned().collect())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let store = self.manager.connection()?;
        let mut users = store.users.write();

        for other in users.values().filter(|other| other.id != user.id) {
            if other.email == user.email {
                return Err(StorageError::Duplicate("email"));
            }
            if other.username == user.username {
                return Err(StorageError::Duplicate("username"));
            }
        }

        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn count_users(&self) -> Result<u64> {
        let store = self.manager.connection()?;
        Ok(store.users.read().len() as u64)
    }

    async fn find_post(&self, id: &str) -> Result<Option<Post>> {
        let store = self.manager.connection()?;
        Ok(store.posts.read().get(id).cloned())
    }

    async fn save_post(&self, post: &Post) -> Result<()> {
        let store = self.manager.connection()?;
        store.posts.write().insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn delete_post(&self, id: &str) -> Result<bool> {
        let store = self.manager.connection()?;
        Ok(store.posts.write().remove(id).is_some())
    }

    async fn list_posts(&self, query: &PostQuery) -> Result<Page<Post>> {
        let store = self.manager.connection()?;

        let mut matching: Vec<Post> = store
            .posts
            .read()
            .values()
            .filter(|post| query.matches(post))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.limit as usize)
            .collect();

        Ok(Page { items, total })
    }

    async fn count_posts(&self) -> Result<u64> {
        let store = self.manager.connection()?;
        Ok(store.posts.read().len() as u64)
    }
}
