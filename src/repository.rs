//! Storage port used by the handlers.

use async_trait::async_trait;

use crate::post::Post;
use crate::user::User;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage is not connected")]
    NotConnected,
    #[error("storage has been shut down")]
    Terminated,
    /// A unique field already holds this value.
    #[error("duplicate value for `{0}`")]
    Duplicate(&'static str),
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// How to look a user up.
#[derive(Clone, Debug, PartialEq)]
pub enum UserFilter {
    Id(String),
    Email(String),
    /// Matches a user holding either value.
    EmailOrUsername { email: String, username: String },
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        match self {
            UserFilter::Id(id) => &user.id == id,
            UserFilter::Email(email) => &user.email == email,
            UserFilter::EmailOrUsername { email, username } => {
                &user.email == email || &user.username == username
            },
        }
    }
}

/// Listing criteria for posts.
#[derive(Clone, Debug, PartialEq)]
pub struct PostQuery {
    pub category: Option<String>,
    pub author: Option<String>,
    pub published: Option<bool>,
    /// Requesting user; unpublished posts are only listed for their owner.
    pub viewer: Option<String>,
    /// One-based page number.
    pub page: u32,
    pub limit: u32,
}

impl Default for PostQuery {
    fn default() -> Self {
        Self {
            category: None,
            author: None,
            published: None,
            viewer: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PostQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }

    pub fn matches(&self, post: &Post) -> bool {
        self.category.as_ref().is_none_or(|c| post.category.as_ref() == Some(c))
            && self.author.as_ref().is_none_or(|a| &post.owner_id == a)
            && self.published.is_none_or(|p| post.published == p)
            && post.visible_to(self.viewer.as_deref())
    }
}

/// One page of results along with the total match count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Persistence for users and posts.
///
/// Single-document writes are atomic; nothing else is. Concurrent updates to
/// the same post are last-writer-wins.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_user(&self, filter: &UserFilter) -> Result<Option<User>>;
    /// Users holding any of `ids`, in no particular order.
    async fn find_users(&self, ids: &[String]) -> Result<Vec<User>>;
    /// Insert or replace a user. Fails with [`StorageError::Duplicate`] when
    /// another user owns the email or username.
    async fn save_user(&self, user: &User) -> Result<()>;
    async fn count_users(&self) -> Result<u64>;

    async fn find_post(&self, id: &str) -> Result<Option<Post>>;
    /// Insert or replace a post.
    async fn save_post(&self, post: &Post) -> Result<()>;
    /// Returns whether a post was removed.
    async fn delete_post(&self, id: &str) -> Result<bool>;
    /// Newest first.
    async fn list_posts(&self, query: &PostQuery) -> Result<Page<Post>>;
    async fn count_posts(&self) -> Result<u64>;
}
