//! Blog posts.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::crypto::generate_id;
use crate::policy::Owned;
use crate::user::User;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9 -]").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("valid regex"));

/// Post as saved on database.
///
/// Clients get it through [`PostView`], which replaces the owner id with the
/// author's public profile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    /// Id of the user who created the post.
    #[serde(skip_serializing)]
    pub owner_id: String,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub slug: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public profile of a post's author.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl From<&User> for Author {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

/// Post as returned to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    /// `null` when the owner no longer exists.
    pub author: Option<Author>,
}

impl PostView {
    /// Pair `post` with its owner, looked up among `users`.
    pub fn new(post: Post, users: &[User]) -> Self {
        let author = users.iter().find(|user| user.id == post.owner_id).map(Author::from);
        Self { post, author }
    }
}

/// Fields a caller may change on an existing [`Post`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    /// `Some(None)` clears the category.
    pub category: Option<Option<String>>,
    pub published: Option<bool>,
}

impl Post {
    /// Create a new post owned by `owner_id`.
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        category: Option<String>,
        published: bool,
    ) -> Self {
        let title = title.into();
        let now = Utc::now();

        Self {
            id: generate_id(),
            owner_id: owner_id.into(),
            slug: slugify(&title),
            title,
            content: content.into(),
            category,
            published,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply only the provided fields. The slug follows the title.
    pub fn apply(&mut self, changes: PostChanges) {
        if let Some(title) = changes.title {
            if title != self.title {
                self.slug = slugify(&title);
                self.title = title;
            }
        }
        if let Some(content) = changes.content {
            self.content = content;
        }
        if let Some(category) = changes.category {
            self.category = category;
        }
        if let Some(published) = changes.published {
            self.published = published;
        }
        self.updated_at = Utc::now();
    }

    /// Whether `viewer` may read this post.
    pub fn visible_to(&self, viewer: Option<&str>) -> bool {
        self.published || viewer == Some(self.owner_id.as_str())
    }
}

impl Owned for Post {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

/// URL-friendly version of a title.
pub fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    let stripped = UNSAFE_CHARS.replace_all(&lower, "");
    let dashed = WHITESPACE.replace_all(&stripped, "-");
    DASHES.replace_all(&dashed, "-").into_owned()
}
