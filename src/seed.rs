//! Sample data for development instances.

use std::sync::Arc;

use crate::config::Environment;
use crate::crypto::Crypto;
use crate::error::Result;
use crate::post::Post;
use crate::repository::Repository;
use crate::user::{Role, User};

const USERS: &[(&str, &str, &str, Role)] = &[
    ("admin", "admin@example.com", "admin123", Role::Admin),
    ("johndoe", "john@example.com", "password123", Role::User),
    ("janedoe", "jane@example.com", "password123", Role::User),
];

const POSTS: &[(&str, &str, bool)] = &[
    (
        "Welcome to Our Blog",
        "This is the first post in our amazing blog. We are excited to share our thoughts and experiences with you.",
        true,
    ),
    (
        "Getting Started with MERN Stack",
        "The MERN stack is a powerful combination of technologies for building modern web applications. In this post, we will explore the basics.",
        true,
    ),
    (
        "The Importance of Testing",
        "Testing is crucial for building reliable applications. Learn how to implement comprehensive testing strategies in your projects.",
        false,
    ),
];

/// Fill an empty development store with a few users and posts.
///
/// Returns whether anything was written.
pub async fn populate(environment: Environment, crypto: &Arc<Crypto>, repo: &dyn Repository) -> Result<bool> {
    if environment != Environment::Development {
        return Ok(false);
    }

    if repo.count_users().await? > 0 || repo.count_posts().await? > 0 {
        tracing::info!("sample data already exists, skipping");
        return Ok(false);
    }

    let mut users = Vec::with_capacity(USERS.len());
    for (username, email, password, role) in USERS {
        let user: User = User::builder()
            .username(*username)
            .email(*email)
            .password(password)
            .role(*role)
            .create(crypto, repo)
            .await?;
        users.push(user);
    }

    for ((title, content, published), author) in POSTS.iter().zip(&users) {
        let post = Post::new(author.id.clone(), *title, *content, None, *published);
        repo.save_post(&post).await?;
    }

    tracing::info!(users = users.len(), posts = POSTS.len(), "sample data created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::PostQuery;
    use crate::test_state;

    #[tokio::test]
    async fn test_populate_once() {
        let state = test_state().await;
        let repo = state.repo.as_ref();

        assert!(populate(Environment::Development, &state.crypto, repo).await.unwrap());
        assert!(!populate(Environment::Development, &state.crypto, repo).await.unwrap());

        assert_eq!(repo.count_users().await.unwrap(), 3);
        assert_eq!(repo.count_posts().await.unwrap(), 3);
        assert_eq!(repo.list_posts(&PostQuery::default()).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_only_in_development() {
        let state = test_state().await;

        assert!(!populate(Environment::Production, &state.crypto, state.repo.as_ref()).await.unwrap());
        assert_eq!(state.repo.count_users().await.unwrap(), 0);
    }
}
