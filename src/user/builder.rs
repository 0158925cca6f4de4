//! Typed builder for User.

use std::sync::Arc;

use chrono::Utc;

use crate::crypto::{Crypto, generate_id};
use crate::error::Result;
use crate::repository::Repository;
use crate::user::{Role, User};

/// [`User`] builder.
#[derive(Debug, Clone)]
pub struct UserBuilder<Username, Email> {
    username: Username,
    email: Email,
    password: String,
    role: Role,
}

/// Value is missing on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Missing;

/// Value is present on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Present<T>(pub T);

impl Default for UserBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl UserBuilder<Missing, Missing> {
    /// Create a new [`UserBuilder`].
    pub fn new() -> Self {
        Self {
            username: Missing,
            email: Missing,
            password: String::default(),
            role: Role::default(),
        }
    }
}

impl User {
    /// Start building a new [`User`].
    pub fn builder() -> UserBuilder<Missing, Missing> {
        UserBuilder::new()
    }
}

impl<Email> UserBuilder<Missing, Email> {
    /// Update `username` field on [`UserBuilder`].
    pub fn username(self, username: impl Into<String>) -> UserBuilder<Present<String>, Email> {
        UserBuilder {
            username: Present(username.into()),
            email: self.email,
            password: self.password,
            role: self.role,
        }
    }
}

impl<Username> UserBuilder<Username, Missing> {
    /// Update `email` field on [`UserBuilder`].
    pub fn email(self, email: impl Into<String>) -> UserBuilder<Username, Present<String>> {
        UserBuilder {
            username: self.username,
            email: Present(email.into().to_lowercase()),
            password: self.password,
            role: self.role,
        }
    }
}

impl<Username, Email> UserBuilder<Username, Email> {
    /// Update plaintext `password` on [`UserBuilder`].
    pub fn password(mut self, password: impl ToString) -> Self {
        self.password = password.to_string();
        self
    }

    /// Update `role` field on [`UserBuilder`].
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

impl UserBuilder<Present<String>, Present<String>> {
    /// Hash the password, assign an id and persist the [`User`].
    ///
    /// Uniqueness of `username` and `email` is left to the repository.
    pub async fn create(self, crypto: &Arc<Crypto>, repo: &dyn Repository) -> Result<User> {
        let user = User {
            id: generate_id(),
            username: self.username.0,
            email: self.email.0,
            password: crypto.hash(self.password).await?,
            role: self.role,
            created_at: Utc::now(),
        };

        repo.save_user(&user).await?;
        Ok(user)
    }
}
