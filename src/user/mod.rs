mod builder;

pub use builder::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::Identity;

/// User as saved on database.
///
/// `password` holds the Argon2 PHC string and is never serialized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Claims to embed in a token for this user.
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id.clone(),
            email: self.email.clone(),
        }
    }
}

/// Informative role. Authorization only ever compares owners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}
