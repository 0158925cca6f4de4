//! Cryptographic logics.

use std::sync::Arc;

use argon2::password_hash::{
    Error as PhcError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;

const ID_LENGTH: usize = 12;
const DUMMY_PASSWORD_LENGTH: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    /// The stored credential cannot be parsed: configuration or data
    /// corruption, never a wrong password.
    #[error("stored credential is malformed: {0}")]
    MalformedHash(String),
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Cryptographic manager.
///
/// Argon2 is CPU bound; the async methods move the work onto the blocking
/// pool so request tasks never stall the runtime.
pub struct Crypto {
    pub pwd: PasswordManager,
}

impl Crypto {
    /// Create a new [`Crypto`].
    pub fn new(config: &ArgonConfig) -> Result<Self> {
        Ok(Self {
            pwd: PasswordManager::new(config)?,
        })
    }

    /// Hash `password` off the async runtime.
    pub async fn hash(self: &Arc<Self>, password: String) -> Result<String> {
        let crypto = Arc::clone(self);
        tokio::task::spawn_blocking(move || crypto.pwd.hash_password(password)).await?
    }

    /// Verify `password` off the async runtime.
    ///
    /// Without a stored credential (unknown account) the password is still
    /// checked against a throwaway hash and `false` is returned, so both
    /// outcomes cost the same.
    pub async fn verify(self: &Arc<Self>, password: String, phc: Option<String>) -> Result<bool> {
        let crypto = Arc::clone(self);
        tokio::task::spawn_blocking(move || match phc {
            Some(phc) => crypto.pwd.verify_password(password, &phc),
            None => {
                crypto.pwd.verify_password(password, &crypto.pwd.dummy)?;
                Ok(false)
            },
        })
        .await?
    }
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
    dummy: String,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: &ArgonConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let mut manager = Self {
            params,
            dummy: String::default(),
        };
        manager.dummy =
            manager.hash_password(Alphanumeric.sample_string(&mut OsRng, DUMMY_PASSWORD_LENGTH))?;

        Ok(manager)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a fresh random salt.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// A mismatch is `Ok(false)`. Only an unparsable or unsupported stored
    /// value is an error. Digest comparison is constant time.
    pub fn verify_password(&self, password: impl AsRef<[u8]>, phc_hash: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(phc_hash).map_err(|e| CryptoError::MalformedHash(e.to_string()))?;

        match self.argon2().verify_password(password.as_ref(), &parsed) {
            Ok(()) => Ok(true),
            Err(PhcError::Password) => Ok(false),
            Err(err) => Err(CryptoError::MalformedHash(err.to_string())),
        }
    }
}

/// Random 96-bit identifier, hex encoded.
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Random alphanumeric string.
pub fn random_string(length: usize) -> String {
    Alphanumeric.sample_string(&mut OsRng, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PasswordManager {
        PasswordManager::new(&ArgonConfig::testing()).unwrap()
    }

    #[test]
    fn test_hash_then_verify() {
        let pwd = manager();
        let hash = pwd.hash_password("password123").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(pwd.verify_password("password123", &hash).unwrap());
        assert!(!pwd.verify_password("password124", &hash).unwrap());
    }

    #[test]
    fn test_salt_is_random() {
        let pwd = manager();
        let first = pwd.hash_password("password123").unwrap();
        let second = pwd.hash_password("password123").unwrap();

        assert_ne!(first, second);
        assert!(pwd.verify_password("password123", &first).unwrap());
        assert!(pwd.verify_password("password123", &second).unwrap());
    }

    #[test]
    fn test_malformed_hash() {
        let pwd = manager();

        assert!(matches!(
            pwd.verify_password("password123", "not-a-phc-string"),
            Err(CryptoError::MalformedHash(_))
        ));
        assert!(matches!(
            pwd.verify_password("password123", ""),
            Err(CryptoError::MalformedHash(_))
        ));
    }

    #[test]
    fn test_generate_id() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_id());
    }

    #[tokio::test]
    async fn test_async_verify_without_credential() {
        let crypto = Arc::new(Crypto::new(&ArgonConfig::testing()).unwrap());
        let hash = crypto.hash("password123".into()).await.unwrap();

        assert!(crypto.verify("password123".into(), Some(hash)).await.unwrap());
        assert!(!crypto.verify("password123".into(), None).await.unwrap());
    }
}
