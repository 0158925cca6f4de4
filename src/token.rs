//! Manage json web tokens.

use chrono::{TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, Environment, Token as TokenConfig};

const ALGORITHM: Algorithm = Algorithm::HS256;
const EPHEMERAL_SECRET_LENGTH: usize = 64;

/// Token failures.
///
/// Every verification failure collapses into [`TokenError::Invalid`]; the
/// `reason` is only meant for logs.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid or expired token")]
    Invalid { reason: &'static str },
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("token lifetime {0} is out of range")]
    Lifetime(TimeDelta),
}

/// Verified claim set carried by a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub email: String,
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub identity: Identity,
    /// Identifies the time at which the JWT was issued.
    pub iat: i64,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: i64,
}

/// Issue and verify HS256 tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: TimeDelta,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &ALGORITHM)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a new [`TokenManager`] from a raw secret.
    pub fn new(secret: &[u8], ttl: TimeDelta) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Build from configuration.
    ///
    /// Production refuses to start without a secret. Other environments get
    /// a random per-process secret, so their tokens die with the process.
    pub fn from_config(environment: Environment, config: &TokenConfig) -> Result<Self, ConfigError> {
        let ttl = config.ttl()?;

        match config.secret.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(secret) => Ok(Self::new(secret.as_bytes(), ttl)),
            None if environment == Environment::Production => Err(ConfigError::MissingSecret),
            None => {
                tracing::warn!(
                    environment = environment.as_str(),
                    "no token secret configured, using an ephemeral one"
                );
                let secret = crate::crypto::random_string(EPHEMERAL_SECRET_LENGTH);
                Ok(Self::new(secret.as_bytes(), ttl))
            },
        }
    }

    /// Default token lifetime.
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Create a token for `identity` with the default lifetime.
    pub fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_with_ttl(identity, self.ttl)
    }

    /// Create a token for `identity` valid for `ttl`.
    pub fn issue_with_ttl(&self, identity: &Identity, ttl: TimeDelta) -> Result<String, TokenError> {
        let now = Utc::now();
        let exp = now.checked_add_signed(ttl).ok_or(TokenError::Lifetime(ttl))?;
        let claims = Claims {
            identity: identity.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key).map_err(TokenError::Signing)
    }

    /// Decode and check a token.
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        use jsonwebtoken::errors::ErrorKind;

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid {
                reason: match err.kind() {
                    ErrorKind::ExpiredSignature => "expired",
                    ErrorKind::InvalidSignature => "signature mismatch",
                    ErrorKind::InvalidAlgorithm => "algorithm mismatch",
                    ErrorKind::MissingRequiredClaim(_) => "missing claim",
                    _ => "malformed",
                },
            })?
            .claims;

        // jsonwebtoken still accepts `exp == now`.
        if Utc::now().timestamp() >= claims.exp {
            return Err(TokenError::Invalid { reason: "expired" });
        }
        if claims.identity.user_id.is_empty() {
            return Err(TokenError::Invalid { reason: "missing subject" });
        }

        Ok(claims.identity)
    }
}
