//! Error handler for scribe.
//!
//! Every failure travels as a [`ServerError`] until it leaves the router; its
//! [`IntoResponse`] implementation is the only place where a status code and
//! a body are chosen.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::crypto::CryptoError;
use crate::repository::StorageError;
use crate::token::TokenError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Why a request failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("missing token")]
    MissingToken,
    #[error("invalid authorization header")]
    MalformedHeader,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl AuthFailure {
    /// Label used on metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "missing_token",
            AuthFailure::MalformedHeader => "malformed_header",
            AuthFailure::InvalidToken => "invalid_token",
            AuthFailure::InvalidCredentials => "invalid_credentials",
        }
    }
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("error parsing request body")]
    ParsingForm(Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Unauthenticated(#[from] AuthFailure),

    #[error("not authorized to modify this resource")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    error: String,
    status: u16,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `error` message.
    pub fn message(mut self, message: &str) -> Self {
        self.error = message.into();
        self
    }

    /// Attach field errors; the first one becomes the message.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        let errors = parse_validation_errors(errors);
        if let Some(first) = errors.first() {
            self.error = first.message.clone();
        }
        self.errors = Some(errors);
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            error: "Internal server error".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{field} is invalid")),
            })
        })
        .collect::<Vec<_>>();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

fn conflict_message(field: &str) -> String {
    match field {
        "email" => "Email already registered".to_owned(),
        "username" => "Username already taken".to_owned(),
        other => format!("{other} already exists"),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .message(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response.errors(validation_errors),

            ServerError::ParsingForm(err) => response.message(&format!("Invalid request body: {err}")),

            ServerError::Conflict(_) => response,

            ServerError::Storage(StorageError::Duplicate(field)) => {
                response.message(&conflict_message(field))
            },

            ServerError::Unauthenticated(_) | ServerError::Token(TokenError::Invalid { .. }) => {
                response.status(StatusCode::UNAUTHORIZED)
            },

            ServerError::Forbidden => response.status(StatusCode::FORBIDDEN),

            ServerError::NotFound(_) => response.status(StatusCode::NOT_FOUND),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");
                ResponseError::default()
            },

            ServerError::Storage(err) => {
                tracing::error!(error = %err, "storage failure");
                ResponseError::default()
            },

            ServerError::Crypto(err) => {
                tracing::error!(error = %err, "credential processing failure");
                ResponseError::default()
            },

            ServerError::Token(err) => {
                tracing::error!(error = %err, "token issuance failure");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "error": "Internal server error",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use validator::ValidationError;

    use super::*;

    async fn render(err: ServerError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (ServerError::Unauthenticated(AuthFailure::MissingToken), StatusCode::UNAUTHORIZED),
            (ServerError::Forbidden, StatusCode::FORBIDDEN),
            (ServerError::NotFound("Post"), StatusCode::NOT_FOUND),
            (ServerError::Conflict("Email already registered".into()), StatusCode::BAD_REQUEST),
            (ServerError::Storage(StorageError::NotConnected), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ServerError::Internal {
                    details: "boom".into(),
                    source: None,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(render(err).await.0, status);
        }
    }

    #[tokio::test]
    async fn test_messages() {
        let (_, body) = render(AuthFailure::InvalidCredentials.into()).await;
        assert_eq!(body["error"], "Invalid credentials");

        let (_, body) = render(AuthFailure::MissingToken.into()).await;
        assert_eq!(body["error"], "missing token");

        let (_, body) = render(ServerError::NotFound("Post")).await;
        assert_eq!(body["error"], "Post not found");

        let (_, body) = render(StorageError::Duplicate("username").into()).await;
        assert_eq!(body["error"], "Username already taken");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (_, body) = render(ServerError::Internal {
            details: "connection string postgres://user:pwd@db".into(),
            source: None,
        })
        .await;

        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("pwd"));
    }

    #[tokio::test]
    async fn test_validation_body() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "title",
            ValidationError::new("length")
                .with_message("Title is required and must be at least 3 characters long".into()),
        );

        let (status, body) = render(errors.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Title is required and must be at least 3 characters long");
        assert_eq!(body["errors"][0]["field"], "title");
    }
}
