//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::error::{AuthFailure, Result};
use crate::token::{Identity, TokenError, TokenManager};

const BEARER: &str = "bearer";

/// Resolve the caller from the `Authorization` header.
///
/// Only `Bearer <token>` is accepted; the scheme is case-insensitive.
pub fn authenticate(headers: &HeaderMap, tokens: &TokenManager) -> std::result::Result<Identity, AuthFailure> {
    let outcome = bearer(headers).and_then(|token| {
        tokens.verify(token).map_err(|err| {
            if let TokenError::Invalid { reason } = err {
                tracing::debug!(reason, "token rejected");
            }
            AuthFailure::InvalidToken
        })
    });

    if let Err(failure) = &outcome {
        metrics::counter!("auth_rejections_total", "reason" => failure.reason()).increment(1);
    }
    outcome
}

fn bearer(headers: &HeaderMap) -> std::result::Result<&str, AuthFailure> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthFailure::MissingToken)?
        .to_str()
        .map_err(|_| AuthFailure::MalformedHeader)?
        .trim();

    if value.is_empty() {
        return Err(AuthFailure::MissingToken);
    }

    let (scheme, token) = value.split_once(' ').ok_or(AuthFailure::MalformedHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case(BEARER) || token.is_empty() {
        return Err(AuthFailure::MalformedHeader);
    }

    Ok(token)
}

/// Middleware rejecting anonymous requests.
///
/// The verified [`Identity`] is stored in the request extensions.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response> {
    let identity = authenticate(req.headers(), &state.token)?;
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
