//! Registration, login and session routes.

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use validator::Validate;

use crate::AppState;
use crate::error::{AuthFailure, Result, ServerError};
use crate::repository::UserFilter;
use crate::router::{Valid, trimmed};
use crate::token::Identity;
use crate::user::User;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RegisterBody {
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(length(min = 3, message = "Username is required and must be at least 3 characters long"))]
    pub username: String,
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(email(message = "Valid email is required"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 6, message = "Password is required and must be at least 6 characters long"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LoginBody {
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(length(min = 1, message = "Email and password are required"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Email and password are required"))]
    pub password: String,
}

/// Authenticated session returned on register and login.
#[derive(Debug, Serialize)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Handler to create a user.
pub async fn register(
    State(state): State<AppState>,
    Valid(body): Valid<RegisterBody>,
) -> Result<(StatusCode, Json<Session>)> {
    let email = body.email.to_lowercase();

    let filter = UserFilter::EmailOrUsername {
        email: email.clone(),
        username: body.username.clone(),
    };
    if let Some(existing) = state.repo.find_user(&filter).await? {
        let message = if existing.email == email {
            "Email already registered"
        } else {
            "Username already taken"
        };
        return Err(ServerError::Conflict(message.to_owned()));
    }

    let user = User::builder()
        .username(body.username)
        .email(email)
        .password(body.password)
        .create(&state.crypto, state.repo.as_ref())
        .await?;
    let token = state.token.issue(&user.identity())?;

    tracing::info!(user_id = %user.id, "user registered");

    Ok((StatusCode::CREATED, Json(Session { user, token })))
}

/// Handler to exchange credentials for a token.
///
/// Unknown email and wrong password answer the same way, after the same
/// amount of hashing work.
pub async fn login(State(state): State<AppState>, Valid(body): Valid<LoginBody>) -> Result<Json<Session>> {
    let user = state
        .repo
        .find_user(&UserFilter::Email(body.email.to_lowercase()))
        .await?;

    let stored = user.as_ref().map(|user| user.password.clone());
    let valid = state.crypto.verify(body.password, stored).await?;

    match user {
        Some(user) if valid => {
            let token = state.token.issue(&user.identity())?;
            tracing::info!(user_id = %user.id, "user logged in");

            Ok(Json(Session { user, token }))
        },
        _ => {
            let failure = AuthFailure::InvalidCredentials;
            metrics::counter!("auth_rejections_total", "reason" => failure.reason()).increment(1);
            tracing::debug!("login rejected");

            Err(failure.into())
        },
    }
}

/// Tokens are stateless: logging out only leaves a trace.
pub async fn logout(Extension(identity): Extension<Identity>) -> Json<Value> {
    tracing::info!(user_id = %identity.user_id, "user logged out");
    Json(json!({ "message": "Logged out successfully" }))
}

/// Handler to get the profile behind the token.
pub async fn me(State(state): State<AppState>, Extension(identity): Extension<Identity>) -> Result<Json<Value>> {
    let user = state
        .repo
        .find_user(&UserFilter::Id(identity.user_id))
        .await?
        .ok_or(ServerError::NotFound("User"))?;

    Ok(Json(json!({ "user": user })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::*;

    #[tokio::test]
    async fn test_register() {
        let state = test_state().await;
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/auth/register",
            None,
            json!({"username": "alice", "email": "a@x.com", "password": "password123"}).to_string(),
        )
        .await;
        let (status, body) = into_json(response).await;

        assert_eq!(status, StatusCode::CREATED);
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
        assert_eq!(body["user"]["username"], "alice");
        assert_eq!(body["user"]["email"], "a@x.com");
        assert!(body["user"].get("password").is_none());
        assert!(!body.to_string().contains("argon2"));

        let identity = state.token.verify(body["token"].as_str().unwrap()).unwrap();
        assert_eq!(identity.email, "a@x.com");
        assert_eq!(body["user"]["id"], identity.user_id.as_str());
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let state = test_state().await;
        signup(&state, "alice", "a@x.com").await;

        let cases = [
            (json!({"username": "bob", "email": "A@x.com", "password": "password123"}), "Email already registered"),
            (json!({"username": "alice", "email": "b@x.com", "password": "password123"}), "Username already taken"),
        ];
        for (body, message) in cases {
            let response = make_request(app(state.clone()), Method::POST, "/auth/register", None, body.to_string()).await;
            let (status, body) = into_json(response).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], message);
        }
    }

    #[tokio::test]
    async fn test_register_validation() {
        let state = test_state().await;

        let cases = [
            (
                json!({"username": "al", "email": "a@x.com", "password": "password123"}),
                "Username is required and must be at least 3 characters long",
            ),
            (json!({"username": "alice", "email": "nope", "password": "password123"}), "Valid email is required"),
            (
                json!({"username": "alice", "email": "a@x.com", "password": "12345"}),
                "Password is required and must be at least 6 characters long",
            ),
        ];
        for (body, message) in cases {
            let response = make_request(app(state.clone()), Method::POST, "/auth/register", None, body.to_string()).await;
            let (status, body) = into_json(response).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], message);
        }
        assert_eq!(state.repo.count_users().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_login() {
        let state = test_state().await;
        let (id, _) = signup(&state, "alice", "a@x.com").await;

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/auth/login",
            None,
            json!({"email": "A@X.com", "password": "password123"}).to_string(),
        )
        .await;
        let (status, body) = into_json(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], id.as_str());
        assert!(body["user"].get("password").is_none());
        assert_eq!(state.token.verify(body["token"].as_str().unwrap()).unwrap().user_id, id);
    }

    #[tokio::test]
    async fn test_login_does_not_enumerate_users() {
        let state = test_state().await;
        signup(&state, "alice", "a@x.com").await;

        let mut bodies = Vec::new();
        for credentials in [
            json!({"email": "a@x.com", "password": "wrong-password"}),
            json!({"email": "nobody@x.com", "password": "password123"}),
        ] {
            let response = make_request(app(state.clone()), Method::POST, "/auth/login", None, credentials.to_string()).await;
            let (status, body) = into_json(response).await;

            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"], "Invalid credentials");
            bodies.push(body);
        }
        assert_eq!(bodies[0], bodies[1]);
    }

    #[tokio::test]
    async fn test_login_requires_fields() {
        let state = test_state().await;

        let response = make_request(
            app(state),
            Method::POST,
            "/auth/login",
            None,
            json!({"email": "a@x.com"}).to_string(),
        )
        .await;
        let (status, body) = into_json(response).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Email and password are required");
    }

    #[tokio::test]
    async fn test_me_and_logout() {
        let state = test_state().await;
        let (id, token) = signup(&state, "alice", "a@x.com").await;

        let response = make_request(app(state.clone()), Method::GET, "/auth/me", Some(&token), String::default()).await;
        let (status, body) = into_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], id.as_str());
        assert_eq!(body["user"]["role"], "user");

        let response = make_request(app(state.clone()), Method::POST, "/auth/logout", Some(&token), String::default()).await;
        let (status, body) = into_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logged out successfully");

        // Stateless tokens outlive a logout.
        let response = make_request(app(state), Method::GET, "/auth/me", Some(&token), String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_reject() {
        let state = test_state().await;
        let (_, token) = signup(&state, "alice", "a@x.com").await;
        let expired = state
            .token
            .issue_with_ttl(
                &state.token.verify(&token).unwrap(),
                chrono::TimeDelta::seconds(-1),
            )
            .unwrap();

        let response = make_request(app(state.clone()), Method::GET, "/auth/me", None, String::default()).await;
        let (status, body) = into_json(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing token");

        let response = make_request(app(state.clone()), Method::GET, "/auth/me", Some(&expired), String::default()).await;
        let (status, body) = into_json(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid or expired token");

        let response = make_raw_request(app(state), Method::POST, "/auth/logout", Some(&format!("Token {token}"))).await;
        let (status, body) = into_json(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid authorization header");
    }
}
