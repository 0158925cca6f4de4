//! Request pipeline for mutating endpoints.
//!
//! Each stage either hands its result to the next one or stops the request
//! with a [`ServerError`]. For updates and deletes the order is always:
//! shape validation, authentication, resource load, ownership check, then
//! the handler itself.

use std::future::Future;

use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::middleware::authenticate;
use crate::policy;
use crate::post::Post;
use crate::token::Identity;

/// Deserialize then validate a JSON body. An empty body reads as `{}`.
pub fn parse_body<T: DeserializeOwned + Validate>(body: &[u8]) -> Result<T> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };

    let input: T = serde_json::from_slice(body).map_err(|err| ServerError::ParsingForm(Box::new(err)))?;
    input.validate()?;
    Ok(input)
}

/// Body of requests which carry none, such as deletes.
#[derive(Debug, Default, serde::Deserialize)]
pub struct NoBody {}

impl Validate for NoBody {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Everything a mutation handler may rely on.
#[derive(Debug)]
pub struct Authorized<T> {
    pub identity: Identity,
    pub input: T,
    /// Target resource, owned by `identity`.
    pub post: Post,
}

/// Stages bound to one request.
pub struct Pipeline<'a> {
    state: &'a AppState,
    headers: &'a HeaderMap,
}

impl<'a> Pipeline<'a> {
    pub fn new(state: &'a AppState, headers: &'a HeaderMap) -> Self {
        Self { state, headers }
    }

    pub fn validate<T: DeserializeOwned + Validate>(&self, body: &[u8]) -> Result<T> {
        parse_body(body)
    }

    pub fn authenticate(&self) -> Result<Identity> {
        Ok(authenticate(self.headers, &self.state.token)?)
    }

    /// Caller of a public read. A missing or unusable token is anonymous.
    pub fn viewer(&self) -> Option<Identity> {
        if self.headers.contains_key(axum::http::header::AUTHORIZATION) {
            authenticate(self.headers, &self.state.token).ok()
        } else {
            None
        }
    }

    pub async fn load_post(&self, id: &str) -> Result<Post> {
        self.state
            .repo
            .find_post(id)
            .await?
            .ok_or(ServerError::NotFound("Post"))
    }

    /// Validation then authentication, for creations.
    pub async fn create<T, F, Fut, R>(&self, body: &[u8], handler: F) -> Result<R>
    where
        T: DeserializeOwned + Validate,
        F: FnOnce(Identity, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let input = self.validate::<T>(body)?;
        let identity = self.authenticate()?;

        handler(identity, input).await
    }

    /// The full chain, for updates and deletes of the post `id`.
    pub async fn mutate<T, F, Fut, R>(&self, body: &[u8], id: &str, handler: F) -> Result<R>
    where
        T: DeserializeOwned + Validate,
        F: FnOnce(Authorized<T>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let input = self.validate::<T>(body)?;
        let identity = self.authenticate()?;
        let post = self.load_post(id).await?;
        policy::authorize(&identity, &post)?;

        handler(Authorized {
            identity,
            input,
            post,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header};
    use chrono::TimeDelta;
    use serde::Deserialize;

    use super::*;
    use crate::error::AuthFailure;
    use crate::test_state;

    #[derive(Debug, Deserialize, Validate)]
    struct Input {
        #[validate(length(min = 3, message = "too short"))]
        name: String,
    }

    fn bearer(state: &AppState, user_id: &str) -> HeaderMap {
        let token = state
            .token
            .issue(&Identity {
                user_id: user_id.into(),
                email: format!("{user_id}@blog.com"),
            })
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
        headers
    }

    async fn stored_post(state: &AppState, owner: &str) -> Post {
        let post = Post::new(owner, "Owned post", "Some content here", None, true);
        state.repo.save_post(&post).await.unwrap();
        post
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body::<Input>(br#"{"name":"abc"}"#).unwrap().name, "abc");
        assert!(matches!(parse_body::<Input>(br#"{"name":"ab"}"#), Err(ServerError::Validation(_))));
        assert!(matches!(parse_body::<Input>(b"{not json"), Err(ServerError::ParsingForm(_))));
        assert!(matches!(parse_body::<Input>(b""), Err(ServerError::ParsingForm(_))));
        assert!(parse_body::<NoBody>(b"").is_ok());
    }

    #[tokio::test]
    async fn test_validation_runs_first() {
        let state = test_state().await;
        let post = stored_post(&state, "alice").await;
        let headers = HeaderMap::new();

        let result = Pipeline::new(&state, &headers)
            .mutate::<Input, _, _, ()>(br#"{"name":""}"#, &post.id, |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(ServerError::Validation(_))));

        let result = Pipeline::new(&state, &headers)
            .mutate::<Input, _, _, ()>(br#"{"name":"valid"}"#, &post.id, |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(ServerError::Unauthenticated(AuthFailure::MissingToken))));
    }

    #[tokio::test]
    async fn test_not_found_before_forbidden() {
        let state = test_state().await;
        let headers = bearer(&state, "bob");

        let result = Pipeline::new(&state, &headers)
            .mutate::<NoBody, _, _, ()>(b"", "missing", |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(ServerError::NotFound("Post"))));

        let post = stored_post(&state, "alice").await;
        let result = Pipeline::new(&state, &headers)
            .mutate::<NoBody, _, _, ()>(b"", &post.id, |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(ServerError::Forbidden)));
    }

    #[tokio::test]
    async fn test_handler_runs_for_owner() {
        let state = test_state().await;
        let post = stored_post(&state, "alice").await;
        let headers = bearer(&state, "alice");

        let title = Pipeline::new(&state, &headers)
            .mutate::<NoBody, _, _, _>(b"", &post.id, |authorized| async move {
                assert_eq!(authorized.identity.user_id, "alice");
                Ok(authorized.post.title)
            })
            .await
            .unwrap();
        assert_eq!(title, "Owned post");
    }

    #[tokio::test]
    async fn test_handler_skipped_on_failure() {
        let state = test_state().await;
        let post = stored_post(&state, "alice").await;
        let headers = bearer(&state, "bob");
        let mut called = false;

        let _ = Pipeline::new(&state, &headers)
            .mutate::<NoBody, _, _, ()>(b"", &post.id, |_| {
                called = true;
                async { Ok(()) }
            })
            .await;
        assert!(!called);
    }

    #[tokio::test]
    async fn test_viewer() {
        let state = test_state().await;
        assert!(Pipeline::new(&state, &HeaderMap::new()).viewer().is_none());

        let headers = bearer(&state, "alice");
        assert_eq!(Pipeline::new(&state, &headers).viewer().unwrap().user_id, "alice");

        let expired = state
            .token
            .issue_with_ttl(
                &Identity {
                    user_id: "alice".into(),
                    email: "alice@blog.com".into(),
                },
                TimeDelta::seconds(-1),
            )
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {expired}")).unwrap());
        assert!(Pipeline::new(&state, &headers).viewer().is_none());
    }
}
