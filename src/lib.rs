//! Scribe is a blog content service with stateless token authentication.
#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
mod middleware;
mod pipeline;
pub mod policy;
pub mod post;
pub mod repository;
mod router;
pub mod seed;
pub mod telemetry;
pub mod token;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub repo: Arc<dyn repository::Repository>,
    pub lifecycle: Arc<dyn database::Lifecycle>,
    pub crypto: Arc<crypto::Crypto>,
    pub token: token::TokenManager,
    pub metrics: Option<PrometheusHandle>,
}

fn allowed_origin(config: &config::Configuration) -> AllowOrigin {
    match config.cors_origin.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(err)) => {
            tracing::warn!(error = %err, "invalid `cors_origin`, allowing any origin");
            AllowOrigin::any()
        },
        None => AllowOrigin::any(),
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Mark sensitive headers before any span records them.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_millis(state.config.request_timeout_ms),
        ))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origin(&state.config))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
                .vary([header::AUTHORIZATION]),
        );

    let session = Router::new()
        // `POST /auth/logout` goes to `logout`.
        .route("/logout", post(router::auth::logout))
        // `GET /auth/me` goes to `me`.
        .route("/me", get(router::auth::me))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let auth = Router::new()
        .route("/register", post(router::auth::register))
        .route("/login", post(router::auth::login))
        .merge(session);

    Router::new()
        .route("/health", get(router::status::health))
        .route("/metrics", get(router::status::metrics))
        .nest("/auth", auth)
        .route("/posts", get(router::posts::list).post(router::posts::create))
        .route(
            "/posts/{id}",
            get(router::posts::get)
                .put(router::posts::update)
                .delete(router::posts::delete),
        )
        .fallback(router::status::not_found)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
///
/// Fails when the token secret policy is not met or when storage cannot be
/// reached: nothing must be served in that case.
pub async fn initialize_state(
    config: config::Configuration,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    let token = token::TokenManager::from_config(config.environment, &config.token)?;
    let crypto = Arc::new(crypto::Crypto::new(&config.argon2)?);

    let storage = database::open(&config).await?;
    seed::populate(config.environment, &crypto, storage.repo.as_ref()).await?;

    Ok(AppState {
        config: Arc::new(config),
        repo: storage.repo,
        lifecycle: storage.lifecycle,
        crypto,
        token,
        metrics,
    })
}

/// State backed by the memory driver. MUST NEVER be used in production.
#[cfg(test)]
pub async fn test_state() -> AppState {
    let mut config = config::Configuration::default();
    config.environment = config::Environment::Test;
    config.database.driver = config::Driver::Memory;
    config.argon2 = config::Argon2::testing();
    config.token.secret = Some("integration-test-secret".into());

    initialize_state(config, None).await.expect("cannot initialize test state")
}

/// Send a request, with `Authorization: Bearer <token>` when a token is given.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// Send a bodiless request with a verbatim `Authorization` header.
#[cfg(test)]
pub async fn make_raw_request(
    app: Router,
    method: Method,
    path: &str,
    authorization: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder().method(method).uri(path);
    if let Some(value) = authorization {
        request = request.header(header::AUTHORIZATION, value);
    }

    app.oneshot(request.body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Split a response into its status and JSON body (`null` when empty).
#[cfg(test)]
pub async fn into_json(response: axum::http::Response<axum::body::Body>) -> (StatusCode, serde_json::Value) {
    use http_body_util::BodyExt;

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };

    (status, json)
}

/// Store a user with password `password123`; returns its id and a token.
#[cfg(test)]
pub async fn signup(state: &AppState, username: &str, email: &str) -> (String, String) {
    let user = user::User::builder()
        .username(username)
        .email(email)
        .password("password123")
        .create(&state.crypto, state.repo.as_ref())
        .await
        .unwrap();
    let token = state.token.issue(&user.identity()).unwrap();

    (user.id, token)
}
