//! HTTP surface for the sync service: trigger endpoints behind shared-secret
//! auth, plus an unauthenticated keepalive and cache-refresh hook.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use opps_sync::SyncService;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const CRATE_NAME: &str = "opps-web";

/// Header carrying the shared-secret token on trigger requests.
pub const AUTH_HEADER: &str = "AUTH_TOKEN";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn SyncService>,
    pub auth_token: String,
}

impl AppState {
    pub fn new(service: Arc<dyn SyncService>, auth_token: impl Into<String>) -> Self {
        Self {
            service,
            auth_token: auth_token.into(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let triggers = Router::new()
        .route("/instagrant", post(instagrant))
        .route("/earn", post(earn))
        .route("/getro", post(getro))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/keepalive", get(keepalive))
        .route("/index/cloudflare", post(index_cloudflare))
        .merge(triggers)
        .with_state(state)
}

/// Bind and serve with per-client rate limiting and request tracing. The
/// limiter replenishes one permit per 600ms with a burst of 100, which works
/// out to 100 requests per client per minute.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let limiter = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(600)
            .burst_size(100)
            .use_headers()
            .finish()
            .context("building rate limiter configuration")?,
    );

    let router = app(state)
        .layer(GovernorLayer { config: limiter })
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving http")?;
    Ok(())
}

/// An unset server token rejects everything rather than letting an empty
/// header through.
async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if state.auth_token.is_empty() || presented != state.auth_token {
        return (StatusCode::UNAUTHORIZED, "Access Denied").into_response();
    }
    next.run(request).await
}

fn text_result(result: Result<String>) -> Response {
    match result {
        Ok(message) => (StatusCode::OK, message).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn keepalive() -> &'static str {
    "Success"
}

#[derive(Debug, Deserialize)]
struct InstagrantBody {
    tweet: String,
    applier: String,
}

async fn instagrant(State(state): State<AppState>, Json(body): Json<InstagrantBody>) -> Response {
    text_result(state.service.send_grant_dm(&body.applier, &body.tweet).await)
}

async fn earn(State(state): State<AppState>) -> Response {
    text_result(state.service.update_index().await)
}

async fn getro(State(state): State<AppState>) -> Response {
    text_result(state.service.sync_board_jobs().await)
}

async fn index_cloudflare(State(state): State<AppState>) -> Response {
    text_result(state.service.publish_cache_index().await)
}
