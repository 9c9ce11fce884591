use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use kept_core::sync::{SyncEngine, SyncRequest, SyncResponse};
use kept_core::util::user_fingerprint;
use kept_core::{Change, EntityId};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{RateLimitMetricsSnapshot, SyncRateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    engine: Arc<SyncEngine>,
    jwt_verifier: Arc<JwtVerifier>,
    rate_limiter: Arc<SyncRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            jwt_verifier: Arc::new(JwtVerifier::new(config.as_ref())),
            rate_limiter: Arc::new(SyncRateLimiter::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(sync))
        .route("/notes/search", post(search_notes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, AppError> {
    state.rate_limiter.check("sync", &user.user_id).await?;

    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    if request.changes.len() > state.config.sync_max_changes {
        return Err(AppError::bad_request(format!(
            "a sync request may carry at most {} changes",
            state.config.sync_max_changes
        )));
    }

    let user_hash = user_fingerprint(&user.user_id);
    let response = state.engine.sync(&user.user_id, &request).await?;
    tracing::info!(
        endpoint = "sync",
        user = user_hash,
        session = user.session_id.as_deref().unwrap_or("none"),
        pushed = request.changes.len(),
        pulled = response.changes.len(),
        "Synced changes"
    );
    Ok(Json(response))
}

const DEFAULT_SEARCH_LIMIT: usize = 3;
const MAX_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNotesRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    collection_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchNotesResponse {
    notes: Vec<Change>,
}

async fn search_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<SearchNotesRequest>, JsonRejection>,
) -> Result<Json<SearchNotesResponse>, AppError> {
    state.rate_limiter.check("search", &user.user_id).await?;

    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let collection_id = match request.collection_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<EntityId>()
                .map_err(|_| AppError::bad_request(format!("invalid collectionId {raw:?}")))?,
        ),
    };
    let limit = request
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let notes = state
        .engine
        .search_notes(&user.user_id, &request.query, collection_id.as_ref(), limit)
        .await?;
    Ok(Json(SearchNotesResponse { notes }))
}
