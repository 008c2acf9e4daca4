use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::models::{AccessKey, IssueKeyRequest, UsageLogEntry, VerifyRequest, VerifyResponse, UNLIMITED_USES};
use crate::security::constant_time_eq;
use crate::service::AccessKeyService;

pub type AppState = Arc<AppContext>;

pub struct AppContext {
    pub service: AccessKeyService,
    pub admin_token: Option<String>,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/keys", post(issue_key).get(list_keys))
        .route("/keys/:id/logs", get(key_logs))
        .route("/keys/:id/deactivate", post(deactivate_key))
        .route("/init-db", post(init_db))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/verify", post(verify_access_key))
        .nest("/admin", admin)
        .with_state(state)
}

/// Runs store work on the blocking pool so a saturated connection pool
/// cannot stall the async workers.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AccessKeyService) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "blocking task failed");
            ApiError::Internal
        })?
}

async fn verify_access_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let user_ip = client_ip(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        state.trust_forwarded_for,
    );

    let key = run_blocking(&state, move |service| {
        service.verify(&payload.access_key, &user_ip, &payload.request_text, Utc::now())
    })
    .await?;

    Ok(Json(VerifyResponse {
        valid: true,
        key_id: key.id,
        name: key.name,
    }))
}

async fn issue_key(
    State(state): State<AppState>,
    Json(payload): Json<IssueKeyRequest>,
) -> Result<(StatusCode, Json<AccessKey>), ApiError> {
    let key = run_blocking(&state, move |service| {
        service.issue_key(
            &payload.name,
            payload.max_uses.unwrap_or(UNLIMITED_USES),
            payload.expires_in_days,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn list_keys(State(state): State<AppState>) -> Result<Json<Vec<AccessKey>>, ApiError> {
    Ok(Json(run_blocking(&state, |service| service.list_keys()).await?))
}

async fn key_logs(
    State(state): State<AppState>,
    Path(key_id): Path<i64>,
) -> Result<Json<Vec<UsageLogEntry>>, ApiError> {
    Ok(Json(
        run_blocking(&state, move |service| service.logs_for_key(key_id)).await?,
    ))
}

async fn deactivate_key(
    State(state): State<AppState>,
    Path(key_id): Path<i64>,
) -> Result<Json<AccessKey>, ApiError> {
    Ok(Json(
        run_blocking(&state, move |service| service.deactivate_key(key_id)).await?,
    ))
}

async fn init_db(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    run_blocking(&state, |service| service.database().init_schema()).await?;
    Ok(Json(json!({ "message": "Database initialized successfully" })))
}

async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token, expected) => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized),
    }
}

// First hop of X-Forwarded-For when trusted, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if let Some(forwarded_for) = headers.get("X-Forwarded-For").filter(|_| trust_forwarded_for) {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(ip) = value.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()) {
                return ip.to_string();
            }
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
