//! Thin HTTP surface over [`SchedulerRuntime`].

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::automation::activity::failure_details;
use crate::automation::{AutoPostingConfig, AutomationUpdate, SchedulerRuntime};
use crate::error::AutomationError;

/// Build the router with the runtime as shared state.
pub fn router(runtime: SchedulerRuntime) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/automation/status/{location_id}", get(get_status))
        .route("/automation/settings/{location_id}", put(update_settings))
        .route("/automation/test-post/{location_id}", post(test_post))
        .route(
            "/automation/test-post-with-token/{location_id}",
            post(test_post_with_token),
        )
        .route("/automation/check-reviews/{location_id}", post(check_reviews))
        .route("/automation/preview/{location_id}", post(preview))
        .route("/automation/stop/{location_id}", post(stop))
        .route("/automation/activity", get(activity))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(runtime)
}

/// Serve `router(runtime)` on `port` until `shutdown` resolves.
pub async fn serve(
    runtime: SchedulerRuntime,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Automation API listening on {}", addr);

    axum::serve(listener, router(runtime))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Error response for handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Automation(AutomationError),
}

impl From<AutomationError> for ApiError {
    fn from(err: AutomationError) -> Self {
        Self::Automation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": message })),
            )
                .into_response(),
            ApiError::Automation(err) => {
                let status = if err.requires_auth() {
                    StatusCode::UNAUTHORIZED
                } else if matches!(err, AutomationError::NotConfigured(_)) {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };

                let mut body = json!({
                    "success": false,
                    "error": err.to_string(),
                    "details": Value::Object(failure_details(&err)),
                });
                if err.requires_auth() {
                    body["requiresAuth"] = json!(true);
                }
                (status, Json(body)).into_response()
            }
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

async fn health_check() -> &'static str {
    "ok"
}

async fn get_status(
    State(runtime): State<SchedulerRuntime>,
    Path(location_id): Path<String>,
) -> ApiResult {
    let status = runtime.get_status(&location_id).await?;
    Ok(Json(json!({ "success": true, "status": status })))
}

async fn update_settings(
    State(runtime): State<SchedulerRuntime>,
    Path(location_id): Path<String>,
    Json(update): Json<AutomationUpdate>,
) -> ApiResult {
    let config = runtime.update_settings(&location_id, update).await?;
    Ok(Json(json!({ "success": true, "settings": config })))
}

async fn test_post(
    State(runtime): State<SchedulerRuntime>,
    Path(location_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let override_config = parse_override(&body)?;
    let result = runtime.trigger_post(&location_id, override_config).await?;
    Ok(Json(json!({ "success": true, "post": result })))
}

async fn test_post_with_token(
    State(runtime): State<SchedulerRuntime>,
    Path(location_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let token = bearer_token(&headers).ok_or_else(|| {
        ApiError::Automation(AutomationError::AuthenticationRequired {
            user_id: "caller".to_string(),
            fallback_attempted: false,
        })
    })?;
    let override_config = parse_override(&body)?;
    let result = runtime
        .create_automated_post_with_token(&location_id, token, override_config)
        .await?;
    Ok(Json(json!({ "success": true, "post": result })))
}

async fn check_reviews(
    State(runtime): State<SchedulerRuntime>,
    Path(location_id): Path<String>,
) -> ApiResult {
    let result = runtime.trigger_review_check(&location_id).await?;
    Ok(Json(json!({ "success": true, "result": result })))
}

async fn preview(
    State(runtime): State<SchedulerRuntime>,
    Path(location_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let override_config = parse_override(&body)?;
    let generated = runtime
        .generate_post_content(&location_id, override_config)
        .await?;
    Ok(Json(json!({
        "success": true,
        "content": generated.content,
        "callToAction": generated.call_to_action,
    })))
}

async fn stop(
    State(runtime): State<SchedulerRuntime>,
    Path(location_id): Path<String>,
) -> ApiResult {
    let config = runtime.disable_location(&location_id).await?;
    Ok(Json(json!({ "success": true, "settings": config })))
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<usize>,
}

async fn activity(
    State(runtime): State<SchedulerRuntime>,
    Query(query): Query<ActivityQuery>,
) -> Json<Value> {
    let records = match query.limit {
        Some(limit) => runtime.recent_activity(limit).await,
        None => runtime.activity().await,
    };
    Json(json!({ "success": true, "activity": records }))
}

/// An optional `AutoPostingConfig` body; an empty body means "use stored settings".
fn parse_override(body: &Bytes) -> Result<Option<AutoPostingConfig>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::BadRequest(format!("Invalid posting config: {}", e)))
}

fn bearer_token(headers: &HeaderMap) -> Option<SecretString> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| SecretString::from(t.to_string()))
}
