use axum::{
    extract::{OriginalUri, Request, State},
    http::{StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::{errors::ApiError, AppState};

pub const ROOT_MESSAGE: &str = "Marcel Expenses API is running!";

#[derive(Debug, Serialize, ToSchema)]
pub struct RootMessage {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub environment: String,
    /// Whether a database pool is open.
    pub database: bool,
    /// RFC 3339.
    pub timestamp: String,
}

#[utoipa::path(
    get,
    path = "/",
    tag = "System",
    security(()),
    responses((status = 200, description = "API is running", body = RootMessage))
)]
pub async fn root() -> Json<RootMessage> {
    Json(RootMessage {
        message: ROOT_MESSAGE.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    security(()),
    responses((status = 200, description = "Service health", body = HealthStatus))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let database = state.db.as_ref().is_some_and(|pool| !pool.is_closed());
    Json(HealthStatus {
        status: "ok".to_string(),
        environment: state.config.environment.as_str().to_string(),
        database,
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Path and query as the client sent them.
pub fn request_target(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Catch-all for anything no route matched.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(request_target(&uri))
}

/// A known path hit with an unsupported method is reported like an unknown
/// route, so clients get the same 404 body either way.
pub async fn method_not_allowed_as_not_found(req: Request, next: Next) -> Response {
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.clone())
        .unwrap_or_else(|| req.uri().clone());

    let res = next.run(req).await;
    if res.status() == StatusCode::METHOD_NOT_ALLOWED
        && res.headers().contains_key(axum::http::header::ALLOW)
    {
        return ApiError::NotFound(request_target(&uri)).into_response();
    }
    res
}
