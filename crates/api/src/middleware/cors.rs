//! Cross-origin policy: which origins may call the API, and the headers
//! advertised to the ones that can.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::app::errors::ApiError;
use crate::config::AppConfig;

/// Frontends that are always allowed.
pub const STATIC_ALLOWED_ORIGINS: [&str; 5] = [
    "https://mh-expenses-app-render-frontend-v2.onrender.com",
    "http://localhost:5173",
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:5174",
];

pub const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    extra_origins: Vec<String>,
    allow_any: bool,
}

impl CorsPolicy {
    pub fn new(extra_origins: Vec<String>, allow_any: bool) -> Self {
        Self {
            extra_origins,
            allow_any,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.cors_origins.clone(),
            config.environment.is_development(),
        )
    }

    /// Requests without an `Origin` (curl, mobile apps, same-origin) pass.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        STATIC_ALLOWED_ORIGINS.iter().any(|o| *o == origin)
            || self.extra_origins.iter().any(|o| o == origin)
            || self.allow_any
    }
}

/// Rejects requests whose `Origin` is not allowed.
pub async fn cors_guard(
    State(policy): State<Arc<CorsPolicy>>,
    req: Request,
    next: Next,
) -> Response {
    let origin = match req.headers().get(header::ORIGIN) {
        None => None,
        Some(v) => match v.to_str() {
            Ok(s) => Some(s),
            Err(_) => return ApiError::CorsRejected.into_response(),
        },
    };

    if !policy.is_allowed(origin) {
        tracing::info!(origin = origin.unwrap_or_default(), "origin rejected");
        return ApiError::CorsRejected.into_response();
    }

    next.run(req).await
}

/// Answers successful preflights with 204 instead of 200.
pub async fn preflight_no_content(req: Request, next: Next) -> Response {
    let is_preflight = req.method() == Method::OPTIONS
        && req.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut res = next.run(req).await;
    if is_preflight && res.status() == StatusCode::OK {
        *res.status_mut() = StatusCode::NO_CONTENT;
    }
    res
}

/// Header-emitting layer; origin checks mirror [`CorsPolicy::is_allowed`].
pub fn cors_layer(policy: Arc<CorsPolicy>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _parts| {
            origin
                .to_str()
                .map(|o| policy.is_allowed(Some(o)))
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            header::ACCEPT,
            header::ORIGIN,
            header::ACCESS_CONTROL_ALLOW_HEADERS,
        ])
        .expose_headers([
            header::CONTENT_LENGTH,
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
        .max_age(PREFLIGHT_MAX_AGE)
}
