//! Cross-cutting request middleware, applied in front of every route.

use axum::http::HeaderValue;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub mod cors;
pub mod rate_limit;
pub mod security_headers;

/// Upper bound for JSON and URL-encoded request bodies, enforced by the
/// `Json` and `Form` extractors through `DefaultBodyLimit`.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Generates UUIDv7 request ids for requests that did not bring one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}
