//! HTTP application wiring (Axum router + middleware stack).
//!
//! - `routes/`: route group registry and the server's own endpoints
//! - `docs.rs`: API document and Swagger UI
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, OriginalUri, Request},
    http::{uri::PathAndQuery, Uri},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use sqlx::PgPool;
use tower::util::MapRequest;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::Level;

use crate::config::AppConfig;
use crate::middleware::{
    self,
    cors::{self, CorsPolicy},
    rate_limit::{self, RateLimiter},
    security_headers::{self, SecurityHeaders},
    MakeRequestUuidV7,
};

pub mod docs;
pub mod errors;
pub mod routes;

pub use routes::{ApiModule, RouteModules};

/// The served application: the router behind trailing-slash trimming.
pub type App = MapRequest<Router, fn(Request) -> Request>;

/// State shared with every route group.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Option<PgPool>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: Option<PgPool>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit));
        Self {
            config,
            db,
            rate_limiter,
        }
    }
}

/// Build the full HTTP application (public entrypoint used by `main.rs`).
///
/// Middleware runs outermost first: request id, panic guard, security
/// headers, origin guard, CORS, body limit, rate limit, request logging,
/// then the 405-to-404 mapping next to the routes.
pub fn build_app(state: AppState, modules: RouteModules) -> App {
    let config = state.config.clone();
    let cors_policy = Arc::new(CorsPolicy::from_config(&config));
    let security = Arc::new(SecurityHeaders::for_environment(&config.environment));
    let limiter = state.rate_limiter.clone();

    let mut router = Router::new()
        .route("/", get(routes::system::root))
        .route("/health", get(routes::system::health))
        .route(docs::DOCS_JSON_PATH, get(docs::openapi_json))
        .merge(modules.into_router());

    if config.docs_enabled() {
        router = router.merge(docs::ui_router());
    } else {
        tracing::info!(environment = %config.environment, "API docs UI disabled");
    }

    let mut app = router
        .fallback(routes::system::not_found)
        .with_state(state)
        .layer(from_fn(routes::system::method_not_allowed_as_not_found));

    if config.request_logging_enabled() {
        app = app.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        );
    }

    let app = app
        .layer(from_fn_with_state(limiter, rate_limit::rate_limit_middleware))
        .layer(DefaultBodyLimit::max(middleware::MAX_BODY_BYTES))
        .layer(cors::cors_layer(cors_policy.clone()))
        .layer(from_fn(cors::preflight_no_content))
        .layer(from_fn_with_state(cors_policy, cors::cors_guard))
        .layer(from_fn_with_state(security, security_headers::security_headers))
        .layer(CatchPanicLayer::custom(errors::panic_to_response))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7));

    MapRequest::new(app, trim_trailing_slash as fn(Request) -> Request)
}

/// `/api/v1/expenses/` routes like `/api/v1/expenses`.
///
/// Runs before routing, so nested groups match either form. The Swagger UI
/// lives under `/api-docs/` and is left alone. The untouched URI is kept as
/// [`OriginalUri`] for 404 messages.
fn trim_trailing_slash(mut req: Request) -> Request {
    let Some(uri) = trimmed_uri(req.uri()) else {
        return req;
    };
    if req.extensions().get::<OriginalUri>().is_none() {
        let original = req.uri().clone();
        req.extensions_mut().insert(OriginalUri(original));
    }
    *req.uri_mut() = uri;
    req
}

fn trimmed_uri(uri: &Uri) -> Option<Uri> {
    let path = uri.path();
    if path == "/" || !path.ends_with('/') {
        return None;
    }
    if path
        .strip_prefix(docs::DOCS_UI_PATH)
        .is_some_and(|rest| rest.starts_with('/'))
    {
        return None;
    }

    let trimmed = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    let target = match uri.query() {
        Some(q) => format!("{trimmed}?{q}"),
        None => trimmed.to_string(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(target.parse::<PathAndQuery>().ok()?);
    Uri::from_parts(parts).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{header, Method, Request, StatusCode},
        response::Response,
        routing::post,
        Form, Json,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::config::{Environment, RateLimitConfig};

    fn config(environment: Environment) -> AppConfig {
        AppConfig {
            environment,
            ..AppConfig::default()
        }
    }

    fn app_with(config: AppConfig, modules: RouteModules) -> App {
        build_app(AppState::new(Arc::new(config), None), modules)
    }

    fn app(environment: Environment) -> App {
        app_with(config(environment), RouteModules::new())
    }

    async fn send(app: App, req: Request<Body>) -> Response {
        app.oneshot(req).await.unwrap()
    }

    async fn get_path(app: App, path: &str) -> Response {
        send(app, Request::get(path).body(Body::empty()).unwrap()).await
    }

    /// What `into_make_service_with_connect_info` attaches when serving.
    fn from_peer(mut req: Request<Body>, peer: &str) -> Request<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    fn expenses_app(expenses: Router<AppState>) -> App {
        app_with(
            config(Environment::Test),
            RouteModules::new().mount(ApiModule::Expenses, expenses),
        )
    }

    async fn json_body(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_returns_greeting() {
        let res = get_path(app(Environment::Test), "/").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            json_body(res).await,
            serde_json::json!({ "message": "Marcel Expenses API is running!" })
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404_with_original_uri() {
        let res = get_path(app(Environment::Test), "/api/v1/expenses/123?page=2").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body = json_body(res).await;
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "Not Found - /api/v1/expenses/123?page=2");
    }

    #[tokio::test]
    async fn mounted_group_is_served_under_its_prefix() {
        let expenses = Router::new().route("/", get(|| async { Json(serde_json::json!({ "expenses": [] })) }));
        let app = app_with(
            config(Environment::Test),
            RouteModules::new().mount(ApiModule::Expenses, expenses),
        );

        let res = get_path(app.clone(), "/api/v1/expenses").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["expenses"], serde_json::json!([]));

        let res = get_path(app, "/api/v1/budgets").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn route_groups_see_shared_state() {
        let settings = Router::new().route(
            "/env",
            get(|axum::extract::State(state): axum::extract::State<AppState>| async move {
                state.config.environment.to_string()
            }),
        );
        let app = app_with(
            config(Environment::Other("staging".into())),
            RouteModules::new().mount(ApiModule::Settings, settings),
        );

        let res = get_path(app, "/api/v1/settings/env").await;
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"staging");
    }

    #[tokio::test]
    async fn docs_ui_disabled_in_production() {
        let res = get_path(app(Environment::Production), "/api-docs").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = get_path(app(Environment::Production), "/api-docs.json").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn docs_ui_enabled_by_flag_in_production() {
        let cfg = AppConfig {
            enable_swagger: true,
            ..config(Environment::Production)
        };
        let res = get_path(app_with(cfg, RouteModules::new()), "/api-docs/").await;
        assert_eq!(res.status(), StatusCode::OK);
        // UI assets are vendored, so the default same-origin policy suffices.
        let csp = res.headers()[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
        assert!(csp.starts_with("default-src 'self'"));
    }

    #[tokio::test]
    async fn docs_ui_enabled_outside_production() {
        let res = get_path(app(Environment::Development), "/api-docs").await;
        assert!(res.status().is_redirection());
        assert_eq!(res.headers()[header::LOCATION], "/api-docs/");

        let res = get_path(app(Environment::Test), "/api-docs/").await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = get_path(app(Environment::Test), "/api-docs/swagger-initializer.js").await;
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let script = String::from_utf8_lossy(&bytes);
        assert!(script.contains("/api-docs.json"));
    }

    #[tokio::test]
    async fn allowed_origin_gets_cors_headers() {
        let req = Request::get("/")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let res = send(app(Environment::Production), req).await;

        assert_eq!(res.status(), StatusCode::OK);
        let h = res.headers();
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:5173");
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        let exposed = h[header::ACCESS_CONTROL_EXPOSE_HEADERS].to_str().unwrap();
        assert!(exposed.contains("x-request-id"));
    }

    #[tokio::test]
    async fn env_listed_origin_is_allowed() {
        let cfg = AppConfig {
            cors_origins: vec!["https://expenses.example.com".into()],
            ..config(Environment::Production)
        };
        let req = Request::get("/")
            .header(header::ORIGIN, "https://expenses.example.com")
            .body(Body::empty())
            .unwrap();
        let res = send(app_with(cfg, RouteModules::new()), req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://expenses.example.com"
        );
    }

    #[tokio::test]
    async fn disallowed_origin_fails_in_production() {
        let req = Request::get("/")
            .header(header::ORIGIN, "https://evil.example")
            .body(Body::empty())
            .unwrap();
        let res = send(app(Environment::Production), req).await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(!res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        let body = json_body(res).await;
        assert_eq!(body["message"], "Not allowed by CORS");
    }

    #[tokio::test]
    async fn any_origin_allowed_in_development() {
        let req = Request::get("/")
            .header(header::ORIGIN, "https://anything.example")
            .body(Body::empty())
            .unwrap();
        let res = send(app(Environment::Development), req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://anything.example"
        );
    }

    #[tokio::test]
    async fn preflight_is_no_content_with_day_long_cache() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/expenses")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization,content-type")
            .body(Body::empty())
            .unwrap();
        let res = send(app(Environment::Production), req).await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let h = res.headers();
        assert_eq!(h[header::ACCESS_CONTROL_MAX_AGE], "86400");
        let methods = h[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        assert!(methods.contains("PATCH"));
        let allowed = h[header::ACCESS_CONTROL_ALLOW_HEADERS].to_str().unwrap();
        assert!(allowed.contains("authorization"));
    }

    #[tokio::test]
    async fn rejected_origin_preflight_is_forbidden() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/expenses")
            .header(header::ORIGIN, "https://evil.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let res = send(app(Environment::Production), req).await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(!res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        assert!(!res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
        assert_eq!(json_body(res).await["error"], "cors_rejected");
    }

    #[tokio::test]
    async fn wrong_method_is_reported_as_not_found() {
        let res = send(
            app(Environment::Test),
            Request::post("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(!res.headers().contains_key(header::ALLOW));
        let body = json_body(res).await;
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "Not Found - /");

        let expenses = Router::new().route("/", get(|| async { "list" }));
        let req = Request::delete("/api/v1/expenses/?id=4").body(Body::empty()).unwrap();
        let res = send(expenses_app(expenses), req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await["message"], "Not Found - /api/v1/expenses/?id=4");
    }

    #[tokio::test]
    async fn trailing_slash_reaches_the_same_route() {
        let expenses = Router::new()
            .route("/", get(|| async { "list" }))
            .route("/summary", get(|| async { "summary" }));
        let app = expenses_app(expenses);

        for (path, expected) in [
            ("/api/v1/expenses", "list"),
            ("/api/v1/expenses/", "list"),
            ("/api/v1/expenses/summary/", "summary"),
        ] {
            let res = get_path(app.clone(), path).await;
            assert_eq!(res.status(), StatusCode::OK, "{path}");
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&bytes[..], expected.as_bytes(), "{path}");
        }

        let res = get_path(app.clone(), "/health/").await;
        assert_eq!(res.status(), StatusCode::OK);

        // 404s still echo what the client asked for.
        let res = get_path(app, "/api/v1/expenses/missing/?page=2").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(res).await["message"],
            "Not Found - /api/v1/expenses/missing/?page=2"
        );
    }

    #[test]
    fn trimming_keeps_root_query_and_docs_paths() {
        let trim = |s: &str| trimmed_uri(&s.parse::<Uri>().unwrap()).map(|u| u.to_string());

        assert_eq!(trim("/"), None);
        assert_eq!(trim("/api/v1/budgets"), None);
        assert_eq!(trim("/api/v1/budgets//?q=1").as_deref(), Some("/api/v1/budgets?q=1"));
        assert_eq!(trim("//").as_deref(), Some("/"));
        assert_eq!(trim("/api-docs/"), None);
        assert_eq!(trim("/api-docs/swagger-ui.css/"), None);
        assert_eq!(trim("/api-docs.json/").as_deref(), Some("/api-docs.json"));
    }

    #[tokio::test]
    async fn security_headers_are_applied() {
        let res = get_path(app(Environment::Production), "/does-not-exist").await;
        let h = res.headers();
        assert_eq!(h["x-content-type-options"], "nosniff");
        assert_eq!(h["x-frame-options"], "SAMEORIGIN");
        assert_eq!(h["cross-origin-embedder-policy"], "credentialless");
        assert!(h.contains_key(header::CONTENT_SECURITY_POLICY));

        let res = get_path(app(Environment::Development), "/").await;
        assert!(!res.headers().contains_key(header::CONTENT_SECURITY_POLICY));
    }

    #[tokio::test]
    async fn request_id_is_generated_or_propagated() {
        let res = get_path(app(Environment::Test), "/").await;
        assert!(res.headers().contains_key("x-request-id"));

        let req = Request::get("/")
            .header("x-request-id", "client-supplied-1")
            .body(Body::empty())
            .unwrap();
        let res = send(app(Environment::Test), req).await;
        assert_eq!(res.headers()["x-request-id"], "client-supplied-1");
    }

    #[tokio::test]
    async fn oversize_json_body_is_rejected() {
        let echo = Router::new().route(
            "/",
            post(|Json(v): Json<serde_json::Value>| async move { Json(v) }),
        );
        let app = expenses_app(echo);

        let req = Request::post("/api/v1/expenses")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, (middleware::MAX_BODY_BYTES + 1).to_string())
            .body(Body::from(vec![b' '; middleware::MAX_BODY_BYTES + 1]))
            .unwrap();
        let res = send(app.clone(), req).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let req = Request::post("/api/v1/expenses")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"amount":12.5}"#))
            .unwrap();
        let res = send(app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["amount"], 12.5);
    }

    #[tokio::test]
    async fn oversize_form_body_is_rejected() {
        let form = Router::new().route(
            "/",
            post(|Form(fields): Form<HashMap<String, String>>| async move {
                fields.get("note").cloned().unwrap_or_default()
            }),
        );
        let app = expenses_app(form);

        let mut big = b"note=".to_vec();
        big.resize(middleware::MAX_BODY_BYTES + 1, b'a');
        let req = Request::post("/api/v1/expenses")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(big))
            .unwrap();
        let res = send(app.clone(), req).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let req = Request::post("/api/v1/expenses")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("note=coffee"))
            .unwrap();
        let res = send(app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"coffee");
    }

    #[tokio::test]
    async fn other_content_types_are_not_capped() {
        let upload = Router::new().route("/", post(|| async { "accepted" }));
        let app = expenses_app(upload);

        let req = Request::post("/api/v1/expenses")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, (middleware::MAX_BODY_BYTES + 1).to_string())
            .body(Body::from(vec![0u8; middleware::MAX_BODY_BYTES + 1]))
            .unwrap();
        let res = send(app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    fn rate_limited(max_requests: u32, trust_proxy: bool) -> App {
        let cfg = AppConfig {
            rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_secs(60),
                trust_proxy,
            },
            ..config(Environment::Test)
        };
        app_with(cfg, RouteModules::new())
    }

    fn forwarded(peer: &str, forwarded_for: &str) -> Request<Body> {
        let req = Request::get("/")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        from_peer(req, peer)
    }

    #[tokio::test]
    async fn spoofed_forwarded_for_shares_the_peer_budget() {
        let app = rate_limited(2, false);

        for spoofed in ["198.51.100.1", "198.51.100.2"] {
            let res = send(app.clone(), forwarded("10.1.1.1:5000", spoofed)).await;
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = send(app.clone(), forwarded("10.1.1.1:5001", "198.51.100.3")).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let res = send(app, forwarded("10.1.1.2:5000", "198.51.100.3")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn trusted_proxy_keys_on_forwarded_for() {
        let app = rate_limited(1, true);

        let res = send(app.clone(), forwarded("10.0.0.1:5000", "198.51.100.1")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = send(app.clone(), forwarded("10.0.0.1:5000", "198.51.100.2")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = send(app, forwarded("10.0.0.1:5000", "198.51.100.1, 10.0.0.1")).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn rate_limit_rejects_after_max_requests() {
        let app = rate_limited(2, false);

        let req = || from_peer(Request::get("/").body(Body::empty()).unwrap(), "198.51.100.4:443");

        let first = send(app.clone(), req()).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["ratelimit-limit"], "2");
        assert_eq!(first.headers()["ratelimit-remaining"], "1");

        assert_eq!(send(app.clone(), req()).await.status(), StatusCode::OK);

        let third = send(app.clone(), req()).await;
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(third.headers().contains_key(header::RETRY_AFTER));

        // Other clients keep their own budget.
        let other = from_peer(Request::get("/").body(Body::empty()).unwrap(), "198.51.100.5:443");
        assert_eq!(send(app, other).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn handler_panic_becomes_500() {
        async fn boom() -> &'static str {
            panic!("boom")
        }

        let maps = Router::new().route("/boom", get(boom));
        let app = app_with(
            config(Environment::Test),
            RouteModules::new().mount(ApiModule::Maps, maps),
        );
        let res = get_path(app, "/api/v1/maps/boom").await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await["error"], "internal_error");
    }

    #[tokio::test]
    async fn health_reports_environment() {
        let res = get_path(app(Environment::Development), "/health").await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["environment"], "development");
        assert_eq!(body["database"], false);
    }
}
