//! OpenAPI document and the Swagger UI that renders it.

use axum::{Json, Router};
use utoipa::{
    openapi::{
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
        tag::{Tag, TagBuilder},
    },
    Modify, OpenApi,
};
use utoipa_swagger_ui::{Config, SwaggerUi};

use crate::app::errors::ErrorBody;
use crate::app::routes::{
    system::{self, HealthStatus, RootMessage},
    ApiModule,
};
use crate::app::AppState;

pub const DOCS_UI_PATH: &str = "/api-docs";
pub const DOCS_JSON_PATH: &str = "/api-docs.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marcel Expenses API",
        description = "REST API for tracking expenses, budgets and reports."
    ),
    paths(system::root, system::health),
    components(schemas(RootMessage, HealthStatus, ErrorBody)),
    modifiers(&RouteGroupDocs),
    security(("bearerAuth" = []))
)]
pub struct ApiDoc;

/// Adds the bearer scheme and one tag per route group.
struct RouteGroupDocs;

impl Modify for RouteGroupDocs {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }

        let mut tags: Vec<Tag> = vec![tag("System", "Liveness and health")];
        tags.extend(ApiModule::ALL.iter().map(|m| tag(m.tag(), m.description())));
        openapi.tags = Some(tags);
    }
}

fn tag(name: &str, description: &str) -> Tag {
    TagBuilder::new()
        .name(name)
        .description(Some(description))
        .build()
}

/// `GET /api-docs.json`; mounted in every environment.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Swagger UI under `/api-docs`, reading the document from `/api-docs.json`.
pub fn ui_router() -> Router<AppState> {
    let config = Config::from(DOCS_JSON_PATH)
        .use_base_layout()
        .persist_authorization(true)
        .display_request_duration(true)
        .filter(true)
        .show_extensions(true)
        .show_common_extensions(true);

    Router::new().merge(SwaggerUi::new(DOCS_UI_PATH).config(config))
}
