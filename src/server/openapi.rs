//! OpenAPI description of the HTTP surface, served at `/openapi.json`.

use axum::extract::State;
use axum::Json;
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::handlers::{self, ConvertRequest, HealthResponse, UploadRequest};
use super::state::AppState;
use crate::convert::{ConvertResponse, ResponseMetadata};
use crate::error::PageError;
use crate::format::{InputFormat, OutputFormat};

#[derive(OpenApi)]
#[openapi(
    info(description = "Convert PDF, Markdown and plain-text documents to markdown, json, doctags or text."),
    paths(
        handlers::root_handler,
        handlers::health_handler,
        handlers::metrics_handler,
        handlers::convert_handler,
        handlers::upload_handler,
    ),
    components(schemas(
        ConvertRequest,
        UploadRequest,
        ConvertResponse,
        ResponseMetadata,
        HealthResponse,
        ErrorResponse,
        OutputFormat,
        InputFormat,
        PageError,
    )),
    tags(
        (name = "conversion", description = "Document conversion"),
        (name = "service", description = "Service info, health and metrics"),
    )
)]
pub(crate) struct ApiDoc;

/// The description, titled and versioned after the running service.
pub(crate) fn document(state: &AppState) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = state.config.service_name.clone();
    doc.info.version = state.config.version.clone();
    doc
}

pub(crate) async fn openapi_handler(State(state): State<AppState>) -> Json<utoipa::openapi::OpenApi> {
    Json(document(&state))
}
