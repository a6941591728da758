use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ErrorResponse};
use super::state::AppState;
use crate::convert::{self, ConvertResponse, DownloadLimits};
use crate::engine::{ConversionOptions, DocumentConverter, SourceDocument};
use crate::error::ConvertError;
use crate::format::OutputFormat;
use crate::pipeline::input;
use std::sync::Arc;

/// Allowance for multipart boundaries and the small text fields on top of
/// the file itself.
pub(crate) const MULTIPART_OVERHEAD: u64 = 64 * 1024;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn default_true() -> bool {
    true
}

/// Body of `POST /convert`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub(crate) struct ConvertRequest {
    /// Absolute `http` or `https` URL of the document.
    #[schema(example = "https://arxiv.org/pdf/1706.03762")]
    pub url: String,
    /// Defaults to `markdown`.
    #[serde(default)]
    #[schema(value_type = Option<OutputFormat>)]
    pub output_format: Option<String>,
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    #[serde(default = "default_true")]
    pub table_extraction: bool,
    #[serde(default = "default_true")]
    pub formula_extraction: bool,
}

/// Form fields of `POST /convert/upload`.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub(crate) struct UploadRequest {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    output_format: Option<OutputFormat>,
    ocr_enabled: Option<bool>,
    table_extraction: Option<bool>,
    formula_extraction: Option<bool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub(crate) struct HealthResponse {
    /// `healthy` or `unavailable`.
    status: String,
    service: String,
    version: String,
    converter_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<String>,
    /// Initialisation error, when the engine failed to start.
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    uptime_secs: u64,
}

#[utoipa::path(
    get,
    path = "/",
    tag = "service",
    responses((status = 200, description = "Service name, version and endpoints", body = String, content_type = "text/plain"))
)]
pub(crate) async fn root_handler(State(state): State<AppState>) -> String {
    format!(
        "{name} {version}\n\
         \n\
         Document conversion service: PDF, Markdown and plain text to\n\
         markdown, json, doctags or text.\n\
         \n\
         Endpoints:\n\
         - POST /convert - Convert document from URL\n\
         - POST /convert/upload - Convert uploaded document file\n\
         - GET /health - Health check\n\
         - GET /metrics - Prometheus metrics\n\
         - GET /openapi.json - OpenAPI description\n",
        name = state.config.service_name,
        version = state.config.version,
    )
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "service",
    responses(
        (status = 200, description = "Engine initialised", body = HealthResponse),
        (status = 503, description = "Engine not initialised yet, or failed to", body = HealthResponse)
    )
)]
pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.engine.is_ready();
    let body = HealthResponse {
        status: if ready { "healthy" } else { "unavailable" }.to_string(),
        service: state.config.service_name.clone(),
        version: state.config.version.clone(),
        converter_ready: ready,
        engine: state.engine.engine_name(),
        detail: state.engine.failure().map(str::to_string),
        uptime_secs: state.started_at.elapsed().as_secs(),
    };
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "service",
    responses(
        (status = 200, description = "Prometheus text exposition", body = String, content_type = "text/plain"),
        (status = 404, description = "METRICS_ENABLED=false", body = ErrorResponse)
    )
)]
pub(crate) async fn metrics_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.config.metrics_enabled {
        return Err(ApiError::NotFound("metrics are disabled".to_string()));
    }
    state.metrics.set_converter_ready(state.engine.is_ready());
    Ok(([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.metrics.render()))
}

#[utoipa::path(
    post,
    path = "/convert",
    tag = "conversion",
    request_body = ConvertRequest,
    responses(
        (status = 200, description = "Converted document", body = ConvertResponse),
        (status = 400, description = "Malformed body or URL", body = ErrorResponse),
        (status = 413, description = "Document larger than MAX_FILE_SIZE_MB", body = ErrorResponse),
        (status = 415, description = "Input format not supported", body = ErrorResponse),
        (status = 422, description = "Unknown output_format, or corrupt, encrypted or empty document", body = ErrorResponse),
        (status = 502, description = "Download failed", body = ErrorResponse),
        (status = 503, description = "Engine not ready", body = ErrorResponse),
        (status = 504, description = "Download timed out", body = ErrorResponse)
    )
)]
pub(crate) async fn convert_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let output_format = parse_output_format(req.output_format.as_deref())?;
    let url = input::validate_url(&req.url)?;
    let engine = ready_engine(&state)?;

    let options = ConversionOptions {
        output_format,
        ocr_enabled: req.ocr_enabled,
        table_extraction: req.table_extraction,
        formula_extraction: req.formula_extraction,
    };
    let limits = DownloadLimits {
        max_bytes: state.config.max_file_size_bytes(),
        timeout_secs: state.config.request_timeout_secs,
    };

    let resp = convert::convert_url(engine.as_ref(), &state.metrics, &url, limits, &options).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/convert/upload",
    tag = "conversion",
    request_body(content = UploadRequest, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Converted document", body = ConvertResponse),
        (status = 400, description = "Malformed form or missing file", body = ErrorResponse),
        (status = 413, description = "File larger than MAX_FILE_SIZE_MB", body = ErrorResponse),
        (status = 415, description = "Input format not supported", body = ErrorResponse),
        (status = 422, description = "Unknown output_format, or corrupt, encrypted or empty document", body = ErrorResponse),
        (status = 503, description = "Engine not ready", body = ErrorResponse)
    )
)]
pub(crate) async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let max_bytes = state.config.max_file_size_bytes();
    let limit_mb = state.config.max_file_size_mb;
    let too_large = || ConvertError::FileTooLarge { limit_mb };

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > max_bytes.saturating_add(MULTIPART_OVERHEAD)) {
        return Err(too_large().into());
    }

    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit_mb))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("upload")
                    .to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = read_limited(field, max_bytes, limit_mb)
                    .await?
                    .ok_or_else(too_large)?;
                form.file = Some(SourceDocument::new(filename, bytes, content_type));
            }
            "output_format" => form.output_format = Some(field_text(field, limit_mb).await?),
            "ocr_enabled" => {
                form.ocr_enabled = parse_flag(&name, &field_text(field, limit_mb).await?)?
            }
            "table_extraction" => {
                form.table_extraction = parse_flag(&name, &field_text(field, limit_mb).await?)?
            }
            "formula_extraction" => {
                form.formula_extraction = parse_flag(&name, &field_text(field, limit_mb).await?)?
            }
            other => tracing::debug!("ignoring unknown multipart field '{}'", other),
        }
    }

    let output_format = parse_output_format(form.output_format.as_deref())?;
    let source = form
        .file
        .ok_or_else(|| ApiError::BadRequest("missing multipart field 'file'".to_string()))?;
    let engine = ready_engine(&state)?;

    let options = ConversionOptions {
        output_format,
        ocr_enabled: form.ocr_enabled.unwrap_or(true),
        table_extraction: form.table_extraction.unwrap_or(true),
        formula_extraction: form.formula_extraction.unwrap_or(true),
    };

    let resp = convert::convert_upload(engine.as_ref(), &state.metrics, source, &options).await?;
    Ok(Json(resp))
}

#[derive(Default)]
struct UploadForm {
    file: Option<SourceDocument>,
    output_format: Option<String>,
    ocr_enabled: Option<bool>,
    table_extraction: Option<bool>,
    formula_extraction: Option<bool>,
}

fn ready_engine(state: &AppState) -> Result<Arc<dyn DocumentConverter>, ApiError> {
    state
        .engine
        .get()
        .ok_or(ApiError::Convert(ConvertError::EngineNotReady))
}

fn parse_output_format(value: Option<&str>) -> Result<OutputFormat, ApiError> {
    match value {
        None => Ok(OutputFormat::default()),
        Some(v) => Ok(v.parse()?),
    }
}

fn parse_flag(name: &str, value: &str) -> Result<Option<bool>, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ApiError::BadRequest(format!(
            "field '{name}' must be a boolean, got '{value}'"
        ))),
    }
}

/// Read a field chunk by chunk. `Ok(None)` means the limit was exceeded.
async fn read_limited(
    mut field: Field<'_>,
    max_bytes: u64,
    limit_mb: u64,
) -> Result<Option<Vec<u8>>, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limit_mb))?
    {
        if (buf.len() + chunk.len()) as u64 > max_bytes {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Some(buf))
}

async fn field_text(field: Field<'_>, limit_mb: u64) -> Result<String, ApiError> {
    field.text().await.map_err(|e| multipart_error(e, limit_mb))
}

/// The router-level body limit surfaces as a multipart error with status 413.
fn multipart_error(e: MultipartError, limit_mb: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ConvertError::FileTooLarge { limit_mb }.into()
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_request_defaults() {
        let req: ConvertRequest = serde_json::from_str(r#"{"url":"https://x/a.pdf"}"#).unwrap();
        assert_eq!(req.output_format, None);
        assert!(req.ocr_enabled && req.table_extraction && req.formula_extraction);
    }

    #[test]
    fn output_format_defaults_to_markdown() {
        assert_eq!(parse_output_format(None).unwrap(), OutputFormat::Markdown);
        assert_eq!(parse_output_format(Some("doctags")).unwrap(), OutputFormat::Doctags);
        for bad in ["pdf", "DocTags", "md", " "] {
            let err = parse_output_format(Some(bad)).unwrap_err();
            assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY, "{bad}");
        }
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("ocr_enabled", "False").unwrap(), Some(false));
        assert_eq!(parse_flag("ocr_enabled", "1").unwrap(), Some(true));
        assert_eq!(parse_flag("ocr_enabled", "").unwrap(), None);
        assert!(parse_flag("ocr_enabled", "maybe").is_err());
    }

    #[test]
    fn health_body_shape() {
        let body = HealthResponse {
            status: "healthy".into(),
            service: "docconvert-api".into(),
            version: "0.3.0".into(),
            converter_ready: true,
            engine: Some("native".into()),
            detail: None,
            uptime_secs: 7,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["converter_ready"], true);
        assert_eq!(json["engine"], "native");
        assert!(json.get("detail").is_none());
    }
}
