//! One conversion request from resolved input to response body.
//!
//! Both HTTP endpoints funnel into this module so timing, the active
//! conversion gauge, the conversion counters and the response shape are the
//! same regardless of where the bytes came from.

use crate::engine::{ConversionOptions, DocumentConverter, SourceDocument};
use crate::error::{ConvertError, PageError};
use crate::export::Payload;
use crate::format::{InputFormat, OutputFormat};
use crate::metrics::Metrics;
use crate::pipeline::input;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Where the document came from, echoed back in the response metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Url(String),
    Upload { filename: String, file_size: u64 },
}

/// Limits applied while resolving a URL source.
#[derive(Debug, Clone, Copy)]
pub struct DownloadLimits {
    pub max_bytes: u64,
    pub timeout_secs: u64,
}

/// Successful conversion body.
///
/// Text formats fill `content`; `json` fills `document`.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ConvertResponse {
    #[schema(example = "success")]
    pub status: String,
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// The structured document model, for `json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub document: Option<serde_json::Value>,
    pub metadata: ResponseMetadata,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ResponseMetadata {
    pub page_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub input_format: InputFormat,
    pub engine: String,
    #[serde(default)]
    pub warnings: Vec<PageError>,
}

/// Download `url` under `limits`, then convert it.
pub async fn convert_url(
    engine: &dyn DocumentConverter,
    metrics: &Metrics,
    url: &Url,
    limits: DownloadLimits,
    options: &ConversionOptions,
) -> Result<ConvertResponse, ConvertError> {
    let started = Instant::now();
    let _active = metrics.track_active();
    info!("Starting conversion for URL: {}", url);

    let outcome = async {
        let fetched = input::download_url(url, limits.max_bytes, limits.timeout_secs).await?;
        let source = SourceDocument::new(fetched.name, fetched.bytes, fetched.content_type);
        engine.convert(source, options).await
    }
    .await;

    finish(
        engine.name(),
        metrics,
        Origin::Url(url.to_string()),
        options.output_format,
        outcome,
        started,
    )
}

/// Convert bytes that were already read from an upload.
pub async fn convert_upload(
    engine: &dyn DocumentConverter,
    metrics: &Metrics,
    source: SourceDocument,
    options: &ConversionOptions,
) -> Result<ConvertResponse, ConvertError> {
    let started = Instant::now();
    let _active = metrics.track_active();
    let origin = Origin::Upload {
        filename: source.name.clone(),
        file_size: source.len() as u64,
    };
    info!(
        "Starting conversion for upload '{}' ({} bytes, detected {})",
        source.name,
        source.len(),
        source.format
    );

    let outcome = engine.convert(source, options).await;
    finish(
        engine.name(),
        metrics,
        origin,
        options.output_format,
        outcome,
        started,
    )
}

fn finish(
    engine: &str,
    metrics: &Metrics,
    origin: Origin,
    format: OutputFormat,
    outcome: Result<crate::engine::ConversionResult, ConvertError>,
    started: Instant,
) -> Result<ConvertResponse, ConvertError> {
    let elapsed = started.elapsed();
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            metrics.record_conversion(format.as_str(), e.kind(), elapsed);
            warn!("Conversion failed after {:.2}s: {}", elapsed.as_secs_f64(), e);
            return Err(e);
        }
    };
    metrics.record_conversion(format.as_str(), "success", elapsed);

    let document = result.document;
    if !document.warnings.is_empty() {
        warn!(
            "'{}' converted with {} page warning(s)",
            document.name,
            document.warnings.len()
        );
    }
    info!("Conversion completed successfully in {:.2}s", elapsed.as_secs_f64());

    let (source, filename, file_size) = match origin {
        Origin::Url(url) => (Some(url), None, None),
        Origin::Upload {
            filename,
            file_size,
        } => (None, Some(filename), Some(file_size)),
    };
    let (content, structured) = match result.payload {
        Payload::Text(text) => (Some(text), None),
        Payload::Structured(value) => (None, Some(value)),
    };

    Ok(ConvertResponse {
        status: "success".to_string(),
        format,
        content,
        document: structured,
        metadata: ResponseMetadata {
            page_count: document.metadata.page_count.max(document.pages.len()),
            source,
            filename,
            file_size,
            title: document.metadata.title,
            input_format: document.input_format,
            engine: engine.to_string(),
            warnings: document.warnings,
        },
        duration_seconds: elapsed.as_secs_f64(),
    })
}
