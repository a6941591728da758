//! Error types for the conversion library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal for the request**: the document cannot be
//!   converted at all (unsupported format, corrupt file, download failure,
//!   engine not initialised). Surfaced to HTTP clients as a typed error
//!   response; never fatal to the process.
//!
//! * [`PageError`] — **Non-fatal**: a single page could not be OCR'd but the
//!   rest of the document is fine. Collected into the document's warnings so
//!   callers still receive partial output.

use thiserror::Error;

/// All per-request errors returned by the conversion engine and pipeline.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source string is not an absolute HTTP/HTTPS URL.
    #[error("Invalid URL '{input}': only absolute http:// and https:// URLs are accepted")]
    InvalidUrl { input: String },

    /// URL was valid but the download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// Input is larger than the configured maximum.
    #[error("File size exceeds the {limit_mb}MB limit")]
    FileTooLarge { limit_mb: u64 },

    /// Input format could not be detected or is not handled by the engine.
    #[error("Unsupported document format '{detected}' for '{name}'. Supported formats: {supported}")]
    UnsupportedFormat {
        name: String,
        detected: String,
        supported: String,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// Document structure is corrupt and cannot be parsed.
    #[error("Document '{name}' is corrupt: {detail}")]
    CorruptDocument { name: String, detail: String },

    /// PDF requires a password.
    #[error("Document '{name}' is encrypted and requires a password")]
    PasswordRequired { name: String },

    /// The document parsed but contains no text, and OCR was not possible.
    #[error("Document '{name}' has no extractable text: {hint}")]
    NoExtractableText { name: String, hint: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The conversion engine has not finished (or failed) initialisation.
    #[error("Document converter is not initialized")]
    EngineNotReady,

    /// The engine backend could not be loaded.
    #[error("Conversion engine failed to initialize: {0}")]
    EngineInit(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Stable machine-readable identifier used in error responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::InvalidUrl { .. } => "invalid_url",
            ConvertError::DownloadFailed { .. } => "download_failed",
            ConvertError::DownloadTimeout { .. } => "download_timeout",
            ConvertError::FileTooLarge { .. } => "file_too_large",
            ConvertError::UnsupportedFormat { .. } => "unsupported_format",
            ConvertError::CorruptDocument { .. } => "corrupt_document",
            ConvertError::PasswordRequired { .. } => "password_required",
            ConvertError::NoExtractableText { .. } => "no_extractable_text",
            ConvertError::EngineNotReady => "engine_not_ready",
            ConvertError::EngineInit(_) => "engine_init_failed",
            ConvertError::InvalidConfig(_) => "invalid_config",
            ConvertError::Internal(_) => "internal",
        }
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// VLM OCR call failed after retries.
    #[error("Page {page}: OCR failed after {retries} retries: {detail}")]
    OcrFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// Page has no text layer and OCR was disabled or unavailable.
    #[error("Page {page}: no text layer and OCR is {reason}")]
    NoTextLayer { page: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_too_large_display() {
        let e = ConvertError::FileTooLarge { limit_mb: 100 };
        assert_eq!(e.to_string(), "File size exceeds the 100MB limit");
        assert_eq!(e.kind(), "file_too_large");
    }

    #[test]
    fn unsupported_format_lists_supported() {
        let e = ConvertError::UnsupportedFormat {
            name: "slides.pptx".into(),
            detected: "pptx".into(),
            supported: "pdf, markdown, text".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("slides.pptx"), "got: {msg}");
        assert!(msg.contains("pdf, markdown, text"), "got: {msg}");
    }

    #[test]
    fn download_timeout_display() {
        let e = ConvertError::DownloadTimeout {
            url: "https://example.org/a.pdf".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn page_error_serializes_with_kind_tag() {
        let e = PageError::OcrFailed {
            page: 3,
            retries: 2,
            detail: "rate limited".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "ocr_failed");
        assert_eq!(json["page"], 3);
        assert!(e.to_string().contains("Page 3"));
    }
}
