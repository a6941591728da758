//! Configuration types for the conversion service.
//!
//! Two structs split the knobs by who reads them:
//!
//! * [`ServiceConfig`] — the HTTP surface: bind address, size limit, download
//!   timeout, metrics toggle. Read by the router and handlers.
//! * [`EngineConfig`] — the conversion engine: where pdfium lives, and how
//!   pages without a text layer are sent to a vision LLM.
//!
//! Both are built through validating builders and are immutable once built;
//! the service shares them behind `Arc`.

use crate::error::ConvertError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default port the service listens on.
pub const DEFAULT_PORT: u16 = 8000;

/// Default upload/download size limit in megabytes.
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;

/// Default URL download timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

// ── ServiceConfig ────────────────────────────────────────────────────────

/// HTTP service configuration.
///
/// # Example
/// ```rust
/// use docconvert_api::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .port(9000)
///     .max_file_size_mb(25)
///     .metrics_enabled(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_file_size_bytes(), 25 * 1024 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Reported by `/health` and used as the metrics namespace. Default: `docconvert-api`.
    pub service_name: String,

    /// Reported by `/health`. Default: the crate version.
    pub version: String,

    /// Bind host. Default: `0.0.0.0`.
    pub host: String,

    /// Bind port. Default: 8000.
    pub port: u16,

    /// Maximum accepted document size, for uploads and URL downloads alike.
    /// Default: 100.
    pub max_file_size_mb: u64,

    /// Timeout for fetching URL sources in seconds. Default: 300.
    ///
    /// Only the download is bounded; parsing runs to completion.
    pub request_timeout_secs: u64,

    /// Serve `/metrics`. Default: true.
    pub metrics_enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "docconvert-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            metrics_enabled: true,
        }
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.max_file_size_mb = mb;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn metrics_enabled(mut self, v: bool) -> Self {
        self.config.metrics_enabled = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.service_name.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "SERVICE_NAME must not be empty".into(),
            ));
        }
        if c.port == 0 {
            return Err(ConvertError::InvalidConfig("API_PORT must be 1–65535".into()));
        }
        if c.max_file_size_mb == 0 {
            return Err(ConvertError::InvalidConfig(
                "MAX_FILE_SIZE_MB must be ≥ 1".into(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "REQUEST_TIMEOUT must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── EngineConfig ─────────────────────────────────────────────────────────

/// Conversion engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// Directory holding downloaded engine artifacts (the pdfium library).
    /// `None` uses the platform cache directory.
    pub artifacts_path: Option<PathBuf>,

    /// Explicit pdfium shared library; skips the artifact cache entirely.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Enable vision-LLM OCR for pages without a text layer. Default: true.
    ///
    /// Even when enabled, OCR only happens if a provider can be resolved.
    pub ocr: bool,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Maximum rendered image dimension for OCR pages in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF documents parsed or rendered at the same time (`OMP_NUM_THREADS`).
    /// Default: 4.
    pub parse_threads: usize,

    /// Concurrent VLM calls per document. Default: 4.
    pub ocr_concurrency: usize,

    /// Sampling temperature for the OCR completion. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per OCR page. Default: 4096.
    pub max_tokens: usize,

    /// Retries per OCR page on provider failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifacts_path: None,
            pdfium_lib_path: None,
            ocr: true,
            provider: None,
            provider_name: None,
            model: None,
            max_rendered_pixels: 2000,
            parse_threads: 4,
            ocr_concurrency: 4,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("artifacts_path", &self.artifacts_path)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("ocr", &self.ocr)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("parse_threads", &self.parse_threads)
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn artifacts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.artifacts_path = Some(path.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn ocr(mut self, v: bool) -> Self {
        self.config.ocr = v;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn parse_threads(mut self, n: usize) -> Self {
        self.config.parse_threads = n;
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConvertError> {
        let c = &self.config;
        if c.parse_threads == 0 {
            return Err(ConvertError::InvalidConfig(
                "OMP_NUM_THREADS must be ≥ 1".into(),
            ));
        }
        if c.ocr_concurrency == 0 {
            return Err(ConvertError::InvalidConfig(
                "OCR_CONCURRENCY must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ConvertError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_defaults() {
        let c = ServiceConfig::default();
        assert_eq!(c.port, 8000);
        assert_eq!(c.max_file_size_mb, 100);
        assert_eq!(c.request_timeout_secs, 300);
        assert!(c.metrics_enabled);
        assert_eq!(c.host, "0.0.0.0");
        assert_eq!(c.max_file_size_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn service_builder_rejects_zero_values() {
        assert!(ServiceConfig::builder().port(0).build().is_err());
        assert!(ServiceConfig::builder().max_file_size_mb(0).build().is_err());
        assert!(ServiceConfig::builder().request_timeout_secs(0).build().is_err());
        assert!(ServiceConfig::builder().service_name("  ").build().is_err());
    }

    #[test]
    fn service_builder_error_names_variable() {
        let err = ServiceConfig::builder()
            .max_file_size_mb(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
        assert!(err.to_string().contains("MAX_FILE_SIZE_MB"));
    }

    #[test]
    fn engine_defaults_and_clamps() {
        let c = EngineConfig::builder()
            .temperature(5.0)
            .max_rendered_pixels(10)
            .build()
            .unwrap();
        assert!(c.ocr);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.max_rendered_pixels, 100);
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.parse_threads, 4);
        assert!(EngineConfig::builder().ocr_concurrency(0).build().is_err());
        assert!(EngineConfig::builder().parse_threads(0).build().is_err());
    }

    #[test]
    fn engine_debug_hides_provider() {
        let dbg = format!("{:?}", EngineConfig::default());
        assert!(dbg.contains("provider: None"));
    }
}
