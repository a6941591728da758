//! Server binary for docconvert-api.
//!
//! Maps CLI flags and environment variables to `ServiceConfig` and
//! `EngineConfig`, starts engine initialisation in the background and serves
//! until SIGTERM or ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use docconvert_api::{ApiServer, AppState, EngineConfig, EngineHandle, ServiceConfig};
use std::io;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port
  docconvert-api

  # Smaller upload limit, metrics off
  MAX_FILE_SIZE_MB=25 METRICS_ENABLED=false docconvert-api

  # OCR pages without a text layer through a vision model
  OPENAI_API_KEY=sk-... OCR_MODEL=gpt-4.1-mini docconvert-api

  # Convert a document
  curl -s localhost:8000/convert -H 'content-type: application/json' \
       -d '{"url": "https://arxiv.org/pdf/1706.03762", "output_format": "markdown"}'
  curl -s localhost:8000/convert/upload -F file=@report.pdf -F output_format=doctags

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          Enables OCR through OpenAI when OCR_PROVIDER is unset
  ANTHROPIC_API_KEY       Enables OCR auto-detection
  GEMINI_API_KEY          Enables OCR auto-detection
  EDGEQUAKE_LLM_PROVIDER  Provider used for OCR together with EDGEQUAKE_MODEL
  RUST_LOG                Overrides LOG_LEVEL / DEBUG with a full filter directive

  pdfium (~30 MB) is downloaded into ARTIFACTS_PATH on first start unless
  PDFIUM_LIB_PATH points at an existing copy. /health answers 503 until it is
  loaded.
"#;

/// Document conversion HTTP service.
#[derive(Parser, Debug)]
#[command(
    name = "docconvert-api",
    version,
    about = "Document conversion HTTP service: PDF, Markdown and text to markdown, json, doctags or text",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Reported by /health and used as the metrics prefix.
    #[arg(long, env = "SERVICE_NAME", default_value = "docconvert-api")]
    service_name: String,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Force debug logging.
    #[arg(long, env = "DEBUG", default_value_t = false, action = clap::ArgAction::Set,
          value_parser = clap::builder::BoolishValueParser::new())]
    debug: bool,

    /// Bind host.
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port.
    #[arg(short, long, env = "API_PORT", default_value_t = docconvert_api::config::DEFAULT_PORT)]
    port: u16,

    /// Directory where the pdfium library is cached (downloaded on first start).
    #[arg(long, env = "ARTIFACTS_PATH")]
    artifacts_path: Option<PathBuf>,

    /// Use this pdfium library instead of the artifact cache.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// PDF documents parsed at the same time.
    #[arg(long, env = "OMP_NUM_THREADS", default_value_t = 4)]
    threads: usize,

    /// Upload and download size limit in MB.
    #[arg(long, env = "MAX_FILE_SIZE_MB",
          default_value_t = docconvert_api::config::DEFAULT_MAX_FILE_SIZE_MB)]
    max_file_size_mb: u64,

    /// URL download timeout in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT",
          default_value_t = docconvert_api::config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,

    /// Serve /metrics.
    #[arg(long, env = "METRICS_ENABLED", default_value_t = true, action = clap::ArgAction::Set,
          value_parser = clap::builder::BoolishValueParser::new())]
    metrics_enabled: bool,

    /// Disable OCR entirely, even when a provider is configured.
    #[arg(long, env = "OCR_DISABLED")]
    no_ocr: bool,

    /// Vision LLM provider for OCR: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "OCR_PROVIDER")]
    ocr_provider: Option<String>,

    /// Vision LLM model for OCR.
    #[arg(long, env = "OCR_MODEL")]
    ocr_model: Option<String>,

    /// Concurrent OCR calls per document.
    #[arg(long, env = "OCR_CONCURRENCY", default_value_t = 4)]
    ocr_concurrency: usize,

    /// Retries per OCR page.
    #[arg(long, env = "OCR_MAX_RETRIES", default_value_t = 2)]
    ocr_max_retries: u32,
}

impl Cli {
    fn service_config(&self) -> Result<ServiceConfig> {
        ServiceConfig::builder()
            .service_name(&self.service_name)
            .host(&self.host)
            .port(self.port)
            .max_file_size_mb(self.max_file_size_mb)
            .request_timeout_secs(self.request_timeout)
            .metrics_enabled(self.metrics_enabled)
            .build()
            .context("invalid service configuration")
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        let mut builder = EngineConfig::builder()
            .ocr(!self.no_ocr)
            .parse_threads(self.threads)
            .ocr_concurrency(self.ocr_concurrency)
            .max_retries(self.ocr_max_retries);
        if let Some(ref dir) = self.artifacts_path {
            builder = builder.artifacts_path(dir);
        }
        if let Some(ref lib) = self.pdfium_lib_path {
            builder = builder.pdfium_lib_path(lib);
        }
        if let Some(ref provider) = self.ocr_provider {
            builder = builder.provider_name(provider);
        }
        if let Some(ref model) = self.ocr_model {
            builder = builder.model(model);
        }
        builder.build().context("invalid engine configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.debug { "debug" } else { cli.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let service = cli.service_config()?;
    let engine = cli.engine_config()?;
    run(service, engine).await
}

async fn run(service: ServiceConfig, engine_config: EngineConfig) -> Result<()> {
    tracing::info!(
        "Starting {} {} (max file size {} MB, download timeout {}s)",
        service.service_name,
        service.version,
        service.max_file_size_mb,
        service.request_timeout_secs
    );

    // Readiness flips once pdfium is bound; the listener is up before that.
    let engine = EngineHandle::new();
    engine.initialize_in_background(engine_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let host = service.host.clone();
    let port = service.port;
    let state = AppState::new(service, engine);
    ApiServer::new(&host, port, state, shutdown_rx)
        .serve()
        .await
        .context("server failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received ctrl-c"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
