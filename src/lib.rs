//! # docconvert-api
//!
//! HTTP document-conversion service. A client posts a document (by URL or as
//! a multipart upload) and gets it back as Markdown, JSON, DocTags or plain
//! text, plus health and Prometheus metrics endpoints for running it behind
//! a reverse proxy.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Validate  output_format, URL, size limit (before any work)
//!  ├─ 2. Resolve   download the URL or read the multipart file
//!  ├─ 3. Detect    magic bytes → extension → content type → UTF-8 sniff
//!  ├─ 4. Parse     DocumentConverter (pdfium text layer, optional VLM OCR,
//!  │               native Markdown / text parsers) → Document
//!  └─ 5. Export    markdown | json | doctags | text
//! ```
//!
//! The engine sits behind the [`DocumentConverter`] trait and is installed
//! once into an [`EngineHandle`] by a background startup task; `/health`
//! reports 503 until that has happened.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docconvert_api::{build_router, AppState, EngineConfig, EngineHandle, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineHandle::new();
//!     engine.initialize_in_background(EngineConfig::default());
//!
//!     let state = AppState::new(ServiceConfig::default(), engine);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//!     axum::serve(listener, build_router(state)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docconvert-api` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod engine;
pub mod error;
pub mod export;
pub mod format;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EngineConfig, EngineConfigBuilder, ServiceConfig, ServiceConfigBuilder};
pub use convert::{convert_upload, convert_url, ConvertResponse, DownloadLimits, ResponseMetadata};
pub use document::{Block, Document, DocumentMetadata, Page};
pub use engine::{
    ConversionOptions, ConversionResult, DocumentConverter, EngineHandle, NativeEngine,
    SourceDocument,
};
pub use error::{ConvertError, PageError};
pub use export::Payload;
pub use format::{InputFormat, OutputFormat, UnknownOutputFormat};
pub use metrics::Metrics;
pub use server::{build_router, ApiError, ApiServer, AppState, ServerError};
