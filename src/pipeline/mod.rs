//! Stages of the native conversion engine.
//!
//! Each submodule implements exactly one transformation step so it can be
//! tested without the others.
//!
//! ## Data Flow
//!
//! ```text
//!                         ┌─ text layer ─▶ layout ─────────────────────────┐
//! input ──▶ pdf (pdfium) ─┤                                                ├─▶ Document
//! (URL)     spawn_blocking└─ no text ──▶ encode ──▶ ocr ──▶ postprocess ──▶ layout
//! ```
//!
//! 1. [`input`]  — validate and download URL sources under the size limit
//! 2. [`pdf`]    — text lines with font sizes, metadata, rasterisation of
//!    pages without a text layer; runs in `spawn_blocking`
//! 3. [`layout`] — lines or Markdown into structural blocks
//! 4. [`encode`] — PNG-encode and base64-wrap page images
//! 5. [`ocr`]    — VLM call with retry/backoff; the only stage besides
//!    `input` with network I/O
//! 6. [`postprocess`] — deterministic cleanup of VLM output

pub mod encode;
pub mod input;
pub mod layout;
pub mod ocr;
pub mod pdf;
pub mod postprocess;
