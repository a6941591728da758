//! PDF access through pdfium: text layer, font sizes, metadata and page
//! rasterisation.
//!
//! Everything here is blocking and runs on the blocking pool. Each job holds
//! an [`OwnedSemaphorePermit`] from the engine until pdfium is done with it,
//! so at most `OMP_NUM_THREADS` documents are inside pdfium at once while
//! the rest of the blocking pool (DNS lookups, file I/O) stays free. The
//! `thread_safe` feature of `pdfium-render` serialises access to the bound
//! library, so one [`Pdfium`] is shared by every request.
//!
//! Text extraction and rasterisation are separate jobs: pages that need OCR
//! are rendered a few at a time by [`render_pages`] instead of all at once.

use crate::document::DocumentMetadata;
use crate::error::{ConvertError, PageError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

/// One line of the text layer and the largest font size seen on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub font_size: f32,
}

/// Text layer of one PDF page.
#[derive(Debug)]
pub struct RawPage {
    /// 1-indexed.
    pub page_no: usize,
    pub lines: Vec<TextLine>,
}

impl RawPage {
    pub fn has_text(&self) -> bool {
        self.lines.iter().any(|l| !l.text.trim().is_empty())
    }
}

/// Everything read from a PDF in one pass.
#[derive(Debug)]
pub struct PdfContent {
    pub metadata: DocumentMetadata,
    pub pages: Vec<RawPage>,
}

/// A rendered page, or why it could not be rendered.
pub type RenderedPage = (usize, Result<DynamicImage, PageError>);

/// Read metadata and the text layer of every page on the blocking pool.
pub async fn extract_pdf(
    pdfium: Arc<Pdfium>,
    bytes: Arc<[u8]>,
    name: String,
    permit: OwnedSemaphorePermit,
) -> Result<PdfContent, ConvertError> {
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        extract_blocking(&pdfium, &bytes, &name)
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("PDF task panicked: {}", e)))?
}

/// Blocking implementation of [`extract_pdf`].
pub fn extract_blocking(
    pdfium: &Pdfium,
    bytes: &[u8],
    name: &str,
) -> Result<PdfContent, ConvertError> {
    let document = load(pdfium, bytes, name)?;

    let metadata = read_metadata(&document);
    info!("PDF loaded: '{}' with {} pages", name, metadata.page_count);

    let mut pages = Vec::with_capacity(metadata.page_count);
    for (idx, page) in document.pages().iter().enumerate() {
        let page_no = idx + 1;
        let lines = match read_lines(&page) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Page {}: text layer unreadable: {:?}", page_no, e);
                Vec::new()
            }
        };
        pages.push(RawPage { page_no, lines });
    }

    Ok(PdfContent { metadata, pages })
}

/// Rasterise `page_nos` (1-indexed) on the blocking pool, longest edge
/// capped at `max_px`.
pub async fn render_pages(
    pdfium: Arc<Pdfium>,
    bytes: Arc<[u8]>,
    name: String,
    page_nos: Vec<usize>,
    max_px: u32,
    permit: OwnedSemaphorePermit,
) -> Result<Vec<RenderedPage>, ConvertError> {
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        render_blocking(&pdfium, &bytes, &name, &page_nos, max_px)
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("PDF render task panicked: {}", e)))?
}

/// Blocking implementation of [`render_pages`].
pub fn render_blocking(
    pdfium: &Pdfium,
    bytes: &[u8],
    name: &str,
    page_nos: &[usize],
    max_px: u32,
) -> Result<Vec<RenderedPage>, ConvertError> {
    let document = load(pdfium, bytes, name)?;
    let config = PdfRenderConfig::new()
        .set_target_width(max_px as i32)
        .set_maximum_height(max_px as i32);

    let pages = document.pages();
    let rendered = page_nos
        .iter()
        .map(|&page_no| {
            let result = page_no
                .checked_sub(1)
                .and_then(|idx| u16::try_from(idx).ok())
                .ok_or(PdfiumError::PageIndexOutOfBounds)
                .and_then(|idx| pages.get(idx))
                .and_then(|page| {
                    let image = page.render_with_config(&config)?.as_image();
                    debug!(
                        "Rendered page {} → {}x{} px",
                        page_no,
                        image.width(),
                        image.height()
                    );
                    Ok(image)
                })
                .map_err(|e| PageError::RenderFailed {
                    page: page_no,
                    detail: format!("{:?}", e),
                });
            (page_no, result)
        })
        .collect();
    Ok(rendered)
}

fn load<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
    name: &str,
) -> Result<PdfDocument<'a>, ConvertError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| map_load_error(name, e))
}

/// Group the page's characters into lines, tracking the largest font size.
///
/// pdfium inserts generated `\r\n` characters at line ends, which is what
/// splits lines here.
fn read_lines(page: &PdfPage<'_>) -> Result<Vec<TextLine>, PdfiumError> {
    let text = page.text()?;
    let mut lines = Vec::new();
    let mut current = TextLine {
        text: String::new(),
        font_size: 0.0,
    };

    for ch in text.chars().iter() {
        let Some(c) = ch.unicode_char() else {
            continue;
        };
        match c {
            '\r' => {}
            '\n' => {
                lines.push(std::mem::replace(
                    &mut current,
                    TextLine {
                        text: String::new(),
                        font_size: 0.0,
                    },
                ));
            }
            _ => {
                if !c.is_whitespace() {
                    current.font_size = current.font_size.max(ch.scaled_font_size().value);
                }
                current.text.push(c);
            }
        }
    }
    if !current.text.is_empty() {
        lines.push(current);
    }

    for line in &mut lines {
        let trimmed = line.text.trim_end().len();
        line.text.truncate(trimmed);
    }
    Ok(lines)
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        pdf_version: Some(format!("{:?}", document.version())),
        page_count: document.pages().len() as usize,
    }
}

fn map_load_error(name: &str, e: PdfiumError) -> ConvertError {
    let detail = format!("{:?}", e);
    if detail.contains("Password") || detail.contains("password") {
        ConvertError::PasswordRequired {
            name: name.to_string(),
        }
    } else {
        ConvertError::CorruptDocument {
            name: name.to_string(),
            detail,
        }
    }
}
