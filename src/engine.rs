//! The conversion engine boundary.
//!
//! Request handling only ever talks to [`DocumentConverter`]; the concrete
//! engine is installed once into an [`EngineHandle`] by a background startup
//! task. Until that happens (or forever, if initialisation fails) the handle
//! is empty and the service reports itself as not ready.

use crate::config::EngineConfig;
use crate::document::{Block, Document, DocumentMetadata, Page};
use crate::error::{ConvertError, PageError};
use crate::export::{self, Payload};
use crate::format::{InputFormat, OutputFormat};
use crate::pipeline::ocr::{self, OcrSettings};
use crate::pipeline::{encode, layout, pdf, postprocess};
use crate::prompts::ocr_system_prompt;
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use pdfium_render::prelude::Pdfium;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Default vision model when a provider is named without a model.
const DEFAULT_OCR_MODEL: &str = "gpt-4.1-nano";

/// Raw document bytes plus what we know about them.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Detected from the bytes, name and content type at construction.
    pub format: InputFormat,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, content_type: Option<String>) -> Self {
        let name = name.into();
        let format = InputFormat::detect(&bytes, Some(&name), content_type.as_deref());
        Self {
            name,
            bytes,
            content_type,
            format,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Per-request conversion switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub output_format: OutputFormat,
    /// OCR pages without a text layer.
    pub ocr_enabled: bool,
    /// Keep tables as tables; when off they are flattened into paragraphs.
    pub table_extraction: bool,
    /// Ask the OCR model for LaTeX formulas.
    pub formula_extraction: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Markdown,
            ocr_enabled: true,
            table_extraction: true,
            formula_extraction: true,
        }
    }
}

/// A parsed document and its rendering in the requested format.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub document: Document,
    pub payload: Payload,
}

/// Capability interface of a conversion engine.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Engine name reported by `/health` and in response metadata.
    fn name(&self) -> &str;

    /// Whether `format` can be parsed.
    fn supports(&self, format: InputFormat) -> bool;

    /// All input formats this engine parses, for error messages.
    fn supported_formats(&self) -> Vec<InputFormat>;

    /// Parse `source` into the document model.
    async fn parse(
        &self,
        source: SourceDocument,
        options: &ConversionOptions,
    ) -> Result<Document, ConvertError>;

    /// Check support, parse, then render to `options.output_format`.
    async fn convert(
        &self,
        source: SourceDocument,
        options: &ConversionOptions,
    ) -> Result<ConversionResult, ConvertError> {
        if !self.supports(source.format) {
            return Err(unsupported(&source, &self.supported_formats()));
        }
        let document = self.parse(source, options).await?;
        let payload = export::render(&document, options.output_format)
            .map_err(|e| ConvertError::Internal(format!("Export failed: {e}")))?;
        Ok(ConversionResult { document, payload })
    }
}

fn unsupported(source: &SourceDocument, supported: &[InputFormat]) -> ConvertError {
    ConvertError::UnsupportedFormat {
        name: source.name.clone(),
        detected: source.format.to_string(),
        supported: supported
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

// ── NativeEngine ─────────────────────────────────────────────────────────

/// Engine built on pdfium for PDFs, native parsers for Markdown and text,
/// and an optional vision LLM for pages without a text layer.
pub struct NativeEngine {
    pdfium: Option<Arc<Pdfium>>,
    /// One permit per PDF job allowed inside pdfium at a time.
    pdf_slots: Arc<Semaphore>,
    ocr_provider: Option<Arc<dyn LLMProvider>>,
    ocr_settings: OcrSettings,
    ocr_concurrency: usize,
    max_rendered_pixels: u32,
}

impl NativeEngine {
    /// Resolve (downloading on first start) and bind pdfium, then resolve
    /// the OCR provider.
    ///
    /// Fails when pdfium cannot be loaded or when an explicitly named OCR
    /// provider cannot be created. A provider that simply is not configured
    /// disables OCR instead.
    pub async fn initialize(config: &EngineConfig) -> Result<Self, ConvertError> {
        let mut locator = match config.artifacts_path {
            Some(ref root) => pdfium_auto::PdfiumLocator::new(root),
            None => pdfium_auto::PdfiumLocator::default(),
        };
        if let Some(ref lib) = config.pdfium_lib_path {
            locator = locator.with_library_path(lib);
        }

        info!("Resolving pdfium library in {}", locator.cache_dir().display());
        let pdfium = tokio::task::spawn_blocking(move || {
            let progress = |downloaded: u64, total: Option<u64>| {
                debug!("pdfium download: {} / {:?} bytes", downloaded, total);
            };
            locator.bind(Some(&progress))
        })
        .await
        .map_err(|e| ConvertError::Internal(format!("pdfium init task panicked: {e}")))?
        .map_err(|e| ConvertError::EngineInit(e.to_string()))?;

        let ocr_provider = if config.ocr {
            resolve_provider(config)?
        } else {
            None
        };
        match ocr_provider {
            Some(_) => info!(
                "OCR enabled (provider: {}, model: {})",
                config.provider_name.as_deref().unwrap_or("auto"),
                config.model.as_deref().unwrap_or("default")
            ),
            None => info!("OCR disabled: pages without a text layer will be reported as warnings"),
        }

        Ok(Self {
            pdfium: Some(Arc::new(pdfium)),
            pdf_slots: Arc::new(Semaphore::new(config.parse_threads.max(1))),
            ocr_provider,
            ocr_settings: OcrSettings::from(config),
            ocr_concurrency: config.ocr_concurrency.max(1),
            max_rendered_pixels: config.max_rendered_pixels,
        })
    }

    /// An engine without pdfium or OCR: Markdown and plain text only.
    pub fn text_only() -> Self {
        let config = EngineConfig::default();
        Self {
            pdfium: None,
            pdf_slots: Arc::new(Semaphore::new(config.parse_threads)),
            ocr_provider: None,
            ocr_settings: OcrSettings::from(&config),
            ocr_concurrency: config.ocr_concurrency,
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }

    /// Replace the OCR provider.
    pub fn with_ocr_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.ocr_provider = Some(provider);
        self
    }

    pub fn ocr_available(&self) -> bool {
        self.ocr_provider.is_some()
    }

    fn parse_text(
        &self,
        source: &SourceDocument,
        parser: fn(&str) -> Vec<Block>,
    ) -> Result<Document, ConvertError> {
        let text = std::str::from_utf8(&source.bytes).map_err(|e| ConvertError::CorruptDocument {
            name: source.name.clone(),
            detail: format!("not valid UTF-8: {e}"),
        })?;
        let blocks = parser(text);
        Ok(Document {
            name: source.name.clone(),
            input_format: source.format,
            metadata: DocumentMetadata {
                page_count: 1,
                ..Default::default()
            },
            pages: vec![Page {
                page_no: 1,
                blocks,
                ocr: false,
            }],
            warnings: Vec::new(),
        })
    }

    async fn pdf_slot(&self) -> Result<OwnedSemaphorePermit, ConvertError> {
        Arc::clone(&self.pdf_slots)
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::Internal("PDF worker slots closed".to_string()))
    }

    async fn parse_pdf(
        &self,
        pdfium: Arc<Pdfium>,
        source: SourceDocument,
        options: &ConversionOptions,
    ) -> Result<Document, ConvertError> {
        let ocr_provider = self.ocr_provider.as_ref().filter(|_| options.ocr_enabled);
        let name = source.name.clone();
        let bytes: Arc<[u8]> = source.bytes.into();
        let permit = self.pdf_slot().await?;
        let content =
            pdf::extract_pdf(Arc::clone(&pdfium), Arc::clone(&bytes), name.clone(), permit).await?;

        let body_size = layout::body_font_size(content.pages.iter().flat_map(|p| p.lines.iter()));
        debug!("Body font size: {:.1}pt", body_size);

        let mut pages = Vec::with_capacity(content.pages.len());
        let mut warnings = Vec::new();
        let mut scanned = Vec::new();
        let mut title_allowed = true;

        for raw in content.pages {
            let page_no = raw.page_no;
            let mut page = Page {
                page_no,
                blocks: Vec::new(),
                ocr: false,
            };
            if raw.has_text() {
                page.blocks = layout::blocks_from_lines(&raw.lines, body_size, title_allowed);
                title_allowed = false;
            } else if ocr_provider.is_some() {
                scanned.push(page_no);
            } else {
                warnings.push(PageError::NoTextLayer {
                    page: page_no,
                    reason: if options.ocr_enabled {
                        "unavailable".to_string()
                    } else {
                        "disabled".to_string()
                    },
                });
            }
            pages.push(page);
        }

        if let (Some(provider), false) = (ocr_provider, scanned.is_empty()) {
            info!("OCR of {} page(s) without a text layer", scanned.len());
            let prompt = ocr_system_prompt(options.table_extraction, options.formula_extraction);
            // Render one batch at a time so at most `ocr_concurrency` bitmaps are alive.
            for batch in scanned.chunks(self.ocr_concurrency) {
                let permit = self.pdf_slot().await?;
                let rendered = pdf::render_pages(
                    Arc::clone(&pdfium),
                    Arc::clone(&bytes),
                    name.clone(),
                    batch.to_vec(),
                    self.max_rendered_pixels,
                    permit,
                )
                .await?;
                let results = self.ocr_pages(provider, rendered, &prompt).await;
                merge_ocr(&mut pages, &mut warnings, results);
            }
        }

        keep_single_title(&mut pages);

        let document = Document {
            name: name.clone(),
            input_format: InputFormat::Pdf,
            metadata: content.metadata,
            pages,
            warnings,
        };

        if document.is_empty() {
            return Err(ConvertError::NoExtractableText {
                name,
                hint: self.empty_hint(options, &document.warnings),
            });
        }
        Ok(document)
    }

    /// Encode and transcribe rendered pages, `ocr_concurrency` at a time.
    /// Results come back in completion order.
    async fn ocr_pages(
        &self,
        provider: &Arc<dyn LLMProvider>,
        rendered: Vec<pdf::RenderedPage>,
        prompt: &str,
    ) -> Vec<(usize, Result<Vec<Block>, PageError>)> {
        stream::iter(rendered.into_iter().map(|(page_no, image)| {
            let provider = Arc::clone(provider);
            let settings = self.ocr_settings.clone();
            async move {
                let image = match image {
                    Ok(image) => image,
                    Err(e) => return (page_no, Err(e)),
                };
                let image_data = match encode::encode_page(&image) {
                    Ok(data) => data,
                    Err(e) => {
                        return (
                            page_no,
                            Err(PageError::RenderFailed {
                                page: page_no,
                                detail: format!("Image encoding failed: {e}"),
                            }),
                        )
                    }
                };
                drop(image);
                let result = ocr::process_page(&provider, page_no, image_data, prompt, &settings)
                    .await
                    .map(|raw| layout::parse_markdown(&postprocess::clean_markdown(&raw)));
                (page_no, result)
            }
        }))
        .buffer_unordered(self.ocr_concurrency)
        .collect()
        .await
    }

    fn empty_hint(&self, options: &ConversionOptions, warnings: &[PageError]) -> String {
        if !options.ocr_enabled {
            "the document has no text layer and OCR was disabled for this request".to_string()
        } else if !self.ocr_available() {
            "the document has no text layer and no OCR provider is configured".to_string()
        } else if let Some(first) = warnings.first() {
            format!("OCR produced no text ({first})")
        } else {
            "OCR produced no text".to_string()
        }
    }
}

#[async_trait]
impl DocumentConverter for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    fn supports(&self, format: InputFormat) -> bool {
        match format {
            InputFormat::Markdown | InputFormat::Text => true,
            InputFormat::Pdf => self.pdfium.is_some(),
            _ => false,
        }
    }

    fn supported_formats(&self) -> Vec<InputFormat> {
        [InputFormat::Pdf, InputFormat::Markdown, InputFormat::Text]
            .into_iter()
            .filter(|f| self.supports(*f))
            .collect()
    }

    async fn parse(
        &self,
        source: SourceDocument,
        options: &ConversionOptions,
    ) -> Result<Document, ConvertError> {
        if source.is_empty() {
            return Err(ConvertError::CorruptDocument {
                name: source.name,
                detail: "file is empty".to_string(),
            });
        }

        let mut document = match (source.format, self.pdfium.as_ref()) {
            (InputFormat::Markdown, _) => self.parse_text(&source, layout::parse_markdown)?,
            (InputFormat::Text, _) => self.parse_text(&source, layout::parse_plain_text)?,
            (InputFormat::Pdf, Some(pdfium)) => {
                self.parse_pdf(Arc::clone(pdfium), source, options).await?
            }
            _ => return Err(unsupported(&source, &self.supported_formats())),
        };

        if !options.table_extraction {
            for page in &mut document.pages {
                page.blocks = std::mem::take(&mut page.blocks)
                    .into_iter()
                    .flat_map(Block::flatten_table)
                    .collect();
            }
        }

        if document.is_empty() {
            return Err(ConvertError::NoExtractableText {
                name: document.name,
                hint: "the document contains only whitespace".to_string(),
            });
        }

        debug!(
            "Parsed '{}': {} page(s), {} block(s), {} warning(s)",
            document.name,
            document.pages.len(),
            document.block_count(),
            document.warnings.len()
        );
        Ok(document)
    }
}

/// Put OCR output into its page and turn failures into warnings, keeping
/// warnings in page order.
fn merge_ocr(
    pages: &mut [Page],
    warnings: &mut Vec<PageError>,
    results: Vec<(usize, Result<Vec<Block>, PageError>)>,
) {
    for (page_no, result) in results {
        match result {
            Ok(blocks) => {
                if let Some(page) = pages.iter_mut().find(|p| p.page_no == page_no) {
                    page.blocks = blocks;
                    page.ocr = true;
                }
            }
            Err(err) => warnings.push(err),
        }
    }
    warnings.sort_by_key(page_of);
}

fn page_of(err: &PageError) -> usize {
    match err {
        PageError::RenderFailed { page, .. }
        | PageError::OcrFailed { page, .. }
        | PageError::NoTextLayer { page, .. } => *page,
    }
}

/// Demote every title after the first to a top-level section header.
fn keep_single_title(pages: &mut [Page]) {
    let mut seen = false;
    for block in pages.iter_mut().flat_map(|p| p.blocks.iter_mut()) {
        let demoted = match block {
            Block::Title { text } if seen => Some(std::mem::take(text)),
            Block::Title { .. } => {
                seen = true;
                None
            }
            _ => None,
        };
        if let Some(text) = demoted {
            *block = Block::SectionHeader { level: 1, text };
        }
    }
}

/// Resolve the OCR provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **Named provider** (`OCR_PROVIDER` + optional `OCR_MODEL`) — created
///    through [`ProviderFactory`]; failure here is an initialisation error.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Auto-detection** (`ProviderFactory::from_env`), attempted only when
///    a provider API key is present in the environment.
///
/// Returns `Ok(None)` when nothing is configured.
fn resolve_provider(config: &EngineConfig) -> Result<Option<Arc<dyn LLMProvider>>, ConvertError> {
    if let Some(ref provider) = config.provider {
        return Ok(Some(Arc::clone(provider)));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_OCR_MODEL);
    if let Some(ref name) = config.provider_name {
        return ProviderFactory::create_llm_provider(name, model)
            .map(Some)
            .map_err(|e| ConvertError::EngineInit(format!("OCR provider '{name}': {e}")));
    }

    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    if let (Some(prov), Some(model)) = (env("EDGEQUAKE_LLM_PROVIDER"), env("EDGEQUAKE_MODEL")) {
        return ProviderFactory::create_llm_provider(&prov, &model)
            .map(Some)
            .map_err(|e| ConvertError::EngineInit(format!("OCR provider '{prov}': {e}")));
    }

    if env("OPENAI_API_KEY").is_some() {
        return ProviderFactory::create_llm_provider("openai", model)
            .map(Some)
            .map_err(|e| ConvertError::EngineInit(format!("OCR provider 'openai': {e}")));
    }

    let any_key = ["ANTHROPIC_API_KEY", "GEMINI_API_KEY", "MISTRAL_API_KEY"]
        .iter()
        .any(|k| env(k).is_some());
    if !any_key {
        return Ok(None);
    }

    match ProviderFactory::from_env() {
        Ok((llm, _embedding)) => Ok(Some(llm)),
        Err(e) => {
            warn!("OCR provider auto-detection failed: {}", e);
            Ok(None)
        }
    }
}

// ── EngineHandle ─────────────────────────────────────────────────────────

/// Shared, write-once slot for the engine.
///
/// Readers never block: before installation [`EngineHandle::get`] is `None`.
#[derive(Clone, Default)]
pub struct EngineHandle {
    engine: Arc<OnceLock<Arc<dyn DocumentConverter>>>,
    failure: Arc<OnceLock<String>>,
}

impl EngineHandle {
    /// An empty handle: not ready until [`install`](Self::install) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is ready immediately.
    pub fn ready(engine: Arc<dyn DocumentConverter>) -> Self {
        let handle = Self::new();
        handle.install(engine);
        handle
    }

    /// Install the engine. Returns false if one was already installed.
    pub fn install(&self, engine: Arc<dyn DocumentConverter>) -> bool {
        self.engine.set(engine).is_ok()
    }

    /// Record a terminal initialisation failure.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.failure.set(reason.into());
    }

    pub fn get(&self) -> Option<Arc<dyn DocumentConverter>> {
        self.engine.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.engine.get().is_some()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    pub fn engine_name(&self) -> Option<String> {
        self.engine.get().map(|e| e.name().to_string())
    }

    /// Initialise a [`NativeEngine`] on a background task and install it.
    pub fn initialize_in_background(&self, config: EngineConfig) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            match NativeEngine::initialize(&config).await {
                Ok(engine) => {
                    handle.install(Arc::new(engine));
                    info!("Document converter initialized successfully");
                }
                Err(e) => {
                    error!("Failed to initialize document converter: {}", e);
                    handle.fail(e.to_string());
                }
            }
        })
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine_name())
            .field("failure", &self.failure())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::test_support::FlakyProvider;

    fn opts(format: OutputFormat) -> ConversionOptions {
        ConversionOptions {
            output_format: format,
            ..Default::default()
        }
    }

    #[test]
    fn source_detects_format() {
        let src = SourceDocument::new("notes.md", b"# Notes".to_vec(), None);
        assert_eq!(src.format, InputFormat::Markdown);
        let src = SourceDocument::new("scan.pdf", b"%PDF-1.4\n".to_vec(), None);
        assert_eq!(src.format, InputFormat::Pdf);
    }

    #[tokio::test]
    async fn markdown_round_trip_through_engine() {
        let engine = NativeEngine::text_only();
        let src = SourceDocument::new("guide.md", b"# Guide\n\nHello *world*.\n".to_vec(), None);
        let result = engine.convert(src, &opts(OutputFormat::Markdown)).await.unwrap();
        assert_eq!(result.payload, Payload::Text("# Guide\n\nHello *world*.\n".into()));
        assert_eq!(result.document.metadata.page_count, 1);
    }

    #[tokio::test]
    async fn text_only_engine_rejects_pdf() {
        let engine = NativeEngine::text_only();
        let src = SourceDocument::new("paper.pdf", b"%PDF-1.7\n...".to_vec(), None);
        let err = engine.convert(src, &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
        assert!(err.to_string().contains("markdown, text"));
    }

    #[tokio::test]
    async fn office_documents_are_unsupported() {
        let engine = NativeEngine::text_only();
        let src = SourceDocument::new("deck.pptx", vec![0x50, 0x4B, 0x03, 0x04, 1, 2], None);
        let err = engine.convert(src, &ConversionOptions::default()).await.unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedFormat { ref detected, .. } if detected == "ooxml"));
    }

    #[tokio::test]
    async fn whitespace_only_is_no_extractable_text() {
        let engine = NativeEngine::text_only();
        let src = SourceDocument::new("blank.txt", b"   \n\n ".to_vec(), None);
        let err = engine.convert(src, &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), "no_extractable_text");
    }

    #[tokio::test]
    async fn invalid_utf8_markdown_is_corrupt() {
        let engine = NativeEngine::text_only();
        let src = SourceDocument::new("broken.md", vec![b'#', b' ', 0xFF, 0xFE], None);
        let err = engine.convert(src, &ConversionOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), "corrupt_document");
    }

    #[tokio::test]
    async fn table_extraction_off_flattens_tables() {
        let engine = NativeEngine::text_only();
        let md = b"| a | b |\n|---|---|\n| 1 | 2 |\n".to_vec();
        let options = ConversionOptions {
            output_format: OutputFormat::Text,
            table_extraction: false,
            ..Default::default()
        };
        let result = engine
            .convert(SourceDocument::new("t.md", md, None), &options)
            .await
            .unwrap();
        assert_eq!(result.payload, Payload::Text("a b\n\n1 2\n".into()));
    }

    #[test]
    fn later_titles_are_demoted() {
        let mut pages = vec![Page {
            page_no: 1,
            ocr: false,
            blocks: vec![
                Block::Title { text: "A".into() },
                Block::Title { text: "B".into() },
            ],
        }];
        keep_single_title(&mut pages);
        assert_eq!(
            pages[0].blocks[1],
            Block::SectionHeader {
                level: 1,
                text: "B".into()
            }
        );
    }

    // ── OCR ──────────────────────────────────────────────────────────────

    fn ocr_engine(provider: Arc<dyn LLMProvider>) -> NativeEngine {
        let mut engine = NativeEngine::text_only().with_ocr_provider(provider);
        engine.ocr_settings.retry_backoff_ms = 1;
        engine.ocr_settings.max_retries = 1;
        engine
    }

    fn blank_pages(n: usize) -> Vec<Page> {
        (1..=n)
            .map(|page_no| Page {
                page_no,
                blocks: Vec::new(),
                ocr: false,
            })
            .collect()
    }

    fn scan() -> image::DynamicImage {
        image::DynamicImage::new_rgb8(16, 16)
    }

    #[tokio::test]
    async fn ocr_fills_scanned_pages_after_retry() {
        let flaky = Arc::new(FlakyProvider::new(1, "## Scanned heading\n\nScanned body."));
        let engine = ocr_engine(flaky.clone());
        assert!(engine.ocr_available());

        let mut pages = blank_pages(3);
        pages[0].blocks.push(Block::paragraph("Typed text."));
        let rendered = vec![
            (2, Ok(scan())),
            (
                3,
                Err(PageError::RenderFailed {
                    page: 3,
                    detail: "bitmap".into(),
                }),
            ),
        ];

        let results = engine.ocr_pages(&(flaky.clone() as Arc<dyn LLMProvider>), rendered, "p").await;
        let mut warnings = Vec::new();
        merge_ocr(&mut pages, &mut warnings, results);

        assert_eq!(flaky.calls(), 2);
        assert_eq!(pages.iter().map(|p| p.page_no).collect::<Vec<_>>(), [1, 2, 3]);
        assert!(!pages[0].ocr);
        assert!(pages[1].ocr);
        assert_eq!(pages[1].blocks.last(), Some(&Block::paragraph("Scanned body.")));
        assert!(!pages[2].ocr && pages[2].blocks.is_empty());
        assert!(matches!(warnings.as_slice(), [PageError::RenderFailed { page: 3, .. }]));
    }

    #[tokio::test]
    async fn ocr_failures_become_ordered_warnings() {
        let flaky = Arc::new(FlakyProvider::new(usize::MAX, "unused"));
        let engine = ocr_engine(flaky.clone());

        let mut pages = blank_pages(4);
        let rendered = vec![(4, Ok(scan())), (2, Ok(scan())), (3, Ok(scan()))];
        let results = engine.ocr_pages(&(flaky.clone() as Arc<dyn LLMProvider>), rendered, "p").await;
        let mut warnings = vec![PageError::NoTextLayer {
            page: 1,
            reason: "unavailable".into(),
        }];
        merge_ocr(&mut pages, &mut warnings, results);

        // one attempt plus one retry per page
        assert_eq!(flaky.calls(), 6);
        assert!(pages.iter().all(|p| !p.ocr && p.blocks.is_empty()));
        assert_eq!(warnings.iter().map(page_of).collect::<Vec<_>>(), [1, 2, 3, 4]);
        assert!(warnings[1..]
            .iter()
            .all(|w| matches!(w, PageError::OcrFailed { retries: 1, .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pdf_slots_leave_blocking_pool_free() {
        let mut engine = NativeEngine::text_only();
        engine.pdf_slots = Arc::new(Semaphore::new(1));

        let permit = engine.pdf_slot().await.unwrap();
        let parse = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            std::thread::sleep(std::time::Duration::from_millis(500));
        });

        let second = tokio::time::timeout(std::time::Duration::from_millis(100), engine.pdf_slot()).await;
        assert!(second.is_err(), "second PDF job must wait for a slot");

        let lookup = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            tokio::net::lookup_host("localhost:80"),
        )
        .await;
        assert!(lookup.is_ok(), "DNS on the blocking pool must not wait for PDF work");

        parse.await.unwrap();
        assert!(engine.pdf_slot().await.is_ok());
    }

    #[test]
    fn empty_hint_reflects_provider() {
        let options = ConversionOptions::default();
        assert!(NativeEngine::text_only()
            .empty_hint(&options, &[])
            .contains("no OCR provider"));
        let engine = ocr_engine(Arc::new(FlakyProvider::new(0, "x")));
        assert_eq!(engine.empty_hint(&options, &[]), "OCR produced no text");
    }

    #[test]
    fn handle_installs_once() {
        let handle = EngineHandle::new();
        assert!(!handle.is_ready());
        assert!(handle.get().is_none());
        assert!(handle.install(Arc::new(NativeEngine::text_only())));
        assert!(!handle.install(Arc::new(NativeEngine::text_only())));
        assert!(handle.is_ready());
        assert_eq!(handle.engine_name().as_deref(), Some("native"));
    }

    #[test]
    fn handle_records_failure() {
        let handle = EngineHandle::new();
        handle.fail("pdfium missing");
        handle.fail("second");
        assert_eq!(handle.failure(), Some("pdfium missing"));
        assert!(!handle.is_ready());
    }
}
