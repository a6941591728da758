//! VLM OCR: send a rasterised page to a vision model and get Markdown back.
//!
//! Only pages without a text layer come through here. Prompt text lives in
//! [`crate::prompts`]; this module owns the message layout and the retry
//! loop.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! keeps concurrent workers from retrying in lockstep: with 500 ms base and
//! 2 retries the wait sequence is 500 ms → 1 s.

use crate::config::EngineConfig;
use crate::error::PageError;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Retry and sampling settings for one document's OCR calls.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrSettings {
    pub temperature: f32,
    pub max_tokens: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl From<&EngineConfig> for OcrSettings {
    fn from(c: &EngineConfig) -> Self {
        Self {
            temperature: c.temperature,
            max_tokens: c.max_tokens,
            max_retries: c.max_retries,
            retry_backoff_ms: c.retry_backoff_ms,
        }
    }
}

/// Transcribe one page image, returning the raw model output.
///
/// The request is a system message with the prompt followed by a user turn
/// carrying only the image.
pub async fn process_page(
    provider: &Arc<dyn LLMProvider>,
    page_no: usize,
    image_data: ImageData,
    system_prompt: &str,
    settings: &OcrSettings,
) -> Result<String, PageError> {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images("", vec![image_data]),
    ];
    let options = build_options(settings);

    let mut last_err: Option<String> = None;

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = settings.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: OCR retry {}/{} after {}ms",
                page_no, attempt, settings.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_no,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                return Ok(response.content);
            }
            Err(e) => {
                let err_msg = format!("{}", e);
                warn!("Page {}: OCR attempt {} failed: {}", page_no, attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(PageError::OcrFailed {
        page: page_no,
        retries: settings.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

fn build_options(settings: &OcrSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FlakyProvider;
    use super::*;

    fn fast_settings(max_retries: u32) -> OcrSettings {
        OcrSettings {
            max_retries,
            retry_backoff_ms: 1,
            ..OcrSettings::from(&EngineConfig::default())
        }
    }

    fn image() -> ImageData {
        ImageData::new("iVBORw0KGgo=", "image/png")
    }

    #[tokio::test]
    async fn retries_after_transient_failure() {
        let flaky = Arc::new(FlakyProvider::new(1, "# Scanned"));
        let provider: Arc<dyn LLMProvider> = flaky.clone();
        let out = process_page(&provider, 3, image(), "prompt", &fast_settings(2))
            .await
            .unwrap();
        assert_eq!(out, "# Scanned");
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let flaky = Arc::new(FlakyProvider::new(usize::MAX, "unused"));
        let provider: Arc<dyn LLMProvider> = flaky.clone();
        let err = process_page(&provider, 7, image(), "prompt", &fast_settings(1))
            .await
            .unwrap_err();
        assert_eq!(flaky.calls(), 2);
        match err {
            PageError::OcrFailed {
                page,
                retries,
                detail,
            } => {
                assert_eq!(page, 7);
                assert_eq!(retries, 1);
                assert!(detail.contains("slow down"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn settings_from_engine_config() {
        let settings = OcrSettings::from(&EngineConfig::default());
        assert_eq!(settings.max_retries, 2);
        let opts = build_options(&settings);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }
}
