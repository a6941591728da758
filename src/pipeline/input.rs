//! Input resolution: fetch a URL source into memory.
//!
//! pdfium loads documents from byte slices, so nothing touches the disk.
//! The size limit is enforced twice: against the declared `Content-Length`
//! before reading, and against the running total while streaming, so a
//! server that lies about (or omits) the length cannot push us past it.

use crate::error::ConvertError;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};

/// Bytes of a document fetched from a URL.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    /// File name from `Content-Disposition` or the last URL path segment.
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Parse `input` as an absolute HTTP(S) URL with a host.
pub fn validate_url(input: &str) -> Result<Url, ConvertError> {
    let invalid = || ConvertError::InvalidUrl {
        input: input.to_string(),
    };
    let trimmed = input.trim();
    if !is_url(trimmed) {
        return Err(invalid());
    }
    let url = Url::parse(trimmed).map_err(|_| invalid())?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }
    Ok(url)
}

/// Download `url`, failing with [`ConvertError::FileTooLarge`] as soon as
/// more than `max_bytes` have been received.
pub async fn download_url(
    url: &Url,
    max_bytes: u64,
    timeout_secs: u64,
) -> Result<FetchedSource, ConvertError> {
    info!("Downloading document from: {}", url);

    let limit_mb = max_bytes / (1024 * 1024);
    let url_str = url.to_string();
    let failed = |reason: String| ConvertError::DownloadFailed {
        url: url_str.clone(),
        reason,
    };
    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ConvertError::DownloadTimeout {
                url: url_str.clone(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("docconvert-api/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url.clone()).send().await.map_err(map_err)?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(ConvertError::FileTooLarge { limit_mb });
    }

    let name = extract_filename(url, response.headers());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_err)?;
        if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
            return Err(ConvertError::FileTooLarge { limit_mb });
        }
        bytes.extend_from_slice(&chunk);
    }

    debug!("Downloaded {} bytes as '{}'", bytes.len(), name);

    Ok(FetchedSource {
        name,
        bytes,
        content_type,
    })
}

/// Extract a file name from `Content-Disposition`, then the URL path.
fn extract_filename(url: &Url, headers: &HeaderMap) -> String {
    if let Some(name) = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename)
    {
        return name;
    }

    if let Some(last) = url.path_segments().and_then(|mut s| s.next_back()) {
        if !last.is_empty() {
            return last.to_string();
        }
    }

    "document".to_string()
}

fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let (key, val) = part.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = val.trim().trim_matches('"');
        // Keep only the final path component.
        let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        (!name.is_empty()).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn validate_rejects_non_http() {
        assert!(validate_url("ftp://example.com/a.pdf").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("http://").is_err());
        let url = validate_url(" https://arxiv.org/pdf/1706.03762 ").unwrap();
        assert_eq!(url.host_str(), Some("arxiv.org"));
    }

    #[test]
    fn filename_from_path() {
        let url = Url::parse("https://example.org/papers/attention.pdf?dl=1").unwrap();
        assert_eq!(extract_filename(&url, &HeaderMap::new()), "attention.pdf");

        let bare = Url::parse("https://example.org/").unwrap();
        assert_eq!(extract_filename(&bare, &HeaderMap::new()), "document");
    }

    #[test]
    fn filename_from_content_disposition() {
        let url = Url::parse("https://example.org/download/42").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"../report.pdf\""),
        );
        assert_eq!(extract_filename(&url, &headers), "report.pdf");
    }
}
