//! Input and output format selectors.
//!
//! [`OutputFormat`] is the closed set of representations a client may ask
//! for. [`InputFormat`] is what we *detected* about the uploaded or downloaded
//! bytes; detection never trusts the client-supplied name alone because a
//! renamed file is the most common kind of "corrupt" upload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Representation returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// GitHub-flavoured Markdown. (default)
    #[default]
    Markdown,
    /// The structured document model as JSON.
    Json,
    /// Tag-based structure markup (`<doctag>…</doctag>`).
    Doctags,
    /// Plain text without markup.
    Text,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Markdown,
        OutputFormat::Json,
        OutputFormat::Doctags,
        OutputFormat::Text,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Doctags => "doctags",
            OutputFormat::Text => "text",
        }
    }

    /// Comma-separated list for error messages.
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an output format selector is outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported output_format '{value}'. Supported values: {supported}")]
pub struct UnknownOutputFormat {
    pub value: String,
    pub supported: String,
}

impl FromStr for OutputFormat {
    type Err = UnknownOutputFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownOutputFormat {
                value: s.to_string(),
                supported: OutputFormat::supported_list(),
            })
    }
}

/// Detected format of the source bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Pdf,
    Markdown,
    Text,
    /// Office Open XML (docx/xlsx/pptx) — detected so the error names it.
    Ooxml,
    /// Legacy OLE2 compound documents (doc/xls/ppt).
    Ole,
    Html,
    Image,
    Unknown,
}

impl InputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            InputFormat::Pdf => "pdf",
            InputFormat::Markdown => "markdown",
            InputFormat::Text => "text",
            InputFormat::Ooxml => "ooxml",
            InputFormat::Ole => "ole",
            InputFormat::Html => "html",
            InputFormat::Image => "image",
            InputFormat::Unknown => "unknown",
        }
    }

    /// Detect the format from magic bytes, falling back to the file name and
    /// finally to UTF-8 sniffing.
    ///
    /// Binary signatures win over the extension: a PDF named `notes.txt` is
    /// still a PDF, and a ZIP named `report.pdf` is not.
    pub fn detect(bytes: &[u8], name: Option<&str>, content_type: Option<&str>) -> InputFormat {
        if let Some(f) = Self::from_magic(bytes) {
            return f;
        }
        if let Some(f) = name.and_then(Self::from_extension) {
            return f;
        }
        if let Some(f) = content_type.and_then(Self::from_content_type) {
            return f;
        }
        if looks_like_html(bytes) {
            return InputFormat::Html;
        }
        if std::str::from_utf8(bytes).is_ok() && !bytes.is_empty() {
            return InputFormat::Text;
        }
        InputFormat::Unknown
    }

    fn from_magic(bytes: &[u8]) -> Option<InputFormat> {
        // Some producers emit a BOM or whitespace before the header; pdfium
        // accepts a header anywhere in the first KiB.
        let head = &bytes[..bytes.len().min(1024)];
        if head.windows(5).any(|w| w == b"%PDF-") {
            return Some(InputFormat::Pdf);
        }
        match bytes {
            [0x50, 0x4B, 0x03, 0x04, ..] => Some(InputFormat::Ooxml),
            [0xD0, 0xCF, 0x11, 0xE0, ..] => Some(InputFormat::Ole),
            [0x89, b'P', b'N', b'G', ..] | [0xFF, 0xD8, 0xFF, ..] => Some(InputFormat::Image),
            [b'G', b'I', b'F', b'8', ..] => Some(InputFormat::Image),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(InputFormat::Image),
            _ => None,
        }
    }

    fn from_extension(name: &str) -> Option<InputFormat> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(InputFormat::Pdf),
            "md" | "markdown" => Some(InputFormat::Markdown),
            "txt" | "text" | "log" | "csv" => Some(InputFormat::Text),
            "docx" | "xlsx" | "pptx" => Some(InputFormat::Ooxml),
            "doc" | "xls" | "ppt" => Some(InputFormat::Ole),
            "html" | "htm" | "xhtml" => Some(InputFormat::Html),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "gif" | "bmp" => Some(InputFormat::Image),
            _ => None,
        }
    }

    fn from_content_type(ct: &str) -> Option<InputFormat> {
        let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match mime.as_str() {
            "application/pdf" => Some(InputFormat::Pdf),
            "text/markdown" | "text/x-markdown" => Some(InputFormat::Markdown),
            "text/plain" => Some(InputFormat::Text),
            "text/html" | "application/xhtml+xml" => Some(InputFormat::Html),
            m if m.starts_with("image/") => Some(InputFormat::Image),
            _ => None,
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    let head = head.trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}
