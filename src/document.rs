//! Engine-neutral document model.
//!
//! Every input format is parsed into a [`Document`]: an ordered list of pages,
//! each an ordered list of [`Block`]s. Exporters in [`crate::export`] only
//! ever see this model, so adding an input format never touches output code
//! and vice versa.

use crate::error::PageError;
use crate::format::InputFormat;
use serde::{Deserialize, Serialize};

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Source name (file name or last URL path segment).
    pub name: String,
    pub input_format: InputFormat,
    pub metadata: DocumentMetadata,
    pub pages: Vec<Page>,
    /// Non-fatal per-page problems encountered while parsing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PageError>,
}

/// Document-level metadata. PDF info-dictionary fields are `None` for
/// formats that have no such dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_version: Option<String>,
    pub page_count: usize,
}

/// One page of content. Non-paginated inputs produce a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number.
    pub page_no: usize,
    pub blocks: Vec<Block>,
    /// True when the page content came from OCR rather than a text layer.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ocr: bool,
}

/// A structural element of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Title {
        text: String,
    },
    /// `level` starts at 1 for top-level sections.
    SectionHeader {
        level: u8,
        text: String,
    },
    Paragraph {
        text: String,
    },
    ListItem {
        /// Original marker (`"-"`, `"3."`, `"b)"`).
        marker: String,
        enumerated: bool,
        text: String,
    },
    Code {
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        text: String,
    },
    /// First row is the header row.
    Table {
        rows: Vec<Vec<String>>,
    },
}

impl Block {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Block::Paragraph { text: text.into() }
    }

    /// Text content with table cells joined by tabs and rows by newlines.
    pub fn plain_text(&self) -> String {
        match self {
            Block::Title { text }
            | Block::SectionHeader { text, .. }
            | Block::Paragraph { text }
            | Block::ListItem { text, .. }
            | Block::Code { text, .. } => text.clone(),
            Block::Table { rows } => rows
                .iter()
                .map(|r| r.join("\t"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_list_item(&self) -> bool {
        matches!(self, Block::ListItem { .. })
    }

    /// Flatten a table into one paragraph per row; other blocks pass through.
    pub fn flatten_table(self) -> Vec<Block> {
        match self {
            Block::Table { rows } => rows
                .into_iter()
                .map(|r| r.join(" "))
                .filter(|t| !t.trim().is_empty())
                .map(Block::paragraph)
                .collect(),
            other => vec![other],
        }
    }
}

impl Document {
    /// Total number of blocks across all pages.
    pub fn block_count(&self) -> usize {
        self.pages.iter().map(|p| p.blocks.len()).sum()
    }

    /// True if no block carries any non-whitespace text.
    pub fn is_empty(&self) -> bool {
        self.pages
            .iter()
            .flat_map(|p| p.blocks.iter())
            .all(|b| b.plain_text().trim().is_empty())
    }
}
