//! Render a [`Document`] into one of the [`OutputFormat`]s.
//!
//! All exporters are pure functions of the document model. Markdown and
//! text place a blank line between blocks, except between consecutive list
//! items, which stay on adjacent lines so renderers keep them in one list.

use crate::document::{Block, Document};
use crate::format::OutputFormat;
use serde::Serialize;

/// Version tag written into the JSON export.
pub const JSON_SCHEMA_VERSION: &str = "1.0";

/// The exported representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// markdown, doctags and text.
    Text(String),
    /// json.
    Structured(serde_json::Value),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text(s) => s.trim().is_empty(),
            Payload::Structured(v) => v.is_null(),
        }
    }
}

/// Export `doc` to `format`.
pub fn render(doc: &Document, format: OutputFormat) -> Result<Payload, serde_json::Error> {
    Ok(match format {
        OutputFormat::Markdown => Payload::Text(to_markdown(doc)),
        OutputFormat::Text => Payload::Text(to_text(doc)),
        OutputFormat::Doctags => Payload::Text(to_doctags(doc)),
        OutputFormat::Json => Payload::Structured(to_json(doc)?),
    })
}

// ── Markdown ─────────────────────────────────────────────────────────────

pub fn to_markdown(doc: &Document) -> String {
    let blocks: Vec<&Block> = doc.pages.iter().flat_map(|p| p.blocks.iter()).collect();
    let mut out = join_blocks(&blocks, markdown_block);
    finish(&mut out);
    out
}

fn markdown_block(block: &Block) -> String {
    match block {
        Block::Title { text } => format!("# {}", one_line(text)),
        Block::SectionHeader { level, text } => {
            let hashes = "#".repeat(usize::from((*level).clamp(1, 5)) + 1);
            format!("{hashes} {}", one_line(text))
        }
        Block::Paragraph { text } => text.trim().to_string(),
        Block::ListItem {
            marker,
            enumerated,
            text,
        } => {
            let marker = if *enumerated { marker.as_str() } else { "-" };
            format!("{marker} {}", text.trim())
        }
        Block::Code { language, text } => {
            let fence = if text.contains("```") { "~~~" } else { "```" };
            format!(
                "{fence}{}\n{}\n{fence}",
                language.as_deref().unwrap_or(""),
                text.trim_end_matches('\n')
            )
        }
        Block::Table { rows } => markdown_table(rows),
    }
}

fn markdown_table(rows: &[Vec<String>]) -> String {
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let render_row = |row: &[String]| {
        let mut cells: Vec<String> = row
            .iter()
            .map(|c| one_line(c).replace('|', "\\|"))
            .collect();
        cells.resize(cols, String::new());
        format!("| {} |", cells.join(" | "))
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    let mut iter = rows.iter();
    if let Some(header) = iter.next() {
        lines.push(render_row(header));
        lines.push(format!("|{}", " --- |".repeat(cols)));
    }
    lines.extend(iter.map(|r| render_row(r)));
    lines.join("\n")
}

// ── Plain text ───────────────────────────────────────────────────────────

pub fn to_text(doc: &Document) -> String {
    let blocks: Vec<&Block> = doc.pages.iter().flat_map(|p| p.blocks.iter()).collect();
    let mut out = join_blocks(&blocks, |b| match b {
        Block::ListItem {
            marker,
            enumerated,
            text,
        } => {
            let marker = if *enumerated { marker.as_str() } else { "-" };
            format!("{marker} {}", text.trim())
        }
        other => other.plain_text().trim_end().to_string(),
    });
    finish(&mut out);
    out
}

// ── DocTags ──────────────────────────────────────────────────────────────

/// Tag-based structure markup. Pages are separated by `<page_break>`,
/// consecutive list items are wrapped in `<ordered_list>` /
/// `<unordered_list>`, and tables use OTSL cells (`<fcel>`/`<ecel>`, `<nl>`).
pub fn to_doctags(doc: &Document) -> String {
    let mut out = String::from("<doctag>");
    for (i, page) in doc.pages.iter().enumerate() {
        if i > 0 {
            out.push_str("<page_break>");
        }
        let mut open_list: Option<&'static str> = None;
        for block in &page.blocks {
            let list_tag = match block {
                Block::ListItem { enumerated: true, .. } => Some("ordered_list"),
                Block::ListItem { enumerated: false, .. } => Some("unordered_list"),
                _ => None,
            };
            if open_list != list_tag {
                if let Some(tag) = open_list {
                    out.push_str(&format!("</{tag}>"));
                }
                if let Some(tag) = list_tag {
                    out.push_str(&format!("<{tag}>"));
                }
                open_list = list_tag;
            }
            out.push_str(&doctags_block(block));
        }
        if let Some(tag) = open_list {
            out.push_str(&format!("</{tag}>"));
        }
    }
    out.push_str("</doctag>\n");
    out
}

fn doctags_block(block: &Block) -> String {
    match block {
        Block::Title { text } => tag("title", text),
        Block::SectionHeader { level, text } => {
            tag(&format!("section_header_level_{}", (*level).clamp(1, 5)), text)
        }
        Block::Paragraph { text } => tag("text", text),
        Block::ListItem { text, .. } => tag("list_item", text),
        Block::Code { language, text } => match language {
            Some(lang) => format!("<code><_{}_>{}</code>", escape(lang), escape(text)),
            None => tag("code", text),
        },
        Block::Table { rows } => {
            let mut s = String::from("<otsl>");
            for row in rows {
                for cell in row {
                    if cell.trim().is_empty() {
                        s.push_str("<ecel>");
                    } else {
                        s.push_str("<fcel>");
                        s.push_str(&escape(cell.trim()));
                    }
                }
                s.push_str("<nl>");
            }
            s.push_str("</otsl>");
            s
        }
    }
}

fn tag(name: &str, text: &str) -> String {
    format!("<{name}>{}</{name}>", escape(text.trim()))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ── JSON ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonExport<'a> {
    schema_version: &'static str,
    #[serde(flatten)]
    document: &'a Document,
}

pub fn to_json(doc: &Document) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(JsonExport {
        schema_version: JSON_SCHEMA_VERSION,
        document: doc,
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn join_blocks(blocks: &[&Block], render: impl Fn(&Block) -> String) -> String {
    let mut out = String::new();
    let mut prev_list = false;
    for block in blocks {
        let rendered = render(block);
        if rendered.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(if prev_list && block.is_list_item() { "\n" } else { "\n\n" });
        }
        out.push_str(&rendered);
        prev_list = block.is_list_item();
    }
    out
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn finish(out: &mut String) {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMetadata, Page};
    use crate::format::InputFormat;

    fn sample() -> Document {
        Document {
            name: "sample.pdf".into(),
            input_format: InputFormat::Pdf,
            metadata: DocumentMetadata {
                title: Some("Sample".into()),
                page_count: 2,
                ..Default::default()
            },
            pages: vec![
                Page {
                    page_no: 1,
                    ocr: false,
                    blocks: vec![
                        Block::Title {
                            text: "Attention Is All You Need".into(),
                        },
                        Block::SectionHeader {
                            level: 1,
                            text: "Introduction".into(),
                        },
                        Block::paragraph("Recurrent models <dominate> & scale."),
                        Block::ListItem {
                            marker: "-".into(),
                            enumerated: false,
                            text: "first".into(),
                        },
                        Block::ListItem {
                            marker: "•".into(),
                            enumerated: false,
                            text: "second".into(),
                        },
                    ],
                },
                Page {
                    page_no: 2,
                    ocr: true,
                    blocks: vec![
                        Block::Table {
                            rows: vec![
                                vec!["Model".into(), "BLEU".into()],
                                vec!["Base".into(), "27.3".into()],
                                vec!["Big".into(), "".into()],
                            ],
                        },
                        Block::Code {
                            language: Some("rust".into()),
                            text: "fn main() {}\n".into(),
                        },
                    ],
                },
            ],
            warnings: vec![],
        }
    }

    #[test]
    fn markdown_structure() {
        let md = to_markdown(&sample());
        assert!(md.starts_with("# Attention Is All You Need\n\n## Introduction\n\n"));
        assert!(md.contains("- first\n- second"), "lists stay tight: {md}");
        assert!(md.contains("| Model | BLEU |\n| --- | --- |\n| Base | 27.3 |\n| Big |  |"));
        assert!(md.contains("```rust\nfn main() {}\n```"));
        assert!(md.ends_with("```\n"));
    }

    #[test]
    fn markdown_escapes_pipes_in_cells() {
        let rows = vec![vec!["a|b".to_string()], vec!["c".to_string()]];
        assert_eq!(markdown_table(&rows), "| a\\|b |\n| --- |\n| c |");
    }

    #[test]
    fn text_has_no_markup() {
        let text = to_text(&sample());
        assert!(text.starts_with("Attention Is All You Need\n\nIntroduction\n\n"));
        assert!(!text.contains('#'));
        assert!(text.contains("Model\tBLEU"));
    }

    #[test]
    fn doctags_wraps_lists_and_escapes() {
        let tags = to_doctags(&sample());
        assert!(tags.starts_with("<doctag><title>Attention Is All You Need</title>"));
        assert!(tags.contains("<section_header_level_1>Introduction</section_header_level_1>"));
        assert!(tags.contains("&lt;dominate&gt; &amp; scale."));
        assert!(tags.contains(
            "<unordered_list><list_item>first</list_item><list_item>second</list_item></unordered_list>"
        ));
        assert!(tags.contains("<page_break><otsl><fcel>Model<fcel>BLEU<nl>"));
        assert!(tags.contains("<fcel>Big<ecel><nl>"));
        assert!(tags.contains("<code><_rust_>fn main() {}"));
        assert!(tags.ends_with("</doctag>\n"));
    }

    #[test]
    fn json_carries_schema_version_and_pages() {
        let v = to_json(&sample()).unwrap();
        assert_eq!(v["schema_version"], JSON_SCHEMA_VERSION);
        assert_eq!(v["name"], "sample.pdf");
        assert_eq!(v["input_format"], "pdf");
        assert_eq!(v["pages"][0]["blocks"][0]["type"], "title");
        assert_eq!(v["pages"][1]["ocr"], true);
        assert!(v["pages"][0].get("ocr").is_none());
    }

    #[test]
    fn every_format_is_non_empty() {
        let doc = sample();
        for format in OutputFormat::ALL {
            let payload = render(&doc, format).unwrap();
            assert!(!payload.is_empty(), "{format} payload empty");
        }
    }
}
