//! Layout analysis: turn raw text into structural [`Block`]s.
//!
//! Three entry points, one per kind of source text:
//!
//! * [`blocks_from_lines`] — a PDF text layer, where the only structure is
//!   line breaks and font sizes.
//! * [`parse_markdown`] — Markdown files and OCR output.
//! * [`parse_plain_text`] — plain text files.
//!
//! The PDF heuristics are deliberately conservative: a line only becomes a
//! heading when it is short, does not read like a sentence, and is either set
//! in a larger font than the body or numbered like a section (`3.2 Method`).

use crate::document::Block;
use crate::pipeline::pdf::TextLine;
use once_cell::sync::Lazy;
use regex::Regex;

/// Headings must be at least this much larger than body text.
const HEADING_FONT_RATIO: f32 = 1.15;
/// The title must be at least this much larger than body text.
const TITLE_FONT_RATIO: f32 = 1.5;
/// Longer lines are never headings.
const MAX_HEADING_CHARS: usize = 120;

static RE_NUMBERED_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+([A-Z].*)$").unwrap());
static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([-•◦▪‣*+–])\s+(.+)$").unwrap());
static RE_ENUMERATED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,3}[.)]|[a-z][.)]|\([0-9a-z]{1,3}\))\s+(.+)$").unwrap());
static RE_PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(page\s+)?\d{1,4}(\s+of\s+\d{1,4})?$").unwrap());
static RE_ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*?)(?:\s+#+)?\s*$").unwrap());
static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(```|~~~)\s*([\w+#.-]*)").unwrap());
static RE_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([-*_])(\s*[-*_]){2,}\s*$").unwrap());

// ── PDF text layer ───────────────────────────────────────────────────────

/// Most common font size across the lines, weighted by character count.
/// Returns 0.0 when no line carries a size.
pub fn body_font_size<'a>(lines: impl IntoIterator<Item = &'a TextLine>) -> f32 {
    let mut buckets: Vec<(i32, usize)> = Vec::new();
    for line in lines {
        if line.font_size <= 0.0 || line.text.trim().is_empty() {
            continue;
        }
        // Half-point buckets absorb rounding noise between runs.
        let key = (line.font_size * 2.0).round() as i32;
        let weight = line.text.chars().count();
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, w)) => *w += weight,
            None => buckets.push((key, weight)),
        }
    }
    buckets
        .into_iter()
        .max_by_key(|&(_, w)| w)
        .map(|(k, _)| k as f32 / 2.0)
        .unwrap_or(0.0)
}

/// Build blocks from one page of text-layer lines.
///
/// `allow_title` permits the first large line to become the document title;
/// callers pass `true` only until a title has been emitted.
pub fn blocks_from_lines(lines: &[TextLine], body_size: f32, allow_title: bool) -> Vec<Block> {
    let lines = strip_page_furniture(lines);
    let max_len = lines
        .iter()
        .map(|l| l.text.trim().chars().count())
        .max()
        .unwrap_or(0);

    let mut builder = BlockBuilder::default();
    let mut title_pending = allow_title;

    for line in lines {
        let text = line.text.trim();
        if text.is_empty() {
            builder.flush();
            continue;
        }

        if let Some(heading) = classify_heading(line, body_size, &mut title_pending) {
            builder.flush();
            builder.blocks.push(heading);
            continue;
        }

        if let Some(item) = list_item(text) {
            builder.flush();
            builder.list = Some(item);
            continue;
        }

        if builder.list.is_some() && starts_lowercase(text) {
            builder.extend_list(text);
            continue;
        }
        if builder.list.is_some() {
            builder.flush();
        }

        builder.push_paragraph_line(text);

        // A short line that ends a sentence closes the paragraph.
        let short = max_len > 0 && text.chars().count() * 100 < max_len * 55;
        if short && text.ends_with(['.', '!', '?', ':']) {
            builder.flush();
        }
    }
    builder.flush();
    builder.blocks
}

fn classify_heading(line: &TextLine, body_size: f32, title_pending: &mut bool) -> Option<Block> {
    let text = line.text.trim();
    let chars = text.chars().count();
    if chars < 2 || chars > MAX_HEADING_CHARS || !text.chars().any(char::is_alphabetic) {
        return None;
    }
    let reads_like_sentence = text.ends_with(['.', ',', ';']) || text.split_whitespace().count() > 16;
    let ratio = if body_size > 0.0 {
        line.font_size / body_size
    } else {
        1.0
    };

    if let Some(caps) = RE_NUMBERED_SECTION.captures(text) {
        let depth = caps[1].split('.').filter(|s| !s.is_empty()).count();
        let numbered_only = !caps[1].contains('.') && !text.contains(". ");
        // "1 Introduction" or "3.2 Scaled Dot-Product Attention", never "12 apples were sold."
        if !reads_like_sentence && (depth > 1 || numbered_only) && chars <= 80 {
            *title_pending = false;
            return Some(Block::SectionHeader {
                level: depth.clamp(1, 5) as u8,
                text: text.to_string(),
            });
        }
    }

    if reads_like_sentence || ratio < HEADING_FONT_RATIO {
        return None;
    }

    if *title_pending && ratio >= TITLE_FONT_RATIO {
        *title_pending = false;
        return Some(Block::Title {
            text: text.to_string(),
        });
    }
    *title_pending = false;
    Some(Block::SectionHeader {
        level: if ratio >= 1.4 { 1 } else { 2 },
        text: text.to_string(),
    })
}

/// Drop a leading or trailing line that is only a page number.
fn strip_page_furniture(lines: &[TextLine]) -> &[TextLine] {
    let is_furniture = |l: &TextLine| RE_PAGE_NUMBER.is_match(l.text.trim());
    let mut slice = lines;
    while let Some(first) = slice.first() {
        if first.text.trim().is_empty() || is_furniture(first) {
            slice = &slice[1..];
        } else {
            break;
        }
    }
    while let Some(last) = slice.last() {
        if last.text.trim().is_empty() || is_furniture(last) {
            slice = &slice[..slice.len() - 1];
        } else {
            break;
        }
    }
    slice
}

// ── Markdown ─────────────────────────────────────────────────────────────

/// Parse Markdown into blocks. The first level-1 heading becomes the title.
pub fn parse_markdown(input: &str) -> Vec<Block> {
    let input = input.replace("\r\n", "\n");
    let lines: Vec<&str> = input.lines().collect();
    let mut builder = BlockBuilder::default();
    let mut title_seen = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            builder.flush();
            i += 1;
            continue;
        }

        // Fenced code
        if let Some(caps) = RE_FENCE.captures(line) {
            builder.flush();
            let fence = caps[1].to_string();
            let language = Some(caps[2].to_string()).filter(|l| !l.is_empty());
            let mut body = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with(fence.as_str()) {
                body.push(lines[i]);
                i += 1;
            }
            builder.blocks.push(Block::Code {
                language,
                text: body.join("\n"),
            });
            i += 1;
            continue;
        }

        // ATX heading
        if let Some(caps) = RE_ATX_HEADING.captures(trimmed) {
            builder.flush();
            builder
                .blocks
                .push(heading(caps[1].len(), &caps[2], &mut title_seen));
            i += 1;
            continue;
        }

        // Setext underline closes the paragraph above it into a heading
        if builder.paragraph.len() == 1 && is_setext_underline(trimmed) {
            let text = builder.paragraph.remove(0);
            let level = if trimmed.starts_with('=') { 1 } else { 2 };
            builder.blocks.push(heading(level, &text, &mut title_seen));
            i += 1;
            continue;
        }

        if RE_RULE.is_match(trimmed) {
            builder.flush();
            i += 1;
            continue;
        }

        // Pipe table
        if trimmed.starts_with('|') {
            builder.flush();
            let mut rows = Vec::new();
            while i < lines.len() && lines[i].trim().starts_with('|') {
                let row = lines[i].trim();
                if !is_separator_row(row) {
                    rows.push(split_table_row(row));
                }
                i += 1;
            }
            if !rows.is_empty() {
                builder.blocks.push(Block::Table { rows });
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('>') {
            builder.push_paragraph_line(rest.trim());
            i += 1;
            continue;
        }

        if let Some(item) = list_item(trimmed) {
            builder.flush();
            builder.list = Some(item);
            i += 1;
            continue;
        }

        if builder.list.is_some() && line.starts_with([' ', '\t']) {
            builder.extend_list(trimmed);
            i += 1;
            continue;
        }
        if builder.list.is_some() {
            builder.flush();
        }

        builder.push_paragraph_line(trimmed);
        i += 1;
    }
    builder.flush();
    builder.blocks
}

fn heading(hashes: usize, text: &str, title_seen: &mut bool) -> Block {
    let text = text.trim().to_string();
    if hashes == 1 && !*title_seen {
        *title_seen = true;
        return Block::Title { text };
    }
    Block::SectionHeader {
        level: hashes.saturating_sub(1).clamp(1, 5) as u8,
        text,
    }
}

fn is_setext_underline(line: &str) -> bool {
    line.len() >= 3 && (line.chars().all(|c| c == '=') || line.chars().all(|c| c == '-'))
}

fn is_separator_row(row: &str) -> bool {
    row.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn split_table_row(row: &str) -> Vec<String> {
    let inner = row.trim().trim_start_matches('|');
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

// ── Plain text ───────────────────────────────────────────────────────────

/// Parse plain text: blank lines separate paragraphs, marker lines become
/// list items, line breaks inside a paragraph are kept.
pub fn parse_plain_text(input: &str) -> Vec<Block> {
    let input = input.replace("\r\n", "\n");
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    let flush = |paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            blocks.push(Block::paragraph(paragraph.join("\n")));
            paragraph.clear();
        }
    };

    for line in input.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        if let Some(item) = list_item(trimmed.trim_start()) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(item);
            continue;
        }
        paragraph.push(trimmed);
    }
    flush(&mut paragraph, &mut blocks);
    blocks
}

// ── Shared helpers ───────────────────────────────────────────────────────

fn list_item(text: &str) -> Option<Block> {
    if let Some(caps) = RE_BULLET.captures(text) {
        return Some(Block::ListItem {
            marker: caps[1].to_string(),
            enumerated: false,
            text: caps[2].trim().to_string(),
        });
    }
    RE_ENUMERATED.captures(text).map(|caps| Block::ListItem {
        marker: caps[1].to_string(),
        enumerated: true,
        text: caps[2].trim().to_string(),
    })
}

fn starts_lowercase(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_lowercase)
}

/// Join `next` onto `acc`, removing an end-of-line hyphen when the word
/// continues in lowercase on the next line.
fn join_dehyphenated(acc: &mut String, next: &str) {
    if acc.is_empty() {
        acc.push_str(next);
        return;
    }
    let hyphenated = acc.ends_with('-')
        && acc
            .chars()
            .rev()
            .nth(1)
            .is_some_and(char::is_alphabetic)
        && starts_lowercase(next);
    if hyphenated {
        acc.pop();
    } else {
        acc.push(' ');
    }
    acc.push_str(next);
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    paragraph: Vec<String>,
    list: Option<Block>,
}

impl BlockBuilder {
    fn push_paragraph_line(&mut self, line: &str) {
        self.paragraph.push(line.to_string());
    }

    fn extend_list(&mut self, line: &str) {
        if let Some(Block::ListItem { text, .. }) = self.list.as_mut() {
            join_dehyphenated(text, line);
        }
    }

    fn flush(&mut self) {
        if let Some(item) = self.list.take() {
            self.blocks.push(item);
        }
        if !self.paragraph.is_empty() {
            let mut text = String::new();
            for line in self.paragraph.drain(..) {
                join_dehyphenated(&mut text, &line);
            }
            self.blocks.push(Block::paragraph(text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, size: f32) -> TextLine {
        TextLine {
            text: text.to_string(),
            font_size: size,
        }
    }

    #[test]
    fn body_size_is_weighted_mode() {
        let lines = vec![
            line("Big Title", 24.0),
            line("a long line of body text that dominates the page", 10.0),
            line("another long line of body text in the same size", 10.2),
        ];
        assert_eq!(body_font_size(&lines), 10.0);
        assert_eq!(body_font_size(&[]), 0.0);
    }

    #[test]
    fn title_sections_and_paragraphs() {
        let lines = vec![
            line("Attention Is All You Need", 17.0),
            line("Abstract", 12.0),
            line("The dominant sequence transduction models are based on com-", 10.0),
            line("plex recurrent or convolutional neural networks.", 10.0),
            line("", 0.0),
            line("1 Introduction", 10.0),
            line("Recurrent neural networks have been firmly established.", 10.0),
            line("3.2 Scaled Dot-Product Attention", 10.0),
            line("7", 10.0),
        ];
        let blocks = blocks_from_lines(&lines, 10.0, true);
        assert_eq!(
            blocks,
            vec![
                Block::Title {
                    text: "Attention Is All You Need".into()
                },
                Block::SectionHeader {
                    level: 2,
                    text: "Abstract".into()
                },
                Block::paragraph(
                    "The dominant sequence transduction models are based on complex recurrent or convolutional neural networks."
                ),
                Block::SectionHeader {
                    level: 1,
                    text: "1 Introduction".into()
                },
                Block::paragraph("Recurrent neural networks have been firmly established."),
                Block::SectionHeader {
                    level: 2,
                    text: "3.2 Scaled Dot-Product Attention".into()
                },
            ]
        );
    }

    #[test]
    fn sentences_with_numbers_are_not_headings() {
        let lines = vec![line("12 apples were sold at the market today.", 10.0)];
        assert_eq!(
            blocks_from_lines(&lines, 10.0, false),
            vec![Block::paragraph("12 apples were sold at the market today.")]
        );
    }

    #[test]
    fn title_only_when_allowed() {
        let lines = vec![line("Results", 20.0)];
        assert!(matches!(
            blocks_from_lines(&lines, 10.0, false)[0],
            Block::SectionHeader { level: 1, .. }
        ));
    }

    #[test]
    fn pdf_list_items_with_continuation() {
        let lines = vec![
            line("• first item that wraps onto", 10.0),
            line("the next line", 10.0),
            line("2) second", 10.0),
            line("Closing words here.", 10.0),
        ];
        let blocks = blocks_from_lines(&lines, 10.0, false);
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[0],
            Block::ListItem {
                marker: "•".into(),
                enumerated: false,
                text: "first item that wraps onto the next line".into()
            }
        );
        assert!(matches!(&blocks[1], Block::ListItem { enumerated: true, marker, .. } if marker == "2)"));
    }

    #[test]
    fn dehyphenation_keeps_real_hyphens() {
        let mut s = String::from("state-of-the-");
        join_dehyphenated(&mut s, "Art");
        assert_eq!(s, "state-of-the- Art");
        let mut s = String::from("trans-");
        join_dehyphenated(&mut s, "duction");
        assert_eq!(s, "transduction");
    }

    #[test]
    fn markdown_headings_lists_tables_code() {
        let md = "# Guide\n\nIntro text\ncontinues here.\n\n## Setup\n\n- one\n- two\n  wrapped\n\n1. first\n2. second\n\n| A | B |\n|---|---|\n| 1 | x\\|y |\n\n```rust\nfn main() {}\n```\n\n# Second top\n";
        let blocks = parse_markdown(md);
        assert_eq!(blocks[0], Block::Title { text: "Guide".into() });
        assert_eq!(blocks[1], Block::paragraph("Intro text continues here."));
        assert_eq!(
            blocks[2],
            Block::SectionHeader {
                level: 1,
                text: "Setup".into()
            }
        );
        assert_eq!(
            blocks[4],
            Block::ListItem {
                marker: "-".into(),
                enumerated: false,
                text: "two wrapped".into()
            }
        );
        assert!(matches!(&blocks[5], Block::ListItem { enumerated: true, .. }));
        assert_eq!(
            blocks[7],
            Block::Table {
                rows: vec![
                    vec!["A".into(), "B".into()],
                    vec!["1".into(), "x|y".into()]
                ]
            }
        );
        assert_eq!(
            blocks[8],
            Block::Code {
                language: Some("rust".into()),
                text: "fn main() {}".into()
            }
        );
        assert_eq!(
            blocks[9],
            Block::SectionHeader {
                level: 1,
                text: "Second top".into()
            }
        );
    }

    #[test]
    fn markdown_setext_and_rules() {
        let blocks = parse_markdown("Title\n=====\n\n---\n\nSub\n---\ntext");
        assert_eq!(blocks[0], Block::Title { text: "Title".into() });
        assert_eq!(
            blocks[1],
            Block::SectionHeader {
                level: 1,
                text: "Sub".into()
            }
        );
        assert_eq!(blocks[2], Block::paragraph("text"));
    }

    #[test]
    fn plain_text_keeps_line_breaks() {
        let blocks = parse_plain_text("line one\nline two\n\n- item\n\nlast");
        assert_eq!(
            blocks,
            vec![
                Block::paragraph("line one\nline two"),
                Block::ListItem {
                    marker: "-".into(),
                    enumerated: false,
                    text: "item".into()
                },
                Block::paragraph("last"),
            ]
        );
    }
}
