//! Cleanup of OCR output before it is parsed into blocks.
//!
//! Vision models follow the transcription prompt most of the time, but a few
//! artefacts slip through often enough to need deterministic fixes: an outer
//! ```` ```markdown ```` fence, CRLF line endings, invented image links,
//! tables without a separator row (or with extra ones), zero-width
//! characters and stray page-number lines.
//!
//! Order matters: fences and line endings are normalised first so the
//! line-based rules see clean input.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to raw model output.
pub fn clean_markdown(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = remove_invisible_chars(&s);
    let s = s.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    let s = drop_page_number_lines(&s);
    let s = RE_BLANK_RUN.replace_all(&s, "\n\n").into_owned();
    let s = normalise_tables(&s);
    let s = replace_placeholder_images(&s);
    let trimmed = s.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_PAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:-\s*)?(?:page\s+)?\d{1,4}(?:\s+of\s+\d{1,4})?(?:\s*-)?\s*$").unwrap());
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

/// Remove lines that hold nothing but a page number ("12", "Page 3 of 9", "- 4 -").
fn drop_page_number_lines(input: &str) -> String {
    input
        .lines()
        .filter(|l| !RE_PAGE_LINE.is_match(l))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tables ───────────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.ends_with('|') && t.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Within each run of table rows keep exactly one separator, right after
/// the header, inserting it when the model left it out.
fn normalise_tables(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut row_in_table = 0usize;

    for line in input.lines() {
        if !is_table_row(line) {
            row_in_table = 0;
            out.push(line.to_string());
            continue;
        }

        if is_separator_row(line) {
            if row_in_table == 1 {
                out.push(line.to_string());
                row_in_table += 1;
            }
            continue;
        }

        if row_in_table == 1 {
            let cols = out
                .last()
                .map(|h| h.trim().matches('|').count().saturating_sub(1))
                .unwrap_or(1)
                .max(1);
            out.push(format!("|{}", " --- |".repeat(cols)));
            row_in_table += 1;
        }
        out.push(line.to_string());
        row_in_table += 1;
    }
    out.join("\n")
}

// ── Images ───────────────────────────────────────────────────────────────

const PLACEHOLDER_HOSTS: [&str; 7] = [
    "example.com",
    "placeholder.com",
    "via.placeholder.com",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
    "placehold.it",
];

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !(u.starts_with("http://") || u.starts_with("https://")) {
        return true;
    }
    PLACEHOLDER_HOSTS.iter().any(|d| u.contains(d))
}

/// The page was an image, so the model cannot link real figure files.
/// Invented links become their alt text in italics.
fn replace_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{}*", alt)
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_outer_fence() {
        assert_eq!(strip_outer_fence("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_outer_fence("```\n# Hello\n```"), "# Hello");
        assert_eq!(strip_outer_fence("# Hello\nWorld"), "# Hello\nWorld");
    }

    #[test]
    fn drops_page_numbers_only() {
        let input = "Intro\n12\nPage 3 of 9\n- 4 -\nIn 2019 we found";
        assert_eq!(drop_page_number_lines(input), "Intro\nIn 2019 we found");
    }

    #[test]
    fn inserts_missing_table_separator() {
        let out = normalise_tables("| A | B |\n| 1 | 2 |");
        assert_eq!(out, "| A | B |\n| --- | --- |\n| 1 | 2 |");
    }

    #[test]
    fn removes_mid_table_separators() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        assert_eq!(
            normalise_tables(input),
            "| A | B |\n| --- | --- |\n| 1 | 2 |\n| 3 | 4 |"
        );
    }

    #[test]
    fn placeholder_images_become_captions() {
        assert_eq!(replace_placeholder_images("![Chart](chart.png)"), "*Chart*");
        assert_eq!(replace_placeholder_images("![](image-url)"), "");
        let real = "![Figure](https://arxiv.org/figures/fig1.png)";
        assert_eq!(replace_placeholder_images(real), real);
    }

    #[test]
    fn full_cleanup() {
        let input = "```markdown\n# Title\r\n\r\nSome\u{200B} text   \n\n\n\n\n7\n## Section\n\n| A | B |\n| 1 | 2 |\n```";
        let out = clean_markdown(input);
        assert_eq!(
            out,
            "# Title\n\nSome text\n\n## Section\n\n| A | B |\n| --- | --- |\n| 1 | 2 |\n"
        );
        assert_eq!(clean_markdown("  \n\n"), "");
    }
}
