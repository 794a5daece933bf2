//! Post-processing: deterministic cleanup of model output before it is
//! threaded into the next stage.
//!
//! Models occasionally wrap the answer in ` ```markdown ` fences, mix line
//! endings, use `-` bullets where the renderer expects `*`, or invent
//! placeholder image URLs. These passes fix such artefacts without touching
//! the wording.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence regex
//! sees the raw shape; bullets are normalised before blank-line collapsing so
//! list detection runs on trimmed lines; the final-newline pass runs last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw model output.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Drop a leading "Here is ..." preamble line
/// 5. Normalise `-`/`+` bullets to `* `
/// 6. Ensure heading lines have a blank line before them
/// 7. Collapse runs of blank lines to one
/// 8. Replace placeholder image links with their caption
/// 9. Strip invisible Unicode
/// 10. Ensure the text ends with exactly one newline
pub fn clean_stage_output(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = drop_preamble(&s);
    let s = normalise_bullets(&s);
    let s = normalise_heading_spacing(&s);
    let s = collapse_blank_lines(&s);
    let s = replace_placeholder_images(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace ─────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Drop chatty preamble ─────────────────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(here is|here's|below is|sure[,!]|certainly[,!])[^\n]*:\s*$").unwrap()
});

fn drop_preamble(input: &str) -> String {
    let mut lines = input.lines();
    match lines.next() {
        Some(first) if RE_PREAMBLE.is_match(first.trim()) => {
            lines.collect::<Vec<_>>().join("\n")
        }
        _ => input.to_string(),
    }
}

// ── Rule 5: Normalise bullets ────────────────────────────────────────────────

static RE_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-+•*]\s+(\S.*)$").unwrap());

fn normalise_bullets(input: &str) -> String {
    input
        .lines()
        .map(|line| match RE_BULLET.captures(line) {
            // `---` style rules and bold markers are not bullets
            Some(caps) if !line.trim_start().starts_with("**") => format!("* {}", &caps[1]),
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Heading spacing ──────────────────────────────────────────────────

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if is_heading(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n').len();
            result.truncate(trimmed);
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 7: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 8: Placeholder images ───────────────────────────────────────────────
//
// Models invent image URLs such as `image-url` or `https://example.com/x.png`.
// Keep `![alt](src)` only when src is an http(s) URL on a real host or an
// absolute local path (market charts); otherwise keep the caption in italics.
// Relative paths count as placeholders: stage output has no base directory
// to resolve them against, so the renderer could never find the file.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "example.org",
    "placeholder.com",
    "via.placeholder.com",
    "dummyimage.com",
    "placehold.it",
    "placehold.co",
];

fn is_placeholder_source(src: &str) -> bool {
    let s = src.trim();
    if s.is_empty() {
        return true;
    }
    if s.starts_with("http://") || s.starts_with("https://") {
        let Some(host) = reqwest::Url::parse(s)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
        else {
            return true;
        };
        return PLACEHOLDER_HOSTS
            .iter()
            .any(|p| host == *p || host.strip_suffix(p).is_some_and(|rest| rest.ends_with('.')));
    }
    !std::path::Path::new(s).is_absolute()
}

fn replace_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_source(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("_{alt}_")
            }
        })
        .to_string()
}

// ── Rule 9: Invisible Unicode ────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    // ZWJ/ZWNJ are kept: Arabic and Devanagari shaping depends on them.
    input.replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{2060}'], "")
}

// ── Rule 10: Final newline ───────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_matches('\n').trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hi\nok\n```"), "# Hi\nok");
        assert_eq!(strip_markdown_fences("```\n# Hi\n```"), "# Hi");
        assert_eq!(strip_markdown_fences("# Hi"), "# Hi");
    }

    #[test]
    fn test_normalise_bullets() {
        let out = normalise_bullets("- one\n  + two\n• three\n**bold** text\n* four");
        assert_eq!(out, "* one\n* two\n* three\n**bold** text\n* four");
    }

    #[test]
    fn test_drop_preamble() {
        assert_eq!(drop_preamble("Here is the summary:\n# Title"), "# Title");
        assert_eq!(drop_preamble("# Title\nHere is: x"), "# Title\nHere is: x");
    }

    #[test]
    fn test_heading_spacing() {
        let out = normalise_heading_spacing("text\n# Heading\nmore");
        assert!(out.contains("text\n\n# Heading\nmore"));
        assert!(!is_heading("#hashtag"));
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_placeholder_images() {
        let out = replace_placeholder_images("![Chart](chart.png)\n![S&P](https://example.com/x.png)");
        assert_eq!(out, "_Chart_\n_S&P_");
        let real = "![Trend](https://images.finance.net/spx.png)";
        assert_eq!(replace_placeholder_images(real), real);
    }

    #[test]
    fn placeholder_hosts_match_whole_labels() {
        assert!(is_placeholder_source("https://via.placeholder.com/600x400"));
        assert!(is_placeholder_source("https://cdn.Example.COM/a.png"));
        assert!(is_placeholder_source("http://placehold.co/300"));
        // Look-alike hosts and paths mentioning a placeholder host are real.
        assert!(!is_placeholder_source("https://notexample.com/chart.png"));
        assert!(!is_placeholder_source("https://example.com.cdn.net/chart.png"));
        assert!(!is_placeholder_source("https://img.finance.net/example.com/spx.png"));
        assert!(!is_placeholder_source("https://charts.net/spx.png?ref=example.org"));
        assert!(is_placeholder_source("https://"));
        assert!(is_placeholder_source("charts/spx.png"));
        assert!(!is_placeholder_source("/tmp/market-digest/chart-1.png"));
    }

    #[test]
    fn test_invisible_chars_keep_joiners() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{200D}c"), "ab\u{200D}c");
    }

    #[test]
    fn test_clean_full_pipeline() {
        let input = "```markdown\r\nHere is the formatted report:\r\n# Market Wrap\r\n- Stocks rose   \r\n\r\n\r\n\r\n+ Bonds fell\r\n```";
        let out = clean_stage_output(input);
        assert_eq!(out, "# Market Wrap\n* Stocks rose\n\n* Bonds fell\n");
    }

    #[test]
    fn test_blank_output_stays_empty() {
        assert_eq!(clean_stage_output("  \n\n "), "");
    }
}
