//! Markdown subset → flowables.
//!
//! Recognised, one line at a time:
//!
//! | Line | Flowable |
//! |---|---|
//! | `# text` (1–6 `#`) | [`Flowable::Heading`] |
//! | `* text` | [`Flowable::Paragraph`] with a `•` bullet |
//! | `![caption](source)` | [`Flowable::Image`] if the source resolved, else dropped |
//! | anything else non-blank | [`Flowable::Paragraph`] |
//!
//! Blank lines produce nothing. Each kept line yields exactly one flowable,
//! so `flowables.len() == non_blank_lines - dropped.len()`.

use crate::error::ResourceIssue;
use crate::render::images::ResolvedImages;
use crate::render::style::{ParagraphStyle, SectionStyle};
use crate::store::parse_image_line;
use std::path::PathBuf;
use tracing::warn;

/// Fixed display box for images: 4 × 3 inches.
pub const IMAGE_BOX: (f32, f32) = (288.0, 216.0);

pub const BULLET: char = '\u{2022}';

/// A block of content ready for layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Flowable {
    Heading {
        text: String,
        style: ParagraphStyle,
    },
    Paragraph {
        text: String,
        style: ParagraphStyle,
        bullet: bool,
    },
    Image {
        source: String,
        caption: String,
        path: PathBuf,
        /// Display size in points, fitted inside [`IMAGE_BOX`].
        width: f32,
        height: f32,
        caption_style: ParagraphStyle,
    },
    /// Text standing in for an image that could not be resolved.
    Placeholder {
        text: String,
        style: ParagraphStyle,
    },
    Spacer(f32),
    PageBreak,
}

impl Flowable {
    pub fn is_heading(&self) -> bool {
        matches!(self, Flowable::Heading { .. })
    }

    pub fn is_bullet(&self) -> bool {
        matches!(self, Flowable::Paragraph { bullet: true, .. })
    }

    /// Style of text-bearing flowables.
    pub fn style(&self) -> Option<&ParagraphStyle> {
        match self {
            Flowable::Heading { style, .. }
            | Flowable::Paragraph { style, .. }
            | Flowable::Placeholder { style, .. } => Some(style),
            Flowable::Image { caption_style, .. } => Some(caption_style),
            Flowable::Spacer(_) | Flowable::PageBreak => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Flowable::Heading { text, .. }
            | Flowable::Paragraph { text, .. }
            | Flowable::Placeholder { text, .. } => Some(text),
            Flowable::Image { caption, .. } => Some(caption),
            Flowable::Spacer(_) | Flowable::PageBreak => None,
        }
    }
}

/// Result of parsing one language's text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSection {
    pub flowables: Vec<Flowable>,
    /// One entry per dropped image line.
    pub dropped: Vec<ResourceIssue>,
    /// Sources of images embedded inline.
    pub inlined: Vec<String>,
}

/// Parse `text` with the section's styles.
pub fn parse_markdown(text: &str, style: &SectionStyle, images: &ResolvedImages) -> ParsedSection {
    let mut section = ParsedSection::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("![") {
            match parse_image_line(line) {
                Some(image) => match images.get(&image.source) {
                    Some(resolved) => {
                        let (width, height) = fit_image(resolved.width, resolved.height);
                        section.inlined.push(image.source.clone());
                        section.flowables.push(Flowable::Image {
                            source: image.source,
                            caption: image.caption,
                            path: resolved.path.clone(),
                            width,
                            height,
                            caption_style: style.caption.clone(),
                        });
                    }
                    None => {
                        let issue = images.issue(&image.source).unwrap_or(
                            ResourceIssue::ImageUnavailable {
                                location: image.source.clone(),
                                detail: "not resolved".into(),
                            },
                        );
                        warn!("Dropping image line: {}", issue);
                        section.dropped.push(issue);
                    }
                },
                None => {
                    warn!("Dropping malformed image line: {}", line);
                    section.dropped.push(ResourceIssue::ImageUnavailable {
                        location: line.to_string(),
                        detail: "malformed image line".into(),
                    });
                }
            }
            continue;
        }

        if let Some(heading) = heading_text(line) {
            section.flowables.push(Flowable::Heading {
                text: strip_inline_markup(heading),
                style: style.header.clone(),
            });
        } else if let Some(item) = line.strip_prefix("* ") {
            section.flowables.push(Flowable::Paragraph {
                text: format!("{BULLET} {}", strip_inline_markup(item.trim())),
                style: style.body.clone(),
                bullet: true,
            });
        } else {
            section.flowables.push(Flowable::Paragraph {
                text: strip_inline_markup(line),
                style: style.body.clone(),
                bullet: false,
            });
        }
    }

    section
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    line[hashes..].strip_prefix(' ').map(str::trim)
}

/// Remove bold/code markers the PDF cannot express.
fn strip_inline_markup(text: &str) -> String {
    text.replace("**", "").replace("__", "").replace('`', "")
}

/// Fit `w × h` pixels inside [`IMAGE_BOX`], preserving aspect ratio.
pub fn fit_image(w: u32, h: u32) -> (f32, f32) {
    let (box_w, box_h) = IMAGE_BOX;
    if w == 0 || h == 0 {
        return (box_w, box_h);
    }
    let scale = (box_w / w as f32).min(box_h / h as f32);
    (w as f32 * scale, h as f32 * scale)
}
