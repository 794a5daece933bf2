//! Per-language content produced by one pipeline run.
//!
//! [`ContentStore`] is an insertion-ordered map from language code to
//! [`LanguageContent`]. Order matters downstream: the cover page, table of
//! contents, and section sequence of the rendered document all follow it.

use crate::error::DigestError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A reference to a visual asset, pending or completed local resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// URL or local path as written in the content.
    pub source: String,
    /// Caption (the markdown alt text).
    pub caption: String,
    /// Local cache path once resolved; `None` until then or if resolution failed.
    pub local_path: Option<PathBuf>,
}

impl ImageRef {
    pub fn new(source: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            caption: caption.into(),
            local_path: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Text and images for a single language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageContent {
    pub text: String,
    pub images: Vec<ImageRef>,
}

/// Insertion-ordered mapping from language code to generated content.
///
/// The primary language must be stored before any other entry; translations
/// are derived from the primary text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStore {
    primary: String,
    entries: Vec<(String, LanguageContent)>,
}

impl ContentStore {
    pub fn new(primary_language: impl Into<String>) -> Self {
        Self {
            primary: primary_language.into(),
            entries: Vec::new(),
        }
    }

    pub fn primary_language(&self) -> &str {
        &self.primary
    }

    /// Insert or overwrite the content for `language`.
    ///
    /// Re-putting an existing language replaces its content in place and keeps
    /// its original position.
    pub fn put(
        &mut self,
        language: impl Into<String>,
        text: impl Into<String>,
        images: Vec<ImageRef>,
    ) -> Result<(), DigestError> {
        let language = language.into();
        let content = LanguageContent {
            text: text.into(),
            images,
        };

        if let Some((_, existing)) = self.entries.iter_mut().find(|(l, _)| *l == language) {
            *existing = content;
            return Ok(());
        }

        if language != self.primary && !self.contains(&self.primary) {
            return Err(DigestError::PrimaryLanguageMissing {
                primary: self.primary.clone(),
                language,
            });
        }

        self.entries.push((language, content));
        Ok(())
    }

    /// Store `text` and register every `![caption](source)` it embeds.
    pub fn put_markdown(
        &mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), DigestError> {
        let text = text.into();
        let images = extract_image_refs(&text);
        self.put(language, text, images)
    }

    pub fn get(&self, language: &str) -> Option<&LanguageContent> {
        self.entries
            .iter()
            .find(|(l, _)| l == language)
            .map(|(_, c)| c)
    }

    pub fn contains(&self, language: &str) -> bool {
        self.get(language).is_some()
    }

    /// Language codes in first-insertion order.
    pub fn languages(&self) -> Vec<&str> {
        self.entries.iter().map(|(l, _)| l.as_str()).collect()
    }

    /// Entries in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LanguageContent)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), c))
    }

    /// Every image across all languages, deduplicated by source, in order of
    /// first appearance.
    pub fn all_images(&self) -> Vec<&ImageRef> {
        let mut seen: Vec<&str> = Vec::new();
        let mut out = Vec::new();
        for (_, content) in &self.entries {
            for image in &content.images {
                if !seen.contains(&image.source.as_str()) {
                    seen.push(&image.source);
                    out.push(image);
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static RE_IMAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^!\[([^\]]*)\]\(([^)\s]*)\)$").unwrap());

/// Parse a single line as `![caption](source)`.
///
/// Returns `None` when the line is not exactly one image, or the source is
/// empty.
pub fn parse_image_line(line: &str) -> Option<ImageRef> {
    let caps = RE_IMAGE_LINE.captures(line.trim())?;
    let source = caps[2].trim();
    if source.is_empty() {
        return None;
    }
    Some(ImageRef::new(source, caps[1].trim()))
}

/// Collect every image line in `text`, in order.
pub fn extract_image_refs(text: &str) -> Vec<ImageRef> {
    text.lines().filter_map(parse_image_line).collect()
}
