//! Font discovery and text measurement.
//!
//! Script-specific families (Noto Sans Arabic, Hebrew, Devanagari) are looked
//! up in the configured font directory and, optionally, the system fonts.
//! A family that cannot be found degrades to the base-14 Helvetica with a
//! single warning per family; a missing font never aborts rendering.

use crate::error::ResourceIssue;
use crate::render::style::{FALLBACK_FONT, FALLBACK_FONT_BOLD};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw bytes of a font face found in the database.
#[derive(Clone)]
pub struct LoadedFont {
    pub family: String,
    pub data: Arc<Vec<u8>>,
    pub index: u32,
}

impl std::fmt::Debug for LoadedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedFont")
            .field("family", &self.family)
            .field("data_len", &self.data.len())
            .field("index", &self.index)
            .finish()
    }
}

/// Known font families, resolved lazily.
pub struct FontBook {
    db: fontdb::Database,
    faces: HashMap<String, Option<LoadedFont>>,
    issues: Vec<ResourceIssue>,
}

impl std::fmt::Debug for FontBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontBook")
            .field("faces_in_db", &self.db.len())
            .field("resolved", &self.faces.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FontBook {
    /// Load fonts from `font_dir` (if it exists) and optionally the system.
    pub fn new(font_dir: &Path, load_system_fonts: bool) -> Self {
        let mut db = fontdb::Database::new();
        if font_dir.is_dir() {
            db.load_fonts_dir(font_dir);
        }
        if load_system_fonts {
            db.load_system_fonts();
        }
        debug!("Font database: {} face(s)", db.len());
        Self {
            db,
            faces: HashMap::new(),
            issues: Vec::new(),
        }
    }

    /// A book with no fonts; every family falls back to Helvetica.
    pub fn empty() -> Self {
        Self {
            db: fontdb::Database::new(),
            faces: HashMap::new(),
            issues: Vec::new(),
        }
    }

    /// Add a font from memory.
    pub fn load_font_data(&mut self, data: Vec<u8>) {
        self.db.load_font_data(data);
        self.faces.retain(|_, face| face.is_some());
    }

    pub fn is_builtin(family: &str) -> bool {
        family == FALLBACK_FONT || family == FALLBACK_FONT_BOLD
    }

    /// Effective family for `preferred`: the family itself when it can be
    /// drawn, otherwise `fallback`, otherwise the built-in face. The first
    /// miss per family logs a warning and records a
    /// [`ResourceIssue::FontMissing`].
    pub fn resolve(&mut self, preferred: &str, fallback: &str) -> String {
        if self.available(preferred) {
            return preferred.to_string();
        }
        let substitute = if self.available(fallback) {
            fallback
        } else {
            self.note_missing(fallback, FALLBACK_FONT);
            FALLBACK_FONT
        };
        self.note_missing(preferred, substitute);
        substitute.to_string()
    }

    fn available(&mut self, family: &str) -> bool {
        Self::is_builtin(family) || self.lookup(family).is_some()
    }

    fn note_missing(&mut self, missing: &str, substitute: &str) {
        let seen = self
            .issues
            .iter()
            .any(|i| matches!(i, ResourceIssue::FontMissing { family, .. } if family == missing));
        if !seen {
            warn!("Font '{}' not found; falling back to '{}'", missing, substitute);
            self.issues.push(ResourceIssue::FontMissing {
                family: missing.to_string(),
                fallback: substitute.to_string(),
            });
        }
    }

    /// Face data for an embeddable family, loading it on first use.
    pub fn lookup(&mut self, family: &str) -> Option<&LoadedFont> {
        if !self.faces.contains_key(family) {
            let loaded = self.query(family);
            self.faces.insert(family.to_string(), loaded);
        }
        self.faces.get(family).and_then(Option::as_ref)
    }

    /// Already-loaded face data; never touches the database.
    pub fn loaded(&self, family: &str) -> Option<&LoadedFont> {
        self.faces.get(family).and_then(Option::as_ref)
    }

    fn query(&self, family: &str) -> Option<LoadedFont> {
        let id = self.db.query(&fontdb::Query {
            families: &[fontdb::Family::Name(family)],
            weight: fontdb::Weight::NORMAL,
            stretch: fontdb::Stretch::Normal,
            style: fontdb::Style::Normal,
        })?;
        let (data, index) = self
            .db
            .with_face_data(id, |data, index| (data.to_vec(), index))?;
        // Reject files ttf-parser cannot read; measuring would fail later.
        ttf_parser::Face::parse(&data, index).ok()?;
        debug!("Loaded font '{}' ({} bytes)", family, data.len());
        Some(LoadedFont {
            family: family.to_string(),
            data: Arc::new(data),
            index,
        })
    }

    /// Width of `text` at `size` points.
    pub fn measure(&self, family: &str, text: &str, size: f32) -> f32 {
        if let Some(font) = self.loaded(family) {
            if let Ok(face) = ttf_parser::Face::parse(&font.data, font.index) {
                let scale = size / face.units_per_em() as f32;
                let fallback_advance = face.units_per_em() as f32 * 0.5;
                return text
                    .chars()
                    .map(|c| {
                        face.glyph_index(c)
                            .and_then(|g| face.glyph_hor_advance(g))
                            .map(f32::from)
                            .unwrap_or(fallback_advance)
                    })
                    .sum::<f32>()
                    * scale;
            }
        }
        let bold = family == FALLBACK_FONT_BOLD;
        text.chars().map(|c| builtin_advance(c, bold)).sum::<f32>() * size
    }

    /// Non-fatal font issues recorded so far.
    pub fn issues(&self) -> &[ResourceIssue] {
        &self.issues
    }

    pub fn take_issues(&mut self) -> Vec<ResourceIssue> {
        std::mem::take(&mut self.issues)
    }
}

/// Approximate Helvetica advance in em units.
fn builtin_advance(c: char, bold: bool) -> f32 {
    let base = match c {
        ' ' | '.' | ',' | ':' | ';' | '!' | '\'' | '|' => 0.278,
        'i' | 'j' | 'l' => 0.222,
        'f' | 't' | 'r' | 'I' | '(' | ')' | '[' | ']' | '-' => 0.333,
        'm' | 'M' | 'W' => 0.833,
        'w' => 0.722,
        '0'..='9' | '$' | '+' | '=' | '<' | '>' | '#' | '_' => 0.556,
        'A'..='Z' => 0.667,
        '%' => 0.889,
        _ => 0.556,
    };
    if bold {
        base * 1.06
    } else {
        base
    }
}
