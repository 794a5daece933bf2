//! Per-language layout metadata and paragraph styles.

use serde::{Deserialize, Serialize};

/// Family used when a preferred font is unavailable. Always available: it is
/// one of the PDF base-14 fonts.
pub const FALLBACK_FONT: &str = "Helvetica";

/// Bold variant of [`FALLBACK_FONT`].
pub const FALLBACK_FONT_BOLD: &str = "Helvetica-Bold";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Align {
    Left,
    Right,
    Center,
}

/// Layout metadata for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSpec {
    pub direction: Direction,
    pub preferred_font: String,
    pub fallback_font: String,
}

impl RenderSpec {
    pub fn new(direction: Direction, preferred_font: impl Into<String>) -> Self {
        Self {
            direction,
            preferred_font: preferred_font.into(),
            fallback_font: FALLBACK_FONT.to_string(),
        }
    }

    pub fn body_align(&self) -> Align {
        match self.direction {
            Direction::Ltr => Align::Left,
            Direction::Rtl => Align::Right,
        }
    }
}

/// Static table from language code to [`RenderSpec`].
///
/// Unknown languages get a left-to-right spec using the fallback font.
#[derive(Debug, Clone)]
pub struct RenderSpecTable {
    entries: Vec<(String, RenderSpec)>,
}

impl Default for RenderSpecTable {
    fn default() -> Self {
        use Direction::*;
        let entries = [
            ("en", Ltr, FALLBACK_FONT),
            ("hi", Ltr, "Noto Sans Devanagari"),
            ("ar", Rtl, "Noto Sans Arabic"),
            ("he", Rtl, "Noto Sans Hebrew"),
            ("fa", Rtl, "Noto Sans Arabic"),
            ("ur", Rtl, "Noto Sans Arabic"),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(code, dir, font)| (code.to_string(), RenderSpec::new(dir, font)))
                .collect(),
        }
    }
}

impl RenderSpecTable {
    pub fn lookup(&self, language: &str) -> RenderSpec {
        self.entries
            .iter()
            .find(|(code, _)| code == language)
            .map(|(_, spec)| spec.clone())
            .unwrap_or_else(|| RenderSpec::new(Direction::Ltr, FALLBACK_FONT))
    }

    /// Add or replace the spec for `language`.
    pub fn insert(&mut self, language: impl Into<String>, spec: RenderSpec) {
        let language = language.into();
        match self.entries.iter_mut().find(|(code, _)| *code == language) {
            Some((_, existing)) => *existing = spec,
            None => self.entries.push((language, spec)),
        }
    }

    /// Every distinct preferred font family in the table.
    pub fn font_families(&self) -> Vec<&str> {
        let mut families: Vec<&str> = Vec::new();
        for (_, spec) in &self.entries {
            if !families.contains(&spec.preferred_font.as_str()) {
                families.push(&spec.preferred_font);
            }
        }
        families
    }
}

/// English display name for a language code.
pub fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "hi" => "Hindi",
        "ar" => "Arabic",
        "he" => "Hebrew",
        "fa" => "Persian",
        "ur" => "Urdu",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "zh" => "Chinese",
        "ja" => "Japanese",
        other => other,
    }
}

/// RGB colour with 0–255 channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn hex(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xff) as u8,
            g: ((rgb >> 8) & 0xff) as u8,
            b: (rgb & 0xff) as u8,
        }
    }
}

pub const TITLE_COLOR: Color = Color::hex(0x1a73e8);
pub const HEADER_COLOR: Color = Color::hex(0x202124);
pub const BODY_COLOR: Color = Color::hex(0x5f6368);

/// Typography for one kind of text block. Sizes are in points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphStyle {
    pub font_family: String,
    pub font_size: f32,
    pub leading: f32,
    pub color: Color,
    pub align: Align,
    pub space_before: f32,
    pub space_after: f32,
}

impl ParagraphStyle {
    /// Cover-page title: 24 pt, centered.
    pub fn title() -> Self {
        Self {
            font_family: FALLBACK_FONT_BOLD.into(),
            font_size: 24.0,
            leading: 28.0,
            color: TITLE_COLOR,
            align: Align::Center,
            space_before: 0.0,
            space_after: 18.0,
        }
    }

    /// Language section header: 16 pt.
    pub fn section_header(font_family: &str, align: Align) -> Self {
        Self {
            font_family: font_family.into(),
            font_size: 16.0,
            leading: 20.0,
            color: HEADER_COLOR,
            align,
            space_before: 20.0,
            space_after: 10.0,
        }
    }

    /// Body paragraph: 10 pt.
    pub fn body(font_family: &str, align: Align) -> Self {
        Self {
            font_family: font_family.into(),
            font_size: 10.0,
            leading: 14.0,
            color: BODY_COLOR,
            align,
            space_before: 0.0,
            space_after: 12.0,
        }
    }

    /// Caption under an image: 9 pt, centered.
    pub fn caption(font_family: &str) -> Self {
        Self {
            font_family: font_family.into(),
            font_size: 9.0,
            leading: 12.0,
            color: BODY_COLOR,
            align: Align::Center,
            space_before: 4.0,
            space_after: 14.0,
        }
    }
}

/// Styles for one language section, derived from its [`RenderSpec`] and the
/// font actually resolved for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionStyle {
    pub direction: Direction,
    pub header: ParagraphStyle,
    pub body: ParagraphStyle,
    pub caption: ParagraphStyle,
}

impl SectionStyle {
    pub fn new(spec: &RenderSpec, font_family: &str) -> Self {
        let align = spec.body_align();
        Self {
            direction: spec.direction,
            header: ParagraphStyle::section_header(font_family, align),
            body: ParagraphStyle::body(font_family, align),
            caption: ParagraphStyle::caption(font_family),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtl_languages_align_right() {
        let table = RenderSpecTable::default();
        assert_eq!(table.lookup("ar").body_align(), Align::Right);
        assert_eq!(table.lookup("he").body_align(), Align::Right);
        assert_eq!(table.lookup("hi").body_align(), Align::Left);
    }

    #[test]
    fn unknown_language_falls_back() {
        let spec = RenderSpecTable::default().lookup("sw");
        assert_eq!(spec.direction, Direction::Ltr);
        assert_eq!(spec.preferred_font, FALLBACK_FONT);
    }

    #[test]
    fn insert_replaces() {
        let mut table = RenderSpecTable::default();
        table.insert("hi", RenderSpec::new(Direction::Ltr, "Mukta"));
        assert_eq!(table.lookup("hi").preferred_font, "Mukta");
        assert!(table.font_families().contains(&"Mukta"));
    }

    #[test]
    fn color_from_hex() {
        assert_eq!(TITLE_COLOR, Color { r: 0x1a, g: 0x73, b: 0xe8 });
    }

    #[test]
    fn language_names() {
        assert_eq!(language_name("he"), "Hebrew");
        assert_eq!(language_name("xx"), "xx");
    }
}
