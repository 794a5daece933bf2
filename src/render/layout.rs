//! Pagination: turns a [`Story`] into positioned items on Letter pages.
//!
//! ## Document order
//!
//! ```text
//! cover ─▶ table of contents ─▶ one section per language ─▶ appendix
//! ```
//!
//! Every section starts on a fresh page. The table of contents needs the
//! page each section lands on, so the body is laid out first, the contents
//! page count is measured, and the contents are laid out last with the final
//! numbers.
//!
//! Coordinates in [`Placed`] are points measured from the **top-left**
//! corner; the PDF writer flips them.

use crate::render::fonts::FontBook;
use crate::render::markdown::Flowable;
use crate::render::style::{
    Align, Color, Direction, ParagraphStyle, BODY_COLOR, FALLBACK_FONT, HEADER_COLOR, TITLE_COLOR,
};
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::warn;

/// US Letter, 8.5 × 11 in.
pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;
pub const MARGIN: f32 = 72.0;
pub const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

/// Appendix body when no image was left over for it.
pub const NO_APPENDIX_IMAGES: &str = "No additional images or charts for this report.";

/// Everything the renderer will lay out.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub title: String,
    pub date: NaiveDate,
    pub description: String,
    pub sections: Vec<Section>,
    pub appendix_title: String,
    pub appendix: Vec<Flowable>,
}

/// One language section.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub language: String,
    /// "Summary in Hindi".
    pub heading: String,
    pub heading_style: ParagraphStyle,
    pub direction: Direction,
    pub flowables: Vec<Flowable>,
}

/// A positioned drawing item.
#[derive(Debug, Clone, PartialEq)]
pub enum Placed {
    Text {
        x: f32,
        /// Baseline, from the top edge.
        y: f32,
        text: String,
        font_family: String,
        font_size: f32,
        color: Color,
    },
    Image {
        x: f32,
        /// Top edge.
        y: f32,
        width: f32,
        height: f32,
        path: PathBuf,
    },
    Rule {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Color,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaidOutPage {
    pub items: Vec<Placed>,
}

impl LaidOutPage {
    /// Concatenated text of the page, in drawing order.
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|i| match i {
                Placed::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    /// 1-based page number.
    pub page: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub pages: Vec<LaidOutPage>,
    pub toc: Vec<TocEntry>,
}

/// Lay out `story` with metrics from `fonts`.
pub fn layout_story(story: &Story, fonts: &FontBook) -> Layout {
    // Body first: section start pages relative to the first body page.
    let mut body = Composer::new(fonts);
    let mut starts: Vec<(String, usize)> = Vec::new();
    for section in &story.sections {
        body.page_break();
        starts.push((section.heading.clone(), body.page_index()));
        body.paragraph(&section.heading, &section.heading_style, section.direction);
        for flowable in &section.flowables {
            body.flowable(flowable, section.direction);
        }
    }
    body.page_break();
    starts.push((story.appendix_title.clone(), body.page_index()));
    let style = ParagraphStyle::section_header(FALLBACK_FONT, Align::Left);
    body.paragraph(&story.appendix_title, &style, Direction::Ltr);
    if story.appendix.is_empty() {
        let note = ParagraphStyle::body(FALLBACK_FONT, Align::Left);
        body.paragraph(NO_APPENDIX_IMAGES, &note, Direction::Ltr);
    }
    for flowable in &story.appendix {
        body.flowable(flowable, Direction::Ltr);
    }
    let body_pages = body.finish();

    // Contents length does not depend on the numbers printed in it.
    let draft: Vec<TocEntry> = starts
        .iter()
        .map(|(label, _)| TocEntry {
            label: label.clone(),
            page: 0,
        })
        .collect();
    let toc_page_count = compose_toc(&draft, fonts).len();

    let first_body_page = 1 + toc_page_count + 1;
    let toc: Vec<TocEntry> = starts
        .into_iter()
        .map(|(label, rel)| TocEntry {
            label,
            page: first_body_page + rel,
        })
        .collect();

    let mut pages = vec![compose_cover(story, fonts)];
    pages.extend(compose_toc(&toc, fonts));
    pages.extend(body_pages);
    add_page_numbers(&mut pages, fonts);

    Layout { pages, toc }
}

fn compose_cover(story: &Story, fonts: &FontBook) -> LaidOutPage {
    let mut c = Composer::new(fonts);
    c.spacer(PAGE_HEIGHT * 0.22);
    c.paragraph(&story.title, &ParagraphStyle::title(), Direction::Ltr);
    c.rule(CONTENT_WIDTH * 0.5, 2.0, TITLE_COLOR);
    c.spacer(18.0);

    let mut date_style = ParagraphStyle::section_header(FALLBACK_FONT, Align::Center);
    date_style.font_size = 12.0;
    date_style.leading = 16.0;
    date_style.color = HEADER_COLOR;
    c.paragraph(
        &format!("Generated on {}", story.date.format("%B %-d, %Y")),
        &date_style,
        Direction::Ltr,
    );

    let mut desc_style = ParagraphStyle::body(FALLBACK_FONT, Align::Center);
    desc_style.font_size = 11.0;
    desc_style.leading = 15.0;
    c.spacer(12.0);
    c.paragraph(&story.description, &desc_style, Direction::Ltr);

    let mut pages = c.finish();
    if pages.len() > 1 {
        warn!(
            "Cover description does not fit on one page; {} overflow page(s) dropped",
            pages.len() - 1
        );
        pages.truncate(1);
        if let Some(Placed::Text { text, .. }) = pages[0].items.last_mut() {
            text.push('…');
        }
    }
    pages.pop().unwrap_or_default()
}

fn compose_toc(entries: &[TocEntry], fonts: &FontBook) -> Vec<LaidOutPage> {
    let mut c = Composer::new(fonts);
    let heading = ParagraphStyle::section_header(FALLBACK_FONT, Align::Left);
    c.paragraph("Table of Contents", &heading, Direction::Ltr);
    let mut entry_style = ParagraphStyle::body(FALLBACK_FONT, Align::Left);
    entry_style.font_size = 12.0;
    entry_style.leading = 22.0;
    entry_style.color = HEADER_COLOR;
    for (i, entry) in entries.iter().enumerate() {
        let label = format!("{}. {}", i + 1, entry.label);
        c.toc_line(&label, entry.page, &entry_style);
    }
    let pages = c.finish();
    if pages.is_empty() {
        vec![LaidOutPage::default()]
    } else {
        pages
    }
}

fn add_page_numbers(pages: &mut [LaidOutPage], fonts: &FontBook) {
    let total = pages.len();
    for (i, page) in pages.iter_mut().enumerate() {
        let text = format!("Page {} of {}", i + 1, total);
        let width = fonts.measure(FALLBACK_FONT, &text, 8.0);
        page.items.push(Placed::Text {
            x: (PAGE_WIDTH - width) / 2.0,
            y: PAGE_HEIGHT - MARGIN / 2.0,
            text,
            font_family: FALLBACK_FONT.to_string(),
            font_size: 8.0,
            color: BODY_COLOR,
        });
    }
}

/// Flowing cursor over a sequence of pages.
struct Composer<'a> {
    fonts: &'a FontBook,
    pages: Vec<LaidOutPage>,
    current: LaidOutPage,
    cursor: f32,
}

impl<'a> Composer<'a> {
    fn new(fonts: &'a FontBook) -> Self {
        Self {
            fonts,
            pages: Vec::new(),
            current: LaidOutPage::default(),
            cursor: MARGIN,
        }
    }

    /// Index of the page currently being filled.
    fn page_index(&self) -> usize {
        self.pages.len()
    }

    fn at_top(&self) -> bool {
        self.cursor <= MARGIN
    }

    /// Start a new page unless the current one is still empty.
    fn page_break(&mut self) {
        if !self.current.items.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
        }
        self.cursor = MARGIN;
    }

    fn ensure(&mut self, height: f32) {
        if self.cursor + height > PAGE_HEIGHT - MARGIN && !self.at_top() {
            self.page_break();
        }
    }

    fn spacer(&mut self, height: f32) {
        if self.cursor + height > PAGE_HEIGHT - MARGIN {
            self.page_break();
        } else {
            self.cursor += height;
        }
    }

    fn flowable(&mut self, flowable: &Flowable, direction: Direction) {
        match flowable {
            Flowable::Heading { text, style }
            | Flowable::Paragraph { text, style, .. }
            | Flowable::Placeholder { text, style } => self.paragraph(text, style, direction),
            Flowable::Image {
                caption,
                path,
                width,
                height,
                caption_style,
                ..
            } => {
                self.ensure(height + caption_style.leading + caption_style.space_before);
                self.current.items.push(Placed::Image {
                    x: MARGIN + (CONTENT_WIDTH - width) / 2.0,
                    y: self.cursor,
                    width: *width,
                    height: *height,
                    path: path.clone(),
                });
                self.cursor += height;
                if caption.trim().is_empty() {
                    self.cursor += caption_style.space_after;
                } else {
                    self.paragraph(caption, caption_style, direction);
                }
            }
            Flowable::Spacer(h) => self.spacer(*h),
            Flowable::PageBreak => self.page_break(),
        }
    }

    fn paragraph(&mut self, text: &str, style: &ParagraphStyle, direction: Direction) {
        if !self.at_top() {
            self.cursor += style.space_before;
        }
        let lines = wrap_text(self.fonts, text, &style.font_family, style.font_size, CONTENT_WIDTH);
        for line in lines {
            self.ensure(style.leading);
            let visual = match direction {
                Direction::Rtl => visual_order(&line),
                Direction::Ltr => line,
            };
            let width = self.fonts.measure(&style.font_family, &visual, style.font_size);
            let x = match style.align {
                Align::Left => MARGIN,
                Align::Right => PAGE_WIDTH - MARGIN - width,
                Align::Center => MARGIN + (CONTENT_WIDTH - width) / 2.0,
            };
            self.current.items.push(Placed::Text {
                x,
                y: self.cursor + style.font_size * 0.8,
                text: visual,
                font_family: style.font_family.clone(),
                font_size: style.font_size,
                color: style.color,
            });
            self.cursor += style.leading;
        }
        self.cursor += style.space_after;
    }

    fn toc_line(&mut self, label: &str, page: usize, style: &ParagraphStyle) {
        self.ensure(style.leading);
        let baseline = self.cursor + style.font_size * 0.8;
        let number = page.to_string();
        let number_width = self.fonts.measure(&style.font_family, &number, style.font_size);
        self.current.items.push(Placed::Text {
            x: MARGIN,
            y: baseline,
            text: label.to_string(),
            font_family: style.font_family.clone(),
            font_size: style.font_size,
            color: style.color,
        });
        self.current.items.push(Placed::Text {
            x: PAGE_WIDTH - MARGIN - number_width,
            y: baseline,
            text: number,
            font_family: style.font_family.clone(),
            font_size: style.font_size,
            color: style.color,
        });
        self.cursor += style.leading;
    }

    fn rule(&mut self, width: f32, thickness: f32, color: Color) {
        self.current.items.push(Placed::Rule {
            x: MARGIN + (CONTENT_WIDTH - width) / 2.0,
            y: self.cursor,
            width,
            height: thickness,
            color,
        });
        self.cursor += thickness;
    }

    fn finish(mut self) -> Vec<LaidOutPage> {
        if !self.current.items.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

/// Greedy word wrap in logical order. Words wider than `max_width` are
/// broken between characters.
pub fn wrap_text(fonts: &FontBook, text: &str, family: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let space = fonts.measure(family, " ", size);
    let mut line_width = 0.0f32;

    for word in text.split_whitespace() {
        let word_width = fonts.measure(family, word, size);
        if word_width > max_width {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let mut piece = String::new();
            for ch in word.chars() {
                let mut candidate = piece.clone();
                candidate.push(ch);
                if fonts.measure(family, &candidate, size) > max_width && !piece.is_empty() {
                    lines.push(std::mem::take(&mut piece));
                    piece.push(ch);
                } else {
                    piece = candidate;
                }
            }
            line_width = fonts.measure(family, &piece, size);
            line = piece;
            continue;
        }
        let needed = if line.is_empty() { word_width } else { line_width + space + word_width };
        if needed > max_width && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line.push_str(word);
            line_width = word_width;
        } else {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
            line_width = needed;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BidiClass {
    Rtl,
    Ltr,
    Neutral,
}

fn classify(c: char) -> BidiClass {
    match c as u32 {
        0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF => BidiClass::Rtl,
        _ if c.is_alphanumeric() => BidiClass::Ltr,
        _ => BidiClass::Neutral,
    }
}

fn mirror(c: char) -> char {
    match c {
        '(' => ')',
        ')' => '(',
        '[' => ']',
        ']' => '[',
        '<' => '>',
        '>' => '<',
        '{' => '}',
        '}' => '{',
        other => other,
    }
}

/// Reorder one line of a right-to-left paragraph for left-to-right drawing.
///
/// Runs of left-to-right text (Latin words, numbers) keep their internal
/// order; right-to-left runs are reversed and brackets inside them mirrored;
/// the run sequence itself is reversed. Neutral characters between two
/// left-to-right runs join them; all other neutrals take the paragraph's
/// right-to-left direction. Contextual shaping is not applied.
pub fn visual_order(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let classes: Vec<BidiClass> = chars.iter().map(|c| classify(*c)).collect();

    let mut resolved = classes.clone();
    let mut i = 0;
    while i < chars.len() {
        if classes[i] != BidiClass::Neutral {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && classes[i] == BidiClass::Neutral {
            i += 1;
        }
        let before = start.checked_sub(1).map(|j| classes[j]);
        let after = classes.get(i).copied();
        let class = if before == Some(BidiClass::Ltr) && after == Some(BidiClass::Ltr) {
            BidiClass::Ltr
        } else {
            BidiClass::Rtl
        };
        for slot in &mut resolved[start..i] {
            *slot = class;
        }
    }

    let mut runs: Vec<(BidiClass, Vec<char>)> = Vec::new();
    for (c, class) in chars.into_iter().zip(resolved) {
        match runs.last_mut() {
            Some((last, run)) if *last == class => run.push(c),
            _ => runs.push((class, vec![c])),
        }
    }

    runs.into_iter()
        .rev()
        .map(|(class, run)| match class {
            BidiClass::Rtl => run.into_iter().rev().map(mirror).collect::<String>(),
            _ => run.into_iter().collect::<String>(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::style::FALLBACK_FONT;

    #[test]
    fn wrap_respects_width() {
        let fonts = FontBook::empty();
        let text = "The S&P 500 closed higher as technology shares rallied on strong earnings";
        let lines = wrap_text(&fonts, text, FALLBACK_FONT, 10.0, 120.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(fonts.measure(FALLBACK_FONT, line, 10.0) <= 120.0, "{line}");
        }
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn wrap_breaks_long_words() {
        let fonts = FontBook::empty();
        let lines = wrap_text(&fonts, &"x".repeat(200), FALLBACK_FONT, 10.0, 100.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat().len(), 200);
    }

    #[test]
    fn long_word_after_short_line_starts_fresh_width() {
        let fonts = FontBook::empty();
        let text = format!("ab {} cd ef", "y".repeat(60));
        let lines = wrap_text(&fonts, &text, FALLBACK_FONT, 10.0, 100.0);
        assert_eq!(lines[0], "ab");
        for line in &lines {
            assert!(fonts.measure(FALLBACK_FONT, line, 10.0) <= 100.0, "{line}");
        }
        assert_eq!(lines.concat().matches('y').count(), 60);
        assert!(lines.last().unwrap().ends_with("ef"));
    }

    #[test]
    fn visual_order_reverses_rtl_keeps_numbers() {
        assert_eq!(visual_order("אבג"), "גבא");
        assert_eq!(visual_order("שלום 500 עולם"), "םלוע 500 םולש");
        assert_eq!(visual_order("Summary in Arabic"), "Summary in Arabic");
        assert_eq!(visual_order("(אב)"), "(בא)");
    }

    fn section(direction: Direction, n: usize) -> Section {
        let style = ParagraphStyle::body(FALLBACK_FONT, Align::Left);
        Section {
            language: "en".into(),
            heading: "Summary in English".into(),
            heading_style: ParagraphStyle::section_header(FALLBACK_FONT, Align::Left),
            direction,
            flowables: (0..n)
                .map(|i| Flowable::Paragraph {
                    text: format!("Paragraph {i}"),
                    style: style.clone(),
                    bullet: false,
                })
                .collect(),
        }
    }

    fn story(sections: Vec<Section>) -> Story {
        Story {
            title: "Daily Market Summary".into(),
            date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            description: "US markets".into(),
            sections,
            appendix_title: "Appendix: Images and Charts".into(),
            appendix: vec![],
        }
    }

    #[test]
    fn sections_start_after_cover_and_toc() {
        let fonts = FontBook::empty();
        let layout = layout_story(&story(vec![section(Direction::Ltr, 3), section(Direction::Ltr, 3)]), &fonts);
        assert_eq!(layout.pages.len(), 5);
        assert_eq!(layout.toc.iter().map(|e| e.page).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert!(layout.pages[0].text().contains("Generated on October 16, 2026"));
        assert!(layout.pages[1].text().contains("Table of Contents"));
        assert!(layout.pages[3].text().contains("Page 4 of 5"));
    }

    #[test]
    fn appendix_is_listed_even_without_images() {
        let fonts = FontBook::empty();
        let layout = layout_story(&story(vec![section(Direction::Ltr, 2)]), &fonts);
        let last = layout.toc.last().unwrap();
        assert_eq!(last.label, "Appendix: Images and Charts");
        assert_eq!(last.page, 4);
        let page = layout.pages[3].text();
        assert!(page.contains("Appendix: Images and Charts"));
        assert!(page.contains(NO_APPENDIX_IMAGES));
        assert!(layout.pages[1].text().contains("2. Appendix: Images and Charts"));
    }

    #[test]
    fn overlong_cover_description_is_cut_with_ellipsis() {
        let fonts = FontBook::empty();
        let mut s = story(vec![section(Direction::Ltr, 1)]);
        s.description = "markets ".repeat(2_000);
        let layout = layout_story(&s, &fonts);
        let cover = &layout.pages[0];
        assert!(!cover.text().contains("Table of Contents"));
        let last_line = cover
            .items
            .iter()
            .rev()
            .find_map(|i| match i {
                Placed::Text { text, .. } if text.contains("markets") => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(last_line.ends_with('…'));
        assert!(layout.pages[1].text().contains("Table of Contents"));
    }

    #[test]
    fn long_section_spills_onto_more_pages() {
        let fonts = FontBook::empty();
        let layout = layout_story(&story(vec![section(Direction::Ltr, 120), section(Direction::Ltr, 1)]), &fonts);
        let pages: Vec<usize> = layout.toc.iter().map(|e| e.page).collect();
        assert_eq!(pages[0], 3);
        assert!(pages[1] > 4);
        assert_eq!(pages[2], pages[1] + 1);
        assert_eq!(layout.pages.len(), pages[2]);
    }

    #[test]
    fn rtl_right_alignment_hugs_right_margin() {
        let fonts = FontBook::empty();
        let mut s = section(Direction::Rtl, 1);
        if let Flowable::Paragraph { style, .. } = &mut s.flowables[0] {
            style.align = Align::Right;
        }
        let layout = layout_story(&story(vec![s]), &fonts);
        let body = &layout.pages[2];
        let para = body
            .items
            .iter()
            .find_map(|i| match i {
                Placed::Text { x, text, font_size, font_family, .. } if text.contains("Paragraph") => {
                    Some(*x + fonts.measure(font_family, text, *font_size))
                }
                _ => None,
            })
            .unwrap();
        assert!((para - (PAGE_WIDTH - MARGIN)).abs() < 0.01);
    }
}
