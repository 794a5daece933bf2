//! Document rendering: content store → multi-language PDF.
//!
//! ## Data Flow
//!
//! ```text
//! ContentStore ──▶ images ──▶ markdown ──▶ layout ──▶ pdf ──▶ market_summary_<date>.pdf
//!                 (fetch)    (flowables)  (pages)    (bytes)   (atomic write)
//! ```
//!
//! 1. [`images`]: fetch and normalise every referenced image into scratch
//! 2. [`markdown`]: parse each language's text into flowables with its
//!    direction-aware [`style::SectionStyle`]
//! 3. [`layout`]: wrap, paginate, and number pages; build the contents
//! 4. [`pdf`]: serialise with embedded or base-14 fonts
//!
//! Fetched images are removed from the scratch directory once rendering
//! finishes, whether it succeeded or not.

pub mod fonts;
pub mod images;
pub mod layout;
pub mod markdown;
pub mod pdf;
pub mod style;

use crate::config::PipelineConfig;
use crate::error::{DigestError, ResourceIssue};
use crate::scratch::TempFileRegistry;
use crate::store::ContentStore;
use chrono::{Local, NaiveDate};
use fonts::FontBook;
use images::{ImageResolver, ResolvedImages};
use layout::{layout_story, Section, Story, TocEntry};
use markdown::{fit_image, parse_markdown, Flowable};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use style::{language_name, Align, ParagraphStyle, RenderSpecTable, SectionStyle, FALLBACK_FONT, FALLBACK_FONT_BOLD};
use tracing::{debug, info};

pub const APPENDIX_TITLE: &str = "Appendix: Images and Charts";

/// Summary of one render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub path: PathBuf,
    pub pages: usize,
    pub toc: Vec<(String, usize)>,
    /// Non-fatal problems: missing fonts, unavailable images.
    pub issues: Vec<ResourceIssue>,
}

/// Renders a [`ContentStore`] into the dated PDF artifact.
pub struct DocumentRenderer {
    output_dir: PathBuf,
    title: String,
    specs: RenderSpecTable,
    fonts: FontBook,
    resolver: ImageResolver,
    scratch: Arc<TempFileRegistry>,
}

impl DocumentRenderer {
    pub fn new(config: &PipelineConfig, scratch: Arc<TempFileRegistry>) -> Result<Self, DigestError> {
        Ok(Self {
            output_dir: config.output_dir.clone(),
            title: config.report_title.clone(),
            specs: RenderSpecTable::default(),
            fonts: FontBook::new(&config.font_dir, config.load_system_fonts),
            resolver: ImageResolver::new(Arc::clone(&scratch), config.image_timeout_secs)?,
            scratch,
        })
    }

    pub fn with_fonts(mut self, fonts: FontBook) -> Self {
        self.fonts = fonts;
        self
    }

    pub fn with_specs(mut self, specs: RenderSpecTable) -> Self {
        self.specs = specs;
        self
    }

    /// Resolve the font of each of `languages`; returns the missing ones.
    pub fn check_fonts(&mut self, languages: &[String]) -> Vec<ResourceIssue> {
        for language in languages {
            let spec = self.specs.lookup(language);
            self.fonts.resolve(&spec.preferred_font, &spec.fallback_font);
        }
        self.fonts.take_issues()
    }

    /// `<output_dir>/market_summary_<YYYY-MM-DD>.pdf`
    pub fn output_path(&self, date: NaiveDate) -> PathBuf {
        self.output_dir
            .join(format!("market_summary_{}.pdf", date.format("%Y-%m-%d")))
    }

    /// Render for today's local date and return the document path.
    pub async fn render(&mut self, store: &ContentStore) -> Result<PathBuf, DigestError> {
        let today = Local::now().date_naive();
        self.render_for_date(store, today).await.map(|r| r.path)
    }

    /// Render for `date`. Scratch files are released on every path.
    pub async fn render_for_date(
        &mut self,
        store: &ContentStore,
        date: NaiveDate,
    ) -> Result<RenderReport, DigestError> {
        let result = self.render_inner(store, date).await;
        let removed = self.scratch.cleanup();
        debug!("Render finalizer removed {} scratch file(s)", removed);
        result
    }

    async fn render_inner(
        &mut self,
        store: &ContentStore,
        date: NaiveDate,
    ) -> Result<RenderReport, DigestError> {
        let (story, issues) = self.build_story(store, date).await?;
        let layout = layout_story(&story, &self.fonts);
        let bytes = pdf::write_pdf(&self.title, &layout.pages, &self.fonts)?;

        let path = self.output_path(date);
        write_atomic(&path, &bytes).await?;
        info!(
            "Rendered {} ({} page(s), {} language(s), {} issue(s))",
            path.display(),
            layout.pages.len(),
            story.sections.len(),
            issues.len()
        );

        Ok(RenderReport {
            path,
            pages: layout.pages.len(),
            toc: layout
                .toc
                .into_iter()
                .map(|TocEntry { label, page }| (label, page))
                .collect(),
            issues,
        })
    }

    /// Resolve images and fonts, and parse every language into a [`Story`].
    ///
    /// Non-fatal issues are returned alongside; only an empty store fails.
    pub async fn build_story(
        &mut self,
        store: &ContentStore,
        date: NaiveDate,
    ) -> Result<(Story, Vec<ResourceIssue>), DigestError> {
        if store.is_empty() {
            return Err(DigestError::NoContent);
        }

        let all_images = store.all_images();
        let resolved = self.resolver.resolve_all(&all_images).await;
        let mut issues: Vec<ResourceIssue> = Vec::new();
        let mut inlined: Vec<String> = Vec::new();
        let mut sections = Vec::with_capacity(store.len());

        for (language, content) in store.iter() {
            let spec = self.specs.lookup(language);
            let family = self.fonts.resolve(&spec.preferred_font, &spec.fallback_font);
            let style = SectionStyle::new(&spec, &family);
            let parsed = parse_markdown(&content.text, &style, &resolved);
            debug!(
                "Section '{}': {} flowable(s), {} dropped, font '{}'",
                language,
                parsed.flowables.len(),
                parsed.dropped.len(),
                family
            );
            push_unique(&mut issues, parsed.dropped);
            inlined.extend(parsed.inlined);

            sections.push(Section {
                language: language.to_string(),
                heading: format!("Summary in {}", language_name(language)),
                heading_style: ParagraphStyle::section_header(FALLBACK_FONT_BOLD, spec.body_align()),
                direction: spec.direction,
                flowables: parsed.flowables,
            });
        }

        let appendix = appendix_flowables(store, &resolved, &inlined);
        push_unique(&mut issues, resolved.issues());
        push_unique(&mut issues, self.fonts.take_issues());

        let names: Vec<&str> = store.languages().into_iter().map(language_name).collect();
        let story = Story {
            title: self.title.clone(),
            date,
            description: format!(
                "Daily summary of US stock market activity, key movers, and macro drivers, \
                 in {} language(s): {}.",
                names.len(),
                names.join(", ")
            ),
            sections,
            appendix_title: APPENDIX_TITLE.to_string(),
            appendix,
        };
        Ok((story, issues))
    }
}

/// Every image not already inlined: the picture with its caption, or a
/// placeholder line when it could not be resolved.
fn appendix_flowables(store: &ContentStore, resolved: &ResolvedImages, inlined: &[String]) -> Vec<Flowable> {
    let caption_style = ParagraphStyle::caption(FALLBACK_FONT);
    let mut placeholder_style = ParagraphStyle::body(FALLBACK_FONT, Align::Center);
    placeholder_style.color = style::HEADER_COLOR;

    store
        .all_images()
        .into_iter()
        .filter(|image| !inlined.contains(&image.source))
        .map(|image| match resolved.get(&image.source) {
            Some(found) => {
                let (width, height) = fit_image(found.width, found.height);
                Flowable::Image {
                    source: image.source.clone(),
                    caption: image.caption.clone(),
                    path: found.path.clone(),
                    width,
                    height,
                    caption_style: caption_style.clone(),
                }
            }
            None => {
                let label = if image.caption.is_empty() {
                    image.source.as_str()
                } else {
                    image.caption.as_str()
                };
                Flowable::Placeholder {
                    text: format!("[Image unavailable: {label}]"),
                    style: placeholder_style.clone(),
                }
            }
        })
        .collect()
}

fn push_unique(into: &mut Vec<ResourceIssue>, from: Vec<ResourceIssue>) {
    for issue in from {
        if !into.contains(&issue) {
            into.push(issue);
        }
    }
}

/// Write to a temp sibling, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DigestError> {
    let fail = |source| DigestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}
