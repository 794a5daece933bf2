//! PDF serialisation of laid-out pages via `printpdf`.
//!
//! Families with face data in the [`FontBook`] are embedded; Helvetica and
//! Helvetica-Bold use the PDF base-14 fonts. Base-14 fonts only cover
//! WinAnsi, so text drawn with them has other characters replaced by `?`.

use crate::error::DigestError;
use crate::render::fonts::FontBook;
use crate::render::layout::{LaidOutPage, Placed, PAGE_HEIGHT, PAGE_WIDTH};
use crate::render::style::{Color, FALLBACK_FONT_BOLD};
use printpdf::font::ParsedFont;
use printpdf::graphics::{LinePoint, PaintMode, Point, Polygon, PolygonRing, WindingOrder};
use printpdf::matrix::TextMatrix;
use printpdf::ops::Op;
use printpdf::text::TextItem;
use printpdf::xobject::{XObject, XObjectTransform};
use printpdf::{BuiltinFont, FontId, Mm, PdfDocument, PdfPage, PdfSaveOptions, Pt, Rgb, XObjectId};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Clone)]
enum FontHandle {
    Embedded(FontId),
    Builtin(BuiltinFont),
}

/// Serialise `pages` into PDF bytes.
pub fn write_pdf(title: &str, pages: &[LaidOutPage], fonts: &FontBook) -> Result<Vec<u8>, DigestError> {
    let mut writer = PdfWriter::new(title);
    for page in pages {
        writer.page(page, fonts)?;
    }
    Ok(writer.finish())
}

struct PdfWriter {
    doc: PdfDocument,
    fonts: HashMap<String, FontHandle>,
    images: HashMap<PathBuf, (XObjectId, (u32, u32))>,
}

impl PdfWriter {
    fn new(title: &str) -> Self {
        Self {
            doc: PdfDocument::new(title),
            fonts: HashMap::new(),
            images: HashMap::new(),
        }
    }

    fn font(&mut self, family: &str, book: &FontBook) -> FontHandle {
        if let Some(handle) = self.fonts.get(family) {
            return handle.clone();
        }
        let handle = match book.loaded(family) {
            Some(loaded) => {
                let mut warnings = Vec::new();
                match ParsedFont::from_bytes(&loaded.data, loaded.index as usize, &mut warnings) {
                    Some(parsed) => FontHandle::Embedded(self.doc.add_font(&parsed)),
                    None => {
                        warn!("Could not embed font '{}'; using Helvetica", family);
                        FontHandle::Builtin(BuiltinFont::Helvetica)
                    }
                }
            }
            None if family == FALLBACK_FONT_BOLD => FontHandle::Builtin(BuiltinFont::HelveticaBold),
            None => FontHandle::Builtin(BuiltinFont::Helvetica),
        };
        self.fonts.insert(family.to_string(), handle.clone());
        handle
    }

    fn image(&mut self, path: &PathBuf) -> Result<(XObjectId, (u32, u32)), DigestError> {
        if let Some(cached) = self.images.get(path) {
            return Ok(cached.clone());
        }
        let bytes = std::fs::read(path)
            .map_err(|e| DigestError::RenderFailed(format!("read {}: {}", path.display(), e)))?;
        let mut warnings = Vec::new();
        let raw = printpdf::image::RawImage::decode_from_bytes(&bytes, &mut warnings)
            .map_err(|e| DigestError::RenderFailed(format!("decode {}: {}", path.display(), e)))?;
        let dims = (raw.width as u32, raw.height as u32);
        let id = XObjectId::new();
        self.doc
            .resources
            .xobjects
            .map
            .insert(id.clone(), XObject::Image(raw));
        self.images.insert(path.clone(), (id.clone(), dims));
        Ok((id, dims))
    }

    fn page(&mut self, page: &LaidOutPage, book: &FontBook) -> Result<(), DigestError> {
        let mut ops = Vec::new();
        for item in &page.items {
            match item {
                Placed::Text {
                    x,
                    y,
                    text,
                    font_family,
                    font_size,
                    color,
                } => {
                    let font = self.font(font_family, book);
                    ops.push(Op::StartTextSection);
                    ops.push(Op::SetFillColor { col: pdf_color(color) });
                    ops.push(Op::SetTextMatrix {
                        matrix: TextMatrix::Translate(Pt(*x), Pt(PAGE_HEIGHT - y)),
                    });
                    match font {
                        FontHandle::Embedded(id) => {
                            ops.push(Op::SetFontSize { size: Pt(*font_size), font: id.clone() });
                            ops.push(Op::WriteText {
                                items: vec![TextItem::Text(text.clone())],
                                font: id,
                            });
                        }
                        FontHandle::Builtin(builtin) => {
                            ops.push(Op::SetFontSizeBuiltinFont {
                                size: Pt(*font_size),
                                font: builtin.clone(),
                            });
                            ops.push(Op::WriteTextBuiltinFont {
                                items: vec![TextItem::Text(winansi_lossy(text))],
                                font: builtin,
                            });
                        }
                    }
                    ops.push(Op::EndTextSection);
                }
                Placed::Image {
                    x,
                    y,
                    width,
                    height,
                    path,
                } => match self.image(path) {
                    Ok((id, (img_w, img_h))) => {
                        let transform = XObjectTransform {
                            translate_x: Some(Pt(*x)),
                            translate_y: Some(Pt(PAGE_HEIGHT - (y + height))),
                            scale_x: Some(width / img_w.max(1) as f32),
                            scale_y: Some(height / img_h.max(1) as f32),
                            rotate: None,
                            dpi: Some(72.0),
                        };
                        ops.push(Op::UseXobject { id, transform });
                    }
                    // The file was validated during resolution; a failure here
                    // loses only the picture.
                    Err(e) => warn!("Skipping image: {}", e),
                },
                Placed::Rule {
                    x,
                    y,
                    width,
                    height,
                    color,
                } => {
                    let bottom = PAGE_HEIGHT - (y + height);
                    let corner = |px: f32, py: f32| LinePoint {
                        p: Point { x: Pt(px), y: Pt(py) },
                        bezier: false,
                    };
                    let polygon = Polygon {
                        rings: vec![PolygonRing {
                            points: vec![
                                corner(*x, bottom),
                                corner(x + width, bottom),
                                corner(x + width, bottom + height),
                                corner(*x, bottom + height),
                            ],
                        }],
                        mode: PaintMode::Fill,
                        winding_order: WindingOrder::EvenOdd,
                    };
                    ops.push(Op::SetFillColor { col: pdf_color(color) });
                    ops.push(Op::DrawPolygon { polygon });
                }
            }
        }
        self.doc.pages.push(PdfPage::new(
            Mm::from(Pt(PAGE_WIDTH)),
            Mm::from(Pt(PAGE_HEIGHT)),
            ops,
        ));
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        let mut warnings = Vec::new();
        let bytes = self.doc.save(&PdfSaveOptions::default(), &mut warnings);
        debug!(
            "PDF serialised: {} page(s), {} bytes, {} warning(s)",
            self.doc.pages.len(),
            bytes.len(),
            warnings.len()
        );
        bytes
    }
}

fn pdf_color(c: &Color) -> printpdf::color::Color {
    printpdf::color::Color::Rgb(Rgb::new(
        c.r as f32 / 255.0,
        c.g as f32 / 255.0,
        c.b as f32 / 255.0,
        None,
    ))
}

/// Replace characters outside Latin-1 with `?`, keeping common typography
/// that WinAnsi maps (bullet, dashes, quotes, ellipsis).
pub fn winansi_lossy(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2022}' | '\u{2013}' | '\u{2014}' | '\u{2018}' | '\u{2019}' | '\u{201C}'
            | '\u{201D}' | '\u{2026}' | '\u{20AC}' => c,
            c if (c as u32) < 0x100 => c,
            _ => '?',
        })
        .collect()
}
