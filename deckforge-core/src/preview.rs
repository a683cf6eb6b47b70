//! Preview Renderer - Slide Wireframes as PNG
//!
//! Rendering reads the template and never changes it. Each element is
//! drawn as its box, with text shown as bars sized by the font size.

use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::orchestrator::TaskError;
use crate::parser::{ParseError, TemplateParser};
use crate::templates::{Element, ElementType, Frame, Slide, Template};

pub const DEFAULT_PREVIEW_WIDTH: u32 = 960;
const MIN_PREVIEW_WIDTH: u32 = 64;
/// Taller slides are cropped at this many widths.
const MAX_ASPECT: u32 = 8;
/// Pixel coordinates are held within this bound so rect arithmetic cannot overflow.
const PIXEL_LIMIT: f64 = (1u64 << 40) as f64;
const EMU_PER_POINT: f64 = 12_700.0;

const PAGE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const PLACEHOLDER: Rgba<u8> = Rgba([66, 133, 244, 255]);
const PLACEHOLDER_FILL: Rgba<u8> = Rgba([232, 240, 254, 255]);
const OUTLINE: Rgba<u8> = Rgba([150, 150, 150, 255]);
const MEDIA: Rgba<u8> = Rgba([110, 110, 110, 255]);
const TEXT: Rgba<u8> = Rgba([60, 60, 60, 255]);

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Slide index {index} out of range (template has {count} slides)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Cannot read deck for preview: {0}")]
    Parse(#[from] ParseError),

    #[error("Cannot encode preview image: {0}")]
    Encode(String),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Which deck a preview is drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PreviewTarget {
    /// The parsed template as uploaded.
    Template(String),
    /// The artifact of a completed generation task.
    Task(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PreviewRenderer {
    width: u32,
}

impl Default for PreviewRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_WIDTH)
    }
}

impl PreviewRenderer {
    pub fn new(width: u32) -> Self {
        Self { width: width.max(MIN_PREVIEW_WIDTH) }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Render slide `slide_index` (zero-based) of `template` to PNG bytes.
    pub fn render(&self, template: &Template, slide_index: usize) -> Result<Vec<u8>, PreviewError> {
        let slide = template.slides.get(slide_index).ok_or(PreviewError::IndexOutOfRange {
            index: slide_index,
            count: template.slides.len(),
        })?;
        let canvas = self.draw(template, slide);

        let mut buffer = Cursor::new(Vec::new());
        canvas
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| PreviewError::Encode(e.to_string()))?;
        Ok(buffer.into_inner())
    }

    /// Render a slide of a deck on disk, e.g. a generated artifact.
    pub fn render_file(&self, path: &Path, slide_index: usize) -> Result<Vec<u8>, PreviewError> {
        let template = TemplateParser::new(path).parse()?;
        self.render(&template, slide_index)
    }

    fn draw(&self, template: &Template, slide: &Slide) -> RgbaImage {
        let slide_w = template.slide_width.max(1) as f64;
        let slide_h = template.slide_height.max(1) as f64;
        let height = ((self.width as f64) * slide_h / slide_w)
            .round()
            .clamp(1.0, self.width.saturating_mul(MAX_ASPECT) as f64) as u32;
        let mut canvas = Canvas {
            img: ImageBuffer::from_pixel(self.width, height, PAGE),
            scale: self.width as f64 / slide_w,
        };

        for element in &slide.elements {
            let frame = element
                .frame
                .unwrap_or_else(|| default_frame(element, template.slide_width, template.slide_height));
            let rect = canvas.rect(&frame);

            match element.element_type {
                ElementType::Picture => {
                    canvas.stroke(rect, MEDIA);
                    canvas.line(rect.x0, rect.y0, rect.x1, rect.y1, MEDIA);
                    canvas.line(rect.x0, rect.y1, rect.x1, rect.y0, MEDIA);
                }
                ElementType::GraphicFrame => {
                    canvas.stroke(rect, MEDIA);
                    canvas.grid(rect, 3, MEDIA);
                }
                _ if element.is_placeholder => {
                    canvas.fill(rect, PLACEHOLDER_FILL);
                    canvas.stroke(rect, PLACEHOLDER);
                }
                _ => canvas.stroke(rect, OUTLINE),
            }
            canvas.text_bars(rect, element);
        }
        canvas.img
    }
}

/// Region for elements that inherit their position from the layout.
fn default_frame(element: &Element, slide_w: i64, slide_h: i64) -> Frame {
    let (top, bottom) = match element.placeholder_type.as_deref() {
        Some("ctrTitle") => (0.30, 0.50),
        Some("title") => (0.05, 0.20),
        Some("subTitle") => (0.55, 0.75),
        Some("dt") | Some("ftr") | Some("sldNum") => (0.90, 0.97),
        _ => (0.25, 0.90),
    };
    let x = (slide_w as f64 * 0.05) as i64;
    Frame {
        x,
        y: (slide_h as f64 * top) as i64,
        cx: slide_w.saturating_sub(x.saturating_mul(2)),
        cy: (slide_h as f64 * (bottom - top)) as i64,
    }
}

/// Default point size when the deck does not say.
fn default_font_size(element: &Element) -> f64 {
    match element.placeholder_type.as_deref() {
        Some("ctrTitle") | Some("title") => 44.0,
        Some("subTitle") => 32.0,
        _ => 18.0,
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

struct Canvas {
    img: RgbaImage,
    scale: f64,
}

impl Canvas {
    fn rect(&self, frame: &Frame) -> Rect {
        let px = |emu: i64| (emu as f64 * self.scale).round().clamp(-PIXEL_LIMIT, PIXEL_LIMIT) as i64;
        let (x0, y0) = (px(frame.x), px(frame.y));
        Rect {
            x0,
            y0,
            x1: px(frame.x.saturating_add(frame.cx)).max(x0 + 1),
            y1: px(frame.y.saturating_add(frame.cy)).max(y0 + 1),
        }
    }

    /// The part of `r` that lies on the canvas, if any.
    fn clip(&self, r: Rect) -> Option<Rect> {
        let clipped = Rect {
            x0: r.x0.max(0),
            y0: r.y0.max(0),
            x1: r.x1.min(self.img.width() as i64),
            y1: r.y1.min(self.img.height() as i64),
        };
        (clipped.x0 < clipped.x1 && clipped.y0 < clipped.y1).then_some(clipped)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.img.width() && (y as u32) < self.img.height() {
            self.img.put_pixel(x as u32, y as u32, color);
        }
    }

    fn fill(&mut self, r: Rect, color: Rgba<u8>) {
        let Some(c) = self.clip(r) else { return };
        for y in c.y0..c.y1 {
            for x in c.x0..c.x1 {
                self.put(x, y, color);
            }
        }
    }

    /// Outline of `r`; only the on-canvas stretch of each edge is visited.
    fn stroke(&mut self, r: Rect, color: Rgba<u8>) {
        let Some(c) = self.clip(r) else { return };
        for x in c.x0..c.x1 {
            self.put(x, r.y0, color);
            self.put(x, r.y1 - 1, color);
        }
        for y in c.y0..c.y1 {
            self.put(r.x0, y, color);
            self.put(r.x1 - 1, y, color);
        }
    }

    /// Bresenham line, clipped to the canvas first (Liang-Barsky).
    fn line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
        let Some((x0, y0, x1, y1)) = self.clip_line(x0, y0, x1, y1) else { return };
        let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
        let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
        let (mut x, mut y, mut err) = (x0, y0, dx + dy);
        loop {
            self.put(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn clip_line(&self, x0: i64, y0: i64, x1: i64, y1: i64) -> Option<(i64, i64, i64, i64)> {
        let (max_x, max_y) = (self.img.width() as f64 - 1.0, self.img.height() as f64 - 1.0);
        let (fx0, fy0) = (x0 as f64, y0 as f64);
        let (dx, dy) = (x1 as f64 - fx0, y1 as f64 - fy0);
        let (mut t0, mut t1) = (0.0f64, 1.0f64);
        for (p, q) in [(-dx, fx0), (dx, max_x - fx0), (-dy, fy0), (dy, max_y - fy0)] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
            } else {
                let t = q / p;
                if p < 0.0 {
                    t0 = t0.max(t);
                } else {
                    t1 = t1.min(t);
                }
            }
        }
        if t0 > t1 {
            return None;
        }
        let at = |t: f64| ((fx0 + t * dx).round() as i64, (fy0 + t * dy).round() as i64);
        let ((ax, ay), (bx, by)) = (at(t0), at(t1));
        Some((ax, ay, bx, by))
    }

    fn grid(&mut self, r: Rect, cells: i64, color: Rgba<u8>) {
        for i in 1..cells {
            let x = r.x0 + (r.x1 - r.x0) * i / cells;
            let y = r.y0 + (r.y1 - r.y0) * i / cells;
            self.line(x, r.y0, x, r.y1 - 1, color);
            self.line(r.x0, y, r.x1 - 1, y, color);
        }
    }

    /// One bar per text line, clipped to the element's box.
    fn text_bars(&mut self, r: Rect, element: &Element) {
        if element.content.trim().is_empty() {
            return;
        }
        let size = element.style.size.map(f64::from).unwrap_or_else(|| default_font_size(element));
        let em = size * EMU_PER_POINT * self.scale;
        let line_height = (em * 1.2).max(2.0);
        let bar_height = (em * 0.6).max(1.0) as i64;
        let char_width = (em * 0.5).max(1.0);
        let color = element.style.rgb().map(|[r, g, b]| Rgba([r, g, b, 255])).unwrap_or(TEXT);
        let pad = (em * 0.25).max(1.0) as i64;

        let mut top = r.y0 as f64 + pad as f64;
        for line in element.content.split('\n') {
            let y0 = top as i64;
            if y0.saturating_add(bar_height) > r.y1 - pad {
                break;
            }
            let chars = line.trim().chars().count() as f64;
            let x0 = r.x0.saturating_add(pad);
            let x1 = x0.saturating_add((chars * char_width) as i64).min(r.x1 - pad);
            if chars > 0.0 {
                self.fill(Rect { x0, y0, x1, y1: y0 + bar_height }, color);
            }
            top += line_height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{DeckBuilder, SampleShape, SampleSlide};
    use crate::style::TextStyle;

    fn parse(deck: DeckBuilder) -> (tempfile::TempDir, Template) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        deck.write_to(&path).unwrap();
        let template = TemplateParser::new(&path).parse().unwrap();
        (dir, template)
    }

    #[test]
    fn test_out_of_range_index() {
        let deck = DeckBuilder::starter().slide(SampleSlide::blank(vec![]));
        let (_dir, template) = parse(deck);
        assert_eq!(template.slides.len(), 3);
        let err = PreviewRenderer::default().render(&template, 5).unwrap_err();
        assert!(matches!(err, PreviewError::IndexOutOfRange { index: 5, count: 3 }));
    }

    #[test]
    fn test_png_dimensions_follow_slide_aspect() {
        let (_dir, template) = parse(DeckBuilder::starter());
        let png = PreviewRenderer::new(480).render(&template, 0).unwrap();
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!((img.width(), img.height()), (480, 360));
    }

    #[test]
    fn test_text_bar_uses_element_color() {
        let styled = SampleShape::text_box("Revenue up")
            .with_style(TextStyle { size: Some(36.0), color: Some("#CC0000".into()), bold: None, italic: None });
        let (_dir, template) = parse(DeckBuilder::new().slide(SampleSlide::blank(vec![styled])));

        let png = PreviewRenderer::new(960).render(&template, 0).unwrap();
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap().to_rgba8();
        let red = img.pixels().filter(|p| **p == Rgba([204, 0, 0, 255])).count();
        assert!(red > 0);
    }

    fn with_frame(shapes: Vec<SampleShape>, frame: Frame) -> Template {
        let (_dir, mut template) = parse(DeckBuilder::new().slide(SampleSlide::blank(shapes)));
        for element in &mut template.slides[0].elements {
            element.frame = Some(frame);
        }
        template
    }

    #[test]
    fn test_oversized_frame_renders_promptly() {
        let body = vec![SampleShape::placeholder("body", "Quarterly numbers")];
        let template = with_frame(body, Frame {
            x: 0,
            y: 0,
            cx: template_slide_w() * 200,
            cy: template_slide_h() * 200,
        });
        let started = std::time::Instant::now();
        let png = PreviewRenderer::new(960).render(&template, 0).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(480, 360), &PLACEHOLDER_FILL);
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        for frame in [
            Frame { x: i64::MAX - 10, y: i64::MAX - 10, cx: 100, cy: 100 },
            Frame { x: i64::MIN, y: i64::MIN, cx: i64::MAX, cy: i64::MAX },
            Frame { x: -5, y: 10, cx: i64::MAX, cy: 0 },
        ] {
            let shapes = vec![SampleShape::placeholder("body", "Quarterly numbers"), SampleShape::picture()];
            let template = with_frame(shapes, frame);
            assert!(PreviewRenderer::new(320).render(&template, 0).is_ok());
        }
    }

    #[test]
    fn test_extreme_slide_size_is_bounded() {
        let (_dir, mut template) = parse(DeckBuilder::starter());
        template.slide_width = 1;
        template.slide_height = i64::MAX;
        let png = PreviewRenderer::new(100).render(&template, 0).unwrap();
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!((img.width(), img.height()), (100, 100 * MAX_ASPECT));
    }

    fn template_slide_w() -> i64 {
        crate::templates::DEFAULT_SLIDE_WIDTH
    }

    fn template_slide_h() -> i64 {
        crate::templates::DEFAULT_SLIDE_HEIGHT
    }

    #[test]
    fn test_placeholders_without_frame_get_default_region() {
        let (_dir, template) = parse(DeckBuilder::starter());
        let title = &template.slides[0].elements[0];
        assert!(title.frame.is_none());
        let frame = default_frame(title, template.slide_width, template.slide_height);
        assert!(frame.cx > 0 && frame.cy > 0);
        assert!(frame.y + frame.cy <= template.slide_height);

        let png = PreviewRenderer::new(200).render(&template, 0).unwrap();
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap().to_rgba8();
        assert!(img.pixels().any(|p| *p == PLACEHOLDER));
    }
}
