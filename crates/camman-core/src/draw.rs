//! Annotation primitives on top of imageproc.

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use std::path::Path;

pub const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);
pub const BOX_THICKNESS: i32 = 3;
pub const MARKER_RADIUS: i32 = 3;
const FONT_SIZE: f32 = 18.0;
const LINE_HEIGHT: i32 = 22;

/// Colors, stroke sizes and the optional label font.
#[derive(Clone)]
pub struct OverlayStyle {
    pub color: Rgb<u8>,
    pub thickness: i32,
    pub marker_radius: i32,
    pub font_scale: PxScale,
    font: Option<FontArc>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: MAGENTA,
            thickness: BOX_THICKNESS,
            marker_radius: MARKER_RADIUS,
            font_scale: PxScale::from(FONT_SIZE),
            font: None,
        }
    }
}

impl std::fmt::Debug for OverlayStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayStyle")
            .field("color", &self.color)
            .field("thickness", &self.thickness)
            .field("marker_radius", &self.marker_radius)
            .field("font", &self.font.is_some())
            .finish()
    }
}

impl OverlayStyle {
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Load a TrueType/OpenType font for text labels.
    pub fn with_font_file(self, path: &Path) -> Result<Self, FontLoadError> {
        let bytes = std::fs::read(path).map_err(|e| FontLoadError(format!("{}: {e}", path.display())))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| FontLoadError(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "label font loaded");
        Ok(self.with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Rectangle outline `thickness` pixels wide, growing inward from the box.
    pub fn draw_box(&self, image: &mut RgbImage, [x1, y1, x2, y2]: [i32; 4]) {
        for inset in 0..self.thickness {
            let (left, top) = (x1 + inset, y1 + inset);
            let (right, bottom) = (x2 - inset, y2 - inset);
            if right <= left || bottom <= top {
                break;
            }
            let rect = Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32);
            draw_hollow_rect_mut(image, rect, self.color);
        }
    }

    /// Text with its top-left corner at `(x, y)`. No-op without a font.
    pub fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(image, self.color, x, y, self.font_scale, font, text);
        }
    }

    /// Text on line `line` of a stack anchored at the top-left corner.
    pub fn draw_stacked_label(&self, image: &mut RgbImage, line: usize, text: &str) {
        let y = LINE_HEIGHT * (line as i32 + 1) - LINE_HEIGHT / 2;
        self.draw_label(image, 10, y, text);
    }

    /// Closed polyline through `points`.
    pub fn draw_contour(&self, image: &mut RgbImage, points: &[Point<i32>]) {
        let Some(last) = points.last() else {
            return;
        };
        let mut prev = last;
        for point in points {
            draw_line_segment_mut(
                image,
                (prev.x as f32, prev.y as f32),
                (point.x as f32, point.y as f32),
                self.color,
            );
            prev = point;
        }
    }

    pub fn draw_marker(&self, image: &mut RgbImage, x: i32, y: i32) {
        draw_filled_circle_mut(image, (x, y), self.marker_radius, self.color);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot load font {0}")]
pub struct FontLoadError(String);
