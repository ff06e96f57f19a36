//! Drawing surface used by the waveform, spectrum and ribbon renderers.
//!
//! `Canvas` is the small subset of a 2D context the renderers need: rect fills, one-call path
//! fills and strokes, and a committed base layer so a moving marker can be erased without
//! redrawing what is underneath it. `PixelCanvas` rasterises into an RGBA image.

use image::{Rgba, RgbaImage};

pub type Point = (f32, f32);

/// How a primitive is coloured
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(Rgba<u8>),
    /// Left edge colour to right edge colour across the full canvas width
    HorizontalGradient(Rgba<u8>, Rgba<u8>),
}

impl Paint {
    pub const fn rgba(r: u8, g: u8, b: u8, a: f32) -> Self {
        Paint::Solid(Rgba([r, g, b, (a * 255.0) as u8]))
    }

    fn color_at(&self, x: u32, width: u32) -> Rgba<u8> {
        match *self {
            Paint::Solid(c) => c,
            Paint::HorizontalGradient(from, to) => {
                let t = if width > 1 {
                    x as f32 / (width - 1) as f32
                } else {
                    0.0
                };
                let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
                Rgba([
                    lerp(from[0], to[0]),
                    lerp(from[1], to[1]),
                    lerp(from[2], to[2]),
                    lerp(from[3], to[3]),
                ])
            }
        }
    }
}

pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn clear_rect(&mut self, x: f32, y: f32, w: f32, h: f32);
    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, paint: Paint);
    /// Fill one closed polygon (even-odd rule).
    fn fill_path(&mut self, points: &[Point], paint: Paint);
    /// Stroke a 1px polyline, optionally closing it back to the first point.
    fn stroke_path(&mut self, points: &[Point], closed: bool, paint: Paint);

    fn clear(&mut self) {
        let (w, h) = (self.width() as f32, self.height() as f32);
        self.clear_rect(0.0, 0.0, w, h);
    }

    /// Snapshot the current pixels as the layer `restore_rect` falls back to.
    fn commit_base(&mut self) {}

    /// Put back the committed base layer inside a rect, or clear it when nothing was committed.
    fn restore_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.clear_rect(x, y, w, h);
    }
}

/// RGBA raster canvas
#[derive(Debug, Clone)]
pub struct PixelCanvas {
    image: RgbaImage,
    base: Option<RgbaImage>,
}

impl PixelCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        PixelCanvas {
            image: RgbaImage::new(width, height),
            base: None,
        }
    }

    /// Change the backing size; contents and base layer are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::new(width, height);
        self.base = None;
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x < self.image.width() && y < self.image.height() {
            Some(*self.image.get_pixel(x, y))
        } else {
            None
        }
    }

    /// Columns `[x0, x1)` clipped to the surface.
    fn span(&self, x: f32, w: f32) -> (u32, u32) {
        clip_span(x, x + w, self.image.width())
    }

    fn rows(&self, y: f32, h: f32) -> (u32, u32) {
        clip_span(y, y + h, self.image.height())
    }

    fn blend_pixel(&mut self, x: u32, y: u32, src: Rgba<u8>) {
        if x >= self.image.width() || y >= self.image.height() {
            return;
        }
        let dst = self.image.get_pixel_mut(x, y);
        *dst = source_over(*dst, src);
    }
}

impl Canvas for PixelCanvas {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn clear_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        let (x0, x1) = self.span(x, w);
        let (y0, y1) = self.rows(y, h);
        for py in y0..y1 {
            for px in x0..x1 {
                self.image.put_pixel(px, py, Rgba([0, 0, 0, 0]));
            }
        }
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, paint: Paint) {
        let width = self.image.width();
        let (x0, x1) = self.span(x, w);
        let (y0, y1) = self.rows(y, h);
        for py in y0..y1 {
            for px in x0..x1 {
                self.blend_pixel(px, py, paint.color_at(px, width));
            }
        }
    }

    fn fill_path(&mut self, points: &[Point], paint: Paint) {
        if points.len() < 3 {
            return;
        }
        let width = self.image.width();
        let height = self.image.height();
        let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        let (y0, y1) = clip_span(min_y.floor(), max_y.ceil() + 1.0, height);

        let mut crossings: Vec<f32> = Vec::new();
        for py in y0..y1 {
            let sy = py as f32 + 0.5;
            crossings.clear();
            for i in 0..points.len() {
                let (ax, ay) = points[i];
                let (bx, by) = points[(i + 1) % points.len()];
                if (ay <= sy && by > sy) || (by <= sy && ay > sy) {
                    let t = (sy - ay) / (by - ay);
                    crossings.push(ax + t * (bx - ax));
                }
            }
            crossings.sort_by(f32::total_cmp);
            for pair in crossings.chunks_exact(2) {
                let (x0, x1) = clip_span((pair[0] - 0.5).ceil(), (pair[1] - 0.5).ceil(), width);
                for px in x0..x1 {
                    self.blend_pixel(px, py, paint.color_at(px, width));
                }
            }
        }
    }

    fn stroke_path(&mut self, points: &[Point], closed: bool, paint: Paint) {
        if points.len() < 2 {
            return;
        }
        let width = self.image.width();
        let segments = if closed {
            points.len()
        } else {
            points.len() - 1
        };
        let mut last: Option<(i64, i64)> = None;
        for i in 0..segments {
            let a = points[i];
            let b = points[(i + 1) % points.len()];
            let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).ceil().max(1.0) as usize;
            for s in 0..=steps {
                let t = s as f32 / steps as f32;
                let px = (a.0 + (b.0 - a.0) * t).floor() as i64;
                let py = (a.1 + (b.1 - a.1) * t).floor() as i64;
                // Segments share endpoints; blend each pixel of a run once.
                if last == Some((px, py)) || px < 0 || py < 0 {
                    continue;
                }
                last = Some((px, py));
                let (ux, uy) = (px as u32, py as u32);
                self.blend_pixel(ux, uy, paint.color_at(ux.min(width.saturating_sub(1)), width));
            }
        }
    }

    fn commit_base(&mut self) {
        self.base = Some(self.image.clone());
    }

    fn restore_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        let Some(base) = self.base.as_ref() else {
            self.clear_rect(x, y, w, h);
            return;
        };
        let (x0, x1) = clip_span(x, x + w, self.image.width());
        let (y0, y1) = clip_span(y, y + h, self.image.height());
        for py in y0..y1 {
            for px in x0..x1 {
                let p = *base.get_pixel(px, py);
                self.image.put_pixel(px, py, p);
            }
        }
    }
}

fn clip_span(start: f32, end: f32, limit: u32) -> (u32, u32) {
    let lo = start.round().clamp(0.0, limit as f32) as u32;
    let hi = end.round().clamp(0.0, limit as f32) as u32;
    (lo, hi.max(lo))
}

/// Porter-Duff source-over on straight (non-premultiplied) RGBA.
fn source_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0;
    if sa >= 1.0 {
        return src;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |s: u8, d: u8| {
        ((s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a).round() as u8
    };
    Rgba([
        channel(src[0], dst[0]),
        channel(src[1], dst[1]),
        channel(src[2], dst[2]),
        (out_a * 255.0).round() as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Paint = Paint::Solid(Rgba([255, 0, 0, 255]));

    #[test]
    fn fill_rect_clips_to_surface() {
        let mut c = PixelCanvas::new(10, 4);
        c.fill_rect(8.0, -2.0, 5.0, 10.0, RED);
        assert_eq!(c.pixel(9, 3), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(c.pixel(7, 0), Some(Rgba([0, 0, 0, 0])));
    }

    #[test]
    fn fill_path_covers_interior_only() {
        let mut c = PixelCanvas::new(10, 10);
        c.fill_path(&[(2.0, 2.0), (8.0, 2.0), (8.0, 8.0), (2.0, 8.0)], RED);
        assert_eq!(c.pixel(5, 5).map(|p| p[3]), Some(255));
        assert_eq!(c.pixel(0, 0).map(|p| p[3]), Some(0));
        assert_eq!(c.pixel(9, 9).map(|p| p[3]), Some(0));
    }

    #[test]
    fn stroke_path_closes_back_to_start() {
        let mut c = PixelCanvas::new(10, 10);
        c.stroke_path(&[(1.0, 1.0), (8.0, 1.0), (8.0, 8.0)], true, RED);
        // closing diagonal from (8,8) back to (1,1)
        assert_eq!(c.pixel(4, 4).map(|p| p[3]), Some(255));
    }

    #[test]
    fn restore_rect_brings_back_committed_pixels() {
        let mut c = PixelCanvas::new(6, 2);
        c.fill_rect(0.0, 0.0, 6.0, 2.0, RED);
        c.commit_base();
        c.fill_rect(2.0, 0.0, 2.0, 2.0, Paint::Solid(Rgba([0, 255, 0, 255])));
        c.restore_rect(2.0, 0.0, 1.0, 2.0);
        assert_eq!(c.pixel(2, 0), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(c.pixel(3, 0), Some(Rgba([0, 255, 0, 255])));
    }

    #[test]
    fn gradient_runs_left_to_right() {
        let p = Paint::HorizontalGradient(Rgba([0, 0, 0, 255]), Rgba([200, 0, 0, 255]));
        assert_eq!(p.color_at(0, 11)[0], 0);
        assert_eq!(p.color_at(10, 11)[0], 200);
        assert_eq!(p.color_at(5, 11)[0], 100);
    }
}
