//! Box and text drawing on RGB frames.
//!
//! Text uses the 8x8 bitmap glyphs from `font8x8`, scaled by an integer factor.
//! Everything is clipped to the frame, so callers can pass boxes that hang off
//! an edge.

use crate::frame::Frame;
use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

/// Side length of one unscaled glyph.
pub const GLYPH_SIZE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const RED: Color = Color([255, 0, 0]);
    pub const GREEN: Color = Color([0, 255, 0]);
    pub const WHITE: Color = Color([255, 255, 255]);
    pub const BLACK: Color = Color([0, 0, 0]);

    fn rgb(self) -> Rgb<u8> {
        Rgb(self.0)
    }
}

/// Lend the frame's buffer to `draw` as an `RgbImage` without copying.
/// A frame whose buffer does not match its dimensions is left untouched.
fn with_canvas(frame: &mut Frame, draw: impl FnOnce(&mut RgbImage)) {
    if frame.data.len() != (frame.width * frame.height * 3) as usize {
        return;
    }
    let data = std::mem::take(&mut frame.data);
    let Some(mut canvas) = RgbImage::from_raw(frame.width, frame.height, data) else {
        return;
    };
    draw(&mut canvas);
    frame.data = canvas.into_raw();
}

/// Clip `[x0, x1) × [y0, y1)` to the canvas. `None` if nothing is left.
fn clipped(canvas: &RgbImage, x0: i64, y0: i64, x1: i64, y1: i64) -> Option<Rect> {
    let (w, h) = canvas.dimensions();
    let xa = x0.max(0);
    let ya = y0.max(0);
    let xb = x1.min(w as i64);
    let yb = y1.min(h as i64);
    if xb <= xa || yb <= ya {
        return None;
    }
    Some(Rect::at(xa as i32, ya as i32).of_size((xb - xa) as u32, (yb - ya) as u32))
}

/// Fill the rectangle `[x0, x1) × [y0, y1)`.
pub fn fill_rect(frame: &mut Frame, x0: i64, y0: i64, x1: i64, y1: i64, color: Color) {
    with_canvas(frame, |canvas| {
        if let Some(rect) = clipped(canvas, x0, y0, x1, y1) {
            draw_filled_rect_mut(canvas, rect, color.rgb());
        }
    });
}

/// Outline the rectangle with corners `(x0, y0)` and `(x1, y1)`, inclusive.
/// Thicker outlines grow inwards.
pub fn draw_rect(frame: &mut Frame, x0: i64, y0: i64, x1: i64, y1: i64, thickness: u32, color: Color) {
    with_canvas(frame, |canvas| {
        let (w, h) = canvas.dimensions();
        // Edges beyond -1 or the far side are invisible anyway.
        let cx = |v: i64| v.clamp(-1, w as i64) as i32;
        let cy = |v: i64| v.clamp(-1, h as i64) as i32;
        for i in 0..thickness.max(1) as i64 {
            let (left, top, right, bottom) = (cx(x0 + i), cy(y0 + i), cx(x1 - i), cy(y1 - i));
            if right < left || bottom < top {
                break;
            }
            let rect = Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
            draw_hollow_rect_mut(canvas, rect, color.rgb());
        }
    });
}

fn glyph(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| LATIN_FONTS.get(c))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

/// Draw `text` with its top-left corner at `(x, y)`. Returns the drawn width.
pub fn draw_text(frame: &mut Frame, text: &str, x: i64, y: i64, scale: u32, color: Color) -> u32 {
    let s = scale.max(1) as i64;
    with_canvas(frame, |canvas| {
        let mut pen = x;
        for c in text.chars() {
            for (row, bits) in glyph(c).iter().enumerate() {
                for col in 0..8 {
                    // bit 0 is the leftmost pixel
                    if bits & (1 << col) == 0 {
                        continue;
                    }
                    let px = pen + col * s;
                    let py = y + row as i64 * s;
                    if let Some(rect) = clipped(canvas, px, py, px + s, py + s) {
                        draw_filled_rect_mut(canvas, rect, color.rgb());
                    }
                }
            }
            pen += GLYPH_SIZE as i64 * s;
        }
    });
    text_width(text, scale)
}

/// Width in pixels that [`draw_text`] would cover.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE * scale.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(w: u32, h: u32) -> Frame {
        Frame::filled(w, h, [0, 0, 0])
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut frame = black(20, 20);
        draw_rect(&mut frame, 2, 2, 10, 10, 1, Color::GREEN);
        assert_eq!(frame.pixel(2, 2), Some(Color::GREEN.0));
        assert_eq!(frame.pixel(10, 10), Some(Color::GREEN.0));
        assert_eq!(frame.pixel(6, 2), Some(Color::GREEN.0));
        assert_eq!(frame.pixel(6, 6), Some([0, 0, 0]));
        assert_eq!(frame.pixel(11, 11), Some([0, 0, 0]));
    }

    #[test]
    fn test_rect_clipped_to_frame() {
        let mut frame = black(10, 10);
        draw_rect(&mut frame, -5, -5, 50, 50, 2, Color::RED);
        fill_rect(&mut frame, 8, 8, 100, 100, Color::WHITE);
        assert_eq!(frame.pixel(9, 9), Some(Color::WHITE.0));
        assert_eq!(frame.data.len(), 10 * 10 * 3);
    }

    #[test]
    fn test_thick_rect_grows_inwards() {
        let mut frame = black(20, 20);
        draw_rect(&mut frame, 2, 2, 12, 12, 3, Color::RED);
        assert_eq!(frame.pixel(4, 7), Some(Color::RED.0));
        assert_eq!(frame.pixel(5, 7), Some([0, 0, 0]));
        assert_eq!(frame.pixel(1, 7), Some([0, 0, 0]));
        assert_eq!(frame.pixel(12, 12), Some(Color::RED.0));
    }

    #[test]
    fn test_partly_visible_rect_draws_on_screen_edges() {
        let mut frame = black(10, 10);
        draw_rect(&mut frame, -3, 4, 6, 20, 1, Color::GREEN);
        assert_eq!(frame.pixel(0, 4), Some(Color::GREEN.0));
        assert_eq!(frame.pixel(6, 9), Some(Color::GREEN.0));
        assert_eq!(frame.pixel(3, 9), Some([0, 0, 0]));
    }

    #[test]
    fn test_fill_rect_is_half_open() {
        let mut frame = black(10, 10);
        fill_rect(&mut frame, 2, 2, 4, 4, Color::WHITE);
        assert_eq!(frame.pixel(3, 3), Some(Color::WHITE.0));
        assert_eq!(frame.pixel(4, 3), Some([0, 0, 0]));
        fill_rect(&mut frame, 5, 5, 5, 9, Color::WHITE);
        assert_eq!(frame.pixel(5, 5), Some([0, 0, 0]));
    }

    #[test]
    fn test_draw_text_sets_pixels_in_bounds() {
        let mut frame = black(64, 16);
        let width = draw_text(&mut frame, "Hi", 0, 0, 1, Color::WHITE);
        assert_eq!(width, 16);
        let lit = frame.data.chunks_exact(3).filter(|p| p == &Color::WHITE.0).count();
        assert!(lit > 0);
        // Nothing right of the two glyphs.
        for y in 0..16 {
            for x in 16..64 {
                assert_eq!(frame.pixel(x, y), Some([0, 0, 0]));
            }
        }
    }

    #[test]
    fn test_degree_sign_has_glyph() {
        assert_ne!(glyph('°'), [0; 8]);
        assert_ne!(glyph('°'), glyph('?'));
    }

    #[test]
    fn test_text_width_scales() {
        assert_eq!(text_width("Temp", 2), 64);
        assert_eq!(text_width("", 3), 0);
    }
}
