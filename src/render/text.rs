//! Text drawing on top of `imageproc`/`rusttype`.
//!
//! All functions take an optional font; without one they draw nothing, so a
//! figure still renders when no usable font could be loaded.

use image::{Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_text_mut, text_size};
use rusttype::{Font, Scale};

/// Bundled DejaVu Sans, used when no font is configured
pub const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VAlign {
    Top,
    Middle,
    Bottom,
}

pub fn default_font() -> Option<Font<'static>> {
    Font::try_from_bytes(DEFAULT_FONT)
}

/// Width and height in pixels of `text` at `size`
pub fn measure(font: Option<&Font<'_>>, size: f32, text: &str) -> (i32, i32) {
    match font {
        Some(font) if !text.is_empty() => text_size(Scale::uniform(size), font, text),
        _ => (0, 0),
    }
}

/// Draws `text` with its anchor point at `(x, y)`
pub fn draw_text(
    canvas: &mut RgbaImage,
    font: Option<&Font<'_>>,
    size: f32,
    color: Rgba<u8>,
    (x, y): (i32, i32),
    (halign, valign): (HAlign, VAlign),
    text: &str,
) {
    let Some(font) = font else { return };
    if text.is_empty() {
        return;
    }
    let (w, h) = measure(Some(font), size, text);
    let left = match halign {
        HAlign::Left => x,
        HAlign::Center => x - w / 2,
        HAlign::Right => x - w,
    };
    let top = match valign {
        VAlign::Top => y,
        VAlign::Middle => y - h / 2,
        VAlign::Bottom => y - h,
    };
    draw_text_mut(canvas, color, left, top, Scale::uniform(size), font, text);
}

/// Draws `text` rotated a quarter turn counter-clockwise, centered on `(x, y)`
pub fn draw_vertical_text(
    canvas: &mut RgbaImage,
    font: Option<&Font<'_>>,
    size: f32,
    color: Rgba<u8>,
    (x, y): (i32, i32),
    text: &str,
) {
    let Some(font) = font else { return };
    let (w, h) = measure(Some(font), size, text);
    if w <= 0 || h <= 0 {
        return;
    }
    // Pad the scratch image: text_size reports the ink box, glyphs can overhang it.
    let pad = (size / 4.0).ceil() as i32;
    let mut scratch = RgbaImage::new((w + 2 * pad) as u32, (h + 2 * pad) as u32);
    draw_text_mut(&mut scratch, color, pad, pad, Scale::uniform(size), font, text);
    let rotated = imageops::rotate270(&scratch);
    let left = x - rotated.width() as i32 / 2;
    let top = y - rotated.height() as i32 / 2;
    imageops::overlay(canvas, &rotated, left as i64, top as i64);
}
