//! Figure layout and the non-data elements: axes frame, ticks, gridlines,
//! colorbar and title.

use super::colormap::{BandColors, Colormap, Normalize};
use super::mesh::{PixelRect, Transform, fill_triangle};
use super::text::{self, HAlign, VAlign};
use super::ticks::format_number;
use super::{ColorbarSpec, RenderError};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{Blend, draw_line_segment_mut};
use rusttype::Font;

pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
/// Gridline color: black at half opacity
pub const GRID: Rgba<u8> = Rgba([0, 0, 0, 128]);

const MAX_PIXELS: u32 = 16_000;
// Subplot margins as fractions of the figure
const LEFT: f64 = 0.125;
const RIGHT: f64 = 0.9;
const TOP: f64 = 0.12;
const BOTTOM: f64 = 0.89;
// Colorbar space taken from the axes, and its length-to-width ratio
const COLORBAR_FRACTION: f64 = 0.15;
const COLORBAR_ASPECT: f64 = 20.0;
// Length of an extend arrow relative to the colorbar
const EXTEND_FRACTION: f64 = 0.05;

/// Pixel geometry of one figure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FigureLayout {
    pub width: u32,
    pub height: u32,
    pub axes: PixelRect,
    pub colorbar: PixelRect,
    /// Tick label size in pixels; titles use 1.2x
    pub font_px: f32,
    /// Pixels per typographic point
    pub scale: f64,
}

/// Places axes and colorbar. With `aspect` (height over width in data
/// units), the axes box shrinks to keep it, centered in the available space.
pub fn compute_layout(
    figsize: [f64; 2],
    dpi: u32,
    colorbar: &ColorbarSpec,
    aspect: Option<f64>,
) -> Result<FigureLayout, RenderError> {
    let width = (figsize[0] * dpi as f64).round();
    let height = (figsize[1] * dpi as f64).round();
    if !(width >= 50.0 && height >= 50.0 && width <= MAX_PIXELS as f64 && height <= MAX_PIXELS as f64) {
        return Err(RenderError::InvalidFigure(format!(
            "figure of {}x{} in at {} dpi gives {}x{} px",
            figsize[0], figsize[1], dpi, width, height
        )));
    }
    if !(colorbar.shrink > 0.0 && colorbar.shrink <= 1.0) || colorbar.pad < 0.0 {
        return Err(RenderError::InvalidFigure(format!(
            "colorbar shrink {} must be in (0, 1] and pad {} non-negative",
            colorbar.shrink, colorbar.pad
        )));
    }

    let outer_left = LEFT * width;
    let outer_right = RIGHT * width;
    let outer_width = outer_right - outer_left;
    let top = TOP * height;
    let bottom = BOTTOM * height;

    let cb_space = COLORBAR_FRACTION * outer_width;
    let pad = colorbar.pad * outer_width;
    let mut ax_left = outer_left;
    let mut ax_width = (outer_width - cb_space - pad).max(10.0);
    let mut ax_top = top;
    let mut ax_height = bottom - top;

    if let Some(aspect) = aspect.filter(|a| a.is_finite() && *a > 0.0) {
        if ax_height / ax_width > aspect {
            let h = ax_width * aspect;
            ax_top += (ax_height - h) / 2.0;
            ax_height = h;
        } else {
            let w = ax_height / aspect;
            ax_left += (ax_width - w) / 2.0;
            ax_width = w;
        }
    }

    let axes = PixelRect {
        left: ax_left.round() as i32,
        top: ax_top.round() as i32,
        width: ax_width.round().max(1.0) as u32,
        height: ax_height.round().max(1.0) as u32,
    };

    let cb_height = (ax_height * colorbar.shrink).max(4.0);
    let cb_width = (cb_height / COLORBAR_ASPECT).clamp(4.0, cb_space.max(4.0));
    let colorbar_rect = PixelRect {
        left: (ax_left + ax_width + pad).round() as i32,
        top: (ax_top + (ax_height - cb_height) / 2.0).round() as i32,
        width: cb_width.round() as u32,
        height: cb_height.round() as u32,
    };

    let scale = dpi as f64 / 72.0;
    Ok(FigureLayout {
        width: width as u32,
        height: height as u32,
        axes,
        colorbar: colorbar_rect,
        font_px: (10.0 * scale) as f32,
        scale,
    })
}

/// Clips a segment to a rectangle (Liang-Barsky)
pub fn clip_segment(rect: &PixelRect, a: (f64, f64), b: (f64, f64)) -> Option<((f64, f64), (f64, f64))> {
    let (x0, y0) = a;
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (xmin, xmax) = (rect.left as f64, rect.right() as f64 - 1.0);
    let (ymin, ymax) = (rect.top as f64, rect.bottom() as f64 - 1.0);
    let mut t0: f64 = 0.0;
    let mut t1: f64 = 1.0;
    for (p, q) in [
        (-dx, x0 - xmin),
        (dx, xmax - x0),
        (-dy, y0 - ymin),
        (dy, ymax - y0),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some(((x0 + t0 * dx, y0 + t0 * dy), (x0 + t1 * dx, y0 + t1 * dy)))
}

/// Opaque line, clipped to `clip`
pub fn draw_line(canvas: &mut RgbaImage, clip: &PixelRect, a: (f64, f64), b: (f64, f64), color: Rgba<u8>) {
    if let Some((a, b)) = clip_segment(clip, a, b) {
        draw_line_segment_mut(canvas, (a.0 as f32, a.1 as f32), (b.0 as f32, b.1 as f32), color);
    }
}

/// Translucent dashed line, clipped to `clip`
pub fn draw_dashed_line(
    canvas: &mut RgbaImage,
    clip: &PixelRect,
    a: (f64, f64),
    b: (f64, f64),
    color: Rgba<u8>,
    dash: f64,
) {
    let Some((a, b)) = clip_segment(clip, a, b) else { return };
    let length = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
    if length == 0.0 || dash <= 0.0 {
        return;
    }
    let (ux, uy) = ((b.0 - a.0) / length, (b.1 - a.1) / length);

    let mut blend = Blend(std::mem::replace(canvas, RgbaImage::new(0, 0)));
    let mut start = 0.0;
    while start < length {
        let end = (start + dash).min(length);
        draw_line_segment_mut(
            &mut blend,
            ((a.0 + ux * start) as f32, (a.1 + uy * start) as f32),
            ((a.0 + ux * end) as f32, (a.1 + uy * end) as f32),
            color,
        );
        start += dash * 1.6;
    }
    *canvas = blend.0;
}

pub fn draw_frame(canvas: &mut RgbaImage, rect: &PixelRect) {
    let (l, t) = (rect.left as f64, rect.top as f64);
    let (r, b) = (rect.right() as f64, rect.bottom() as f64);
    let bounds = PixelRect {
        left: rect.left,
        top: rect.top,
        width: rect.width + 1,
        height: rect.height + 1,
    };
    for (p, q) in [((l, t), (r, t)), ((r, t), (r, b)), ((r, b), (l, b)), ((l, b), (l, t))] {
        draw_line(canvas, &bounds, p, q, BLACK);
    }
}

fn whole_canvas(canvas: &RgbaImage) -> PixelRect {
    PixelRect {
        left: 0,
        top: 0,
        width: canvas.width(),
        height: canvas.height(),
    }
}

/// Tick marks and labels along the bottom edge
pub fn draw_x_ticks(
    canvas: &mut RgbaImage,
    font: Option<&Font<'_>>,
    layout: &FigureLayout,
    transform: &Transform,
    ticks: &[(f64, String)],
    marks: bool,
) {
    let bottom = layout.axes.bottom() as f64;
    let tick_len = 3.5 * layout.scale;
    let full = whole_canvas(canvas);
    for (value, label) in ticks {
        let (x, _) = transform.to_pixel(*value, transform.y_range.0);
        if x < layout.axes.left as f64 - 0.5 || x > layout.axes.right() as f64 + 0.5 {
            continue;
        }
        if marks {
            draw_line(canvas, &full, (x, bottom), (x, bottom + tick_len), BLACK);
        }
        text::draw_text(
            canvas,
            font,
            layout.font_px,
            BLACK,
            (x.round() as i32, (bottom + tick_len + 2.0 * layout.scale).round() as i32),
            (HAlign::Center, VAlign::Top),
            label,
        );
    }
}

/// Tick marks and labels along the left edge; returns the widest label
pub fn draw_y_ticks(
    canvas: &mut RgbaImage,
    font: Option<&Font<'_>>,
    layout: &FigureLayout,
    transform: &Transform,
    ticks: &[(f64, String)],
    marks: bool,
) -> i32 {
    let left = layout.axes.left as f64;
    let tick_len = 3.5 * layout.scale;
    let full = whole_canvas(canvas);
    let mut widest = 0;
    for (value, label) in ticks {
        let (_, y) = transform.to_pixel(transform.x_range.0, *value);
        if y < layout.axes.top as f64 - 0.5 || y > layout.axes.bottom() as f64 + 0.5 {
            continue;
        }
        if marks {
            draw_line(canvas, &full, (left - tick_len, y), (left, y), BLACK);
        }
        widest = widest.max(text::measure(font, layout.font_px, label).0);
        text::draw_text(
            canvas,
            font,
            layout.font_px,
            BLACK,
            ((left - tick_len - 2.0 * layout.scale).round() as i32, y.round() as i32),
            (HAlign::Right, VAlign::Middle),
            label,
        );
    }
    widest
}

/// Gridlines across the axes at every tick
pub fn draw_gridlines(canvas: &mut RgbaImage, layout: &FigureLayout, transform: &Transform, xs: &[f64], ys: &[f64]) {
    let dash = 4.0 * layout.scale;
    let (x0, x1) = transform.x_range;
    let (y0, y1) = transform.y_range;
    for &x in xs {
        let a = transform.to_pixel(x, y0);
        let b = transform.to_pixel(x, y1);
        draw_dashed_line(canvas, &layout.axes, a, b, GRID, dash);
    }
    for &y in ys {
        let a = transform.to_pixel(x0, y);
        let b = transform.to_pixel(x1, y);
        draw_dashed_line(canvas, &layout.axes, a, b, GRID, dash);
    }
}

/// How the colorbar is painted
#[derive(Debug, Clone, PartialEq)]
pub enum ColorbarFill {
    /// Continuous ramp over `[vmin, vmax]`
    Continuous { norm: Normalize },
    /// One flat band per level interval, with an arrow on each open end
    Banded { levels: Vec<f64>, colors: BandColors },
}

impl ColorbarFill {
    fn range(&self) -> (f64, f64) {
        match self {
            ColorbarFill::Continuous { norm } => (norm.vmin, norm.vmax),
            ColorbarFill::Banded { levels, .. } => (
                levels.first().copied().unwrap_or(0.0),
                levels.last().copied().unwrap_or(1.0),
            ),
        }
    }
}

/// Draws the colorbar with ticks on its right and a rotated label
pub fn draw_colorbar(
    canvas: &mut RgbaImage,
    font: Option<&Font<'_>>,
    layout: &FigureLayout,
    cmap: Colormap,
    fill: &ColorbarFill,
    ticks: &[f64],
    label: &str,
) {
    let rect = layout.colorbar;
    let (vmin, vmax) = fill.range();
    let value_at = |row: u32| {
        let frac = 1.0 - (row as f64 + 0.5) / rect.height as f64;
        vmin + frac * (vmax - vmin)
    };

    for row in 0..rect.height {
        let value = value_at(row);
        let color = match fill {
            ColorbarFill::Continuous { norm } => Some(cmap.sample(norm.apply(value))),
            ColorbarFill::Banded { levels, colors } => colors.color_of(levels, value),
        };
        let Some(color) = color else { continue };
        let y = rect.top + row as i32;
        for col in 0..rect.width {
            let x = rect.left + col as i32;
            if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
                canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    }
    draw_frame(canvas, &rect);

    if let ColorbarFill::Banded { colors, .. } = fill {
        let tip = (rect.height as f64 * EXTEND_FRACTION).max(2.0);
        let (l, r) = (rect.left as f64, rect.right() as f64);
        let mid = (l + r) / 2.0;
        let (top, bottom) = (rect.top as f64, rect.bottom() as f64);
        if let Some(over) = colors.over {
            draw_arrow(canvas, [(l, top), (r, top), (mid, top - tip)], over);
        }
        if let Some(under) = colors.under {
            draw_arrow(canvas, [(l, bottom), (r, bottom), (mid, bottom + tip)], under);
        }
    }

    let tick_len = 3.5 * layout.scale;
    let right = rect.right() as f64;
    let full = whole_canvas(canvas);
    let mut widest = 0;
    for &tick in ticks {
        if vmax <= vmin || tick < vmin - 1e-9 || tick > vmax + 1e-9 {
            continue;
        }
        let y = rect.top as f64 + (1.0 - (tick - vmin) / (vmax - vmin)) * rect.height as f64;
        draw_line(canvas, &full, (right, y), (right + tick_len, y), BLACK);
        let label = format_number(tick);
        widest = widest.max(text::measure(font, layout.font_px, &label).0);
        text::draw_text(
            canvas,
            font,
            layout.font_px,
            BLACK,
            ((right + tick_len + 2.0 * layout.scale).round() as i32, y.round() as i32),
            (HAlign::Left, VAlign::Middle),
            &label,
        );
    }

    if !label.is_empty() {
        let x = right + tick_len + 4.0 * layout.scale + widest as f64 + layout.font_px as f64 * 0.75;
        let y = rect.top as f64 + rect.height as f64 / 2.0;
        text::draw_vertical_text(canvas, font, layout.font_px, BLACK, (x.round() as i32, y.round() as i32), label);
    }
}

/// Filled triangle with its two slanted edges outlined; `vertices[2]` is the tip
fn draw_arrow(canvas: &mut RgbaImage, vertices: [(f64, f64); 3], color: Rgba<u8>) {
    let full = whole_canvas(canvas);
    fill_triangle(vertices, &full, |x, y, _| {
        canvas.put_pixel(x as u32, y as u32, color);
    });
    let [a, b, tip] = vertices;
    draw_line(canvas, &full, a, tip, BLACK);
    draw_line(canvas, &full, b, tip, BLACK);
}

pub fn draw_title(canvas: &mut RgbaImage, font: Option<&Font<'_>>, layout: &FigureLayout, title: &str) {
    let x = layout.axes.left + layout.axes.width as i32 / 2;
    let y = layout.axes.top - (6.0 * layout.scale).round() as i32;
    text::draw_text(
        canvas,
        font,
        layout.font_px * 1.2,
        BLACK,
        (x, y),
        (HAlign::Center, VAlign::Bottom),
        title,
    );
}

/// Axis label centered below the x tick labels
pub fn draw_x_label(canvas: &mut RgbaImage, font: Option<&Font<'_>>, layout: &FigureLayout, label: &str) {
    let x = layout.axes.left + layout.axes.width as i32 / 2;
    let y = layout.axes.bottom() as f64 + 5.5 * layout.scale + 1.6 * layout.font_px as f64;
    text::draw_text(
        canvas,
        font,
        layout.font_px,
        BLACK,
        (x, y.round() as i32),
        (HAlign::Center, VAlign::Top),
        label,
    );
}

/// Rotated axis label left of the y tick labels
pub fn draw_y_label(
    canvas: &mut RgbaImage,
    font: Option<&Font<'_>>,
    layout: &FigureLayout,
    label: &str,
    tick_label_width: i32,
) {
    let x = layout.axes.left as f64 - 5.5 * layout.scale - tick_label_width as f64 - layout.font_px as f64;
    let y = layout.axes.top + layout.axes.height as i32 / 2;
    text::draw_vertical_text(canvas, font, layout.font_px, BLACK, (x.round() as i32, y), label);
}
