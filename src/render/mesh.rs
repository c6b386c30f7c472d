//! # Mesh Rasterization
//!
//! Both plot kinds work on a curvilinear grid: every sample `(i, j)` has a
//! position `(x[i, j], y[i, j])` and a value. Pseudocolor plots fill one flat
//! quad per sample, bounded by edges inferred halfway between neighbouring
//! positions. Filled contours split the quads *between* samples into two
//! triangles, interpolate linearly inside each triangle and color every
//! pixel by the level band of the interpolated value.

use super::geo::spans_antimeridian;
use super::colormap::BandColors;
use image::{Rgba, RgbaImage};
use ndarray::{Array2, Axis};

/// Sample positions and values, all of the same `(rows, cols)` shape
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub values: Array2<f32>,
}

impl Grid {
    /// Bounding box `(xmin, xmax, ymin, ymax)` of finite positions
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        let finite = |a: &Array2<f64>| {
            a.iter().filter(|v| v.is_finite()).fold(None, |acc: Option<(f64, f64)>, &v| {
                Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
            })
        };
        let (x0, x1) = finite(&self.x)?;
        let (y0, y1) = finite(&self.y)?;
        Some((x0, x1, y0, y1))
    }
}

/// Cell edges for 1-D centers: midpoints inside, half a step beyond each end
pub fn interval_breaks(centers: &[f64]) -> Vec<f64> {
    match centers.len() {
        0 => Vec::new(),
        1 => vec![centers[0] - 0.5, centers[0] + 0.5],
        n => {
            let mut breaks = Vec::with_capacity(n + 1);
            breaks.push(centers[0] - 0.5 * (centers[1] - centers[0]));
            breaks.extend(centers.windows(2).map(|w| 0.5 * (w[0] + w[1])));
            breaks.push(centers[n - 1] + 0.5 * (centers[n - 1] - centers[n - 2]));
            breaks
        }
    }
}

/// Cell corners for 2-D centers, shape `(rows + 1, cols + 1)`
pub fn interval_breaks_2d(centers: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = centers.dim();
    let mut along_cols = Array2::<f64>::zeros((rows, cols + 1));
    for (i, row) in centers.axis_iter(Axis(0)).enumerate() {
        let breaks = interval_breaks(&row.to_vec());
        for (j, b) in breaks.into_iter().enumerate() {
            along_cols[[i, j]] = b;
        }
    }
    let mut corners = Array2::<f64>::zeros((rows + 1, cols + 1));
    for (j, column) in along_cols.axis_iter(Axis(1)).enumerate() {
        let breaks = interval_breaks(&column.to_vec());
        for (i, b) in breaks.into_iter().enumerate() {
            corners[[i, j]] = b;
        }
    }
    corners
}

/// Pixel rectangle of a plotting area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn right(&self) -> i32 {
        self.left + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height as i32
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }
}

/// Maps data coordinates onto a pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    pub rect: PixelRect,
    /// Data y grows downwards when set
    pub invert_y: bool,
}

impl Transform {
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let fx = if x1 > x0 { (x - x0) / (x1 - x0) } else { 0.5 };
        let fy = if y1 > y0 { (y - y0) / (y1 - y0) } else { 0.5 };
        let px = self.rect.left as f64 + fx * self.rect.width as f64;
        let py = if self.invert_y {
            self.rect.top as f64 + fy * self.rect.height as f64
        } else {
            self.rect.top as f64 + (1.0 - fy) * self.rect.height as f64
        };
        (px, py)
    }
}

/// Calls `paint(x, y, weights)` for every pixel whose center lies inside
/// the triangle, with barycentric weights of the three vertices. Triangles
/// too small to cover a pixel center paint the pixel under their centroid.
pub fn fill_triangle<F>(vertices: [(f64, f64); 3], clip: &PixelRect, mut paint: F)
where
    F: FnMut(i32, i32, [f64; 3]),
{
    let [(ax, ay), (bx, by), (cx, cy)] = vertices;
    let area = (bx - ax) * (cy - ay) - (cx - ax) * (by - ay);
    if !area.is_finite() {
        return;
    }

    let min_x = ax.min(bx).min(cx).floor().max(clip.left as f64) as i32;
    let max_x = ax.max(bx).max(cx).ceil().min(clip.right() as f64 - 1.0) as i32;
    let min_y = ay.min(by).min(cy).floor().max(clip.top as f64) as i32;
    let max_y = ay.max(by).max(cy).ceil().min(clip.bottom() as f64 - 1.0) as i32;

    let mut painted = false;
    if area.abs() > 1e-12 {
        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let (sx, sy) = (px as f64 + 0.5, py as f64 + 0.5);
                let w0 = ((bx - sx) * (cy - sy) - (cx - sx) * (by - sy)) / area;
                let w1 = ((cx - sx) * (ay - sy) - (ax - sx) * (cy - sy)) / area;
                let w2 = 1.0 - w0 - w1;
                if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                    paint(px, py, [w0, w1, w2]);
                    painted = true;
                }
            }
        }
    }

    let span = (ax.max(bx).max(cx) - ax.min(bx).min(cx)).max(ay.max(by).max(cy) - ay.min(by).min(cy));
    if !painted && span < 1.5 {
        let (px, py) = (((ax + bx + cx) / 3.0).floor() as i32, ((ay + by + cy) / 3.0).floor() as i32);
        if clip.contains(px, py) {
            paint(px, py, [1.0 / 3.0; 3]);
        }
    }
}

fn put(canvas: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

/// Flat-shaded quads around every sample. `color_of` returns `None` for
/// values that should stay unpainted. With `wrap_check`, cells whose x
/// (longitude) corners span more than 180 degrees are skipped.
pub fn draw_pcolormesh<C>(
    canvas: &mut RgbaImage,
    grid: &Grid,
    transform: &Transform,
    color_of: C,
    wrap_check: bool,
) -> usize
where
    C: Fn(f32) -> Option<Rgba<u8>>,
{
    let xb = interval_breaks_2d(&grid.x);
    let yb = interval_breaks_2d(&grid.y);
    let (rows, cols) = grid.values.dim();
    let mut drawn = 0;

    for i in 0..rows {
        for j in 0..cols {
            let Some(color) = color_of(grid.values[[i, j]]) else {
                continue;
            };
            let corners = [(i, j), (i + 1, j), (i + 1, j + 1), (i, j + 1)];
            let xs = corners.map(|(a, b)| xb[[a, b]]);
            let ys = corners.map(|(a, b)| yb[[a, b]]);
            if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
                continue;
            }
            if wrap_check && spans_antimeridian(&xs) {
                continue;
            }
            let px: Vec<(f64, f64)> = (0..4).map(|k| transform.to_pixel(xs[k], ys[k])).collect();
            for tri in [[px[0], px[1], px[2]], [px[0], px[2], px[3]]] {
                fill_triangle(tri, &transform.rect, |x, y, _| put(canvas, x, y, color));
            }
            drawn += 1;
        }
    }
    drawn
}

/// Filled contours between sample positions. `colors.bands[b]` paints band
/// `[levels[b], levels[b + 1])`; values past either end take the open-end
/// color when there is one.
pub fn draw_contourf(
    canvas: &mut RgbaImage,
    grid: &Grid,
    transform: &Transform,
    levels: &[f64],
    colors: &BandColors,
    wrap_check: bool,
) -> usize {
    let (rows, cols) = grid.values.dim();
    if rows < 2 || cols < 2 || levels.len() < 2 {
        return 0;
    }
    let mut drawn = 0;

    for i in 0..rows - 1 {
        for j in 0..cols - 1 {
            let quad = [(i, j), (i + 1, j), (i + 1, j + 1), (i, j + 1)];
            for tri in [[quad[0], quad[1], quad[2]], [quad[0], quad[2], quad[3]]] {
                let values = tri.map(|(a, b)| grid.values[[a, b]] as f64);
                let xs = tri.map(|(a, b)| grid.x[[a, b]]);
                let ys = tri.map(|(a, b)| grid.y[[a, b]]);
                if values.iter().chain(&xs).chain(&ys).any(|v| !v.is_finite()) {
                    continue;
                }
                if wrap_check && spans_antimeridian(&xs) {
                    continue;
                }
                let pixels = [0, 1, 2].map(|k| transform.to_pixel(xs[k], ys[k]));
                fill_triangle(pixels, &transform.rect, |x, y, w| {
                    let v = w[0] * values[0] + w[1] * values[1] + w[2] * values[2];
                    if let Some(color) = colors.color_of(levels, v) {
                        put(canvas, x, y, color);
                    }
                });
                drawn += 1;
            }
        }
    }
    drawn
}
