//! # Renderer
//!
//! Draws a 2-D [`DataArray`] as a pseudocolor mesh or filled contours, on
//! plain index axes or on a Plate Carrée map with coastlines and degree
//! gridline labels, and encodes the figure as PNG.
//!
//! ```rust,no_run
//! use gpm_dpr::render::{encode_png, render, PlotKind, PlotSpec, RenderResources};
//! # fn demo(composite: &gpm_dpr::dataset::DataArray) -> Result<(), gpm_dpr::render::RenderError> {
//! let spec = PlotSpec {
//!     kind: PlotKind::Pcolormesh,
//!     x: Some("nscan".to_string()),
//!     vmin: Some(0.0),
//!     vmax: Some(60.0),
//!     ..PlotSpec::default()
//! };
//! let figure = render(composite, &spec, &RenderResources::bundled())?;
//! std::fs::write("composite.png", encode_png(&figure)?)?;
//! # Ok(())
//! # }
//! ```

pub mod colormap;
pub mod geo;
pub mod layout;
pub mod mesh;
pub mod text;
pub mod ticks;

pub use colormap::Colormap;
pub use ticks::Levels;

use crate::dataset::DataArray;
use colormap::{BandColors, Normalize};
use geo::Polyline;
use image::{ImageEncoder, RgbaImage};
use layout::{ColorbarFill, FigureLayout};
use log::{debug, warn};
use mesh::{Grid, Transform};
use ticks::Extend;
use ndarray::{Array2, Ix2};
use rusttype::Font;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Cannot plot '{name}': expected 2 dimensions, found {dims:?}")]
    NotTwoDimensional { name: String, dims: Vec<String> },

    #[error("Unknown axis '{axis}' for '{name}' (dimensions and coordinates: {available:?})")]
    UnknownAxis {
        name: String,
        axis: String,
        available: Vec<String>,
    },

    #[error("Coordinate '{coord}' spans {dims:?}, which do not match the plotted dimensions")]
    CoordinateShape { coord: String, dims: Vec<String> },

    #[error("Invalid levels: {0}")]
    InvalidLevels(String),

    #[error("Invalid figure: {0}")]
    InvalidFigure(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    #[default]
    Pcolormesh,
    Contourf,
}

impl FromStr for PlotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcolormesh" | "mesh" => Ok(PlotKind::Pcolormesh),
            "contourf" | "contour" => Ok(PlotKind::Contourf),
            other => Err(format!("Unknown plot kind '{}': expected pcolormesh or contourf", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    None,
    PlateCarree,
}

/// Degree gridlines on map plots; labels go on the bottom and left edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Gridlines {
    /// Draw the dashed lines as well as the labels
    #[serde(default)]
    pub lines: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Title {
    Text { text: String },
    /// Time of the first plotted scan, formatted with a strftime pattern
    ScanTime {
        #[serde(default = "default_time_format")]
        format: String,
    },
}

pub fn default_time_format() -> String {
    "%Y%m%d %H:%M:%S".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorbarSpec {
    /// Gap to the axes, as a fraction of the axes width
    #[serde(default = "default_pad")]
    pub pad: f64,
    /// Length relative to the axes height
    #[serde(default = "default_shrink")]
    pub shrink: f64,
    /// Overrides the `name [units]` label
    #[serde(default)]
    pub label: Option<String>,
}

fn default_pad() -> f64 {
    0.05
}

fn default_shrink() -> f64 {
    1.0
}

impl Default for ColorbarSpec {
    fn default() -> Self {
        ColorbarSpec {
            pad: default_pad(),
            shrink: default_shrink(),
            label: None,
        }
    }
}

/// Everything that controls how one figure looks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    #[serde(default)]
    pub kind: PlotKind,
    /// Dimension or coordinate on the horizontal axis
    #[serde(default)]
    pub x: Option<String>,
    /// Dimension or coordinate on the vertical axis
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub vmin: Option<f64>,
    #[serde(default)]
    pub vmax: Option<f64>,
    /// Contour levels; only used by filled contours
    #[serde(default)]
    pub levels: Option<Levels>,
    #[serde(default)]
    pub cmap: Colormap,
    #[serde(default)]
    pub projection: Projection,
    #[serde(default)]
    pub coastlines: bool,
    #[serde(default)]
    pub gridlines: Option<Gridlines>,
    #[serde(default)]
    pub invert_y: bool,
    #[serde(default)]
    pub title: Option<Title>,
    #[serde(default)]
    pub colorbar: ColorbarSpec,
    /// Width and height in inches
    #[serde(default = "default_figsize")]
    pub figsize: [f64; 2],
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_figsize() -> [f64; 2] {
    [6.4, 4.8]
}

fn default_dpi() -> u32 {
    100
}

impl Default for PlotSpec {
    fn default() -> Self {
        PlotSpec {
            kind: PlotKind::default(),
            x: None,
            y: None,
            vmin: None,
            vmax: None,
            levels: None,
            cmap: Colormap::default(),
            projection: Projection::default(),
            coastlines: false,
            gridlines: None,
            invert_y: false,
            title: None,
            colorbar: ColorbarSpec::default(),
            figsize: default_figsize(),
            dpi: default_dpi(),
        }
    }
}

/// Where fonts and coastlines come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceConfig {
    /// TrueType font; the bundled DejaVu Sans is used otherwise
    #[serde(default)]
    pub font: Option<PathBuf>,
    /// GeoJSON file with coastline geometries; the bundled world coastline
    /// is used otherwise
    #[serde(default)]
    pub coastlines: Option<PathBuf>,
}

/// Loaded fonts and map geometry shared by every figure of a run
pub struct RenderResources {
    pub font: Option<Font<'static>>,
    pub coastlines: Vec<Polyline>,
}

impl RenderResources {
    /// Loads what `config` names. Failures are logged and degrade the
    /// figures (bundled font, no coastlines) instead of aborting.
    pub fn load(config: &ResourceConfig) -> Self {
        let font = match &config.font {
            Some(path) => match std::fs::read(path).ok().and_then(Font::try_from_vec) {
                Some(font) => Some(font),
                None => {
                    warn!("Could not load font {}; using the bundled font", path.display());
                    text::default_font()
                }
            },
            None => text::default_font(),
        };
        if font.is_none() {
            warn!("No usable font; figures will be rendered without text");
        }

        let coastlines = match &config.coastlines {
            Some(path) => geo::load_coastlines(path).unwrap_or_else(|e| {
                warn!("Could not load coastlines from {}: {}", path.display(), e);
                Vec::new()
            }),
            None => geo::bundled_coastlines(),
        };

        RenderResources { font, coastlines }
    }

    /// Compiled-in font and coastline
    pub fn bundled() -> Self {
        RenderResources {
            font: text::default_font(),
            coastlines: geo::bundled_coastlines(),
        }
    }

    pub fn without_text() -> Self {
        RenderResources {
            font: None,
            coastlines: Vec::new(),
        }
    }
}

/// How one plot axis is sourced
#[derive(Debug, Clone, PartialEq)]
enum AxisSource {
    Dimension(String),
    Coordinate(String),
}

impl AxisSource {
    fn name(&self) -> &str {
        match self {
            AxisSource::Dimension(n) | AxisSource::Coordinate(n) => n,
        }
    }
}

fn classify_axis(array: &DataArray, axis: &str) -> RenderResult<AxisSource> {
    if array.dimension(axis).is_some() {
        Ok(AxisSource::Dimension(axis.to_string()))
    } else if array.coord(axis).is_some() {
        Ok(AxisSource::Coordinate(axis.to_string()))
    } else {
        let mut available: Vec<String> = array.dims.iter().map(|d| d.name.clone()).collect();
        available.extend(array.coords.iter().map(|c| c.name.clone()));
        Err(RenderError::UnknownAxis {
            name: array.name.clone(),
            axis: axis.to_string(),
            available,
        })
    }
}

/// Picks the x and y sources. Without hints, y is the first dimension and
/// x the second; map plots default to `Longitude`/`Latitude`. Naming one
/// dimension puts the other dimension on the remaining axis.
fn resolve_axes(array: &DataArray, spec: &PlotSpec) -> RenderResult<(AxisSource, AxisSource)> {
    let d0 = array.dims[0].name.clone();
    let d1 = array.dims[1].name.clone();
    let other = |dim: &str| if dim == d0 { d1.clone() } else { d0.clone() };

    let (x, y) = match (&spec.x, &spec.y) {
        (None, None) if spec.projection == Projection::PlateCarree => {
            ("Longitude".to_string(), "Latitude".to_string())
        }
        (None, None) => (d1.clone(), d0.clone()),
        (Some(x), Some(y)) => (x.clone(), y.clone()),
        (Some(x), None) => {
            let y = if array.dimension(x).is_some() { other(x) } else { d0.clone() };
            (x.clone(), y)
        }
        (None, Some(y)) => {
            let x = if array.dimension(y).is_some() { other(y) } else { d1.clone() };
            (x, y.clone())
        }
    };
    Ok((classify_axis(array, &x)?, classify_axis(array, &y)?))
}

/// Positions of every sample along one axis, shaped like the field
fn axis_positions(array: &DataArray, source: &AxisSource) -> RenderResult<Array2<f64>> {
    let (rows, cols) = (array.shape()[0], array.shape()[1]);
    let d0 = &array.dims[0];
    let d1 = &array.dims[1];
    match source {
        AxisSource::Dimension(dim) if *dim == d0.name => {
            Ok(Array2::from_shape_fn((rows, cols), |(i, _)| (d0.origin + i) as f64))
        }
        AxisSource::Dimension(_) => {
            Ok(Array2::from_shape_fn((rows, cols), |(_, j)| (d1.origin + j) as f64))
        }
        AxisSource::Coordinate(name) => {
            let coord = array
                .coord(name)
                .ok_or_else(|| RenderError::CoordinateShape {
                    coord: name.clone(),
                    dims: Vec::new(),
                })?;
            let shape_error = || RenderError::CoordinateShape {
                coord: name.clone(),
                dims: coord.dims.clone(),
            };
            let dims: Vec<&str> = coord.dims.iter().map(|d| d.as_str()).collect();
            let values = &coord.values;
            match dims.as_slice() {
                [a, b] if *a == d0.name && *b == d1.name => values
                    .clone()
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| shape_error()),
                [a, b] if *a == d1.name && *b == d0.name => values
                    .clone()
                    .into_dimensionality::<Ix2>()
                    .map(|v| v.reversed_axes())
                    .map_err(|_| shape_error()),
                [a] if *a == d0.name => Ok(Array2::from_shape_fn((rows, cols), |(i, _)| values[[i]])),
                [a] if *a == d1.name => Ok(Array2::from_shape_fn((rows, cols), |(_, j)| values[[j]])),
                _ => Err(shape_error()),
            }
        }
    }
}

fn build_grid(array: &DataArray, x: &AxisSource, y: &AxisSource) -> RenderResult<Grid> {
    let values = array
        .values
        .clone()
        .into_dimensionality::<Ix2>()
        .map_err(|_| RenderError::NotTwoDimensional {
            name: array.name.clone(),
            dims: array.dims.iter().map(|d| d.name.clone()).collect(),
        })?;
    Ok(Grid {
        x: axis_positions(array, x)?,
        y: axis_positions(array, y)?,
        values,
    })
}

/// Levels chosen for filled contours when none are given
pub fn auto_levels(min: f64, max: f64) -> Vec<f64> {
    let ticks = ticks::nice_ticks(min, max, 7);
    if ticks.len() < 2 {
        return vec![min - 0.5, min + 0.5];
    }
    let step = ticks[1] - ticks[0];
    let start = (min / step).floor() as i64;
    let stop = (max / step).ceil() as i64;
    (start..=stop).map(|k| k as f64 * step).collect()
}

fn axis_label(array: &DataArray, source: &AxisSource) -> String {
    match source {
        AxisSource::Dimension(name) => name.clone(),
        AxisSource::Coordinate(name) => array
            .coord(name)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| name.clone()),
    }
}

fn title_text(array: &DataArray, title: &Title) -> Option<String> {
    match title {
        Title::Text { text } => Some(text.clone()),
        Title::ScanTime { format } => match array.first_time() {
            Some(time) => Some(time.format(format).to_string()),
            None => {
                warn!("'{}' has no time coordinate; skipping the time title", array.name);
                None
            }
        },
    }
}

/// Renders one figure
pub fn render(array: &DataArray, spec: &PlotSpec, resources: &RenderResources) -> RenderResult<RgbaImage> {
    if array.ndim() != 2 {
        return Err(RenderError::NotTwoDimensional {
            name: array.name.clone(),
            dims: array.dims.iter().map(|d| d.name.clone()).collect(),
        });
    }
    let (x_source, y_source) = resolve_axes(array, spec)?;
    let grid = build_grid(array, &x_source, &y_source)?;
    let is_map = spec.projection == Projection::PlateCarree;
    debug!(
        "Rendering {} as {:?}: x={} y={} map={}",
        array.name,
        spec.kind,
        x_source.name(),
        y_source.name(),
        is_map
    );

    let (data_min, data_max) = match array.finite_range() {
        Some((lo, hi)) => (lo as f64, hi as f64),
        None => {
            warn!("'{}' has no finite values; the figure will be empty", array.name);
            (0.0, 1.0)
        }
    };

    let levels = match spec.kind {
        PlotKind::Contourf => Some(match &spec.levels {
            Some(levels) => levels.validate().map_err(RenderError::InvalidLevels)?,
            None => auto_levels(spec.vmin.unwrap_or(data_min), spec.vmax.unwrap_or(data_max)),
        }),
        PlotKind::Pcolormesh => None,
    };

    // Pseudocolor cells extend half a cell past the outer samples.
    let extent = match spec.kind {
        PlotKind::Pcolormesh => Grid {
            x: mesh::interval_breaks_2d(&grid.x),
            y: mesh::interval_breaks_2d(&grid.y),
            values: Array2::zeros((0, 0)),
        }
        .extent(),
        PlotKind::Contourf => grid.extent(),
    };
    let Some((x0, x1, y0, y1)) = extent else {
        return Err(RenderError::InvalidFigure(format!(
            "'{}' has no finite {} / {} positions",
            array.name,
            x_source.name(),
            y_source.name()
        )));
    };

    let aspect = if is_map && x1 > x0 { Some((y1 - y0) / (x1 - x0)) } else { None };
    let layout: FigureLayout = layout::compute_layout(spec.figsize, spec.dpi, &spec.colorbar, aspect)?;
    let transform = Transform {
        x_range: (x0, x1),
        y_range: (y0, y1),
        rect: layout.axes,
        invert_y: spec.invert_y,
    };

    let mut canvas = RgbaImage::from_pixel(layout.width, layout.height, layout::WHITE);
    let font = resources.font.as_ref();

    let fill = match &levels {
        Some(levels) => {
            let extend = Extend::from_data(levels, data_min, data_max);
            debug!("Contour levels {:?}, open ends {:?}", levels, extend);
            let colors = BandColors::from_colormap(spec.cmap, levels, extend);
            let drawn = mesh::draw_contourf(&mut canvas, &grid, &transform, levels, &colors, is_map);
            debug!("Filled {} triangles", drawn);
            ColorbarFill::Banded {
                levels: levels.clone(),
                colors,
            }
        }
        None => {
            let norm = Normalize::new(spec.vmin.unwrap_or(data_min), spec.vmax.unwrap_or(data_max));
            let cmap = spec.cmap;
            let drawn = mesh::draw_pcolormesh(
                &mut canvas,
                &grid,
                &transform,
                |v| (!v.is_nan()).then(|| cmap.sample(norm.apply(v as f64))),
                is_map,
            );
            debug!("Filled {} cells", drawn);
            ColorbarFill::Continuous { norm }
        }
    };

    if is_map {
        if spec.coastlines {
            if resources.coastlines.is_empty() {
                warn!("Coastlines requested but none are loaded");
            }
            for line in &resources.coastlines {
                for pair in line.windows(2) {
                    if (pair[0].0 - pair[1].0).abs() > geo::MAX_CELL_LONGITUDE_SPAN {
                        continue;
                    }
                    let a = transform.to_pixel(pair[0].0, pair[0].1);
                    let b = transform.to_pixel(pair[1].0, pair[1].1);
                    layout::draw_line(&mut canvas, &layout.axes, a, b, layout::BLACK);
                }
            }
        }
        if let Some(gridlines) = spec.gridlines {
            let lons = ticks::nice_ticks(x0, x1, 5);
            let lats = ticks::nice_ticks(y0, y1, 5);
            if gridlines.lines {
                layout::draw_gridlines(&mut canvas, &layout, &transform, &lons, &lats);
            }
            let lon_labels: Vec<(f64, String)> = lons.iter().map(|&v| (v, geo::format_longitude(v))).collect();
            let lat_labels: Vec<(f64, String)> = lats.iter().map(|&v| (v, geo::format_latitude(v))).collect();
            layout::draw_x_ticks(&mut canvas, font, &layout, &transform, &lon_labels, false);
            layout::draw_y_ticks(&mut canvas, font, &layout, &transform, &lat_labels, false);
        }
    } else {
        let target = |pixels: u32| ((pixels as f64 / (80.0 * layout.scale)).round() as usize).clamp(3, 9);
        let labelled = |values: Vec<f64>| -> Vec<(f64, String)> {
            values.into_iter().map(|v| (v, ticks::format_number(v))).collect()
        };
        let xt = labelled(ticks::nice_ticks(x0, x1, target(layout.axes.width)));
        let yt = labelled(ticks::nice_ticks(y0, y1, target(layout.axes.height)));
        layout::draw_x_ticks(&mut canvas, font, &layout, &transform, &xt, true);
        let widest = layout::draw_y_ticks(&mut canvas, font, &layout, &transform, &yt, true);
        layout::draw_x_label(&mut canvas, font, &layout, &axis_label(array, &x_source));
        layout::draw_y_label(&mut canvas, font, &layout, &axis_label(array, &y_source), widest);
    }
    layout::draw_frame(&mut canvas, &layout.axes);

    let colorbar_ticks = match &fill {
        ColorbarFill::Continuous { norm } => ticks::nice_ticks(norm.vmin, norm.vmax, 6),
        ColorbarFill::Banded { levels, .. } => {
            ticks::nice_ticks(levels[0], levels[levels.len() - 1], 6)
        }
    };
    let label = spec.colorbar.label.clone().unwrap_or_else(|| array.label());
    layout::draw_colorbar(&mut canvas, font, &layout, spec.cmap, &fill, &colorbar_ticks, &label);

    if let Some(title) = spec.title.as_ref().and_then(|t| title_text(array, t)) {
        layout::draw_title(&mut canvas, font, &layout, &title);
    }

    Ok(canvas)
}

/// PNG bytes of a rendered figure
pub fn encode_png(image: &RgbaImage) -> RenderResult<Vec<u8>> {
    let mut bytes = Vec::new();
    image::codecs::png::PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
    )?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Coordinate, Dimension};
    use ndarray::{ArrayD, IxDyn};

    fn field(nscan: usize, nray: usize) -> DataArray {
        let values = ArrayD::from_shape_fn(IxDyn(&[nscan, nray]), |ix| (ix[0] * 2 + ix[1]) as f32);
        let lon = ArrayD::from_shape_fn(IxDyn(&[nscan, nray]), |ix| 80.0 + ix[0] as f64 * 0.1 + ix[1] as f64 * 0.05);
        let lat = ArrayD::from_shape_fn(IxDyn(&[nscan, nray]), |ix| -10.0 + ix[0] as f64 * 0.1 - ix[1] as f64 * 0.05);
        let time = ArrayD::from_elem(IxDyn(&[nscan, nray]), 1_621_111_412_000.0);
        DataArray::new(
            "zFactorFinal",
            vec![
                Dimension::with_origin("nscan", nscan, 5550),
                Dimension::new("nrayNS", nray),
            ],
            values,
        )
        .unwrap()
        .with_coord(Coordinate::new("Longitude", &["nscan", "nrayNS"], lon).unwrap())
        .unwrap()
        .with_coord(Coordinate::new("Latitude", &["nscan", "nrayNS"], lat).unwrap())
        .unwrap()
        .with_coord(Coordinate::new("time", &["nscan", "nrayNS"], time).unwrap())
        .unwrap()
        .with_attr("units", "dBZ")
    }

    fn small(spec: PlotSpec) -> PlotSpec {
        PlotSpec {
            figsize: [3.0, 2.0],
            dpi: 50,
            ..spec
        }
    }

    #[test]
    fn test_default_resources_carry_coastlines() {
        let resources = RenderResources::load(&ResourceConfig::default());
        assert!(!resources.coastlines.is_empty());
        assert!(resources.font.is_some());

        // A configured file that cannot be read leaves the map bare
        let missing = ResourceConfig {
            font: None,
            coastlines: Some(PathBuf::from("/nonexistent/coast.geojson")),
        };
        assert!(RenderResources::load(&missing).coastlines.is_empty());
    }

    #[test]
    fn test_axes_default_and_hints() {
        let array = field(4, 3);
        let (x, y) = resolve_axes(&array, &PlotSpec::default()).unwrap();
        assert_eq!((x.name(), y.name()), ("nrayNS", "nscan"));

        let along_track = PlotSpec {
            x: Some("nscan".to_string()),
            ..PlotSpec::default()
        };
        let (x, y) = resolve_axes(&array, &along_track).unwrap();
        assert_eq!((x.name(), y.name()), ("nscan", "nrayNS"));

        let map = PlotSpec {
            projection: Projection::PlateCarree,
            ..PlotSpec::default()
        };
        let (x, y) = resolve_axes(&array, &map).unwrap();
        assert_eq!(x, AxisSource::Coordinate("Longitude".to_string()));
        assert_eq!(y, AxisSource::Coordinate("Latitude".to_string()));

        let bad = PlotSpec {
            x: Some("nbin".to_string()),
            ..PlotSpec::default()
        };
        assert!(matches!(resolve_axes(&array, &bad), Err(RenderError::UnknownAxis { .. })));
    }

    #[test]
    fn test_dimension_positions_use_absolute_scan_index() {
        let array = field(4, 3);
        let x = axis_positions(&array, &AxisSource::Dimension("nscan".to_string())).unwrap();
        assert_eq!(x[[0, 2]], 5550.0);
        assert_eq!(x[[3, 0]], 5553.0);
        let y = axis_positions(&array, &AxisSource::Dimension("nrayNS".to_string())).unwrap();
        assert_eq!(y[[3, 2]], 2.0);
    }

    #[test]
    fn test_auto_levels_cover_range() {
        let levels = auto_levels(3.0, 57.0);
        assert!(levels[0] <= 3.0);
        assert!(*levels.last().unwrap() >= 57.0);
        assert!(levels.len() >= 3);
    }

    #[test]
    fn test_render_pcolormesh_and_png() {
        let array = field(6, 5);
        let spec = small(PlotSpec {
            x: Some("nscan".to_string()),
            invert_y: true,
            title: Some(Title::ScanTime {
                format: default_time_format(),
            }),
            ..PlotSpec::default()
        });
        let figure = render(&array, &spec, &RenderResources::bundled()).unwrap();
        assert_eq!(figure.dimensions(), (150, 100));

        let layout = layout::compute_layout(spec.figsize, spec.dpi, &spec.colorbar, None).unwrap();
        let center = figure.get_pixel(
            (layout.axes.left + layout.axes.width as i32 / 2) as u32,
            (layout.axes.top + layout.axes.height as i32 / 2) as u32,
        );
        assert_ne!(*center, layout::WHITE);

        let png = encode_png(&figure).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_render_contourf_map_without_font() {
        let array = field(6, 5);
        let spec = small(PlotSpec {
            kind: PlotKind::Contourf,
            projection: Projection::PlateCarree,
            levels: Some(Levels::new(0.0, 20.0, 2.0)),
            cmap: Colormap::Turbo,
            coastlines: true,
            gridlines: Some(Gridlines::default()),
            ..PlotSpec::default()
        });
        let figure = render(&array, &spec, &RenderResources::without_text()).unwrap();
        assert_eq!(figure.dimensions(), (150, 100));
        assert!(figure.pixels().any(|p| *p != layout::WHITE && *p != layout::BLACK));
    }

    #[test]
    fn test_render_contourf_fills_past_last_level() {
        // Values run up to 14, the levels stop at 8
        let array = field(6, 5);
        let spec = small(PlotSpec {
            kind: PlotKind::Contourf,
            levels: Some(Levels::new(0.0, 10.0, 2.0)),
            cmap: Colormap::Viridis,
            ..PlotSpec::default()
        });
        let figure = render(&array, &spec, &RenderResources::without_text()).unwrap();
        let layout = layout::compute_layout(spec.figsize, spec.dpi, &spec.colorbar, None).unwrap();
        let over = Colormap::Viridis.sample(1.0);
        let inside = (0..layout.axes.height as i32)
            .flat_map(|dy| (0..layout.axes.width as i32).map(move |dx| (dx, dy)))
            .filter(|&(dx, dy)| {
                *figure.get_pixel((layout.axes.left + dx) as u32, (layout.axes.top + dy) as u32) == over
            })
            .count();
        assert!(inside > 0);
    }

    #[test]
    fn test_render_rejects_bad_input() {
        let array = field(4, 3);
        let cube = DataArray::new(
            "cube",
            vec![Dimension::new("a", 2), Dimension::new("b", 2), Dimension::new("c", 2)],
            ArrayD::zeros(IxDyn(&[2, 2, 2])),
        )
        .unwrap();
        assert!(matches!(
            render(&cube, &PlotSpec::default(), &RenderResources::without_text()),
            Err(RenderError::NotTwoDimensional { .. })
        ));

        let bad_levels = PlotSpec {
            kind: PlotKind::Contourf,
            levels: Some(Levels::new(0.0, 1.0, 5.0)),
            ..small(PlotSpec::default())
        };
        assert!(matches!(
            render(&array, &bad_levels, &RenderResources::without_text()),
            Err(RenderError::InvalidLevels(_))
        ));
    }

    #[test]
    fn test_plot_spec_from_yaml() {
        let yaml = r#"
kind: contourf
x: Longitude
y: Latitude
levels: { start: 0, stop: 60, step: 9 }
cmap: turbo
projection: plate_carree
coastlines: true
gridlines: { lines: false }
title: { kind: scan_time }
figsize: [8, 8]
"#;
        let spec: PlotSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kind, PlotKind::Contourf);
        assert_eq!(spec.levels, Some(Levels::new(0.0, 60.0, 9.0)));
        assert_eq!(spec.title, Some(Title::ScanTime { format: default_time_format() }));
        assert_eq!(spec.dpi, 100);
        assert_eq!(spec.colorbar, ColorbarSpec::default());
    }
}
