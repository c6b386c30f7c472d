//! # Session Configuration
//!
//! A session file names one granule and the figures to draw from it. Files
//! are JSON or YAML, picked by extension; every section except `granule` and
//! `figures` is optional.
//!
//! ```yaml
//! granule: 2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5
//! pps:
//!   server: Research
//!   username: someone@example.com
//! resources:
//!   coastlines: ne_10m_coastline.geojson
//! figures:
//!   - name: composite
//!     variable: zFactorFinal
//!     selections:
//!       - { dim: nfreq, index: 0 }
//!     reductions:
//!       - { dim: nbin, op: max }
//!     plot:
//!       x: nscan
//!       vmin: 0
//!       vmax: 60
//!     output: figures/composite.png
//! ```
//!
//! Environment variables with the `GPM_DPR_` prefix override the file (see
//! [`SessionConfig::apply_env`]); command-line flags override both.

use crate::dataset::{Reduction, Selector};
use crate::granule::{GranuleNameError, TimeWindow, parse_timestamp};
use crate::loader::{DEFAULT_MISSING_SENTINEL, LoadOptions};
use crate::pps::{PpsConfig, PpsServer};
use crate::render::{
    ColorbarSpec, Colormap, Gridlines, Levels, PlotKind, PlotSpec, Projection, ResourceConfig,
    Title, default_time_format,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the Cyclone Tauktae overpass used by the bundled templates
pub const CASE_STUDY_GRANULE: &str =
    "2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported configuration format '{0}': use .json, .yaml or .yml")]
    UnsupportedFormat(String),

    #[error("Invalid selection for '{dim}': {reason}")]
    Selection { dim: String, reason: String },

    #[error("Invalid figure '{figure}': {reason}")]
    Figure { figure: String, reason: String },

    #[error("Invalid value in {var}: {reason}")]
    Environment { var: String, reason: String },

    #[error(transparent)]
    Time(#[from] GranuleNameError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// One index or half-open slice along a dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSpec {
    pub dim: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl SelectionSpec {
    pub fn index(dim: &str, index: usize) -> Self {
        SelectionSpec {
            dim: dim.to_string(),
            index: Some(index),
            start: None,
            end: None,
        }
    }

    pub fn slice(dim: &str, start: usize, end: usize) -> Self {
        SelectionSpec {
            dim: dim.to_string(),
            index: None,
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn to_selector(&self) -> ConfigResult<Selector> {
        let invalid = |reason: &str| ConfigError::Selection {
            dim: self.dim.clone(),
            reason: reason.to_string(),
        };
        match (self.index, self.start, self.end) {
            (Some(index), None, None) => Ok(Selector::Index(index)),
            (None, Some(start), Some(end)) if start <= end => Ok(Selector::Slice { start, end }),
            (None, Some(_), Some(_)) => Err(invalid("start is after end")),
            _ => Err(invalid("give either `index` or both `start` and `end`")),
        }
    }
}

impl From<(String, Selector)> for SelectionSpec {
    fn from((dim, selector): (String, Selector)) -> Self {
        match selector {
            Selector::Index(i) => SelectionSpec::index(&dim, i),
            Selector::Slice { start, end } => SelectionSpec::slice(&dim, start, end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionSpec {
    pub dim: String,
    pub op: Reduction,
}

impl ReductionSpec {
    pub fn new(dim: &str, op: Reduction) -> Self {
        ReductionSpec {
            dim: dim.to_string(),
            op,
        }
    }
}

/// One figure: what to select from the granule and how to draw it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureConfig {
    pub name: String,
    pub variable: String,
    /// Applied first, in order
    #[serde(default)]
    pub selections: Vec<SelectionSpec>,
    /// Applied after the selections, in order
    #[serde(default)]
    pub reductions: Vec<ReductionSpec>,
    #[serde(default)]
    pub plot: PlotSpec,
    /// PNG destination, local or `s3://`
    pub output: String,
}

impl FigureConfig {
    pub fn selectors(&self) -> ConfigResult<Vec<(String, Selector)>> {
        self.selections
            .iter()
            .map(|s| Ok((s.dim.clone(), s.to_selector()?)))
            .collect()
    }

    pub fn reduction_ops(&self) -> Vec<(String, Reduction)> {
        self.reductions.iter().map(|r| (r.dim.clone(), r.op)).collect()
    }

    fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigError::Figure {
            figure: self.name.clone(),
            reason,
        };
        if self.variable.trim().is_empty() {
            return Err(invalid("no variable given".to_string()));
        }
        if self.output.trim().is_empty() {
            return Err(invalid("no output path given".to_string()));
        }
        self.selectors()?;
        if self.plot.kind == PlotKind::Contourf
            && let Some(levels) = &self.plot.levels
        {
            levels.validate().map_err(invalid)?;
        }
        if let (Some(vmin), Some(vmax)) = (self.plot.vmin, self.plot.vmax)
            && vmin >= vmax
        {
            return Err(invalid(format!("vmin {} is not below vmax {}", vmin, vmax)));
        }
        Ok(())
    }
}

/// Scans to read from the granule, half-open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub start: usize,
    pub end: usize,
}

fn default_missing_sentinel() -> f32 {
    DEFAULT_MISSING_SENTINEL
}

/// A complete rendering session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Local path, `s3://` URL or PPS file name
    pub granule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scans: Option<ScanRange>,
    /// Needed only when the granule has to be downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pps: Option<PpsConfig>,
    /// Window for `download` when no granule name is known yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<TimeWindow>,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default = "default_missing_sentinel")]
    pub missing_sentinel: f32,
    #[serde(default)]
    pub figures: Vec<FigureConfig>,
}

impl SessionConfig {
    pub fn new(granule: &str) -> Self {
        SessionConfig {
            granule: granule.to_string(),
            swath: None,
            scans: None,
            pps: None,
            search: None,
            resources: ResourceConfig::default(),
            missing_sentinel: DEFAULT_MISSING_SENTINEL,
            figures: Vec::new(),
        }
    }

    /// Loads a session file; the extension picks the parser
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Self::from_json(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Figure names must be unique and every figure well-formed
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(scans) = self.scans
            && scans.start >= scans.end
        {
            return Err(ConfigError::Selection {
                dim: "nscan".to_string(),
                reason: format!("empty scan range {}:{}", scans.start, scans.end),
            });
        }
        let mut names = BTreeSet::new();
        for figure in &self.figures {
            if !names.insert(figure.name.as_str()) {
                return Err(ConfigError::Figure {
                    figure: figure.name.clone(),
                    reason: "duplicate figure name".to_string(),
                });
            }
            figure.validate()?;
        }
        Ok(())
    }

    /// Loader settings for this session, reading only the variables the
    /// figures use
    pub fn load_options(&self) -> LoadOptions {
        let mut variables: Vec<String> = Vec::new();
        for figure in &self.figures {
            if !variables.contains(&figure.variable) {
                variables.push(figure.variable.clone());
            }
        }
        let mut options = LoadOptions {
            missing_sentinel: self.missing_sentinel,
            ..LoadOptions::default()
        };
        if !variables.is_empty() {
            options = options.with_variables(&variables);
        }
        if let Some(swath) = &self.swath {
            options = options.with_swath(swath);
        }
        if let Some(scans) = self.scans {
            options = options.with_scans(scans.start..scans.end);
        }
        options
    }

    /// Overrides fields from `GPM_DPR_*` environment variables:
    ///
    /// - `GPM_DPR_GRANULE`
    /// - `GPM_DPR_PPS_USERNAME`, `GPM_DPR_PPS_PASSWORD`, `GPM_DPR_PPS_SERVER`
    /// - `GPM_DPR_DATA_DIR`
    /// - `GPM_DPR_FONT`, `GPM_DPR_COASTLINES`
    /// - `GPM_DPR_SEARCH_START`, `GPM_DPR_SEARCH_END`
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Some(granule) = env_value("GPM_DPR_GRANULE") {
            self.granule = granule;
        }
        if let Some(username) = env_value("GPM_DPR_PPS_USERNAME") {
            match &mut self.pps {
                Some(pps) => pps.username = username,
                None => self.pps = Some(PpsConfig::new(&username)),
            }
        }
        if let Some(pps) = &mut self.pps {
            if let Some(password) = env_value("GPM_DPR_PPS_PASSWORD") {
                pps.password = Some(password);
            }
            if let Some(server) = env_value("GPM_DPR_PPS_SERVER") {
                pps.server = server.parse::<PpsServer>().map_err(|reason| ConfigError::Environment {
                    var: "GPM_DPR_PPS_SERVER".to_string(),
                    reason,
                })?;
            }
            if let Some(dir) = env_value("GPM_DPR_DATA_DIR") {
                pps.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(font) = env_value("GPM_DPR_FONT") {
            self.resources.font = Some(PathBuf::from(font));
        }
        if let Some(coastlines) = env_value("GPM_DPR_COASTLINES") {
            self.resources.coastlines = Some(PathBuf::from(coastlines));
        }
        match (env_value("GPM_DPR_SEARCH_START"), env_value("GPM_DPR_SEARCH_END")) {
            (Some(start), Some(end)) => {
                self.search = Some(TimeWindow::new(parse_timestamp(&start)?, parse_timestamp(&end)?)?);
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::Environment {
                    var: "GPM_DPR_SEARCH_START/GPM_DPR_SEARCH_END".to_string(),
                    reason: "both must be set".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn env_value(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Ready-made sessions reproducing the Cyclone Tauktae analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTemplate {
    /// Whole-orbit composites on a map and on index axes
    Overview,
    /// Scans 5550-5630 over the cyclone
    CaseStudy,
    /// Both of the above
    Full,
}

const CASE_START: usize = 5550;
const CASE_END: usize = 5630;

fn composite(freq: usize, scans: Option<(usize, usize)>) -> (Vec<SelectionSpec>, Vec<ReductionSpec>) {
    let mut selections = Vec::new();
    if let Some((start, end)) = scans {
        selections.push(SelectionSpec::slice("nscan", start, end));
    }
    selections.push(SelectionSpec::index("nfreq", freq));
    (selections, vec![ReductionSpec::new("nbin", Reduction::Max)])
}

fn overview_figures() -> Vec<FigureConfig> {
    let colorbar = ColorbarSpec {
        pad: 0.02,
        shrink: 0.5,
        label: None,
    };
    let (selections, reductions) = composite(0, None);
    vec![
        FigureConfig {
            name: "orbit-map".to_string(),
            variable: "zFactorFinal".to_string(),
            selections: selections.clone(),
            reductions: reductions.clone(),
            plot: PlotSpec {
                x: Some("Longitude".to_string()),
                y: Some("Latitude".to_string()),
                vmin: Some(0.0),
                vmax: Some(60.0),
                projection: Projection::PlateCarree,
                coastlines: true,
                gridlines: Some(Gridlines::default()),
                colorbar: colorbar.clone(),
                figsize: [10.0, 6.5],
                ..PlotSpec::default()
            },
            output: "figures/orbit_map.png".to_string(),
        },
        FigureConfig {
            name: "orbit-swath".to_string(),
            variable: "zFactorFinal".to_string(),
            selections,
            reductions,
            plot: PlotSpec {
                x: Some("nscan".to_string()),
                vmin: Some(0.0),
                vmax: Some(60.0),
                colorbar,
                figsize: [10.0, 6.5],
                ..PlotSpec::default()
            },
            output: "figures/orbit_swath.png".to_string(),
        },
    ]
}

fn case_study_figures() -> Vec<FigureConfig> {
    let window = Some((CASE_START, CASE_END));
    let time_title = Some(Title::ScanTime {
        format: default_time_format(),
    });
    let (ku_selections, ku_reductions) = composite(0, window);
    let (ka_selections, ka_reductions) = composite(1, window);
    vec![
        FigureConfig {
            name: "surface-rain".to_string(),
            variable: "precipRateNearSurface".to_string(),
            selections: vec![SelectionSpec::slice("nscan", CASE_START, CASE_END)],
            reductions: Vec::new(),
            plot: PlotSpec {
                kind: PlotKind::Contourf,
                x: Some("nscan".to_string()),
                levels: Some(Levels::new(0.0, 200.0, 2.0)),
                cmap: Colormap::Turbo,
                invert_y: true,
                ..PlotSpec::default()
            },
            output: "figures/surface_rain.png".to_string(),
        },
        FigureConfig {
            name: "ka-composite".to_string(),
            variable: "zFactorFinal".to_string(),
            selections: ka_selections,
            reductions: ka_reductions,
            plot: PlotSpec {
                kind: PlotKind::Contourf,
                x: Some("nscan".to_string()),
                levels: Some(Levels::new(0.0, 60.0, 2.0)),
                cmap: Colormap::Turbo,
                invert_y: true,
                title: time_title.clone(),
                ..PlotSpec::default()
            },
            output: "figures/ka_composite.png".to_string(),
        },
        FigureConfig {
            name: "heavy-ice".to_string(),
            variable: "flagHeavyIcePrecip".to_string(),
            selections: vec![SelectionSpec::slice("nscan", CASE_START, CASE_END)],
            reductions: Vec::new(),
            plot: PlotSpec {
                x: Some("nscan".to_string()),
                invert_y: true,
                ..PlotSpec::default()
            },
            output: "figures/heavy_ice.png".to_string(),
        },
        FigureConfig {
            name: "cyclone-map".to_string(),
            variable: "zFactorFinal".to_string(),
            selections: ku_selections,
            reductions: ku_reductions,
            plot: PlotSpec {
                kind: PlotKind::Contourf,
                x: Some("Longitude".to_string()),
                y: Some("Latitude".to_string()),
                levels: Some(Levels::new(0.0, 60.0, 9.0)),
                cmap: Colormap::Turbo,
                projection: Projection::PlateCarree,
                coastlines: true,
                gridlines: Some(Gridlines::default()),
                title: time_title,
                figsize: [8.0, 8.0],
                ..PlotSpec::default()
            },
            output: "figures/cyclone_map.png".to_string(),
        },
    ]
}

impl SessionTemplate {
    pub fn build(&self) -> SessionConfig {
        let mut session = SessionConfig::new(CASE_STUDY_GRANULE);
        let mut pps = PpsConfig::new("you@example.com");
        pps.data_dir = PathBuf::from("data");
        session.pps = Some(pps);
        session.figures = match self {
            SessionTemplate::Overview => overview_figures(),
            SessionTemplate::CaseStudy => case_study_figures(),
            SessionTemplate::Full => {
                let mut figures = overview_figures();
                figures.extend(case_study_figures());
                figures
            }
        };
        session
    }
}
