//! # CLI Module
//!
//! Command-line interface for gpm-dpr:
//! - Argument parsing with clap
//! - Session files (JSON/YAML) via `--config`
//! - `GPM_DPR_` environment variables, merged with CLI > env > file priority
//! - Selection DSL for `--isel`/`--reduce` and `GPM_DPR_SELECTIONS`

use crate::config::{FigureConfig, ReductionSpec, SelectionSpec, SessionTemplate};
use crate::dataset::{Reduction, Selector};
use crate::pps::PpsServer;
use crate::render::{
    ColorbarSpec, Colormap, Gridlines, Levels, PlotKind, PlotSpec, Projection, Title,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Read, slice and plot GPM DPR radar granules
#[derive(Parser, Debug)]
#[command(name = "gpm-dpr")]
#[command(about = "Read, slice and plot GPM Dual-frequency Precipitation Radar granules")]
#[command(version)]
#[command(long_about = "
gpm-dpr reads GPM DPR Level 2 granules (HDF5), selects and reduces the radar
cube along its nscan/nrayNS/nbin/nfreq dimensions, and renders the result as
pseudocolor or filled-contour PNG figures, optionally on a Plate Carree map.

EXAMPLES:
  # Inspect a granule
  gpm-dpr info 2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5

  # Column-maximum reflectivity along the swath
  gpm-dpr plot granule.HDF5 -n zFactorFinal --isel nfreq=0 --reduce nbin:max \\
    --x nscan --vmin 0 --vmax 60 -o composite.png

  # Filled contours on a map
  gpm-dpr plot granule.HDF5 -n zFactorFinal --isel nscan=5550:5630 --isel nfreq=0 \\
    --reduce nbin:max --kind contourf --levels 0:60:9 --cmap turbo --map \\
    --coastlines --gridlines --time-title -o cyclone.png

  # Download from PPS
  gpm-dpr download --username you@example.com \\
    --start 2021-05-15T20:43 --end 2021-05-15T22:17

  # Render every figure of a session
  gpm-dpr template case-study --format yaml -o session.yaml
  gpm-dpr render --config session.yaml
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Session file path (JSON or YAML)
    #[arg(short, long, global = true, env = "GPM_DPR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show dimensions, coordinates and variables of a granule
    #[command(long_about = "
Load a granule (local path, s3:// URL, or PPS file name) and list its
dimensions, coordinates and variables with units and value ranges.

EXAMPLES:
  gpm-dpr info granule.HDF5
  gpm-dpr info granule.HDF5 -n zFactorFinal --detailed --format json
")]
    Info {
        /// Granule path, s3:// URL or PPS file name
        #[arg(env = "GPM_DPR_GRANULE")]
        granule: Option<String>,

        /// Only report this variable
        #[arg(short = 'n', long)]
        variable: Option<String>,

        /// Include variable and file attributes
        #[arg(long)]
        detailed: bool,

        /// Swath group to read (default: FS, then NS)
        #[arg(long)]
        swath: Option<String>,

        /// Output format for the report
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Render one figure from a granule
    #[command(long_about = "
Select and reduce one variable and render it as a PNG figure.

Selections use `dim=index` (drops the dimension) or `dim=start:end`
(half-open slice). Reductions use `dim:op` with op max, min or mean and are
applied after all selections, in order.

EXAMPLES:
  gpm-dpr plot granule.HDF5 -n precipRateNearSurface --isel nscan=5550:5630 \\
    --kind contourf --x nscan --levels 0:200:2 --cmap turbo --invert-y -o rain.png
")]
    Plot {
        /// Granule path, s3:// URL or PPS file name
        #[arg(env = "GPM_DPR_GRANULE")]
        granule: Option<String>,

        /// Variable to plot
        #[arg(short = 'n', long)]
        variable: String,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        plot: PlotArgs,

        /// Swath group to read (default: FS, then NS)
        #[arg(long)]
        swath: Option<String>,

        /// Output PNG path (local or S3)
        #[arg(short, long)]
        output: String,
    },

    /// Render every figure of a session file
    #[command(long_about = "
Render the figures listed in a session file (see `gpm-dpr template`).
The granule is loaded once and shared by every figure.

EXAMPLES:
  gpm-dpr render --config session.yaml
  gpm-dpr render --config session.yaml --figure cyclone-map
")]
    Render {
        /// Only render the named figures
        #[arg(long = "figure")]
        figures: Vec<String>,

        /// Validate the session without loading data
        #[arg(long)]
        dry_run: bool,
    },

    /// Search and download granules from the PPS archive
    #[command(long_about = "
Download GPM DPR granules from the NASA PPS archive, either one named granule
or every granule overlapping a time window. PPS uses the registered e-mail
address as both user name and password.

EXAMPLES:
  gpm-dpr download --username you@example.com \\
    --start 2021-05-15T20:43 --end 2021-05-15T22:17
  gpm-dpr download --username you@example.com \\
    --granule 2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5
")]
    Download {
        /// Registered PPS e-mail address
        #[arg(long, env = "GPM_DPR_PPS_USERNAME")]
        username: Option<String>,

        /// Defaults to the user name
        #[arg(long, env = "GPM_DPR_PPS_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Research or NRT
        #[arg(long, env = "GPM_DPR_PPS_SERVER")]
        server: Option<PpsServer>,

        /// Product prefix, e.g. 2A.GPM.DPR
        #[arg(long)]
        product: Option<String>,

        /// Directory for downloaded granules
        #[arg(long, env = "GPM_DPR_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Window start, e.g. 2021-05-15T20:43
        #[arg(long, requires = "end", conflicts_with = "granule")]
        start: Option<String>,

        /// Window end
        #[arg(long, requires = "start")]
        end: Option<String>,

        /// Download one granule by file name
        #[arg(long)]
        granule: Option<String>,

        /// Only list matching granules
        #[arg(long)]
        list_only: bool,
    },

    /// Export a selection as a Parquet table
    #[command(long_about = "
Flatten a selection into one row per element with dimension indices,
Longitude/Latitude/time and the variable value, and write it as Parquet.

EXAMPLES:
  gpm-dpr export granule.HDF5 -n precipRateNearSurface --isel nscan=5550:5630 \\
    --drop-missing -o rain.parquet
")]
    Export {
        /// Granule path, s3:// URL or PPS file name
        #[arg(env = "GPM_DPR_GRANULE")]
        granule: Option<String>,

        /// Variable to export
        #[arg(short = 'n', long)]
        variable: String,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Leave out rows with missing values
        #[arg(long)]
        drop_missing: bool,

        /// Swath group to read (default: FS, then NS)
        #[arg(long)]
        swath: Option<String>,

        /// Output Parquet path (local or S3)
        #[arg(short, long)]
        output: String,
    },

    /// Generate session templates
    #[command(long_about = "
Generate session files that reproduce the Cyclone Tauktae analysis.

Available templates:
- overview: whole-orbit reflectivity composites, on a map and on index axes
- case-study: scans 5550-5630 over the cyclone (rain rate, Ka-band composite,
  heavy ice flag, map)
- full: both

EXAMPLES:
  gpm-dpr template case-study --format yaml -o session.yaml
")]
    Template {
        /// Template type to generate
        #[arg(value_enum)]
        template_type: TemplateType,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for bash, zsh, fish and PowerShell.

EXAMPLES:
  gpm-dpr completions bash > ~/.bash_completion.d/gpm-dpr
  gpm-dpr completions zsh -o _gpm-dpr
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateType {
    /// Whole-orbit composites
    Overview,
    /// Cyclone case study
    CaseStudy,
    /// Overview and case study
    Full,
}

impl From<TemplateType> for SessionTemplate {
    fn from(template: TemplateType) -> Self {
        match template {
            TemplateType::Overview => SessionTemplate::Overview,
            TemplateType::CaseStudy => SessionTemplate::CaseStudy,
            TemplateType::Full => SessionTemplate::Full,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

/// `--isel dim=sel` argument
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionArg {
    pub dim: String,
    pub selector: Selector,
}

/// `--reduce dim:op` argument
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionArg {
    pub dim: String,
    pub op: Reduction,
}

/// Parse a selection from the command line
/// Format: dimension=index or dimension=start:end
pub fn parse_selection(s: &str) -> Result<SelectionArg, String> {
    let (dim, selector) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid selection '{}': expected dim=index or dim=start:end", s))?;
    let dim = dim.trim();
    if dim.is_empty() {
        return Err(format!("Invalid selection '{}': empty dimension name", s));
    }
    let selector = selector.parse::<Selector>().map_err(|e| e.to_string())?;
    Ok(SelectionArg {
        dim: dim.to_string(),
        selector,
    })
}

/// Parse a reduction from the command line
/// Format: dimension:op
pub fn parse_reduction(s: &str) -> Result<ReductionArg, String> {
    let (dim, op) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid reduction '{}': expected dim:op", s))?;
    let dim = dim.trim();
    if dim.is_empty() {
        return Err(format!("Invalid reduction '{}': empty dimension name", s));
    }
    let op = op.parse::<Reduction>().map_err(|e| e.to_string())?;
    Ok(ReductionArg {
        dim: dim.to_string(),
        op,
    })
}

/// Parse figure size in inches
/// Format: width,height
pub fn parse_figsize(s: &str) -> Result<[f64; 2], String> {
    let parts: Vec<&str> = s.split([',', 'x']).collect();
    if parts.len() != 2 {
        return Err(format!("Invalid figure size '{}': expected width,height", s));
    }
    let number = |p: &str| {
        p.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| *v > 0.0)
            .ok_or_else(|| format!("Invalid size '{}' in '{}'", p, s))
    };
    Ok([number(parts[0])?, number(parts[1])?])
}

/// Selection and reduction flags shared by `plot` and `export`
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Select along a dimension: dim=index or dim=start:end
    #[arg(long = "isel", value_parser = parse_selection)]
    pub selections: Vec<SelectionArg>,

    /// Reduce along a dimension: dim:max, dim:min or dim:mean
    #[arg(long = "reduce", value_parser = parse_reduction)]
    pub reductions: Vec<ReductionArg>,
}

impl SelectionArgs {
    /// Selections from the command line, or from `GPM_DPR_SELECTIONS`
    /// when none were given
    pub fn merged_selections(&self) -> Result<Vec<SelectionArg>, String> {
        merge_selections(self.selections.clone())
    }

    pub fn reduction_specs(&self) -> Vec<ReductionSpec> {
        self.reductions.iter().map(|r| ReductionSpec::new(&r.dim, r.op)).collect()
    }
}

/// Figure appearance flags for `plot`
#[derive(Args, Debug, Clone)]
pub struct PlotArgs {
    /// pcolormesh or contourf
    #[arg(long, default_value = "pcolormesh")]
    pub kind: PlotKind,

    /// Dimension or coordinate on the horizontal axis
    #[arg(long)]
    pub x: Option<String>,

    /// Dimension or coordinate on the vertical axis
    #[arg(long)]
    pub y: Option<String>,

    #[arg(long, allow_negative_numbers = true)]
    pub vmin: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    pub vmax: Option<f64>,

    /// Contour levels start:stop[:step], stop exclusive
    #[arg(long, allow_hyphen_values = true)]
    pub levels: Option<Levels>,

    /// viridis, turbo or greys
    #[arg(long, default_value = "viridis")]
    pub cmap: Colormap,

    /// Plate Carree map with Longitude/Latitude axes
    #[arg(long)]
    pub map: bool,

    /// Draw coastlines (needs a coastline GeoJSON)
    #[arg(long, requires = "map")]
    pub coastlines: bool,

    /// Label longitude/latitude gridlines
    #[arg(long, requires = "map")]
    pub gridlines: bool,

    /// Also draw the dashed gridlines
    #[arg(long, requires = "gridlines")]
    pub grid_lines: bool,

    /// Flip the vertical axis
    #[arg(long)]
    pub invert_y: bool,

    /// Figure title
    #[arg(long, conflicts_with = "time_title")]
    pub title: Option<String>,

    /// Use the time of the first scan as title
    #[arg(long)]
    pub time_title: bool,

    /// strftime pattern for --time-title
    #[arg(long, default_value = "%Y%m%d %H:%M:%S")]
    pub time_format: String,

    /// Colorbar label (default: variable name and units)
    #[arg(long)]
    pub colorbar_label: Option<String>,

    /// Colorbar gap as a fraction of the axes width
    #[arg(long, default_value_t = 0.05)]
    pub colorbar_pad: f64,

    /// Colorbar length relative to the axes
    #[arg(long, default_value_t = 1.0)]
    pub colorbar_shrink: f64,

    /// Figure size in inches: width,height
    #[arg(long, value_parser = parse_figsize, default_value = "6.4,4.8")]
    pub figsize: [f64; 2],

    #[arg(long, default_value_t = 100)]
    pub dpi: u32,
}

impl PlotArgs {
    pub fn to_plot_spec(&self) -> PlotSpec {
        let title = if self.time_title {
            Some(Title::ScanTime {
                format: self.time_format.clone(),
            })
        } else {
            self.title.clone().map(|text| Title::Text { text })
        };
        PlotSpec {
            kind: self.kind,
            x: self.x.clone(),
            y: self.y.clone(),
            vmin: self.vmin,
            vmax: self.vmax,
            levels: self.levels,
            cmap: self.cmap,
            projection: if self.map { Projection::PlateCarree } else { Projection::None },
            coastlines: self.coastlines,
            gridlines: self.gridlines.then_some(Gridlines {
                lines: self.grid_lines,
            }),
            invert_y: self.invert_y,
            title,
            colorbar: ColorbarSpec {
                pad: self.colorbar_pad,
                shrink: self.colorbar_shrink,
                label: self.colorbar_label.clone(),
            },
            figsize: self.figsize,
            dpi: self.dpi,
        }
    }
}

/// Builds the single figure of a `plot` invocation
pub fn figure_from_args(
    variable: &str,
    selection: &SelectionArgs,
    plot: &PlotArgs,
    output: &str,
) -> Result<FigureConfig, String> {
    let selections = selection
        .merged_selections()?
        .into_iter()
        .map(|s| SelectionSpec::from((s.dim, s.selector)))
        .collect();
    Ok(FigureConfig {
        name: variable.to_string(),
        variable: variable.to_string(),
        selections,
        reductions: selection.reduction_specs(),
        plot: plot.to_plot_spec(),
        output: output.to_string(),
    })
}

/// Environment variable format:
/// - GPM_DPR_SELECTIONS: "nscan=5550:5630;nfreq=0"
pub fn parse_selections_from_env() -> Result<Vec<SelectionArg>, String> {
    let mut selections = Vec::new();
    if let Ok(value) = env::var("GPM_DPR_SELECTIONS")
        && !value.trim().is_empty()
    {
        for item in value.split(';') {
            let item = item.trim();
            if !item.is_empty() {
                selections.push(
                    parse_selection(item)
                        .map_err(|e| format!("Invalid selection in GPM_DPR_SELECTIONS: {}", e))?,
                );
            }
        }
    }
    Ok(selections)
}

/// Merge CLI selections with environment variable selections
/// Priority: CLI arguments > Environment variables
pub fn merge_selections(cli: Vec<SelectionArg>) -> Result<Vec<SelectionArg>, String> {
    if cli.is_empty() {
        parse_selections_from_env()
    } else {
        Ok(cli)
    }
}
