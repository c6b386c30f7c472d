//! # gpm-dpr
//!
//! Load, slice and plot GPM Dual-frequency Precipitation Radar (DPR) Level 2
//! granules.
//!
//! ## Features
//!
//! - **Loader**: reads a swath group of a granule (HDF5 through libnetcdf)
//!   into labeled arrays with `Longitude`, `Latitude` and a per-scan `time`
//!   coordinate, masking missing-value codes
//! - **Selector**: `isel`-style index and slice selection plus NaN-skipping
//!   max/min/mean reductions over named dimensions
//! - **Renderer**: pseudocolor mesh and filled-contour PNG figures, on index
//!   axes or on a Plate Carree map with coastlines and gridline labels
//! - **Sources**: local paths, `s3://` objects and the NASA PPS archive
//! - **Export**: flat Parquet tables of any selection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpm_dpr::config::{SessionConfig, SessionTemplate};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let session = SessionTemplate::CaseStudy.build();
//! let written = gpm_dpr::render_session(&session, &[]).await?;
//! println!("{} figure(s) written", written.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Session Example
//!
//! ```yaml
//! granule: 2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5
//! scans: { start: 5550, end: 5630 }
//! figures:
//!   - name: surface-rain
//!     variable: precipRateNearSurface
//!     plot:
//!       kind: contourf
//!       x: nscan
//!       levels: { start: 0, stop: 200, step: 2 }
//!       cmap: turbo
//!       invert_y: true
//!     output: figures/surface-rain.png
//! ```

pub mod cli;
pub mod config;
pub mod dataset;
pub mod export;
pub mod granule;
pub mod info;
pub mod loader;
pub mod log;
pub mod pps;
pub mod render;
pub mod storage;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod cli_tests;

use crate::config::{FigureConfig, SessionConfig};
use crate::dataset::{Dataset, Reduction, Selector};
use crate::loader::resolve_granule;
use crate::log::{show_dataset_info, show_selection};
use crate::pps::PpsClient;
use crate::render::RenderResources;
use crate::storage::{StorageBackend, StorageFactory};
use anyhow::{Context, Result, bail};
use ::log::{info, warn};

/// PPS client for sessions that carry PPS credentials
pub fn pps_client(session: &SessionConfig) -> Result<Option<PpsClient>> {
    match &session.pps {
        Some(config) => {
            let client = PpsClient::new(config.clone()).context("Failed to create PPS client")?;
            Ok(Some(client))
        }
        None => Ok(None),
    }
}

/// Selects, reduces and renders one figure, returning the PNG bytes.
///
/// # Errors
///
/// Fails if the variable or a dimension is unknown, an index is out of
/// range, the selection is not two-dimensional, or the plot settings are
/// invalid.
pub fn render_figure(dataset: &Dataset, figure: &FigureConfig, resources: &RenderResources) -> Result<Vec<u8>> {
    let selectors = figure.selectors()?;
    let array = dataset
        .select(&figure.variable, &selectors, &figure.reduction_ops())
        .with_context(|| format!("Failed to select data for figure '{}'", figure.name))?;
    show_selection(&figure.name, &array);

    let image = render::render(&array, &figure.plot, resources)
        .with_context(|| format!("Failed to render figure '{}'", figure.name))?;
    Ok(render::encode_png(&image)?)
}

/// Writes bytes to a local path (creating parent directories) or an `s3://` object
pub async fn write_output(path: &str, data: &[u8]) -> Result<()> {
    if !StorageFactory::is_s3_path(path)
        && let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory for {}", path))?;
    }
    let storage = StorageFactory::from_path(path).await?;
    storage
        .write(path, data)
        .await
        .with_context(|| format!("Failed to write {}", path))?;
    Ok(())
}

/// Loads the session's granule once and renders its figures.
///
/// `only` restricts rendering to the named figures; an empty slice renders
/// all of them. Returns the outputs written, in figure order.
pub async fn render_session(session: &SessionConfig, only: &[String]) -> Result<Vec<String>> {
    session.validate()?;
    for name in only {
        if !session.figures.iter().any(|f| &f.name == name) {
            bail!("Figure '{}' is not defined in the session", name);
        }
    }
    let figures: Vec<&FigureConfig> = session
        .figures
        .iter()
        .filter(|f| only.is_empty() || only.contains(&f.name))
        .collect();
    if figures.is_empty() {
        warn!("Session has no figures to render");
        return Ok(Vec::new());
    }

    let pps = pps_client(session)?;
    let resolved = resolve_granule(&session.granule, pps.as_ref())
        .await
        .with_context(|| format!("Failed to locate granule {}", session.granule))?;
    let dataset = resolved
        .load(&session.load_options())
        .with_context(|| format!("Failed to load granule {}", session.granule))?;
    show_dataset_info(&dataset);

    let resources = RenderResources::load(&session.resources);
    let mut written = Vec::with_capacity(figures.len());
    for figure in figures {
        let png = render_figure(&dataset, figure, &resources)?;
        write_output(&figure.output, &png).await?;
        info!("Wrote {} ({} bytes)", figure.output, png.len());
        written.push(figure.output.clone());
    }
    Ok(written)
}

/// Selects and reduces `variable` and writes it as a Parquet table.
/// Returns the number of rows written.
pub async fn export_selection(
    dataset: &Dataset,
    variable: &str,
    selections: &[(String, Selector)],
    reductions: &[(String, Reduction)],
    drop_missing: bool,
    output: &str,
) -> Result<usize> {
    let array = dataset
        .select(variable, selections, reductions)
        .with_context(|| format!("Failed to select '{}'", variable))?;
    show_selection(variable, &array);
    let df = export::to_dataframe(&array, drop_missing)?;
    export::write_parquet(&df, output)
        .await
        .with_context(|| format!("Failed to write {}", output))?;
    Ok(df.height())
}
