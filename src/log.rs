use crate::config::SessionConfig;
use crate::dataset::{DataArray, Dataset};
use log::{debug, info};
use std::path::Path;
use std::time::Duration;

pub fn show_greeting(session_file: Option<&Path>) {
    info!("=== GPM DPR Granule Renderer ===");
    info!("{}", session_source(session_file));
}

fn session_source(session_file: Option<&Path>) -> String {
    match session_file {
        Some(path) => format!("Loading session from: {}", path.display()),
        None => "Session built from command-line flags".to_string(),
    }
}

pub fn session_echo(session: &SessionConfig) {
    info!("Session:");
    info!("  Granule: {}", session.granule);
    if let Some(swath) = &session.swath {
        info!("  Swath: {}", swath);
    }
    if let Some(scans) = session.scans {
        info!("  Scans: {}:{}", scans.start, scans.end);
    }
    if let Some(pps) = &session.pps {
        info!("  PPS: {:?} as {}", pps.server, pps.username);
    }
    info!("  Number of figures: {}", session.figures.len());

    for (i, figure) in session.figures.iter().enumerate() {
        info!(
            "    Figure {}: {} ({:?} of {}) -> {}",
            i + 1,
            figure.name,
            figure.plot.kind,
            figure.variable,
            figure.output
        );
    }
}

pub fn show_dataset_info(dataset: &Dataset) {
    debug!("Granule {} ({} swath)", dataset.source, dataset.swath);
    debug!("Dimensions:");
    for dim in &dataset.dims {
        debug!("  {}: {}", dim.name, dim.len);
    }
    debug!("Variables:");
    for var in &dataset.variables {
        debug!("  {}: {:?}", var.name, var.dim_names());
    }
}

pub fn show_selection(figure: &str, array: &DataArray) {
    let shape: Vec<String> = array
        .dims
        .iter()
        .map(|d| format!("{}: {}", d.name, d.len))
        .collect();
    info!("  {}: {} ({})", figure, array.name, shape.join(", "));
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    info!("=== Completed in {:.2}s ===", elapsed.as_secs_f64());
}
