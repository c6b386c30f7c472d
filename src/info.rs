//! # Granule Information Module
//!
//! Summaries of a loaded granule: dimensions, coordinates, variables with
//! their units and value ranges, the scan time coverage and, on request, the
//! file and swath attributes.

use crate::dataset::Dataset;
use crate::granule::GranuleName;
use crate::loader::{LoadOptions, resolve_granule};
use crate::pps::PpsClient;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub name: String,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    pub units: Option<String>,
    /// Finite minimum and maximum
    pub range: Option<(f32, f32)>,
    /// Share of elements that are missing
    pub missing_fraction: f64,
    pub coordinates: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Everything `info` reports about one granule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranuleInfo {
    pub path: String,
    pub swath: String,
    pub granule: Option<GranuleName>,
    pub file_size: Option<u64>,
    pub first_scan: Option<DateTime<Utc>>,
    pub last_scan: Option<DateTime<Utc>>,
    pub dimensions: Vec<DimensionInfo>,
    pub coordinates: Vec<String>,
    pub variables: Vec<VariableInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl GranuleInfo {
    /// `variable` limits the report to one variable; `detailed` adds
    /// per-variable and file attributes
    pub fn from_dataset(dataset: &Dataset, variable: Option<&str>, detailed: bool) -> Result<Self> {
        if let Some(name) = variable {
            dataset.variable(name)?;
        }

        let variables = dataset
            .variables
            .iter()
            .filter(|v| variable.is_none_or(|name| v.name == name))
            .map(|v| {
                let total = v.values.len();
                let missing = v.values.iter().filter(|x| x.is_nan()).count();
                VariableInfo {
                    name: v.name.clone(),
                    dimensions: v.dims.iter().map(|d| d.name.clone()).collect(),
                    shape: v.shape().to_vec(),
                    units: v.units().map(str::to_string),
                    range: v.finite_range(),
                    missing_fraction: if total == 0 { 0.0 } else { missing as f64 / total as f64 },
                    coordinates: v.coords.iter().map(|c| c.name.clone()).collect(),
                    attributes: if detailed { v.attrs.clone() } else { BTreeMap::new() },
                }
            })
            .collect();

        let (first_scan, last_scan) = match dataset.coord("time") {
            Some(time) => {
                let finite: Vec<f64> = time.values.iter().copied().filter(|t| t.is_finite()).collect();
                let first = finite.iter().copied().reduce(f64::min);
                let last = finite.iter().copied().reduce(f64::max);
                (
                    first.and_then(|t| time.as_time(t)),
                    last.and_then(|t| time.as_time(t)),
                )
            }
            None => (None, None),
        };

        Ok(GranuleInfo {
            path: dataset.source.clone(),
            swath: dataset.swath.clone(),
            granule: dataset.granule.clone(),
            file_size: None,
            first_scan,
            last_scan,
            dimensions: dataset
                .dims
                .iter()
                .map(|d| DimensionInfo {
                    name: d.name.clone(),
                    length: d.len,
                })
                .collect(),
            coordinates: dataset.coords.iter().map(|c| c.name.clone()).collect(),
            variables,
            attributes: if detailed { dataset.attrs.clone() } else { BTreeMap::new() },
        })
    }
}

/// Resolves, loads and summarizes a granule
pub async fn get_granule_info(
    request: &str,
    pps: Option<&PpsClient>,
    options: &LoadOptions,
    variable: Option<&str>,
    detailed: bool,
) -> Result<GranuleInfo> {
    let resolved = resolve_granule(request, pps)
        .await
        .with_context(|| format!("Failed to locate granule {}", request))?;
    debug!("Reading granule from {}", resolved.path().display());
    let dataset = resolved
        .load(options)
        .with_context(|| format!("Failed to load granule {}", request))?;

    let mut info = GranuleInfo::from_dataset(&dataset, variable, detailed)?;
    info.path = request.to_string();
    info.file_size = tokio::fs::metadata(resolved.path()).await.ok().map(|m| m.len());
    Ok(info)
}

fn format_range(range: Option<(f32, f32)>) -> String {
    match range {
        Some((lo, hi)) => format!("{} .. {}", lo, hi),
        None => "all missing".to_string(),
    }
}

/// Human-readable report
pub fn format_info_human(info: &GranuleInfo) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "GPM DPR Granule Information:");
    let _ = writeln!(out, "  Path: {}", info.path);
    if let Some(name) = &info.granule {
        let _ = writeln!(
            out,
            "  Product: {} (orbit {:06}, version {})",
            name.product(),
            name.orbit,
            name.version
        );
    }
    let _ = writeln!(out, "  Swath: {}", info.swath);
    if let Some(size) = info.file_size {
        let _ = writeln!(out, "  File Size: {:.2} MB", size as f64 / 1_048_576.0);
    }
    if let (Some(first), Some(last)) = (info.first_scan, info.last_scan) {
        let _ = writeln!(
            out,
            "  Scans: {} to {}",
            first.format("%Y-%m-%d %H:%M:%S"),
            last.format("%Y-%m-%d %H:%M:%S")
        );
    }
    let _ = writeln!(out, "  Dimensions: {} total", info.dimensions.len());
    for dim in &info.dimensions {
        let _ = writeln!(out, "    {} ({})", dim.name, dim.length);
    }
    let _ = writeln!(out, "  Coordinates: {}", info.coordinates.join(", "));
    let _ = writeln!(out, "  Variables: {} total", info.variables.len());
    for var in &info.variables {
        let _ = writeln!(
            out,
            "    {} [{}] - dimensions: [{}]",
            var.name,
            var.units.as_deref().unwrap_or("-"),
            var.dimensions.join(", ")
        );
        let _ = writeln!(
            out,
            "      range: {}, missing: {:.1}%",
            format_range(var.range),
            var.missing_fraction * 100.0
        );
        for (name, value) in &var.attributes {
            let _ = writeln!(out, "      @{}: {}", name, value);
        }
    }
    if !info.attributes.is_empty() {
        let _ = writeln!(out, "  Attributes:");
        for (name, value) in &info.attributes {
            let _ = writeln!(out, "    @{}: {}", name, value);
        }
    }
    out
}

pub fn format_info_json(info: &GranuleInfo) -> Result<String> {
    serde_json::to_string_pretty(info).context("Failed to serialize granule info to JSON")
}

pub fn format_info_yaml(info: &GranuleInfo) -> Result<String> {
    serde_yaml::to_string(info).context("Failed to serialize granule info to YAML")
}

/// One CSV row per variable
pub fn format_info_csv(info: &GranuleInfo) -> String {
    let mut out = String::from("variable_name,units,dimensions,shape,min,max,missing_fraction\n");
    for var in &info.variables {
        let (min, max) = match var.range {
            Some((lo, hi)) => (lo.to_string(), hi.to_string()),
            None => (String::new(), String::new()),
        };
        let shape = var.shape.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(";");
        let _ = writeln!(
            out,
            "{},{},\"{}\",\"{}\",{},{},{:.6}",
            var.name,
            var.units.as_deref().unwrap_or(""),
            var.dimensions.join(";"),
            shape,
            min,
            max,
            var.missing_fraction
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Coordinate, DataArray, Dimension};
    use ndarray::{ArrayD, IxDyn};

    fn dataset() -> Dataset {
        let values = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, f32::NAN, 3.0, 4.0]).unwrap();
        let time = ArrayD::from_shape_vec(
            IxDyn(&[2, 2]),
            vec![1_621_111_412_000.0, 1_621_111_412_000.0, 1_621_111_413_000.0, 1_621_111_413_000.0],
        )
        .unwrap();
        let dims = vec![Dimension::new("nscan", 2), Dimension::new("nrayNS", 2)];
        let time = Coordinate::new("time", &["nscan", "nrayNS"], time).unwrap();
        let rain = DataArray::new("precipRateNearSurface", dims.clone(), values)
            .unwrap()
            .with_coord(time.clone())
            .unwrap()
            .with_attr("units", "mm/hr");
        let flag = DataArray::new("flagHeavyIcePrecip", dims.clone(), ArrayD::zeros(IxDyn(&[2, 2]))).unwrap();
        Dataset {
            granule: "2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5".parse().ok(),
            source: "granule.HDF5".to_string(),
            swath: "FS".to_string(),
            dims,
            coords: vec![time],
            variables: vec![rain, flag],
            attrs: BTreeMap::from([("FileHeader".to_string(), "DOI=...".to_string())]),
        }
    }

    #[test]
    fn test_info_from_dataset() {
        let info = GranuleInfo::from_dataset(&dataset(), None, false).unwrap();
        assert_eq!(info.variables.len(), 2);
        assert!(info.attributes.is_empty());
        let rain = &info.variables[0];
        assert_eq!(rain.units.as_deref(), Some("mm/hr"));
        assert_eq!(rain.range, Some((1.0, 4.0)));
        assert!((rain.missing_fraction - 0.25).abs() < 1e-12);
        assert_eq!(rain.coordinates, vec!["time"]);
        assert_eq!(info.first_scan.unwrap().format("%H:%M:%S").to_string(), "20:43:32");
        assert_eq!(info.last_scan.unwrap().format("%H:%M:%S").to_string(), "20:43:33");
    }

    #[test]
    fn test_info_single_variable_and_detail() {
        let info = GranuleInfo::from_dataset(&dataset(), Some("flagHeavyIcePrecip"), true).unwrap();
        assert_eq!(info.variables.len(), 1);
        assert_eq!(info.attributes.get("FileHeader").map(String::as_str), Some("DOI=..."));
        assert!(GranuleInfo::from_dataset(&dataset(), Some("missing"), false).is_err());
    }

    #[test]
    fn test_info_formats() {
        let info = GranuleInfo::from_dataset(&dataset(), None, true).unwrap();

        let human = format_info_human(&info);
        assert!(human.contains("Product: 2A.GPM.DPR (orbit 040979, version V07A)"));
        assert!(human.contains("precipRateNearSurface [mm/hr]"));

        let csv = format_info_csv(&info);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("precipRateNearSurface,mm/hr,\"nscan;nrayNS\",\"2;2\",1,4,"));

        let json = format_info_json(&info).unwrap();
        let parsed: GranuleInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.variables[0].name, "precipRateNearSurface");
        assert!(format_info_yaml(&info).unwrap().contains("swath: FS"));
    }
}
