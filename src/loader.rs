//! # Granule Loader
//!
//! Opens a DPR Level-2 HDF5 granule through libnetcdf and builds a
//! [`Dataset`] from one swath group.
//!
//! DPR files keep every variable of a swath under a group such as `FS`
//! (V07) or `NS` (V06), with geophysical fields further nested in
//! sub-groups (`FS/SLV/zFactorFinal`, `FS/CSF/flagHeavyIcePrecip`). The
//! loader searches the swath group recursively, so callers only name the
//! variable.
//!
//! HDF5 files written without dimension scales expose `phony_dim_N`
//! dimensions; the real names come from each variable's `DimensionNames`
//! attribute, and as a last resort from their position.

use crate::dataset::{Coordinate, DataArray, Dataset, Dimension, SelectionError};
use crate::granule::GranuleName;
use crate::pps::{PpsClient, PpsError};
use crate::storage::{self, LocalCopy, StorageError, StorageFactory};
use chrono::NaiveDate;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayD, Axis, IxDyn, Slice};
use netcdf::{AttributeValue, Group, Variable};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Swath groups tried in order when none is configured
pub const DEFAULT_SWATHS: [&str; 2] = ["FS", "NS"];

/// Variables loaded when none are requested
pub const DEFAULT_VARIABLES: [&str; 3] = [
    "zFactorFinal",
    "precipRateNearSurface",
    "flagHeavyIcePrecip",
];

/// Values at or below this are treated as missing
pub const DEFAULT_MISSING_SENTINEL: f32 = -9999.0;

const SCAN_TIME_FIELDS: [&str; 7] = [
    "Year",
    "Month",
    "DayOfMonth",
    "Hour",
    "Minute",
    "Second",
    "MilliSecond",
];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to open granule {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: netcdf::Error,
    },

    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),

    #[error("No swath group {tried:?} in {path}")]
    MissingSwath { path: String, tried: Vec<String> },

    #[error("Variable '{name}' not found under swath '{swath}'")]
    MissingVariable { swath: String, name: String },

    #[error("Variable '{name}' has {found} values, expected {expected} for shape {shape:?}")]
    Shape {
        name: String,
        shape: Vec<usize>,
        expected: usize,
        found: usize,
    },

    #[error("Invalid scan time: {0}")]
    ScanTime(String),

    #[error("Scan window {start}:{end} is outside the {nscan} scans of the granule")]
    ScanWindow {
        start: usize,
        end: usize,
        nscan: usize,
    },

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pps(#[from] PpsError),
}

pub type LoadResult<T> = Result<T, LoadError>;

/// What to read from a granule
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Swath group; `None` tries [`DEFAULT_SWATHS`]
    pub swath: Option<String>,
    pub variables: Vec<String>,
    /// Half-open range of scans to read instead of the whole orbit
    pub scans: Option<Range<usize>>,
    pub missing_sentinel: f32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            swath: None,
            variables: DEFAULT_VARIABLES.iter().map(|v| v.to_string()).collect(),
            scans: None,
            missing_sentinel: DEFAULT_MISSING_SENTINEL,
        }
    }
}

impl LoadOptions {
    pub fn with_variables<S: AsRef<str>>(mut self, variables: &[S]) -> Self {
        self.variables = variables.iter().map(|v| v.as_ref().to_string()).collect();
        self
    }

    pub fn with_scans(mut self, scans: Range<usize>) -> Self {
        self.scans = Some(scans);
        self
    }

    pub fn with_swath(mut self, swath: &str) -> Self {
        self.swath = Some(swath.to_string());
        self
    }
}

/// Ray dimension name used for a swath group
pub fn ray_dimension(swath: &str) -> String {
    match swath {
        "FS" | "NS" => "nrayNS".to_string(),
        other => format!("nray{}", other),
    }
}

/// A variable read into memory, before it becomes a [`DataArray`]
#[derive(Debug)]
struct RawField {
    dims: Vec<String>,
    shape: Vec<usize>,
    values: Vec<f32>,
    attrs: BTreeMap<String, String>,
}

// Tries the numeric types DPR products use, widening to f32.
macro_rules! read_values {
    ($var:expr, $extents:expr) => {
        $var.get_values::<f32, _>($extents)
            .or_else(|_| $var.get_values::<f64, _>($extents).map(widen))
            .or_else(|_| $var.get_values::<i32, _>($extents).map(widen))
            .or_else(|_| $var.get_values::<i16, _>($extents).map(widen))
            .or_else(|_| $var.get_values::<i8, _>($extents).map(widen))
            .or_else(|_| $var.get_values::<u8, _>($extents).map(widen))
    };
}

fn widen<T: Into<f64>>(values: Vec<T>) -> Vec<f32> {
    values.into_iter().map(|v| v.into() as f32).collect()
}

/// Reads a variable, restricted to `scans` along its first axis when given.
/// Returns whether the restriction was applied by the read itself.
fn read_variable(var: &Variable<'_>, scans: Option<&Range<usize>>) -> netcdf::Result<(Vec<f32>, bool)> {
    let rank = var.dimensions().len();
    match (scans, rank) {
        (None, _) | (_, 0) => read_values!(var, ..).map(|v| (v, false)),
        (Some(r), 1) => read_values!(var, r.clone()).map(|v| (v, true)),
        (Some(r), 2) => read_values!(var, (r.clone(), ..)).map(|v| (v, true)),
        (Some(r), 3) => read_values!(var, (r.clone(), .., ..)).map(|v| (v, true)),
        (Some(r), 4) => read_values!(var, (r.clone(), .., .., ..)).map(|v| (v, true)),
        (Some(_), _) => read_values!(var, ..).map(|v| (v, false)),
    }
}

pub(crate) fn attribute_to_string(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Str(s) => s.clone(),
        AttributeValue::Strs(items) => items.join(", "),
        AttributeValue::Float(v) => v.to_string(),
        AttributeValue::Double(v) => v.to_string(),
        AttributeValue::Short(v) => v.to_string(),
        AttributeValue::Int(v) => v.to_string(),
        AttributeValue::Schar(v) => v.to_string(),
        AttributeValue::Uchar(v) => v.to_string(),
        other => format!("{:?}", other),
    }
}

fn attribute_to_f32(value: &AttributeValue) -> Option<f32> {
    match value {
        AttributeValue::Float(v) => Some(*v),
        AttributeValue::Double(v) => Some(*v as f32),
        AttributeValue::Short(v) => Some(*v as f32),
        AttributeValue::Int(v) => Some(*v as f32),
        AttributeValue::Schar(v) => Some(*v as f32),
        AttributeValue::Uchar(v) => Some(*v as f32),
        AttributeValue::Floats(v) => v.first().copied(),
        AttributeValue::Doubles(v) => v.first().map(|x| *x as f32),
        AttributeValue::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn variable_attributes(var: &Variable<'_>) -> BTreeMap<String, String> {
    var.attributes()
        .filter_map(|attr| {
            attr.value()
                .ok()
                .map(|value| (attr.name().to_string(), attribute_to_string(&value)))
        })
        .collect()
}

/// Dimension names for a variable: `DimensionNames` attribute, then named
/// netCDF dimensions, then position. `nray*` names follow the swath.
fn dimension_names(var: &Variable<'_>, swath: &str, attrs: &BTreeMap<String, String>) -> Vec<String> {
    let native: Vec<String> = var.dimensions().iter().map(|d| d.name().to_string()).collect();
    let rank = native.len();

    let from_attribute = attrs.get("DimensionNames").map(|names| {
        names
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>()
    });

    let names = match from_attribute {
        Some(names) if names.len() == rank => names,
        _ if native.iter().all(|n| !n.starts_with("phony_dim")) => native,
        _ => {
            let positional = ["nscan".to_string(), ray_dimension(swath), "nbin".to_string(), "nfreq".to_string()];
            (0..rank)
                .map(|i| positional.get(i).cloned().unwrap_or_else(|| format!("dim_{}", i)))
                .collect()
        }
    };

    names
        .into_iter()
        .map(|n| if n.starts_with("nray") { ray_dimension(swath) } else { n })
        .collect()
}

fn read_field(var: &Variable<'_>, swath: &str, options: &LoadOptions) -> LoadResult<RawField> {
    let attrs = variable_attributes(var);
    let dims = dimension_names(var, swath, &attrs);
    let mut shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

    let scans = options.scans.as_ref().filter(|_| dims.first().is_some_and(|d| d == "nscan"));
    let (mut values, windowed) = read_variable(var, scans)?;

    if let Some(range) = scans {
        if windowed {
            shape[0] = range.len();
        } else {
            let full = to_array(&var.name().to_string(), &shape, values)?;
            shape[0] = range.len();
            values = full
                .slice_axis(Axis(0), Slice::from(range.clone()))
                .iter()
                .copied()
                .collect();
        }
    }

    let fill = var
        .attribute("_FillValue")
        .and_then(|a| a.value().ok())
        .and_then(|v| attribute_to_f32(&v));
    let code_missing = attrs.get("CodeMissingValue").and_then(|s| s.trim().parse::<f32>().ok());
    mask_missing(&mut values, fill, code_missing, options.missing_sentinel);

    Ok(RawField {
        dims,
        shape,
        values,
        attrs,
    })
}

/// Replaces fill values, missing-value codes and sentinel values with NaN
pub fn mask_missing(values: &mut [f32], fill: Option<f32>, code_missing: Option<f32>, sentinel: f32) {
    for v in values.iter_mut() {
        if Some(*v) == fill || Some(*v) == code_missing || *v <= sentinel {
            *v = f32::NAN;
        }
    }
}

/// Depth-first search for `name` under `group`, reading it on the way out
fn find_field(group: &Group<'_>, name: &str, swath: &str, options: &LoadOptions) -> Option<LoadResult<RawField>> {
    if let Some(var) = group.variable(name) {
        debug!("Reading {}/{}", group.name(), name);
        return Some(read_field(&var, swath, options));
    }
    group
        .groups()
        .find_map(|child| find_field(&child, name, swath, options))
}

fn require_field(group: &Group<'_>, name: &str, swath: &str, options: &LoadOptions) -> LoadResult<RawField> {
    find_field(group, name, swath, options).unwrap_or_else(|| {
        Err(LoadError::MissingVariable {
            swath: swath.to_string(),
            name: name.to_string(),
        })
    })
}

fn to_array<T: Clone>(name: &str, shape: &[usize], values: Vec<T>) -> LoadResult<ArrayD<T>> {
    let found = values.len();
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| LoadError::Shape {
        name: name.to_string(),
        shape: shape.to_vec(),
        expected: shape.iter().product(),
        found,
    })
}

/// Epoch milliseconds of every scan, from the `ScanTime` group.
/// Scans with invalid fields get NaN.
fn scan_times(swath_group: &Group<'_>, swath: &str, nscan: usize, options: &LoadOptions) -> LoadResult<Option<Vec<f64>>> {
    let Some(group) = swath_group.group("ScanTime") else {
        warn!("Swath {} has no ScanTime group; figures cannot use time titles", swath);
        return Ok(None);
    };

    let mut fields = Vec::with_capacity(SCAN_TIME_FIELDS.len());
    for field in SCAN_TIME_FIELDS {
        let raw = require_field(&group, field, swath, options)?;
        if raw.values.len() != nscan {
            return Err(LoadError::ScanTime(format!(
                "{} has {} entries for {} scans",
                field,
                raw.values.len(),
                nscan
            )));
        }
        fields.push(raw.values);
    }

    let mut invalid = 0;
    let times = (0..nscan)
        .map(|i| {
            let f = |k: usize| fields[k][i];
            let stamp = if (0..7).all(|k| f(k).is_finite()) {
                NaiveDate::from_ymd_opt(f(0) as i32, f(1) as u32, f(2) as u32)
                    .and_then(|d| d.and_hms_milli_opt(f(3) as u32, f(4) as u32, f(5) as u32, f(6) as u32))
            } else {
                None
            };
            match stamp {
                Some(t) => t.and_utc().timestamp_millis() as f64,
                None => {
                    invalid += 1;
                    f64::NAN
                }
            }
        })
        .collect::<Vec<_>>();

    if invalid == nscan && nscan > 0 {
        return Err(LoadError::ScanTime(format!("no valid scan times in swath {}", swath)));
    }
    if invalid > 0 {
        warn!("{} of {} scans have invalid ScanTime fields", invalid, nscan);
    }
    Ok(Some(times))
}

fn collect_attributes(group: &Group<'_>) -> BTreeMap<String, String> {
    group
        .attributes()
        .filter_map(|attr| {
            attr.value()
                .ok()
                .map(|value| (attr.name().to_string(), attribute_to_string(&value)))
        })
        .collect()
}

/// Opens `path` and loads the configured swath into memory
pub fn load_granule(path: &Path, options: &LoadOptions) -> LoadResult<Dataset> {
    let path_str = path.display().to_string();
    info!("Loading granule {}", path_str);
    let file = netcdf::open(path).map_err(|source| LoadError::Open {
        path: path_str.clone(),
        source,
    })?;

    let tried: Vec<String> = match &options.swath {
        Some(swath) => vec![swath.clone()],
        None => DEFAULT_SWATHS.iter().map(|s| s.to_string()).collect(),
    };
    let root = file.root().ok_or_else(|| LoadError::MissingSwath {
        path: path_str.clone(),
        tried: tried.clone(),
    })?;
    let Some((swath, group)) = tried
        .iter()
        .find_map(|name| root.group(name).map(|g| (name.clone(), g)))
    else {
        return Err(LoadError::MissingSwath { path: path_str, tried });
    };
    debug!("Using swath group {}", swath);

    // Geolocation fixes the scan count and the ray dimension.
    let total_scans = group
        .variable("Latitude")
        .and_then(|v| v.dimensions().first().map(|d| d.len()))
        .ok_or_else(|| LoadError::MissingVariable {
            swath: swath.clone(),
            name: "Latitude".to_string(),
        })?;
    if let Some(range) = &options.scans
        && (range.start >= range.end || range.end > total_scans)
    {
        return Err(LoadError::ScanWindow {
            start: range.start,
            end: range.end,
            nscan: total_scans,
        });
    }

    let latitude = require_field(&group, "Latitude", &swath, options)?;
    let longitude = require_field(&group, "Longitude", &swath, options)?;
    if latitude.shape.len() != 2 || latitude.shape != longitude.shape {
        return Err(LoadError::Shape {
            name: "Longitude".to_string(),
            shape: latitude.shape.clone(),
            expected: latitude.values.len(),
            found: longitude.values.len(),
        });
    }

    let (nscan, nray) = (latitude.shape[0], latitude.shape[1]);
    let origin = options.scans.as_ref().map_or(0, |r| r.start);
    let scan_dim = Dimension::with_origin("nscan", nscan, origin);
    let ray_name = latitude.dims[1].clone();
    let geo_dims: [&str; 2] = ["nscan", ray_name.as_str()];

    let mut coords = vec![
        Coordinate::new(
            "Longitude",
            &geo_dims,
            to_array("Longitude", &longitude.shape, longitude.values.iter().map(|&v| v as f64).collect())?,
        )?,
        Coordinate::new(
            "Latitude",
            &geo_dims,
            to_array("Latitude", &latitude.shape, latitude.values.iter().map(|&v| v as f64).collect())?,
        )?,
    ];
    if let Some(times) = scan_times(&group, &swath, nscan, options)? {
        let time = Array2::from_shape_fn((nscan, nray), |(i, _)| times[i]).into_dyn();
        coords.push(Coordinate::new("time", &geo_dims, time)?);
    }

    let mut dims = vec![scan_dim, Dimension::new(&ray_name, nray)];
    let mut variables = Vec::with_capacity(options.variables.len());
    for name in &options.variables {
        let raw = require_field(&group, name, &swath, options)?;
        let var_dims: Vec<Dimension> = raw
            .dims
            .iter()
            .zip(&raw.shape)
            .map(|(dim, &len)| {
                if dim == "nscan" {
                    Dimension::with_origin(dim, len, origin)
                } else {
                    Dimension::new(dim, len)
                }
            })
            .collect();
        for dim in &var_dims {
            if !dims.iter().any(|d| d.name == dim.name) {
                dims.push(dim.clone());
            }
        }

        let values = to_array(name, &raw.shape, raw.values)?;
        let mut array = DataArray::new(name, var_dims, values)?;
        array.attrs = raw.attrs;
        for coord in &coords {
            if coord.dims.iter().all(|d| array.len_of(d).is_some()) {
                array = array.with_coord(coord.clone())?;
            }
        }
        debug!("Loaded {} with dims {:?}", name, array.dim_names());
        variables.push(array);
    }

    let mut attrs = collect_attributes(&root);
    attrs.extend(collect_attributes(&group).into_iter().map(|(k, v)| (format!("{}/{}", swath, k), v)));

    let granule = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse::<GranuleName>().ok());

    info!(
        "Loaded {} variable(s) from swath {} ({} scans x {} rays)",
        variables.len(),
        swath,
        nscan,
        nray
    );
    Ok(Dataset {
        granule,
        source: path_str,
        swath,
        dims,
        coords,
        variables,
        attrs,
    })
}

/// A granule made available on the local file system
pub struct ResolvedGranule {
    copy: LocalCopy,
}

impl ResolvedGranule {
    pub fn path(&self) -> &Path {
        self.copy.path()
    }

    pub fn load(&self, options: &LoadOptions) -> LoadResult<Dataset> {
        load_granule(self.path(), options)
    }
}

/// Turns a granule request into a local file:
/// existing paths are used as-is, `s3://` objects are staged in a
/// temporary file, and PPS file names are downloaded when a client is given.
pub async fn resolve_granule(request: &str, pps: Option<&PpsClient>) -> LoadResult<ResolvedGranule> {
    if StorageFactory::is_s3_path(request) || Path::new(request).exists() {
        let copy = storage::materialize(request).await?;
        return Ok(ResolvedGranule { copy });
    }

    let name = request.parse::<GranuleName>().ok();
    match (name, pps) {
        (Some(name), Some(client)) => {
            let cached: PathBuf = client.config().data_dir.join(name.to_string());
            if cached.exists() {
                debug!("Using cached granule {}", cached.display());
                return Ok(ResolvedGranule { copy: LocalCopy::from(cached) });
            }
            info!("Fetching {} from PPS", name);
            let path = client.fetch_named(&name).await?;
            Ok(ResolvedGranule { copy: LocalCopy::from(path) })
        }
        _ => Err(StorageError::PathNotFound(request.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{write_synthetic_granule, SyntheticGranule};
    use tempfile::tempdir;

    #[test]
    fn test_ray_dimension_names() {
        assert_eq!(ray_dimension("FS"), "nrayNS");
        assert_eq!(ray_dimension("NS"), "nrayNS");
        assert_eq!(ray_dimension("HS"), "nrayHS");
    }

    #[test]
    fn test_mask_missing() {
        let mut values = vec![1.0, -9999.9, -9999.0, -99.0, f32::NAN, 42.0];
        mask_missing(&mut values, Some(-99.0), None, DEFAULT_MISSING_SENTINEL);
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert!(values[2].is_nan());
        assert!(values[3].is_nan());
        assert!(values[4].is_nan());
        assert_eq!(values[5], 42.0);

        let mut flags = vec![-1.0, 0.0, 1.0];
        mask_missing(&mut flags, None, None, DEFAULT_MISSING_SENTINEL);
        assert_eq!(flags, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_load_synthetic_granule_shapes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let spec = SyntheticGranule::default();
        let path = write_synthetic_granule(dir.path(), &spec)?;

        let dataset = load_granule(&path, &LoadOptions::default())?;
        assert_eq!(dataset.swath, "FS");
        let z = dataset.variable("zFactorFinal")?;
        assert_eq!(z.dim_names(), vec!["nscan", "nrayNS", "nbin", "nfreq"]);
        assert_eq!(z.shape(), &[spec.nscan, spec.nray, spec.nbin, 2]);
        assert_eq!(z.units(), Some("dBZ"));
        assert!(z.coord("Longitude").is_some());
        assert!(z.coord("time").is_some());

        let rain = dataset.variable("precipRateNearSurface")?;
        assert_eq!(rain.dim_names(), vec!["nscan", "nrayNS"]);
        // The fill value in column 0 becomes NaN.
        assert!(rain.values[[0, 0]].is_nan());
        assert!(rain.values[[0, 1]].is_finite());
        Ok(())
    }

    #[test]
    fn test_load_scan_window_sets_origin() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let spec = SyntheticGranule::default();
        let path = write_synthetic_granule(dir.path(), &spec)?;

        let options = LoadOptions::default().with_scans(2..5);
        let dataset = load_granule(&path, &options)?;
        let z = dataset.variable("zFactorFinal")?;
        assert_eq!(z.shape()[0], 3);
        assert_eq!(z.dimension("nscan").map(|d| d.origin), Some(2));
        // Scan 2 of the synthetic reflectivity starts at 2 * 10.
        assert_eq!(z.values[[0, 1, 0, 0]], spec.reflectivity(2, 1, 0, 0));

        let first = dataset.coord("time").and_then(|c| c.as_time(c.values[[0, 0]]));
        assert_eq!(first.map(|t| t.format("%H:%M:%S").to_string()), Some("20:43:34".to_string()));
        Ok(())
    }

    #[test]
    fn test_load_errors() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let spec = SyntheticGranule::default();
        let path = write_synthetic_granule(dir.path(), &spec)?;

        let missing = LoadOptions::default().with_variables(&["notThere"]);
        assert!(matches!(
            load_granule(&path, &missing),
            Err(LoadError::MissingVariable { .. })
        ));

        let window = LoadOptions::default().with_scans(0..spec.nscan + 1);
        assert!(matches!(
            load_granule(&path, &window),
            Err(LoadError::ScanWindow { .. })
        ));

        let swath = LoadOptions::default().with_swath("HS");
        assert!(matches!(
            load_granule(&path, &swath),
            Err(LoadError::MissingSwath { .. })
        ));

        assert!(matches!(
            load_granule(&dir.path().join("absent.HDF5"), &LoadOptions::default()),
            Err(LoadError::Open { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_local_and_missing_granules() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = write_synthetic_granule(dir.path(), &SyntheticGranule::default())?;

        let resolved = resolve_granule(&path.to_string_lossy(), None).await?;
        assert_eq!(resolved.path(), path.as_path());

        let result = resolve_granule("2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5", None).await;
        assert!(matches!(result, Err(LoadError::Storage(StorageError::PathNotFound(_)))));
        Ok(())
    }
}
