//! # Labeled Arrays
//!
//! In-memory representation of a loaded granule: named dimensions, coordinate
//! variables and geophysical variables, plus the selection and reduction
//! operations used to turn the 4-D radar cube into plottable 2-D fields.
//!
//! All operations borrow their input and return new arrays; a [`Dataset`] is
//! never modified after the loader builds it.
//!
//! ```rust
//! use gpm_dpr::dataset::{DataArray, Dimension, Reduction, Selector};
//! use ndarray::{ArrayD, IxDyn};
//!
//! let cube = DataArray::new(
//!     "zFactorFinal",
//!     vec![
//!         Dimension::new("nscan", 100),
//!         Dimension::new("nrayNS", 49),
//!         Dimension::new("nbin", 176),
//!         Dimension::new("nfreq", 2),
//!     ],
//!     ArrayD::zeros(IxDyn(&[100, 49, 176, 2])),
//! )?;
//!
//! let composite = cube
//!     .isel("nfreq", Selector::Index(0))?
//!     .reduce("nbin", Reduction::Max)?;
//! assert_eq!(composite.dim_names(), vec!["nscan", "nrayNS"]);
//! # Ok::<(), gpm_dpr::dataset::SelectionError>(())
//! ```

use crate::granule::GranuleName;
use chrono::{DateTime, Utc};
use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by selections, reductions and dataset lookups
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("Unknown dimension '{dim}' for '{name}' (available: {available:?})")]
    UnknownDimension {
        name: String,
        dim: String,
        available: Vec<String>,
    },

    #[error("Index {index} out of range for dimension '{dim}' of length {len}")]
    IndexOutOfRange { dim: String, index: usize, len: usize },

    #[error("Slice {start}:{end} out of range for dimension '{dim}' of length {len}")]
    SliceOutOfRange {
        dim: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("Variable '{0}' not found in dataset")]
    UnknownVariable(String),

    #[error("Shape mismatch for '{name}': dimensions {dims:?} do not match shape {shape:?}")]
    ShapeMismatch {
        name: String,
        dims: Vec<String>,
        shape: Vec<usize>,
    },

    #[error("Invalid selector '{0}': expected 'index' or 'start:end'")]
    InvalidSelector(String),

    #[error("Unknown reduction '{0}': expected max, min or mean")]
    UnknownReduction(String),
}

pub type SelectionResult<T> = Result<T, SelectionError>;

/// A named axis. `origin` is the absolute granule index of element 0, so
/// slicing `nscan` to `5550:5630` keeps track of where the window sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
    pub origin: usize,
}

impl Dimension {
    pub fn new(name: &str, len: usize) -> Self {
        Dimension {
            name: name.to_string(),
            len,
            origin: 0,
        }
    }

    pub fn with_origin(name: &str, len: usize, origin: usize) -> Self {
        Dimension {
            name: name.to_string(),
            len,
            origin,
        }
    }

    /// Absolute positions covered by this axis
    pub fn positions(&self) -> std::ops::Range<usize> {
        self.origin..self.origin + self.len
    }
}

/// How to pick along one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selector {
    /// Single position; the dimension is dropped
    Index(usize),
    /// Half-open range `start..end`; the dimension is kept
    Slice { start: usize, end: usize },
}

impl FromStr for Selector {
    type Err = SelectionError;

    /// Parses `7` or `5550:5630`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SelectionError::InvalidSelector(s.to_string());
        match s.split_once(':') {
            Some((start, end)) => {
                let start = start.trim().parse::<usize>().map_err(|_| invalid())?;
                let end = end.trim().parse::<usize>().map_err(|_| invalid())?;
                if end < start {
                    return Err(invalid());
                }
                Ok(Selector::Slice { start, end })
            }
            None => s
                .trim()
                .parse::<usize>()
                .map(Selector::Index)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(i) => write!(f, "{}", i),
            Selector::Slice { start, end } => write!(f, "{}:{}", start, end),
        }
    }
}

/// NaN-skipping reduction along one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Max,
    Min,
    Mean,
}

impl Reduction {
    /// Reduces a lane, ignoring NaN. An empty or all-NaN lane gives NaN.
    pub fn apply<I: IntoIterator<Item = f32>>(&self, values: I) -> f32 {
        let finite = values.into_iter().filter(|v| !v.is_nan());
        match self {
            Reduction::Max => finite.fold(f32::NAN, |acc, v| if acc.is_nan() { v } else { acc.max(v) }),
            Reduction::Min => finite.fold(f32::NAN, |acc, v| if acc.is_nan() { v } else { acc.min(v) }),
            Reduction::Mean => {
                let (sum, count) = finite.fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
                if count == 0 {
                    f32::NAN
                } else {
                    (sum / count as f64) as f32
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Reduction::Max => "max",
            Reduction::Min => "min",
            Reduction::Mean => "mean",
        }
    }
}

impl FromStr for Reduction {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max" | "maximum" => Ok(Reduction::Max),
            "min" | "minimum" => Ok(Reduction::Min),
            "mean" | "avg" => Ok(Reduction::Mean),
            other => Err(SelectionError::UnknownReduction(other.to_string())),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Auxiliary coordinate such as `Longitude`, `Latitude` or `time`
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub name: String,
    pub dims: Vec<String>,
    pub values: ArrayD<f64>,
}

impl Coordinate {
    pub fn new(name: &str, dims: &[&str], values: ArrayD<f64>) -> SelectionResult<Self> {
        if dims.len() != values.ndim() {
            return Err(SelectionError::ShapeMismatch {
                name: name.to_string(),
                dims: dims.iter().map(|d| d.to_string()).collect(),
                shape: values.shape().to_vec(),
            });
        }
        Ok(Coordinate {
            name: name.to_string(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            values,
        })
    }

    fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    fn select(&self, dim: &str, selector: Selector) -> Coordinate {
        match self.axis_of(dim) {
            Some(axis) => {
                let mut dims = self.dims.clone();
                if let Selector::Index(_) = selector {
                    dims.remove(axis);
                }
                Coordinate {
                    name: self.name.clone(),
                    dims,
                    values: select_axis(&self.values.view(), axis, selector),
                }
            }
            None => self.clone(),
        }
    }

    /// Interprets the values as epoch milliseconds
    pub fn as_time(&self, value: f64) -> Option<DateTime<Utc>> {
        if value.is_finite() {
            DateTime::<Utc>::from_timestamp_millis(value as i64)
        } else {
            None
        }
    }
}

/// Labeled N-dimensional field; missing values are NaN
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub name: String,
    pub dims: Vec<Dimension>,
    pub values: ArrayD<f32>,
    pub coords: Vec<Coordinate>,
    pub attrs: BTreeMap<String, String>,
}

impl DataArray {
    pub fn new(name: &str, dims: Vec<Dimension>, values: ArrayD<f32>) -> SelectionResult<Self> {
        let consistent = dims.len() == values.ndim()
            && dims.iter().zip(values.shape()).all(|(d, &n)| d.len == n);
        if !consistent {
            return Err(SelectionError::ShapeMismatch {
                name: name.to_string(),
                dims: dims.iter().map(|d| d.name.clone()).collect(),
                shape: values.shape().to_vec(),
            });
        }
        Ok(DataArray {
            name: name.to_string(),
            dims,
            values,
            coords: Vec::new(),
            attrs: BTreeMap::new(),
        })
    }

    /// Attaches a coordinate whose dimensions are a subset of this array's
    pub fn with_coord(mut self, coord: Coordinate) -> SelectionResult<Self> {
        for (i, dim) in coord.dims.iter().enumerate() {
            let expected = self.len_of(dim);
            if expected != Some(coord.values.shape()[i]) {
                return Err(SelectionError::ShapeMismatch {
                    name: coord.name.clone(),
                    dims: coord.dims.clone(),
                    shape: coord.values.shape().to_vec(),
                });
            }
        }
        self.coords.retain(|c| c.name != coord.name);
        self.coords.push(coord);
        Ok(self)
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn dim_names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dimension(&self, dim: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == dim)
    }

    pub fn len_of(&self, dim: &str) -> Option<usize> {
        self.dimension(dim).map(|d| d.len)
    }

    pub fn axis_of(&self, dim: &str) -> SelectionResult<usize> {
        self.dims
            .iter()
            .position(|d| d.name == dim)
            .ok_or_else(|| SelectionError::UnknownDimension {
                name: self.name.clone(),
                dim: dim.to_string(),
                available: self.dims.iter().map(|d| d.name.clone()).collect(),
            })
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.iter().find(|c| c.name == name)
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get("units").map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    /// Colorbar/axis label, e.g. `zFactorFinal [dBZ]`
    pub fn label(&self) -> String {
        match self.units() {
            Some(units) => format!("{} [{}]", self.name, units),
            None => self.name.clone(),
        }
    }

    /// Picks along `dim`. Coordinates that share the dimension follow the
    /// same selection; an index selection drops the dimension.
    pub fn isel(&self, dim: &str, selector: Selector) -> SelectionResult<DataArray> {
        let axis = self.axis_of(dim)?;
        let len = self.dims[axis].len;
        validate_selector(dim, len, selector)?;

        let mut dims = self.dims.clone();
        match selector {
            Selector::Index(_) => {
                dims.remove(axis);
            }
            Selector::Slice { start, end } => {
                dims[axis].len = end - start;
                dims[axis].origin += start;
            }
        }

        Ok(DataArray {
            name: self.name.clone(),
            dims,
            values: select_axis(&self.values.view(), axis, selector),
            coords: self.coords.iter().map(|c| c.select(dim, selector)).collect(),
            attrs: self.attrs.clone(),
        })
    }

    /// Applies several selections in order. The first one reads straight
    /// from `self`, so a full cube is never copied.
    pub fn isel_many(&self, selections: &[(String, Selector)]) -> SelectionResult<DataArray> {
        let Some(((dim, selector), rest)) = selections.split_first() else {
            return Ok(self.clone());
        };
        let mut current = self.isel(dim, *selector)?;
        for (dim, selector) in rest {
            current = current.isel(dim, *selector)?;
        }
        Ok(current)
    }

    /// Reduces along `dim`; coordinates spanning that dimension are dropped
    pub fn reduce(&self, dim: &str, reduction: Reduction) -> SelectionResult<DataArray> {
        let axis = self.axis_of(dim)?;
        let values = self
            .values
            .map_axis(Axis(axis), |lane| reduction.apply(lane.iter().copied()));

        let mut dims = self.dims.clone();
        dims.remove(axis);

        Ok(DataArray {
            name: self.name.clone(),
            dims,
            values,
            coords: self
                .coords
                .iter()
                .filter(|c| !c.dims.iter().any(|d| d == dim))
                .cloned()
                .collect(),
            attrs: self.attrs.clone(),
        })
    }

    pub fn max(&self, dim: &str) -> SelectionResult<DataArray> {
        self.reduce(dim, Reduction::Max)
    }

    /// Smallest and largest finite values, if any
    pub fn finite_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Time of the first element with a valid `time` coordinate
    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        let coord = self.coord("time")?;
        let first = coord.values.iter().copied().find(|v| v.is_finite())?;
        coord.as_time(first)
    }
}

fn validate_selector(dim: &str, len: usize, selector: Selector) -> SelectionResult<()> {
    match selector {
        Selector::Index(index) if index >= len => Err(SelectionError::IndexOutOfRange {
            dim: dim.to_string(),
            index,
            len,
        }),
        Selector::Slice { start, end } if start > end || end > len => {
            Err(SelectionError::SliceOutOfRange {
                dim: dim.to_string(),
                start,
                end,
                len,
            })
        }
        _ => Ok(()),
    }
}

fn select_axis<T: Clone>(values: &ArrayViewD<'_, T>, axis: usize, selector: Selector) -> ArrayD<T> {
    match selector {
        Selector::Index(index) => values.index_axis(Axis(axis), index).to_owned(),
        Selector::Slice { start, end } => values
            .slice_axis(Axis(axis), Slice::from(start..end))
            .to_owned(),
    }
}

/// A loaded granule swath
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Parsed file name, when the file follows the PPS naming scheme
    pub granule: Option<GranuleName>,
    /// Path or URL the data was read from
    pub source: String,
    /// HDF5 swath group, e.g. `FS`
    pub swath: String,
    pub dims: Vec<Dimension>,
    pub coords: Vec<Coordinate>,
    pub variables: Vec<DataArray>,
    pub attrs: BTreeMap<String, String>,
}

impl Dataset {
    pub fn variable(&self, name: &str) -> SelectionResult<&DataArray> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| SelectionError::UnknownVariable(name.to_string()))
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.iter().find(|c| c.name == name)
    }

    /// Selects and reduces a variable in one call, the shape of every figure
    /// in a session: `selections` first, then `reductions` in order.
    pub fn select(
        &self,
        variable: &str,
        selections: &[(String, Selector)],
        reductions: &[(String, Reduction)],
    ) -> SelectionResult<DataArray> {
        let mut array = self.variable(variable)?.isel_many(selections)?;
        for (dim, reduction) in reductions {
            array = array.reduce(dim, *reduction)?;
        }
        Ok(array)
    }
}
