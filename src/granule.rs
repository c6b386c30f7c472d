//! # Granule File Names
//!
//! PPS distributes every granule under a structured file name, for example
//!
//! ```text
//! 2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5
//! ```
//!
//! which reads as product `2A.GPM.DPR`, algorithm `V9-20211125`, observation
//! date 2021-05-15 from 20:43:32 to 22:16:04 UTC, orbit 40979 and product
//! version `V07A`. This module parses those names so the loader can locate a
//! granule on the archive and so time-window searches can filter listings.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a granule file name or time window
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GranuleNameError {
    #[error("Granule name '{0}' does not have the PPS dotted layout")]
    Layout(String),

    #[error("Invalid date/time field '{field}' in granule name '{name}'")]
    DateTime { name: String, field: String },

    #[error("Invalid orbit number '{orbit}' in granule name '{name}'")]
    Orbit { name: String, orbit: String },

    #[error("Time window end {end} is before start {start}")]
    InvertedWindow {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// Parsed PPS granule file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GranuleName {
    /// Processing level, e.g. `2A`
    pub level: String,
    /// Platform, e.g. `GPM`
    pub satellite: String,
    /// Instrument/algorithm family, e.g. `DPR`
    pub instrument: String,
    /// Algorithm identifier, e.g. `V9-20211125`
    pub algorithm: String,
    /// First scan time (UTC)
    pub start: NaiveDateTime,
    /// Last scan time (UTC); rolls into the next day when the orbit crosses midnight
    pub end: NaiveDateTime,
    pub orbit: u32,
    /// Product version, e.g. `V07A`
    pub version: String,
    /// File extension, e.g. `HDF5`
    pub extension: String,
}

impl GranuleName {
    /// Product prefix used when filtering archive listings, e.g. `2A.GPM.DPR`
    pub fn product(&self) -> String {
        format!("{}.{}.{}", self.level, self.satellite, self.instrument)
    }

    /// Observation date of the first scan
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    /// Whether the granule's scan period intersects the given window
    pub fn overlaps(&self, window: &TimeWindow) -> bool {
        self.start <= window.end && self.end >= window.start
    }

    /// Whether the name belongs to the given product prefix (case-insensitive)
    pub fn matches_product(&self, product: &str) -> bool {
        self.product().eq_ignore_ascii_case(product.trim_end_matches('.'))
    }
}

impl FromStr for GranuleName {
    type Err = GranuleNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        // Accept paths and URLs; only the final component carries the layout.
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let parts: Vec<&str> = base.split('.').collect();
        if parts.len() < 8 {
            return Err(GranuleNameError::Layout(name.to_string()));
        }

        let n = parts.len();
        let extension = parts[n - 1];
        let version = parts[n - 2];
        let orbit_str = parts[n - 3];
        let timing = parts[n - 4];
        let algorithm = parts[n - 5];
        let prefix = &parts[..n - 5];
        if prefix.len() < 3 {
            return Err(GranuleNameError::Layout(name.to_string()));
        }

        let date_time_err = |field: &str| GranuleNameError::DateTime {
            name: name.to_string(),
            field: field.to_string(),
        };

        let fields: Vec<&str> = timing.split('-').collect();
        if fields.len() != 3 {
            return Err(date_time_err(timing));
        }
        let date = NaiveDate::parse_from_str(fields[0], "%Y%m%d")
            .map_err(|_| date_time_err(fields[0]))?;
        let start_time = fields[1]
            .strip_prefix('S')
            .and_then(|t| NaiveTime::parse_from_str(t, "%H%M%S").ok())
            .ok_or_else(|| date_time_err(fields[1]))?;
        let end_time = fields[2]
            .strip_prefix('E')
            .and_then(|t| NaiveTime::parse_from_str(t, "%H%M%S").ok())
            .ok_or_else(|| date_time_err(fields[2]))?;

        let start = date.and_time(start_time);
        let mut end = date.and_time(end_time);
        if end < start {
            end += Duration::days(1);
        }

        let orbit = orbit_str.parse::<u32>().map_err(|_| GranuleNameError::Orbit {
            name: name.to_string(),
            orbit: orbit_str.to_string(),
        })?;

        Ok(GranuleName {
            level: prefix[0].to_string(),
            satellite: prefix[1].to_string(),
            instrument: prefix[2..].join("."),
            algorithm: algorithm.to_string(),
            start,
            end,
            orbit,
            version: version.to_string(),
            extension: extension.to_string(),
        })
    }
}

impl fmt::Display for GranuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}-S{}-E{}.{:06}.{}.{}",
            self.level,
            self.satellite,
            self.instrument,
            self.algorithm,
            self.start.format("%Y%m%d"),
            self.start.format("%H%M%S"),
            self.end.format("%H%M%S"),
            self.orbit,
            self.version,
            self.extension
        )
    }
}

/// Closed UTC time interval used for archive searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, GranuleNameError> {
        if end < start {
            return Err(GranuleNameError::InvertedWindow { start, end });
        }
        Ok(TimeWindow { start, end })
    }

    /// Every calendar date touched by the window, in order
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut day = self.start.date();
        while day <= self.end.date() {
            dates.push(day);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        dates
    }
}

/// Parses timestamps the way the CLI and config files accept them:
/// `2021-05-15T20:43:00`, `2021-05-15 20:43`, or `20210515T2043`.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, GranuleNameError> {
    const FORMATS: [&str; 5] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%Y%m%dT%H%M",
    ];
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| GranuleNameError::DateTime {
            name: s.to_string(),
            field: s.to_string(),
        })
}
