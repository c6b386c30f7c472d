//! Contour levels, tick placement and tick labels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on the number of contour levels
pub const MAX_LEVELS: usize = 1000;

/// Evenly spaced contour levels, `start` inclusive and `stop` exclusive.
///
/// `Levels::new(0.0, 60.0, 9.0)` yields `0, 9, ..., 54`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl Levels {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Levels { start, stop, step }
    }

    /// Number of levels, before any cap
    pub fn count(&self) -> f64 {
        if !(self.step > 0.0) || !(self.stop > self.start) {
            return 0.0;
        }
        ((self.stop - self.start) / self.step).ceil()
    }

    /// Level values; empty when there would be more than [`MAX_LEVELS`]
    pub fn values(&self) -> Vec<f64> {
        let count = self.count();
        if !(count > 0.0) || count > MAX_LEVELS as f64 {
            return Vec::new();
        }
        (0..count as usize)
            .map(|i| self.start + i as f64 * self.step)
            .filter(|v| *v < self.stop)
            .collect()
    }

    /// Filled contours need at least one band
    pub fn validate(&self) -> Result<Vec<f64>, String> {
        if self.count() > MAX_LEVELS as f64 {
            return Err(format!("levels {} exceed the limit of {} values", self, MAX_LEVELS));
        }
        let values = self.values();
        if values.len() < 2 {
            return Err(format!(
                "levels {} produce {} value(s); at least two are needed",
                self,
                values.len()
            ));
        }
        Ok(values)
    }
}

impl FromStr for Levels {
    type Err = String;

    /// Parses `start:stop[:step]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("Invalid levels '{}': expected start:stop[:step]", s));
        }
        let number = |p: &str| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| format!("Invalid number '{}' in levels '{}'", p, s))
        };
        let start = number(parts[0])?;
        let stop = number(parts[1])?;
        let step = match parts.get(2) {
            Some(p) => number(p)?,
            None => 1.0,
        };
        if step <= 0.0 {
            return Err(format!("Level step must be positive in '{}'", s));
        }
        let levels = Levels { start, stop, step };
        if levels.count() > MAX_LEVELS as f64 {
            return Err(format!("Levels '{}' exceed the limit of {} values", s, MAX_LEVELS));
        }
        Ok(levels)
    }
}

impl fmt::Display for Levels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            format_number(self.start),
            format_number(self.stop),
            format_number(self.step)
        )
    }
}

/// Ends of a banded scale left open because the data runs past them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extend {
    #[default]
    Neither,
    Min,
    Max,
    Both,
}

impl Extend {
    /// Compares the data range `[min, max]` with the first and last level
    pub fn from_data(levels: &[f64], min: f64, max: f64) -> Self {
        let (Some(&first), Some(&last)) = (levels.first(), levels.last()) else {
            return Extend::Neither;
        };
        match (min < first, max > last) {
            (true, true) => Extend::Both,
            (true, false) => Extend::Min,
            (false, true) => Extend::Max,
            (false, false) => Extend::Neither,
        }
    }

    pub fn min(&self) -> bool {
        matches!(self, Extend::Min | Extend::Both)
    }

    pub fn max(&self) -> bool {
        matches!(self, Extend::Max | Extend::Both)
    }
}

/// Index of the band `[levels[b], levels[b + 1])` holding `value`. The top
/// band is closed; values outside the levels have no band.
pub fn band_index(levels: &[f64], value: f64) -> Option<usize> {
    let (first, last) = (*levels.first()?, *levels.last()?);
    if levels.len() < 2 || value.is_nan() || value < first || value > last {
        return None;
    }
    let upper = levels.partition_point(|&l| l <= value);
    Some(upper.saturating_sub(1).min(levels.len() - 2))
}

/// Round tick positions covering `[min, max]`, aiming for about `target` ticks
pub fn nice_ticks(min: f64, max: f64, target: usize) -> Vec<f64> {
    if !min.is_finite() || !max.is_finite() || target == 0 {
        return Vec::new();
    }
    if max <= min {
        return vec![min];
    }
    let step = nice_step((max - min) / target.max(1) as f64);
    let first = (min / step).ceil() as i64;
    let last = (max / step).floor() as i64;
    (first..=last)
        .map(|i| {
            let v = i as f64 * step;
            // Snap away float noise such as 0.30000000000000004.
            (v / step).round() * step
        })
        .collect()
}

fn nice_step(raw: f64) -> f64 {
    let magnitude = 10f64.powf(raw.log10().floor());
    let fraction = raw / magnitude;
    let nice = if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 2.5 {
        2.5
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

/// Shortest readable form: `80`, `2.5`, `-0.25`
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if (value - value.round()).abs() < 1e-9 {
        return format!("{}", value.round() as i64);
    }
    let text = format!("{:.3}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
