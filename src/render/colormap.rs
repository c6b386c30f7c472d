//! Colormaps and value normalization.

use super::ticks::{Extend, band_index};
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Viridis sampled at 0, 1/8, ..., 1
const VIRIDIS: [(f64, f64, f64); 9] = [
    (0.267004, 0.004874, 0.329415),
    (0.282327, 0.140926, 0.457517),
    (0.229739, 0.322361, 0.545706),
    (0.172719, 0.448791, 0.557885),
    (0.127568, 0.566949, 0.550556),
    (0.157851, 0.683765, 0.501686),
    (0.369214, 0.788888, 0.382914),
    (0.678489, 0.863742, 0.189503),
    (0.993248, 0.906157, 0.143936),
];

// Polynomial fit of Turbo, coefficients for 1, t, t^2 ... t^5
const TURBO_RED: [f64; 6] = [
    0.13572138,
    4.61539260,
    -42.66032258,
    132.13108234,
    -152.94239396,
    59.28637943,
];
const TURBO_GREEN: [f64; 6] = [
    0.09140261,
    2.19418839,
    4.84296658,
    -14.18503333,
    4.27729857,
    2.82956604,
];
const TURBO_BLUE: [f64; 6] = [
    0.10667330,
    12.64194608,
    -60.58204836,
    110.36276771,
    -89.90310912,
    27.34824973,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Viridis,
    Turbo,
    Greys,
}

impl Colormap {
    /// Color at `t` in `[0, 1]`; values outside are clamped
    pub fn sample(&self, t: f64) -> Rgba<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let (r, g, b) = match self {
            Colormap::Viridis => {
                let scaled = t * (VIRIDIS.len() - 1) as f64;
                let i = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
                let f = scaled - i as f64;
                let (a, b) = (VIRIDIS[i], VIRIDIS[i + 1]);
                (
                    a.0 + (b.0 - a.0) * f,
                    a.1 + (b.1 - a.1) * f,
                    a.2 + (b.2 - a.2) * f,
                )
            }
            Colormap::Turbo => (
                polynomial(&TURBO_RED, t),
                polynomial(&TURBO_GREEN, t),
                polynomial(&TURBO_BLUE, t),
            ),
            Colormap::Greys => {
                let v = 1.0 - t;
                (v, v, v)
            }
        };
        Rgba([channel(r), channel(g), channel(b), 255])
    }

    pub fn name(&self) -> &'static str {
        match self {
            Colormap::Viridis => "viridis",
            Colormap::Turbo => "turbo",
            Colormap::Greys => "greys",
        }
    }
}

fn polynomial(coefficients: &[f64; 6], t: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * t + c)
}

fn channel(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viridis" => Ok(Colormap::Viridis),
            "turbo" => Ok(Colormap::Turbo),
            "greys" | "grays" => Ok(Colormap::Greys),
            other => Err(format!(
                "Unknown colormap '{}': expected viridis, turbo or greys",
                other
            )),
        }
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Linear map from `[vmin, vmax]` to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    pub vmin: f64,
    pub vmax: f64,
}

impl Normalize {
    pub fn new(vmin: f64, vmax: f64) -> Self {
        Normalize { vmin, vmax }
    }

    pub fn apply(&self, value: f64) -> f64 {
        if self.vmax > self.vmin {
            (value - self.vmin) / (self.vmax - self.vmin)
        } else {
            0.5
        }
    }
}

/// Colors of a banded scale. Values below the first level take `under` and
/// values above the last take `over`; either may be absent.
#[derive(Debug, Clone, PartialEq)]
pub struct BandColors {
    pub bands: Vec<Rgba<u8>>,
    pub under: Option<Rgba<u8>>,
    pub over: Option<Rgba<u8>>,
}

impl BandColors {
    /// Each band takes the color at its normalized midpoint; open ends take
    /// the extremes of the colormap.
    pub fn from_colormap(cmap: Colormap, levels: &[f64], extend: Extend) -> Self {
        let (Some(&first), Some(&last)) = (levels.first(), levels.last()) else {
            return BandColors::closed(Vec::new());
        };
        let norm = Normalize::new(first, last);
        BandColors {
            bands: levels
                .windows(2)
                .map(|w| cmap.sample(norm.apply((w[0] + w[1]) / 2.0)))
                .collect(),
            under: extend.min().then(|| cmap.sample(0.0)),
            over: extend.max().then(|| cmap.sample(1.0)),
        }
    }

    /// Bands only, nothing painted outside the levels
    pub fn closed(bands: Vec<Rgba<u8>>) -> Self {
        BandColors {
            bands,
            under: None,
            over: None,
        }
    }

    pub fn color_of(&self, levels: &[f64], value: f64) -> Option<Rgba<u8>> {
        if value.is_nan() {
            return None;
        }
        match band_index(levels, value) {
            Some(band) => self.bands.get(band).copied(),
            None if value < *levels.first()? => self.under,
            None if value > *levels.last()? => self.over,
            None => None,
        }
    }
}
