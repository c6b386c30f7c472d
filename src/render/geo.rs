//! # Map Support
//!
//! Plate Carrée helpers: degree label formatting for gridlines, the
//! antimeridian test used to drop wrapped cells, and coastline polylines read
//! from GeoJSON (Natural Earth exports work as-is). A coarse world coastline
//! is compiled in for sessions that do not name a file.

use super::ticks::format_number;
use log::{debug, warn};
use serde_json::Value;
use std::path::Path;

/// Cells wider than this in longitude wrap around the antimeridian
pub const MAX_CELL_LONGITUDE_SPAN: f64 = 180.0;

const BUNDLED_COASTLINE: &str = include_str!("../../assets/world_coastline.geojson");

/// A coastline or border as `(longitude, latitude)` vertices
pub type Polyline = Vec<(f64, f64)>;

/// Gridline label for a longitude: `80°E`, `45.5°W`, `0°`, `180°`
pub fn format_longitude(lon: f64) -> String {
    let mut wrapped = ((lon + 180.0).rem_euclid(360.0)) - 180.0;
    if (wrapped + 180.0).abs() < 1e-9 {
        wrapped = 180.0;
    }
    if wrapped.abs() < 1e-9 || (wrapped.abs() - 180.0).abs() < 1e-9 {
        return format!("{}°", format_number(wrapped.abs()));
    }
    let hemisphere = if wrapped > 0.0 { 'E' } else { 'W' };
    format!("{}°{}", format_number(wrapped.abs()), hemisphere)
}

/// Gridline label for a latitude: `10°S`, `20°N`, `0°`
pub fn format_latitude(lat: f64) -> String {
    if lat.abs() < 1e-9 {
        return "0°".to_string();
    }
    let hemisphere = if lat > 0.0 { 'N' } else { 'S' };
    format!("{}°{}", format_number(lat.abs()), hemisphere)
}

/// Whether a cell with these corner longitudes crosses the antimeridian
pub fn spans_antimeridian(longitudes: &[f64]) -> bool {
    let (lo, hi) = longitudes
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    hi - lo > MAX_CELL_LONGITUDE_SPAN
}

/// Reads every line and polygon ring of a GeoJSON document
pub fn parse_geojson(text: &str) -> Result<Vec<Polyline>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let mut lines = Vec::new();
    collect_lines(&value, &mut lines)?;
    Ok(lines)
}

/// Loads coastlines from a GeoJSON file
pub fn load_coastlines(path: &Path) -> Result<Vec<Polyline>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let lines = parse_geojson(&text)?;
    debug!("Loaded {} coastline segments from {}", lines.len(), path.display());
    Ok(lines)
}

/// The compiled-in world coastline
pub fn bundled_coastlines() -> Vec<Polyline> {
    parse_geojson(BUNDLED_COASTLINE).unwrap_or_else(|e| {
        warn!("Bundled coastline is unreadable: {}", e);
        Vec::new()
    })
}

fn collect_lines(value: &Value, out: &mut Vec<Polyline>) -> Result<(), String> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "FeatureCollection" => {
            for feature in value.get("features").and_then(Value::as_array).into_iter().flatten() {
                collect_lines(feature, out)?;
            }
        }
        "Feature" => {
            if let Some(geometry) = value.get("geometry")
                && !geometry.is_null()
            {
                collect_lines(geometry, out)?;
            }
        }
        "GeometryCollection" => {
            for geometry in value.get("geometries").and_then(Value::as_array).into_iter().flatten() {
                collect_lines(geometry, out)?;
            }
        }
        "LineString" => out.push(positions(coordinates(value)?)?),
        "MultiLineString" | "Polygon" => {
            for ring in as_array(coordinates(value)?)? {
                out.push(positions(ring)?);
            }
        }
        "MultiPolygon" => {
            for polygon in as_array(coordinates(value)?)? {
                for ring in as_array(polygon)? {
                    out.push(positions(ring)?);
                }
            }
        }
        "Point" | "MultiPoint" => {}
        other => return Err(format!("Unsupported GeoJSON type '{}'", other)),
    }
    Ok(())
}

fn coordinates(value: &Value) -> Result<&Value, String> {
    value
        .get("coordinates")
        .ok_or_else(|| "GeoJSON geometry without coordinates".to_string())
}

fn as_array(value: &Value) -> Result<&Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("Expected a GeoJSON array, found {}", value))
}

fn positions(value: &Value) -> Result<Polyline, String> {
    as_array(value)?
        .iter()
        .map(|p| {
            let lon = p.get(0).and_then(Value::as_f64);
            let lat = p.get(1).and_then(Value::as_f64);
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok((lon, lat)),
                _ => Err(format!("Invalid GeoJSON position {}", p)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longitude_labels() {
        assert_eq!(format_longitude(80.0), "80°E");
        assert_eq!(format_longitude(-45.5), "45.5°W");
        assert_eq!(format_longitude(0.0), "0°");
        assert_eq!(format_longitude(180.0), "180°");
        assert_eq!(format_longitude(-180.0), "180°");
        assert_eq!(format_longitude(270.0), "90°W");
    }

    #[test]
    fn test_latitude_labels() {
        assert_eq!(format_latitude(-10.0), "10°S");
        assert_eq!(format_latitude(20.0), "20°N");
        assert_eq!(format_latitude(0.0), "0°");
    }

    #[test]
    fn test_antimeridian_detection() {
        assert!(spans_antimeridian(&[179.5, -179.5, -179.4, 179.6]));
        assert!(!spans_antimeridian(&[80.0, 80.1, 80.2]));
    }

    #[test]
    fn test_parse_geojson_geometries() {
        let doc = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "LineString", "coordinates": [[80, 5], [81, 6]]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[0, 0], [1, 0], [1, 1], [0, 0]]],
                    [[[2, 2], [3, 2], [3, 3], [2, 2]], [[2.2, 2.2], [2.4, 2.2], [2.2, 2.4], [2.2, 2.2]]]
                 ]}},
                {"type": "Feature", "properties": {}, "geometry": null}
            ]
        }"#;
        let lines = parse_geojson(doc).unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], vec![(80.0, 5.0), (81.0, 6.0)]);
        assert_eq!(lines[3].len(), 4);

        assert!(parse_geojson(r#"{"type": "LineString", "coordinates": [["a", 1]]}"#).is_err());
        assert!(parse_geojson("not json").is_err());
    }

    #[test]
    fn test_bundled_coastlines() {
        let lines = bundled_coastlines();
        assert!(lines.len() > 20);
        assert!(lines.iter().flatten().all(|&(lon, lat)| lon.abs() <= 180.0 && lat.abs() <= 90.0));
        // The Arabian Sea coast of India is covered
        assert!(
            lines
                .iter()
                .flatten()
                .any(|&(lon, lat)| (70.0..76.0).contains(&lon) && (10.0..22.0).contains(&lat))
        );
    }
}
