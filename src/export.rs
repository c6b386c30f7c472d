//! # Parquet Export
//!
//! Flattens a selection into a tidy table, one row per element: a column
//! per dimension holding the absolute index, a column per attached
//! coordinate (`Longitude`, `Latitude`, `time` in epoch milliseconds) and
//! the variable itself. The table is written as Parquet to a local path or
//! an `s3://` object.

use crate::dataset::DataArray;
use crate::storage::{StorageBackend, StorageError, StorageFactory};
use log::debug;
use ndarray::IxDyn;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Column name '{0}' is used by both a dimension and a coordinate")]
    DuplicateColumn(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Builds the table for `array`. With `drop_missing`, rows whose value is
/// NaN are left out.
pub fn to_dataframe(array: &DataArray, drop_missing: bool) -> ExportResult<DataFrame> {
    for coord in &array.coords {
        if array.dimension(&coord.name).is_some() || coord.name == array.name {
            return Err(ExportError::DuplicateColumn(coord.name.clone()));
        }
    }

    // Array axis of every coordinate dimension, in coordinate order.
    let coord_axes: Vec<Vec<usize>> = array
        .coords
        .iter()
        .map(|c| {
            c.dims
                .iter()
                .filter_map(|d| array.dims.iter().position(|ad| ad.name == *d))
                .collect()
        })
        .collect();

    let mut dim_columns: Vec<Vec<i64>> = vec![Vec::new(); array.ndim()];
    let mut coord_columns: Vec<Vec<f64>> = vec![Vec::new(); array.coords.len()];
    let mut values = Vec::new();
    let mut coord_index = Vec::new();

    for (index, &value) in array.values.indexed_iter() {
        if drop_missing && value.is_nan() {
            continue;
        }
        for (axis, column) in dim_columns.iter_mut().enumerate() {
            column.push((array.dims[axis].origin + index[axis]) as i64);
        }
        for ((coord, axes), column) in array.coords.iter().zip(&coord_axes).zip(coord_columns.iter_mut()) {
            coord_index.clear();
            coord_index.extend(axes.iter().map(|&axis| index[axis]));
            column.push(coord.values[IxDyn(&coord_index)]);
        }
        values.push(value);
    }

    let mut columns: Vec<Column> = Vec::with_capacity(array.ndim() + array.coords.len() + 1);
    for (dim, column) in array.dims.iter().zip(dim_columns) {
        columns.push(Series::new(dim.name.as_str().into(), column).into());
    }
    for (coord, column) in array.coords.iter().zip(coord_columns) {
        columns.push(Series::new(coord.name.as_str().into(), column).into());
    }
    columns.push(Series::new(array.name.as_str().into(), values).into());

    let df = DataFrame::new(columns)?;
    debug!("Built table for {}: {:?}", array.name, df.shape());
    Ok(df)
}

fn write_parquet_file(df: &mut DataFrame, path: &Path) -> ExportResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    ParquetWriter::new(file).finish(df)?;
    Ok(())
}

/// Writes `df` as Parquet. `s3://` destinations are written to a temporary
/// file first and uploaded.
pub async fn write_parquet(df: &DataFrame, output_path: &str) -> ExportResult<()> {
    debug!("Writing {:?} table to {}", df.shape(), output_path);
    debug!("Schema:\n{:?}", df.schema());
    let mut df = df.clone();

    if StorageFactory::is_s3_path(output_path) {
        let temp_file = tempfile::NamedTempFile::new()?;
        write_parquet_file(&mut df, temp_file.path())?;
        let data = tokio::fs::read(temp_file.path()).await?;
        let storage = StorageFactory::from_path(output_path).await?;
        storage.write(output_path, &data).await?;
    } else {
        write_parquet_file(&mut df, Path::new(output_path))?;
    }
    debug!("Wrote {}", output_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Coordinate, Dimension, Selector};
    use ndarray::ArrayD;
    use tempfile::tempdir;

    fn swath() -> DataArray {
        let values = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, f32::NAN, 4.0, 5.0, 6.0]).unwrap();
        let lon = ArrayD::from_shape_fn(IxDyn(&[2, 3]), |ix| 80.0 + ix[0] as f64 + ix[1] as f64 * 0.1);
        let scan_time = ArrayD::from_shape_fn(IxDyn(&[2]), |ix| 1_621_111_412_000.0 + ix[0] as f64 * 600.0);
        DataArray::new(
            "precipRateNearSurface",
            vec![Dimension::with_origin("nscan", 2, 5550), Dimension::new("nrayNS", 3)],
            values,
        )
        .unwrap()
        .with_coord(Coordinate::new("Longitude", &["nscan", "nrayNS"], lon).unwrap())
        .unwrap()
        .with_coord(Coordinate::new("time", &["nscan"], scan_time).unwrap())
        .unwrap()
    }

    #[test]
    fn test_table_layout() {
        let df = to_dataframe(&swath(), false).unwrap();
        assert_eq!(df.shape(), (6, 5));
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["nscan", "nrayNS", "Longitude", "time", "precipRateNearSurface"]);

        let nscan = df.column("nscan").unwrap().i64().unwrap();
        assert_eq!(nscan.get(0), Some(5550));
        assert_eq!(nscan.get(5), Some(5551));
        let lon = df.column("Longitude").unwrap().f64().unwrap();
        assert!((lon.get(4).unwrap() - 81.1).abs() < 1e-9);
        let time = df.column("time").unwrap().f64().unwrap();
        assert_eq!(time.get(3), Some(1_621_111_412_600.0));
    }

    #[test]
    fn test_drop_missing_rows() {
        let df = to_dataframe(&swath(), true).unwrap();
        assert_eq!(df.height(), 5);
        let values = df.column("precipRateNearSurface").unwrap().f32().unwrap();
        assert_eq!(values.get(2), Some(4.0));
    }

    #[test]
    fn test_single_ray_selection() {
        let ray = swath().isel("nrayNS", Selector::Index(1)).unwrap();
        let df = to_dataframe(&ray, false).unwrap();
        assert_eq!(df.shape(), (2, 4));
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("rain.parquet");
        let df = to_dataframe(&swath(), false).unwrap();
        write_parquet(&df, path.to_str().unwrap()).await.unwrap();

        let file = File::open(&path).unwrap();
        let back = ParquetReader::new(file).finish().unwrap();
        assert_eq!(back.shape(), (6, 5));
    }
}
