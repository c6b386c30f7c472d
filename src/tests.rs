use crate::dataset::{Reduction, Selector};
use crate::loader::{LoadOptions, load_granule};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

pub(crate) const CYCLONE_GRANULE: &str =
    "2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5";

/// Small stand-in for a DPR granule, laid out like the real files:
/// geolocation and `ScanTime` directly under `FS`, fields in sub-groups.
#[derive(Debug, Clone)]
pub(crate) struct SyntheticGranule {
    pub nscan: usize,
    pub nray: usize,
    pub nbin: usize,
}

impl Default for SyntheticGranule {
    fn default() -> Self {
        SyntheticGranule {
            nscan: 8,
            nray: 5,
            nbin: 6,
        }
    }
}

impl SyntheticGranule {
    pub fn reflectivity(&self, scan: usize, ray: usize, bin: usize, freq: usize) -> f32 {
        scan as f32 * 10.0 + ray as f32 + bin as f32 * 0.5 + freq as f32 * 0.25
    }

    pub fn longitude(&self, scan: usize, ray: usize) -> f32 {
        80.0 + scan as f32 * 0.1 + ray as f32 * 0.05
    }

    pub fn latitude(&self, scan: usize, ray: usize) -> f32 {
        -10.0 + scan as f32 * 0.1 - ray as f32 * 0.02
    }

    /// Rain rate; ray 0 holds the missing-value code
    pub fn rain_rate(&self, scan: usize, ray: usize) -> f32 {
        if ray == 0 {
            -9999.9
        } else {
            (scan * self.nray + ray) as f32
        }
    }
}

/// Writes `granule` to `dir` under the PPS name of the cyclone overpass
pub(crate) fn write_synthetic_granule(
    dir: &Path,
    granule: &SyntheticGranule,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join(CYCLONE_GRANULE);
    let (nscan, nray, nbin) = (granule.nscan, granule.nray, granule.nbin);

    let grid = |f: &dyn Fn(usize, usize) -> f32| -> Vec<f32> {
        (0..nscan)
            .flat_map(|i| (0..nray).map(move |j| (i, j)))
            .map(|(i, j)| f(i, j))
            .collect()
    };
    let lon = grid(&|i, j| granule.longitude(i, j));
    let lat = grid(&|i, j| granule.latitude(i, j));
    let rain = grid(&|i, j| granule.rain_rate(i, j));
    let ice: Vec<i8> = (0..nscan * nray).map(|k| (k % 3) as i8).collect();
    let mut z = Vec::with_capacity(nscan * nray * nbin * 2);
    for i in 0..nscan {
        for j in 0..nray {
            for k in 0..nbin {
                for f in 0..2 {
                    z.push(granule.reflectivity(i, j, k, f));
                }
            }
        }
    }

    let mut file = netcdf::create_with(&path, netcdf::Options::NETCDF4)?;
    file.add_attribute("FileHeader", "DOI=10.5067/GPM/DPR/GPM/2A/07;")?;
    {
        let mut fs = file.add_group("FS")?;
        fs.add_dimension("nscan", nscan)?;
        fs.add_dimension("nrayNS", nray)?;
        fs.add_dimension("nbin", nbin)?;
        fs.add_dimension("nfreq", 2)?;

        for (name, units, values) in [
            ("Longitude", "degrees_east", &lon),
            ("Latitude", "degrees_north", &lat),
        ] {
            let mut var = fs.add_variable::<f32>(name, &["nscan", "nrayNS"])?;
            var.put_attribute("units", units)?;
            var.put_values(values, ..)?;
        }

        {
            let mut scan_time = fs.add_group("ScanTime")?;
            let seconds: Vec<i8> = (0..nscan).map(|i| 32 + i as i8).collect();
            let fields: [(&str, Vec<i16>); 3] = [
                ("Year", vec![2021; nscan]),
                ("MilliSecond", vec![0; nscan]),
                ("DayOfMonth", vec![15; nscan]),
            ];
            for (name, values) in fields {
                let mut var = scan_time.add_variable::<i16>(name, &["nscan"])?;
                var.put_values(&values, ..)?;
            }
            for (name, values) in [
                ("Month", vec![5i8; nscan]),
                ("Hour", vec![20; nscan]),
                ("Minute", vec![43; nscan]),
                ("Second", seconds),
            ] {
                let mut var = scan_time.add_variable::<i8>(name, &["nscan"])?;
                var.put_values(&values, ..)?;
            }
        }
        {
            let mut slv = fs.add_group("SLV")?;
            {
                let mut var = slv
                    .add_variable::<f32>("zFactorFinal", &["nscan", "nrayNS", "nbin", "nfreq"])?;
                var.put_attribute("units", "dBZ")?;
                var.put_attribute("DimensionNames", "nscan,nrayNS,nbin,nfreq")?;
                var.put_values(&z, ..)?;
            }
            let mut var = slv.add_variable::<f32>("precipRateNearSurface", &["nscan", "nrayNS"])?;
            var.put_attribute("units", "mm/hr")?;
            var.put_attribute("CodeMissingValue", "-9999.9")?;
            var.put_values(&rain, ..)?;
        }
        {
            let mut csf = fs.add_group("CSF")?;
            let mut var = csf.add_variable::<i8>("flagHeavyIcePrecip", &["nscan", "nrayNS"])?;
            var.put_values(&ice, ..)?;
        }
    }
    drop(file);
    Ok(path)
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[test]
    fn test_loaded_reflectivity_has_four_dimensions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = write_synthetic_granule(dir.path(), &SyntheticGranule::default())?;
        let dataset = load_granule(&path, &LoadOptions::default())?;

        let z = dataset.variable("zFactorFinal")?;
        assert_eq!(z.ndim(), 4);
        assert_eq!(z.dim_names(), vec!["nscan", "nrayNS", "nbin", "nfreq"]);
        assert_eq!(
            dataset.granule.as_ref().map(|g| g.orbit),
            Some(40979)
        );
        assert_eq!(
            dataset.attrs.get("FileHeader").map(|s| s.as_str()),
            Some("DOI=10.5067/GPM/DPR/GPM/2A/07;")
        );
        Ok(())
    }

    #[test]
    fn test_composite_reflectivity_matches_column_maximum() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let granule = SyntheticGranule::default();
        let path = write_synthetic_granule(dir.path(), &granule)?;
        let dataset = load_granule(&path, &LoadOptions::default())?;

        let composite = dataset.select(
            "zFactorFinal",
            &[("nfreq".to_string(), Selector::Index(0))],
            &[("nbin".to_string(), Reduction::Max)],
        )?;
        assert_eq!(composite.dim_names(), vec!["nscan", "nrayNS"]);
        assert_eq!(
            composite.values[[3, 2]],
            granule.reflectivity(3, 2, granule.nbin - 1, 0)
        );
        assert!(composite.coord("Longitude").is_some());
        assert!(composite.coord("Latitude").is_some());
        Ok(())
    }

    #[test]
    fn test_case_study_window_after_load() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let granule = SyntheticGranule::default();
        let path = write_synthetic_granule(dir.path(), &granule)?;
        let dataset = load_granule(&path, &LoadOptions::default())?;

        let window = dataset.select(
            "zFactorFinal",
            &[
                ("nscan".to_string(), Selector::Slice { start: 2, end: 6 }),
                ("nfreq".to_string(), Selector::Index(1)),
            ],
            &[("nbin".to_string(), Reduction::Max)],
        )?;
        assert_eq!(window.shape(), &[4, granule.nray]);
        assert_eq!(window.dimension("nscan").map(|d| d.origin), Some(2));
        assert_eq!(
            window.first_time().map(|t| t.format("%Y%m%d %H:%M:%S").to_string()),
            Some("20210515 20:43:34".to_string())
        );

        let flags = dataset.variable("flagHeavyIcePrecip")?;
        assert_eq!(flags.values[[0, 1]], 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use crate::config::{FigureConfig, ReductionSpec, SelectionSpec, SessionConfig};
    use crate::render::{Colormap, Levels, PlotKind, PlotSpec, Projection, RenderResources, Title, default_time_format};
    use crate::{export_selection, render_figure, render_session};
    use polars::prelude::{ParquetReader, SerReader};
    use std::fs::File;

    fn small_plot(plot: PlotSpec) -> PlotSpec {
        PlotSpec {
            figsize: [3.0, 2.0],
            dpi: 50,
            ..plot
        }
    }

    fn composite_figure(output: &str) -> FigureConfig {
        FigureConfig {
            name: "composite".to_string(),
            variable: "zFactorFinal".to_string(),
            selections: vec![SelectionSpec::index("nfreq", 0)],
            reductions: vec![ReductionSpec::new("nbin", Reduction::Max)],
            plot: small_plot(PlotSpec {
                x: Some("nscan".to_string()),
                vmin: Some(0.0),
                vmax: Some(60.0),
                ..PlotSpec::default()
            }),
            output: output.to_string(),
        }
    }

    fn cyclone_map_figure(output: &str) -> FigureConfig {
        FigureConfig {
            name: "cyclone-map".to_string(),
            variable: "zFactorFinal".to_string(),
            selections: vec![
                SelectionSpec::slice("nscan", 1, 7),
                SelectionSpec::index("nfreq", 0),
            ],
            reductions: vec![ReductionSpec::new("nbin", Reduction::Max)],
            plot: small_plot(PlotSpec {
                kind: PlotKind::Contourf,
                levels: Some(Levels::new(0.0, 90.0, 9.0)),
                cmap: Colormap::Turbo,
                projection: Projection::PlateCarree,
                title: Some(Title::ScanTime {
                    format: default_time_format(),
                }),
                ..PlotSpec::default()
            }),
            output: output.to_string(),
        }
    }

    #[test]
    fn test_render_figure_from_granule() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = write_synthetic_granule(dir.path(), &SyntheticGranule::default())?;
        let dataset = load_granule(&path, &LoadOptions::default())?;

        let png = render_figure(&dataset, &composite_figure("unused.png"), &RenderResources::bundled())?;
        assert_eq!(&png[1..4], b"PNG");

        let png = render_figure(&dataset, &cyclone_map_figure("unused.png"), &RenderResources::without_text())?;
        let image = image::load_from_memory(&png)?;
        assert_eq!((image.width(), image.height()), (150, 100));
        Ok(())
    }

    #[test]
    fn test_render_figure_rejects_unreduced_cube() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = write_synthetic_granule(dir.path(), &SyntheticGranule::default())?;
        let dataset = load_granule(&path, &LoadOptions::default())?;

        let mut figure = composite_figure("unused.png");
        figure.reductions.clear();
        assert!(render_figure(&dataset, &figure, &RenderResources::without_text()).is_err());

        let mut figure = composite_figure("unused.png");
        figure.selections = vec![SelectionSpec::index("nfreq", 2)];
        assert!(render_figure(&dataset, &figure, &RenderResources::without_text()).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_render_session_writes_every_figure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = write_synthetic_granule(dir.path(), &SyntheticGranule::default())?;
        let out = dir.path().join("figures");
        let composite = out.join("composite.png");
        let cyclone = out.join("cyclone.png");

        let mut session = SessionConfig::new(path.to_str().ok_or("non-UTF-8 path")?);
        session.figures = vec![
            composite_figure(composite.to_str().ok_or("non-UTF-8 path")?),
            cyclone_map_figure(cyclone.to_str().ok_or("non-UTF-8 path")?),
        ];

        let written = render_session(&session, &[]).await?;
        assert_eq!(written.len(), 2);
        assert!(composite.exists());
        assert!(cyclone.exists());

        std::fs::remove_file(&composite)?;
        let written = render_session(&session, &["cyclone-map".to_string()]).await?;
        assert_eq!(written, vec![cyclone.to_string_lossy().to_string()]);
        assert!(!composite.exists());

        assert!(render_session(&session, &["missing".to_string()]).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_render_session_with_scan_window() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = write_synthetic_granule(dir.path(), &SyntheticGranule::default())?;
        let output = dir.path().join("rain.png");

        let mut session = SessionConfig::new(path.to_str().ok_or("non-UTF-8 path")?);
        session.scans = Some(crate::config::ScanRange { start: 2, end: 6 });
        session.figures = vec![FigureConfig {
            name: "surface-rain".to_string(),
            variable: "precipRateNearSurface".to_string(),
            selections: Vec::new(),
            reductions: Vec::new(),
            plot: small_plot(PlotSpec {
                kind: PlotKind::Contourf,
                x: Some("nscan".to_string()),
                levels: Some(Levels::new(0.0, 40.0, 2.0)),
                invert_y: true,
                ..PlotSpec::default()
            }),
            output: output.to_string_lossy().to_string(),
        }];

        render_session(&session, &[]).await?;
        let image = image::open(&output)?;
        assert_eq!((image.width(), image.height()), (150, 100));
        Ok(())
    }

    #[tokio::test]
    async fn test_export_selection_to_parquet() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let granule = SyntheticGranule::default();
        let path = write_synthetic_granule(dir.path(), &granule)?;
        let dataset = load_granule(&path, &LoadOptions::default())?;
        let output = dir.path().join("rain.parquet");

        let rows = export_selection(
            &dataset,
            "precipRateNearSurface",
            &[("nscan".to_string(), Selector::Slice { start: 2, end: 6 })],
            &[],
            true,
            output.to_str().ok_or("non-UTF-8 path")?,
        )
        .await?;
        // ray 0 carries the missing-value code
        assert_eq!(rows, 4 * (granule.nray - 1));

        let df = ParquetReader::new(File::open(&output)?).finish()?;
        assert_eq!(df.height(), rows);
        let nscan = df.column("nscan")?.i64()?;
        assert_eq!(nscan.get(0), Some(2));
        let rain = df.column("precipRateNearSurface")?.f32()?;
        assert_eq!(rain.get(0), Some(granule.rain_rate(2, 1)));
        assert!(df.column("Longitude").is_ok());
        Ok(())
    }
}
