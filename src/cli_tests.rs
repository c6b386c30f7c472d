//! # CLI Integration Tests
//!
//! Argument parsing for every subcommand, flag conflicts, and the
//! translation of plot flags into figure definitions.

#[cfg(test)]
mod tests {
    use clap::Parser;
    use std::path::PathBuf;

    use crate::cli::{Cli, Commands, ConfigFormat, OutputFormat, TemplateType, figure_from_args};
    use crate::dataset::{Reduction, Selector};
    use crate::pps::PpsServer;
    use crate::render::{Colormap, Levels, PlotKind, Projection, Title};

    const GRANULE: &str = "2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5";

    #[test]
    fn test_cli_help() {
        let result = Cli::try_parse_from(["gpm-dpr", "--help"]);
        assert!(result.is_err()); // --help exits early through an "error"

        let error = result.unwrap_err();
        assert!(error.to_string().contains("GPM DPR Level 2 granules"));
    }

    #[test]
    fn test_cli_version() {
        assert!(Cli::try_parse_from(["gpm-dpr", "--version"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "gpm-dpr",
            "--verbose",
            "--output-format",
            "json",
            "--config",
            "/path/to/session.yaml",
            "template",
            "overview",
        ]);

        assert!(cli.verbose);
        assert_eq!(cli.output_format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/session.yaml")));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        let result = Cli::try_parse_from(["gpm-dpr", "--verbose", "--quiet", "template", "full"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_info_command() {
        let cli = Cli::parse_from([
            "gpm-dpr",
            "info",
            GRANULE,
            "-n",
            "zFactorFinal",
            "--detailed",
            "--format",
            "csv",
            "--swath",
            "NS",
        ]);

        if let Commands::Info {
            granule,
            variable,
            detailed,
            swath,
            format,
        } = cli.command
        {
            assert_eq!(granule.as_deref(), Some(GRANULE));
            assert_eq!(variable.as_deref(), Some("zFactorFinal"));
            assert!(detailed);
            assert_eq!(swath.as_deref(), Some("NS"));
            assert_eq!(format, Some(OutputFormat::Csv));
        } else {
            panic!("Expected Info command");
        }
    }

    #[test]
    fn test_plot_command_selections() {
        let cli = Cli::parse_from([
            "gpm-dpr",
            "plot",
            "granule.HDF5",
            "-n",
            "zFactorFinal",
            "--isel",
            "nscan=5550:5630",
            "--isel",
            "nfreq=1",
            "--reduce",
            "nbin:max",
            "--x",
            "nscan",
            "--vmin",
            "0",
            "--vmax",
            "60",
            "-o",
            "composite.png",
        ]);

        if let Commands::Plot {
            variable,
            selection,
            plot,
            output,
            ..
        } = cli.command
        {
            assert_eq!(variable, "zFactorFinal");
            assert_eq!(output, "composite.png");
            assert_eq!(selection.selections.len(), 2);
            assert_eq!(selection.selections[0].dim, "nscan");
            assert_eq!(
                selection.selections[0].selector,
                Selector::Slice { start: 5550, end: 5630 }
            );
            assert_eq!(selection.selections[1].selector, Selector::Index(1));
            assert_eq!(selection.reductions[0].op, Reduction::Max);
            assert_eq!(plot.kind, PlotKind::Pcolormesh);
            assert_eq!(plot.cmap, Colormap::Viridis);
            assert_eq!(plot.x.as_deref(), Some("nscan"));
            assert_eq!(plot.vmin, Some(0.0));
            assert_eq!(plot.figsize, [6.4, 4.8]);
            assert_eq!(plot.dpi, 100);
        } else {
            panic!("Expected Plot command");
        }
    }

    #[test]
    fn test_plot_command_map_contourf() {
        let cli = Cli::parse_from([
            "gpm-dpr",
            "plot",
            "granule.HDF5",
            "-n",
            "zFactorFinal",
            "--kind",
            "contourf",
            "--levels",
            "0:60:9",
            "--cmap",
            "turbo",
            "--map",
            "--coastlines",
            "--gridlines",
            "--time-title",
            "--figsize",
            "8,8",
            "-o",
            "cyclone.png",
        ]);

        let Commands::Plot {
            variable,
            selection,
            plot,
            output,
            ..
        } = cli.command
        else {
            panic!("Expected Plot command");
        };
        assert_eq!(plot.levels, Some(Levels::new(0.0, 60.0, 9.0)));

        let figure = figure_from_args(&variable, &selection, &plot, &output).unwrap();
        assert_eq!(figure.name, "zFactorFinal");
        assert_eq!(figure.plot.kind, PlotKind::Contourf);
        assert_eq!(figure.plot.cmap, Colormap::Turbo);
        assert_eq!(figure.plot.projection, Projection::PlateCarree);
        assert!(figure.plot.coastlines);
        assert_eq!(figure.plot.figsize, [8.0, 8.0]);
        assert!(matches!(figure.plot.title, Some(Title::ScanTime { .. })));
    }

    #[test]
    fn test_plot_flag_conflicts() {
        let base = ["gpm-dpr", "plot", "g.HDF5", "-n", "v", "-o", "out.png"];

        // Coastlines only make sense on a map
        let mut args: Vec<&str> = base.to_vec();
        args.push("--coastlines");
        assert!(Cli::try_parse_from(&args).is_err());

        let mut args: Vec<&str> = base.to_vec();
        args.extend(["--title", "Tauktae", "--time-title"]);
        assert!(Cli::try_parse_from(&args).is_err());

        let mut args: Vec<&str> = base.to_vec();
        args.extend(["--isel", "nscan"]);
        assert!(Cli::try_parse_from(&args).is_err());

        let mut args: Vec<&str> = base.to_vec();
        args.extend(["--reduce", "nbin:median"]);
        assert!(Cli::try_parse_from(&args).is_err());

        let mut args: Vec<&str> = base.to_vec();
        args.extend(["--kind", "scatter"]);
        assert!(Cli::try_parse_from(&args).is_err());
    }

    #[test]
    fn test_plot_requires_variable_and_output() {
        assert!(Cli::try_parse_from(["gpm-dpr", "plot", "g.HDF5", "-o", "out.png"]).is_err());
        assert!(Cli::try_parse_from(["gpm-dpr", "plot", "g.HDF5", "-n", "v"]).is_err());
    }

    #[test]
    fn test_render_command() {
        let cli = Cli::parse_from([
            "gpm-dpr",
            "--config",
            "session.yaml",
            "render",
            "--figure",
            "surface-rain",
            "--figure",
            "cyclone-map",
            "--dry-run",
        ]);

        if let Commands::Render { figures, dry_run } = cli.command {
            assert_eq!(figures, vec!["surface-rain", "cyclone-map"]);
            assert!(dry_run);
        } else {
            panic!("Expected Render command");
        }
    }

    #[test]
    fn test_download_command() {
        let cli = Cli::parse_from([
            "gpm-dpr",
            "download",
            "--username",
            "you@example.com",
            "--server",
            "nrt",
            "--start",
            "2021-05-15T20:43",
            "--end",
            "2021-05-15T22:17",
            "--data-dir",
            "data",
            "--list-only",
        ]);

        if let Commands::Download {
            username,
            server,
            start,
            end,
            data_dir,
            list_only,
            granule,
            ..
        } = cli.command
        {
            assert_eq!(username.as_deref(), Some("you@example.com"));
            assert_eq!(server, Some(PpsServer::NearRealTime));
            assert_eq!(start.as_deref(), Some("2021-05-15T20:43"));
            assert_eq!(end.as_deref(), Some("2021-05-15T22:17"));
            assert_eq!(data_dir, Some(PathBuf::from("data")));
            assert!(list_only);
            assert!(granule.is_none());
        } else {
            panic!("Expected Download command");
        }
    }

    #[test]
    fn test_download_window_needs_both_ends() {
        let result = Cli::try_parse_from(["gpm-dpr", "download", "--start", "2021-05-15T20:43"]);
        assert!(result.is_err());

        let result = Cli::try_parse_from([
            "gpm-dpr",
            "download",
            "--granule",
            GRANULE,
            "--start",
            "2021-05-15T20:43",
            "--end",
            "2021-05-15T22:17",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_export_command() {
        let cli = Cli::parse_from([
            "gpm-dpr",
            "export",
            "granule.HDF5",
            "-n",
            "precipRateNearSurface",
            "--isel",
            "nscan=5550:5630",
            "--drop-missing",
            "-o",
            "s3://bucket/rain.parquet",
        ]);

        if let Commands::Export {
            variable,
            selection,
            drop_missing,
            output,
            ..
        } = cli.command
        {
            assert_eq!(variable, "precipRateNearSurface");
            assert_eq!(selection.selections.len(), 1);
            assert!(selection.reductions.is_empty());
            assert!(drop_missing);
            assert_eq!(output, "s3://bucket/rain.parquet");
        } else {
            panic!("Expected Export command");
        }
    }

    #[test]
    fn test_template_command() {
        let cli = Cli::parse_from(["gpm-dpr", "template", "case-study", "--format", "yaml", "-o", "session.yaml"]);

        if let Commands::Template {
            template_type,
            output,
            format,
        } = cli.command
        {
            assert_eq!(template_type, TemplateType::CaseStudy);
            assert_eq!(output, Some(PathBuf::from("session.yaml")));
            assert_eq!(format, ConfigFormat::Yaml);
        } else {
            panic!("Expected Template command");
        }

        let cli = Cli::parse_from(["gpm-dpr", "template", "full"]);
        if let Commands::Template { format, .. } = cli.command {
            assert_eq!(format, ConfigFormat::Json);
        }
        assert!(Cli::try_parse_from(["gpm-dpr", "template", "unknown"]).is_err());
    }

    #[test]
    fn test_completions_command() {
        let cli = Cli::parse_from(["gpm-dpr", "completions", "zsh"]);
        if let Commands::Completions { shell, output } = cli.command {
            assert_eq!(shell, clap_complete::Shell::Zsh);
            assert!(output.is_none());
        } else {
            panic!("Expected Completions command");
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
