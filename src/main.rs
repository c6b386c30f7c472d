use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use gpm_dpr::cli::{Cli, Commands, ConfigFormat, OutputFormat, figure_from_args};
use gpm_dpr::config::{SessionConfig, SessionTemplate};
use gpm_dpr::dataset::{Reduction, Selector};
use gpm_dpr::granule::{GranuleName, TimeWindow, parse_timestamp};
use gpm_dpr::info::{format_info_csv, format_info_human, format_info_json, format_info_yaml, get_granule_info};
use gpm_dpr::loader::resolve_granule;
use gpm_dpr::log::{session_echo, show_farewell_with_timing, show_greeting};
use gpm_dpr::pps::{PpsClient, PpsConfig};
use gpm_dpr::{export_selection, pps_client, render_session};
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Session file (if any) with `GPM_DPR_*` overrides applied
fn load_session(config: Option<&PathBuf>) -> Result<SessionConfig> {
    let mut session = match config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load session from {}", path.display()))?,
        None => SessionConfig::new(""),
    };
    session.apply_env()?;
    Ok(session)
}

/// Like [`load_session`], with the granule taken from the command line when given
fn session_with_granule(config: Option<&PathBuf>, granule: Option<String>) -> Result<SessionConfig> {
    let mut session = load_session(config)?;
    if let Some(granule) = granule {
        session.granule = granule;
    }
    if session.granule.trim().is_empty() {
        bail!("No granule given: pass a path or PPS file name, set GPM_DPR_GRANULE, or use --config");
    }
    Ok(session)
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.clone();
    match cli.command {
        Commands::Info {
            granule,
            variable,
            detailed,
            swath,
            format,
        } => {
            let mut session = session_with_granule(config.as_ref(), granule)?;
            session.figures.clear();
            let mut options = session.load_options();
            if let Some(variable) = &variable {
                options = options.with_variables(&[variable.as_str()]);
            }
            if let Some(swath) = &swath {
                options = options.with_swath(swath);
            }
            let pps = pps_client(&session)?;
            let info = get_granule_info(&session.granule, pps.as_ref(), &options, variable.as_deref(), detailed).await?;

            match format.unwrap_or(cli.output_format) {
                OutputFormat::Human => print!("{}", format_info_human(&info)),
                OutputFormat::Json => println!("{}", format_info_json(&info)?),
                OutputFormat::Yaml => print!("{}", format_info_yaml(&info)?),
                OutputFormat::Csv => print!("{}", format_info_csv(&info)),
            }
        }

        Commands::Plot {
            granule,
            variable,
            selection,
            plot,
            swath,
            output,
        } => {
            let start_time = Instant::now();
            let mut session = session_with_granule(config.as_ref(), granule)?;
            show_greeting(config.as_deref());
            info!("Granule: {}", session.granule);
            if swath.is_some() {
                session.swath = swath;
            }
            let figure = figure_from_args(&variable, &selection, &plot, &output).map_err(anyhow::Error::msg)?;
            session.figures = vec![figure];
            render_session(&session, &[]).await?;
            show_farewell_with_timing(start_time.elapsed());
        }

        Commands::Render { figures, dry_run } => {
            let Some(path) = config.as_ref() else {
                bail!("render needs a session file: pass --config or set GPM_DPR_CONFIG");
            };
            let start_time = Instant::now();
            show_greeting(Some(path.as_path()));
            let session = load_session(Some(path))?;
            session_echo(&session);

            if dry_run {
                session.validate()?;
                info!("Session is valid ({} figure(s))", session.figures.len());
                return Ok(());
            }
            let written = render_session(&session, &figures).await?;
            if cli.output_format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&written)?);
            }
            show_farewell_with_timing(start_time.elapsed());
        }

        Commands::Download {
            username,
            password,
            server,
            product,
            data_dir,
            start,
            end,
            granule,
            list_only,
        } => {
            let session = load_session(config.as_ref())?;
            let mut pps = match (session.pps.clone(), username) {
                (Some(mut pps), Some(username)) => {
                    pps.username = username;
                    pps
                }
                (Some(pps), None) => pps,
                (None, Some(username)) => PpsConfig::new(&username),
                (None, None) => bail!("PPS user name required: pass --username or set GPM_DPR_PPS_USERNAME"),
            };
            if password.is_some() {
                pps.password = password;
            }
            if let Some(server) = server {
                pps.server = server;
            }
            if let Some(product) = product {
                pps.product = product;
            }
            if let Some(data_dir) = data_dir {
                pps.data_dir = data_dir;
            }
            let client = PpsClient::new(pps).context("Failed to create PPS client")?;

            if let Some(name) = granule {
                let name: GranuleName = name.parse().with_context(|| format!("Invalid granule name '{}'", name))?;
                let path = client.fetch_named(&name).await?;
                println!("{}", path.display());
                return Ok(());
            }

            let window = match (start, end) {
                (Some(start), Some(end)) => TimeWindow::new(parse_timestamp(&start)?, parse_timestamp(&end)?)?,
                _ => session
                    .search
                    .context("Nothing to download: pass --granule or --start/--end")?,
            };
            let found: Vec<String> = if list_only {
                client
                    .search(&window)
                    .await?
                    .into_iter()
                    .map(|g| g.name.to_string())
                    .collect()
            } else {
                client
                    .fetch_window(&window)
                    .await?
                    .into_iter()
                    .map(|p| p.display().to_string())
                    .collect()
            };
            match cli.output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&found)?),
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&found)?),
                OutputFormat::Human | OutputFormat::Csv => {
                    for line in found {
                        println!("{}", line);
                    }
                }
            }
        }

        Commands::Export {
            granule,
            variable,
            selection,
            drop_missing,
            swath,
            output,
        } => {
            let mut session = session_with_granule(config.as_ref(), granule)?;
            session.figures.clear();
            let mut options = session.load_options().with_variables(&[variable.as_str()]);
            if let Some(swath) = &swath {
                options = options.with_swath(swath);
            }
            let pps = pps_client(&session)?;
            let resolved = resolve_granule(&session.granule, pps.as_ref())
                .await
                .with_context(|| format!("Failed to locate granule {}", session.granule))?;
            let dataset = resolved
                .load(&options)
                .with_context(|| format!("Failed to load granule {}", session.granule))?;

            let selections: Vec<(String, Selector)> = selection
                .merged_selections()
                .map_err(anyhow::Error::msg)?
                .into_iter()
                .map(|s| (s.dim, s.selector))
                .collect();
            let reductions: Vec<(String, Reduction)> =
                selection.reductions.iter().map(|r| (r.dim.clone(), r.op)).collect();
            let rows = export_selection(&dataset, &variable, &selections, &reductions, drop_missing, &output).await?;
            info!("Wrote {} row(s) to {}", rows, output);
        }

        Commands::Template {
            template_type,
            output,
            format,
        } => {
            let session = SessionTemplate::from(template_type).build();
            let content = match format {
                ConfigFormat::Json => session.to_json()?,
                ConfigFormat::Yaml => session.to_yaml()?,
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write template to {}", path.display()))?;
                    info!("Template written to {}", path.display());
                }
                None => print!("{}", content),
            }
        }

        Commands::Completions { shell, output } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            match output {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    generate(shell, &mut cmd, name, &mut file);
                }
                None => generate(shell, &mut cmd, name, &mut std::io::stdout()),
            }
        }
    }
    Ok(())
}
