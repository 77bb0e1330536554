use clap::{Parser, Subcommand};
use servimap::{config, data, server, vulnerability};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the interactive service maps
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load and validate every configured dataset, then print a summary
    Check {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Write the neighborhood vulnerability table as CSV
    ExportVulnerability {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            info!("Serving maps with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let catalog = data::load_catalog(&app_config)?;
            server::start_server(app_config, catalog).await?;
        }
        Commands::Check { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let catalog = data::load_catalog(&app_config)?;

            for (dataset_config, dataset) in app_config.datasets.iter().zip(&catalog.datasets) {
                let missing = data::check_schema(dataset_config, dataset);
                println!(
                    "{:<28} {:>5} points  {:>3} columns  {}",
                    dataset.id,
                    dataset.facilities.len(),
                    dataset.column_count(),
                    if missing.is_empty() {
                        "ok".to_string()
                    } else {
                        format!("missing: {}", missing.join(", "))
                    }
                );
            }
            let with_shape = catalog.neighborhoods.iter().filter(|n| n.geometry.is_some()).count();
            println!(
                "{:<28} {:>5} neighborhoods ({} with shape)",
                app_config.vulnerability.file,
                catalog.neighborhoods.len(),
                with_shape
            );
        }
        Commands::ExportVulnerability { config, out } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let path = app_config.dataset_path(&app_config.vulnerability.file);
            let neighborhoods =
                vulnerability::load_neighborhoods(&path, app_config.delimiter_byte()?)?;
            let csv = vulnerability::to_csv(&neighborhoods)?;

            let out = out
                .clone()
                .unwrap_or_else(|| PathBuf::from(&app_config.vulnerability.download_name));
            std::fs::write(&out, csv)?;
            info!(rows = neighborhoods.len(), "Wrote {:?}", out);
        }
    }

    Ok(())
}
