//! Command-line interface for the QIoT telemetry router.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use qiot_api::{DashboardService, ExperimentService, SensorService, SyncService};
use qiot_core::config::env_vars;
use qiot_core::AppConfig;
use qiot_rules::{compile, EmqxClient, NamingPolicy, RouteStatus, SyncReport};
use qiot_storage::{open_document_store, Document, DocumentStore, InfluxClient};

/// QIoT - route device telemetry through EMQX into InfluxDB.
#[derive(Parser, Debug)]
#[command(name = "qiot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to ./qiot.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Store a sensor definition from a JSON file.
    ImportSensor {
        /// Path to the sensor document.
        path: PathBuf,
        /// Replace this existing sensor instead of inserting.
        #[arg(long)]
        id: Option<String>,
    },
    /// Store an experiment from a JSON file and sync it to the broker.
    ImportExperiment {
        /// Path to the experiment document.
        path: PathBuf,
        /// Replace this existing experiment instead of inserting.
        #[arg(long)]
        id: Option<String>,
        /// Only store the document.
        #[arg(long)]
        no_sync: bool,
    },
    /// List stored sensors.
    Sensors,
    /// List stored experiments.
    Experiments,
    /// Print the actions and rules an experiment compiles to.
    Compile {
        /// Experiment id.
        experiment: String,
    },
    /// Push an experiment's actions and rules to the broker.
    Sync {
        /// Experiment id.
        experiment: String,
    },
    /// Fetch the dashboard series of one service.
    Dashboard {
        /// Experiment id.
        experiment: String,
        /// Service UUID.
        service: String,
    },
    /// Export the gateway configuration of an experiment as YAML.
    ExportYaml {
        /// Experiment id.
        experiment: String,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("qiot=info"));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }

    let config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::ImportSensor { path, id } => import_sensor(&config, &path, id).await,
        Command::ImportExperiment { path, id, no_sync } => {
            import_experiment(&config, &path, id, no_sync).await
        }
        Command::Sensors => {
            let sensors = SensorService::new(store(&config)?).list().await?;
            print_json(&sensors)
        }
        Command::Experiments => {
            let experiments = experiments(&config)?.list().await?;
            print_json(&experiments)
        }
        Command::Compile { experiment } => dry_run(&config, &experiment).await,
        Command::Sync { experiment } => sync(&config, &experiment).await,
        Command::Dashboard {
            experiment,
            service,
        } => dashboard(&config, &experiment, &service).await,
        Command::ExportYaml { experiment, output } => {
            let yaml = experiments(&config)?.export_yaml(&experiment).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, yaml)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Gateway configuration written to {}", path.display());
                }
                None => print!("{}", yaml),
            }
            Ok(())
        }
    }
}

fn store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    open_document_store(&config.storage.path)
        .with_context(|| format!("Failed to open store {}", config.storage.path.display()))
}

fn experiments(config: &AppConfig) -> Result<ExperimentService> {
    Ok(ExperimentService::new(
        store(config)?,
        config.naming.topic_prefix.as_str(),
    ))
}

fn sync_service(config: &AppConfig) -> Result<SyncService> {
    let broker = EmqxClient::from_config(&config.broker)?;
    let sync = SyncService::new(Arc::new(broker), config);

    let cancel = sync.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no further broker calls will be issued");
            cancel.cancel();
        }
    });
    Ok(sync)
}

fn read_document(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON object", path.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn import_sensor(config: &AppConfig, path: &Path, id: Option<String>) -> Result<()> {
    let sensors = SensorService::new(store(config)?);
    let doc = read_document(path)?;
    match id {
        Some(id) => {
            sensors.edit(&id, doc).await?;
            println!("{}", id);
        }
        None => println!("{}", sensors.insert(doc).await?),
    }
    Ok(())
}

async fn import_experiment(
    config: &AppConfig,
    path: &Path,
    id: Option<String>,
    no_sync: bool,
) -> Result<()> {
    let mut experiments = experiments(config)?;
    if !no_sync {
        experiments = experiments.with_sync(sync_service(config)?);
    }
    let doc = read_document(path)?;
    let stored = match id {
        Some(id) => experiments.update(&id, doc).await?,
        None => experiments.insert(doc).await?,
    };
    println!("{}", stored.id);
    match stored.sync {
        Some(report) => finish_report(report),
        None => Ok(()),
    }
}

async fn dry_run(config: &AppConfig, experiment: &str) -> Result<()> {
    let complete = experiments(config)?.complete(experiment).await?;
    print_json(&compile(&complete, &NamingPolicy::from(&config.naming)))
}

async fn sync(config: &AppConfig, experiment: &str) -> Result<()> {
    let complete = experiments(config)?.complete(experiment).await?;
    let report = sync_service(config)?.compile_and_sync(&complete).await?;
    finish_report(report)
}

async fn dashboard(config: &AppConfig, experiment: &str, service: &str) -> Result<()> {
    let backend = InfluxClient::from_config(&config.influx)?;
    let dashboard = DashboardService::new(experiments(config)?, Arc::new(backend), config);
    let results = dashboard.build_dashboard(experiment, service).await?;
    print_json(&results)
}

/// Print one line per route; partial failure is an error exit.
fn finish_report(report: SyncReport) -> Result<()> {
    for outcome in &report.outcomes {
        match &outcome.status {
            RouteStatus::Synced { action, rule } => println!(
                "ok      {:<40} action {:?}, rule {:?}",
                outcome.measurement, action, rule
            ),
            RouteStatus::Failed { stage, error } => println!(
                "FAILED  {:<40} {} step: {}",
                outcome.measurement, stage, error
            ),
        }
    }
    report.ensure_complete()?;
    Ok(())
}
