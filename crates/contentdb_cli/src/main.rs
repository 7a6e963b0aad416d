//! Operator CLI for the content database core.
//!
//! # Responsibility
//! - Validate model sources against a connection config without touching storage.
//! - Run startup migrations and print the resulting report.

use clap::{Parser, Subcommand};
use contentdb_core::connector::ConnectorRegistry;
use contentdb_core::validation::validate_model_schemas;
use contentdb_core::{
    default_log_level, init_logging, DatabaseConfig, DatabaseManager, ManagerError,
    ModelRegistry, ModelSources, ReservedNames,
};
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "contentdb")]
#[command(version)]
#[command(about = "Validate content models and migrate their storage")]
struct Cli {
    /// Directory for rolling log files; logging stays off when omitted
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate model sources without opening storage
    Check(Inputs),
    /// Initialize every connection, migrate and print the report
    Migrate(Inputs),
    /// List registered models
    Models {
        /// Model sources JSON file
        #[arg(short, long)]
        models: PathBuf,
    },
}

#[derive(clap::Args)]
struct Inputs {
    /// Connection config TOML file
    #[arg(short, long, default_value = "contentdb.toml")]
    config: PathBuf,

    /// Model sources JSON file
    #[arg(short, long)]
    models: PathBuf,
}

impl Inputs {
    fn load(&self) -> Result<(DatabaseConfig, ModelSources), ManagerError> {
        Ok((
            DatabaseConfig::load(&self.config)?,
            ModelSources::load(&self.models)?,
        ))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = init_logging(level, &log_dir.to_string_lossy()) {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    }

    let outcome = match &cli.command {
        Commands::Check(inputs) => check(inputs),
        Commands::Migrate(inputs) => migrate(inputs).await,
        Commands::Models { models } => list_models(models),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error ({:?}): {err}", err.category());
            ExitCode::FAILURE
        }
    }
}

fn check(inputs: &Inputs) -> Result<(), ManagerError> {
    let (config, sources) = inputs.load()?;
    config.validate()?;
    let mut connectors = ConnectorRegistry::new(config);
    connectors.load()?;

    let models = ModelRegistry::from_sources(&sources)?;
    let reserved = ReservedNames::new(connectors.get(None)?.default_timestamps());
    validate_model_schemas(&models, &reserved)?;
    println!("ok: {} models, {} connections", models.len(), connectors.len());
    Ok(())
}

async fn migrate(inputs: &Inputs) -> Result<(), ManagerError> {
    let (config, sources) = inputs.load()?;
    let mut manager = DatabaseManager::new(config, sources);
    manager.initialize().await?;

    let report = manager.migration_report();
    info!(
        "event=cli_migrate module=cli status=ok models={} changed={}",
        report.len(),
        report.structural_changes()
    );
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to render migration report: {err}"),
    }
    manager.destroy().await;
    Ok(())
}

fn list_models(path: &Path) -> Result<(), ManagerError> {
    let models = ModelRegistry::from_sources(&ModelSources::load(path)?)?;
    for model in models.iter() {
        println!(
            "{}\t{}\t{}\t{}",
            model.uid,
            model.collection_name,
            model.connection,
            model.origin.label()
        );
    }
    Ok(())
}
