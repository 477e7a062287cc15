//! lift CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use lift::report::TerminalReporter;
use lift::{
    Config, DownOptions, Lift, RpcEngine, SaveOptions, SaveOutcome, Selector, UpOptions,
};

#[derive(Parser)]
#[command(name = "lift", version, about = "Reconcile and apply schema migrations")]
struct Cli {
    /// Project directory holding lift.toml, the schema and migrations/
    #[arg(long, global = true, env = "LIFT_PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Schema source, relative to the project directory
    #[arg(long, global = true, env = "LIFT_SCHEMA")]
    schema: Option<PathBuf>,

    /// Migration engine binary
    #[arg(long, global = true, env = "LIFT_ENGINE")]
    engine: Option<String>,

    /// Log level for lift itself (RUST_LOG takes precedence)
    #[arg(long, global = true, env = "LIFT_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Up {
        /// Count, name or timestamp of the last migration to apply
        n: Option<Selector>,
        /// Show the database steps without applying them
        #[arg(long)]
        preview: bool,
        /// Print the raw database steps after applying
        #[arg(short, long)]
        verbose: bool,
    },
    /// Roll back applied migrations
    Down {
        /// Count, name or timestamp of the oldest migration to roll back
        #[arg(default_value = "1")]
        n: Selector,
    },
    /// Save the schema source as a new migration
    Save {
        #[arg(short, long)]
        name: Option<String>,
        /// Show the migration without writing it
        #[arg(long)]
        preview: bool,
    },
    /// Apply every schema edit as a live migration
    Watch,
    /// Show applied, pending and live migrations
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lift={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(&cli.project_dir).context("Failed to load configuration")?;
    if let Some(schema) = cli.schema {
        config.schema = schema;
    }
    if let Some(engine) = cli.engine {
        config.engine.binary = engine;
    }

    let engine = RpcEngine::new(
        config.engine.binary.clone(),
        config.engine.args.clone(),
        cli.project_dir.join(&config.schema),
    );
    let lift = Arc::new(
        Lift::new(&cli.project_dir, config, engine).with_reporter(Arc::new(TerminalReporter::new())),
    );

    let result = dispatch(&lift, cli.command).await;
    lift.stop().await;
    result
}

async fn dispatch(lift: &Arc<Lift<RpcEngine>>, command: Commands) -> Result<()> {
    match command {
        Commands::Up {
            n,
            preview,
            verbose,
        } => {
            let summary = lift
                .up(UpOptions {
                    selector: n,
                    preview,
                    short: false,
                    verbose,
                })
                .await?;
            println!("{}", summary.to_string().green());
        }
        Commands::Down { n } => {
            let summary = lift.down(DownOptions { selector: Some(n) }).await?;
            println!("{}", summary.to_string().green());
        }
        Commands::Save { name, preview } => {
            let outcome = lift.save(SaveOptions { name, preview }).await?;
            match &outcome {
                SaveOutcome::Preview(migration) => {
                    println!("{}", outcome);
                    for step in &migration.database_steps {
                        println!("  {}", step.raw.dimmed());
                    }
                }
                _ => println!("{}", outcome.to_string().green()),
            }
        }
        Commands::Watch => {
            println!("{}", "👀 lift watch".cyan().bold());
            println!("   Watching: {}", lift.schema_path().display().to_string().yellow());
            println!("   Press {} to stop\n", "Ctrl+C".red());

            let handle = lift.clone().watch().await?;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            let stats = handle.stop().await;
            println!(
                "\n{} {} live migration(s) applied, {} failed pass(es)",
                "Stopped.".cyan(),
                stats.applied,
                stats.failed
            );
        }
        Commands::Status => {
            let report = lift.status().await?;
            println!("{}", "📋 Migration Status".cyan().bold());
            println!("{}", report);
        }
    }
    Ok(())
}
