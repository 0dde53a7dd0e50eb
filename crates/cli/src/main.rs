//! restcheck CLI - Main Entry Point
//!
//! Runs fixture catalogs against a PostgREST-compatible backend and
//! reports pass/fail statistics.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod client;
mod commands;
mod output;

use commands::{compliance, list, workflow, Context, RunReport};
use output::{print_error, print_success, OutputFormat};

/// restcheck - REST and row-level-security compliance harness
#[derive(Parser)]
#[command(name = "restcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "RESTCHECK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Directory that receives results.json
    #[arg(short, long, default_value = "restcheck-results", global = true)]
    output: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    backend: client::BackendArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog categories and workflow groups
    List,

    /// Run single-call compliance fixtures
    Compliance(compliance::ComplianceArgs),

    /// Run auth-context workflow examples
    Workflow(workflow::WorkflowArgs),

    /// Run both catalogs
    All,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}

/// Returns whether every executed test passed
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = client::load_config(cli.config.as_deref(), &cli.backend)?;
    let backend = client::connect(&config, cli.backend.in_memory)?;
    let ctx = Context {
        config,
        backend,
        format: cli.format,
    };

    let mut report = RunReport::new();
    match &cli.command {
        Commands::List => {
            list::execute(&ctx).await?;
            return Ok(true);
        }
        Commands::Compliance(args) => {
            report.compliance = Some(compliance::execute(&ctx, args).await?);
        }
        Commands::Workflow(args) => {
            report.workflow = Some(workflow::execute(&ctx, args).await?);
        }
        Commands::All => {
            report.compliance = Some(compliance::execute(&ctx, &Default::default()).await?);
            report.workflow = Some(workflow::execute(&ctx, &Default::default()).await?);
        }
    }

    let path = report.write(&cli.output)?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            if report.passed() {
                print_success(&format!("All tests passed ({})", path.display()));
            } else {
                print_error(&format!("Some tests failed ({})", path.display()));
            }
        }
    }
    Ok(report.passed())
}
