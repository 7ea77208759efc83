//! CLI entry point for the shiftplan schema migration planner.
//! Provides clap-based command routing and exit code mapping based on
//! error type.

mod output;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;

use shiftplan_core::config::{split_list, CliOverrides, ShiftplanConfig};
use shiftplan_core::error::ShiftplanError;
use shiftplan_core::{Shiftplan, UpgradeStatus};

/// Top-level CLI definition with global flags and subcommand dispatch.
#[derive(Parser)]
#[command(
    name = "shiftplan",
    about = "Schema diff and migration planner",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Database URL (overrides config)
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Schemas to load, comma-separated (overrides config)
    #[arg(long, value_name = "SCHEMAS")]
    schemas: Option<String>,

    /// Application version the desired snapshot belongs to
    #[arg(long, value_name = "VERSION", global = true)]
    app_version: Option<String>,

    /// Desired snapshot file
    #[arg(long, value_name = "PATH", global = true)]
    desired: Option<PathBuf>,

    /// Upgrade policy: always, non-production-only, never
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Instance kind recorded on first install: development, test, staging, production
    #[arg(long, value_name = "KIND")]
    instance_kind: Option<String>,

    /// Directory of data migration scripts
    #[arg(long, value_name = "DIR")]
    migrations_dir: Option<PathBuf>,

    /// Drop deployed objects that are absent from the desired snapshot
    #[arg(long)]
    drop_unknown: bool,

    /// Number of retries when connecting to the database
    #[arg(long, value_name = "N")]
    connect_retries: Option<u32>,

    /// SSL/TLS mode: disable, prefer, require
    #[arg(long, value_name = "MODE")]
    ssl_mode: Option<String>,

    /// Connection timeout in seconds (default: 30, 0 = no timeout)
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u32>,

    /// Statement timeout in seconds (default: 0 = no limit)
    #[arg(long, value_name = "SECS")]
    statement_timeout: Option<u32>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// All available shiftplan subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Compare the database with the desired snapshot and list the scripts
    Plan {
        /// Print the SQL of every script
        #[arg(long)]
        sql: bool,
    },

    /// Plan and apply the upgrade
    Upgrade,

    /// Capture the deployed schema
    Snapshot {
        /// Write the snapshot to this file
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Show the recorded schema version and recent upgrade log
    Info {
        /// Number of log rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging (suppress when JSON output is requested)
    let filter = if cli.json {
        "error"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&e);
        process::exit(exit_code(&e));
    }
}

/// Map error types to differentiated exit codes.
fn exit_code(error: &ShiftplanError) -> i32 {
    match error {
        ShiftplanError::ConfigError(_) | ShiftplanError::InvalidVersion(_) => 2,
        ShiftplanError::SnapshotError { .. } | ShiftplanError::JsonError(_) => 3,
        ShiftplanError::DatabaseError(_) => 4,
        ShiftplanError::ScriptFailed { .. } => 5,
        ShiftplanError::UpgradeNotAllowed { .. } => 6,
        ShiftplanError::RenderFailed { .. } | ShiftplanError::InvalidChange(_) => 7,
        _ => 1,
    }
}

fn overrides(cli: &Cli) -> Result<CliOverrides, ShiftplanError> {
    Ok(CliOverrides {
        url: cli.url.clone(),
        schemas: cli.schemas.as_deref().map(split_list),
        app_version: cli.app_version.clone(),
        desired: cli.desired.clone(),
        mode: cli.mode.as_deref().map(str::parse).transpose()?,
        instance_kind: cli.instance_kind.as_deref().map(str::parse).transpose()?,
        migrations_dir: cli.migrations_dir.clone(),
        drop_unknown: cli.drop_unknown.then_some(true),
        connect_retries: cli.connect_retries,
        ssl_mode: cli.ssl_mode.clone(),
        connect_timeout: cli.connect_timeout,
        statement_timeout: cli.statement_timeout,
    })
}

/// Build configuration, connect, and dispatch the chosen subcommand.
async fn run(cli: Cli) -> Result<(), ShiftplanError> {
    let json_output = cli.json;
    let config = ShiftplanConfig::load(cli.config.as_deref(), &overrides(&cli)?)?;
    log::debug!("Resolved configuration; config={:?}", config);

    // Resolve the desired snapshot before connecting so a bad path fails fast
    let target = match &cli.command {
        Commands::Plan { .. } | Commands::Upgrade => {
            Some(shiftplan_core::commands::load_target(&config)?)
        }
        _ => None,
    };

    let sp = Shiftplan::new(config).await?;

    match (&cli.command, target) {
        (Commands::Plan { sql }, Some((desired, version))) => {
            let plan = sp.plan(&desired, &version).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                output::print_plan(&plan, *sql);
            }
        }
        (Commands::Upgrade, Some((desired, version))) => {
            let plan = sp.upgrade(&desired, &version).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                output::print_upgrade_result(&plan);
            }
            if matches!(
                plan.status,
                UpgradeStatus::NotAllowed | UpgradeStatus::HigherVersionDetected
            ) {
                return Err(ShiftplanError::UpgradeNotAllowed {
                    status: plan.status.to_string(),
                });
            }
        }
        (Commands::Snapshot { output: path }, _) => {
            let report = sp.snapshot(path.as_deref()).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_snapshot_report(&report);
            }
        }
        (Commands::Info { limit }, _) => {
            let report = sp.info(*limit).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_info(&report);
            }
        }
        (Commands::Plan { .. } | Commands::Upgrade, None) => {
            unreachable!("target resolved before connecting")
        }
    }

    Ok(())
}

/// Print a formatted error message with actionable hints to stderr.
fn print_error(error: &ShiftplanError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    match error {
        ShiftplanError::ConfigError(_) => {
            eprintln!(
                "{}",
                "Hint: Check your shiftplan.toml or set SHIFTPLAN_DATABASE_URL environment variable."
                    .dimmed()
            );
        }
        ShiftplanError::DatabaseError(_) => {
            eprintln!(
                "{}",
                "Hint: Verify database is running and connection details are correct.".dimmed()
            );
        }
        ShiftplanError::ScriptFailed { .. } => {
            eprintln!(
                "{}",
                "Hint: Scripts applied before the failure were not rolled back. Run 'shiftplan info' to inspect the log."
                    .dimmed()
            );
        }
        ShiftplanError::UpgradeNotAllowed { status } if status == "NotAllowed" => {
            eprintln!(
                "{}",
                "Hint: Pass --mode always or change [upgrade] mode in shiftplan.toml.".dimmed()
            );
        }
        ShiftplanError::UpgradeNotAllowed { .. } => {
            eprintln!(
                "{}",
                "Hint: The database was upgraded by a newer application version. Deploy that version instead."
                    .dimmed()
            );
        }
        _ => {}
    }
}
