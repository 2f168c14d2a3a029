//! Operator CLI for inspecting checkpoints and running backups and restores.
//!
//! # Usage
//!
//! ```bash
//! rewind --data-dir /var/lib/rewind snapshots db main --restore-points
//! rewind backup db main 2024-05-01T12:00:00Z
//! rewind restore db main restored 1714564800000000000
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use rewind::timestamp::{format_timestamp, parse_timestamp, truncate_hour};
use rewind::{Config, DatabaseKey, Engine, Result, RewindError};

#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(about = "Point-in-time recovery for page-range databases", long_about = None)]
struct Args {
    /// Data directory (overrides REWIND_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the day snapshots of a branch
    Snapshots {
        database: String,
        branch: String,
        /// Include the restore points of each day
        #[arg(long)]
        restore_points: bool,
    },
    /// Show the snapshot of the day containing a timestamp
    Snapshot {
        database: String,
        branch: String,
        timestamp: String,
    },
    /// List the committed frames of the rollback log holding a timestamp
    Frames {
        database: String,
        branch: String,
        timestamp: String,
    },
    /// Back up a branch as of a timestamp
    Backup {
        database: String,
        branch: String,
        timestamp: String,
    },
    /// List the backups of a branch
    Backups { database: String, branch: String },
    /// Delete the backup taken at a restore point
    DeleteBackup {
        database: String,
        branch: String,
        timestamp: String,
    },
    /// Restore a branch as of a timestamp into another branch
    Restore {
        database: String,
        branch: String,
        target_branch: String,
        timestamp: String,
        /// Database of the target branch (defaults to the source database)
        #[arg(long)]
        target_database: Option<String>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(error: &RewindError) -> u8 {
    if error.is_not_found() {
        3
    } else if error.is_concurrency() {
        4
    } else if matches!(
        error,
        RewindError::ValidationError(_) | RewindError::ConfigError(_)
    ) {
        2
    } else {
        1
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| RewindError::StorageError(format!("Failed to encode output: {e}")))
}

fn run(args: Args) -> Result<serde_json::Value> {
    let mut config = Config::from_env()?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    let engine = Engine::new(config)?;

    let output = match args.command {
        Command::Snapshots {
            database,
            branch,
            restore_points,
        } => {
            let key = DatabaseKey::new(database, branch)?;
            to_json(&engine.snapshots(&key, restore_points)?)?
        }
        Command::Snapshot {
            database,
            branch,
            timestamp,
        } => {
            let key = DatabaseKey::new(database, branch)?;
            to_json(&engine.snapshot(&key, parse_timestamp(&timestamp)?)?)?
        }
        Command::Frames {
            database,
            branch,
            timestamp,
        } => {
            let key = DatabaseKey::new(database, branch)?;
            let bucket = truncate_hour(parse_timestamp(&timestamp)?);
            let rollback = engine.branch(&key)?.rollback().clone();
            if !rollback.hour_buckets()?.contains(&bucket) {
                return Err(RewindError::ValidationError(format!(
                    "No rollback log for hour {}",
                    format_timestamp(bucket)
                )));
            }

            let log = rollback.reader(bucket);
            let frames: Vec<_> = log
                .frames()?
                .iter()
                .map(|frame| {
                    json!({
                        "timestamp": frame.timestamp,
                        "time": format_timestamp(frame.timestamp),
                        "offset": frame.offset,
                        "size": frame.size,
                    })
                })
                .collect();
            json!({ "bucket": bucket, "path": log.path().display().to_string(), "frames": frames })
        }
        Command::Backup {
            database,
            branch,
            timestamp,
        } => {
            let key = DatabaseKey::new(database, branch)?;
            to_json(&engine.backup(&key, parse_timestamp(&timestamp)?)?)?
        }
        Command::Backups { database, branch } => {
            let key = DatabaseKey::new(database, branch)?;
            to_json(&engine.list_backups(&key)?)?
        }
        Command::DeleteBackup {
            database,
            branch,
            timestamp,
        } => {
            let key = DatabaseKey::new(database, branch)?;
            let timestamp = parse_timestamp(&timestamp)?;
            engine.delete_backup(&key, timestamp)?;
            json!({ "deleted": timestamp })
        }
        Command::Restore {
            database,
            branch,
            target_branch,
            timestamp,
            target_database,
        } => {
            let source = DatabaseKey::new(database.clone(), branch)?;
            let target = DatabaseKey::new(target_database.unwrap_or(database), target_branch)?;
            let point = engine.restore(&source, &target, parse_timestamp(&timestamp)?, |point| {
                Ok(*point)
            })?;
            json!({ "target": target.to_string(), "restorePoint": to_json(&point)? })
        }
    };

    engine.close();
    Ok(output)
}
