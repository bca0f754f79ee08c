// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use taskloom_core::domain::{CategoryId, TaskId};

/// Command-line arguments for `taskloom`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskloom",
    version,
    about = "Recurring task scheduler with dependency-aware ordering.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). Missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = "taskloom.toml")]
    pub config: PathBuf,

    /// Override `storage.path` from the config.
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKLOOM_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Recover state, then run the scheduler until Ctrl-C.
    Run,

    /// Create a task.
    Add(AddArgs),

    /// List tasks.
    List {
        /// Include completed, failed and cancelled tasks.
        #[arg(long)]
        all: bool,
    },

    /// Show the execution history of a task.
    History { id: TaskId },

    /// Make TASK wait for PREREQUISITE.
    Depend {
        task: TaskId,
        prerequisite: TaskId,
    },

    /// Cancel a pending task.
    Cancel { id: TaskId },

    /// Delete a task and its history.
    Delete { id: TaskId },

    /// Manage categories.
    #[command(subcommand)]
    Category(CategoryCommand),
}

#[derive(Debug, Clone, Args)]
pub struct AddArgs {
    pub title: String,

    /// Shell command to run (`sh -c`).
    #[arg(long, value_name = "CMD")]
    pub command: String,

    /// First due time (RFC 3339). Default: now, or the next cron match.
    #[arg(long, value_name = "TIME")]
    pub at: Option<DateTime<Utc>>,

    /// Repeat every N seconds.
    #[arg(long, value_name = "SECS", conflicts_with = "cron")]
    pub every: Option<u64>,

    /// Repeat on a 5-field cron expression (UTC).
    #[arg(long, value_name = "EXPR")]
    pub cron: Option<String>,

    /// Prerequisite task. Repeatable.
    #[arg(long = "after", value_name = "TASK")]
    pub after: Vec<TaskId>,

    #[arg(long, value_name = "CATEGORY")]
    pub category: Option<CategoryId>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CategoryCommand {
    /// Create a category and print its id.
    Add { name: String },

    /// List categories.
    List,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_prerequisites() {
        let a = TaskId::new(1);
        let b = TaskId::new(2);
        let args = CliArgs::try_parse_from([
            "taskloom".to_string(),
            "add".to_string(),
            "deploy".to_string(),
            "--command".to_string(),
            "make deploy".to_string(),
            "--every".to_string(),
            "3600".to_string(),
            "--after".to_string(),
            a.to_string(),
            "--after".to_string(),
            b.to_string(),
        ])
        .unwrap();

        let Command::Add(add) = args.command else {
            panic!("expected add");
        };
        assert_eq!(add.title, "deploy");
        assert_eq!(add.every, Some(3600));
        assert_eq!(add.after, vec![a, b]);
        assert!(add.at.is_none());
        assert_eq!(args.config, PathBuf::from("taskloom.toml"));
    }

    #[test]
    fn every_and_cron_conflict() {
        let err = CliArgs::try_parse_from([
            "taskloom", "add", "x", "--command", "true", "--every", "60", "--cron", "* * * * *",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn global_options_and_log_level() {
        let args =
            CliArgs::try_parse_from(["taskloom", "--db", "x.db", "--log-level", "debug", "run"])
                .unwrap();
        assert_eq!(args.db, Some(PathBuf::from("x.db")));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(matches!(args.command, Command::Run));
    }

    #[test]
    fn rejects_malformed_task_id() {
        assert!(CliArgs::try_parse_from(["taskloom", "cancel", "not-an-id"]).is_err());
    }
}
