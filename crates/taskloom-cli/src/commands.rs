// src/commands.rs

//! Subcommand handlers. Every command works against the SQLite store named in
//! the config; `run` is the long-lived one.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use taskloom_core::domain::{CronSchedule, NewTask, Task, TaskId};
use taskloom_core::impls::SqliteTaskStore;
use taskloom_core::{Scheduler, SchedulerBuilder, TaskloomConfig};

use crate::cli::{AddArgs, CategoryCommand, CliArgs, Command};
use crate::executor::{ShellExecutor, command_of};

pub async fn dispatch(args: CliArgs) -> Result<()> {
    let mut config = TaskloomConfig::load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(db) = args.db {
        config.storage.path = db;
    }

    let store = SqliteTaskStore::open(&config.storage.path)
        .with_context(|| format!("opening task store {}", config.storage.path.display()))?;
    let scheduler = SchedulerBuilder::new()
        .config(&config)
        .store(Arc::new(store))
        .executor(Arc::new(ShellExecutor::new()))
        .build()
        .context("building scheduler")?;

    match args.command {
        Command::Run => run(scheduler).await,
        Command::Add(add) => add_task(&scheduler, add).await,
        Command::List { all } => list_tasks(&scheduler, all).await,
        Command::History { id } => history(&scheduler, id).await,
        Command::Depend { task, prerequisite } => {
            scheduler.rebuild_graph().await?;
            scheduler
                .add_prerequisite(task, prerequisite)
                .await
                .with_context(|| format!("making {task} wait for {prerequisite}"))?;
            Ok(())
        }
        Command::Cancel { id } => {
            scheduler
                .cancel_task(id)
                .await
                .with_context(|| format!("cancelling {id}"))?;
            Ok(())
        }
        Command::Delete { id } => {
            scheduler.rebuild_graph().await?;
            scheduler
                .delete_task(id)
                .await
                .with_context(|| format!("deleting {id}"))?;
            Ok(())
        }
        Command::Category(CategoryCommand::Add { name }) => {
            let id = scheduler.create_category(name).await?;
            println!("{id}");
            Ok(())
        }
        Command::Category(CategoryCommand::List) => {
            for category in scheduler.store().list_categories().await? {
                println!("{}\t{}", category.id, category.name);
            }
            Ok(())
        }
    }
}

async fn run(scheduler: Arc<Scheduler>) -> Result<()> {
    scheduler.recover().await.context("recovering scheduler state")?;

    let shutdown = CancellationToken::new();
    let signal = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, shutting down");
                    shutdown.cancel();
                }
                Err(err) => error!(error = %err, "cannot listen for Ctrl-C"),
            }
        }
    });

    scheduler.run(shutdown).await;
    signal.abort();
    Ok(())
}

async fn add_task(scheduler: &Scheduler, add: AddArgs) -> Result<()> {
    // 他の前提タスクとの循環チェックにはグラフ全体が要る
    scheduler.rebuild_graph().await?;

    let new = new_task(add, Utc::now())?;
    let id = scheduler.create_task(new).await.context("creating task")?;
    println!("{id}");
    Ok(())
}

/// Turn `add` arguments into a `NewTask`. A cron task without `--at` is first
/// due at the next matching minute.
fn new_task(add: AddArgs, now: DateTime<Utc>) -> Result<NewTask> {
    let payload = json!({ "command": add.command });
    let mut new = match (add.every, add.cron) {
        (Some(every), None) => NewTask::interval(add.title, every, add.at.unwrap_or(now)),
        (None, Some(expression)) => {
            let first_due = match add.at {
                Some(at) => at,
                None => match CronSchedule::parse(&expression)?.next_after(now) {
                    Some(at) => at,
                    None => bail!("cron expression {expression:?} never fires"),
                },
            };
            NewTask::cron(add.title, expression, first_due)
        }
        (None, None) => NewTask::once(add.title, add.at.unwrap_or(now)),
        (Some(_), Some(_)) => bail!("--every and --cron are mutually exclusive"),
    }
    .with_payload(payload);

    for prerequisite in add.after {
        new = new.with_prerequisite(prerequisite);
    }
    if let Some(category) = add.category {
        new = new.in_category(category);
    }
    Ok(new)
}

async fn list_tasks(scheduler: &Scheduler, all: bool) -> Result<()> {
    let tasks = if all {
        scheduler.store().list_all().await?
    } else {
        scheduler.store().list_non_terminal().await?
    };
    for task in &tasks {
        println!("{}", task_line(task));
    }
    Ok(())
}

fn task_line(task: &Task) -> String {
    let mut line = format!(
        "{}\t{:<9}\t{}\t{}",
        task.id,
        task.status.as_str(),
        task.due_at.to_rfc3339(),
        task.title
    );
    if !task.prerequisites.is_empty() {
        let after: Vec<String> = task.prerequisites.iter().map(|p| p.to_string()).collect();
        line.push_str(&format!("\tafter={}", after.join(",")));
    }
    if let Some(cmd) = command_of(task) {
        line.push_str(&format!("\t$ {cmd}"));
    }
    line
}

async fn history(scheduler: &Scheduler, id: TaskId) -> Result<()> {
    for record in scheduler.store().history(id).await? {
        println!(
            "#{}\t{}\t{}\t{}ms\t{}",
            record.attempt,
            record.started_at.to_rfc3339(),
            record.outcome.as_str(),
            record.duration().num_milliseconds(),
            record.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
