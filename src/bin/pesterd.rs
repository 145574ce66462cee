//! `pesterd`: the reminder scheduler daemon.
//!
//! With no arguments (or `run`) it starts the dispatch loop and serves
//! until Ctrl+C. The management subcommands (`add`, `list`, `remove`,
//! `enable`, `disable`, `snooze`, `history`) operate on the same store
//! for use while the daemon is stopped; a running daemon picks up their
//! changes on its next start.
//!
//! All tracing output goes to stderr so that stdout stays clean for
//! management command output.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use tokio::task::JoinHandle;
use tracing::info;

use pester::{MissedFirePolicy, NewTask, ReminderService, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None => run_daemon(None).await,
        Some("run") => {
            if args.len() > 3 {
                anyhow::bail!("run takes at most a config file path");
            }
            run_daemon(args.get(2).map(PathBuf::from)).await
        }
        Some("add") => {
            if !(5..=6).contains(&args.len()) {
                anyhow::bail!("add requires <topic> <cron> <message> [title]");
            }
            let m = start_management()?;
            let mut new = NewTask::new(args[2].as_str(), args[3].as_str(), args[4].as_str());
            if let Some(title) = args.get(5) {
                new = new.with_title(title.as_str());
            }
            let task = m.service.create(new)?;
            println!("created reminder: id={} {}", task.id, task);
            m.finish().await
        }
        Some("list") => {
            if args.len() != 2 {
                anyhow::bail!("list takes no arguments");
            }
            let m = start_management()?;
            let tasks = m.service.list()?;
            if tasks.is_empty() {
                println!("no reminder tasks");
            }
            for task in tasks {
                let state = if task.enabled { "on" } else { "off" };
                let last = match task.last_fired_at {
                    Some(at) => fmt_epoch(at, m.tz),
                    None => "never".to_owned(),
                };
                println!("{}\t{}\t{}\tlast fired {}", task.id, state, task, last);
            }
            m.finish().await
        }
        Some(cmd @ ("remove" | "enable" | "disable")) => {
            if args.len() != 3 {
                anyhow::bail!("{cmd} requires a task id");
            }
            let m = start_management()?;
            match cmd {
                "remove" => {
                    m.service.delete(&args[2])?;
                    println!("removed {}", args[2]);
                }
                "enable" => {
                    let task = m.service.enable(&args[2])?;
                    println!("enabled {}", task.id);
                }
                _ => {
                    let task = m.service.disable(&args[2])?;
                    println!("disabled {}", task.id);
                }
            }
            m.finish().await
        }
        Some("snooze") => {
            if args.len() != 4 {
                anyhow::bail!("snooze requires <id> <hours>");
            }
            let hours: u32 = args[3].parse().context("hours must be a whole number")?;
            let m = start_management()?;
            let task = m.service.snooze(&args[2], hours)?;
            let until = task.snoozed_until.unwrap_or_default();
            println!("snoozed {} until {}", task.id, fmt_epoch(until, m.tz));
            m.finish().await
        }
        Some("history") => {
            if !(3..=4).contains(&args.len()) {
                anyhow::bail!("history requires <id> [limit]");
            }
            let limit: usize = match args.get(3) {
                Some(raw) => raw.parse().context("limit must be a whole number")?,
                None => 20,
            };
            let m = start_management()?;
            let records = m.service.history(&args[2], limit)?;
            if records.is_empty() {
                println!("no fire history");
            }
            for rec in records {
                println!("{}\t{:?}\t{}", fmt_epoch(rec.at, m.tz), rec.outcome, rec.detail);
            }
            m.finish().await
        }
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => anyhow::bail!(
            "unknown subcommand `{other}` (use run|add|list|remove|enable|disable|snooze|history)"
        ),
    }
}

async fn run_daemon(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    config.apply_env();

    let (service, join) = ReminderService::start(&config)?;
    info!(
        "pesterd v{} started with {} stored tasks",
        env!("CARGO_PKG_VERSION"),
        service.list()?.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl+C, shutting down...");

    drop(service);
    join.await?;
    info!("pesterd shut down cleanly");
    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<SchedulerConfig> {
    match explicit {
        Some(path) => SchedulerConfig::from_file(&path)
            .with_context(|| format!("cannot load config from {}", path.display())),
        None => {
            let path = SchedulerConfig::default_config_path();
            if path.exists() {
                Ok(SchedulerConfig::from_file(&path)?)
            } else {
                Ok(SchedulerConfig::default())
            }
        }
    }
}

/// Short-lived service for one-shot management commands.
struct Management {
    service: ReminderService,
    join: JoinHandle<()>,
    tz: FixedOffset,
}

fn start_management() -> anyhow::Result<Management> {
    let mut config = load_config(None)?;
    config.apply_env();
    // One-shot commands must not replay fires missed while the daemon
    // was down.
    config.missed_fires = MissedFirePolicy::Skip;
    let tz = config.parsed_timezone()?;
    let (service, join) = ReminderService::start(&config)?;
    Ok(Management { service, join, tz })
}

impl Management {
    async fn finish(self) -> anyhow::Result<()> {
        drop(self.service);
        self.join.await?;
        Ok(())
    }
}

fn fmt_epoch(secs: i64, tz: FixedOffset) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.with_timezone(&tz).to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn print_usage() {
    println!("usage: pesterd [run [config.toml]]");
    println!("       pesterd add <topic> <cron> <message> [title]");
    println!("       pesterd list");
    println!("       pesterd enable|disable|remove <id>");
    println!("       pesterd snooze <id> <hours>");
    println!("       pesterd history <id> [limit]");
}
