//! Minimal demonstration host for the `cronkeeper` scheduler core.
//!
//! Mirrors `manager/src/main.rs`'s startup sequence (install tracing, load
//! config, build collaborators, run until signalled) but carries no
//! HTTP/web surface — the scheduler core has none, and this binary's only
//! job is to prove the crate boots and runs tasks from a config file.

use cronkeeper::config::{Config, TaskKind};
use cronkeeper::errors::CallbackError;
use cronkeeper::logging::init_tracing;
use cronkeeper::model::{Registration, SchedulerOptions};
use cronkeeper::{Scheduler, SqliteStateStore, SystemClock, TracingLogger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing()?;

    info!("starting cronkeeperd");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "cronkeeperd.toml".to_string());
    let config = Config::load(&config_path).await?;
    info!(tasks = config.tasks.len(), "configuration loaded");

    let store = Arc::new(SqliteStateStore::new(&config.database_path).await?);
    let clock = Arc::new(SystemClock::new());
    let logger = Arc::new(TracingLogger::new());

    let scheduler = Scheduler::new(clock, logger, store);

    let registrations = config
        .tasks
        .iter()
        .map(|task| build_registration(task.name.clone(), task.cron.clone(), task.retry_delay_secs, task.kind))
        .collect();

    let options = SchedulerOptions {
        poll_interval_ms: config.poll_interval_seconds.map(|s| s * 1_000),
    };

    scheduler.initialize(registrations, options).await?;
    info!("scheduler initialized, running until Ctrl-C");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scheduler.stop().await;
    info!("cronkeeperd stopped");

    Ok(())
}

/// Builds a [`Registration`] for one of the small set of illustrative
/// callbacks a config file can select via `kind`.
fn build_registration(name: String, cron: String, retry_delay_secs: u64, kind: TaskKind) -> Registration {
    let retry_delay = Duration::from_secs(retry_delay_secs);

    match kind {
        TaskKind::Log => {
            let label = name.clone();
            Registration::new(name, cron, retry_delay, move || {
                let label = label.clone();
                async move {
                    info!(task = %label, "scheduled task fired");
                    Ok(())
                }
            })
        }
        TaskKind::Noop => Registration::new(name, cron, retry_delay, || async { Ok(()) }),
        TaskKind::Flaky => {
            let failed_once = Arc::new(AtomicBool::new(false));
            Registration::new(name, cron, retry_delay, move || {
                let failed_once = failed_once.clone();
                async move {
                    if failed_once.swap(true, Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(CallbackError::new("simulated first-run failure"))
                    }
                }
            })
        }
    }
}
