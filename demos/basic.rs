//! Smallest possible use of the scheduler: two tasks, an in-memory store,
//! real wall-clock time, running for a few seconds.
//!
//! Run with `cargo run --example basic`.

use cronkeeper::model::{Registration, SchedulerOptions};
use cronkeeper::{InMemoryStateStore, Scheduler, SystemClock, TracingLogger};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt().init();

    let clock = Arc::new(SystemClock::new());
    let logger = Arc::new(TracingLogger::new());
    let store = Arc::new(InMemoryStateStore::new());

    let scheduler = Scheduler::new(clock, logger, store);

    let registrations = vec![
        Registration::new("heartbeat", "* * * * *", Duration::from_secs(30), || async {
            info!("heartbeat");
            Ok(())
        }),
        Registration::new("hourly-report", "0 * * * *", Duration::from_secs(300), || async {
            info!("hourly report generated");
            Ok(())
        }),
    ];

    let options = SchedulerOptions {
        poll_interval_ms: Some(1_000),
    };

    scheduler.initialize(registrations, options).await?;
    info!("scheduler running, polling every second");

    tokio::time::sleep(Duration::from_secs(5)).await;

    scheduler.stop().await;
    info!("scheduler stopped");

    Ok(())
}
