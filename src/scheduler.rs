//! The scheduler façade: the only public surface most callers need.
//! `Scheduler::new` takes its three capabilities directly, the way
//! `MaintenanceScheduler::new` takes its collaborators as `Arc`s.

use crate::clock::Clock;
use crate::cron::CronSchedule;
use crate::errors::SchedulerError;
use crate::logging::{Level, Logger};
use crate::model::{Registration, SchedulerOptions};
use crate::poller::Poller;
use crate::reconciler::reconcile;
use crate::store::{StateStore, Transactor};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct RunningLoop {
    cancel: CancellationToken,
    tracker: TaskTracker,
    handle: tokio::task::JoinHandle<()>,
}

/// Declarative, persistent cron-style task scheduler.
///
/// Construct once with its three capabilities, call [`Scheduler::initialize`]
/// with the full set of task registrations, and call [`Scheduler::stop`] to
/// shut down. `initialize` may be called again — after `stop`, or while
/// running, to reconcile a changed registration set — and is idempotent for
/// an unchanged registration set.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    transactor: Arc<Transactor>,
    running: StdMutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, logger: Arc<dyn Logger>, store: Arc<dyn StateStore>) -> Self {
        let start_time_if_empty = clock.now();
        Self {
            transactor: Arc::new(Transactor::new(store, start_time_if_empty)),
            clock,
            logger,
            running: StdMutex::new(None),
        }
    }

    /// Loads persisted state, reconciles it against `registrations`, and
    /// persists the reconciled state, only then (re)starting the polling
    /// loop. If a loop is already running it is stopped first — its
    /// in-flight executions are awaited — but not until validation and
    /// reconciliation both succeed, so a rejected call leaves a previously
    /// healthy scheduler's loop running rather than tearing it down and
    /// failing to restart it.
    pub async fn initialize(&self, registrations: Vec<Registration>, options: SchedulerOptions) -> Result<(), SchedulerError> {
        let crons = parse_crons(&registrations)?;

        let logger = self.logger.clone();
        let (_, poll_interval_ms) = self
            .transactor
            .transaction(|state| {
                reconcile(state, &registrations, &options, logger.as_ref())?;
                let poll_interval_ms = state
                    .poll_interval_ms
                    .expect("reconcile always sets poll_interval_ms on success");
                Ok(((), poll_interval_ms))
            })
            .await?;

        // Only tear down a prior running loop once validation and
        // reconciliation have both succeeded, so a rejected re-initialize
        // leaves the existing loop running (spec §7: errors from
        // `initialize` abort without side effects).
        self.stop_running_loop().await;

        let mut poller = Poller::new(
            Duration::from_millis(poll_interval_ms),
            self.transactor.clone(),
            self.clock.clone(),
            self.logger.clone(),
        );
        for (registration, (_, cron)) in registrations.into_iter().zip(crons.into_iter()) {
            let Registration { name, callback, .. } = registration;
            poller.insert_task(name, cron, Arc::new(callback));
        }

        let cancel = poller.cancel_token();
        let tracker = poller.task_tracker();
        let poller = Arc::new(poller);
        let handle = tokio::spawn(poller.run());

        self.logger.log(Level::Info, "polling loop started", &[]);

        *self.running.lock().expect("running lock poisoned") = Some(RunningLoop {
            cancel,
            tracker,
            handle,
        });

        Ok(())
    }

    pub async fn stop(&self) {
        self.stop_running_loop().await;
    }

    async fn stop_running_loop(&self) {
        let running = self.running.lock().expect("running lock poisoned").take();
        if let Some(running) = running {
            running.cancel.cancel();
            let _ = running.handle.await;
            running.tracker.close();
            running.tracker.wait().await;
        }
    }
}

fn parse_crons(registrations: &[Registration]) -> Result<Vec<(String, CronSchedule)>, SchedulerError> {
    registrations
        .iter()
        .map(|r| {
            CronSchedule::parse(&r.cron_expression)
                .map(|cron| (r.name.clone(), cron))
                .map_err(|e| SchedulerError::CronExpressionInvalid {
                    task: r.name.clone(),
                    expression: r.cron_expression.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}
