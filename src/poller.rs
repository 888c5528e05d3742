//! The polling loop: a single long-running activity that wakes up every
//! `pollIntervalMs`, evaluates every task exactly once, and launches
//! eligible tasks as independent concurrent activities.
//!
//! Cancellation follows the `tokio_util::sync::CancellationToken` +
//! `tokio::select!` pattern used for scheduler shutdown across the example
//! corpus; in-flight executions are tracked with a `TaskTracker` so `stop()`
//! can await them without needing to enumerate join handles by hand.

use crate::clock::Clock;
use crate::cron::CronSchedule;
use crate::errors::SchedulerError;
use crate::executor::{
    apply_completion, eligibility, mark_launched, mark_suppressed, should_suppress_first_start, with_task, Eligibility, Outcome,
};
use crate::logging::{Field, Level, Logger};
use crate::store::Transactor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A task's immutable configuration plus its callback, as needed by the
/// poller and executor. Split out of [`Registration`] so the poller can
/// hold an `Arc<BoxedCallback>` without fighting `Registration`'s ownership
/// of the boxed closure.
pub(crate) struct RegisteredTask {
    pub name: String,
    pub cron: CronSchedule,
    pub callback: Arc<crate::model::BoxedCallback>,
}

/// Drives the polling loop until cancelled. Owned by [`crate::Scheduler`],
/// which spawns `run` as a background task and holds the `CancellationToken`
/// and `TaskTracker` to implement `stop()`.
pub(crate) struct Poller {
    tasks: HashMap<String, RegisteredTask>,
    order: Vec<String>,
    poll_interval: Duration,
    transactor: Arc<Transactor>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Poller {
    /// Builds a poller for `registrations`, in registration order. Ties
    /// between multiple eligible tasks in one poll cycle are broken by this
    /// order (spec §4.4).
    pub fn new(
        poll_interval: Duration,
        transactor: Arc<Transactor>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            tasks: HashMap::new(),
            order: Vec::new(),
            poll_interval,
            transactor,
            clock,
            logger,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn task_tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    pub fn insert_task(&mut self, name: String, cron: CronSchedule, callback: Arc<crate::model::BoxedCallback>) {
        self.order.push(name.clone());
        self.tasks.insert(name.clone(), RegisteredTask { name, cron, callback });
    }

    /// Runs until cancelled. Each iteration: sleep for the poll interval,
    /// then evaluate every task exactly once, in registration order.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.logger.log(Level::Info, "polling loop cancelled", &[]);
                    break;
                }
                _ = self.clock.sleep(self.poll_interval) => {
                    if let Err(e) = self.poll_once().await {
                        self.logger.log(
                            Level::Error,
                            "poll cycle failed",
                            &[Field::new("error", e.to_string())],
                        );
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), SchedulerError> {
        let now = self.clock.now();

        for name in &self.order {
            let Some(registered) = self.tasks.get(name) else {
                continue;
            };

            let decision = self
                .transactor
                .transaction(|state| {
                    let start_time = state.start_time;
                    Ok(with_task(state, name, |task| {
                        if should_suppress_first_start(task, &registered.cron, now) {
                            mark_suppressed(task, start_time);
                            return Eligibility::NotEligible;
                        }

                        let decision = eligibility(task, &registered.cron, now);
                        if matches!(decision, Eligibility::Normal | Eligibility::Retry) {
                            mark_launched(task, now);
                        }
                        decision
                    }))
                })
                .await?;

            if let Some(Eligibility::Normal) | Some(Eligibility::Retry) = decision {
                self.spawn_execution(registered.name.clone(), registered.callback.clone());
            }
        }

        Ok(())
    }

    fn spawn_execution(&self, name: String, callback: Arc<crate::model::BoxedCallback>) {
        let transactor = self.transactor.clone();
        let clock = self.clock.clone();
        let logger = self.logger.clone();

        self.tracker.spawn(async move {
            let result = callback().await;
            let completion_time = clock.now();

            let outcome = match result {
                Ok(()) => Outcome::Success,
                Err(err) => {
                    crate::executor::log_failure(logger.as_ref(), &name, &err);
                    Outcome::Failure(err)
                }
            };

            let saved = transactor
                .transaction(|state| {
                    with_task(state, &name, |task| {
                        apply_completion(task, &outcome, completion_time);
                    });
                    Ok(())
                })
                .await;

            if let Err(e) = saved {
                logger.log(
                    Level::Error,
                    "failed to persist task completion",
                    &[Field::new("task", name.as_str()), Field::new("error", e.to_string())],
                );
            }
        });
    }
}
