//! Eligibility decisions and the per-task execution transactions: the
//! state-machine logic in spec §4.4 condensed into pure functions plus the
//! two transactional steps (launch, completion) that surround a callback
//! invocation.

use crate::cron::CronSchedule;
use crate::errors::CallbackError;
use crate::logging::{Field, Level, Logger};
use crate::model::{SchedulerState, TaskRecord};
use chrono::{DateTime, Utc};

/// Why a task is eligible to run right now, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Normal,
    Retry,
    NotEligible,
}

/// Decides whether `task` should run at `now`, given its cron schedule.
///
/// Mirrors spec §4.4 "Eligibility" exactly: normal eligibility takes
/// precedence over retry eligibility, and a new cron firing since the last
/// failure always supersedes a pending retry.
pub fn eligibility(task: &TaskRecord, cron: &CronSchedule, now: DateTime<Utc>) -> Eligibility {
    if task.running {
        return Eligibility::NotEligible;
    }

    let last_due = cron.last_firing_at_or_before(now);

    if task.last_attempt_time.is_none() {
        // Handled by `suppress_first_start`, never as a normal/retry execution.
        return Eligibility::NotEligible;
    }

    let attempt = task.last_attempt_time.unwrap();

    if let Some(due) = last_due {
        if attempt < due {
            return Eligibility::Normal;
        }
    }

    if let Some(failure) = task.last_failure_time {
        let success_is_newer = task.last_success_time.map(|s| s >= failure).unwrap_or(false);
        if success_is_newer {
            return Eligibility::NotEligible;
        }

        let retry_elapsed = now.signed_duration_since(failure).num_milliseconds() >= task.retry_delay_ms as i64;
        let superseded = last_due.map(|due| due > failure).unwrap_or(false);

        if retry_elapsed && !superseded {
            return Eligibility::Retry;
        }
    }

    Eligibility::NotEligible
}

/// True iff `task` should have its first attempt suppressed right now: it
/// has never been attempted and a cron firing at or before `now` exists.
/// Stamps `last_attempt_time` to `start_time` so no execution is launched.
pub fn should_suppress_first_start(task: &TaskRecord, cron: &CronSchedule, now: DateTime<Utc>) -> bool {
    task.last_attempt_time.is_none() && cron.last_firing_at_or_before(now).is_some()
}

/// Result of a completed callback invocation.
pub enum Outcome {
    Success,
    Failure(CallbackError),
}

/// Marks `task` as launched: `running = true`, `last_attempt_time = now`.
/// Called inside a transaction, after re-checking eligibility against the
/// freshly loaded state (spec §4.4 step 1, guards against crash-recovery
/// drift between the poll decision and the transaction's own read).
pub fn mark_launched(task: &mut TaskRecord, now: DateTime<Utc>) {
    task.running = true;
    task.last_attempt_time = Some(now);
}

/// Stamps the suppression attempt without launching anything.
pub fn mark_suppressed(task: &mut TaskRecord, start_time: DateTime<Utc>) {
    task.last_attempt_time = Some(start_time);
}

/// Applies a completion outcome to `task`. Called inside a transaction.
pub fn apply_completion(task: &mut TaskRecord, outcome: &Outcome, completion_time: DateTime<Utc>) {
    match outcome {
        Outcome::Success => {
            task.last_success_time = Some(completion_time);
            if let Some(failure) = task.last_failure_time {
                if failure < completion_time {
                    task.last_failure_time = None;
                }
            }
            task.running = false;
        }
        Outcome::Failure(_) => {
            task.last_failure_time = Some(completion_time);
            task.running = false;
        }
    }
}

/// Finds the state's task named `name` and applies the reconciliation
/// logic shared by launch and completion updates: re-fetch, mutate,
/// nothing else. Returns `None` if the task was removed by a concurrent
/// reconciliation (extremely unlikely given the scheduler's lifecycle, but
/// a transaction must tolerate it rather than panic).
pub fn with_task<T>(state: &mut SchedulerState, name: &str, f: impl FnOnce(&mut TaskRecord) -> T) -> Option<T> {
    state.task_mut(name).map(f)
}

/// Logs a callback failure at warn level with the task name and message,
/// per spec §7 ("never propagated").
pub fn log_failure(logger: &dyn Logger, task_name: &str, error: &CallbackError) {
    logger.log(
        Level::Warn,
        "task callback failed",
        &[Field::new("task", task_name), Field::new("error", &error.message)],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskRecord;
    use chrono::TimeZone;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn hourly() -> CronSchedule {
        CronSchedule::parse("0 * * * *").unwrap()
    }

    #[test]
    fn first_attempt_is_not_normal_or_retry_eligible() {
        let task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        let cron = hourly();
        assert_eq!(eligibility(&task, &cron, dt(2021, 1, 1, 1, 0)), Eligibility::NotEligible);
        assert!(should_suppress_first_start(&task, &cron, dt(2021, 1, 1, 1, 0)));
    }

    #[test]
    fn not_due_yet_is_neither_eligible_nor_suppressed() {
        let task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        let cron = hourly();
        assert!(!should_suppress_first_start(&task, &cron, dt(2021, 1, 1, 0, 5)));
        assert_eq!(eligibility(&task, &cron, dt(2021, 1, 1, 0, 5)), Eligibility::NotEligible);
    }

    #[test]
    fn normal_eligible_after_suppressed_attempt_and_new_firing() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        task.last_attempt_time = Some(dt(2021, 1, 1, 0, 5));
        let cron = hourly();
        assert_eq!(eligibility(&task, &cron, dt(2021, 1, 1, 1, 0)), Eligibility::Normal);
    }

    #[test]
    fn running_task_is_never_eligible() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        task.last_attempt_time = Some(dt(2021, 1, 1, 0, 5));
        task.running = true;
        let cron = hourly();
        assert_eq!(eligibility(&task, &cron, dt(2021, 1, 1, 1, 0)), Eligibility::NotEligible);
    }

    #[test]
    fn retry_not_eligible_before_delay_elapses() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        task.last_attempt_time = Some(dt(2021, 1, 1, 1, 0));
        task.last_failure_time = Some(dt(2021, 1, 1, 1, 0));
        let cron = hourly();
        assert_eq!(eligibility(&task, &cron, dt(2021, 1, 1, 1, 3)), Eligibility::NotEligible);
    }

    #[test]
    fn retry_eligible_once_delay_elapses() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        task.last_attempt_time = Some(dt(2021, 1, 1, 1, 0));
        task.last_failure_time = Some(dt(2021, 1, 1, 1, 0));
        let cron = hourly();
        assert_eq!(eligibility(&task, &cron, dt(2021, 1, 1, 1, 5)), Eligibility::Retry);
    }

    #[test]
    fn retry_superseded_by_new_cron_firing() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        task.last_attempt_time = Some(dt(2021, 1, 1, 1, 0));
        task.last_failure_time = Some(dt(2021, 1, 1, 1, 0));
        let cron = hourly();
        // at 02:00 a new firing has occurred; normal eligibility governs instead.
        assert_eq!(eligibility(&task, &cron, dt(2021, 1, 1, 2, 0)), Eligibility::Normal);
    }

    #[test]
    fn success_clears_older_failure() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        task.last_failure_time = Some(dt(2021, 1, 1, 1, 0));
        task.running = true;
        apply_completion(&mut task, &Outcome::Success, dt(2021, 1, 1, 1, 5));
        assert!(task.last_failure_time.is_none());
        assert!(!task.running);
    }

    #[test]
    fn failure_sets_failure_time_and_clears_running() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        task.running = true;
        apply_completion(&mut task, &Outcome::Failure(CallbackError::new("boom")), dt(2021, 1, 1, 1, 5));
        assert_eq!(task.last_failure_time, Some(dt(2021, 1, 1, 1, 5)));
        assert!(!task.running);
    }

    #[test]
    fn mark_launched_sets_running_and_attempt() {
        let mut task = TaskRecord::fresh("T", "0 * * * *", 300_000);
        mark_launched(&mut task, dt(2021, 1, 1, 1, 0));
        assert!(task.running);
        assert_eq!(task.last_attempt_time, Some(dt(2021, 1, 1, 1, 0)));
    }
}
