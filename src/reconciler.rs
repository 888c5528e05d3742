//! Reconciliation: comparing declared registrations against persisted state
//! and applying the override spec §4.3 describes.

use crate::cron::CronSchedule;
use crate::errors::SchedulerError;
use crate::logging::{Field, Level, Logger};
use crate::model::{Registration, SchedulerOptions, SchedulerState, TaskRecord};
use std::collections::HashSet;

/// One field difference detected between a registration and its persisted
/// record, reported in the override log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub name: String,
    pub field: &'static str,
    pub from: String,
    pub to: String,
}

/// Summary of what reconciliation changed, used both to decide whether to
/// log an override event and to build its field list.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<FieldChange>,
    pub first_time: bool,
}

impl ReconciliationReport {
    pub fn is_override(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.modified.is_empty()
    }
}

/// Validates `registrations` and `options`, then mutates `state` in place to
/// match. Must be called from inside a [`crate::store::Transactor::transaction`].
pub fn reconcile(
    state: &mut SchedulerState,
    registrations: &[Registration],
    options: &SchedulerOptions,
    logger: &dyn Logger,
) -> Result<ReconciliationReport, SchedulerError> {
    validate_registrations(registrations)?;

    let poll_interval_ms = resolve_poll_interval(state, options)?;

    let cron_by_task = validate_cron_against_poll_interval(registrations, poll_interval_ms)?;

    let was_first_time = state.tasks.is_empty() && state.poll_interval_ms.is_none();

    let registered_names: HashSet<&str> = registrations.iter().map(|r| r.name.as_str()).collect();
    let persisted_names: HashSet<&str> = state.tasks.iter().map(|t| t.name.as_str()).collect();

    let removed: Vec<String> = persisted_names
        .difference(&registered_names)
        .map(|s| s.to_string())
        .collect();
    let added: Vec<String> = registered_names
        .difference(&persisted_names)
        .map(|s| s.to_string())
        .collect();

    let mut modified = Vec::new();
    for registration in registrations {
        if let Some(existing) = state.task(&registration.name) {
            if existing.cron_expression != registration.cron_expression {
                modified.push(FieldChange {
                    name: registration.name.clone(),
                    field: "cronExpression",
                    from: existing.cron_expression.clone(),
                    to: registration.cron_expression.clone(),
                });
            }
            let new_retry_ms = registration.retry_delay.as_millis() as u64;
            if existing.retry_delay_ms != new_retry_ms {
                modified.push(FieldChange {
                    name: registration.name.clone(),
                    field: "retryDelayMs",
                    from: existing.retry_delay_ms.to_string(),
                    to: new_retry_ms.to_string(),
                });
            }
        }
    }

    state.tasks.retain(|t| registered_names.contains(t.name.as_str()));

    for registration in registrations {
        let retry_delay_ms = registration.retry_delay.as_millis() as u64;
        match state.task_mut(&registration.name) {
            Some(existing) => {
                existing.cron_expression = registration.cron_expression.clone();
                existing.retry_delay_ms = retry_delay_ms;
            }
            None => {
                state.tasks.push(TaskRecord::fresh(
                    registration.name.clone(),
                    registration.cron_expression.clone(),
                    retry_delay_ms,
                ));
            }
        }
    }

    state.poll_interval_ms = Some(poll_interval_ms);
    let _ = cron_by_task;

    let report = ReconciliationReport {
        added,
        removed,
        modified,
        first_time: was_first_time,
    };

    log_report(&report, logger);
    Ok(report)
}

fn validate_registrations(registrations: &[Registration]) -> Result<(), SchedulerError> {
    let mut seen = HashSet::new();
    for registration in registrations {
        if registration.name.trim().is_empty() {
            return Err(SchedulerError::InvalidRegistration {
                task: registration.name.clone(),
                reason: "task name must not be empty".to_string(),
            });
        }
        if !seen.insert(registration.name.as_str()) {
            return Err(SchedulerError::InvalidRegistration {
                task: registration.name.clone(),
                reason: "duplicate task name".to_string(),
            });
        }
        if registration.retry_delay.is_zero() {
            return Err(SchedulerError::NegativeRetryDelay {
                task: registration.name.clone(),
            });
        }
    }
    Ok(())
}

fn resolve_poll_interval(state: &SchedulerState, options: &SchedulerOptions) -> Result<u64, SchedulerError> {
    if let Some(requested) = options.poll_interval_ms {
        if requested == 0 {
            return Err(SchedulerError::InvalidPollInterval { requested_ms: requested });
        }
    }

    match (state.poll_interval_ms, options.poll_interval_ms) {
        (Some(current), Some(requested)) if current != requested => Err(SchedulerError::PollingFrequencyChange {
            current_interval_ms: current,
            requested_interval_ms: requested,
        }),
        (Some(current), _) => Ok(current),
        (None, Some(requested)) => Ok(requested),
        (None, None) => Ok(crate::model::DEFAULT_POLL_INTERVAL_MS),
    }
}

fn validate_cron_against_poll_interval(
    registrations: &[Registration],
    poll_interval_ms: u64,
) -> Result<Vec<(String, CronSchedule)>, SchedulerError> {
    let mut parsed = Vec::with_capacity(registrations.len());
    for registration in registrations {
        let cron = CronSchedule::parse(&registration.cron_expression).map_err(|e| SchedulerError::CronExpressionInvalid {
            task: registration.name.clone(),
            expression: registration.cron_expression.clone(),
            reason: e.to_string(),
        })?;

        let minimum_interval_ms = cron.minimum_interval_ms();
        if minimum_interval_ms < poll_interval_ms {
            return Err(SchedulerError::ScheduleTask {
                task: registration.name.clone(),
                minimum_interval_ms,
                poll_interval_ms,
            });
        }

        parsed.push((registration.name.clone(), cron));
    }
    Ok(parsed)
}

fn log_report(report: &ReconciliationReport, logger: &dyn Logger) {
    if report.first_time {
        logger.log(
            Level::Info,
            "first-time initialization",
            &[
                Field::new("taskCount", report.added.len()),
                Field::new("tasks", report.added.join(",")),
            ],
        );
        return;
    }

    if !report.is_override() {
        return;
    }

    let removed_list = report.removed.join(",");
    let added_list = report.added.join(",");
    let modified_list = report
        .modified
        .iter()
        .map(|c| format!("{}.{}:{}->{}", c.name, c.field, c.from, c.to))
        .collect::<Vec<_>>()
        .join(",");

    logger.log(
        Level::Info,
        "reconciliation override",
        &[
            Field::new("removedTasks", removed_list),
            Field::new("addedTasks", added_list),
            Field::new("modifiedTasks", modified_list),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::TracingLogger;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn reg(name: &str, cron: &str, retry_secs: u64) -> Registration {
        Registration::new(name, cron, Duration::from_secs(retry_secs), || async { Ok(()) })
    }

    fn epoch() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn first_time_initialization_creates_all_tasks() {
        let mut state = SchedulerState::empty(epoch());
        let registrations = vec![reg("A", "0 * * * *", 300), reg("B", "0 0 * * *", 600)];
        let report = reconcile(&mut state, &registrations, &SchedulerOptions::default(), &TracingLogger).unwrap();

        assert!(report.first_time);
        assert_eq!(state.tasks.len(), 2);
        assert_eq!(state.poll_interval_ms, Some(crate::model::DEFAULT_POLL_INTERVAL_MS));
    }

    #[test]
    fn idempotent_reconciliation_reports_no_override() {
        let mut state = SchedulerState::empty(epoch());
        let registrations = vec![reg("A", "0 * * * *", 300)];
        reconcile(&mut state, &registrations, &SchedulerOptions::default(), &TracingLogger).unwrap();

        let report = reconcile(&mut state, &registrations, &SchedulerOptions::default(), &TracingLogger).unwrap();
        assert!(!report.is_override());
        assert!(!report.first_time);
    }

    #[test]
    fn override_detects_added_removed_and_modified() {
        let mut state = SchedulerState::empty(epoch());
        let first = vec![reg("A", "0 * * * *", 300), reg("B", "0 0 * * *", 600)];
        reconcile(&mut state, &first, &SchedulerOptions::default(), &TracingLogger).unwrap();

        let second = vec![reg("A", "0 0 * * *", 300), reg("C", "0 0 * * *", 600)];
        let report = reconcile(&mut state, &second, &SchedulerOptions::default(), &TracingLogger).unwrap();

        assert_eq!(report.removed, vec!["B".to_string()]);
        assert_eq!(report.added, vec!["C".to_string()]);
        assert_eq!(report.modified.len(), 1);
        assert_eq!(report.modified[0].field, "cronExpression");
    }

    #[test]
    fn preserves_history_of_tasks_present_in_both() {
        let mut state = SchedulerState::empty(epoch());
        let first = vec![reg("A", "0 * * * *", 300)];
        reconcile(&mut state, &first, &SchedulerOptions::default(), &TracingLogger).unwrap();
        state.task_mut("A").unwrap().last_success_time = Some(epoch());

        let second = vec![reg("A", "0 0 * * *", 300)];
        reconcile(&mut state, &second, &SchedulerOptions::default(), &TracingLogger).unwrap();

        assert_eq!(state.task("A").unwrap().last_success_time, Some(epoch()));
    }

    #[test]
    fn poll_interval_set_once_then_locked() {
        let mut state = SchedulerState::empty(epoch());
        let registrations = vec![reg("A", "0 * * * *", 300)];
        let options = SchedulerOptions { poll_interval_ms: Some(60_000) };
        reconcile(&mut state, &registrations, &options, &TracingLogger).unwrap();

        let conflicting = SchedulerOptions { poll_interval_ms: Some(120_000) };
        let err = reconcile(&mut state, &registrations, &conflicting, &TracingLogger).unwrap_err();
        match err {
            SchedulerError::PollingFrequencyChange { current_interval_ms, requested_interval_ms } => {
                assert_eq!(current_interval_ms, 60_000);
                assert_eq!(requested_interval_ms, 120_000);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn cron_faster_than_poll_interval_is_rejected() {
        let mut state = SchedulerState::empty(epoch());
        let registrations = vec![reg("A", "* * * * *", 300)];
        let options = SchedulerOptions { poll_interval_ms: Some(120_000) };
        let err = reconcile(&mut state, &registrations, &options, &TracingLogger).unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleTask { .. }));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut state = SchedulerState::empty(epoch());
        let registrations = vec![reg("", "* * * * *", 300)];
        let err = reconcile(&mut state, &registrations, &SchedulerOptions::default(), &TracingLogger).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRegistration { .. }));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut state = SchedulerState::empty(epoch());
        let registrations = vec![reg("A", "* * * * *", 300), reg("A", "0 * * * *", 300)];
        let err = reconcile(&mut state, &registrations, &SchedulerOptions::default(), &TracingLogger).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRegistration { .. }));
    }
}
