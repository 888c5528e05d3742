//! The data model: caller-supplied registrations, persisted task records, and
//! the scheduler's persisted root state.
//!
//! `camelCase` on the wire matches the persisted-format field names this
//! codebase's tests assert on; Rust-side fields stay snake_case, following
//! the `#[serde(rename_all = "camelCase")]` convention `manager`'s config and
//! database record structs use.

use crate::errors::CallbackError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A nullary asynchronous callback, boxed so `Registration` can hold a
/// heterogeneous set of task bodies.
pub type BoxedCallback =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send>> + Send + Sync>;

/// Caller input describing one task. Immutable once passed to
/// [`crate::Scheduler::initialize`].
pub struct Registration {
    pub name: String,
    pub cron_expression: String,
    pub callback: BoxedCallback,
    pub retry_delay: Duration,
}

impl Registration {
    /// Wraps a plain async closure as a `Registration`. The closure is
    /// called fresh on every execution, so it must be `Fn`, not `FnOnce`.
    pub fn new<F, Fut>(name: impl Into<String>, cron_expression: impl Into<String>, retry_delay: Duration, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            retry_delay,
            callback: Box::new(move || Box::pin(callback())),
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("cron_expression", &self.cron_expression)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

/// Persisted, mutable per-task execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub name: String,
    pub cron_expression: String,
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub last_attempt_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub running: bool,
}

impl TaskRecord {
    /// A brand-new record for a task with no prior execution history.
    pub fn fresh(name: impl Into<String>, cron_expression: impl Into<String>, retry_delay_ms: u64) -> Self {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            retry_delay_ms,
            last_attempt_time: None,
            last_success_time: None,
            last_failure_time: None,
            running: false,
        }
    }
}

/// Persisted root state: the whole durable snapshot a [`crate::store::StateStore`]
/// reads and writes atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub version: u32,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

/// Schema version written by this codebase. Bumped if the persisted shape
/// ever changes incompatibly; readers ignore unknown fields regardless.
pub const STATE_VERSION: u32 = 1;

impl SchedulerState {
    /// The empty state synthesized the first time a store has nothing
    /// persisted yet.
    pub fn empty(start_time: DateTime<Utc>) -> Self {
        Self {
            version: STATE_VERSION,
            start_time,
            poll_interval_ms: None,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }
}

/// Options accepted by [`crate::Scheduler::initialize`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    pub poll_interval_ms: Option<u64>,
}

/// Default poll interval when `initialize` is never given an explicit one.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_json() {
        let mut state = SchedulerState::empty(Utc::now());
        state.poll_interval_ms = Some(1_000);
        state.tasks.push(TaskRecord::fresh("T", "0 * * * *", 300_000));

        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: SchedulerState = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.version, state.version);
        assert_eq!(decoded.poll_interval_ms, state.poll_interval_ms);
        assert_eq!(decoded.tasks, state.tasks);
    }

    #[test]
    fn unknown_fields_are_ignored_on_read() {
        let json = r#"{
            "version": 1,
            "startTime": "2021-01-01T00:00:00Z",
            "pollIntervalMs": 1000,
            "tasks": [],
            "somethingFromTheFuture": 42
        }"#;
        let decoded: SchedulerState = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.tasks.len(), 0);
    }

    #[test]
    fn absent_fields_serialize_as_null() {
        let record = TaskRecord::fresh("T", "* * * * *", 1_000);
        let encoded = serde_json::to_string(&record).unwrap();
        assert!(encoded.contains("\"lastAttemptTime\":null"));
    }

    #[test]
    fn task_lookup_by_name() {
        let mut state = SchedulerState::empty(Utc::now());
        state.tasks.push(TaskRecord::fresh("A", "* * * * *", 1));
        assert!(state.task("A").is_some());
        assert!(state.task("B").is_none());
        state.task_mut("A").unwrap().running = true;
        assert!(state.task("A").unwrap().running);
    }
}
