//! Error taxonomy for the scheduler core.
//!
//! The source distillation's error table (`spec.md` §7) includes several
//! kinds that only make sense when validating an untyped or dynamically
//! typed input shape (wrong arity, wrong field type, non-callable callback).
//! Once `Registration` and `SchedulerOptions` are proper Rust structs the
//! compiler rejects those shapes before the scheduler ever runs, so this
//! enum keeps only the kinds that remain reachable at runtime.

use std::fmt;

/// Errors surfaced from [`crate::Scheduler::initialize`].
#[derive(Debug)]
pub enum SchedulerError {
    /// A registration's shape was invalid: empty or duplicate name.
    InvalidRegistration { task: String, reason: String },

    /// A registration's cron expression failed to parse.
    CronExpressionInvalid {
        task: String,
        expression: String,
        reason: String,
    },

    /// A registration's retry delay was zero.
    NegativeRetryDelay { task: String },

    /// The requested poll interval was zero.
    InvalidPollInterval { requested_ms: u64 },

    /// A task's cron expression can fire faster than the poll interval.
    ScheduleTask {
        task: String,
        minimum_interval_ms: u64,
        poll_interval_ms: u64,
    },

    /// A second `initialize` call tried to change the poll interval.
    PollingFrequencyChange {
        current_interval_ms: u64,
        requested_interval_ms: u64,
    },

    /// The underlying persistence layer failed.
    Storage { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::InvalidRegistration { task, reason } => {
                write!(f, "invalid registration '{}': {}", task, reason)
            }
            SchedulerError::CronExpressionInvalid {
                task,
                expression,
                reason,
            } => write!(
                f,
                "invalid cron expression for '{}' ('{}'): {}",
                task, expression, reason
            ),
            SchedulerError::NegativeRetryDelay { task } => {
                write!(f, "retry delay for '{}' must be positive", task)
            }
            SchedulerError::InvalidPollInterval { requested_ms } => {
                write!(f, "poll interval must be positive, got {}ms", requested_ms)
            }
            SchedulerError::ScheduleTask {
                task,
                minimum_interval_ms,
                poll_interval_ms,
            } => write!(
                f,
                "task '{}' can fire every {}ms, faster than the poll interval of {}ms",
                task, minimum_interval_ms, poll_interval_ms
            ),
            SchedulerError::PollingFrequencyChange {
                current_interval_ms,
                requested_interval_ms,
            } => write!(
                f,
                "poll interval is fixed at {}ms, cannot change to {}ms",
                current_interval_ms, requested_interval_ms
            ),
            SchedulerError::Storage { reason } => write!(f, "storage error: {}", reason),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// The error a task callback completes with. Only a message is consumed;
/// the scheduler never propagates this outside the executor.
#[derive(Debug, Clone)]
pub struct CallbackError {
    pub message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CallbackError {}

impl From<anyhow::Error> for CallbackError {
    fn from(err: anyhow::Error) -> Self {
        CallbackError::new(err.to_string())
    }
}
