//! `cronkeeper`: a declarative, persistent cron-style task scheduler.
//!
//! Callers supply a fixed list of task [`Registration`]s up front; the
//! scheduler runs each one's callback at the times its cron expression
//! designates, survives process restarts without losing track of what has
//! already executed, retries failed attempts after a per-task delay, and
//! never runs two instances of the same task concurrently.
//!
//! The public surface is deliberately narrow: [`Scheduler::new`] takes its
//! three capabilities ([`clock::Clock`], [`logging::Logger`],
//! [`store::StateStore`]) directly, [`Scheduler::initialize`] starts the
//! polling loop, and [`Scheduler::stop`] shuts it down.

pub mod clock;
pub mod config;
pub mod cron;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod model;
pub mod poller;
pub mod reconciler;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use errors::{CallbackError, SchedulerError};
pub use logging::{Logger, TracingLogger};
pub use model::{Registration, SchedulerOptions, SchedulerState, TaskRecord};
pub use scheduler::Scheduler;
pub use store::{InMemoryStateStore, SqliteStateStore, StateStore};
