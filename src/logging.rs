//! Structured logging, injected as a capability rather than called as a
//! global `tracing!` macro from inside the scheduler core.
//!
//! The teacher calls `tracing::info!`/`warn!`/`error!` directly throughout
//! `manager`. Here those calls live behind a `Logger` trait so the core
//! never assumes a global subscriber is installed and a test can swap in a
//! capturing implementation.

use std::fmt;

/// Severity of a logged event, mirroring `tracing`'s levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// A single structured field attached to a log event.
#[derive(Debug, Clone)]
pub struct Field {
    pub key: &'static str,
    pub value: String,
}

impl Field {
    pub fn new(key: &'static str, value: impl fmt::Display) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

/// Emits structured log events. Implementors must be `Send + Sync` since the
/// scheduler shares a `Logger` across the poller, executor, and reconciler.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: &[Field]);

    fn debug(&self, message: &str, fields: &[Field]) {
        self.log(Level::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: &[Field]) {
        self.log(Level::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: &[Field]) {
        self.log(Level::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: &[Field]) {
        self.log(Level::Error, message, fields);
    }
}

/// Delegates to the `tracing` macros, the way every other component in this
/// codebase's corpus logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: &[Field]) {
        match level {
            Level::Debug => {
                tracing::debug!(fields = ?DisplayFields(fields), "{}", message)
            }
            Level::Info => {
                tracing::info!(fields = ?DisplayFields(fields), "{}", message)
            }
            Level::Warn => {
                tracing::warn!(fields = ?DisplayFields(fields), "{}", message)
            }
            Level::Error => {
                tracing::error!(fields = ?DisplayFields(fields), "{}", message)
            }
        }
    }
}

struct DisplayFields<'a>(&'a [Field]);

impl fmt::Debug for DisplayFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for field in self.0 {
            m.entry(&field.key, &field.value);
        }
        m.finish()
    }
}

/// Installs the process-wide `tracing` subscriber, matching the directive
/// set the teacher's `main.rs` builds (quieting the storage and task-runtime
/// crates this codebase actually depends on).
pub fn init_tracing() -> Result<(), anyhow::Error> {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::from_default_env()
        .add_directive("cronkeeper=info".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("tokio_util=warn".parse()?);

    fmt().with_env_filter(env_filter).init();
    Ok(())
}
