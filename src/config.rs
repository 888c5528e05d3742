//! TOML configuration for the demonstration binary.
//!
//! Not part of the scheduler core's public contract (spec §6: "no CLI,
//! HTTP, or environment variables are part of the scheduler core"); this
//! exists only so `cronkeeperd` can assemble [`crate::model::Registration`]s
//! from a file instead of hardcoding them, the way `manager/src/config/mod.rs`
//! loads its own TOML config.

use serde::{Deserialize, Serialize};

/// Top-level config file: where to persist state, how often to poll, and
/// the declared task set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file backing the scheduler's state.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Poll interval, in seconds. Passed through as `SchedulerOptions` on
    /// the first `initialize`; unset leaves the scheduler's own default.
    pub poll_interval_seconds: Option<u64>,

    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskSpec>,
}

fn default_database_path() -> String {
    "data/cronkeeper.db".to_string()
}

/// One `[[task]]` table: a registration plus a `kind` selecting which
/// illustrative callback to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub cron: String,
    pub retry_delay_secs: u64,
    pub kind: TaskKind,
}

/// The small set of built-in callbacks `cronkeeperd` can run for demo and
/// smoke-testing purposes. A real host application supplies its own
/// callbacks directly through [`crate::model::Registration::new`] instead of
/// this `kind` indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Logs a message at info level and succeeds.
    Log,
    /// Succeeds immediately without doing anything observable.
    Noop,
    /// Fails on its first invocation (per process), then always succeeds —
    /// useful for exercising the retry path (spec §8 scenario 3) by hand.
    Flaky,
}

impl Config {
    /// Loads and parses `path`. Returns an error with the underlying cause
    /// if the file is missing or malformed.
    pub async fn load(path: &str) -> Result<Self, anyhow::Error> {
        let raw = tokio::fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw = r#"
            database_path = "data/test.db"
            poll_interval_seconds = 5

            [[task]]
            name = "heartbeat"
            cron = "* * * * *"
            retry_delay_secs = 30
            kind = "log"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.database_path, "data/test.db");
        assert_eq!(config.poll_interval_seconds, Some(5));
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.tasks[0].kind, TaskKind::Log);
    }

    #[test]
    fn database_path_defaults_when_absent() {
        let raw = "";
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.database_path, "data/cronkeeper.db");
        assert!(config.tasks.is_empty());
    }
}
