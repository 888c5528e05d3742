//! Time abstraction so the scheduler core never touches wall time directly.
//!
//! Grounded in the teacher's pervasive `tokio::time` usage (`manager`'s
//! scheduler awaits `tokio::time::sleep` between polls); the trait wrapper
//! itself follows the capability-injection style used for `async-trait`
//! object-safe traits in `sblanchard-SerialAgent` and `mofa-org-mofa`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Source of the current time and of cancellable delays.
///
/// Implementations must be cheap to clone (behind `Arc`) and safe to call
/// from multiple tasks concurrently.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends the calling task for `duration`. A `VirtualClock` resolves
    /// this as soon as its simulated time reaches or passes the deadline,
    /// regardless of real elapsed time.
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock time, backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A manually driven clock for deterministic tests.
///
/// `sleep` never touches real time: it computes the deadline and waits on a
/// `tokio::sync::watch` channel that only changes when `advance`/`set` is
/// called, so a test can fast-forward the scheduler through days of
/// simulated polling in milliseconds of real time.
#[derive(Clone)]
pub struct VirtualClock {
    tx: Arc<Mutex<watch::Sender<DateTime<Utc>>>>,
    rx: watch::Receiver<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (tx, rx) = watch::channel(start);
        Self {
            tx: Arc::new(Mutex::new(tx)),
            rx,
        }
    }

    /// Moves simulated time forward by `delta`, waking any pending sleepers
    /// whose deadline has now been reached.
    pub fn advance(&self, delta: chrono::Duration) {
        let tx = self.tx.lock().expect("virtual clock mutex poisoned");
        let next = *tx.borrow() + delta;
        tx.send(next).ok();
    }

    /// Jumps simulated time directly to `t`. Must be monotonically
    /// non-decreasing; callers that need to rewind should build a fresh
    /// `VirtualClock` instead.
    pub fn set(&self, t: DateTime<Utc>) {
        let tx = self.tx.lock().expect("virtual clock mutex poisoned");
        tx.send(t).ok();
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.rx.borrow()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        if deadline <= self.now() {
            return;
        }
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|&t| t >= deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn system_clock_sleeps_for_real_time() {
        let clock = SystemClock::new();
        let start = std::time::Instant::now();
        clock.sleep(Duration::from_millis(10)).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn virtual_clock_sleep_resolves_on_advance() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = VirtualClock::new(start);
        let clock2 = clock.clone();

        let handle = tokio::spawn(async move {
            clock2.sleep(Duration::from_secs(60)).await;
        });

        tokio::task::yield_now().await;
        clock.advance(chrono::Duration::seconds(30));
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        clock.advance(chrono::Duration::seconds(31));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn virtual_clock_sleep_is_noop_for_past_deadline() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = VirtualClock::new(start);
        clock.sleep(Duration::from_secs(0)).await;
    }
}
