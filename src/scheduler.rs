use std::fmt::Display;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::error;

/// A repeating timer that keeps firing until dropped.
///
/// The first tick lands one full period after creation. If a callback runs
/// long, the next tick is pushed back rather than fired in a burst.
pub struct Schedule {
    interval: Option<Interval>,
}

impl Schedule {
    pub fn every(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Some(interval),
        }
    }

    /// A schedule that never fires
    pub fn disabled() -> Self {
        Self { interval: None }
    }

    pub fn from_optional(period: Option<Duration>) -> Self {
        match period {
            Some(period) if !period.is_zero() => Self::every(period),
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Logs a failed run of a scheduled task. Never propagates: the schedule keeps going.
pub fn keep_running<T, E: Display>(task: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Error at {task}: {e}");
            None
        }
    }
}
