use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    Running,
    Expired,
    Cancelled,
}

impl Default for TimerStatus {
    fn default() -> Self {
        TimerStatus::Running
    }
}

/// Source of wall-clock time for deadline arithmetic.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time derived from a monotonic anchor.
///
/// The baseline is sampled once; afterwards time advances with
/// `tokio::time::Instant`, so a paused runtime pauses the countdown too.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    baseline: DateTime<Utc>,
    anchor: Instant,
}

impl AnchoredClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(baseline: DateTime<Utc>) -> Self {
        Self {
            baseline,
            anchor: Instant::now(),
        }
    }
}

impl Default for AnchoredClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed =
            ChronoDuration::from_std(self.anchor.elapsed()).unwrap_or_else(|_| ChronoDuration::zero());
        self.baseline + elapsed
    }
}

/// Whole seconds left before `deadline`, floored and clamped at zero.
pub fn remaining_seconds(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let remaining_ms = (deadline - now).num_milliseconds();
    if remaining_ms <= 0 {
        0
    } else {
        (remaining_ms / 1000) as u64
    }
}

/// `m:ss` rendering used by countdown displays.
pub fn format_countdown(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
