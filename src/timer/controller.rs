use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use super::{remaining_seconds, Clock, TimerStatus};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

fn lock_status(status: &Mutex<TimerStatus>) -> MutexGuard<'_, TimerStatus> {
    match status.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Countdown towards an absolute deadline.
#[derive(Clone)]
pub struct DeadlineTimer {
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl DeadlineTimer {
    pub fn new(clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        Self {
            clock,
            tick_interval,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Ticks immediately and then once per interval. The tick that observes
    /// zero is reported to `on_tick`, followed by `on_expire`; nothing is
    /// delivered after that.
    pub fn start<T, E>(&self, deadline: DateTime<Utc>, mut on_tick: T, on_expire: E) -> TimerHandle
    where
        T: FnMut(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let status = Arc::new(Mutex::new(TimerStatus::Running));
        let task_status = status.clone();
        let clock = self.clock.clone();
        let tick_interval = self.tick_interval;

        let task = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut on_expire = Some(on_expire);
            let mut last_remaining: Option<u64> = None;

            loop {
                interval.tick().await;

                if *lock_status(&task_status) != TimerStatus::Running {
                    break;
                }

                // A wall clock stepping backwards must not make the countdown climb.
                let mut remaining = remaining_seconds(deadline, clock.now());
                if let Some(previous) = last_remaining {
                    remaining = remaining.min(previous);
                }
                last_remaining = Some(remaining);

                on_tick(remaining);

                if remaining == 0 {
                    let fire = {
                        let mut guard = lock_status(&task_status);
                        if *guard == TimerStatus::Running {
                            *guard = TimerStatus::Expired;
                            true
                        } else {
                            false
                        }
                    };

                    if fire {
                        log_debug!("deadline {} reached", deadline);
                        if let Some(callback) = on_expire.take() {
                            callback();
                        }
                    }
                    break;
                }
            }
        });

        TimerHandle {
            status,
            task: Mutex::new(Some(task)),
        }
    }
}

pub struct TimerHandle {
    status: Arc<Mutex<TimerStatus>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerHandle {
    /// Stops ticking and suppresses a pending expiry. No-op once expired.
    pub fn cancel(&self) {
        {
            let mut guard = lock_status(&self.status);
            if *guard == TimerStatus::Running {
                *guard = TimerStatus::Cancelled;
            }
        }

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn status(&self) -> TimerStatus {
        *lock_status(&self.status)
    }

    pub fn is_running(&self) -> bool {
        self.status() == TimerStatus::Running
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
