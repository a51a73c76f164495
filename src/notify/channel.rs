use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{AlertPrimitives, BadgeService, Capabilities, SoundKind};
use crate::settings::{AlertSettings, MAXIMUM_VIBRATION_PATTERN};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

struct ActiveAlert {
    generation: u64,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

type ActiveAlerts = Arc<Mutex<HashMap<String, ActiveAlert>>>;

fn lock_alerts(alerts: &Mutex<HashMap<String, ActiveAlert>>) -> MutexGuard<'_, HashMap<String, ActiveAlert>> {
    match alerts.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Makes a pending booking hard to miss.
///
/// Knows how to alert, never when: the tracker decides when loops start and
/// stop. Start and stop are synchronous so they take effect in call order.
#[derive(Clone)]
pub struct NotificationChannel {
    primitives: Arc<dyn AlertPrimitives>,
    badge: BadgeService,
    settings: AlertSettings,
    active: ActiveAlerts,
    generations: Arc<AtomicU64>,
}

impl NotificationChannel {
    pub fn new(primitives: Arc<dyn AlertPrimitives>, settings: AlertSettings) -> Self {
        let badge = BadgeService::new(primitives.clone());
        Self::with_badge(primitives, badge, settings)
    }

    /// Shares an existing badge counter, e.g. between foreground and background.
    pub fn with_badge(
        primitives: Arc<dyn AlertPrimitives>,
        badge: BadgeService,
        settings: AlertSettings,
    ) -> Self {
        Self {
            primitives,
            badge,
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn badge(&self) -> &BadgeService {
        &self.badge
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            badge: self.primitives.is_badge_supported(),
            vibration: self.primitives.is_vibration_supported(),
        }
    }

    /// Begins the sound + vibration loop for `booking_id`. Idempotent.
    pub fn start_continuous(&self, booking_id: &str) {
        let mut active = lock_alerts(&self.active);
        if let Some(existing) = active.get(booking_id) {
            if !existing.handle.is_finished() {
                log_debug!("continuous alert already running for {}", booking_id);
                return;
            }
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(alert_loop(
            booking_id.to_string(),
            generation,
            self.primitives.clone(),
            self.settings.clone(),
            cancel_token.clone(),
            self.active.clone(),
        ));

        active.insert(
            booking_id.to_string(),
            ActiveAlert {
                generation,
                cancel_token,
                handle,
            },
        );
        log_info!("continuous alert started for {}", booking_id);
    }

    /// Halts the loop for `booking_id`. No-op when none is running.
    pub fn stop_continuous(&self, booking_id: &str) {
        let Some(alert) = lock_alerts(&self.active).remove(booking_id) else {
            return;
        };

        alert.cancel_token.cancel();
        if self.primitives.is_vibration_supported() {
            self.primitives.vibrate(&[0]);
        }
        log_info!("continuous alert stopped for {}", booking_id);
    }

    pub fn is_active(&self, booking_id: &str) -> bool {
        lock_alerts(&self.active)
            .get(booking_id)
            .map(|alert| !alert.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        lock_alerts(&self.active)
            .values()
            .filter(|alert| !alert.handle.is_finished())
            .count()
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = lock_alerts(&self.active).keys().cloned().collect();
        for id in ids {
            self.stop_continuous(&id);
        }
    }

    /// One-off cue for a state change.
    pub async fn play_once(&self, sound: SoundKind) {
        if let Err(err) = self.primitives.play_sound(sound.as_str()).await {
            log_warn!("failed to play {} sound: {err:?}", sound.as_str());
        }
    }

    pub fn vibrate_maximum_pattern(&self) {
        if self.primitives.is_vibration_supported() {
            self.primitives.vibrate(&MAXIMUM_VIBRATION_PATTERN);
        }
    }

    pub async fn increment_badge(&self) -> u32 {
        self.badge.increment().await
    }

    pub async fn decrement_badge(&self) -> u32 {
        self.badge.decrement().await
    }

    pub async fn set_badge(&self, count: u32) {
        self.badge.set(count).await;
    }

    pub async fn clear_badge(&self) {
        self.badge.clear().await;
    }
}

async fn alert_loop(
    booking_id: String,
    generation: u64,
    primitives: Arc<dyn AlertPrimitives>,
    settings: AlertSettings,
    cancel_token: CancellationToken,
    active: ActiveAlerts,
) {
    let started = Instant::now();
    let mut ticker = time::interval(settings.repeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                return;
            }
            _ = ticker.tick() => {
                if started.elapsed() >= settings.max_duration() {
                    log_warn!(
                        "continuous alert for {} ran {:?} without being stopped; ending it",
                        booking_id,
                        settings.max_duration()
                    );
                    break;
                }

                if primitives.is_vibration_supported() {
                    primitives.vibrate(&settings.vibration_pattern);
                }
                if let Err(err) = primitives.play_sound(&settings.sound_id).await {
                    log_warn!("alert sound failed for {}: {err:?}", booking_id);
                }
            }
        }
    }

    // Self-expired: drop our entry unless a newer loop replaced it.
    let mut active = lock_alerts(&active);
    if active
        .get(&booking_id)
        .map(|alert| alert.generation == generation)
        .unwrap_or(false)
    {
        active.remove(&booking_id);
    }
}
