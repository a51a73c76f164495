use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{BackgroundPort, BackgroundSignal, ForegroundMessage, NotificationAction};
use crate::{
    db::BookingStore,
    models::BookingRecord,
    notify::{NotificationChannel, SoundKind},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const DEFAULT_BOOKING_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// How far back the first booking check looks.
const BOOKING_CHECK_LOOKBACK_MINUTES: i64 = 60;

/// Background counterpart of the tracker: alerts on its own and relays to
/// the foreground, never deciding lifecycle state.
pub struct AlertingSurface {
    channel: NotificationChannel,
    store: Arc<dyn BookingStore>,
    port: BackgroundPort,
    booking_check: Mutex<Option<CancellationToken>>,
}

impl AlertingSurface {
    /// `channel` should share its badge with the foreground channel.
    pub fn new(channel: NotificationChannel, store: Arc<dyn BookingStore>, port: BackgroundPort) -> Self {
        Self {
            channel,
            store,
            port,
            booking_check: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &NotificationChannel {
        &self.channel
    }

    pub fn is_checking_bookings(&self) -> bool {
        self.check_slot().is_some()
    }

    pub async fn handle_signal(&self, signal: BackgroundSignal) -> Result<()> {
        match signal {
            BackgroundSignal::PlaySound {
                booking_id: Some(booking_id),
                ..
            } => {
                self.channel.start_continuous(&booking_id);
            }
            BackgroundSignal::PlaySound {
                booking_id: None,
                sound,
            } => {
                self.cue(sound).await;
            }
            BackgroundSignal::ForceBookingView { booking_id } => {
                self.channel.vibrate_maximum_pattern();
                self.open_details(&booking_id).await?;
            }
            BackgroundSignal::BookingExpired { booking_id } => {
                self.channel.stop_continuous(&booking_id);
                self.port
                    .post(&ForegroundMessage::BookingExpired { booking_id })?;
            }
            BackgroundSignal::ClearAlert { booking_id } => {
                self.channel.stop_continuous(&booking_id);
            }
            BackgroundSignal::NotificationClick {
                booking_id,
                therapist_id,
                action,
            } => match NotificationAction::parse(&action) {
                NotificationAction::Accept => {
                    self.channel.stop_continuous(&booking_id);
                    log_info!("relaying accept for {}", booking_id);
                    self.port.post(&ForegroundMessage::AcceptBooking {
                        booking_id,
                        therapist_id,
                    })?;
                }
                NotificationAction::ViewDetails => self.open_details(&booking_id).await?,
                NotificationAction::Dismiss => {
                    log_debug!("notification for {} dismissed", booking_id);
                }
            },
            BackgroundSignal::StartBookingCheck {
                therapist_id,
                interval_ms,
            } => {
                let every = interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_BOOKING_CHECK_INTERVAL);
                self.start_booking_check(therapist_id, every);
            }
            BackgroundSignal::StopBookingCheck => self.stop_booking_check(),
        }
        Ok(())
    }

    /// Consumes raw `{type, payload}` signals until the sender closes, then
    /// stops any loop or booking check still running.
    pub async fn run(self, mut inbox: mpsc::UnboundedReceiver<Value>) {
        while let Some(raw) = inbox.recv().await {
            let signal = match serde_json::from_value::<BackgroundSignal>(raw) {
                Ok(signal) => signal,
                Err(err) => {
                    log_warn!("ignoring malformed background signal: {err}");
                    continue;
                }
            };

            if let Err(err) = self.handle_signal(signal).await {
                log_error!("background signal failed: {err:?}");
            }
        }

        self.stop_booking_check();
        self.channel.stop_all();
    }

    /// The foreground plays cues while it is listening; otherwise play here.
    async fn cue(&self, sound: SoundKind) {
        if self
            .port
            .post(&ForegroundMessage::PlayNotificationSound { sound })
            .is_err()
        {
            self.channel.play_once(sound).await;
        }
    }

    async fn open_details(&self, booking_id: &str) -> Result<()> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await
            .with_context(|| format!("failed to load booking {booking_id}"))?;
        let Some(booking) = booking else {
            log_warn!("view requested for unknown booking {}", booking_id);
            return Ok(());
        };

        log_info!("opening booking {} in the foreground", booking_id);
        self.port
            .post(&ForegroundMessage::OpenBookingDetails { booking })
    }

    fn check_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        match self.booking_check.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn start_booking_check(&self, therapist_id: Option<String>, every: Duration) {
        let cancel_token = CancellationToken::new();
        if let Some(previous) = self.check_slot().replace(cancel_token.clone()) {
            previous.cancel();
        }

        let check = BookingCheck {
            store: self.store.clone(),
            channel: self.channel.clone(),
            port: self.port.clone(),
            therapist_id,
        };
        log_info!("booking check started, every {:?}", every);
        tokio::spawn(check.run(every, cancel_token));
    }

    fn stop_booking_check(&self) {
        if let Some(cancel_token) = self.check_slot().take() {
            cancel_token.cancel();
            log_info!("booking check stopped");
        }
    }
}

/// Periodic store poll standing in for realtime delivery.
struct BookingCheck {
    store: Arc<dyn BookingStore>,
    channel: NotificationChannel,
    port: BackgroundPort,
    therapist_id: Option<String>,
}

impl BookingCheck {
    async fn run(self, every: Duration, cancel_token: CancellationToken) {
        let mut since = Utc::now() - ChronoDuration::minutes(BOOKING_CHECK_LOOKBACK_MINUTES);
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Utc::now();
            match self.poll(since).await {
                Ok(seen) => {
                    since = started;
                    if seen > 0 {
                        log_debug!("booking check relayed {} change(s)", seen);
                    }
                }
                Err(err) => log_warn!("booking check failed: {err:?}"),
            }
        }
    }

    async fn poll(&self, since: DateTime<Utc>) -> Result<usize> {
        let changed = self
            .store
            .bookings_updated_since(since)
            .await
            .context("failed to list changed bookings")?;

        let mut seen = 0;
        for booking in changed.into_iter().filter(|booking| self.concerns(booking)) {
            if booking.status == BookingRecord::PENDING {
                self.channel.start_continuous(&booking.booking_id);
            } else if booking.is_closed() {
                self.channel.stop_continuous(&booking.booking_id);
            }

            if let Err(err) = self.port.post(&ForegroundMessage::NewBooking { booking }) {
                log_debug!("no foreground for booking change: {err}");
            }
            seen += 1;
        }
        Ok(seen)
    }

    /// Unassigned bookings are offered to everyone.
    fn concerns(&self, booking: &BookingRecord) -> bool {
        match (&self.therapist_id, &booking.therapist_id) {
            (Some(mine), Some(assigned)) => mine == assigned,
            _ => true,
        }
    }
}
