use std::sync::Arc;

use serde_json::{json, Map};
use tokio::task::JoinHandle;

use super::{ForegroundMessage, ForegroundPort};
use crate::{
    db::BookingStore,
    models::{BookingRecord, ExternalStatus, StatusPayload},
    tracker::{BookingHandle, BookingTracker, StateChange},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

type ChangeCallback = Arc<dyn Fn(StateChange) + Send + Sync + 'static>;

/// Routes background messages into the foreground tracker.
#[derive(Clone)]
pub struct ForegroundBridge {
    tracker: BookingTracker,
    store: Arc<dyn BookingStore>,
    on_change: ChangeCallback,
}

impl ForegroundBridge {
    /// `on_state_change` is used for sessions the bridge has to rehydrate.
    pub fn new<F>(tracker: BookingTracker, store: Arc<dyn BookingStore>, on_state_change: F) -> Self
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        Self {
            tracker,
            store,
            on_change: Arc::new(on_state_change),
        }
    }

    /// Returns the session the message was applied to, if any.
    pub async fn handle(&self, message: ForegroundMessage) -> Option<BookingHandle> {
        match message {
            ForegroundMessage::PlayNotificationSound { sound } => {
                self.tracker.channel().play_once(sound).await;
                None
            }
            ForegroundMessage::OpenBookingDetails { booking }
            | ForegroundMessage::NewBooking { booking } => self.open(booking).await,
            ForegroundMessage::AcceptBooking {
                booking_id,
                therapist_id,
            } => self.accept(&booking_id, therapist_id).await,
            ForegroundMessage::BookingExpired { booking_id } => {
                let Some(handle) = self.tracker.handle_for(&booking_id) else {
                    log_debug!("expiry for untracked booking {}", booking_id);
                    return None;
                };
                self.tracker
                    .apply_external_update(handle, StatusPayload::new(ExternalStatus::Expired.as_str()))
                    .await;
                Some(handle)
            }
        }
    }

    pub fn listen(self, port: ForegroundPort) -> JoinHandle<()> {
        let bridge = Arc::new(self);
        port.on_message_from_background(move |message| {
            let bridge = bridge.clone();
            async move {
                bridge.handle(message).await;
            }
        })
    }

    /// The provider accepted from a notification: record it, then let the
    /// `confirmed` status drive the session like any backend update.
    async fn accept(&self, booking_id: &str, therapist_id: Option<String>) -> Option<BookingHandle> {
        let Some(handle) = self.tracker.handle_for(booking_id) else {
            log_debug!("accept for untracked booking {}", booking_id);
            return None;
        };
        if self.tracker.state(handle).await?.is_final() {
            return Some(handle);
        }

        let mut fields = Map::new();
        fields.insert("status".into(), json!(ExternalStatus::Confirmed.as_str()));
        if let Some(therapist_id) = therapist_id {
            fields.insert("therapistId".into(), json!(therapist_id));
        }
        if let Err(err) = self.store.update_booking(booking_id, fields).await {
            log_error!("failed to record acceptance of {}: {err:?}", booking_id);
            return Some(handle);
        }

        self.tracker
            .apply_external_update(handle, StatusPayload::new(ExternalStatus::Confirmed.as_str()))
            .await;
        Some(handle)
    }

    /// Reuses the live session for the booking, or rehydrates one from the record.
    async fn open(&self, booking: BookingRecord) -> Option<BookingHandle> {
        let handle = match self.tracker.handle_for(&booking.booking_id) {
            Some(handle) => handle,
            None if booking.is_closed() => {
                log_debug!("not reopening closed booking {}", booking.booking_id);
                return None;
            }
            None => {
                log_info!("rehydrating session for {}", booking.booking_id);
                let on_change = self.on_change.clone();
                self.tracker
                    .create(booking.request(), move |change| on_change(change))
                    .await
            }
        };

        if ExternalStatus::parse(&booking.status).is_some() {
            self.tracker
                .apply_external_update(handle, StatusPayload::new(booking.status.clone()))
                .await;
        }
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use tokio::{sync::mpsc, time};

    use super::*;
    use crate::{
        background::{message_channel, signal_channel, AlertingSurface, BackgroundSignal},
        models::{BookingLifecycleState, BookingRequest},
        notify::NotificationChannel,
        settings::TrackerSettings,
        testing::{ChangeLog, MemoryStore, RecordingPrimitives, ScriptedSearch},
    };

    fn record(id: &str, status: &str) -> BookingRecord {
        let request = BookingRequest {
            booking_id: id.to_string(),
            therapist_name: "Dewi".into(),
            duration: 60,
            price: 250_000.0,
            response_deadline: Utc::now() + ChronoDuration::minutes(5),
        };
        let mut record = BookingRecord::from_request(&request, Utc::now());
        record.status = status.to_string();
        record
    }

    fn tracker(primitives: Arc<RecordingPrimitives>) -> BookingTracker {
        let settings = TrackerSettings::default();
        BookingTracker::new(
            NotificationChannel::new(primitives, settings.alert.clone()),
            Arc::new(ScriptedSearch::default()),
            Arc::new(MemoryStore::default()),
            settings,
        )
    }

    fn bridge(tracker: &BookingTracker) -> ForegroundBridge {
        ForegroundBridge::new(tracker.clone(), Arc::new(MemoryStore::default()), |_| {})
    }

    #[tokio::test(start_paused = true)]
    async fn open_details_rehydrates_then_reuses_the_session() {
        let tracker = tracker(Arc::new(RecordingPrimitives::default()));
        let log = ChangeLog::default();
        let bridge = ForegroundBridge::new(
            tracker.clone(),
            Arc::new(MemoryStore::default()),
            log.callback(),
        );

        let first = bridge
            .handle(ForegroundMessage::OpenBookingDetails {
                booking: record("b-1", "pending"),
            })
            .await
            .unwrap();
        assert_eq!(tracker.state(first).await, Some(BookingLifecycleState::Waiting));

        let second = bridge
            .handle(ForegroundMessage::NewBooking {
                booking: record("b-1", "broadcast_all"),
            })
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(tracker.active_sessions(), 1);
        assert_eq!(
            tracker.state(first).await,
            Some(BookingLifecycleState::Broadcasting)
        );
        assert_eq!(log.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_records_are_not_reopened() {
        let tracker = tracker(Arc::new(RecordingPrimitives::default()));
        let bridge = bridge(&tracker);

        let opened = bridge
            .handle(ForegroundMessage::OpenBookingDetails {
                booking: record("b-1", "cancelled"),
            })
            .await;
        assert_eq!(opened, None);
        assert_eq!(tracker.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn relayed_expiry_goes_through_the_status_path() {
        let tracker = tracker(Arc::new(RecordingPrimitives::default()));
        let bridge = bridge(&tracker);
        let handle = bridge
            .handle(ForegroundMessage::OpenBookingDetails {
                booking: record("b-1", "pending"),
            })
            .await
            .unwrap();

        let routed = bridge
            .handle(ForegroundMessage::BookingExpired {
                booking_id: "b-1".into(),
            })
            .await;
        assert_eq!(routed, Some(handle));
        assert_eq!(
            tracker.state(handle).await,
            Some(BookingLifecycleState::Searching)
        );

        let unknown = bridge
            .handle(ForegroundMessage::BookingExpired {
                booking_id: "b-404".into(),
            })
            .await;
        assert_eq!(unknown, None);
    }

    #[tokio::test(start_paused = true)]
    async fn accepting_from_a_notification_records_and_confirms() {
        let tracker = tracker(Arc::new(RecordingPrimitives::default()));
        let store = Arc::new(MemoryStore::with_record(record("b-1", "pending")));
        let bridge = ForegroundBridge::new(tracker.clone(), store.clone(), |_| {});
        let handle = bridge
            .handle(ForegroundMessage::OpenBookingDetails {
                booking: record("b-1", "pending"),
            })
            .await
            .unwrap();

        let accepted = bridge
            .handle(ForegroundMessage::AcceptBooking {
                booking_id: "b-1".into(),
                therapist_id: Some("t-1".into()),
            })
            .await;
        assert_eq!(accepted, Some(handle));
        assert_eq!(
            tracker.state(handle).await,
            Some(BookingLifecycleState::Confirmed)
        );
        assert!(!tracker.channel().is_active("b-1"));

        let updates = store.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.get("status"), Some(&json!("confirmed")));
        assert_eq!(updates[0].1.get("therapistId"), Some(&json!("t-1")));

        // Already confirmed: nothing more is written.
        bridge
            .handle(ForegroundMessage::AcceptBooking {
                booking_id: "b-1".into(),
                therapist_id: None,
            })
            .await;
        assert_eq!(store.updates().len(), 1);

        let untracked = bridge
            .handle(ForegroundMessage::AcceptBooking {
                booking_id: "b-404".into(),
                therapist_id: None,
            })
            .await;
        assert_eq!(untracked, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_acceptance_write_leaves_the_session_alone() {
        let tracker = tracker(Arc::new(RecordingPrimitives::default()));
        let store = Arc::new(MemoryStore::default());
        store.fail_writes();
        let bridge = ForegroundBridge::new(tracker.clone(), store, |_| {});
        let handle = bridge
            .handle(ForegroundMessage::OpenBookingDetails {
                booking: record("b-1", "pending"),
            })
            .await
            .unwrap();

        bridge
            .handle(ForegroundMessage::AcceptBooking {
                booking_id: "b-1".into(),
                therapist_id: Some("t-1".into()),
            })
            .await;
        assert_eq!(tracker.state(handle).await, Some(BookingLifecycleState::Waiting));
        assert!(tracker.channel().is_active("b-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn background_and_foreground_share_one_badge() {
        let primitives = Arc::new(RecordingPrimitives::default());
        let tracker = tracker(primitives.clone());
        let store = Arc::new(MemoryStore::with_record(record("b-1", "pending")));

        let (background, foreground) = message_channel();
        let background_channel = NotificationChannel::with_badge(
            primitives.clone(),
            tracker.channel().badge().clone(),
            tracker.settings().alert.clone(),
        );
        let surface = AlertingSurface::new(background_channel, store.clone(), background);
        let (signals, inbox) = mpsc::unbounded_channel();
        let surface_task = tokio::spawn(surface.run(inbox));
        let listener = ForegroundBridge::new(tracker.clone(), store, |_| {}).listen(foreground);

        signals
            .send(json!({ "type": "FORCE_BOOKING_VIEW", "payload": { "bookingId": "b-1" } }))
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let handle = tracker.handle_for("b-1").unwrap();
        assert_eq!(tracker.state(handle).await, Some(BookingLifecycleState::Waiting));
        assert_eq!(tracker.channel().badge().count().await, 1);

        signals
            .send(json!({ "type": "BOOKING_EXPIRED", "payload": { "bookingId": "b-1" } }))
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            tracker.state(handle).await,
            Some(BookingLifecycleState::Searching)
        );

        tracker.dispose(handle).await;
        assert_eq!(tracker.channel().badge().count().await, 0);

        drop(signals);
        surface_task.await.unwrap();
        listener.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_stops_when_the_foreground_confirms() {
        let primitives = Arc::new(RecordingPrimitives::default());
        let tracker = tracker(primitives.clone());
        let store = Arc::new(MemoryStore::with_record(record("b-1", "pending")));

        let (background, foreground) = message_channel();
        let background_channel = NotificationChannel::with_badge(
            primitives.clone(),
            tracker.channel().badge().clone(),
            tracker.settings().alert.clone(),
        );
        let surface = AlertingSurface::new(background_channel.clone(), store.clone(), background);
        let (signals, inbox) = signal_channel();
        tracker.connect_background(signals.clone());
        let surface_task = tokio::spawn(surface.run(inbox));
        let listener = ForegroundBridge::new(tracker.clone(), store, |_| {}).listen(foreground);

        signals
            .post(&BackgroundSignal::PlaySound {
                booking_id: Some("b-1".into()),
                sound: Default::default(),
            })
            .unwrap();
        signals
            .post(&BackgroundSignal::ForceBookingView {
                booking_id: "b-1".into(),
            })
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(background_channel.is_active("b-1"));

        let handle = tracker.handle_for("b-1").unwrap();
        tracker
            .apply_external_update(handle, StatusPayload::new("confirmed"))
            .await;
        time::sleep(Duration::from_millis(10)).await;

        assert!(!tracker.channel().is_active("b-1"));
        assert!(!background_channel.is_active("b-1"));

        surface_task.abort();
        listener.abort();
    }
}
