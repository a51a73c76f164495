pub mod background;
pub mod db;
pub mod models;
pub mod notify;
pub mod realtime;
pub mod settings;
pub mod timer;
pub mod tracker;
pub mod utils;

#[cfg(test)]
mod testing;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};

use background::{
    message_channel, signal_channel, AlertingSurface, ForegroundBridge, SignalPort,
};
use db::{Database, SqliteBookingStore};
use models::{ExternalStatus, StatusPayload};
use notify::{AlertPrimitives, NotificationChannel};
use realtime::{LocalFeed, RealtimeAdapter};
use settings::SettingsStore;
use tracker::{BookingTracker, RecordCandidateSearch, StateChange};

pub use utils::{debug_enabled, init_logging};

/// Everything a host needs to track bookings, wired together.
pub struct AppState {
    pub store: Arc<SqliteBookingStore>,
    pub tracker: BookingTracker,
    pub realtime: RealtimeAdapter<LocalFeed>,
    pub settings: SettingsStore,
}

impl AppState {
    /// Opens (or creates) the database and settings under `data_dir`.
    pub fn initialize(data_dir: &Path, primitives: Arc<dyn AlertPrimitives>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let tracker_settings = settings.tracker();

        let database = Database::new(data_dir.join("bookings.sqlite3"))?;
        let feed = LocalFeed::new();
        let store = Arc::new(SqliteBookingStore::new(database, feed.clone()));

        let channel = NotificationChannel::new(primitives, tracker_settings.alert.clone());
        let realtime = RealtimeAdapter::new(Arc::new(feed), tracker_settings.realtime.clone());
        let tracker = BookingTracker::new(
            channel,
            Arc::new(RecordCandidateSearch::new(store.clone())),
            store.clone(),
            tracker_settings,
        );

        Ok(Self {
            store,
            tracker,
            realtime,
            settings,
        })
    }

    /// Resumes tracking for bookings that were still open when the process
    /// last stopped. Returns how many sessions were resumed.
    pub async fn recover_open_bookings<F>(&self, on_state_change: F) -> Result<usize>
    where
        F: Fn(StateChange) + Clone + Send + Sync + 'static,
    {
        let open = self
            .store
            .open_bookings()
            .await
            .context("failed to list open bookings")?;

        for record in &open {
            warn!(
                "Recovered open booking {} ({}); resuming tracking",
                record.booking_id, record.status
            );
            let handle = self
                .tracker
                .track(record.request(), on_state_change.clone(), &self.realtime)
                .await;

            // The feed only carries new writes, so replay the stored status.
            if ExternalStatus::parse(&record.status).is_some() {
                self.tracker
                    .apply_external_update(handle, StatusPayload::new(record.status.clone()))
                    .await;
            }
        }

        if !open.is_empty() {
            info!("Resumed {} open booking(s)", open.len());
        }
        Ok(open.len())
    }

    /// Starts the background alerting context next to the tracker and links
    /// the two. Signals for the background go through the returned port.
    pub fn spawn_background<F>(
        &self,
        primitives: Arc<dyn AlertPrimitives>,
        on_state_change: F,
    ) -> SignalPort
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        let channel = NotificationChannel::with_badge(
            primitives,
            self.tracker.channel().badge().clone(),
            self.tracker.settings().alert.clone(),
        );
        let (background, foreground) = message_channel();
        let (signals, inbox) = signal_channel();

        let surface = AlertingSurface::new(channel, self.store.clone(), background);
        tokio::spawn(surface.run(inbox));
        ForegroundBridge::new(self.tracker.clone(), self.store.clone(), on_state_change)
            .listen(foreground);

        self.tracker.connect_background(signals.clone());
        info!("Background alerting context started");
        signals
    }

    pub async fn shutdown(&self) {
        self.tracker.dispose_all().await;
    }
}
