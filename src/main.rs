use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use log::info;
use serde_json::{json, Map};
use uuid::Uuid;

use booking_tracker::{
    background::BackgroundSignal,
    db::BookingStore,
    init_logging,
    models::{BookingRecord, BookingRequest},
    notify::AlertPrimitives,
    timer::format_countdown,
    tracker::{search::ACCEPTED_THERAPIST_FIELD, StateChange},
    AppState,
};

const DATA_DIR_ENV: &str = "BOOKING_TRACKER_DATA_DIR";

fn primitives() -> Arc<dyn AlertPrimitives> {
    #[cfg(feature = "desktop-audio")]
    {
        Arc::new(booking_tracker::notify::desktop::DesktopPrimitives::new())
    }
    #[cfg(not(feature = "desktop-audio"))]
    {
        Arc::new(booking_tracker::notify::LoggingPrimitives)
    }
}

fn print_change(change: StateChange) {
    info!(
        "[{}] {} -> {} ({} left): {}",
        change.booking_id,
        change.previous,
        change.current,
        format_countdown(change.remaining_seconds),
        change.message
    );
}

fn fields(entries: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("Booking tracker starting up...");

    let data_dir = std::env::var(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("booking-data"));
    let primitives = primitives();
    let state = AppState::initialize(&data_dir, primitives.clone())?;
    state.recover_open_bookings(print_change).await?;

    let background = state.spawn_background(primitives, print_change);
    background.post(&BackgroundSignal::StartBookingCheck {
        therapist_id: None,
        interval_ms: None,
    })?;

    // Walk one booking through the backend's escalation path.
    let request = BookingRequest {
        booking_id: Uuid::new_v4().to_string(),
        therapist_name: "Dewi".to_string(),
        duration: 90,
        price: 350_000.0,
        response_deadline: Utc::now() + ChronoDuration::seconds(30),
    };
    state
        .store
        .insert_booking(&BookingRecord::from_request(&request, Utc::now()))
        .await?;

    let booking_id = request.booking_id.clone();
    let handle = state
        .tracker
        .track(request, print_change, &state.realtime)
        .await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    state
        .store
        .update_booking(
            &booking_id,
            fields(&[(
                ACCEPTED_THERAPIST_FIELD,
                json!({
                    "therapistId": "therapist_456",
                    "therapistName": "Maya Sari",
                    "estimatedArrivalMinutes": 15,
                    "contactChannel": "+6281234567890",
                    "acceptedAt": Utc::now(),
                }),
            )]),
        )
        .await?;
    state
        .store
        .update_booking(&booking_id, fields(&[("status", json!("broadcast_all"))]))
        .await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    state.tracker.accept_candidate(handle).await;
    tokio::time::sleep(state.tracker.settings().completion_delay() + Duration::from_millis(500))
        .await;

    background.post(&BackgroundSignal::StopBookingCheck)?;
    state.shutdown().await;
    info!("Booking tracker stopped");
    Ok(())
}
