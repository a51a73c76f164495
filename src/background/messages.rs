use serde::{Deserialize, Serialize};

use crate::{models::BookingRecord, notify::SoundKind};

/// Inbound to the background context, from push notifications, notification
/// clicks or the foreground tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundSignal {
    /// With a booking id the continuous loop starts; without one a single cue plays.
    #[serde(rename_all = "camelCase")]
    PlaySound {
        #[serde(default)]
        booking_id: Option<String>,
        #[serde(default)]
        sound: SoundKind,
    },
    #[serde(rename_all = "camelCase")]
    ForceBookingView { booking_id: String },
    #[serde(rename_all = "camelCase")]
    BookingExpired { booking_id: String },
    /// The foreground resolved or released the booking; nothing should ring for it.
    #[serde(rename_all = "camelCase")]
    ClearAlert { booking_id: String },
    #[serde(rename_all = "camelCase")]
    NotificationClick {
        booking_id: String,
        #[serde(default)]
        therapist_id: Option<String>,
        #[serde(default)]
        action: String,
    },
    /// Polls the store for booking changes, for when realtime delivery is unavailable.
    #[serde(rename_all = "camelCase")]
    StartBookingCheck {
        #[serde(default)]
        therapist_id: Option<String>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    StopBookingCheck,
}

impl BackgroundSignal {
    pub fn message_type(&self) -> &'static str {
        match self {
            BackgroundSignal::PlaySound { .. } => "PLAY_SOUND",
            BackgroundSignal::ForceBookingView { .. } => "FORCE_BOOKING_VIEW",
            BackgroundSignal::BookingExpired { .. } => "BOOKING_EXPIRED",
            BackgroundSignal::ClearAlert { .. } => "CLEAR_ALERT",
            BackgroundSignal::NotificationClick { .. } => "NOTIFICATION_CLICK",
            BackgroundSignal::StartBookingCheck { .. } => "START_BOOKING_CHECK",
            BackgroundSignal::StopBookingCheck => "STOP_BOOKING_CHECK",
        }
    }
}

/// What the provider tapped on a booking notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Accept,
    ViewDetails,
    Dismiss,
}

impl NotificationAction {
    /// Unrecognised actions, including a plain tap, open the details.
    pub fn parse(action: &str) -> Self {
        match action {
            "accept-booking" => NotificationAction::Accept,
            "dismiss" => NotificationAction::Dismiss,
            _ => NotificationAction::ViewDetails,
        }
    }
}

/// Background to foreground.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForegroundMessage {
    PlayNotificationSound {
        #[serde(default)]
        sound: SoundKind,
    },
    OpenBookingDetails { booking: BookingRecord },
    #[serde(rename_all = "camelCase")]
    BookingExpired { booking_id: String },
    #[serde(rename_all = "camelCase")]
    AcceptBooking {
        booking_id: String,
        #[serde(default)]
        therapist_id: Option<String>,
    },
    NewBooking { booking: BookingRecord },
}

impl ForegroundMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ForegroundMessage::PlayNotificationSound { .. } => "PLAY_NOTIFICATION_SOUND",
            ForegroundMessage::OpenBookingDetails { .. } => "OPEN_BOOKING_DETAILS",
            ForegroundMessage::BookingExpired { .. } => "BOOKING_EXPIRED",
            ForegroundMessage::AcceptBooking { .. } => "ACCEPT_BOOKING",
            ForegroundMessage::NewBooking { .. } => "NEW_BOOKING",
        }
    }
}
