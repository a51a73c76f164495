use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub booking_id: String,
    pub therapist_name: String,
    /// Minutes.
    pub duration: u32,
    /// Base unit; currency conversion happens at display time.
    pub price: f64,
    /// Fixed at creation. Only the current time moves relative to it.
    pub response_deadline: DateTime<Utc>,
}

/// A provider who has tentatively accepted, pending customer confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateAcceptance {
    pub therapist_id: String,
    pub therapist_name: String,
    pub estimated_arrival_minutes: u32,
    /// Phone or messaging address used to reach the therapist.
    pub contact_channel: String,
    pub accepted_at: DateTime<Utc>,
}

/// Persisted booking document as the backend sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    pub booking_id: String,
    pub therapist_name: String,
    pub duration: u32,
    pub price: f64,
    pub response_deadline: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub therapist_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Document fields without a dedicated column.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BookingRecord {
    pub const PENDING: &'static str = "pending";
    /// Statuses after which a booking needs no live session.
    pub const CLOSED_STATUSES: [&'static str; 3] = ["confirmed", "cancelled", "completed"];

    pub fn from_request(request: &BookingRequest, updated_at: DateTime<Utc>) -> Self {
        Self {
            booking_id: request.booking_id.clone(),
            therapist_name: request.therapist_name.clone(),
            duration: request.duration,
            price: request.price,
            response_deadline: request.response_deadline,
            status: Self::PENDING.to_string(),
            therapist_id: None,
            updated_at,
            extra: Map::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        Self::CLOSED_STATUSES.contains(&self.status.as_str())
    }

    pub fn request(&self) -> BookingRequest {
        BookingRequest {
            booking_id: self.booking_id.clone(),
            therapist_name: self.therapist_name.clone(),
            duration: self.duration,
            price: self.price,
            response_deadline: self.response_deadline,
        }
    }

    /// JSON shape delivered to realtime subscribers.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
