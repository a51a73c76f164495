use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum BookingLifecycleState {
    Waiting,
    Searching,
    Broadcasting,
    TherapistFound,
    Confirmed,
    Expired,
    Cancelled,
}

impl Default for BookingLifecycleState {
    fn default() -> Self {
        BookingLifecycleState::Waiting
    }
}

impl BookingLifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingLifecycleState::Waiting => "waiting",
            BookingLifecycleState::Searching => "searching",
            BookingLifecycleState::Broadcasting => "broadcasting",
            BookingLifecycleState::TherapistFound => "therapist-found",
            BookingLifecycleState::Confirmed => "confirmed",
            BookingLifecycleState::Expired => "expired",
            BookingLifecycleState::Cancelled => "cancelled",
        }
    }

    /// Absorbing states: every later event is dropped.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BookingLifecycleState::Confirmed | BookingLifecycleState::Cancelled
        )
    }

    /// States in which nobody has committed to the booking yet.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            BookingLifecycleState::Waiting
                | BookingLifecycleState::Searching
                | BookingLifecycleState::Broadcasting
        )
    }
}

impl std::fmt::Display for BookingLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed vocabulary of backend statuses the tracker reacts to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    Confirmed,
    Rejected,
    Expired,
    BroadcastAll,
}

impl ExternalStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirmed" => Some(ExternalStatus::Confirmed),
            "rejected" => Some(ExternalStatus::Rejected),
            "expired" => Some(ExternalStatus::Expired),
            "broadcast_all" => Some(ExternalStatus::BroadcastAll),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalStatus::Confirmed => "confirmed",
            ExternalStatus::Rejected => "rejected",
            ExternalStatus::Expired => "expired",
            ExternalStatus::BroadcastAll => "broadcast_all",
        }
    }
}

/// A change notification for one booking document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    pub status: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StatusPayload {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            fields: Map::new(),
        }
    }

    pub fn from_document(document: Value) -> Result<Self> {
        if !document.is_object() {
            return Err(anyhow!("change document is not an object: {document}"));
        }
        serde_json::from_value(document)
            .map_err(|err| anyhow!("change document has no usable status: {err}"))
    }

    pub fn external_status(&self) -> Option<ExternalStatus> {
        ExternalStatus::parse(&self.status)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_vocabulary_is_closed() {
        assert_eq!(ExternalStatus::parse("confirmed"), Some(ExternalStatus::Confirmed));
        assert_eq!(ExternalStatus::parse("broadcast_all"), Some(ExternalStatus::BroadcastAll));
        assert_eq!(ExternalStatus::parse("Confirmed"), None);
        assert_eq!(ExternalStatus::parse("unknown-value"), None);
    }

    #[test]
    fn payload_keeps_extra_document_fields() {
        let payload = StatusPayload::from_document(json!({
            "status": "rejected",
            "therapistId": "t-9",
            "duration": 60
        }))
        .unwrap();

        assert_eq!(payload.external_status(), Some(ExternalStatus::Rejected));
        assert_eq!(payload.field_str("therapistId"), Some("t-9"));
        assert!(!payload.fields.contains_key("status"));
    }

    #[test]
    fn payload_without_status_is_rejected() {
        assert!(StatusPayload::from_document(json!({ "therapistId": "t-9" })).is_err());
        assert!(StatusPayload::from_document(json!("confirmed")).is_err());
    }

    #[test]
    fn only_confirmed_and_cancelled_are_final() {
        assert!(BookingLifecycleState::Confirmed.is_final());
        assert!(BookingLifecycleState::Cancelled.is_final());
        assert!(!BookingLifecycleState::Expired.is_final());
        assert!(!BookingLifecycleState::TherapistFound.is_pending());
    }
}
