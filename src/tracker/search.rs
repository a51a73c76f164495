use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::{
    db::BookingStore,
    models::{BookingRequest, CandidateAcceptance},
};

/// Looks for a provider willing to take a booking.
///
/// Best effort: `Ok(None)` means nobody yet, and the tracker keeps waiting for
/// backend updates. There is no internal timeout. Therapists in `declined`
/// were turned down by the customer and must not be offered again.
#[async_trait]
pub trait CandidateSearch: Send + Sync + 'static {
    async fn find_candidate(
        &self,
        request: &BookingRequest,
        declined: &[String],
    ) -> Result<Option<CandidateAcceptance>>;
}

/// Field on the booking document where the backend's matcher records a
/// tentative acceptance.
pub const ACCEPTED_THERAPIST_FIELD: &str = "acceptedTherapist";

/// Reads the backend matcher's result off the booking document.
pub struct RecordCandidateSearch {
    store: Arc<dyn BookingStore>,
}

impl RecordCandidateSearch {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CandidateSearch for RecordCandidateSearch {
    async fn find_candidate(
        &self,
        request: &BookingRequest,
        declined: &[String],
    ) -> Result<Option<CandidateAcceptance>> {
        let Some(record) = self.store.get_booking(&request.booking_id).await? else {
            return Ok(None);
        };

        let candidate: CandidateAcceptance = match record.extra.get(ACCEPTED_THERAPIST_FIELD) {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => serde_json::from_value(value.clone()).with_context(|| {
                format!("malformed {ACCEPTED_THERAPIST_FIELD} on {}", request.booking_id)
            })?,
        };

        if declined.contains(&candidate.therapist_id) {
            // Still the therapist the customer turned down; wait for the matcher.
            return Ok(None);
        }
        Ok(Some(candidate))
    }
}
