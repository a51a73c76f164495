use serde::Serialize;

use crate::models::{BookingLifecycleState, BookingRequest, CandidateAcceptance};

/// What the user should be told about a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Notice {
    Waiting,
    Searching,
    Broadcasting,
    TherapistFound,
    Confirmed,
    Expired,
    Cancelled,
    /// Sent once, a short while after a customer-accepted confirmation.
    Completed,
}

impl Notice {
    pub fn for_state(state: BookingLifecycleState) -> Self {
        match state {
            BookingLifecycleState::Waiting => Notice::Waiting,
            BookingLifecycleState::Searching => Notice::Searching,
            BookingLifecycleState::Broadcasting => Notice::Broadcasting,
            BookingLifecycleState::TherapistFound => Notice::TherapistFound,
            BookingLifecycleState::Confirmed => Notice::Confirmed,
            BookingLifecycleState::Expired => Notice::Expired,
            BookingLifecycleState::Cancelled => Notice::Cancelled,
        }
    }

    pub fn describe(
        &self,
        request: &BookingRequest,
        candidate: Option<&CandidateAcceptance>,
        reason: Option<&str>,
    ) -> String {
        match self {
            Notice::Waiting => format!("Waiting for {} to respond", request.therapist_name),
            Notice::Searching => "Searching for another available therapist...".to_string(),
            Notice::Broadcasting => {
                "Finding nearby therapists for first-come-first-serve...".to_string()
            }
            Notice::TherapistFound => "Therapist found! Please confirm".to_string(),
            Notice::Confirmed => match candidate {
                Some(candidate) => format!(
                    "Booking confirmed. {} will arrive in about {} minutes",
                    candidate.therapist_name, candidate.estimated_arrival_minutes
                ),
                None => format!("{} has accepted your booking!", request.therapist_name),
            },
            Notice::Expired => format!("{} did not respond in time", request.therapist_name),
            Notice::Cancelled => match reason {
                Some(reason) => format!("Booking cancelled ({reason})"),
                None => "Booking cancelled".to_string(),
            },
            Notice::Completed => "Booking confirmed".to_string(),
        }
    }
}

/// Delivered to the session callback on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub booking_id: String,
    pub previous: BookingLifecycleState,
    pub current: BookingLifecycleState,
    pub notice: Notice,
    pub message: String,
    pub candidate: Option<CandidateAcceptance>,
    pub reason: Option<String>,
    pub remaining_seconds: u64,
}
