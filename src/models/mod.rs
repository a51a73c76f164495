mod booking;
mod lifecycle;

pub use booking::{BookingRecord, BookingRequest, CandidateAcceptance};
pub use lifecycle::{BookingLifecycleState, ExternalStatus, StatusPayload};
