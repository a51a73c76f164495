pub mod controller;
pub mod state;

pub use controller::{DeadlineTimer, TimerHandle};
pub use state::{
    format_countdown, remaining_seconds, AnchoredClock, Clock, SystemClock, TimerStatus,
};
