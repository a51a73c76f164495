//! Background alerting context.
//!
//! The [`AlertingSurface`] keeps alerting while no foreground tracker is
//! listening, and relays what it learns over a JSON message channel. The
//! [`ForegroundBridge`] turns those messages into tracker calls, and the
//! tracker posts `CLEAR_ALERT` back once a booking stops needing attention.
//! Neither side keeps a lifecycle of its own.

pub mod bridge;
pub mod messages;
pub mod port;
pub mod surface;

pub use bridge::ForegroundBridge;
pub use messages::{BackgroundSignal, ForegroundMessage, NotificationAction};
pub use port::{message_channel, signal_channel, BackgroundPort, ForegroundPort, SignalPort};
pub use surface::AlertingSurface;
