//! Provider alerting: sound loops, vibration and the app-icon badge.

pub mod badge;
pub mod channel;
pub mod console;
#[cfg(feature = "desktop-audio")]
pub mod desktop;
#[cfg(feature = "desktop-audio")]
mod tone;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use badge::BadgeService;
pub use channel::NotificationChannel;
pub use console::LoggingPrimitives;

/// Platform alerting calls. Every method may be unsupported on a given host;
/// callers check the capability flags before using the matching call.
#[async_trait]
pub trait AlertPrimitives: Send + Sync + 'static {
    fn is_badge_supported(&self) -> bool;

    async fn set_badge(&self, count: u32) -> Result<()>;

    async fn clear_badge(&self) -> Result<()>;

    fn is_vibration_supported(&self) -> bool;

    /// Alternating on/off durations in milliseconds. `[0]` halts vibration.
    fn vibrate(&self, pattern: &[u64]);

    async fn play_sound(&self, sound_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub badge: bool,
    pub vibration: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SoundKind {
    Booking,
    Alert,
    Success,
}

impl Default for SoundKind {
    fn default() -> Self {
        SoundKind::Booking
    }
}

impl SoundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundKind::Booking => "booking",
            SoundKind::Alert => "alert",
            SoundKind::Success => "success",
        }
    }
}
