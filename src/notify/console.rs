use anyhow::Result;
use async_trait::async_trait;

use super::AlertPrimitives;

/// Headless host: alerts become log lines, no badge or vibration hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPrimitives;

#[async_trait]
impl AlertPrimitives for LoggingPrimitives {
    fn is_badge_supported(&self) -> bool {
        false
    }

    async fn set_badge(&self, _count: u32) -> Result<()> {
        Ok(())
    }

    async fn clear_badge(&self) -> Result<()> {
        Ok(())
    }

    fn is_vibration_supported(&self) -> bool {
        false
    }

    fn vibrate(&self, _pattern: &[u64]) {}

    async fn play_sound(&self, sound_id: &str) -> Result<()> {
        log::info!("[alert] {sound_id}");
        Ok(())
    }
}
