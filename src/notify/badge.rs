use std::sync::Arc;

use tokio::sync::Mutex;

use super::AlertPrimitives;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Process-wide pending-alert counter shown on the app icon.
///
/// Clones share one counter. Each mutation holds the lock until the platform
/// call returns, so the icon never shows an older value than the counter.
#[derive(Clone)]
pub struct BadgeService {
    primitives: Arc<dyn AlertPrimitives>,
    count: Arc<Mutex<u32>>,
}

impl BadgeService {
    pub fn new(primitives: Arc<dyn AlertPrimitives>) -> Self {
        Self {
            primitives,
            count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.primitives.is_badge_supported()
    }

    pub async fn count(&self) -> u32 {
        *self.count.lock().await
    }

    pub async fn increment(&self) -> u32 {
        let mut guard = self.count.lock().await;
        *guard = guard.saturating_add(1);
        self.reflect(*guard).await;
        *guard
    }

    /// Releases one booking's contribution. Saturates at zero.
    pub async fn decrement(&self) -> u32 {
        let mut guard = self.count.lock().await;
        *guard = guard.saturating_sub(1);
        self.reflect(*guard).await;
        *guard
    }

    pub async fn set(&self, count: u32) {
        let mut guard = self.count.lock().await;
        *guard = count;
        self.reflect(count).await;
    }

    pub async fn clear(&self) {
        self.set(0).await;
    }

    async fn reflect(&self, count: u32) {
        if !self.primitives.is_badge_supported() {
            log_debug!("badge unsupported; count {} kept in memory only", count);
            return;
        }

        let result = if count == 0 {
            self.primitives.clear_badge().await
        } else {
            self.primitives.set_badge(count).await
        };

        if let Err(err) = result {
            log_warn!("failed to update app badge to {}: {err:?}", count);
        }
    }
}
