use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

/// Attention-grabbing pattern (ms on/off) used for pending bookings.
pub const MAXIMUM_VIBRATION_PATTERN: [u64; 11] =
    [500, 100, 500, 100, 500, 100, 500, 100, 500, 100, 500];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertSettings {
    pub sound_id: String,
    pub repeat_interval_ms: u64,
    /// A loop that nobody stops ends itself after this long.
    pub max_duration_ms: u64,
    pub vibration_pattern: Vec<u64>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            sound_id: "booking".into(),
            repeat_interval_ms: 10_000,
            max_duration_ms: 10 * 60 * 1000,
            vibration_pattern: MAXIMUM_VIBRATION_PATTERN.to_vec(),
        }
    }
}

impl AlertSettings {
    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(self.repeat_interval_ms.max(1))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Consecutive connection failures before the subscriber is told.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            cooldown_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerSettings {
    pub tick_interval_ms: u64,
    /// Deadline expiry starts a replacement search instead of ending in `Expired`.
    pub auto_search: bool,
    /// Silence the continuous alert while a found candidate awaits confirmation.
    pub mute_on_found: bool,
    /// Delay between a customer confirmation and the completion notice.
    pub completion_delay_ms: u64,
    pub alert: AlertSettings,
    pub realtime: RealtimeSettings,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            auto_search: true,
            mute_on_found: true,
            completion_delay_ms: 3_000,
            alert: AlertSettings::default(),
            realtime: RealtimeSettings::default(),
        }
    }
}

impl TrackerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring malformed settings in {}: {err}", path.display());
                TrackerSettings::default()
            })
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracker(&self) -> TrackerSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: TrackerSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
