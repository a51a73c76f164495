//! Recording fakes shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Notify};

use crate::{
    db::BookingStore,
    models::{BookingRecord, BookingRequest, CandidateAcceptance},
    notify::AlertPrimitives,
    realtime::{ChangeFeed, ChangeStream},
    tracker::{CandidateSearch, StateChange},
};

pub struct RecordingPrimitives {
    badge_supported: bool,
    vibration_supported: bool,
    fail_badge: AtomicBool,
    badges: Mutex<Vec<Option<u32>>>,
    vibrations: Mutex<Vec<Vec<u64>>>,
    sounds: Mutex<Vec<String>>,
    sound_delay: Mutex<Option<Duration>>,
}

impl Default for RecordingPrimitives {
    fn default() -> Self {
        Self {
            badge_supported: true,
            vibration_supported: true,
            fail_badge: AtomicBool::new(false),
            badges: Mutex::new(Vec::new()),
            vibrations: Mutex::new(Vec::new()),
            sounds: Mutex::new(Vec::new()),
            sound_delay: Mutex::new(None),
        }
    }
}

impl RecordingPrimitives {
    pub fn without_capabilities() -> Self {
        Self {
            badge_supported: false,
            vibration_supported: false,
            ..Self::default()
        }
    }

    /// Every later `play_sound` takes `delay` before it is recorded.
    pub fn delay_sounds(&self, delay: Duration) {
        *self.sound_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_badge_calls(&self) {
        self.fail_badge.store(true, Ordering::SeqCst);
    }

    /// `Some(n)` for set, `None` for clear.
    pub fn badges(&self) -> Vec<Option<u32>> {
        self.badges.lock().unwrap().clone()
    }

    pub fn vibrations(&self) -> Vec<Vec<u64>> {
        self.vibrations
            .lock()
            .unwrap()
            .iter()
            .filter(|pattern| pattern.as_slice() != [0])
            .cloned()
            .collect()
    }

    /// Number of `vibrate(&[0])` calls, i.e. loops that were stopped.
    pub fn halts(&self) -> usize {
        self.vibrations
            .lock()
            .unwrap()
            .iter()
            .filter(|pattern| pattern.as_slice() == [0])
            .count()
    }

    pub fn sounds(&self) -> Vec<String> {
        self.sounds.lock().unwrap().clone()
    }

    pub fn sounds_for(&self, sound_id: &str) -> usize {
        self.sounds
            .lock()
            .unwrap()
            .iter()
            .filter(|played| played.as_str() == sound_id)
            .count()
    }
}

#[async_trait]
impl AlertPrimitives for RecordingPrimitives {
    fn is_badge_supported(&self) -> bool {
        self.badge_supported
    }

    async fn set_badge(&self, count: u32) -> Result<()> {
        if self.fail_badge.load(Ordering::SeqCst) {
            return Err(anyhow!("badge api rejected the call"));
        }
        self.badges.lock().unwrap().push(Some(count));
        Ok(())
    }

    async fn clear_badge(&self) -> Result<()> {
        if self.fail_badge.load(Ordering::SeqCst) {
            return Err(anyhow!("badge api rejected the call"));
        }
        self.badges.lock().unwrap().push(None);
        Ok(())
    }

    fn is_vibration_supported(&self) -> bool {
        self.vibration_supported
    }

    fn vibrate(&self, pattern: &[u64]) {
        self.vibrations.lock().unwrap().push(pattern.to_vec());
    }

    async fn play_sound(&self, sound_id: &str) -> Result<()> {
        let delay = *self.sound_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.sounds.lock().unwrap().push(sound_id.to_string());
        Ok(())
    }
}

/// Search whose answers are queued by the test; `None` when the queue is empty.
#[derive(Default)]
pub struct ScriptedSearch {
    answers: Mutex<VecDeque<Option<CandidateAcceptance>>>,
    calls: AtomicUsize,
    declined: Mutex<Vec<Vec<String>>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedSearch {
    pub fn answering(answers: Vec<Option<CandidateAcceptance>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Self::default()
        }
    }

    /// Each search blocks until the returned notifier is signalled.
    pub fn gated(answers: Vec<Option<CandidateAcceptance>>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let search = Self {
            answers: Mutex::new(answers.into()),
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (search, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The declined list passed to each search, in call order.
    pub fn declined_per_call(&self) -> Vec<Vec<String>> {
        self.declined.lock().unwrap().clone()
    }
}

#[async_trait]
impl CandidateSearch for ScriptedSearch {
    async fn find_candidate(
        &self,
        _request: &BookingRequest,
        declined: &[String],
    ) -> Result<Option<CandidateAcceptance>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.declined.lock().unwrap().push(declined.to_vec());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.answers.lock().unwrap().pop_front().flatten())
    }
}

pub fn candidate(therapist_id: &str) -> CandidateAcceptance {
    CandidateAcceptance {
        therapist_id: therapist_id.to_string(),
        therapist_name: "Maya Sari".to_string(),
        estimated_arrival_minutes: 15,
        contact_channel: "+6281234567890".to_string(),
        accepted_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, BookingRecord>>,
    updates: Mutex<Vec<(String, Map<String, Value>)>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_record(record: BookingRecord) -> Self {
        let store = Self::default();
        store.insert(record);
        store
    }

    pub fn insert(&self, record: BookingRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.booking_id.clone(), record);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<(String, Map<String, Value>)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn get_booking(&self, booking_id: &str) -> Result<Option<BookingRecord>> {
        Ok(self.records.lock().unwrap().get(booking_id).cloned())
    }

    async fn update_booking(&self, booking_id: &str, fields: Map<String, Value>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("store is read-only"));
        }
        self.updates
            .lock()
            .unwrap()
            .push((booking_id.to_string(), fields.clone()));
        if let Some(record) = self.records.lock().unwrap().get_mut(booking_id) {
            for (key, value) in fields {
                if key == "status" {
                    if let Value::String(status) = value {
                        record.status = status;
                    }
                } else if key == "therapistId" {
                    record.therapist_id = value.as_str().map(str::to_string);
                } else {
                    record.extra.insert(key, value);
                }
            }
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn bookings_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<BookingRecord>> {
        let mut records: Vec<BookingRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.updated_at > since)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.updated_at);
        Ok(records)
    }
}

/// Feed whose connections are scripted: each `connect` pops the next outcome.
#[derive(Default)]
pub struct ScriptedFeed {
    outcomes: Mutex<VecDeque<Result<ChangeStream>>>,
    connects: AtomicUsize,
}

impl ScriptedFeed {
    pub fn push_failure(&self, message: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Err(anyhow!(message.to_string())));
    }

    pub fn push_stream(&self) -> mpsc::UnboundedSender<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes.lock().unwrap().push_back(Ok(rx));
        tx
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn connect(&self, _booking_id: &str) -> Result<ChangeStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted connection left")))
    }
}

/// Collects state changes delivered to a tracker callback.
#[derive(Clone, Default)]
pub struct ChangeLog {
    changes: Arc<Mutex<Vec<StateChange>>>,
}

impl ChangeLog {
    pub fn callback(&self) -> impl Fn(StateChange) + Send + Sync + 'static {
        let changes = self.changes.clone();
        move |change| changes.lock().unwrap().push(change)
    }

    pub fn all(&self) -> Vec<StateChange> {
        self.changes.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.changes.lock().unwrap().len()
    }
}
