use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard,
    },
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::{
    sync::{mpsc, Mutex},
    time,
};

use super::{
    events::{Notice, StateChange},
    search::CandidateSearch,
    state::{next_state, TransitionPolicy, Trigger},
    BookingHandle,
};
use crate::{
    background::{BackgroundSignal, SignalPort},
    db::BookingStore,
    models::{BookingLifecycleState, BookingRequest, CandidateAcceptance, StatusPayload},
    notify::{NotificationChannel, SoundKind},
    realtime::{RealtimeSubscriber, Subscription, SubscriptionEvent},
    settings::TrackerSettings,
    timer::{remaining_seconds, Clock, DeadlineTimer, SystemClock, TimerHandle},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

type StateChangeCallback = Arc<dyn Fn(StateChange) + Send + Sync + 'static>;

struct TrackedSession {
    handle: BookingHandle,
    request: BookingRequest,
    state: BookingLifecycleState,
    candidate: Option<CandidateAcceptance>,
    /// Therapists the customer turned down; later searches skip them.
    declined: Vec<String>,
    timer: Option<TimerHandle>,
    subscription: Option<Subscription>,
    remaining: Arc<AtomicU64>,
    /// Results from searches started under an older generation are dropped.
    search_generation: u64,
    search_in_flight: bool,
    search_rerun: bool,
    badge_held: bool,
    disposed: bool,
    on_change: StateChangeCallback,
}

impl TrackedSession {
    fn booking_id(&self) -> &str {
        &self.request.booking_id
    }

    fn emit(&self, previous: BookingLifecycleState, notice: Notice, reason: Option<String>) {
        let change = StateChange {
            booking_id: self.request.booking_id.clone(),
            previous,
            current: self.state,
            notice,
            message: notice.describe(&self.request, self.candidate.as_ref(), reason.as_deref()),
            candidate: self.candidate.clone(),
            reason,
            remaining_seconds: self.remaining.load(Ordering::SeqCst),
        };
        (self.on_change)(change);
    }

    fn invalidate_search(&mut self) {
        self.search_generation += 1;
        self.search_in_flight = false;
        self.search_rerun = false;
    }
}

type SharedSession = Arc<Mutex<TrackedSession>>;

#[derive(Default)]
struct Registry {
    sessions: HashMap<BookingHandle, SharedSession>,
    by_booking: HashMap<String, BookingHandle>,
}

struct TrackerInner {
    registry: StdMutex<Registry>,
    next_handle: AtomicU64,
    channel: NotificationChannel,
    search: Arc<dyn CandidateSearch>,
    store: Arc<dyn BookingStore>,
    timer: DeadlineTimer,
    settings: TrackerSettings,
    background: StdMutex<Option<SignalPort>>,
}

/// Drives booking sessions through their lifecycle.
///
/// Each session sits behind its own async mutex, so transitions for one
/// booking apply strictly in arrival order. Store writes and candidate
/// searches run in spawned tasks and never hold that lock.
///
/// State-change callbacks run while the session is locked and must not block.
#[derive(Clone)]
pub struct BookingTracker {
    inner: Arc<TrackerInner>,
}

impl BookingTracker {
    pub fn new(
        channel: NotificationChannel,
        search: Arc<dyn CandidateSearch>,
        store: Arc<dyn BookingStore>,
        settings: TrackerSettings,
    ) -> Self {
        Self::with_clock(channel, search, store, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        channel: NotificationChannel,
        search: Arc<dyn CandidateSearch>,
        store: Arc<dyn BookingStore>,
        settings: TrackerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timer = DeadlineTimer::new(clock, settings.tick_interval());
        Self {
            inner: Arc::new(TrackerInner {
                registry: StdMutex::new(Registry::default()),
                next_handle: AtomicU64::new(0),
                channel,
                search,
                store,
                timer,
                settings,
                background: StdMutex::new(None),
            }),
        }
    }

    pub fn channel(&self) -> &NotificationChannel {
        &self.inner.channel
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.inner.settings
    }

    /// Background loops for a booking are cleared through `signals` whenever
    /// the foreground stops alerting for it.
    pub fn connect_background(&self, signals: SignalPort) {
        *self.background() = Some(signals);
    }

    /// Starts tracking `request`: countdown, continuous alert and one badge
    /// unit. A booking that is already tracked keeps its session and callback;
    /// its handle is returned.
    pub async fn create<F>(&self, request: BookingRequest, on_state_change: F) -> BookingHandle
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.open_session(request, Arc::new(on_state_change)).await.0
    }

    /// [`create`](Self::create) plus a realtime subscription whose updates
    /// are fed to [`apply_external_update`](Self::apply_external_update) in
    /// delivery order. The subscription ends with the session.
    pub async fn track<F>(
        &self,
        request: BookingRequest,
        on_state_change: F,
        realtime: &dyn RealtimeSubscriber,
    ) -> BookingHandle
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        let booking_id = request.booking_id.clone();
        let (handle, created) = self.open_session(request, Arc::new(on_state_change)).await;
        if !created {
            return handle;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<SubscriptionEvent>();
        let subscription = realtime.subscribe(
            &booking_id,
            Box::new(move |event| {
                let _ = tx.send(event);
            }),
        );
        self.attach_subscription(handle, subscription).await;

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let tracker = BookingTracker { inner };

                match event {
                    SubscriptionEvent::Update(payload) => {
                        if tracker.apply_external_update(handle, payload).await.is_none() {
                            break;
                        }
                    }
                    SubscriptionEvent::Error(message) => {
                        log_warn!("realtime updates for {} degraded: {}", booking_id, message);
                    }
                }
            }
            log_debug!("realtime pump for {} finished", booking_id);
        });

        handle
    }

    /// Single ingestion point for backend status changes. Unknown statuses
    /// are logged and leave the session untouched.
    pub async fn apply_external_update(
        &self,
        handle: BookingHandle,
        payload: StatusPayload,
    ) -> Option<BookingLifecycleState> {
        let Some(status) = payload.external_status() else {
            log_warn!("ignoring unknown status '{}' for {}", payload.status, handle);
            return self.state(handle).await;
        };
        self.deliver(handle, Trigger::External(status)).await
    }

    pub async fn accept_candidate(&self, handle: BookingHandle) -> Option<BookingLifecycleState> {
        self.deliver(handle, Trigger::AcceptCandidate).await
    }

    pub async fn request_another_candidate(
        &self,
        handle: BookingHandle,
    ) -> Option<BookingLifecycleState> {
        self.deliver(handle, Trigger::RequestAnother).await
    }

    pub async fn cancel(
        &self,
        handle: BookingHandle,
        reason: impl Into<String>,
    ) -> Option<BookingLifecycleState> {
        self.deliver(handle, Trigger::Cancel(reason.into())).await
    }

    /// Releases everything the session holds: timer, then subscription, then
    /// alert and badge. Unknown or already disposed handles are ignored.
    pub async fn dispose(&self, handle: BookingHandle) {
        let session = {
            let mut registry = self.registry();
            let Some(session) = registry.sessions.remove(&handle) else {
                return;
            };
            registry.by_booking.retain(|_, tracked| *tracked != handle);
            session
        };

        let mut session = session.lock().await;
        session.disposed = true;
        session.invalidate_search();

        if let Some(timer) = session.timer.take() {
            timer.cancel();
        }
        if let Some(subscription) = session.subscription.take() {
            subscription.unsubscribe();
        }
        self.silence(session.booking_id());
        self.release_badge(&mut session).await;

        log_info!("disposed session {} for {}", handle, session.booking_id());
    }

    pub async fn dispose_all(&self) {
        let handles: Vec<BookingHandle> = self.registry().sessions.keys().copied().collect();
        for handle in handles {
            self.dispose(handle).await;
        }
    }

    pub async fn state(&self, handle: BookingHandle) -> Option<BookingLifecycleState> {
        let session = self.session(handle)?;
        let state = session.lock().await.state;
        Some(state)
    }

    pub async fn candidate(&self, handle: BookingHandle) -> Option<CandidateAcceptance> {
        let session = self.session(handle)?;
        let candidate = session.lock().await.candidate.clone();
        candidate
    }

    pub async fn remaining_seconds(&self, handle: BookingHandle) -> Option<u64> {
        let session = self.session(handle)?;
        let remaining = session.lock().await.remaining.load(Ordering::SeqCst);
        Some(remaining)
    }

    pub fn handle_for(&self, booking_id: &str) -> Option<BookingHandle> {
        self.registry().by_booking.get(booking_id).copied()
    }

    pub fn active_sessions(&self) -> usize {
        self.registry().sessions.len()
    }

    /// Hands `subscription` to the session so dispose can end it. Returns
    /// `false`, after unsubscribing, when the session is gone.
    pub async fn attach_subscription(
        &self,
        handle: BookingHandle,
        subscription: Subscription,
    ) -> bool {
        let Some(session) = self.session(handle) else {
            subscription.unsubscribe();
            return false;
        };

        let mut session = session.lock().await;
        if session.disposed {
            subscription.unsubscribe();
            return false;
        }
        if let Some(previous) = session.subscription.replace(subscription) {
            previous.unsubscribe();
        }
        true
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        match self.inner.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn background(&self) -> MutexGuard<'_, Option<SignalPort>> {
        match self.inner.background.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn session(&self, handle: BookingHandle) -> Option<SharedSession> {
        self.registry().sessions.get(&handle).cloned()
    }

    fn policy(&self) -> TransitionPolicy {
        TransitionPolicy {
            auto_search: self.inner.settings.auto_search,
        }
    }

    async fn open_session(
        &self,
        request: BookingRequest,
        on_change: StateChangeCallback,
    ) -> (BookingHandle, bool) {
        let booking_id = request.booking_id.clone();
        let handle = BookingHandle(self.inner.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        let remaining = Arc::new(AtomicU64::new(remaining_seconds(
            request.response_deadline,
            self.inner.timer.clock().now(),
        )));
        let deadline = request.response_deadline;

        let session = Arc::new(Mutex::new(TrackedSession {
            handle,
            request,
            state: BookingLifecycleState::Waiting,
            candidate: None,
            declined: Vec::new(),
            timer: None,
            subscription: None,
            remaining: remaining.clone(),
            search_generation: 0,
            search_in_flight: false,
            search_rerun: false,
            badge_held: false,
            disposed: false,
            on_change,
        }));

        // Locked before it becomes reachable so no update can overtake setup.
        let mut guard = session.clone().lock_owned().await;
        {
            let mut registry = self.registry();
            if let Some(existing) = registry.by_booking.get(&booking_id).copied() {
                log_debug!("{} already tracked as {}", booking_id, existing);
                return (existing, false);
            }
            registry.sessions.insert(handle, session);
            registry.by_booking.insert(booking_id.clone(), handle);
        }

        self.inner.channel.start_continuous(&booking_id);
        self.hold_badge(&mut guard).await;
        guard.timer = Some(self.start_timer(handle, deadline, remaining));
        guard.emit(BookingLifecycleState::Waiting, Notice::Waiting, None);

        log_info!("tracking {} as {}", booking_id, handle);
        (handle, true)
    }

    fn start_timer(
        &self,
        handle: BookingHandle,
        deadline: DateTime<Utc>,
        remaining: Arc<AtomicU64>,
    ) -> TimerHandle {
        let weak = Arc::downgrade(&self.inner);
        self.inner.timer.start(
            deadline,
            move |seconds| remaining.store(seconds, Ordering::SeqCst),
            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let tracker = BookingTracker { inner };
                tokio::spawn(async move {
                    tracker.deliver(handle, Trigger::DeadlineExpired).await;
                });
            },
        )
    }

    async fn deliver(
        &self,
        handle: BookingHandle,
        trigger: Trigger,
    ) -> Option<BookingLifecycleState> {
        let session = self.session(handle)?;
        let mut session = session.lock().await;
        Some(self.apply(&mut session, trigger).await)
    }

    async fn apply(&self, session: &mut TrackedSession, trigger: Trigger) -> BookingLifecycleState {
        let previous = session.state;
        if session.disposed {
            return previous;
        }

        let Some(next) = next_state(previous, &trigger, self.policy()) else {
            log_debug!("{} ignored {:?} while {}", session.booking_id(), trigger, previous);
            return previous;
        };

        if next == previous {
            self.launch_search(session);
            return previous;
        }

        session.state = next;
        log_info!("{}: {} -> {}", session.booking_id(), previous, next);
        self.enter(session, previous, trigger).await;
        next
    }

    async fn enter(&self, session: &mut TrackedSession, previous: BookingLifecycleState, trigger: Trigger) {
        let channel = &self.inner.channel;

        match session.state {
            BookingLifecycleState::Searching | BookingLifecycleState::Broadcasting => {
                if let Some(turned_down) = session.candidate.take() {
                    log_info!(
                        "{}: {} turned down, not offering them again",
                        session.booking_id(),
                        turned_down.therapist_id
                    );
                    session.declined.push(turned_down.therapist_id);
                }
                channel.start_continuous(session.booking_id());
                self.hold_badge(session).await;
                session.emit(previous, Notice::for_state(session.state), None);
                self.cue(SoundKind::Alert);
                self.launch_search(session);
            }
            BookingLifecycleState::TherapistFound => {
                if let Trigger::CandidateFound(candidate) = trigger {
                    session.candidate = Some(candidate);
                }
                if self.inner.settings.mute_on_found {
                    self.silence(session.booking_id());
                }
                session.emit(previous, Notice::TherapistFound, None);
                self.cue(SoundKind::Success);
            }
            BookingLifecycleState::Confirmed => {
                self.settle(session).await;
                session.emit(previous, Notice::Confirmed, None);
                self.cue(SoundKind::Success);

                if trigger == Trigger::AcceptCandidate {
                    let mut fields = Map::new();
                    fields.insert("status".into(), json!("confirmed"));
                    if let Some(candidate) = &session.candidate {
                        fields.insert("therapistId".into(), json!(candidate.therapist_id));
                    }
                    self.persist(session.booking_id(), fields);
                    self.schedule_completion(session.handle);
                }
                session.candidate = None;
            }
            BookingLifecycleState::Expired => {
                self.silence(session.booking_id());
                session.invalidate_search();
                session.emit(previous, Notice::Expired, None);
            }
            BookingLifecycleState::Cancelled => {
                let reason = match trigger {
                    Trigger::Cancel(reason) => reason,
                    _ => String::new(),
                };
                self.settle(session).await;
                session.candidate = None;
                session.emit(previous, Notice::Cancelled, Some(reason.clone()));

                let mut fields = Map::new();
                fields.insert("status".into(), json!("cancelled"));
                fields.insert("cancelReason".into(), Value::String(reason));
                self.persist(session.booking_id(), fields);
            }
            BookingLifecycleState::Waiting => {}
        }
    }

    /// Releases live resources when a booking reaches a final state.
    async fn settle(&self, session: &mut TrackedSession) {
        self.silence(session.booking_id());
        self.release_badge(session).await;
        if let Some(timer) = session.timer.take() {
            timer.cancel();
        }
        session.invalidate_search();
    }

    /// Stops the loop here and asks the background to stop its own.
    fn silence(&self, booking_id: &str) {
        self.inner.channel.stop_continuous(booking_id);

        let background = self.background().clone();
        if let Some(signals) = background {
            let signal = BackgroundSignal::ClearAlert {
                booking_id: booking_id.to_string(),
            };
            if let Err(err) = signals.post(&signal) {
                log_debug!("background not listening: {err}");
            }
        }
    }

    /// Plays a one-off sound without holding up the session.
    fn cue(&self, sound: SoundKind) {
        let channel = self.inner.channel.clone();
        tokio::spawn(async move {
            channel.play_once(sound).await;
        });
    }

    async fn hold_badge(&self, session: &mut TrackedSession) {
        if !session.badge_held {
            session.badge_held = true;
            self.inner.channel.increment_badge().await;
        }
    }

    async fn release_badge(&self, session: &mut TrackedSession) {
        if session.badge_held {
            session.badge_held = false;
            self.inner.channel.decrement_badge().await;
        }
    }

    /// Starts a candidate search, or marks one to follow the search already running.
    fn launch_search(&self, session: &mut TrackedSession) {
        if session.search_in_flight {
            session.search_rerun = true;
            log_debug!("search already running for {}; queued a re-run", session.booking_id());
            return;
        }

        session.search_generation += 1;
        session.search_in_flight = true;
        session.search_rerun = false;

        let generation = session.search_generation;
        let handle = session.handle;
        let request = session.request.clone();
        let declined = session.declined.clone();
        let search = self.inner.search.clone();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let outcome = search.find_candidate(&request, &declined).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            BookingTracker { inner }
                .finish_search(handle, generation, outcome)
                .await;
        });
    }

    async fn finish_search(
        &self,
        handle: BookingHandle,
        generation: u64,
        outcome: Result<Option<CandidateAcceptance>>,
    ) {
        let Some(session) = self.session(handle) else {
            return;
        };
        let mut session = session.lock().await;
        if session.disposed || session.search_generation != generation {
            log_debug!("dropping stale search result for {}", session.booking_id());
            return;
        }
        session.search_in_flight = false;

        match outcome {
            Ok(Some(candidate)) => {
                session.search_rerun = false;
                log_info!(
                    "{} accepted by {} ({})",
                    session.booking_id(),
                    candidate.therapist_name,
                    candidate.therapist_id
                );
                self.apply(&mut session, Trigger::CandidateFound(candidate)).await;
                return;
            }
            Ok(None) => {
                log_debug!("no candidate yet for {}; waiting on backend", session.booking_id());
            }
            Err(err) => {
                log_warn!("candidate search for {} failed: {err:?}", session.booking_id());
            }
        }

        let searching = matches!(
            session.state,
            BookingLifecycleState::Searching | BookingLifecycleState::Broadcasting
        );
        if session.search_rerun && searching {
            self.launch_search(&mut session);
        }
    }

    fn persist(&self, booking_id: &str, fields: Map<String, Value>) {
        let store = self.inner.store.clone();
        let booking_id = booking_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = store.update_booking(&booking_id, fields).await {
                log_error!("failed to persist update for {}: {err:?}", booking_id);
            }
        });
    }

    fn schedule_completion(&self, handle: BookingHandle) {
        let delay = self.inner.settings.completion_delay();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Some(session) = (BookingTracker { inner }).session(handle) else {
                return;
            };
            let session = session.lock().await;
            if !session.disposed && session.state == BookingLifecycleState::Confirmed {
                session.emit(BookingLifecycleState::Confirmed, Notice::Completed, None);
            }
        });
    }
}
