//! Topic selection and the fetch phase machine.
//!
//! ```text
//! idle --fetch()--> gathering --checkpoint--> summarizing --checkpoint--> synthesizing
//! {gathering, summarizing, synthesizing} --success | failure | cancel()--> idle
//! ```
//!
//! Every fetch attempt owns a cancellation token and an attempt number. A result is committed
//! only while its token is live and its attempt is still the newest one, so a cancelled call
//! can never overwrite the session or the error, however late it resolves.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio_util::sync::CancellationToken;

use crate::{
    error::FetchError,
    events::EventBus,
    notifications::{FetchCancelled, FetchFailed, PhaseChanged, SessionPublished},
    service::{FetchProgress, RemoteNewsService},
    types::{FetchPhase, FetchPreferences, FetchRequest, Session},
};

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Published(Arc<Session>),
    Failed(FetchError),
    Cancelled,
    Rejected(FetchRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRejection {
    /// A fetch is already in flight.
    Busy,
    NoTopics,
    /// The selection equals the one of the last successful fetch.
    NotDirty,
}

#[derive(Debug, Clone, Default)]
pub struct FetchSnapshot {
    pub phase: FetchPhase,
    pub selected_topics: BTreeSet<String>,
    pub last_fetched_topics: BTreeSet<String>,
    pub is_dirty: bool,
    pub current_session: Option<Arc<Session>>,
    pub last_error: Option<FetchError>,
}

#[derive(Default)]
struct FetchState {
    phase: FetchPhase,
    selected_topics: BTreeSet<String>,
    last_fetched_topics: BTreeSet<String>,
    is_dirty: bool,
    current_session: Option<Arc<Session>>,
    last_error: Option<FetchError>,
    preferences: FetchPreferences,
    cancel: Option<CancellationToken>,
    attempt: u64,
}

impl FetchState {
    fn recompute_dirty(&mut self) {
        self.is_dirty = self.selected_topics != self.last_fetched_topics;
    }
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    inner: Arc<FetchInner>,
}

struct FetchInner {
    service: Arc<dyn RemoteNewsService>,
    state: Mutex<FetchState>,
    bus: Option<EventBus>,
}

impl FetchOrchestrator {
    pub fn new(service: Arc<dyn RemoteNewsService>, bus: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(FetchInner {
                service,
                state: Mutex::new(FetchState::default()),
                bus,
            }),
        }
    }

    /// Adds or removes `name`; returns whether it is selected afterwards.
    pub fn toggle_topic(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }

        let mut st = self.inner.lock();
        let selected = if st.selected_topics.remove(name) {
            false
        } else {
            st.selected_topics.insert(name.to_string());
            true
        };
        st.recompute_dirty();
        selected
    }

    /// Replaces the whole selection.
    pub fn select_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut st = self.inner.lock();
        st.selected_topics = normalize(topics);
        st.recompute_dirty();
    }

    /// Clears the selection, the displayed session and the error. The next selected topic
    /// makes the orchestrator dirty again. The phase is left alone.
    pub fn reset_selection(&self) {
        let mut st = self.inner.lock();
        st.selected_topics.clear();
        st.last_fetched_topics.clear();
        st.current_session = None;
        st.last_error = None;
        st.recompute_dirty();
    }

    pub fn set_preferences(&self, preferences: FetchPreferences) {
        self.inner.lock().preferences = preferences;
    }

    /// Fetches the current selection. A no-op unless idle, non-empty and dirty.
    pub async fn fetch(&self) -> FetchOutcome {
        self.run(None, false).await
    }

    /// Replaces the selection with `topics` and fetches it even when nothing changed.
    /// Still rejected while another fetch is in flight; the selection is then left untouched.
    pub async fn fetch_selection(&self, topics: BTreeSet<String>) -> FetchOutcome {
        self.run(Some(topics), true).await
    }

    /// Invalidates the in-flight fetch and returns to idle without surfacing an error.
    /// Returns whether anything was cancelled.
    pub fn cancel(&self) -> bool {
        let (attempt, from) = {
            let mut st = self.inner.lock();
            if !st.phase.is_active() {
                return false;
            }
            if let Some(token) = st.cancel.take() {
                token.cancel();
            }
            let from = st.phase;
            st.phase = FetchPhase::Idle;
            (st.attempt, from)
        };

        tracing::debug!(attempt, phase = ?from, "fetch cancelled");
        self.inner.emit(PhaseChanged::new(attempt, from, FetchPhase::Idle));
        self.inner.emit(FetchCancelled::new(attempt, from));
        true
    }

    pub fn snapshot(&self) -> FetchSnapshot {
        let st = self.inner.lock();
        FetchSnapshot {
            phase: st.phase,
            selected_topics: st.selected_topics.clone(),
            last_fetched_topics: st.last_fetched_topics.clone(),
            is_dirty: st.is_dirty,
            current_session: st.current_session.clone(),
            last_error: st.last_error.clone(),
        }
    }

    pub fn phase(&self) -> FetchPhase {
        self.inner.lock().phase
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().is_dirty
    }

    pub fn selected_topics(&self) -> BTreeSet<String> {
        self.inner.lock().selected_topics.clone()
    }

    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.inner.lock().current_session.clone()
    }

    pub fn last_error(&self) -> Option<FetchError> {
        self.inner.lock().last_error.clone()
    }

    /// Whether a trigger affordance should be enabled.
    pub fn can_fetch(&self) -> bool {
        let st = self.inner.lock();
        !st.phase.is_active() && !st.selected_topics.is_empty() && st.is_dirty
    }

    async fn run(&self, replace: Option<BTreeSet<String>>, force: bool) -> FetchOutcome {
        let (request, token, attempt) = {
            let mut st = self.inner.lock();
            if st.phase.is_active() {
                return FetchOutcome::Rejected(FetchRejection::Busy);
            }
            if let Some(topics) = replace {
                st.selected_topics = normalize(topics);
                st.recompute_dirty();
            }
            if st.selected_topics.is_empty() {
                return FetchOutcome::Rejected(FetchRejection::NoTopics);
            }
            if !force && !st.is_dirty {
                return FetchOutcome::Rejected(FetchRejection::NotDirty);
            }

            let token = CancellationToken::new();
            st.attempt += 1;
            st.cancel = Some(token.clone());
            st.phase = FetchPhase::Gathering;

            let request = FetchRequest {
                topics: st.selected_topics.clone(),
                preferences: st.preferences.clone(),
            };
            (request, token, st.attempt)
        };

        tracing::debug!(attempt, topics = ?request.topics, "fetch started");
        self.inner.emit(PhaseChanged::new(
            attempt,
            FetchPhase::Idle,
            FetchPhase::Gathering,
        ));

        let reporter = PhaseReporter {
            inner: Arc::clone(&self.inner),
            token: token.clone(),
            attempt,
        };
        let result = self
            .inner
            .service
            .fetch(&request, &reporter, token.clone())
            .await;

        self.inner.finish(attempt, &token, request.topics, result)
    }
}

impl FetchInner {
    fn lock(&self) -> MutexGuard<'_, FetchState> {
        self.state.lock().expect("FetchOrchestrator state poisoned")
    }

    fn emit<E: crate::events::Event>(&self, event: E) {
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }

    /// Moves the phase forward to `target`, one step at a time. Stale, backwards and repeated
    /// checkpoints are ignored.
    fn advance(&self, attempt: u64, token: &CancellationToken, target: FetchPhase) {
        if token.is_cancelled() {
            return;
        }

        let mut transitions = Vec::new();
        {
            let mut st = self.lock();
            if st.attempt != attempt || !st.phase.is_active() {
                return;
            }
            while st.phase < target {
                let Some(next) = st.phase.next() else { break };
                transitions.push((st.phase, next));
                st.phase = next;
            }
        }

        for (from, to) in transitions {
            tracing::debug!(attempt, ?from, ?to, "fetch checkpoint");
            self.emit(PhaseChanged::new(attempt, from, to));
        }
    }

    fn finish(
        &self,
        attempt: u64,
        token: &CancellationToken,
        topics: BTreeSet<String>,
        result: Result<Session, FetchError>,
    ) -> FetchOutcome {
        let mut st = self.lock();
        if token.is_cancelled() || st.attempt != attempt {
            tracing::debug!(attempt, "discarding result of cancelled fetch");
            return FetchOutcome::Cancelled;
        }

        st.cancel = None;
        let from = st.phase;
        st.phase = FetchPhase::Idle;

        match result {
            Ok(session) => {
                let session = Arc::new(session);
                st.current_session = Some(Arc::clone(&session));
                st.last_fetched_topics = topics;
                st.recompute_dirty();
                st.last_error = None;
                drop(st);

                tracing::info!(
                    attempt,
                    session_id = %session.id,
                    sections = session.sections.len(),
                    "briefing session published"
                );
                self.emit(PhaseChanged::new(attempt, from, FetchPhase::Idle));
                self.emit(SessionPublished::new(attempt, Arc::clone(&session)));
                FetchOutcome::Published(session)
            }
            Err(FetchError::Cancelled) => {
                drop(st);

                tracing::debug!(attempt, "briefing service reported cancellation");
                self.emit(PhaseChanged::new(attempt, from, FetchPhase::Idle));
                self.emit(FetchCancelled::new(attempt, from));
                FetchOutcome::Cancelled
            }
            Err(error) => {
                st.last_error = Some(error.clone());
                drop(st);

                tracing::warn!(attempt, error = %error, "briefing fetch failed");
                self.emit(PhaseChanged::new(attempt, from, FetchPhase::Idle));
                self.emit(FetchFailed::new(attempt, error.clone()));
                FetchOutcome::Failed(error)
            }
        }
    }
}

struct PhaseReporter {
    inner: Arc<FetchInner>,
    token: CancellationToken,
    attempt: u64,
}

impl FetchProgress for PhaseReporter {
    fn checkpoint(&self, phase: FetchPhase) {
        self.inner.advance(self.attempt, &self.token, phase);
    }
}

fn normalize<I, S>(topics: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    topics
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
