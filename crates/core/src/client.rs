use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;

use crate::{
    audio::AudioTransport,
    config::ClientConfig,
    error::{AudioLoadError, ConfigError},
    events::EventBus,
    feedback::FeedbackCoordinator,
    fetch::{FetchOrchestrator, FetchOutcome},
    playback::PlaybackCoordinator,
    schedule::{RunnerOptions, ScheduleRunner, ScheduledFetch},
    service::{HttpNewsService, RemoteNewsService},
    store::{FileStore, PersistentStore},
    types::Session,
};

/// The four coordinators wired together. Every published session, whether the user or a
/// schedule asked for it, is handed to playback (first topic, paused) and to feedback.
#[derive(Clone)]
pub struct NewsClient {
    core: SessionAdopter,
    schedules: ScheduleRunner,
    bus: Option<EventBus>,
}

#[derive(Clone)]
struct SessionAdopter {
    fetch: FetchOrchestrator,
    playback: PlaybackCoordinator,
    feedback: FeedbackCoordinator,
}

impl SessionAdopter {
    async fn adopt(&self, outcome: &FetchOutcome) {
        let FetchOutcome::Published(session) = outcome else {
            return;
        };
        self.adopt_session(session).await;
    }

    async fn adopt_session(&self, session: &Arc<Session>) {
        self.feedback.load_for_session(Arc::clone(session)).await;
        if session.sections.is_empty() {
            self.playback.unload();
            return;
        }
        if let Err(e) = self.playback.switch_to_topic(session, 0, false).await {
            tracing::debug!(session_id = %session.id, error = %e, "first topic has no audio");
        }
    }
}

#[async_trait]
impl ScheduledFetch for SessionAdopter {
    async fn fetch_scheduled(&self, topics: BTreeSet<String>) -> FetchOutcome {
        let outcome = self.fetch.fetch_selection(topics).await;
        self.adopt(&outcome).await;
        outcome
    }
}

impl NewsClient {
    pub fn new(
        service: Arc<dyn RemoteNewsService>,
        transport: Arc<dyn AudioTransport>,
        store: Arc<dyn PersistentStore>,
        config: &ClientConfig,
        bus: Option<EventBus>,
    ) -> Self {
        let fetch = FetchOrchestrator::new(Arc::clone(&service), bus.clone());
        fetch.set_preferences(config.preferences.clone());

        let core = SessionAdopter {
            fetch,
            playback: PlaybackCoordinator::with_settle(
                transport,
                bus.clone(),
                config.interruption_settle,
            ),
            feedback: FeedbackCoordinator::new(Arc::clone(&service), store, bus.clone()),
        };
        let schedules = ScheduleRunner::new(
            service,
            Arc::new(core.clone()),
            RunnerOptions::from_config(config),
            bus.clone(),
        );

        Self {
            core,
            schedules,
            bus,
        }
    }

    /// A client talking to the HTTP briefing service and persisting feedback under the data dir.
    pub fn connect(
        config: &ClientConfig,
        transport: Arc<dyn AudioTransport>,
        bus: Option<EventBus>,
    ) -> Result<Self, ConfigError> {
        let service = Arc::new(HttpNewsService::new(config)?);
        let store = Arc::new(FileStore::new(config.data_dir.join("store")));
        Ok(Self::new(service, transport, store, config, bus))
    }

    pub async fn fetch(&self) -> FetchOutcome {
        let outcome = self.core.fetch.fetch().await;
        self.core.adopt(&outcome).await;
        outcome
    }

    pub async fn fetch_selection(&self, topics: BTreeSet<String>) -> FetchOutcome {
        self.core.fetch_scheduled(topics).await
    }

    pub fn cancel(&self) -> bool {
        self.core.fetch.cancel()
    }

    /// Clears the selection and the displayed session, and stops its audio.
    pub fn reset_selection(&self) {
        self.core.fetch.reset_selection();
        self.core.playback.unload();
    }

    /// Selects topic `index` of the displayed session.
    pub async fn play_topic(
        &self,
        index: usize,
        auto_play: bool,
    ) -> Option<Result<(), AudioLoadError>> {
        let session = self.core.fetch.current_session()?;
        Some(self.core.playback.switch_to_topic(&session, index, auto_play).await)
    }

    pub fn fetcher(&self) -> &FetchOrchestrator {
        &self.core.fetch
    }

    pub fn playback(&self) -> &PlaybackCoordinator {
        &self.core.playback
    }

    pub fn feedback(&self) -> &FeedbackCoordinator {
        &self.core.feedback
    }

    pub fn schedules(&self) -> &ScheduleRunner {
        &self.schedules
    }

    pub fn bus(&self) -> Option<&EventBus> {
        self.bus.as_ref()
    }
}
