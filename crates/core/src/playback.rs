//! Which topic's audio is loaded, and the transport handoff around it.
//!
//! Loads are guarded by a generation counter: a `switch_to_topic` that is overtaken by a newer one
//! never publishes its duration. Transport events reach the coordinator through a pump task that
//! owns a broadcast receiver; an interruption can silently kill that receiver, so
//! [`PlaybackCoordinator::end_interruption`] always re-arms it.

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::{
    audio::{AudioEvent, AudioTransport},
    error::AudioLoadError,
    events::{Event, EventBus},
    notifications::{AudioUnavailable, TopicAdvanced, TopicLoaded},
    types::{PlaybackState, Session, TopicKey},
};

pub const DEFAULT_INTERRUPTION_SETTLE: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<PlaybackInner>,
}

struct PlaybackInner {
    transport: Arc<dyn AudioTransport>,
    state: Mutex<PlaybackSlot>,
    pump: Mutex<Option<JoinHandle<()>>>,
    bus: Option<EventBus>,
    settle: Duration,
}

#[derive(Default)]
struct PlaybackSlot {
    playback: PlaybackState,
    loaded: Option<TopicKey>,
    session: Option<Arc<Session>>,
    generation: u64,
    scrub: Option<f64>,
    interrupted: Option<bool>,
    unavailable: Option<(TopicKey, AudioLoadError)>,
}

impl PlaybackCoordinator {
    pub fn new(transport: Arc<dyn AudioTransport>, bus: Option<EventBus>) -> Self {
        Self::with_settle(transport, bus, DEFAULT_INTERRUPTION_SETTLE)
    }

    pub fn with_settle(
        transport: Arc<dyn AudioTransport>,
        bus: Option<EventBus>,
        settle: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PlaybackInner {
                transport,
                state: Mutex::new(PlaybackSlot::default()),
                pump: Mutex::new(None),
                bus,
                settle,
            }),
        }
    }

    /// Loads the audio of `session.sections[index]`. Switching to the already loaded topic only
    /// resumes playback when `auto_play` asks for it.
    pub async fn switch_to_topic(
        &self,
        session: &Arc<Session>,
        index: usize,
        auto_play: bool,
    ) -> Result<(), AudioLoadError> {
        let section = session
            .sections
            .get(index)
            .ok_or(AudioLoadError::NoSuchTopic { index })?;
        let key = session.key_for(&section.topic);

        let generation = {
            let mut st = self.inner.lock();
            if st.loaded.as_ref() == Some(&key) {
                let resume = auto_play && st.playback.can_play && !st.playback.is_playing;
                if resume {
                    st.playback.is_playing = true;
                }
                drop(st);

                if resume {
                    self.inner.transport.play();
                }
                return Ok(());
            }

            st.generation += 1;
            st.playback = PlaybackState {
                current_topic_index: index,
                ..PlaybackState::default()
            };
            st.loaded = None;
            st.session = Some(Arc::clone(session));
            st.scrub = None;
            st.unavailable = None;
            st.generation
        };

        self.inner.transport.stop();

        let Some(audio) = session.audio_for(section).cloned() else {
            let err = AudioLoadError::Missing {
                topic: section.topic.clone(),
            };
            self.load_failed(generation, key, err.clone());
            return Err(err);
        };

        tracing::debug!(%key, audio = %audio, "loading topic audio");
        let loaded = self
            .inner
            .transport
            .load(&audio)
            .await
            .and_then(|duration| {
                if duration.is_finite() && duration >= 0.0 {
                    Ok(duration)
                } else {
                    Err(AudioLoadError::InvalidDuration {
                        audio_ref: audio.to_string(),
                    })
                }
            });

        let duration = match loaded {
            Ok(duration) => duration,
            Err(err) => {
                self.load_failed(generation, key, err.clone());
                return Err(err);
            }
        };

        {
            let mut st = self.inner.lock();
            if st.generation != generation {
                tracing::debug!(%key, "topic switch superseded before audio loaded");
                return Ok(());
            }
            st.loaded = Some(key.clone());
            st.playback.duration_seconds = duration;
            st.playback.can_play = true;
            st.playback.is_playing = auto_play;
        }

        self.ensure_armed();
        if auto_play {
            self.inner.transport.play();
        }
        self.inner.emit(TopicLoaded::new(key, index, duration));
        Ok(())
    }

    /// Toggles playback; a no-op until audio is loaded. Returns whether audio is playing after.
    pub fn play_pause(&self) -> bool {
        let playing = {
            let mut st = self.inner.lock();
            if !st.playback.can_play {
                return false;
            }
            st.playback.is_playing = !st.playback.is_playing;
            st.playback.is_playing
        };

        if playing {
            self.inner.transport.play();
        } else {
            self.inner.transport.pause();
        }
        playing
    }

    pub fn seek(&self, seconds: f64) {
        let target = {
            let mut st = self.inner.lock();
            if !st.playback.can_play {
                return;
            }
            let target = clamp_position(seconds, st.playback.duration_seconds);
            st.playback.position_seconds = target;
            if st.scrub.is_some() {
                st.scrub = Some(target);
                return;
            }
            target
        };
        self.inner.transport.seek(target);
    }

    /// While scrubbing, transport position reports are ignored and the scrub value is shown.
    pub fn begin_scrub(&self) {
        let mut st = self.inner.lock();
        if st.playback.can_play && st.scrub.is_none() {
            st.scrub = Some(st.playback.position_seconds);
        }
    }

    pub fn scrub_to(&self, seconds: f64) {
        let mut st = self.inner.lock();
        if st.scrub.is_none() {
            return;
        }
        let target = clamp_position(seconds, st.playback.duration_seconds);
        st.scrub = Some(target);
        st.playback.position_seconds = target;
    }

    /// Ends a scrub with a single transport seek to the last scrub value.
    pub fn end_scrub(&self) {
        let target = {
            let mut st = self.inner.lock();
            let Some(target) = st.scrub.take() else {
                return;
            };
            st.playback.position_seconds = target;
            target
        };
        self.inner.transport.seek(target);
    }

    /// Position report from the transport. Ignored while scrubbing or with nothing playable.
    pub fn on_position(&self, seconds: f64) {
        let mut st = self.inner.lock();
        if st.scrub.is_some() || !st.playback.can_play {
            return;
        }
        st.playback.position_seconds = clamp_position(seconds, st.playback.duration_seconds);
    }

    /// Handles the end of the current track. Advances to the next topic of the same session and
    /// keeps playing; stays put on the last topic. Returns the index advanced to.
    pub async fn on_finished(&self) -> Option<usize> {
        let (session, from) = self.finish_current()?;
        Some(self.advance(session, from).await)
    }

    /// Stops the finished track and picks the topic to advance to. A finish with nothing loaded
    /// belongs to a replaced track and is ignored.
    fn finish_current(&self) -> Option<(Arc<Session>, usize)> {
        let mut st = self.inner.lock();
        if st.loaded.is_none() {
            return None;
        }
        st.playback.is_playing = false;
        st.playback.position_seconds = 0.0;

        let from = st.playback.current_topic_index;
        let session = st
            .session
            .as_ref()
            .filter(|session| from + 1 < session.sections.len())
            .map(Arc::clone)?;

        st.loaded = None;
        st.playback.can_play = false;
        Some((session, from))
    }

    async fn advance(&self, session: Arc<Session>, from: usize) -> usize {
        let to = from + 1;
        tracing::debug!(session_id = %session.id, from, to, "advancing to next topic");
        self.inner.emit(TopicAdvanced::new(session.id.clone(), from, to));

        // failures are already recorded as unavailable audio for that topic
        let _ = self.switch_to_topic(&session, to, true).await;
        to
    }

    pub fn on_transport_failed(&self, reason: String) {
        let key = {
            let mut st = self.inner.lock();
            let Some(key) = st.loaded.take() else {
                return;
            };
            st.playback.is_playing = false;
            st.playback.can_play = false;
            key
        };

        let err = AudioLoadError::LoadFailed {
            audio_ref: key.to_string(),
            reason,
        };
        tracing::warn!(%key, error = %err, "audio transport failed");
        self.record_unavailable(key, err);
    }

    /// Something else takes over the audio output. Pauses if playing and remembers that.
    pub fn begin_interruption(&self) {
        let was_playing = {
            let mut st = self.inner.lock();
            if st.interrupted.is_some() {
                return;
            }
            st.interrupted = Some(st.playback.is_playing);
            st.playback.is_playing
        };

        if was_playing {
            self.play_pause();
        }
    }

    /// Waits for the audio output to settle, re-arms the transport subscription and resumes if
    /// playback was running when the interruption began.
    pub async fn end_interruption(&self) {
        let Some(was_playing) = self.inner.lock().interrupted.take() else {
            return;
        };

        tokio::time::sleep(self.inner.settle).await;
        self.arm_events();

        let paused = {
            let st = self.inner.lock();
            st.playback.can_play && !st.playback.is_playing
        };
        if was_playing && paused {
            self.play_pause();
        }
    }

    /// Replaces the transport event subscription with a fresh one.
    pub fn arm_events(&self) {
        let receiver = self.inner.transport.subscribe();
        let handle = tokio::spawn(pump_transport_events(
            Arc::downgrade(&self.inner),
            receiver,
        ));

        let mut pump = self.inner.pump.lock().expect("playback pump poisoned");
        if let Some(previous) = pump.replace(handle) {
            previous.abort();
        }
    }

    /// Stops playback and forgets the loaded topic and session.
    pub fn unload(&self) {
        {
            let mut st = self.inner.lock();
            st.generation += 1;
            st.playback = PlaybackState::default();
            st.loaded = None;
            st.session = None;
            st.scrub = None;
            st.unavailable = None;
        }
        self.inner.transport.stop();
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().playback.clone()
    }

    pub fn loaded_topic(&self) -> Option<TopicKey> {
        self.inner.lock().loaded.clone()
    }

    /// The topic whose audio last failed to load, if it is still the selected one.
    pub fn unavailable(&self) -> Option<(TopicKey, AudioLoadError)> {
        self.inner.lock().unavailable.clone()
    }

    pub fn is_scrubbing(&self) -> bool {
        self.inner.lock().scrub.is_some()
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.lock().interrupted.is_some()
    }

    fn ensure_armed(&self) {
        let armed = self
            .inner
            .pump
            .lock()
            .expect("playback pump poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if !armed {
            self.arm_events();
        }
    }

    fn load_failed(&self, generation: u64, key: TopicKey, err: AudioLoadError) {
        {
            let mut st = self.inner.lock();
            if st.generation != generation {
                return;
            }
            st.playback.can_play = false;
            st.playback.is_playing = false;
        }

        tracing::warn!(%key, error = %err, "topic audio unavailable");
        self.record_unavailable(key, err);
    }

    fn record_unavailable(&self, key: TopicKey, err: AudioLoadError) {
        self.inner.lock().unavailable = Some((key.clone(), err.clone()));
        self.inner.emit(AudioUnavailable::new(key, err.to_string()));
    }
}

impl PlaybackInner {
    fn lock(&self) -> MutexGuard<'_, PlaybackSlot> {
        self.state.lock().expect("PlaybackCoordinator state poisoned")
    }

    fn emit<E: Event>(&self, event: E) {
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }
}

impl Drop for PlaybackInner {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock()
            && let Some(handle) = pump.take()
        {
            handle.abort();
        }
    }
}

async fn pump_transport_events(
    inner: Weak<PlaybackInner>,
    mut receiver: broadcast::Receiver<AudioEvent>,
) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "audio event pump lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let coordinator = PlaybackCoordinator { inner };

        match event {
            AudioEvent::PositionTick(seconds) => coordinator.on_position(seconds),
            AudioEvent::Finished => {
                // the advance outlives this pump when an interruption re-arms it
                if let Some((session, from)) = coordinator.finish_current() {
                    tokio::spawn(async move {
                        coordinator.advance(session, from).await;
                    });
                }
            }
            AudioEvent::Failed(reason) => coordinator.on_transport_failed(reason),
        }
    }
}

fn clamp_position(seconds: f64, duration: f64) -> f64 {
    if seconds.is_nan() {
        return 0.0;
    }
    seconds.clamp(0.0, duration.max(0.0))
}
