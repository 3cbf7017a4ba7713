//! Audio transport for the terminal: resolves WAV references (downloading remote ones into
//! the cache), reads their duration with `hound` and runs a wall clock over the track.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use newscast_core::{AudioEvent, AudioLoadError, AudioRef, AudioTransport};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::cache::{audio_cache_path, is_remote, local_path};

pub const TICK: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Clock {
    duration: f64,
    position: f64,
    playing: bool,
    ticker: Option<JoinHandle<()>>,
}

impl Clock {
    fn halt(&mut self) {
        self.playing = false;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

pub struct WavClockTransport {
    http: reqwest::Client,
    cache_dir: PathBuf,
    clock: Arc<Mutex<Clock>>,
    events: broadcast::Sender<AudioEvent>,
}

impl WavClockTransport {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            http: reqwest::Client::new(),
            cache_dir: cache_dir.into(),
            clock: Arc::new(Mutex::new(Clock::default())),
            events,
        }
    }

    async fn resolve(&self, reference: &str) -> anyhow::Result<PathBuf> {
        if !is_remote(reference) {
            return Ok(local_path(reference));
        }

        let path = audio_cache_path(&self.cache_dir, reference);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }

        let bytes = self
            .http
            .get(reference)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("caching {}", path.display()))?;
        tracing::debug!(url = reference, path = %path.display(), "audio cached");
        Ok(path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.clock.lock().expect("transport clock poisoned")
    }
}

pub fn wav_duration(path: &Path) -> anyhow::Result<f64> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        anyhow::bail!("{} declares a zero sample rate", path.display());
    }
    Ok(reader.duration() as f64 / sample_rate as f64)
}

#[async_trait]
impl AudioTransport for WavClockTransport {
    async fn load(&self, audio: &AudioRef) -> Result<f64, AudioLoadError> {
        let failed = |e: anyhow::Error| AudioLoadError::LoadFailed {
            audio_ref: audio.to_string(),
            reason: format!("{e:#}"),
        };

        let path = self.resolve(audio.as_str()).await.map_err(failed)?;
        let duration = tokio::task::spawn_blocking(move || wav_duration(&path))
            .await
            .map_err(|e| failed(e.into()))?
            .map_err(failed)?;

        let mut clock = self.lock();
        clock.halt();
        clock.duration = duration;
        clock.position = 0.0;
        Ok(duration)
    }

    fn play(&self) {
        let mut clock = self.lock();
        if clock.playing || clock.position >= clock.duration {
            return;
        }
        clock.playing = true;
        clock.ticker = Some(tokio::spawn(run_clock(
            Arc::clone(&self.clock),
            self.events.clone(),
        )));
    }

    fn pause(&self) {
        self.lock().halt();
    }

    fn seek(&self, seconds: f64) {
        let mut clock = self.lock();
        clock.position = seconds.clamp(0.0, clock.duration);
    }

    fn stop(&self) {
        let mut clock = self.lock();
        clock.halt();
        clock.position = 0.0;
    }

    fn subscribe(&self) -> broadcast::Receiver<AudioEvent> {
        self.events.subscribe()
    }
}

async fn run_clock(clock: Arc<Mutex<Clock>>, events: broadcast::Sender<AudioEvent>) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;
    let mut last = Instant::now();

    loop {
        interval.tick().await;
        let now = Instant::now();
        let elapsed = now.duration_since(last).as_secs_f64();
        last = now;

        let event = {
            let mut clock = clock.lock().expect("transport clock poisoned");
            if !clock.playing {
                return;
            }
            clock.position = (clock.position + elapsed).min(clock.duration);
            if clock.position >= clock.duration {
                clock.playing = false;
                clock.ticker = None;
                AudioEvent::Finished
            } else {
                AudioEvent::PositionTick(clock.position)
            }
        };

        let finished = event == AudioEvent::Finished;
        let _ = events.send(event);
        if finished {
            return;
        }
    }
}
