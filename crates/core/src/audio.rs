use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{error::AudioLoadError, types::AudioRef};

/// Events reported by an audio transport while a track is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    PositionTick(f64),
    Finished,
    Failed(String),
}

/// Platform audio output. `load` resolves to the track duration in seconds.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    async fn load(&self, audio: &AudioRef) -> Result<f64, AudioLoadError>;
    fn play(&self);
    fn pause(&self);
    fn seek(&self, seconds: f64);
    fn stop(&self);

    /// A fresh receiver for transport events. Receivers may stop receiving after an
    /// interruption and have to be re-acquired.
    fn subscribe(&self) -> broadcast::Receiver<AudioEvent>;
}
