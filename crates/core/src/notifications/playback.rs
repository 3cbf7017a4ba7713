use serde::Serialize;

use crate::{
    notifications::{EventHeader, header_event},
    types::TopicKey,
};

#[derive(Clone, Debug, Serialize)]
pub struct TopicLoaded {
    pub header: EventHeader,
    pub key: TopicKey,
    pub index: usize,
    pub duration_seconds: f64,
}

header_event!(TopicLoaded, "playback.topic_loaded");

impl TopicLoaded {
    pub fn new(key: TopicKey, index: usize, duration_seconds: f64) -> Self {
        Self {
            header: EventHeader::new(),
            key,
            index,
            duration_seconds,
        }
    }
}

/// Audio for one topic could not be loaded; other topics and the session are unaffected.
#[derive(Clone, Debug, Serialize)]
pub struct AudioUnavailable {
    pub header: EventHeader,
    pub key: TopicKey,
    pub reason: String,
}

header_event!(AudioUnavailable, "playback.audio_unavailable");

impl AudioUnavailable {
    pub fn new(key: TopicKey, reason: String) -> Self {
        Self {
            header: EventHeader::new(),
            key,
            reason,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TopicAdvanced {
    pub header: EventHeader,
    pub session_id: String,
    pub from_index: usize,
    pub to_index: usize,
}

header_event!(TopicAdvanced, "playback.topic_advanced");

impl TopicAdvanced {
    pub fn new(session_id: String, from_index: usize, to_index: usize) -> Self {
        Self {
            header: EventHeader::new(),
            session_id,
            from_index,
            to_index,
        }
    }
}
