use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::FetchError,
    notifications::{EventHeader, header_event},
    types::{FetchPhase, Session},
};

#[derive(Clone, Debug, Serialize)]
pub struct PhaseChanged {
    pub header: EventHeader,
    pub attempt: u64,
    pub from: FetchPhase,
    pub to: FetchPhase,
}

header_event!(PhaseChanged, "fetch.phase_changed");

impl PhaseChanged {
    pub fn new(attempt: u64, from: FetchPhase, to: FetchPhase) -> Self {
        Self {
            header: EventHeader::new(),
            attempt,
            from,
            to,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionPublished {
    pub header: EventHeader,
    pub attempt: u64,
    pub session_id: String,
    pub topics: Vec<String>,
    #[serde(skip)]
    pub session: Arc<Session>,
}

header_event!(SessionPublished, "fetch.session_published");

impl SessionPublished {
    pub fn new(attempt: u64, session: Arc<Session>) -> Self {
        Self {
            header: EventHeader::new(),
            attempt,
            session_id: session.id.clone(),
            topics: session.sections.iter().map(|s| s.topic.clone()).collect(),
            session,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FetchFailed {
    pub header: EventHeader,
    pub attempt: u64,
    pub message: String,
    #[serde(skip)]
    pub error: FetchError,
}

header_event!(FetchFailed, "fetch.failed");

impl FetchFailed {
    pub fn new(attempt: u64, error: FetchError) -> Self {
        Self {
            header: EventHeader::new(),
            attempt,
            message: error.to_string(),
            error,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FetchCancelled {
    pub header: EventHeader,
    pub attempt: u64,
    pub phase: FetchPhase,
}

header_event!(FetchCancelled, "fetch.cancelled");

impl FetchCancelled {
    pub fn new(attempt: u64, phase: FetchPhase) -> Self {
        Self {
            header: EventHeader::new(),
            attempt,
            phase,
        }
    }
}
