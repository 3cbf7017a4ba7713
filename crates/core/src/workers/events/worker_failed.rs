use std::{any::Any, sync::Arc, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::Event;

#[derive(Clone, Debug, Serialize)]
pub struct WorkerFailed {
    pub event_id: Uuid,
    pub ts: SystemTime,
    pub parents: [Uuid; 1],
    pub failed_event_type: &'static str,
    pub worker: &'static str,
    pub message: String,
}

impl WorkerFailed {
    pub const EVENT_TYPE: &'static str = "worker.failed";

    pub fn new(failed: &Arc<dyn Event>, worker: &'static str, message: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            ts: SystemTime::now(),
            parents: [failed.event_id()],
            failed_event_type: failed.event_type(),
            worker,
            message,
        }
    }
}

impl Event for WorkerFailed {
    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn parent_ids(&self) -> &[Uuid] {
        &self.parents
    }

    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn timestamp(&self) -> SystemTime {
        self.ts
    }

    fn as_any(&self) -> &dyn Any {
        self as &dyn Any
    }
}
