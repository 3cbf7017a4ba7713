use std::collections::HashMap;

use crate::{queues::QueueKind, workers::WorkerInputs};

pub struct SubscriptionSpec {
    pub subscriber_id: &'static str,
    pub inputs: Vec<InputSpec>,
}

pub struct InputSpec {
    pub event_type: &'static str,
    pub queue_kind: QueueKind,
}

impl InputSpec {
    pub fn latest(event_type: &'static str) -> Self {
        Self {
            event_type,
            queue_kind: QueueKind::Latest1,
        }
    }

    pub fn fifo(event_type: &'static str, capacity: usize) -> Self {
        Self {
            event_type,
            queue_kind: QueueKind::FifoDropOldest { capacity },
        }
    }

    pub fn isolated(event_type: &'static str, output_buffer: usize) -> Self {
        Self {
            event_type,
            queue_kind: QueueKind::Isolated { output_buffer },
        }
    }
}

/// Inputs built by the bus builder, handed out once per subscriber.
pub struct WorkerWiring {
    inputs: HashMap<&'static str, WorkerInputs>,
}

impl WorkerWiring {
    pub fn new(inputs: HashMap<&'static str, WorkerInputs>) -> Self {
        Self { inputs }
    }

    pub fn take(&mut self, subscriber_id: &'static str) -> anyhow::Result<WorkerInputs> {
        self.inputs
            .remove(subscriber_id)
            .ok_or_else(|| anyhow::anyhow!("no wiring for subscriber_id={subscriber_id}"))
    }
}
