use std::sync::Arc;

use tokio::sync::{Notify, mpsc};

use crate::{
    events::EnrichedEvent,
    queues::{FifoDropOldestReceiver, Latest1Queue},
};

pub struct Latest1Input {
    pub event_type: &'static str,
    pub queue: Arc<Latest1Queue<Arc<EnrichedEvent>>>,
}

pub enum FifoReceiver {
    FifoDropOldest(FifoDropOldestReceiver<Arc<EnrichedEvent>>),
    Isolated(mpsc::Receiver<Arc<EnrichedEvent>>),
}

impl FifoReceiver {
    fn try_recv(&mut self) -> Option<Arc<EnrichedEvent>> {
        match self {
            FifoReceiver::FifoDropOldest(r) => r.try_recv(),
            FifoReceiver::Isolated(r) => r.try_recv().ok(),
        }
    }
}

pub struct FifoInput {
    pub event_type: &'static str,
    pub receiver: FifoReceiver,
}

pub struct WorkerInputs {
    latest: Vec<Latest1Input>,
    fifos: Vec<FifoInput>,
    wake: Arc<Notify>,
    cursor: usize,
}

pub enum WorkerBatch {
    /// Newest value of every snapshot input that changed since the last batch.
    Snapshots(Vec<SnapshotUpdate>),
    FifoItem {
        event_type: &'static str,
        event: Arc<EnrichedEvent>,
    },
}

impl WorkerBatch {
    pub fn into_events(self) -> Vec<Arc<EnrichedEvent>> {
        match self {
            WorkerBatch::Snapshots(updates) => updates.into_iter().map(|u| u.event).collect(),
            WorkerBatch::FifoItem { event, .. } => vec![event],
        }
    }
}

pub struct SnapshotUpdate {
    pub event_type: &'static str,
    pub event: Arc<EnrichedEvent>,
}

impl WorkerInputs {
    pub fn new(latest: Vec<Latest1Input>, fifos: Vec<FifoInput>, wake: Arc<Notify>) -> Self {
        Self {
            latest,
            fifos,
            wake,
            cursor: 0,
        }
    }

    /// Waits for the next batch. Snapshot inputs take priority; FIFO inputs are polled
    /// round-robin so one busy input cannot starve the others.
    pub async fn next(&mut self) -> WorkerBatch {
        loop {
            let snapshots: Vec<SnapshotUpdate> = self
                .latest
                .iter()
                .filter_map(|input| {
                    input.queue.try_recv().map(|event| SnapshotUpdate {
                        event_type: input.event_type,
                        event,
                    })
                })
                .collect();

            if !snapshots.is_empty() {
                return WorkerBatch::Snapshots(snapshots);
            }

            let count = self.fifos.len();
            for _ in 0..count {
                let i = self.cursor;
                self.cursor = (self.cursor + 1) % count;

                let input = &mut self.fifos[i];
                if let Some(event) = input.receiver.try_recv() {
                    return WorkerBatch::FifoItem {
                        event_type: input.event_type,
                        event,
                    };
                }
            }

            self.wake.notified().await;
        }
    }
}
