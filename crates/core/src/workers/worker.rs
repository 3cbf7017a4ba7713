use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use crate::{
    events::{EnrichedEvent, EventBus},
    workers::{SubscriptionSpec, WorkerFailed, WorkerInputs},
};

/// A bus subscriber running on its own task.
pub trait Worker: Send + Sized + 'static {
    const SUBSCRIBER_ID: &'static str;

    fn subscription() -> SubscriptionSpec;

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> Result<()>;

    /// Handles batches until `shutdown` fires. A failing `handle` publishes `WorkerFailed`
    /// and the worker keeps running.
    async fn run(
        mut self,
        mut inputs: WorkerInputs,
        bus: EventBus,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                batch = inputs.next() => {
                    for event in batch.into_events() {
                        let parent = Arc::clone(&event.event);
                        if let Err(e) = self.handle(event, &bus).await {
                            tracing::warn!(
                                worker = Self::SUBSCRIBER_ID,
                                event_type = parent.event_type(),
                                error = %e,
                                "worker failed to handle event"
                            );
                            if parent.event_type() != WorkerFailed::EVENT_TYPE {
                                bus.emit(WorkerFailed::new(
                                    &parent,
                                    Self::SUBSCRIBER_ID,
                                    format!("{e}"),
                                ));
                            }
                        }
                    }
                }
            }
        }
    }
}
