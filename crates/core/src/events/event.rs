use std::{any::Any, sync::Arc, time::SystemTime};

use erased_serde::Serialize as ErasedSerialize;
use tokio::time::Instant;
use uuid::Uuid;

/// A notification published on the [`EventBus`](crate::events::EventBus). Implemented for the
/// coordinator notifications through `header_event!`.
pub trait Event: Send + Sync + ErasedSerialize + 'static {
    fn event_id(&self) -> Uuid;
    fn parent_ids(&self) -> &[Uuid];
    fn event_type(&self) -> &'static str;
    fn timestamp(&self) -> SystemTime;

    fn as_any(&self) -> &dyn Any;
}

erased_serde::serialize_trait_object!(Event);

/// An event as delivered to a subscriber, stamped by the bus that routed it.
pub struct EnrichedEvent {
    pub event: Arc<dyn Event>,
    /// Publish order on this bus, starting at 0.
    pub ingest_seq: u64,
    pub bus_id: Uuid,
    pub ingested_at: Instant,
}

impl EnrichedEvent {
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// Time spent between publishing and now; large values mean a lagging subscriber.
    pub fn queued_for(&self) -> std::time::Duration {
        self.ingested_at.elapsed()
    }

    /// Serialized payload, for logging.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&*self.event)
    }
}

pub fn downcast_ref<T: 'static>(e: &Arc<dyn Event>) -> Option<&T> {
    e.as_any().downcast_ref::<T>()
}

/// Downcasts `e`, or fails naming the event type that actually arrived.
pub fn expect<'a, T: 'static>(
    e: &'a Arc<dyn Event>,
    expected_event_type: &'static str,
) -> anyhow::Result<&'a T> {
    downcast_ref::<T>(e).ok_or_else(|| {
        anyhow::anyhow!(
            "expected event_type={}, got={}",
            expected_event_type,
            e.event_type()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{FetchCancelled, PhaseChanged};
    use crate::types::FetchPhase;

    fn enriched(event: Arc<dyn Event>) -> EnrichedEvent {
        EnrichedEvent {
            event,
            ingest_seq: 1,
            bus_id: Uuid::new_v4(),
            ingested_at: Instant::now(),
        }
    }

    #[test]
    fn expect_names_both_event_types_on_mismatch() {
        let event: Arc<dyn Event> = Arc::new(FetchCancelled::new(3, FetchPhase::Summarizing));

        assert!(expect::<FetchCancelled>(&event, FetchCancelled::EVENT_TYPE).is_ok());
        let err = expect::<PhaseChanged>(&event, PhaseChanged::EVENT_TYPE).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected event_type=fetch.phase_changed, got=fetch.cancelled"
        );
    }

    #[test]
    fn payload_serializes_through_the_trait_object() {
        let e = enriched(Arc::new(PhaseChanged::new(
            7,
            FetchPhase::Gathering,
            FetchPhase::Summarizing,
        )));

        let json = e.to_json().unwrap();
        assert_eq!(e.event_type(), "fetch.phase_changed");
        assert_eq!(json["attempt"], 7);
        assert_eq!(json["to"], "summarizing");
    }
}
