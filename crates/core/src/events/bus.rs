use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::time::Instant;
use uuid::Uuid;

use crate::events::{BusConfig, BusMetrics, EnrichedEvent, Event, Routes};

/// Fan-out of orchestrator notifications to subscriber queues. Publishing never blocks; a full
/// or overwritten queue counts a drop on its route.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    bus_id: Uuid,
    next_ingest_seq: AtomicU64,
    routes: Routes,
    metrics: Arc<BusMetrics>,
    strict_routing: bool,
}

impl EventBus {
    pub fn new(cfg: BusConfig, routes: Routes, metrics: Arc<BusMetrics>) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                bus_id: cfg.bus_id,
                next_ingest_seq: AtomicU64::new(0),
                routes,
                metrics,
                strict_routing: cfg.strict_routing,
            }),
        }
    }

    /// A bus with no subscribers; every publish is counted as unrouted.
    pub fn detached() -> Self {
        Self::new(
            BusConfig::default(),
            Routes::default(),
            Arc::new(BusMetrics::new()),
        )
    }

    pub fn emit<E: Event>(&self, event: E) {
        self.publish(Arc::new(event));
    }

    pub fn publish(&self, event: Arc<dyn Event>) {
        let ingest_seq = self.inner.next_ingest_seq.fetch_add(1, Ordering::Relaxed);
        let event_type = event.event_type();

        if tracing::enabled!(tracing::Level::TRACE) {
            match serde_json::to_string(&*event) {
                Ok(json) => tracing::trace!(event_type, ingest_seq, payload = %json, "publish"),
                Err(e) => tracing::trace!(event_type, ingest_seq, error = %e, "publish"),
            }
        }

        let enriched_event = Arc::new(EnrichedEvent {
            event,
            bus_id: self.inner.bus_id,
            ingest_seq,
            ingested_at: Instant::now(),
        });

        let Some(routes) = self.inner.routes.for_type(event_type) else {
            self.inner.metrics.record_unrouted(event_type);

            if self.inner.strict_routing {
                tracing::error!(event_type, "unrouted event on a strict bus");
                debug_assert!(false, "unrouted event type: {event_type}");
            }

            return;
        };

        for route in routes {
            if !route.inbox.try_deliver(Arc::clone(&enriched_event)) {
                route.drops_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    event_type,
                    subscriber = route.subscriber_id,
                    "subscriber queue dropped an event"
                );
            }
        }
    }

    pub fn bus_id(&self) -> Uuid {
        self.inner.bus_id
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    /// Events dropped so far for `subscriber_id` across all its inputs.
    pub fn drops_for(&self, subscriber_id: &str) -> u64 {
        self.inner.routes.drops_for(subscriber_id)
    }
}
