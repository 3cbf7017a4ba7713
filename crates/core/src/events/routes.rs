use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    events::EnrichedEvent,
    queues::{FifoDropOldestQueue, IsolatedForwarder, Latest1Queue},
};

#[derive(Default)]
pub struct Routes {
    table: HashMap<&'static str, Vec<Route>>,
}

impl Routes {
    pub fn new(table: HashMap<&'static str, Vec<Route>>) -> Self {
        Self { table }
    }

    pub fn for_type(&self, event_type: &str) -> Option<&[Route]> {
        self.table.get(event_type).map(Vec::as_slice)
    }

    pub fn drops_for(&self, subscriber_id: &str) -> u64 {
        self.table
            .values()
            .flatten()
            .filter(|r| r.subscriber_id == subscriber_id)
            .map(|r| r.drops_total.load(Ordering::Relaxed))
            .sum()
    }
}

pub struct Route {
    pub subscriber_id: &'static str,
    pub inbox: RouteInbox,
    pub drops_total: Arc<AtomicU64>,
}

pub enum RouteInbox {
    Latest1(Arc<Latest1Queue<Arc<EnrichedEvent>>>),
    FifoDropOldest(Arc<FifoDropOldestQueue<Arc<EnrichedEvent>>>),
    Isolated(IsolatedForwarder<Arc<EnrichedEvent>>),
}

impl RouteInbox {
    /// Returns false when delivery displaced or rejected an event.
    pub fn try_deliver(&self, event: Arc<EnrichedEvent>) -> bool {
        match self {
            RouteInbox::Latest1(q) => !q.set(event),
            RouteInbox::FifoDropOldest(q) => !q.push_overwrite(event),
            RouteInbox::Isolated(fwd) => fwd.try_send(event).is_ok(),
        }
    }
}
