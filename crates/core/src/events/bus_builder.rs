use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    events::{EnrichedEvent, EventBus, Route, RouteInbox, Routes},
    queues::{DrainTask, FifoDropOldestQueue, IsolatedForwarder, Latest1Queue, QueueKind},
    workers::{
        FifoInput, FifoReceiver, Latest1Input, SubscriptionSpec, WorkerInputs, WorkerWiring,
    },
};

pub struct BusConfig {
    pub bus_id: Uuid,
    /// Treat publishing an event nobody subscribed to as a bug.
    pub strict_routing: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_id: Uuid::new_v4(),
            strict_routing: false,
        }
    }
}

#[derive(Default)]
pub struct BusMetrics {
    unrouted_publish_total: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_unrouted(&self, event_type: &'static str) {
        self.unrouted_publish_total.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(event_type, "event published without subscribers");
    }

    pub fn unrouted_total(&self) -> u64 {
        self.unrouted_publish_total.load(Ordering::Relaxed)
    }
}

/// Drain tasks of isolated inputs; spawn them before publishing anything.
pub struct StartupTasks {
    pub tokio: Vec<DrainTask>,
}

impl StartupTasks {
    pub fn spawn_all(self) {
        for task in self.tokio {
            tokio::spawn(task);
        }
    }
}

fn validate(subs: &[SubscriptionSpec]) -> Result<()> {
    let mut seen_subscribers: HashSet<&'static str> = HashSet::new();
    for s in subs {
        if s.subscriber_id.trim().is_empty() {
            anyhow::bail!("empty subscriber_id");
        }
        if !seen_subscribers.insert(s.subscriber_id) {
            anyhow::bail!("duplicate subscriber_id={}", s.subscriber_id);
        }
        if s.inputs.is_empty() {
            anyhow::bail!("subscriber_id={} has no inputs", s.subscriber_id);
        }

        let mut seen_inputs: HashSet<&'static str> = HashSet::new();
        for i in &s.inputs {
            if i.event_type.trim().is_empty() {
                anyhow::bail!("subscriber_id={} has empty event_type", s.subscriber_id);
            }
            if !seen_inputs.insert(i.event_type) {
                anyhow::bail!(
                    "subscriber_id={} has duplicate input event_type={}",
                    s.subscriber_id,
                    i.event_type
                );
            }

            match i.queue_kind {
                QueueKind::Latest1 => {}
                QueueKind::FifoDropOldest { capacity } => {
                    anyhow::ensure!(capacity > 0, "capacity must be > 0")
                }
                QueueKind::Isolated { output_buffer } => {
                    anyhow::ensure!(output_buffer > 0, "output_buffer must be > 0")
                }
            }
        }
    }
    Ok(())
}

pub struct EventBusBuilder {
    cfg: BusConfig,
    subs: Vec<SubscriptionSpec>,
}

impl EventBusBuilder {
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            subs: Vec::new(),
        }
    }

    pub fn subscribe(mut self, s: SubscriptionSpec) -> Self {
        self.subs.push(s);
        self
    }

    pub fn build(self) -> Result<(EventBus, WorkerWiring, StartupTasks)> {
        validate(&self.subs)?;

        let mut table: HashMap<&'static str, Vec<Route>> = HashMap::new();
        let mut wiring: HashMap<&'static str, WorkerInputs> = HashMap::new();
        let mut tasks = StartupTasks { tokio: Vec::new() };

        for spec in self.subs {
            let wake = Arc::new(Notify::new());
            let mut latest = Vec::new();
            let mut fifos = Vec::new();

            for input in spec.inputs {
                let inbox = match input.queue_kind {
                    QueueKind::Latest1 => {
                        let q = Arc::new(Latest1Queue::new(Arc::clone(&wake)));
                        latest.push(Latest1Input {
                            event_type: input.event_type,
                            queue: Arc::clone(&q),
                        });
                        RouteInbox::Latest1(q)
                    }
                    QueueKind::FifoDropOldest { capacity } => {
                        let q = Arc::new(FifoDropOldestQueue::new(capacity, Arc::clone(&wake)));
                        fifos.push(FifoInput {
                            event_type: input.event_type,
                            receiver: FifoReceiver::FifoDropOldest(q.receiver()),
                        });
                        RouteInbox::FifoDropOldest(q)
                    }
                    QueueKind::Isolated { output_buffer } => {
                        let (fwd, out_rx, drain_task) =
                            IsolatedForwarder::<Arc<EnrichedEvent>>::new(
                                output_buffer,
                                Arc::clone(&wake),
                            );
                        tasks.tokio.push(drain_task);
                        fifos.push(FifoInput {
                            event_type: input.event_type,
                            receiver: FifoReceiver::Isolated(out_rx),
                        });
                        RouteInbox::Isolated(fwd)
                    }
                };

                table.entry(input.event_type).or_default().push(Route {
                    subscriber_id: spec.subscriber_id,
                    inbox,
                    drops_total: Arc::new(AtomicU64::new(0)),
                });
            }

            wiring.insert(spec.subscriber_id, WorkerInputs::new(latest, fifos, wake));
        }

        let bus = EventBus::new(self.cfg, Routes::new(table), Arc::new(BusMetrics::new()));
        Ok((bus, WorkerWiring::new(wiring), tasks))
    }
}
