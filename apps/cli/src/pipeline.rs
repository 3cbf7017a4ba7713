use newscast_core::{
    events::{BusConfig, EventBus, EventBusBuilder},
    workers::Worker,
};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};

use crate::status::StatusSink;

pub struct StatusHandle {
    pub bus: EventBus,
    pub shutdown_tx: broadcast::Sender<()>,
    pub settled_rx: oneshot::Receiver<()>,
    pub sink: JoinHandle<anyhow::Result<()>>,
}

impl StatusHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.sink.await {
            tracing::warn!(error = %e, "status sink task failed");
        }
    }
}

/// Builds the notification bus and starts the terminal status sink on it.
pub fn start_status(bus_config: BusConfig) -> anyhow::Result<StatusHandle> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let (settled_tx, settled_rx) = oneshot::channel::<()>();

    let builder = EventBusBuilder::new(bus_config).subscribe(StatusSink::subscription());
    let (bus, mut wiring, tasks) = builder.build()?;

    // isolated drain tasks must run before anything is published
    tasks.spawn_all();

    let sink = tokio::spawn(StatusSink::new(Some(settled_tx)).run(
        wiring.take(StatusSink::SUBSCRIBER_ID)?,
        bus.clone(),
        shutdown_rx,
    ));
    tracing::debug!(bus_id = %bus.bus_id(), "status sink started");

    Ok(StatusHandle {
        bus,
        shutdown_tx,
        settled_rx,
        sink,
    })
}
