use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::{Notify, mpsc};

pub type DrainTask = Pin<Box<dyn Future<Output = ()> + Send>>;

const INBOX_CAPACITY: usize = 16;

/// Decouples the publisher from a slow subscriber: publishes land in a small inbox and a drain
/// task forwards them to the subscriber's own bounded channel. The drain task must be spawned
/// before anything is published.
pub struct IsolatedForwarder<T> {
    inbox_tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> IsolatedForwarder<T> {
    pub fn new(
        output_buffer: usize,
        notify_any: Arc<Notify>,
    ) -> (IsolatedForwarder<T>, mpsc::Receiver<T>, DrainTask) {
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<T>(INBOX_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<T>(output_buffer.max(1));

        let drain_task: DrainTask = Box::pin(async move {
            while let Some(value) = inbox_rx.recv().await {
                if out_tx.send(value).await.is_err() {
                    break;
                }
                notify_any.notify_one();
            }
        });

        (IsolatedForwarder { inbox_tx }, out_rx, drain_task)
    }

    pub fn try_send(&self, value: T) -> Result<(), T> {
        self.inbox_tx.try_send(value).map_err(|e| e.into_inner())
    }
}
