use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

/// Bounded FIFO that evicts its oldest entry instead of rejecting a push.
pub struct FifoDropOldestQueue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    buf: Mutex<VecDeque<T>>,
    capacity: usize,
    notify_any: Arc<Notify>,
}

pub struct FifoDropOldestReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> FifoDropOldestQueue<T> {
    pub fn new(capacity: usize, notify_any: Arc<Notify>) -> Self {
        let capacity = capacity.max(1);

        Self {
            shared: Arc::new(Shared {
                buf: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify_any,
            }),
        }
    }

    /// Appends `value`; returns true when the oldest entry was evicted to make room.
    pub fn push_overwrite(&self, value: T) -> bool {
        let evicted = {
            let mut buf = self.shared.buf.lock().expect("FifoDropOldestQueue poisoned");
            let evicted = buf.len() >= self.shared.capacity && buf.pop_front().is_some();
            buf.push_back(value);
            evicted
        };
        self.shared.notify_any.notify_one();
        evicted
    }

    pub fn receiver(&self) -> FifoDropOldestReceiver<T> {
        FifoDropOldestReceiver {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> FifoDropOldestReceiver<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.shared
            .buf
            .lock()
            .expect("FifoDropOldestQueue poisoned")
            .pop_front()
    }
}
