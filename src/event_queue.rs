//! Bounded handoff from the non-realtime domain to the audio callback.
//!
//! The producer never blocks: when the queue is full it evicts the oldest entry. The consumer
//! only ever uses `try_recv`, so the audio thread never waits on a producer.

use crossbeam_channel::{self as channel, Receiver, Sender, TrySendError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = channel::bounded(capacity);
    let closed = Arc::new(AtomicBool::new(false));

    (
        QueueSender {
            tx,
            evict_rx: rx.clone(),
            closed: closed.clone(),
        },
        QueueReceiver {
            rx,
            capacity,
            closed,
        },
    )
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// The receiving side is gone.
    Closed(T),
}

pub struct QueueSender<T> {
    tx: Sender<T>,
    /// Lets the producer evict the oldest entry itself.
    evict_rx: Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        QueueSender {
            tx: self.tx.clone(),
            evict_rx: self.evict_rx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueues `item`, returning how many old entries were dropped to make room.
    pub fn push(&self, mut item: T) -> Result<usize, PushError<T>> {
        let mut evicted = 0;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(PushError::Closed(item));
            }
            match self.tx.try_send(item) {
                Ok(()) => return Ok(evicted),
                Err(TrySendError::Full(rejected)) => {
                    if self.evict_rx.try_recv().is_ok() {
                        evicted += 1;
                    }
                    item = rejected;
                }
                Err(TrySendError::Disconnected(rejected)) => {
                    return Err(PushError::Closed(rejected))
                }
            }
        }
    }
}

pub struct QueueReceiver<T> {
    rx: Receiver<T>,
    capacity: usize,
    closed: Arc<AtomicBool>,
}

impl<T> QueueReceiver<T> {
    /// Yields what is queued right now, at most one queue's worth, without blocking.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.try_iter().take(self.capacity)
    }
}

impl<T> Drop for QueueReceiver<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
