//! Unbounded FIFO mailbox: one mutex and one condition variable per actor.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use tern_core::RawCell;

#[derive(Debug, PartialEq, Eq)]
pub enum Envelope {
    /// An owned message value.
    Message(RawCell),
    /// Out-of-band stop request.
    Stop,
}

// A message cell moves between threads by value; the reference it carries
// is owned by exactly one side at a time.
unsafe impl Send for Envelope {}

#[derive(Debug, Default)]
pub struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    ready: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue at the back and wake the receiver.
    pub fn push(&self, envelope: Envelope) {
        self.queue.lock().push_back(envelope);
        self.ready.notify_one();
    }

    /// Block until an envelope is available and take the oldest one.
    pub fn recv(&self) -> Envelope {
        let mut queue = self.queue.lock();
        loop {
            if let Some(envelope) = queue.pop_front() {
                return envelope;
            }
            self.ready.wait(&mut queue);
        }
    }

    pub fn try_recv(&self) -> Option<Envelope> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Remove every pending message, dropping stop sentinels.
    pub fn drain(&self) -> Vec<RawCell> {
        self.queue
            .lock()
            .drain(..)
            .filter_map(|e| match e {
                Envelope::Message(cell) => Some(cell),
                Envelope::Stop => None,
            })
            .collect()
    }
}
