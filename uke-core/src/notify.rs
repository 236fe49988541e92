//! Fan-out of readings and ticks to any number of UI listeners.

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// How many unread notifications a listener may fall behind by before
/// new ones are dropped for it.
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// A list of bounded channels fed by a single producer.
///
/// Publishing never blocks: a full listener misses the value, a dropped
/// listener is forgotten.
#[derive(Debug)]
pub struct Subscribers<T> {
    senders: Vec<Sender<T>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self { senders: Vec::new() }
    }
}

impl<T: Clone> Subscribers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new listener and returns its receiving end.
    pub fn subscribe(&mut self) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_CAPACITY);
        self.senders.push(tx);
        rx
    }

    pub fn publish(&mut self, value: &T) {
        self.senders.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
