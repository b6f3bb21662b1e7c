//! State broadcasting.
//!
//! Each engine component owns one [`StateStream`] and publishes a fresh copy
//! of its observable state after every committed mutation. Subscribers only
//! ever see whole states: the watch channel holds the latest value and a
//! slow observer skips intermediate ones instead of lagging behind.

use tokio::sync::watch;

/// Single-writer, multi-reader stream of state values.
#[derive(Debug)]
pub struct StateStream<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> StateStream<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the published state. Succeeds with or without subscribers.
    pub fn publish(&self, state: T) {
        self.tx.send_replace(state);
    }

    /// A receiver positioned at the current state.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Copy of the most recently published state.
    pub fn latest(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Default> Default for StateStream<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
