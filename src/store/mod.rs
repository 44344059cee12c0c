//! Reactive state containers
//!
//! A `Writable<T>` holds the latest value and notifies subscribers on every
//! write. `Stores` bundles the containers the connection initializer
//! publishes into; callers create it and pass it in.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::client::Socket;

/// Last-write-wins value with change notification
pub struct Writable<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Writable<T> {
    /// Create a store holding `initial`
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the value and notify subscribers
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Modify the value in place and notify subscribers
    pub fn update<F>(&self, modify: F)
    where
        F: FnOnce(&mut T),
    {
        self.tx.send_modify(modify);
    }

    /// Receiver that observes every subsequent write
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Writable<T> {
    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Default> Default for Writable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Writable").field(&*self.tx.borrow()).finish()
    }
}

/// Shared state written by the connection
#[derive(Debug, Clone, Default)]
pub struct Stores {
    /// The current connection
    pub socket: Writable<Option<Socket>>,
    /// Connected users as last reported by the server
    pub active_user_count: Writable<Option<u64>>,
    /// Models in use as last reported by the server
    pub usage_pool: Writable<Vec<String>>,
}

impl Stores {
    /// Empty stores
    pub fn new() -> Self {
        Self::default()
    }
}
