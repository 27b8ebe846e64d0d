//! Per-key coalescing of in-flight work.
//!
//! The first caller for a key gets a [`Completion`] and does the work; every
//! caller (including the first) gets a receiver that observes the result.
//! The key is cleared when the completion is finished or dropped, so a failed
//! or panicked task never wedges its key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

type Slots<K, V> = Arc<Mutex<HashMap<K, watch::Receiver<Option<V>>>>>;

/// Outcome of [`InFlight::join_or_start`]
pub enum Join<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Caller owns the work and must finish it through the completion
    Started(Completion<K, V>),
    /// Work for this key is already running
    Joined(watch::Receiver<Option<V>>),
}

pub struct InFlight<K, V> {
    slots: Slots<K, V>,
}

impl<K, V> Clone for InFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the running work for `key`, or register a new one.
    pub fn join_or_start(&self, key: K) -> Join<K, V> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = slots.get(&key) {
            return Join::Joined(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        slots.insert(key.clone(), rx);
        Join::Started(Completion {
            key,
            tx,
            slots: Arc::clone(&self.slots),
            finished: false,
        })
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ownership of one in-flight slot
pub struct Completion<K, V>
where
    K: Eq + Hash + Clone,
{
    key: K,
    tx: watch::Sender<Option<V>>,
    slots: Slots<K, V>,
    finished: bool,
}

impl<K, V> Completion<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Receiver for the owner's own result.
    pub fn subscribe(&self) -> watch::Receiver<Option<V>> {
        self.tx.subscribe()
    }

    /// Publish the result to every waiter and clear the slot.
    pub fn finish(mut self, value: V) {
        self.tx.send_replace(Some(value));
        self.release();
    }

    fn release(&mut self) {
        if !self.finished {
            self.finished = true;
            self.slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key);
        }
    }
}

impl<K, V> Drop for Completion<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.release();
    }
}

/// Wait until the slot publishes a value. `None` if the owner went away
/// without finishing.
pub async fn wait_for_value<V: Clone>(rx: &mut watch::Receiver<Option<V>>) -> Option<V> {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    }
}
