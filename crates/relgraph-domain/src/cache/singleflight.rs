//! Singleflight for deduplicating concurrent identical sub-queries.

use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Result of trying to acquire a singleflight slot.
pub enum SingleflightSlot<V> {
    /// We won the race and should execute the operation.
    Leader(broadcast::Sender<V>),
    /// Another task is executing; wait for its result.
    Follower(broadcast::Receiver<V>),
}

/// Map of in-flight computations keyed by query.
///
/// The first caller for a key becomes the leader and computes the value;
/// callers arriving while it runs subscribe to its broadcast. A leader that
/// finishes without publishing (error, or a result that must not be shared)
/// or that is dropped closes the channel, and followers fall back to
/// computing on their own.
pub struct Singleflight<K, V>
where
    K: Hash + Eq + Clone,
{
    in_flight: DashMap<K, broadcast::Sender<V>>,
}

impl<K, V> Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically joins an existing flight or registers a new one.
    ///
    /// `may_wait` is consulted only when a flight for `key` already exists;
    /// when it returns false the caller gets `None` and must compute the
    /// value itself without registering.
    pub fn acquire(&self, key: &K, may_wait: impl FnOnce() -> bool) -> Option<SingleflightSlot<V>> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                if may_wait() {
                    Some(SingleflightSlot::Follower(entry.get().subscribe()))
                } else {
                    None
                }
            }
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                Some(SingleflightSlot::Leader(tx))
            }
        }
    }

    /// Removes a completed in-flight entry.
    pub fn complete(&self, key: &K) {
        self.in_flight.remove(key);
    }

    /// Number of computations currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl<K, V> Default for Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard owned by a flight leader.
///
/// Dropping the guard without publishing (the leader's future was
/// cancelled, or its result is not shareable) removes the entry and closes
/// the channel.
pub struct SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    singleflight: &'a Singleflight<K, V>,
    key: K,
    sender: Option<broadcast::Sender<V>>,
}

impl<'a, K, V> SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(singleflight: &'a Singleflight<K, V>, key: K, sender: broadcast::Sender<V>) -> Self {
        Self {
            singleflight,
            key,
            sender: Some(sender),
        }
    }

    /// The key this guard leads.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Publishes the value to every follower and retires the flight.
    ///
    /// The entry is removed before sending so late arrivals start a new
    /// flight instead of subscribing to a finished one.
    pub fn publish(mut self, value: V) {
        self.singleflight.complete(&self.key);
        if let Some(sender) = self.sender.take() {
            // No receivers is fine.
            let _ = sender.send(value);
        }
    }
}

impl<K, V> Drop for SingleflightGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.singleflight.complete(&self.key);
        }
    }
}
