//! In-flight request coalescing.
//!
//! When several callers ask for the same key while a request is running,
//! only the first (the leader) does the work. Everyone else subscribes to
//! the leader's broadcast and receives the same result.
//!
//! ```text
//! caller A ─┐
//! caller B ─┼──► RequestCoalescer ──► one upstream call
//! caller C ─┘          │                     │
//!                      ▼                     ▼
//!              [A, B, C receive the same result]
//! ```
//!
//! The map lock is only held to register or complete a key, never while the
//! work runs, so unrelated keys proceed in parallel. Nothing is cached: once
//! a key completes it is removed and the next caller leads a fresh request.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::debug;

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Total requests received
    pub total_requests: u64,
    /// Requests that joined existing work
    pub coalesced_requests: u64,
    /// Requests that triggered new work
    pub new_requests: u64,
}

/// Tracks in-flight work per key.
pub struct RequestCoalescer<K, V> {
    in_flight: Mutex<HashMap<K, broadcast::Sender<V>>>,
    stats: Mutex<CoalescerStats>,
}

/// Outcome of [`RequestCoalescer::register`].
pub enum Registration<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// First caller for the key: do the work and hand the result to `guard`.
    Leader {
        guard: InFlightGuard<K, V>,
        receiver: broadcast::Receiver<V>,
    },
    /// Work already running: wait on the receiver.
    Follower(broadcast::Receiver<V>),
}

impl<K, V> Registration<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader { .. })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CoalescerStats::default()),
        }
    }

    /// Register interest in `key`, becoming either its leader or a follower.
    pub fn register(self: &Arc<Self>, key: K) -> Registration<K, V> {
        let mut in_flight = lock(&self.in_flight);
        let mut stats = lock(&self.stats);
        stats.total_requests += 1;

        if let Some(tx) = in_flight.get(&key) {
            stats.coalesced_requests += 1;
            debug!(key = ?key, "Coalescing request - waiting for in-flight work");
            return Registration::Follower(tx.subscribe());
        }

        // One result is ever sent per key.
        let (tx, receiver) = broadcast::channel(1);
        in_flight.insert(key.clone(), tx);
        stats.new_requests += 1;
        debug!(
            key = ?key,
            in_flight_count = in_flight.len(),
            "New request - starting work"
        );

        Registration::Leader {
            guard: InFlightGuard {
                coalescer: Arc::clone(self),
                key: Some(key),
            },
            receiver,
        }
    }

    /// Remove `key` and broadcast `value` to everyone waiting on it.
    fn complete(&self, key: &K, value: V) {
        let tx = lock(&self.in_flight).remove(key);
        if let Some(tx) = tx {
            let waiters = tx.receiver_count();
            // Receivers may all have been dropped; nothing to deliver then.
            let _ = tx.send(value);
            debug!(key = ?key, waiters, "Broadcast result to waiters");
        }
    }

    /// Remove `key` without a result. Waiters observe a closed channel.
    fn abandon(&self, key: &K) {
        if lock(&self.in_flight).remove(key).is_some() {
            debug!(key = ?key, "In-flight request abandoned");
        }
    }

    /// Number of keys currently in flight.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn stats(&self) -> CoalescerStats {
        *lock(&self.stats)
    }
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the leader. Completing broadcasts the result; dropping without
/// completing releases the key so waiters are not stranded.
pub struct InFlightGuard<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    coalescer: Arc<RequestCoalescer<K, V>>,
    key: Option<K>,
}

impl<K, V> InFlightGuard<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn complete(mut self, value: V) {
        if let Some(key) = self.key.take() {
            self.coalescer.complete(&key, value);
        }
    }
}

impl<K, V> Drop for InFlightGuard<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.coalescer.abandon(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coalescer() -> Arc<RequestCoalescer<u32, String>> {
        Arc::new(RequestCoalescer::new())
    }

    #[tokio::test]
    async fn test_second_registration_follows() {
        let c = coalescer();
        let first = c.register(7);
        let second = c.register(7);

        assert!(first.is_leader());
        assert!(!second.is_leader());
        assert_eq!(c.in_flight_count(), 1);

        let (guard, mut leader_rx) = match first {
            Registration::Leader { guard, receiver } => (guard, receiver),
            Registration::Follower(_) => unreachable!(),
        };
        let mut follower_rx = match second {
            Registration::Follower(rx) => rx,
            Registration::Leader { .. } => unreachable!(),
        };

        guard.complete("done".to_string());
        assert_eq!(leader_rx.recv().await.unwrap(), "done");
        assert_eq!(follower_rx.recv().await.unwrap(), "done");
        assert_eq!(c.in_flight_count(), 0);

        let stats = c.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.coalesced_requests, 1);
        assert_eq!(stats.new_requests, 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_both_lead() {
        let c = coalescer();
        let first = c.register(1);
        let second = c.register(2);
        assert!(first.is_leader());
        assert!(second.is_leader());
        assert_eq!(c.in_flight_count(), 2);

        drop(first);
        drop(second);
        assert_eq!(c.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_completed_key_leads_again() {
        let c = coalescer();
        match c.register(1) {
            Registration::Leader { guard, .. } => guard.complete("a".to_string()),
            Registration::Follower(_) => unreachable!(),
        }
        assert!(c.register(1).is_leader());
    }

    #[tokio::test]
    async fn test_dropped_guard_closes_waiters() {
        let c = coalescer();
        let leader = c.register(3);
        let mut follower_rx = match c.register(3) {
            Registration::Follower(rx) => rx,
            Registration::Leader { .. } => unreachable!(),
        };

        drop(leader);
        assert!(follower_rx.recv().await.is_err());
        assert_eq!(c.in_flight_count(), 0);
    }
}
