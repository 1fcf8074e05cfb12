//! Aggregation store — the durable counter of cumulative interaction
//! weight between identity pairs.
//!
//! Same-key applies must never lose an increment; different keys must not
//! block each other. Edge counters are atomics reached through a read
//! lock, so concurrent applies only contend on the map lock when a new
//! edge is first inserted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use rapport_core::types::{AggregateEdge, InteractionEvent};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("unknown identity pair: {sender} -> {receiver}")]
    UnknownIdentity { sender: String, receiver: String },
}

type EdgeKey = (String, String);

/// In-memory aggregate of interaction weight per `(sender, receiver)`.
///
/// Exclusively owns edge mutation; everything else reads snapshots.
/// Counts are never decremented.
pub struct AggregationStore {
    known: HashSet<String>,
    edges: RwLock<HashMap<EdgeKey, AtomicU64>>,
}

impl AggregationStore {
    /// Create a store that accepts events only between the given
    /// identities.
    pub fn new(known_identities: impl IntoIterator<Item = String>) -> Self {
        Self {
            known: known_identities.into_iter().collect(),
            edges: RwLock::new(HashMap::new()),
        }
    }

    /// Seed an edge with a prior total (e.g. resumed from the mirror).
    pub fn seed(&self, sender_id: &str, receiver_id: &str, cumulative_weight: u64) {
        let mut edges = self.edges.write().expect("aggregate lock poisoned");
        edges.insert(
            (sender_id.to_string(), receiver_id.to_string()),
            AtomicU64::new(cumulative_weight),
        );
    }

    /// Add the event's weight to its edge, creating the edge on first use.
    ///
    /// Atomic with respect to concurrent applies for the same key. An
    /// event naming an unenrolled identity on either end is rejected and
    /// dropped; the caller is expected to log it.
    pub fn apply(&self, event: &InteractionEvent) -> Result<(), AggregateError> {
        if !self.known.contains(&event.sender_id) || !self.known.contains(&event.receiver_id) {
            return Err(AggregateError::UnknownIdentity {
                sender: event.sender_id.clone(),
                receiver: event.receiver_id.clone(),
            });
        }

        let key = (event.sender_id.clone(), event.receiver_id.clone());
        let weight = u64::from(event.weight);

        // Fast path: existing edge, fetch_add under the read lock so
        // applies for different keys proceed without mutual blocking.
        {
            let edges = self.edges.read().expect("aggregate lock poisoned");
            if let Some(counter) = edges.get(&key) {
                counter.fetch_add(weight, Ordering::Relaxed);
                return Ok(());
            }
        }

        // Slow path: first event for this edge. Another writer may have
        // inserted it between the locks, so add through the entry either way.
        let mut edges = self.edges.write().expect("aggregate lock poisoned");
        edges
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(weight, Ordering::Relaxed);
        Ok(())
    }

    /// Consistent point-in-time copy of all edges, sorted by key for
    /// stable downstream output.
    pub fn snapshot(&self) -> Vec<AggregateEdge> {
        let edges = self.edges.read().expect("aggregate lock poisoned");
        let mut out: Vec<AggregateEdge> = edges
            .iter()
            .map(|((sender, receiver), counter)| AggregateEdge {
                sender_id: sender.clone(),
                receiver_id: receiver.clone(),
                cumulative_weight: counter.load(Ordering::Relaxed),
            })
            .collect();
        out.sort_by(|a, b| {
            (a.sender_id.as_str(), a.receiver_id.as_str())
                .cmp(&(b.sender_id.as_str(), b.receiver_id.as_str()))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> AggregationStore {
        AggregationStore::new(["a".to_string(), "b".to_string(), "c".to_string()])
    }

    fn event(sender: &str, receiver: &str, weight: u32) -> InteractionEvent {
        InteractionEvent::new(sender.into(), receiver.into(), weight)
    }

    #[test]
    fn test_apply_sums_weights() {
        let store = store();
        for w in [5, 1, 1, 5] {
            store.apply(&event("b", "a", w)).unwrap();
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].cumulative_weight, 12);
    }

    #[test]
    fn test_apply_order_independent() {
        let forward = store();
        let reverse = store();
        let weights = [1u32, 5, 5, 1, 5];
        for &w in &weights {
            forward.apply(&event("b", "a", w)).unwrap();
        }
        for &w in weights.iter().rev() {
            reverse.apply(&event("b", "a", w)).unwrap();
        }
        assert_eq!(
            forward.snapshot()[0].cumulative_weight,
            reverse.snapshot()[0].cumulative_weight
        );
    }

    #[test]
    fn test_direction_is_distinct() {
        let store = store();
        store.apply(&event("b", "a", 5)).unwrap();
        store.apply(&event("a", "b", 1)).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_unknown_identity_rejected() {
        let store = store();
        let result = store.apply(&event("stranger", "a", 5));
        assert!(matches!(
            result,
            Err(AggregateError::UnknownIdentity { .. })
        ));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_seed_resumes_prior_total() {
        let store = store();
        store.seed("b", "a", 40);
        store.apply(&event("b", "a", 5)).unwrap();
        assert_eq!(store.snapshot()[0].cumulative_weight, 45);
    }

    #[test]
    fn test_concurrent_same_key_no_lost_update() {
        let store = Arc::new(store());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.apply(&event("b", "a", 1)).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.snapshot()[0].cumulative_weight, 8000);
    }

    #[test]
    fn test_concurrent_distinct_keys_uncorrupted() {
        let store = Arc::new(store());
        let pairs = [("b", "a"), ("a", "b"), ("c", "a"), ("c", "b")];
        let threads: Vec<_> = pairs
            .iter()
            .map(|&(s, r)| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        store.apply(&event(s, r, 2)).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 4);
        for edge in snapshot {
            assert_eq!(edge.cumulative_weight, 1000);
        }
    }
}
