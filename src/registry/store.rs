//! Concurrent routing table.
//!
//! # Responsibilities
//! - Map routing keys to backend descriptors
//! - Serve lock-free lookups to the dispatcher
//! - Apply idempotent upserts and source-keyed removals from the controller
//!
//! # Design Decisions
//! - Readers load an `ArcSwap` snapshot and never wait on writers
//! - Writers are serialized by a mutex and publish a fresh copy of the map
//! - Inserts are keyed by routing key, removals by source identity
//! - Removal is a linear scan; the table holds tens of entries

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::observability::metrics;
use crate::registry::descriptor::BackendDescriptor;

type Table = HashMap<String, Arc<BackendDescriptor>>;

/// Result of an [`Registry::upsert`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

/// Routing-key → descriptor map shared by the controller and dispatcher.
pub struct Registry {
    entries: ArcSwap<Table>,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Find the descriptor filed under `routing_key`.
    pub fn lookup(&self, routing_key: &str) -> Option<Arc<BackendDescriptor>> {
        self.entries.load().get(routing_key).cloned()
    }

    /// Insert or replace the descriptor under its routing key.
    ///
    /// Structurally identical descriptors are left untouched. Entries the same
    /// source filed under an older routing key are dropped in the same write.
    pub fn upsert(&self, descriptor: BackendDescriptor) -> UpsertOutcome {
        let _guard = self.write_lock.lock().expect("registry write lock poisoned");
        let current = self.entries.load_full();

        let stale_keys: Vec<String> = current
            .iter()
            .filter(|(key, d)| {
                d.source_identity == descriptor.source_identity && **key != descriptor.routing_key
            })
            .map(|(key, _)| key.clone())
            .collect();

        let outcome = match current.get(&descriptor.routing_key) {
            Some(existing) if **existing == descriptor => UpsertOutcome::Unchanged,
            Some(existing) => {
                if existing.source_identity != descriptor.source_identity {
                    tracing::warn!(
                        routing_key = %descriptor.routing_key,
                        previous_source = %existing.source_identity,
                        source = %descriptor.source_identity,
                        "Routing key claimed by another source, last write wins"
                    );
                }
                UpsertOutcome::Replaced
            }
            None => UpsertOutcome::Inserted,
        };

        if outcome == UpsertOutcome::Unchanged && stale_keys.is_empty() {
            return outcome;
        }

        let mut next: Table = (*current).clone();
        for key in &stale_keys {
            tracing::info!(
                routing_key = %key,
                source = %descriptor.source_identity,
                "Dropping route filed under previous routing key"
            );
            next.remove(key);
        }

        match outcome {
            UpsertOutcome::Inserted => tracing::info!(
                routing_key = %descriptor.routing_key,
                source = %descriptor.source_identity,
                "Add aggregator route"
            ),
            UpsertOutcome::Replaced => tracing::info!(
                routing_key = %descriptor.routing_key,
                source = %descriptor.source_identity,
                "Update aggregator route"
            ),
            UpsertOutcome::Unchanged => {}
        }

        next.insert(descriptor.routing_key.clone(), Arc::new(descriptor));
        metrics::record_registry_size(next.len());
        self.entries.store(Arc::new(next));
        outcome
    }

    /// Remove the descriptor produced by `source_identity`, if any.
    pub fn remove_by_source(&self, source_identity: &str) -> Option<Arc<BackendDescriptor>> {
        let _guard = self.write_lock.lock().expect("registry write lock poisoned");
        let current = self.entries.load_full();

        let key = current
            .iter()
            .find(|(_, d)| d.source_identity == source_identity)
            .map(|(key, _)| key.clone())?;

        let mut next: Table = (*current).clone();
        let removed = next.remove(&key);
        tracing::info!(routing_key = %key, source = %source_identity, "Delete aggregator route");
        metrics::record_registry_size(next.len());
        self.entries.store(Arc::new(next));
        removed
    }

    /// All descriptors currently routable, ordered by routing key.
    pub fn snapshot(&self) -> Vec<Arc<BackendDescriptor>> {
        let mut all: Vec<_> = self.entries.load().values().cloned().collect();
        all.sort_by(|a, b| a.routing_key.cmp(&b.routing_key));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
