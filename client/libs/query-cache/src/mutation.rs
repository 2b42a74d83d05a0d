//! Optimistic mutation coordinator
//!
//! A mutation moves through a fixed cycle:
//!
//! 1. Freeze: cancel in-flight fetches of the affected keys and snapshot them
//! 2. Speculate: write the predicted views so the change shows immediately
//! 3. Commit: await the transport call
//! 4. Settle: keep (and optionally reconcile) on success, restore the
//!    snapshot on failure
//! 5. Invalidate: mark the affected keys stale either way, so the server's
//!    view eventually wins
//!
//! Concurrent mutations on overlapping keys are not serialized. A failing
//! mutation restores its own snapshot even if a later mutation wrote over it.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{CacheKey, EntityStore};

/// Values of the affected keys captured before speculation. `None` means
/// nothing was cached.
pub type Snapshot<K, V> = HashMap<K, Option<V>>;

type SpeculateFn<K, V> = Box<dyn FnOnce(&Snapshot<K, V>) -> HashMap<K, V> + Send>;
type ReconcileFn<K, V, R> = Box<dyn FnOnce(&R, &Snapshot<K, V>) -> HashMap<K, V> + Send>;
type KeyPredicate<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Pending,
    Speculated,
    Committing,
    SettledSuccess,
    SettledFailure,
}

impl MutationPhase {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::SettledSuccess | Self::SettledFailure)
    }
}

/// Description of one optimistic change
pub struct Mutation<K, V, R> {
    name: &'static str,
    affected: Vec<K>,
    speculate: Option<SpeculateFn<K, V>>,
    reconcile: Option<ReconcileFn<K, V, R>>,
    also_invalidate: Vec<K>,
    invalidate_where: Option<KeyPredicate<K>>,
}

impl<K: CacheKey, V, R> Mutation<K, V, R> {
    pub fn new<I>(name: &'static str, affected: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let mut seen = HashSet::new();
        let affected = affected
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();
        Self {
            name,
            affected,
            speculate: None,
            reconcile: None,
            also_invalidate: Vec::new(),
            invalidate_where: None,
        }
    }

    /// Predict new views from the snapshot. Keys outside the affected set
    /// are ignored.
    pub fn speculate<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Snapshot<K, V>) -> HashMap<K, V> + Send + 'static,
    {
        self.speculate = Some(Box::new(f));
        self
    }

    /// Adjust views with the server's answer after a successful commit. The
    /// second argument holds the affected keys as they are at that moment.
    pub fn reconcile<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&R, &Snapshot<K, V>) -> HashMap<K, V> + Send + 'static,
    {
        self.reconcile = Some(Box::new(f));
        self
    }

    /// Extra keys to mark stale once settled
    pub fn also_invalidate<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        self.also_invalidate.extend(keys);
        self
    }

    /// Mark every cached key accepted by `predicate` stale once settled
    pub fn also_invalidate_where<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.invalidate_where = Some(Box::new(predicate));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn affected(&self) -> &[K] {
        &self.affected
    }
}

/// Result of running a mutation through the coordinator
#[derive(Debug)]
pub struct MutationOutcome<R, E> {
    pub name: &'static str,
    pub phase: MutationPhase,
    pub result: Result<R, E>,
}

impl<R, E> MutationOutcome<R, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<R, E> {
        self.result
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs mutations against one entity store
pub struct MutationCoordinator<K, V> {
    store: EntityStore<K, V>,
    in_flight: Arc<AtomicUsize>,
}

impl<K, V> Clone for MutationCoordinator<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<K, V> MutationCoordinator<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: EntityStore<K, V>) -> Self {
        Self {
            store,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &EntityStore<K, V> {
        &self.store
    }

    /// Mutations currently waiting on their commit
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn run<R, E, F, Fut>(
        &self,
        mutation: Mutation<K, V, R>,
        commit: F,
    ) -> MutationOutcome<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let Mutation {
            name,
            affected,
            speculate,
            reconcile,
            also_invalidate,
            invalidate_where,
        } = mutation;
        let mutation_id = Uuid::new_v4();
        let mut phase = MutationPhase::Pending;

        let snapshot = self.store.freeze(&affected);
        debug!(%mutation_id, mutation = name, keys = affected.len(), ?phase, "Mutation frozen");

        if let Some(speculate) = speculate {
            let predicted = speculate(&snapshot);
            let written = self.store.write_many(self.within(name, &affected, predicted));
            phase = MutationPhase::Speculated;
            debug!(%mutation_id, mutation = name, written, ?phase, "Mutation speculated");
        }

        phase = MutationPhase::Committing;
        debug!(%mutation_id, mutation = name, ?phase, "Mutation committing");
        let result = {
            let _guard = InFlight::enter(&self.in_flight);
            commit().await
        };

        match &result {
            Ok(response) => {
                phase = MutationPhase::SettledSuccess;
                if let Some(reconcile) = reconcile {
                    let current: Snapshot<K, V> = affected
                        .iter()
                        .map(|key| (key.clone(), self.store.peek(key)))
                        .collect();
                    let overrides = reconcile(response, &current);
                    self.store.write_many(self.within(name, &affected, overrides));
                }
                info!(%mutation_id, mutation = name, "Mutation committed");
                self.store.metrics().record_mutation(name, "success");
            }
            Err(err) => {
                phase = MutationPhase::SettledFailure;
                let restored = self.store.restore_many(snapshot);
                warn!(%mutation_id, mutation = name, error = %err, restored, "Mutation failed, snapshot restored");
                self.store.metrics().record_mutation(name, "failure");
            }
        }

        for key in affected.iter().chain(also_invalidate.iter()) {
            self.store.invalidate(key);
        }
        if let Some(predicate) = invalidate_where {
            self.store.invalidate_where(|key| predicate(key));
        }
        debug!(%mutation_id, mutation = name, ?phase, "Mutation settled");

        MutationOutcome {
            name,
            phase,
            result,
        }
    }

    fn within(&self, name: &str, affected: &[K], values: HashMap<K, V>) -> Vec<(K, V)> {
        values
            .into_iter()
            .filter(|(key, _)| {
                let inside = affected.contains(key);
                if !inside {
                    warn!(mutation = name, key = %key, "Ignoring write outside affected keys");
                }
                inside
            })
            .collect()
    }
}
