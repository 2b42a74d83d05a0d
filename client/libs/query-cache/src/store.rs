//! In-memory entity store
//!
//! Every key holds at most one immutable snapshot. Writes replace the whole
//! snapshot (last writer wins); invalidation only marks the key stale so the
//! data keeps rendering until the refetch lands.
//!
//! The map sits behind a `parking_lot::Mutex` that is never held across an
//! `.await`, so each store operation is atomic with respect to every other
//! one. Subscribers are fed through `tokio::sync::watch`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::{CacheKey, CacheMetrics};

/// What a subscriber sees for one key
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<V> {
    pub data: Option<V>,
    pub is_loading: bool,
    pub is_stale: bool,
    pub error: Option<String>,
}

impl<V> Default for QueryState<V> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_stale: false,
            error: None,
        }
    }
}

/// Handle for one in-flight fetch. Only the newest ticket of a key may
/// complete; older ones are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket<K> {
    key: K,
    generation: u64,
}

impl<K> FetchTicket<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Entry<V> {
    value: Option<V>,
    stale: bool,
    error: Option<String>,
    generation: u64,
    loading: bool,
    written_at: Option<Instant>,
    tx: watch::Sender<QueryState<V>>,
}

impl<V: Clone> Entry<V> {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(QueryState::default());
        Self {
            value: None,
            stale: false,
            error: None,
            generation: 0,
            loading: false,
            written_at: None,
            tx,
        }
    }

    fn aged(&self, stale_after: Option<Duration>) -> bool {
        match (stale_after, self.written_at) {
            (Some(limit), Some(at)) => at.elapsed() >= limit,
            _ => false,
        }
    }

    fn state(&self, stale_after: Option<Duration>) -> QueryState<V> {
        QueryState {
            data: self.value.clone(),
            is_loading: self.loading,
            is_stale: self.stale || self.aged(stale_after),
            error: self.error.clone(),
        }
    }

    fn write(&mut self, value: Option<V>) {
        self.written_at = value.as_ref().map(|_| Instant::now());
        self.value = value;
    }

    fn mark_fresh(&mut self) {
        self.stale = false;
        self.error = None;
    }

    fn owns(&self, ticket_generation: u64) -> bool {
        self.loading && self.generation == ticket_generation
    }
}

/// Keyed cache of query results
pub struct EntityStore<K, V> {
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
    metrics: CacheMetrics,
    stale_after: Option<Duration>,
}

impl<K, V> Clone for EntityStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            metrics: self.metrics.clone(),
            stale_after: self.stale_after,
        }
    }
}

impl<K: CacheKey, V: Clone + Send + Sync + 'static> Default for EntityStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: Clone + Send + Sync + 'static> EntityStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            metrics: CacheMetrics::new(),
            stale_after: None,
        }
    }

    /// Entries older than `stale_after` report stale without an explicit
    /// invalidation.
    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            stale_after: Some(stale_after),
            ..Self::new()
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.peek(key);
        match value {
            Some(_) => {
                trace!(key = %key, "Cache hit");
                self.metrics.record_hit(key.entity());
            }
            None => {
                trace!(key = %key, "Cache miss");
                self.metrics.record_miss(key.entity());
            }
        }
        value
    }

    /// Read without touching hit/miss metrics
    pub(crate) fn peek(&self, key: &K) -> Option<V> {
        self.entries
            .lock()
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |entry| entry.value.is_some())
    }

    /// Replace the snapshot held for `key`
    pub fn set(&self, key: K, value: V) {
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.write(Some(value));
            entry.mark_fresh();
            entry.tx.send_replace(entry.state(self.stale_after));
        }
        debug!(key = %key, "Cache set");
        self.metrics.record_write(key.entity());
    }

    /// Read-modify-write in one critical section. Returns the new value, or
    /// `None` when nothing is cached for `key`.
    pub fn update<F>(&self, key: &K, f: F) -> Option<V>
    where
        F: FnOnce(&V) -> V,
    {
        let next = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(key)?;
            let next = f(entry.value.as_ref()?);
            entry.write(Some(next.clone()));
            entry.tx.send_replace(entry.state(self.stale_after));
            next
        };
        debug!(key = %key, "Cache update");
        self.metrics.record_write(key.entity());
        Some(next)
    }

    /// Write several snapshots under a single lock
    pub fn write_many<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut written = Vec::new();
        {
            let mut entries = self.entries.lock();
            for (key, value) in values {
                let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
                entry.write(Some(value));
                entry.mark_fresh();
                entry.tx.send_replace(entry.state(self.stale_after));
                written.push(key);
            }
        }
        for key in &written {
            self.metrics.record_write(key.entity());
        }
        debug!(count = written.len(), "Cache write batch");
        written.len()
    }

    /// Forget the value under `key`. Subscribers see an empty state.
    pub fn remove(&self, key: &K) -> Option<V> {
        let previous = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(key)?;
            let previous = entry.value.take();
            entry.write(None);
            entry.mark_fresh();
            entry.tx.send_replace(entry.state(self.stale_after));
            previous
        };
        debug!(key = %key, "Cache remove");
        previous
    }

    /// Put a single snapshot back exactly, including "nothing cached"
    pub fn restore(&self, key: &K, snapshot: Option<V>) {
        self.restore_many(std::iter::once((key.clone(), snapshot)));
    }

    /// Put snapshots back exactly, all under one lock
    pub fn restore_many<I>(&self, snapshot: I) -> usize
    where
        I: IntoIterator<Item = (K, Option<V>)>,
    {
        let mut restored = Vec::new();
        {
            let mut entries = self.entries.lock();
            for (key, value) in snapshot {
                let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
                entry.write(value);
                entry.tx.send_replace(entry.state(self.stale_after));
                restored.push(key);
            }
        }
        for key in &restored {
            self.metrics.record_rollback(key.entity());
        }
        debug!(count = restored.len(), "Cache restore");
        restored.len()
    }

    /// Mark `key` for refetch on next read. The cached data stays visible.
    pub fn invalidate(&self, key: &K) -> bool {
        let marked = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.stale = true;
                    entry.tx.send_replace(entry.state(self.stale_after));
                    true
                }
                None => false,
            }
        };
        if marked {
            debug!(key = %key, "Cache invalidate");
            self.metrics.record_invalidation(key.entity());
        }
        marked
    }

    /// Invalidate every known key accepted by `predicate`
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let mut marked = Vec::new();
        {
            let mut entries = self.entries.lock();
            for (key, entry) in entries.iter_mut().filter(|(key, _)| predicate(key)) {
                entry.stale = true;
                entry.tx.send_replace(entry.state(self.stale_after));
                marked.push(key.clone());
            }
        }
        for key in &marked {
            self.metrics.record_invalidation(key.entity());
        }
        debug!(invalidated = marked.len(), "Cache invalidate by predicate");
        marked.len()
    }

    /// Keys currently holding data and accepted by `predicate`
    pub fn keys_where<P>(&self, predicate: P) -> Vec<K>
    where
        P: Fn(&K) -> bool,
    {
        self.entries
            .lock()
            .iter()
            .filter(|(key, entry)| entry.value.is_some() && predicate(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn is_stale(&self, key: &K) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |entry| entry.stale || entry.aged(self.stale_after))
    }

    /// Absent or stale keys should be fetched on read
    pub fn needs_fetch(&self, key: &K) -> bool {
        match self.entries.lock().get(key) {
            Some(entry) => {
                entry.value.is_none() || entry.stale || entry.aged(self.stale_after)
            }
            None => true,
        }
    }

    pub fn state(&self, key: &K) -> QueryState<V> {
        self.entries
            .lock()
            .get(key)
            .map(|entry| entry.state(self.stale_after))
            .unwrap_or_default()
    }

    /// Watch a key. The receiver observes every write, invalidation and
    /// fetch transition from now on.
    pub fn subscribe(&self, key: K) -> watch::Receiver<QueryState<V>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(Entry::new);
        let rx = entry.tx.subscribe();
        entry.tx.send_replace(entry.state(self.stale_after));
        rx
    }

    /// Start a fetch for `key`, superseding any earlier one
    pub fn begin_fetch(&self, key: K) -> FetchTicket<K> {
        let generation = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.generation += 1;
            entry.loading = true;
            entry.error = None;
            entry.tx.send_replace(entry.state(self.stale_after));
            entry.generation
        };
        trace!(key = %key, generation, "Fetch started");
        FetchTicket { key, generation }
    }

    /// Whether `ticket` is still the newest fetch for its key
    pub fn is_current(&self, ticket: &FetchTicket<K>) -> bool {
        self.entries
            .lock()
            .get(&ticket.key)
            .map_or(false, |entry| entry.owns(ticket.generation))
    }

    /// Land a fetch result. Returns `false` (and drops the value) when the
    /// ticket has been superseded or cancelled.
    pub fn complete_fetch(&self, ticket: &FetchTicket<K>, value: V) -> bool {
        let accepted = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&ticket.key) {
                Some(entry) if entry.owns(ticket.generation) => {
                    entry.write(Some(value));
                    entry.mark_fresh();
                    entry.loading = false;
                    entry.tx.send_replace(entry.state(self.stale_after));
                    true
                }
                _ => false,
            }
        };
        if accepted {
            debug!(key = %ticket.key, generation = ticket.generation, "Fetch completed");
            self.metrics.record_write(ticket.key.entity());
        } else {
            debug!(key = %ticket.key, generation = ticket.generation, "Superseded fetch result discarded");
            self.metrics
                .record_discarded_fetch(ticket.key.entity(), "superseded");
        }
        accepted
    }

    /// Record a failed fetch. Cached data is kept.
    pub fn fail_fetch(&self, ticket: &FetchTicket<K>, error: impl Into<String>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&ticket.key) {
            Some(entry) if entry.owns(ticket.generation) => {
                entry.loading = false;
                entry.error = Some(error.into());
                entry.tx.send_replace(entry.state(self.stale_after));
                true
            }
            _ => false,
        }
    }

    /// Finish a fetch whose result was written through another path
    pub fn release_fetch(&self, ticket: &FetchTicket<K>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&ticket.key) {
            Some(entry) if entry.owns(ticket.generation) => {
                entry.loading = false;
                entry.tx.send_replace(entry.state(self.stale_after));
                true
            }
            _ => false,
        }
    }

    /// Logically cancel the in-flight fetch for `key`; its result will be
    /// ignored when it arrives.
    pub fn cancel_fetch(&self, key: &K) -> bool {
        let cancelled = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.loading => {
                    entry.generation += 1;
                    entry.loading = false;
                    entry.tx.send_replace(entry.state(self.stale_after));
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            debug!(key = %key, "In-flight fetch cancelled");
        }
        cancelled
    }

    /// Drop every cached value (session teardown). Subscribers stay attached.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let count = entries.len();
        for entry in entries.values_mut() {
            entry.write(None);
            entry.mark_fresh();
            entry.generation += 1;
            entry.loading = false;
            entry.tx.send_replace(entry.state(self.stale_after));
        }
        debug!(cleared_entries = count, "Cache clear");
    }

    /// Number of keys holding data
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel in-flight fetches for `keys` and capture their current values,
    /// both under one lock so no fetch can land in between.
    pub(crate) fn freeze(&self, keys: &[K]) -> HashMap<K, Option<V>> {
        let mut entries = self.entries.lock();
        keys.iter()
            .map(|key| {
                let value = match entries.get_mut(key) {
                    Some(entry) => {
                        if entry.loading {
                            entry.generation += 1;
                            entry.loading = false;
                            entry.tx.send_replace(entry.state(self.stale_after));
                            trace!(key = %key, "In-flight fetch cancelled by mutation");
                        }
                        entry.value.clone()
                    }
                    None => None,
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Run `f` against the raw slot of `key` under the lock. An `Ok` is
    /// written back and published to subscribers; an `Err` leaves the entry
    /// and its write time as they were.
    pub(crate) fn modify<R, E, F>(&self, key: &K, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Option<V>) -> Result<R, E>,
    {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        let mut slot = entry.value.take();
        match f(&mut slot) {
            Ok(result) => {
                entry.write(slot);
                entry.tx.send_replace(entry.state(self.stale_after));
                Ok(result)
            }
            Err(err) => {
                entry.value = slot;
                Err(err)
            }
        }
    }

    pub(crate) fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum TestKey {
        Item(u32),
        List,
    }

    impl fmt::Display for TestKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestKey::Item(id) => write!(f, "item:{}", id),
                TestKey::List => write!(f, "list"),
            }
        }
    }

    impl CacheKey for TestKey {
        fn entity(&self) -> &'static str {
            match self {
                TestKey::Item(_) => "item",
                TestKey::List => "list",
            }
        }
    }

    #[test]
    fn test_set_replaces_previous_snapshot() {
        let store: EntityStore<TestKey, String> = EntityStore::new();
        store.set(TestKey::Item(1), "first".to_string());
        store.set(TestKey::Item(1), "second".to_string());
        assert_eq!(store.get(&TestKey::Item(1)), Some("second".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalidate_keeps_data_visible() {
        let store: EntityStore<TestKey, String> = EntityStore::new();
        store.set(TestKey::List, "cached".to_string());

        assert!(store.invalidate(&TestKey::List));
        assert_eq!(store.get(&TestKey::List), Some("cached".to_string()));
        assert!(store.is_stale(&TestKey::List));
        assert!(store.needs_fetch(&TestKey::List));

        // Unknown keys have nothing to invalidate
        assert!(!store.invalidate(&TestKey::Item(9)));
    }

    #[test]
    fn test_update_on_missing_key_is_noop() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        assert_eq!(store.update(&TestKey::Item(1), |v| v + 1), None);
        store.set(TestKey::Item(1), 1);
        assert_eq!(store.update(&TestKey::Item(1), |v| v + 1), Some(2));
    }

    #[test]
    fn test_subscriber_observes_writes() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        let mut rx = store.subscribe(TestKey::Item(3));
        assert_eq!(rx.borrow_and_update().data, None);

        store.set(TestKey::Item(3), 7);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().data, Some(7));

        store.invalidate(&TestKey::Item(3));
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.data, Some(7));
        assert!(state.is_stale);
    }

    #[test]
    fn test_newer_fetch_supersedes_older() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        let first = store.begin_fetch(TestKey::List);
        let second = store.begin_fetch(TestKey::List);

        assert!(!store.is_current(&first));
        assert!(store.complete_fetch(&second, 2));
        assert!(!store.complete_fetch(&first, 1));
        assert_eq!(store.get(&TestKey::List), Some(2));
        assert!(!store.state(&TestKey::List).is_loading);
    }

    #[test]
    fn test_cancelled_fetch_result_is_ignored() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        store.set(TestKey::Item(1), 10);
        let ticket = store.begin_fetch(TestKey::Item(1));
        assert!(store.state(&TestKey::Item(1)).is_loading);

        assert!(store.cancel_fetch(&TestKey::Item(1)));
        assert!(!store.complete_fetch(&ticket, 99));
        assert_eq!(store.get(&TestKey::Item(1)), Some(10));
        assert!(!store.cancel_fetch(&TestKey::Item(1)));
    }

    #[test]
    fn test_failed_fetch_keeps_data() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        store.set(TestKey::Item(1), 10);
        let ticket = store.begin_fetch(TestKey::Item(1));
        assert!(store.fail_fetch(&ticket, "boom"));

        let state = store.state(&TestKey::Item(1));
        assert_eq!(state.data, Some(10));
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert!(!state.is_loading);
    }

    #[test]
    fn test_restore_absent_snapshot_removes_value() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        store.set(TestKey::Item(4), 1);
        store.restore(&TestKey::Item(4), None);
        assert!(!store.contains(&TestKey::Item(4)));
        assert!(store.needs_fetch(&TestKey::Item(4)));
    }

    #[test]
    fn test_invalidate_where_and_keys_where() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        store.set(TestKey::Item(1), 1);
        store.set(TestKey::Item(2), 2);
        store.set(TestKey::List, 3);

        let mut items = store.keys_where(|k| matches!(k, TestKey::Item(_)));
        items.sort_by_key(|k| k.to_string());
        assert_eq!(items, vec![TestKey::Item(1), TestKey::Item(2)]);

        assert_eq!(store.invalidate_where(|k| matches!(k, TestKey::Item(_))), 2);
        assert!(store.is_stale(&TestKey::Item(1)));
        assert!(!store.is_stale(&TestKey::List));
    }

    #[test]
    fn test_stale_after_ages_entries() {
        let store: EntityStore<TestKey, u32> = EntityStore::with_stale_after(Duration::ZERO);
        store.set(TestKey::List, 1);
        assert!(store.is_stale(&TestKey::List));
        assert!(store.needs_fetch(&TestKey::List));
    }

    #[test]
    fn test_clear_drops_values_and_pending_fetches() {
        let store: EntityStore<TestKey, u32> = EntityStore::new();
        store.set(TestKey::List, 1);
        let ticket = store.begin_fetch(TestKey::Item(1));
        store.clear();

        assert!(store.is_empty());
        assert!(!store.complete_fetch(&ticket, 5));
    }
}
