//! Cache metrics for observability

use prometheus::{CounterVec, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    writes: CounterVec,
    invalidations: CounterVec,
    rollbacks: CounterVec,
    discarded_fetches: CounterVec,
    mutations: CounterVec,
}

impl CacheMetricsInner {
    fn new() -> Self {
        Self {
            hits: CounterVec::new(
                Opts::new("query_cache_hits_total", "Total cache hits"),
                &["entity"],
            )
            .expect("valid metric definition"),
            misses: CounterVec::new(
                Opts::new("query_cache_misses_total", "Total cache misses"),
                &["entity"],
            )
            .expect("valid metric definition"),
            writes: CounterVec::new(
                Opts::new("query_cache_writes_total", "Total cache writes"),
                &["entity"],
            )
            .expect("valid metric definition"),
            invalidations: CounterVec::new(
                Opts::new(
                    "query_cache_invalidations_total",
                    "Total cache invalidations",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            rollbacks: CounterVec::new(
                Opts::new(
                    "query_cache_rollbacks_total",
                    "Total keys restored from a mutation snapshot",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            discarded_fetches: CounterVec::new(
                Opts::new(
                    "query_cache_discarded_fetches_total",
                    "Fetch results ignored because they were superseded or stale",
                ),
                &["entity", "reason"],
            )
            .expect("valid metric definition"),
            mutations: CounterVec::new(
                Opts::new("query_cache_mutations_total", "Settled optimistic mutations"),
                &["mutation", "outcome"],
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        registry.register(Box::new(self.rollbacks.clone()))?;
        registry.register(Box::new(self.discarded_fetches.clone()))?;
        registry.register(Box::new(self.mutations.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

/// Cache metrics wrapper
#[derive(Clone, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_hit(&self, entity: &str) {
        get_metrics().hits.with_label_values(&[entity]).inc();
    }

    pub fn record_miss(&self, entity: &str) {
        get_metrics().misses.with_label_values(&[entity]).inc();
    }

    pub fn record_write(&self, entity: &str) {
        get_metrics().writes.with_label_values(&[entity]).inc();
    }

    pub fn record_invalidation(&self, entity: &str) {
        get_metrics()
            .invalidations
            .with_label_values(&[entity])
            .inc();
    }

    pub fn record_rollback(&self, entity: &str) {
        get_metrics().rollbacks.with_label_values(&[entity]).inc();
    }

    pub fn record_discarded_fetch(&self, entity: &str, reason: &str) {
        get_metrics()
            .discarded_fetches
            .with_label_values(&[entity, reason])
            .inc();
    }

    pub fn record_mutation(&self, mutation: &str, outcome: &str) {
        get_metrics()
            .mutations
            .with_label_values(&[mutation, outcome])
            .inc();
    }

    /// Current write count for an entity kind
    pub fn writes(&self, entity: &str) -> f64 {
        get_metrics().writes.with_label_values(&[entity]).get()
    }

    /// Current rollback count for an entity kind
    pub fn rollbacks(&self, entity: &str) -> f64 {
        get_metrics().rollbacks.with_label_values(&[entity]).get()
    }
}
