//! Optimistic client-side query cache
//!
//! Holds the results of remote queries under structured keys and lets callers
//! mutate them speculatively before the server confirms:
//! - Entity store with last-writer-wins writes, soft invalidation and watch subscriptions
//! - Fetch tickets so a newer fetch supersedes an older in-flight one
//! - Cursor-checked pagination (stale pages are discarded)
//! - Mutation coordinator: snapshot, speculate, commit, reconcile or roll back
//! - Metrics integration

mod error;
mod keys;
mod metrics;

pub mod mutation;
pub mod pagination;
pub mod store;

pub use error::PaginationError;
pub use keys::CacheKey;
pub use metrics::CacheMetrics;
pub use mutation::{Mutation, MutationCoordinator, MutationOutcome, MutationPhase, Snapshot};
pub use pagination::{Page, PageSlot, Paginated};
pub use store::{EntityStore, FetchTicket, QueryState};
