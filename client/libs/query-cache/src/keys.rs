//! Query key contract
//!
//! Keys render as `{entity}[:{scope}]`, for example `posts`, `post:42` or
//! `friends:7`. The entity part labels metrics and drives kind-wide
//! invalidation.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Structured address of a cached query result
pub trait CacheKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {
    /// Resource kind, e.g. `"post"` for `post:42`
    fn entity(&self) -> &'static str;
}
