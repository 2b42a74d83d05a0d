//! Cache error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("Stale page: requested cursor {requested}, current cursor {current}")]
    StaleCursor { requested: String, current: String },

    #[error("No further pages (requested cursor {0})")]
    Exhausted(String),

    #[error("Cached value for {0} is not paginated")]
    NotPaginated(String),
}

pub(crate) fn describe_cursor<C: std::fmt::Debug>(cursor: Option<&C>) -> String {
    match cursor {
        Some(c) => format!("{:?}", c),
        None => "<initial>".to_string(),
    }
}
