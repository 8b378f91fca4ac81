//! Error types for the map and the shortener.
//!
//! All map-level failures are ordinary return values; nothing in this crate
//! signals out-of-band. The two IO-shaped variants ([`ShortenerError::Io`] and
//! [`ShortenerError::Replay`]) are unrecoverable: once either is returned the
//! in-memory state and the on-disk log can no longer be assumed to agree, and
//! the instance should be discarded.

use thiserror::Error;

/// Failures surfaced by [`SkipList`](crate::SkipList) operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// An insert collided with a live entry under the same key.
    #[error("key already exists")]
    KeyExists,

    /// A search or remove targeted a key that is not present.
    #[error("key not found")]
    KeyNotFound,

    /// A remove raced with another remove of the same key and lost the mark.
    #[error("key already deleted")]
    AlreadyDeleted,
}

/// Failures surfaced by [`Shortener`](crate::Shortener) operations.
#[derive(Debug, Error)]
pub enum ShortenerError {
    /// Every random identifier drawn collided with a live entry.
    #[error("could not assign an identifier after {0} attempts")]
    IdExhausted(u32),

    /// The caller supplied an empty identifier or target.
    #[error("identifier and target must be non-empty")]
    EmptyInput,

    /// A map operation failed; carries the underlying map error.
    #[error(transparent)]
    Map(#[from] MapError),

    /// Replaying the log re-applied an entry the map rejected. The log and
    /// the compactor disagree about history; unrecoverable.
    #[error("log replay failed at line {line_no}: {source}")]
    Replay {
        /// 1-based line number of the entry that failed to re-apply.
        line_no: usize,
        /// The map error the raw re-apply produced.
        source: MapError,
    },

    /// An operation on the log file failed. The in-memory map may now be
    /// ahead of the on-disk log; unrecoverable.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
