//! Error types for the locking layer.
//!
//! Every failure a caller can observe is a [`LockingError`], which has exactly
//! two kinds: temporary (retry the whole acquisition with a fresh claim) and
//! permanent (abort the transaction). The [`LockFailure`] carried by either
//! kind describes what actually went wrong.
//!
//! Store implementations report [`BackendError`]s. These never leak to
//! callers directly; they are wrapped into the matching [`LockingError`] kind.

use crate::locking::claim::{KeyColumn, TimestampRid};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Error raised by a key-column-value store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Transient failure; the same call may succeed if retried.
    #[error("temporary backend failure: {message}")]
    Temporary { message: String },

    /// Non-retryable failure.
    #[error("permanent backend failure: {message}")]
    Permanent { message: String },
}

impl BackendError {
    /// Create a temporary backend error.
    pub fn temporary(message: impl Into<String>) -> Self {
        Self::Temporary {
            message: message.into(),
        }
    }

    /// Create a permanent backend error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Check if this error may be retried.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary { .. })
    }
}

/// Result type for store operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// A locking failure, classified as temporary or permanent.
#[derive(Debug, Error)]
pub enum LockingError {
    /// Transient store failure, timeout or local contention. The caller may
    /// retry the acquisition from scratch.
    #[error("temporary locking failure: {0}")]
    Temporary(#[source] LockFailure),

    /// A competing claim won, an expected value changed, or the store
    /// reported a non-retryable condition. The transaction must abort.
    #[error("permanent locking failure: {0}")]
    Permanent(#[source] LockFailure),
}

impl LockingError {
    /// Wrap a failure as temporary.
    pub fn temporary(failure: LockFailure) -> Self {
        Self::Temporary(failure)
    }

    /// Wrap a failure as permanent.
    pub fn permanent(failure: LockFailure) -> Self {
        Self::Permanent(failure)
    }

    /// Wrap a store error, keeping its temporary/permanent classification.
    pub fn backend(store: impl Into<String>, source: BackendError) -> Self {
        let temporary = source.is_temporary();
        let failure = LockFailure::Backend {
            store: store.into(),
            source,
        };
        if temporary {
            Self::Temporary(failure)
        } else {
            Self::Permanent(failure)
        }
    }

    /// Check if the caller may retry with a fresh claim.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The underlying failure detail.
    pub fn failure(&self) -> &LockFailure {
        match self {
            Self::Temporary(failure) | Self::Permanent(failure) => failure,
        }
    }
}

/// Result type using LockingError.
pub type LockResult<T> = Result<T, LockingError>;

/// What went wrong during a locking or checking operation.
#[derive(Debug, Error)]
pub enum LockFailure {
    /// The store rejected an operation.
    #[error("store {store}: {source}")]
    Backend {
        store: String,
        #[source]
        source: BackendError,
    },

    /// A store operation did not finish within its budget.
    #[error("{operation} exceeded its {budget:?} budget")]
    Timeout {
        operation: String,
        budget: Duration,
    },

    /// Another transaction in this process holds the local claim.
    #[error("local lock contention on {target}")]
    LocalContention { target: KeyColumn },

    /// Every attempt to write a claim failed or was too slow.
    #[error("could not write lock claim on {target} after {attempts} attempts")]
    WriteRetriesExhausted { target: KeyColumn, attempts: u32 },

    /// A competing claim sorts before ours.
    #[error("lock on {target} already held by {winner} (our claim {ours})")]
    AlreadyHeld {
        target: KeyColumn,
        ours: TimestampRid,
        winner: TimestampRid,
    },

    /// Our own claim aged past the expiry threshold before it was checked.
    #[error("expired lock on {target}: claim {claim} is older than {expire:?}")]
    ExpiredClaim {
        target: KeyColumn,
        claim: TimestampRid,
        expire: Duration,
    },

    /// The re-read found no claim matching the one we wrote.
    #[error("no lock claim matching {ours} found on {target} ({seen} claims read)")]
    ClaimNotFound {
        target: KeyColumn,
        ours: TimestampRid,
        seen: usize,
    },

    /// A lock column could not be decoded.
    #[error("malformed lock column {column}")]
    MalformedClaim { column: String },

    /// The value at a locked position changed since it was captured.
    #[error(
        "expected value mismatch for {target}: expected={} vs actual={} (store={store})",
        display_values(.expected.iter()),
        display_values(.actual.iter())
    )]
    ExpectedValueMismatch {
        store: String,
        target: KeyColumn,
        expected: Option<Bytes>,
        actual: Vec<Bytes>,
    },

    /// Lock acquisition attempted after the first mutation.
    #[error("transaction {tx} already started mutating; no further locks may be acquired")]
    MutationStarted { tx: u64 },

    /// Operation on a transaction that already committed or rolled back.
    #[error("transaction {tx} is closed")]
    TransactionClosed { tx: u64 },

    /// One or more lock records could not be deleted.
    #[error("failed to delete {failed} of {total} lock records: {first}")]
    CleanupFailed {
        failed: usize,
        total: usize,
        first: String,
    },
}

fn display_values<'a>(values: impl Iterator<Item = &'a Bytes>) -> String {
    let rendered: Vec<String> = values.map(|v| format!("0x{}", hex::encode(v))).collect();
    format!("[{}]", rendered.join(", "))
}
