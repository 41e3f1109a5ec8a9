// ============================================
// File: crates/nyxpath-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Base error enum wrapped by the core, transport and router error types.
//! Only failures that are meaningful below the protocol layer live here:
//! malformed identifiers, bad hop counts, bounded resources running out.
//!
//! ## Main Functionality
//! - `CommonError`: id, hop-count, decoding, capacity and state failures
//! - `Result<T>`: alias over `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never put key material or full path ids in messages; ids are printed
//!   through their truncated `Debug` form
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use crate::types::IdParseError;

/// Common result type.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors shared by every nyxpath crate.
///
/// # Example
/// ```
/// use nyxpath_common::error::{CommonError, Result};
///
/// fn check_hops(count: usize) -> Result<()> {
///     if count == 0 || count > 8 {
///         return Err(CommonError::HopCount { count, max: 8 });
///     }
///     Ok(())
/// }
/// assert!(check_hops(0).is_err());
/// ```
#[derive(Error, Debug)]
pub enum CommonError {
    /// A path or router id could not be parsed.
    #[error("Invalid id: {0}")]
    InvalidId(#[from] IdParseError),

    /// A circuit was requested with an unusable number of hops.
    #[error("Hop count {count} not in [1, {max}]")]
    HopCount {
        /// Requested hop count
        count: usize,
        /// Largest accepted hop count
        max: usize,
    },

    /// Bytes from the wire did not decode.
    #[error("Decoding {what} failed: {details}")]
    Decoding {
        /// What was being decoded
        what: String,
        /// Decoder message
        details: String,
    },

    /// A bounded table or queue is full.
    #[error("{resource} is full (limit {limit})")]
    Exhausted {
        /// Name of the table or queue
        resource: String,
        /// Its capacity
        limit: usize,
    },

    /// An operation arrived in a state that cannot accept it.
    #[error("Wrong state: expected {expected}, found {current}")]
    WrongState {
        /// State the operation needs
        expected: String,
        /// State actually found
        current: String,
    },

    /// System I/O failure.
    #[error("I/O error while {context}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl CommonError {
    /// Creates a `Decoding` error.
    pub fn decoding(what: impl Into<String>, details: impl ToString) -> Self {
        Self::Decoding {
            what: what.into(),
            details: details.to_string(),
        }
    }

    /// Creates an `Exhausted` error.
    pub fn exhausted(resource: impl Into<String>, limit: usize) -> Self {
        Self::Exhausted {
            resource: resource.into(),
            limit,
        }
    }

    /// Creates a `WrongState` error.
    pub fn wrong_state(expected: impl Into<String>, current: impl Into<String>) -> Self {
        Self::WrongState {
            expected: expected.into(),
            current: current.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if retrying later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Exhausted { .. })
    }

    /// Returns `true` if the bytes or ids came from a misbehaving peer.
    #[must_use]
    pub const fn is_peer_fault(&self) -> bool {
        matches!(self, Self::InvalidId(_) | Self::Decoding { .. })
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::io("performing I/O", err)
    }
}
