// ============================================
// File: crates/nyxpath-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Errors raised by the onion crypto, the bencode codec and the routing and
//! link message parsers.
//!
//! ## Error Categories
//! ```text
//! crypto    BadKey, SignatureVerification, Cipher, KeyDerivation, Unsigned
//! wire      UnknownMessageType, UnknownRoutingTag, UnsupportedVersion,
//!           Malformed, MissingField, Truncated, MessageTooLarge
//! wrapped   Common
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Wire errors from the network are dropped silently by callers; the
//!   message text is for logs only and must not carry key material
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use nyxpath_common::error::CommonError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Onion crypto and wire-format failures.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Key bytes were rejected.
    #[error("Bad key: {what}")]
    BadKey {
        /// Which key and why
        what: String,
    },

    /// An ed25519 signature did not verify.
    #[error("Signature verification failed")]
    SignatureVerification,

    /// The hop stream cipher could not be applied.
    #[error("Onion cipher failed: {what}")]
    Cipher {
        /// Cipher error
        what: String,
    },

    /// HKDF expansion failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Expansion that failed
        reason: String,
    },

    /// Sign or verify was asked of a routing message that has no `Z` field.
    #[error("{0} messages are not signed")]
    Unsigned(&'static str),

    /// First byte of a link frame is not a known message type.
    #[error("Unknown link message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Value of key `A` is not a known routing tag.
    #[error("Unknown routing message tag: {0:?}")]
    UnknownRoutingTag(String),

    /// Routing message `V` differs from ours.
    #[error("Routing message version {got}, this router speaks {expected}")]
    UnsupportedVersion {
        /// Version in the message
        got: u64,
        /// Local version
        expected: u64,
    },

    /// Bencode grammar or field shape violation.
    #[error("Malformed message: {reason}")]
    Malformed {
        /// First problem found
        reason: String,
    },

    /// A required dictionary key is absent.
    #[error("Missing key {field:?}")]
    MissingField {
        /// Bencode key
        field: String,
    },

    /// Frame ends before its fixed header does.
    #[error("Truncated frame: need {need} bytes, got {got}")]
    Truncated {
        /// Bytes required
        need: usize,
        /// Bytes present
        got: usize,
    },

    /// Frame or plaintext exceeds its cap.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Cap in bytes
        max: usize,
        /// Actual size
        actual: usize,
    },

    /// Wrapped common error.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    /// `BadKey` constructor.
    pub fn key_generation(what: impl Into<String>) -> Self {
        Self::BadKey { what: what.into() }
    }

    /// `Cipher` constructor.
    pub fn encryption(what: impl Into<String>) -> Self {
        Self::Cipher { what: what.into() }
    }

    /// `Malformed` constructor.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// `MissingField` constructor.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// `Truncated` constructor.
    pub const fn too_short(need: usize, got: usize) -> Self {
        Self::Truncated { need, got }
    }

    /// Returns `true` for key, cipher and signature failures.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::BadKey { .. }
                | Self::SignatureVerification
                | Self::Cipher { .. }
                | Self::KeyDerivation { .. }
                | Self::Unsigned(_)
        )
    }

    /// Returns `true` when the bytes themselves were bad.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownMessageType(_)
                | Self::UnknownRoutingTag(_)
                | Self::UnsupportedVersion { .. }
                | Self::Malformed { .. }
                | Self::MissingField { .. }
                | Self::Truncated { .. }
                | Self::MessageTooLarge { .. }
        )
    }

    /// Returns `true` if a peer may be forging exit messages or probing tags.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(self, Self::SignatureVerification | Self::UnknownRoutingTag(_))
    }
}
