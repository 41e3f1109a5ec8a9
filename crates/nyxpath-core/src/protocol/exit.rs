// ============================================
// File: crates/nyxpath-core/src/protocol/exit.rs
// ============================================
//! # Exit Negotiation Messages
//!
//! ## Creation Reason
//! A client asks the terminal hop of a circuit for exit access; the answer
//! must be attributable to that hop, so grants, rejects and closes are
//! ed25519-signed by the terminal router's identity key.
//!
//! ## Signing Procedure
//! ```text
//! 1. set Z = 64 zero bytes
//! 2. bencode the whole routing message (A, S, V and body)
//! 3. Z = Ed25519-Sign(key, bytes)
//! ```
//! Verification zeroes `Z` on a copy and checks the same bytes.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Obtain requests are verified against the key they carry (`I`); every
//!   other signed kind is verified against the terminal router id
//! - `UpdateExitVerify` is unsigned
//!
//! ## Last Modified
//! v0.1.0 - Initial exit message set

use rand::rngs::OsRng;
use rand::RngCore;

use nyxpath_common::PathId;

use super::bencode::Value;
use super::routing::{RoutingBody, RoutingMessage};
use crate::crypto::{IdentityKeyPair, IdentityPublicKey, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use crate::error::{CoreError, Result};

/// Size of the random nonce in grant, reject and close messages.
pub const EXIT_NONCE_SIZE: usize = 16;

/// `E` value requesting internet egress.
pub const EXIT_FLAG_INTERNET: u64 = 1;

type Signature = [u8; ED25519_SIGNATURE_SIZE];

fn random_nonce() -> [u8; EXIT_NONCE_SIZE] {
    let mut n = [0u8; EXIT_NONCE_SIZE];
    OsRng.fill_bytes(&mut n);
    n
}

fn policy_list(v: &Value, key: &str) -> Result<Vec<Vec<u8>>> {
    match v.get(key) {
        None => Ok(Vec::new()),
        Some(Value::List(items)) => items
            .iter()
            .map(|item| match item {
                Value::Bytes(b) => Ok(b.clone()),
                _ => Err(CoreError::malformed(format!("{key} entry is not a string"))),
            })
            .collect(),
        Some(_) => Err(CoreError::malformed(format!("field {key} is not a list"))),
    }
}

fn policy_value(list: &[Vec<u8>]) -> Value {
    Value::List(list.iter().cloned().map(Value::Bytes).collect())
}

// ============================================
// ObtainExit (`O`)
// ============================================

/// Client request for exit access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObtainExit {
    /// Blacklisted traffic policies (`B`)
    pub blacklist: Vec<Vec<u8>>,
    /// Exit flags (`E`); see [`EXIT_FLAG_INTERNET`]
    pub flags: u64,
    /// Requesting identity key (`I`)
    pub identity: [u8; ED25519_PUBLIC_KEY_SIZE],
    /// Transaction id (`T`)
    pub tx_id: u64,
    /// Whitelisted traffic policies (`W`)
    pub whitelist: Vec<Vec<u8>>,
    /// Requested session lifetime in ms (`X`)
    pub expires_ms: u64,
    /// Signature (`Z`)
    pub signature: Signature,
}

impl ObtainExit {
    /// Unsigned request for `identity`.
    #[must_use]
    pub fn new(identity: &IdentityPublicKey, tx_id: u64, flags: u64, expires_ms: u64) -> Self {
        Self {
            blacklist: Vec::new(),
            flags,
            identity: identity.to_bytes(),
            tx_id,
            whitelist: Vec::new(),
            expires_ms,
            signature: [0u8; ED25519_SIGNATURE_SIZE],
        }
    }

    pub(crate) fn write_fields(&self, v: Value) -> Value {
        v.with("B", policy_value(&self.blacklist))
            .with_int("E", self.flags)
            .with_bytes("I", self.identity.to_vec())
            .with_int("T", self.tx_id)
            .with("W", policy_value(&self.whitelist))
            .with_int("X", self.expires_ms)
            .with_bytes("Z", self.signature.to_vec())
    }

    pub(crate) fn read_fields(v: &Value) -> Result<Self> {
        Ok(Self {
            blacklist: policy_list(v, "B")?,
            flags: v.int_or("E", 0),
            identity: v.fixed("I")?,
            tx_id: v.int("T")?,
            whitelist: policy_list(v, "W")?,
            expires_ms: v.int_or("X", 0),
            signature: v.fixed("Z")?,
        })
    }
}

// ============================================
// GrantExit (`G`)
// ============================================

/// Exit access granted by the terminal hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantExit {
    /// Transaction id being answered (`T`)
    pub tx_id: u64,
    /// Random nonce (`Y`)
    pub nonce: [u8; EXIT_NONCE_SIZE],
    /// Signature (`Z`)
    pub signature: Signature,
}

impl GrantExit {
    /// Unsigned grant with a fresh nonce.
    #[must_use]
    pub fn new(tx_id: u64) -> Self {
        Self {
            tx_id,
            nonce: random_nonce(),
            signature: [0u8; ED25519_SIGNATURE_SIZE],
        }
    }

    pub(crate) fn write_fields(&self, v: Value) -> Value {
        v.with_int("T", self.tx_id)
            .with_bytes("Y", self.nonce.to_vec())
            .with_bytes("Z", self.signature.to_vec())
    }

    pub(crate) fn read_fields(v: &Value) -> Result<Self> {
        Ok(Self {
            tx_id: v.int("T")?,
            nonce: v.fixed("Y")?,
            signature: v.fixed("Z")?,
        })
    }
}

// ============================================
// RejectExit (`J`)
// ============================================

/// Exit access refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectExit {
    /// Milliseconds the client should wait before retrying (`B`)
    pub backoff_ms: u64,
    /// Policies the exit would accept (`R`)
    pub policies: Vec<Vec<u8>>,
    /// Transaction id being answered (`T`)
    pub tx_id: u64,
    /// Random nonce (`Y`)
    pub nonce: [u8; EXIT_NONCE_SIZE],
    /// Signature (`Z`)
    pub signature: Signature,
}

impl RejectExit {
    /// Unsigned reject with a fresh nonce.
    #[must_use]
    pub fn new(tx_id: u64, backoff_ms: u64) -> Self {
        Self {
            backoff_ms,
            policies: Vec::new(),
            tx_id,
            nonce: random_nonce(),
            signature: [0u8; ED25519_SIGNATURE_SIZE],
        }
    }

    pub(crate) fn write_fields(&self, v: Value) -> Value {
        v.with_int("B", self.backoff_ms)
            .with("R", policy_value(&self.policies))
            .with_int("T", self.tx_id)
            .with_bytes("Y", self.nonce.to_vec())
            .with_bytes("Z", self.signature.to_vec())
    }

    pub(crate) fn read_fields(v: &Value) -> Result<Self> {
        Ok(Self {
            backoff_ms: v.int_or("B", 0),
            policies: policy_list(v, "R")?,
            tx_id: v.int("T")?,
            nonce: v.fixed("Y")?,
            signature: v.fixed("Z")?,
        })
    }
}

// ============================================
// UpdateExit (`U`) / UpdateExitVerify (`V`)
// ============================================

/// Moves an existing exit session onto the path this message arrives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateExit {
    /// Path id (at the exit) the session is currently bound to (`P`)
    pub path_id: PathId,
    /// Transaction id (`T`)
    pub tx_id: u64,
    /// Signature (`Z`)
    pub signature: Signature,
}

impl UpdateExit {
    /// Unsigned update.
    #[must_use]
    pub const fn new(path_id: PathId, tx_id: u64) -> Self {
        Self {
            path_id,
            tx_id,
            signature: [0u8; ED25519_SIGNATURE_SIZE],
        }
    }

    pub(crate) fn write_fields(&self, v: Value) -> Value {
        v.with_bytes("P", self.path_id.as_bytes().to_vec())
            .with_int("T", self.tx_id)
            .with_bytes("Z", self.signature.to_vec())
    }

    pub(crate) fn read_fields(v: &Value) -> Result<Self> {
        Ok(Self {
            path_id: PathId::from_array(v.fixed("P")?),
            tx_id: v.int("T")?,
            signature: v.fixed("Z")?,
        })
    }
}

/// Acknowledges an [`UpdateExit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateExitVerify {
    /// Transaction id being acknowledged (`T`)
    pub tx_id: u64,
}

impl UpdateExitVerify {
    pub(crate) fn write_fields(self, v: Value) -> Value {
        v.with_int("T", self.tx_id)
    }

    pub(crate) fn read_fields(v: &Value) -> Result<Self> {
        Ok(Self { tx_id: v.int("T")? })
    }
}

// ============================================
// CloseExit (`C`)
// ============================================

/// Ends an exit session. Either side may send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseExit {
    /// Random nonce (`Y`)
    pub nonce: [u8; EXIT_NONCE_SIZE],
    /// Signature (`Z`)
    pub signature: Signature,
}

impl CloseExit {
    /// Unsigned close with a fresh nonce.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nonce: random_nonce(),
            signature: [0u8; ED25519_SIGNATURE_SIZE],
        }
    }

    pub(crate) fn write_fields(&self, v: Value) -> Value {
        v.with_bytes("Y", self.nonce.to_vec())
            .with_bytes("Z", self.signature.to_vec())
    }

    pub(crate) fn read_fields(v: &Value) -> Result<Self> {
        Ok(Self {
            nonce: v.fixed("Y")?,
            signature: v.fixed("Z")?,
        })
    }
}

impl Default for CloseExit {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Signing
// ============================================

fn signature_slot(body: &mut RoutingBody) -> Option<&mut Signature> {
    match body {
        RoutingBody::ObtainExit(m) => Some(&mut m.signature),
        RoutingBody::GrantExit(m) => Some(&mut m.signature),
        RoutingBody::RejectExit(m) => Some(&mut m.signature),
        RoutingBody::UpdateExit(m) => Some(&mut m.signature),
        RoutingBody::CloseExit(m) => Some(&mut m.signature),
        _ => None,
    }
}

/// Signs an exit message in place.
///
/// # Errors
/// `Unsigned` if the message kind carries no signature.
pub fn sign_exit(msg: &mut RoutingMessage, identity: &IdentityKeyPair) -> Result<()> {
    let kind = msg.body.kind();
    let slot = signature_slot(&mut msg.body).ok_or(CoreError::Unsigned(kind))?;
    *slot = [0u8; ED25519_SIGNATURE_SIZE];
    let signature = identity.sign(&msg.encode());
    if let Some(slot) = signature_slot(&mut msg.body) {
        *slot = signature;
    }
    Ok(())
}

/// Verifies an exit message signature against `signer`.
///
/// # Errors
/// `SignatureVerification` on mismatch, `Unsigned` for unsigned kinds.
pub fn verify_exit(msg: &RoutingMessage, signer: &IdentityPublicKey) -> Result<()> {
    let mut copy = msg.clone();
    let slot = signature_slot(&mut copy.body)
        .ok_or(CoreError::Unsigned(msg.body.kind()))?;
    let signature = *slot;
    *slot = [0u8; ED25519_SIGNATURE_SIZE];
    signer.verify(&copy.encode(), &signature)
}

/// Verifies an obtain request against the identity it carries.
///
/// # Errors
/// `SignatureVerification` if the signature or the embedded key is invalid.
pub fn verify_obtain(msg: &RoutingMessage) -> Result<IdentityPublicKey> {
    let RoutingBody::ObtainExit(obtain) = &msg.body else {
        return Err(CoreError::Unsigned(msg.body.kind()));
    };
    let key = IdentityPublicKey::from_bytes(&obtain.identity)
        .map_err(|_| CoreError::SignatureVerification)?;
    verify_exit(msg, &key)?;
    Ok(key)
}

// ============================================
// Tests
// ============================================
