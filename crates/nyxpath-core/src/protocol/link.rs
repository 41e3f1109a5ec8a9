// ============================================
// File: crates/nyxpath-core/src/protocol/link.rs
// ============================================
//! # Link Message Codec
//!
//! ## Creation Reason
//! Frames exchanged between neighbouring routers: relay cells travelling
//! along a circuit, and build-commit records that create transit hops.
//!
//! ## Wire Format (Little Endian)
//! ```text
//! RelayUpstream / RelayDownstream
//! ┌──────┬──────────────┬────────────┬─────────────────────┐
//! │ type │ path id (16) │ nonce (24) │ onion payload (var) │
//! └──────┴──────────────┴────────────┴─────────────────────┘
//!
//! BuildCommit
//! ┌──────┬───────────┬──────────────────────────────────────┐
//! │ 0x03 │ count (1) │ count × record (104 bytes each)      │
//! └──────┴───────────┴──────────────────────────────────────┘
//! record = tx id (16) │ rx id (16) │ upstream (32) │ secret (32) │ lifetime ms (8)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Commit records carry the already-negotiated hop secret in the clear;
//!   the key exchange that would protect them lives outside this crate
//! - The first record is consumed by the receiving hop, the rest are
//!   forwarded to `record.upstream`
//!
//! ## Last Modified
//! v0.1.0 - Initial link codec

use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use nyxpath_common::{PathId, RouterId, PATH_ID_SIZE, ROUTER_ID_SIZE};

use crate::crypto::{SharedSecret, TunnelNonce, SHARED_SECRET_SIZE, TUNNEL_NONCE_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Relay cell header: type + path id + nonce.
pub const RELAY_HEADER_SIZE: usize = 1 + PATH_ID_SIZE + TUNNEL_NONCE_SIZE;

/// Encoded size of one commit record.
pub const COMMIT_RECORD_SIZE: usize = PATH_ID_SIZE * 2 + ROUTER_ID_SIZE + SHARED_SECRET_SIZE + 8;

/// Largest link frame accepted.
pub const MAX_LINK_FRAME_SIZE: usize = 64 * 1024;

/// Most commit records one frame may carry.
pub const MAX_COMMIT_RECORDS: usize = 8;

// ============================================
// LinkMessageType
// ============================================

/// Link frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkMessageType {
    /// Cell travelling away from the circuit owner.
    RelayUpstream = 0x01,
    /// Cell travelling towards the circuit owner.
    RelayDownstream = 0x02,
    /// Commit records building a circuit.
    BuildCommit = 0x03,
}

impl LinkMessageType {
    /// Converts a byte to a type.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::RelayUpstream),
            0x02 => Some(Self::RelayDownstream),
            0x03 => Some(Self::BuildCommit),
            _ => None,
        }
    }
}

// ============================================
// RelayCell
// ============================================

/// One onion-encrypted cell on a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCell {
    /// Path id the receiving router knows this hop by
    pub path_id: PathId,
    /// Running nonce for the receiving hop's layer
    pub nonce: TunnelNonce,
    /// Onion payload
    pub payload: Bytes,
}

// ============================================
// BuildCommitRecord
// ============================================

/// Per-hop build record produced by the circuit owner.
#[derive(Clone)]
pub struct BuildCommitRecord {
    /// Id the hop uses towards its upstream neighbour
    pub tx_id: PathId,
    /// Id the hop uses towards its downstream neighbour
    pub rx_id: PathId,
    /// Next router, or the hop's own id when it is terminal
    pub upstream: RouterId,
    /// Layer key shared with the circuit owner
    pub secret: SharedSecret,
    /// How long the hop should stay registered
    pub lifetime: Duration,
}

impl fmt::Debug for BuildCommitRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildCommitRecord")
            .field("tx_id", &self.tx_id)
            .field("rx_id", &self.rx_id)
            .field("upstream", &self.upstream)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

// ============================================
// LinkMessage
// ============================================

/// A frame between neighbouring routers.
#[derive(Debug, Clone)]
pub enum LinkMessage {
    /// Upstream relay cell.
    RelayUpstream(RelayCell),
    /// Downstream relay cell.
    RelayDownstream(RelayCell),
    /// Build commit records, first one addressed to the receiver.
    BuildCommit(Vec<BuildCommitRecord>),
}

impl LinkMessage {
    /// Frame type.
    #[must_use]
    pub const fn message_type(&self) -> LinkMessageType {
        match self {
            Self::RelayUpstream(_) => LinkMessageType::RelayUpstream,
            Self::RelayDownstream(_) => LinkMessageType::RelayDownstream,
            Self::BuildCommit(_) => LinkMessageType::BuildCommit,
        }
    }

    /// Encodes to a frame.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        LinkCodec.encode(self, &mut buf);
        buf.freeze()
    }

    /// Decodes a frame.
    ///
    /// # Errors
    /// Any framing error.
    pub fn from_bytes(mut frame: Bytes) -> Result<Self> {
        LinkCodec.decode(&mut frame)
    }
}

// ============================================
// Codec
// ============================================

/// Trait for encoding and decoding wire messages.
pub trait Codec<T> {
    /// Encodes a message into a byte buffer.
    fn encode(&self, msg: &T, buf: &mut BytesMut);

    /// Decodes a message, consuming `buf`.
    ///
    /// # Errors
    /// Returns an error if decoding fails.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

/// Codec for [`LinkMessage`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkCodec;

impl LinkCodec {
    /// Identifies the frame type without consuming it.
    ///
    /// # Errors
    /// Empty buffer or unknown type byte.
    pub fn peek_message_type(buf: &[u8]) -> Result<LinkMessageType> {
        let first = *buf.first().ok_or(CoreError::too_short(1, 0))?;
        LinkMessageType::from_byte(first).ok_or(CoreError::UnknownMessageType(first))
    }

    fn encode_cell(kind: LinkMessageType, cell: &RelayCell, buf: &mut BytesMut) {
        buf.reserve(RELAY_HEADER_SIZE + cell.payload.len());
        buf.put_u8(kind as u8);
        buf.put_slice(cell.path_id.as_bytes());
        buf.put_slice(cell.nonce.as_bytes());
        buf.put_slice(&cell.payload);
    }

    fn decode_cell(buf: &mut Bytes) -> Result<RelayCell> {
        if buf.len() < PATH_ID_SIZE + TUNNEL_NONCE_SIZE {
            return Err(CoreError::too_short(RELAY_HEADER_SIZE, buf.len() + 1));
        }
        let mut id = [0u8; PATH_ID_SIZE];
        buf.copy_to_slice(&mut id);
        let mut nonce = [0u8; TUNNEL_NONCE_SIZE];
        buf.copy_to_slice(&mut nonce);
        let payload = buf.split_to(buf.len());
        Ok(RelayCell {
            path_id: PathId::from_array(id),
            nonce: TunnelNonce::from_bytes(nonce),
            payload,
        })
    }
}

impl Codec<LinkMessage> for LinkCodec {
    fn encode(&self, msg: &LinkMessage, buf: &mut BytesMut) {
        match msg {
            LinkMessage::RelayUpstream(cell) => {
                Self::encode_cell(LinkMessageType::RelayUpstream, cell, buf);
            }
            LinkMessage::RelayDownstream(cell) => {
                Self::encode_cell(LinkMessageType::RelayDownstream, cell, buf);
            }
            LinkMessage::BuildCommit(records) => {
                buf.reserve(2 + records.len() * COMMIT_RECORD_SIZE);
                buf.put_u8(LinkMessageType::BuildCommit as u8);
                // Count is capped by MAX_COMMIT_RECORDS on both ends
                buf.put_u8(u8::try_from(records.len()).unwrap_or(u8::MAX));
                for r in records {
                    buf.put_slice(r.tx_id.as_bytes());
                    buf.put_slice(r.rx_id.as_bytes());
                    buf.put_slice(r.upstream.as_bytes());
                    buf.put_slice(r.secret.as_bytes());
                    buf.put_u64_le(u64::try_from(r.lifetime.as_millis()).unwrap_or(u64::MAX));
                }
            }
        }
    }

    fn decode(&self, buf: &mut Bytes) -> Result<LinkMessage> {
        if buf.len() > MAX_LINK_FRAME_SIZE {
            return Err(CoreError::MessageTooLarge {
                max: MAX_LINK_FRAME_SIZE,
                actual: buf.len(),
            });
        }
        let kind = Self::peek_message_type(buf)?;
        buf.advance(1);

        match kind {
            LinkMessageType::RelayUpstream => Ok(LinkMessage::RelayUpstream(Self::decode_cell(buf)?)),
            LinkMessageType::RelayDownstream => {
                Ok(LinkMessage::RelayDownstream(Self::decode_cell(buf)?))
            }
            LinkMessageType::BuildCommit => {
                if buf.is_empty() {
                    return Err(CoreError::too_short(2, 1));
                }
                let count = usize::from(buf.get_u8());
                if count == 0 || count > MAX_COMMIT_RECORDS {
                    return Err(CoreError::malformed(format!(
                        "commit record count {count} not in 1..={MAX_COMMIT_RECORDS}"
                    )));
                }
                if buf.len() != count * COMMIT_RECORD_SIZE {
                    return Err(CoreError::malformed(format!(
                        "commit frame carries {} bytes for {count} records",
                        buf.len()
                    )));
                }
                let mut records = Vec::with_capacity(count);
                for _ in 0..count {
                    let mut tx = [0u8; PATH_ID_SIZE];
                    buf.copy_to_slice(&mut tx);
                    let mut rx = [0u8; PATH_ID_SIZE];
                    buf.copy_to_slice(&mut rx);
                    let mut upstream = [0u8; ROUTER_ID_SIZE];
                    buf.copy_to_slice(&mut upstream);
                    let mut secret = [0u8; SHARED_SECRET_SIZE];
                    buf.copy_to_slice(&mut secret);
                    let lifetime = Duration::from_millis(buf.get_u64_le());
                    records.push(BuildCommitRecord {
                        tx_id: PathId::from_array(tx),
                        rx_id: PathId::from_array(rx),
                        upstream: RouterId::from_array(upstream),
                        secret: SharedSecret::from_bytes(secret),
                        lifetime,
                    });
                    zeroize::Zeroize::zeroize(&mut secret);
                }
                Ok(LinkMessage::BuildCommit(records))
            }
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(upstream: u8) -> BuildCommitRecord {
        BuildCommitRecord {
            tx_id: PathId::generate(),
            rx_id: PathId::generate(),
            upstream: RouterId::from_array([upstream; 32]),
            secret: SharedSecret::random(),
            lifetime: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_relay_cell_layout() {
        let cell = RelayCell {
            path_id: PathId::from_array([0xAA; 16]),
            nonce: TunnelNonce::from_bytes([0xBB; 24]),
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        let frame = LinkMessage::RelayDownstream(cell.clone()).to_bytes();
        assert_eq!(frame.len(), RELAY_HEADER_SIZE + 3);
        assert_eq!(frame[0], 0x02);

        match LinkMessage::from_bytes(frame).unwrap() {
            LinkMessage::RelayDownstream(decoded) => assert_eq!(decoded, cell),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_build_commit_records() {
        let records = vec![record(1), record(2), record(3)];
        let frame = LinkMessage::BuildCommit(records.clone()).to_bytes();
        assert_eq!(frame.len(), 2 + 3 * COMMIT_RECORD_SIZE);

        let LinkMessage::BuildCommit(decoded) = LinkMessage::from_bytes(frame).unwrap() else {
            panic!("expected commit");
        };
        assert_eq!(decoded.len(), 3);
        for (a, b) in records.iter().zip(&decoded) {
            assert_eq!(a.tx_id, b.tx_id);
            assert_eq!(a.rx_id, b.rx_id);
            assert_eq!(a.upstream, b.upstream);
            assert!(a.secret.ct_eq(&b.secret));
            assert_eq!(a.lifetime, b.lifetime);
        }
    }

    #[test]
    fn test_rejects_bad_frames() {
        assert!(matches!(
            LinkMessage::from_bytes(Bytes::from_static(&[0x09])),
            Err(CoreError::UnknownMessageType(0x09))
        ));
        assert!(LinkMessage::from_bytes(Bytes::new()).is_err());
        assert!(LinkMessage::from_bytes(Bytes::from_static(&[0x01, 0, 0])).is_err());
        // Commit count with missing body
        assert!(LinkMessage::from_bytes(Bytes::from_static(&[0x03, 2])).is_err());
        assert!(LinkMessage::from_bytes(Bytes::from_static(&[0x03, 0])).is_err());
    }

    #[test]
    fn test_commit_debug_hides_secret() {
        let r = record(4);
        let hex_secret = hex::encode(r.secret.as_bytes());
        assert!(!format!("{r:?}").contains(&hex_secret));
    }
}
