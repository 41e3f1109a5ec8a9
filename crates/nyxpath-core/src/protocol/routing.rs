// ============================================
// File: crates/nyxpath-core/src/protocol/routing.rs
// ============================================
//! # Routing Messages
//!
//! ## Creation Reason
//! End-to-end messages carried inside an established circuit. They are
//! bencoded dictionaries whose `A` key selects the kind; every kind also
//! carries `S` (sequence) and `V` (version).
//!
//! ## Message Tags
//! | Tag | Kind | Body keys |
//! |-----|------|-----------|
//! | `C` | CloseExit | Y, Z |
//! | `D` | DataDiscard | P |
//! | `G` | GrantExit | T, Y, Z |
//! | `H` | HiddenService | H |
//! | `I` | TransferTraffic | X |
//! | `J` | RejectExit | B, R, T, Y, Z |
//! | `L` | PathLatency | L, T |
//! | `M` | DHT | M |
//! | `O` | ObtainExit | B, E, I, T, W, X, Z |
//! | `P` | PathConfirm | L, T |
//! | `T` | PathTransfer | P, T, Y |
//! | `U` | UpdateExit | P, T, Z |
//! | `V` | UpdateExitVerify | T |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Plaintext is padded with random bytes to a multiple of
//!   `MESSAGE_PAD_SIZE` before the onion layers go on; the decoder relies on
//!   bencode being self-delimiting to ignore the padding
//! - Adding a kind means a new tag letter here and a handler arm in both the
//!   circuit and the endpoint dispatch
//!
//! ## Last Modified
//! v0.1.0 - Initial routing message set

use rand::rngs::OsRng;
use rand::RngCore;

use nyxpath_common::PathId;

use super::bencode::Value;
use super::exit::{CloseExit, GrantExit, ObtainExit, RejectExit, UpdateExit, UpdateExitVerify};
use crate::crypto::{TunnelNonce, TUNNEL_NONCE_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Routing protocol version carried in `V`.
pub const ROUTING_VERSION: u64 = 0;

/// Plaintext is padded up to a multiple of this size.
pub const MESSAGE_PAD_SIZE: usize = 128;

/// Largest routing plaintext accepted (before padding).
pub const MAX_ROUTING_MESSAGE_SIZE: usize = 32 * 1024;

// ============================================
// Bodies
// ============================================

/// Liveness probe (`T` = token) or its echo (`L` = token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathLatency {
    /// Probe token set by the sender of a probe
    pub token: u64,
    /// Token echoed back by the terminal hop
    pub echo: u64,
}

/// Sent by the terminal hop once it has accepted its commit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathConfirm {
    /// Hop lifetime in milliseconds
    pub lifetime_ms: u64,
    /// Wall-clock creation time in milliseconds
    pub created_ms: u64,
}

/// Asks the terminal hop to forward a frame onto another path it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTransfer {
    /// Target path id at the terminal hop
    pub path_id: PathId,
    /// Opaque hidden-service frame
    pub frame: Vec<u8>,
    /// Frame nonce
    pub nonce: TunnelNonce,
}

/// Body of a routing message, selected by the `A` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingBody {
    /// `D`: payload the receiver could not deliver.
    DataDiscard {
        /// Path the dropped data was addressed to
        path_id: PathId,
    },
    /// `L`: latency probe or reply.
    PathLatency(PathLatency),
    /// `M`: tunnelled DHT messages.
    Dht(Vec<Value>),
    /// `P`: build confirmation from the terminal hop.
    PathConfirm(PathConfirm),
    /// `T`: transfer to another path at the terminal hop.
    PathTransfer(PathTransfer),
    /// `H`: hidden-service frame delivered to the path owner.
    HiddenService(Vec<u8>),
    /// `I`: exit traffic, each packet prefixed with an 8-byte counter.
    TransferTraffic(Vec<Vec<u8>>),
    /// `O`: request exit access.
    ObtainExit(ObtainExit),
    /// `G`: exit access granted.
    GrantExit(GrantExit),
    /// `J`: exit access refused.
    RejectExit(RejectExit),
    /// `U`: move an exit session to this path.
    UpdateExit(UpdateExit),
    /// `V`: update acknowledged.
    UpdateExitVerify(UpdateExitVerify),
    /// `C`: exit session closed.
    CloseExit(CloseExit),
}

impl RoutingBody {
    /// Single-character wire tag.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::CloseExit(_) => b'C',
            Self::DataDiscard { .. } => b'D',
            Self::GrantExit(_) => b'G',
            Self::HiddenService(_) => b'H',
            Self::TransferTraffic(_) => b'I',
            Self::RejectExit(_) => b'J',
            Self::PathLatency(_) => b'L',
            Self::Dht(_) => b'M',
            Self::ObtainExit(_) => b'O',
            Self::PathConfirm(_) => b'P',
            Self::PathTransfer(_) => b'T',
            Self::UpdateExit(_) => b'U',
            Self::UpdateExitVerify(_) => b'V',
        }
    }

    /// Human-readable kind, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CloseExit(_) => "close-exit",
            Self::DataDiscard { .. } => "data-discard",
            Self::GrantExit(_) => "grant-exit",
            Self::HiddenService(_) => "hidden-service",
            Self::TransferTraffic(_) => "transfer-traffic",
            Self::RejectExit(_) => "reject-exit",
            Self::PathLatency(_) => "path-latency",
            Self::Dht(_) => "dht",
            Self::ObtainExit(_) => "obtain-exit",
            Self::PathConfirm(_) => "path-confirm",
            Self::PathTransfer(_) => "path-transfer",
            Self::UpdateExit(_) => "update-exit",
            Self::UpdateExitVerify(_) => "update-exit-verify",
        }
    }

    fn write_fields(&self, v: Value) -> Value {
        match self {
            Self::DataDiscard { path_id } => v.with_bytes("P", path_id.as_bytes().to_vec()),
            Self::PathLatency(m) => v.with_int("L", m.echo).with_int("T", m.token),
            Self::Dht(msgs) => v.with("M", Value::List(msgs.clone())),
            Self::PathConfirm(m) => v.with_int("L", m.lifetime_ms).with_int("T", m.created_ms),
            Self::PathTransfer(m) => v
                .with_bytes("P", m.path_id.as_bytes().to_vec())
                .with_bytes("T", m.frame.clone())
                .with_bytes("Y", m.nonce.as_bytes().to_vec()),
            Self::HiddenService(frame) => v.with_bytes("H", frame.clone()),
            Self::TransferTraffic(packets) => v.with(
                "X",
                Value::List(packets.iter().cloned().map(Value::Bytes).collect()),
            ),
            Self::ObtainExit(m) => m.write_fields(v),
            Self::GrantExit(m) => m.write_fields(v),
            Self::RejectExit(m) => m.write_fields(v),
            Self::UpdateExit(m) => m.write_fields(v),
            Self::UpdateExitVerify(m) => m.write_fields(v),
            Self::CloseExit(m) => m.write_fields(v),
        }
    }

    fn read_fields(tag: &[u8], v: &Value) -> Result<Self> {
        Ok(match tag {
            b"C" => Self::CloseExit(CloseExit::read_fields(v)?),
            b"D" => Self::DataDiscard {
                path_id: PathId::from_array(v.fixed("P")?),
            },
            b"G" => Self::GrantExit(GrantExit::read_fields(v)?),
            b"H" => Self::HiddenService(v.bytes("H")?.to_vec()),
            b"I" => Self::TransferTraffic(
                v.list("X")?
                    .iter()
                    .map(|item| match item {
                        Value::Bytes(b) => Ok(b.clone()),
                        _ => Err(CoreError::malformed("traffic packet is not a string")),
                    })
                    .collect::<Result<_>>()?,
            ),
            b"J" => Self::RejectExit(RejectExit::read_fields(v)?),
            b"L" => Self::PathLatency(PathLatency {
                token: v.int_or("T", 0),
                echo: v.int_or("L", 0),
            }),
            b"M" => Self::Dht(v.list("M")?.to_vec()),
            b"O" => Self::ObtainExit(ObtainExit::read_fields(v)?),
            b"P" => Self::PathConfirm(PathConfirm {
                lifetime_ms: v.int("L")?,
                created_ms: v.int("T")?,
            }),
            b"T" => Self::PathTransfer(PathTransfer {
                path_id: PathId::from_array(v.fixed("P")?),
                frame: v.bytes("T")?.to_vec(),
                nonce: TunnelNonce::from_bytes(v.fixed::<TUNNEL_NONCE_SIZE>("Y")?),
            }),
            b"U" => Self::UpdateExit(UpdateExit::read_fields(v)?),
            b"V" => Self::UpdateExitVerify(UpdateExitVerify::read_fields(v)?),
            other => {
                return Err(CoreError::UnknownRoutingTag(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        })
    }
}

// ============================================
// RoutingMessage
// ============================================

/// A routing message: sequence number plus tagged body.
///
/// # Example
/// ```
/// use nyxpath_core::protocol::{RoutingBody, RoutingMessage, PathLatency};
///
/// let probe = RoutingMessage::new(RoutingBody::PathLatency(PathLatency { token: 7, echo: 0 }));
/// let wire = probe.encode_padded();
/// assert_eq!(wire.len() % 128, 0);
/// assert_eq!(RoutingMessage::decode(&wire).unwrap(), probe);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingMessage {
    /// Sender-assigned sequence number (`S`)
    pub sequence: u64,
    /// Kind-specific body
    pub body: RoutingBody,
}

impl RoutingMessage {
    /// Creates a message with sequence 0.
    #[must_use]
    pub const fn new(body: RoutingBody) -> Self {
        Self { sequence: 0, body }
    }

    /// Sets the sequence number.
    #[must_use]
    pub const fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Bencode dictionary form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let base = Value::dict()
            .with_bytes("A", vec![self.body.tag()])
            .with_int("S", self.sequence)
            .with_int("V", ROUTING_VERSION);
        self.body.write_fields(base)
    }

    /// Canonical bencoding without padding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.to_value().encode()
    }

    /// Bencoding padded with random bytes to a multiple of `MESSAGE_PAD_SIZE`.
    #[must_use]
    pub fn encode_padded(&self) -> Vec<u8> {
        let mut buf = self.encode();
        pad_random(&mut buf);
        buf
    }

    /// Decodes a (possibly padded) routing message.
    ///
    /// # Errors
    /// Any bencode, tag, version or field error.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() > MAX_ROUTING_MESSAGE_SIZE + MESSAGE_PAD_SIZE {
            return Err(CoreError::MessageTooLarge {
                max: MAX_ROUTING_MESSAGE_SIZE + MESSAGE_PAD_SIZE,
                actual: buf.len(),
            });
        }
        let (value, _used) = Value::decode(buf)?;
        if !matches!(value, Value::Dict(_)) {
            return Err(CoreError::malformed("routing message is not a dictionary"));
        }
        let version = value.int("V")?;
        if version != ROUTING_VERSION {
            return Err(CoreError::UnsupportedVersion {
                got: version,
                expected: ROUTING_VERSION,
            });
        }
        let sequence = value.int("S")?;
        let body = RoutingBody::read_fields(value.bytes("A")?, &value)?;
        Ok(Self { sequence, body })
    }
}

/// Extends `buf` with random bytes up to the next multiple of
/// `MESSAGE_PAD_SIZE` (an exact multiple is left alone, empty becomes one block).
pub fn pad_random(buf: &mut Vec<u8>) {
    let rem = buf.len() % MESSAGE_PAD_SIZE;
    let pad = if buf.is_empty() {
        MESSAGE_PAD_SIZE
    } else if rem == 0 {
        0
    } else {
        MESSAGE_PAD_SIZE - rem
    };
    if pad > 0 {
        let start = buf.len();
        buf.resize(start + pad, 0);
        OsRng.fill_bytes(&mut buf[start..]);
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_multiple_of_block() {
        for len in [0usize, 1, 127, 128, 129, 300] {
            let mut buf = vec![0u8; len];
            pad_random(&mut buf);
            assert_eq!(buf.len() % MESSAGE_PAD_SIZE, 0, "len {len}");
            assert!(buf.len() >= len.max(1));
        }
    }

    #[test]
    fn test_data_discard_wire_layout() {
        let id = PathId::from_array([0x11; 16]);
        let msg = RoutingMessage::new(RoutingBody::DataDiscard { path_id: id }).with_sequence(4);
        let mut expected = b"d1:A1:D1:P16:".to_vec();
        expected.extend_from_slice(&[0x11; 16]);
        expected.extend_from_slice(b"1:Si4e1:Vi0ee");
        assert_eq!(msg.encode(), expected);
    }

    #[test]
    fn test_decode_padded_message() {
        let msg = RoutingMessage::new(RoutingBody::TransferTraffic(vec![
            vec![0, 0, 0, 0, 0, 0, 0, 1, 0x45],
            vec![0, 0, 0, 0, 0, 0, 0, 2, 0x45, 0x00],
        ]))
        .with_sequence(9);
        let wire = msg.encode_padded();
        assert_eq!(wire.len(), MESSAGE_PAD_SIZE);
        assert_eq!(RoutingMessage::decode(&wire).unwrap(), msg);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let raw = Value::dict()
            .with_bytes("A", "Q")
            .with_int("S", 0)
            .with_int("V", 0)
            .encode();
        assert!(matches!(
            RoutingMessage::decode(&raw),
            Err(CoreError::UnknownRoutingTag(t)) if t == "Q"
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let raw = Value::dict()
            .with_bytes("A", "D")
            .with_bytes("P", vec![0u8; 16])
            .with_int("S", 0)
            .with_int("V", 9)
            .encode();
        assert!(matches!(
            RoutingMessage::decode(&raw),
            Err(CoreError::UnsupportedVersion { got: 9, .. })
        ));
    }

    #[test]
    fn test_latency_fields_default_to_zero() {
        let raw = Value::dict()
            .with_bytes("A", "L")
            .with_int("S", 1)
            .with_int("T", 55)
            .with_int("V", 0)
            .encode();
        let msg = RoutingMessage::decode(&raw).unwrap();
        assert_eq!(
            msg.body,
            RoutingBody::PathLatency(PathLatency { token: 55, echo: 0 })
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = RoutingMessage::decode(&[0xFF; 64]).unwrap_err();
        assert!(err.is_protocol_error());
    }
}
