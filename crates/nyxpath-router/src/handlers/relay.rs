// ============================================
// File: crates/nyxpath-router/src/handlers/relay.rs
// ============================================
//! # Relay Step
//!
//! ## Creation Reason
//! What a transit hop does with a cell: peel or add exactly one layer, mutate
//! the nonce and pass the cell to the next router. The terminal hop also
//! originates downstream messages through the same step.
//!
//! ## Relay Flow
//! ```text
//!  upstream cell {id, Y}                downstream cell {id, Y}
//!        │                                     │
//!        ▼                                     ▼
//!  apply layer (Y)                       apply layer (Y)
//!        │                                     │
//!   terminal? ──yes──► RoutingMessage          ▼
//!        │ no                           {rx, Y ^ x} ─► downstream
//!        ▼
//!  {tx, Y ^ x} ─► upstream
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The layer is a keystream XOR, so "peel" and "add" are the same call
//!
//! ## Last Modified
//! v0.1.0 - Initial relay step

use bytes::Bytes;
use tracing::trace;

use nyxpath_core::crypto::{IdentityKeyPair, TunnelNonce};
use nyxpath_core::protocol::{sign_exit, LinkMessage, RelayCell, RoutingBody, RoutingMessage};

use crate::error::Result;
use crate::path::{PathEnv, TransitHop};

/// What happened to an upstream cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamStep {
    /// This router is the terminal hop; the plaintext routing message.
    Terminal(Vec<u8>),
    /// Passed on to the next hop.
    Forwarded,
}

/// Peels this hop's layer off an upstream cell.
///
/// # Errors
/// Layer cipher failure or the link refusing the forwarded cell.
pub fn relay_upstream(env: &PathEnv, hop: &TransitHop, cell: &RelayCell) -> Result<UpstreamStep> {
    let mut buf = cell.payload.to_vec();
    env.onion.apply_layer(&mut buf, hop.shared(), &cell.nonce)?;

    if hop.is_terminal(&env.local) {
        return Ok(UpstreamStep::Terminal(buf));
    }

    let next = RelayCell {
        path_id: hop.info.tx_id,
        nonce: cell.nonce ^ hop.nonce_xor(),
        payload: Bytes::from(buf),
    };
    trace!(hop = %hop.info, len = next.payload.len(), "Relaying upstream");
    env.link
        .send_to(&hop.info.upstream, LinkMessage::RelayUpstream(next).to_bytes())?;
    Ok(UpstreamStep::Forwarded)
}

/// Adds this hop's layer to a downstream cell and passes it on.
///
/// # Errors
/// Layer cipher failure or the link refusing the cell.
pub fn relay_downstream(env: &PathEnv, hop: &TransitHop, cell: &RelayCell) -> Result<()> {
    let mut buf = cell.payload.to_vec();
    env.onion.apply_layer(&mut buf, hop.shared(), &cell.nonce)?;

    let next = RelayCell {
        path_id: hop.info.rx_id,
        nonce: cell.nonce ^ hop.nonce_xor(),
        payload: Bytes::from(buf),
    };
    trace!(hop = %hop.info, len = next.payload.len(), "Relaying downstream");
    env.link
        .send_to(&hop.info.downstream, LinkMessage::RelayDownstream(next).to_bytes())?;
    Ok(())
}

/// Sends a routing message from the terminal hop back to the owner.
///
/// # Errors
/// See [`relay_downstream`].
pub fn send_from_terminal(env: &PathEnv, hop: &TransitHop, body: RoutingBody) -> Result<()> {
    let msg = RoutingMessage::new(body).with_sequence(hop.next_sequence());
    transmit(env, hop, &msg)
}

/// Like [`send_from_terminal`], signing the exit message with `identity`.
///
/// # Errors
/// Signing errors, or see [`relay_downstream`].
pub fn send_signed_from_terminal(
    env: &PathEnv,
    hop: &TransitHop,
    body: RoutingBody,
    identity: &IdentityKeyPair,
) -> Result<()> {
    let mut msg = RoutingMessage::new(body).with_sequence(hop.next_sequence());
    sign_exit(&mut msg, identity)?;
    transmit(env, hop, &msg)
}

fn transmit(env: &PathEnv, hop: &TransitHop, msg: &RoutingMessage) -> Result<()> {
    trace!(hop = %hop.info, kind = msg.body.kind(), seq = msg.sequence, "Terminal hop sending");
    let cell = RelayCell {
        path_id: hop.info.rx_id,
        nonce: TunnelNonce::random(),
        payload: Bytes::from(msg.encode_padded()),
    };
    relay_downstream(env, hop, &cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use nyxpath_common::{PathId, RouterId};
    use nyxpath_core::crypto::SharedSecret;

    use crate::path::circuit::tests::{test_env, RecordingLink};
    use crate::path::{Circuit, CircuitEvent, PathRoles};

    fn env_at(base: &PathEnv, local: RouterId) -> PathEnv {
        PathEnv {
            local,
            ..base.clone()
        }
    }

    fn pop_cell(link: &RecordingLink) -> (RouterId, LinkMessage) {
        let (to, frame) = link.frames.lock().remove(0);
        (to, LinkMessage::from_bytes(frame).unwrap())
    }

    #[test]
    fn test_two_hop_relay_both_directions() {
        let link = Arc::new(RecordingLink::default());
        let (client_env, _) = test_env(link.clone());
        let now = Instant::now();
        let (r0, r1) = (RouterId::from_array([1; 32]), RouterId::from_array([2; 32]));
        let mut circuit = Circuit::new(
            vec![(r0, SharedSecret::random()), (r1, SharedSecret::random())],
            Duration::from_secs(60),
            PathRoles::CLIENT,
            now,
        )
        .unwrap();
        let records = circuit.commit_records();
        let hop0 = TransitHop::from_record(&records[0], client_env.local, now).unwrap();
        let hop1 = TransitHop::from_record(&records[1], r0, now).unwrap();
        let (env0, env1) = (env_at(&client_env, r0), env_at(&client_env, r1));

        // Upstream through R0 to the terminal R1
        circuit.send_upstream(b"hello".to_vec(), TunnelNonce::random(), &client_env).unwrap();
        let (_, LinkMessage::RelayUpstream(cell)) = pop_cell(&link) else {
            panic!("expected upstream cell");
        };
        assert_eq!(relay_upstream(&env0, &hop0, &cell).unwrap(), UpstreamStep::Forwarded);

        let (to, LinkMessage::RelayUpstream(cell)) = pop_cell(&link) else {
            panic!("expected upstream cell");
        };
        assert_eq!(to, r1);
        assert_eq!(cell.path_id, hop1.info.rx_id);
        assert_eq!(
            relay_upstream(&env1, &hop1, &cell).unwrap(),
            UpstreamStep::Terminal(b"hello".to_vec())
        );

        // Downstream from R1 back to the client
        let target = PathId::generate();
        send_from_terminal(&env1, &hop1, RoutingBody::DataDiscard { path_id: target }).unwrap();
        let (to, LinkMessage::RelayDownstream(cell)) = pop_cell(&link) else {
            panic!("expected downstream cell");
        };
        assert_eq!(to, r0);
        relay_downstream(&env0, &hop0, &cell).unwrap();

        let (to, LinkMessage::RelayDownstream(cell)) = pop_cell(&link) else {
            panic!("expected downstream cell");
        };
        assert_eq!(to, client_env.local);
        assert_eq!(cell.path_id, circuit.rx_id());
        assert!(circuit
            .recv_downstream(&cell.payload, cell.nonce, now, &client_env)
            .is_accepted());
        assert_eq!(
            circuit.take_events(),
            vec![CircuitEvent::DataDropped { path_id: target }]
        );
    }

    #[test]
    fn test_terminal_sequence_increments() {
        let link = Arc::new(RecordingLink::default());
        let (env, _) = test_env(link.clone());
        let record = nyxpath_core::protocol::BuildCommitRecord {
            tx_id: PathId::generate(),
            rx_id: PathId::generate(),
            upstream: env.local,
            secret: SharedSecret::random(),
            lifetime: Duration::from_secs(60),
        };
        let hop = TransitHop::from_record(&record, RouterId::from_array([3; 32]), Instant::now()).unwrap();

        for _ in 0..3 {
            send_from_terminal(&env, &hop, RoutingBody::HiddenService(vec![1, 2, 3])).unwrap();
        }
        assert_eq!(link.frames.lock().len(), 3);
        assert_eq!(hop.next_sequence(), 3);
    }
}
