//! Binary wire protocol between board sessions and the server.
//!
//! Messages are bincode-encoded serde enums carried in binary WebSocket
//! frames. The design is deliberately full-state: every accepted write is
//! answered with a complete [`ServerEvent::Snapshot`], so a dropped frame
//! can never leave a session permanently diverged; the next snapshot
//! heals it.
//!
//! ```text
//! client ── Write / Clear / RequestSnapshot / Ping ──► server
//! client ◄── Snapshot / PhaseTick / RoundReset / ExportReady / Pong ── server
//! ```

use mural_core::{Grid, Phase};
use serde::{Deserialize, Serialize};

/// Operations a session may submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientOp {
    /// A mutating edit. No effect outside the `active` phase, or when the
    /// timestamp is not strictly newer than the stored cell's.
    Write {
        grid: u32,
        key: String,
        value: i64,
        timestamp: u64,
    },
    /// Force an immediate board reset, independent of phase.
    Clear,
    /// Explicit resync request, answered with a direct `Snapshot`.
    RequestSnapshot,
    /// Heartbeat.
    Ping,
}

/// Events the server pushes to sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Full board state: sent on connect, after every accepted write, and
    /// in answer to `RequestSnapshot`.
    Snapshot { grids: Vec<Grid> },
    /// Countdown tick, broadcast at >= 1 Hz whether or not anyone drew.
    PhaseTick { phase: Phase, remaining_ms: u64 },
    /// Fresh round-initial board, once per rest->active transition and
    /// after every `Clear`.
    RoundReset { grids: Vec<Grid> },
    /// A round snapshot was exported; `reference` locates the artifact.
    ExportReady { reference: String },
    /// Heartbeat reply.
    Pong,
}

impl ClientOp {
    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (op, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(op)
    }
}

impl ServerEvent {
    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(event)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use mural_core::GridSpec;

    #[test]
    fn test_write_op_roundtrip() {
        let op = ClientOp::Write {
            grid: 3,
            key: "pixel-10-20".into(),
            value: 0xFF0000,
            timestamp: 1_700_000_000_123,
        };
        let encoded = op.encode().unwrap();
        assert_eq!(ClientOp::decode(&encoded).unwrap(), op);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let grids = vec![GridSpec::pixel_face("face-0", 20, 20, 10).blank_grid()];
        let event = ServerEvent::Snapshot { grids: grids.clone() };
        let encoded = event.encode().unwrap();
        match ServerEvent::decode(&encoded).unwrap() {
            ServerEvent::Snapshot { grids: decoded } => assert_eq!(decoded, grids),
            other => panic!("Expected Snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_phase_tick_roundtrip() {
        let event = ServerEvent::PhaseTick {
            phase: mural_core::Phase::Rest,
            remaining_ms: 25_000,
        };
        let encoded = event.encode().unwrap();
        assert_eq!(ServerEvent::decode(&encoded).unwrap(), event);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let garbage = vec![0xFF, 0xFE, 0xFD, 0xFC];
        assert!(ClientOp::decode(&garbage).is_err());
        assert!(ServerEvent::decode(&garbage).is_err());
    }

    #[test]
    fn test_write_op_size_efficient() {
        // A draw is the hot message; keep it small on the wire.
        let op = ClientOp::Write {
            grid: 5,
            key: "pixel-190-190".into(),
            value: 0xFFFFFF,
            timestamp: u64::MAX,
        };
        let encoded = op.encode().unwrap();
        assert!(
            encoded.len() < 48,
            "Write op too large: {} bytes",
            encoded.len()
        );
    }

    #[test]
    fn test_zero_payload_ops() {
        for op in [ClientOp::Clear, ClientOp::RequestSnapshot, ClientOp::Ping] {
            let encoded = op.encode().unwrap();
            assert!(encoded.len() <= 2);
            assert_eq!(ClientOp::decode(&encoded).unwrap(), op);
        }
    }
}
