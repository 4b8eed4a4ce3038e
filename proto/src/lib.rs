//! Wire protocol between browser clients and the relay.
//!
//! Everything is bencoded with `bendy` and sent as binary websocket frames.
//! Struct fields are declared in lexicographic order, bencode dictionaries
//! must be sorted by key.

use std::fmt;

/// Relay-assigned identifier of a connected client.
///
/// Unique for the lifetime of one relay connection, a reconnect may hand out
/// a different one.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

/// Opaque SDP blob. Only checked for presence, never parsed.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(String);

/// One network path candidate, mirrors the fields of `RTCIceCandidateInit`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CandidateDescriptor {
    pub candidate: String,
    pub sdp_m_line_index: u16,
    pub sdp_mid: String,
}

/// Call setup payload, forwarded verbatim by the relay.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Signal {
    /// Session description of the calling side.
    Offer { sdp: SessionDescription },
    /// Session description of the called side, in response to `Offer`.
    Answer { sdp: SessionDescription },
    /// Trickled candidate. May arrive before the description it belongs to.
    IceCandidate { candidate: CandidateDescriptor },
    /// The sender has rejected, ended or given up on the call.
    Hangup { reason: String },
}

/// Messages a client sends to the relay.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ClientMessage {
    /// Forward `signal` to `to`. The relay attaches the sender id.
    Signal { signal: Signal, to: PeerId },
    /// Periodic liveness message, answered with `KeepAliveAck`.
    KeepAlive { seq: u64 },
}

/// Messages the relay pushes to a client.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RelayMessage {
    /// Always the first message on a fresh connection.
    Welcome { id: PeerId },
    /// Full list of connected clients, sent whenever membership changes.
    ///
    /// Includes the recipient itself.
    Roster { peers: Vec<PeerId> },
    /// A signal forwarded from another client.
    Signal { from: PeerId, signal: Signal },
    KeepAliveAck { seq: u64 },
    /// A `Signal` could not be forwarded because `to` is not connected.
    Undeliverable { to: PeerId },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("bencode encoding failed: {0}")]
    Encode(bendy::serde::Error),
    #[error("bencode decoding failed: {0}")]
    Decode(bendy::serde::Error),
}

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self(sdp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An absent or blank description can never be applied.
    pub fn is_well_formed(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl Signal {
    /// Short name used in logs, matches the relay contract's envelope kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice-candidate",
            Signal::Hangup { .. } => "hangup",
        }
    }
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        bendy::serde::to_bytes(self).map_err(ProtoError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        bendy::serde::from_bytes(bytes).map_err(ProtoError::Decode)
    }
}

impl RelayMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        bendy::serde::to_bytes(self).map_err(ProtoError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        bendy::serde::from_bytes(bytes).map_err(ProtoError::Decode)
    }
}
