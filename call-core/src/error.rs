use proto::PeerId;

/// Everything that can go wrong with a call attempt.
///
/// Apart from `AlreadyInCall`, `InvalidPeer` and `RelayUnavailable`, which are
/// returned to the caller of `start_call`, these never leave the coordinator
/// as errors. They end up in a teardown and a status update instead.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("already in a call with {peer}")]
    AlreadyInCall { peer: PeerId },
    #[error("cannot call `{0}`")]
    InvalidPeer(PeerId),
    #[error("media acquisition failed: {reason}")]
    MediaAcquisitionFailed { reason: MediaError },
    /// Message not valid in the current phase. Logged and discarded, the
    /// session is left untouched.
    #[error("protocol violation: {0}")]
    NegotiationProtocolViolation(String),
    /// The browser refused to create or apply a description.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("no usable connection within the negotiation window")]
    NegotiationTimedOut,
    #[error("network path failed")]
    NetworkPathFailed,
    #[error("peer {0} is no longer reachable")]
    PeerLeft(PeerId),
    #[error("relay unavailable")]
    RelayUnavailable,
}

/// Reasons the media provider may give for not handing out an input stream.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("no input device found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

impl CallError {
    /// Violations only cost the offending message, everything else ends the
    /// attempt.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CallError::NegotiationProtocolViolation(_))
    }
}
