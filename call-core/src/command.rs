use std::fmt;

use proto::{CandidateDescriptor, PeerId, SessionDescription, Signal};

use crate::error::MediaError;
use crate::health::PathState;

/// Identifies one call attempt.
///
/// Every asynchronous command carries the attempt it was issued for and the
/// driver echoes it back with the result, which is how results of superseded
/// attempts are recognized and dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub u64);

/// Driver-side handle of a captured local input stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MediaStreamHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Work for the platform driver, in the order it must be executed.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Capture audio, answer with `EngineEvent::MediaAcquired`.
    AcquireMedia {
        attempt: AttemptId,
        device_id: Option<String>,
    },
    /// Stop all tracks of the stream.
    ReleaseMedia { stream: MediaStreamHandle },
    /// Create the peer connection for `attempt` and attach the stream's
    /// tracks. Local candidates and path changes are reported from here on.
    OpenConnection {
        attempt: AttemptId,
        stream: MediaStreamHandle,
        ice_servers: Vec<String>,
    },
    /// Create a local description of `kind` and apply it locally, answer
    /// with `EngineEvent::LocalDescription`.
    CreateDescription { attempt: AttemptId, kind: SdpKind },
    /// Answer with `EngineEvent::RemoteDescriptionApplied`.
    ApplyRemoteDescription {
        attempt: AttemptId,
        kind: SdpKind,
        sdp: SessionDescription,
    },
    /// Fire and forget, failures are only logged.
    ApplyCandidate {
        attempt: AttemptId,
        candidate: CandidateDescriptor,
    },
    /// Report the current path state with `EngineEvent::PathState`.
    ProbeHealth { attempt: AttemptId },
    CloseConnection { attempt: AttemptId },
    /// Hand a signal to the relay.
    Send { to: PeerId, signal: Signal },
    /// Ask the user whether to take the call.
    PromptIncoming { from: PeerId },
    /// Withdraw an earlier prompt.
    DismissPrompt { from: PeerId },
    ShowStatus(String),
}

/// Results of commands, reported back by the driver.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    MediaAcquired {
        attempt: AttemptId,
        result: Result<MediaStreamHandle, MediaError>,
    },
    LocalDescription {
        attempt: AttemptId,
        result: Result<SessionDescription, String>,
    },
    RemoteDescriptionApplied {
        attempt: AttemptId,
        result: Result<(), String>,
    },
    /// Gathered locally, to be trickled to the peer.
    LocalCandidate {
        attempt: AttemptId,
        candidate: CandidateDescriptor,
    },
    PathState { attempt: AttemptId, state: PathState },
}

impl EngineEvent {
    pub fn attempt(&self) -> AttemptId {
        match self {
            EngineEvent::MediaAcquired { attempt, .. }
            | EngineEvent::LocalDescription { attempt, .. }
            | EngineEvent::RemoteDescriptionApplied { attempt, .. }
            | EngineEvent::LocalCandidate { attempt, .. }
            | EngineEvent::PathState { attempt, .. } => *attempt,
        }
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
