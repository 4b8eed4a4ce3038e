//! Human readable status lines.

use proto::PeerId;

use crate::error::{CallError, MediaError};
use crate::session::{CallPhase, CallSession, Role, Termination};

pub(crate) fn idle(relay_up: bool) -> String {
    if relay_up {
        "Ready".to_owned()
    } else {
        "Connecting to relay...".to_owned()
    }
}

pub(crate) fn incoming(from: &PeerId) -> String {
    format!("Incoming call from {from}")
}

pub(crate) fn session(session: &CallSession) -> String {
    let peer = session.peer();
    match (session.phase(), session.role()) {
        (CallPhase::Acquiring, _) => "Requesting microphone access...".to_owned(),
        (CallPhase::Negotiating, Role::Caller) => format!("Calling {peer}..."),
        (CallPhase::Negotiating, Role::Callee) => format!("Connecting to {peer}..."),
        (CallPhase::Connected, _) => format!("In call with {peer}"),
        (CallPhase::Degraded, _) => format!("Connection to {peer} is unstable, recovering..."),
        (CallPhase::Idle | CallPhase::Closed | CallPhase::Failed, _) => "Call ended".to_owned(),
    }
}

pub(crate) fn terminated(peer: &PeerId, termination: &Termination) -> String {
    match termination {
        Termination::Ended => "Call ended".to_owned(),
        Termination::EndedByPeer { reason } if reason.is_empty() => {
            format!("{peer} ended the call")
        }
        Termination::EndedByPeer { reason } => format!("{peer} ended the call ({reason})"),
        Termination::Failed(err) => failure(err),
    }
}

pub(crate) fn failure(err: &CallError) -> String {
    match err {
        CallError::MediaAcquisitionFailed { reason } => match reason {
            MediaError::PermissionDenied => {
                "Microphone access was denied. Allow microphone access for this page and try again."
                    .to_owned()
            }
            MediaError::NotFound => {
                "No microphone found. Connect an audio input device and try again.".to_owned()
            }
            MediaError::Other(detail) => format!("Could not start the microphone: {detail}"),
        },
        CallError::NetworkPathFailed => "Connection lost".to_owned(),
        CallError::NegotiationTimedOut => "Call could not be established, no response".to_owned(),
        CallError::PeerLeft(peer) => format!("{peer} is no longer reachable"),
        other => format!("Call failed: {other}"),
    }
}
