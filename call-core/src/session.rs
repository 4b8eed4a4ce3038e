//! The peer session state machine.
//!
//! A `CallSession` drives exactly one connection attempt with one peer,
//! from media acquisition through offer/answer and candidate exchange to a
//! connected (or failed) network path. It never talks to the outside world
//! directly, every effect is pushed as a `Command`.

use chrono::NaiveDateTime;
use proto::{CandidateDescriptor, PeerId, SessionDescription, Signal};

use crate::candidates::RemoteCandidates;
use crate::command::{AttemptId, Command, MediaStreamHandle, SdpKind};
use crate::config::CallConfig;
use crate::error::CallError;
use crate::health::{HealthCheck, HealthMonitor, PathState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Started the call, sends the offer.
    Caller,
    /// Accepted an offer, sends the answer.
    Callee,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallPhase {
    Idle,
    /// Waiting for the local input stream.
    Acquiring,
    Negotiating,
    Connected,
    Degraded,
    Closed,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionHealth {
    Unknown,
    Connected,
    Degraded,
    Failed,
}

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Ended locally.
    Ended,
    /// The peer hung up or rejected.
    EndedByPeer { reason: String },
    Failed(CallError),
}

impl Termination {
    pub fn phase(&self) -> CallPhase {
        match self {
            Termination::Ended | Termination::EndedByPeer { .. } => CallPhase::Closed,
            Termination::Failed(_) => CallPhase::Failed,
        }
    }
}

#[derive(Debug)]
pub struct CallSession {
    peer: PeerId,
    role: Role,
    phase: CallPhase,
    attempt: AttemptId,
    local_stream: Option<MediaStreamHandle>,
    connection_open: bool,
    remote_candidates: RemoteCandidates,
    /// Local candidates held back until our description went out, `None`
    /// once it has.
    held_local_candidates: Option<Vec<CandidateDescriptor>>,
    /// Callee only: the offer to apply once media is ready.
    remote_offer: Option<SessionDescription>,
    awaiting_local: Option<SdpKind>,
    awaiting_remote: Option<SdpKind>,
    /// Caller only: an answer has been accepted.
    answered: bool,
    /// Caller only: remote candidates are dropped until the answer arrives.
    discarding_candidates: bool,
    health: HealthMonitor,
    deadline: NaiveDateTime,
}

impl CallSession {
    pub(crate) fn caller(
        peer: PeerId,
        attempt: AttemptId,
        config: &CallConfig,
        now: NaiveDateTime,
        out: &mut Vec<Command>,
    ) -> Self {
        Self::new(peer, Role::Caller, attempt, None, vec![], config, now, out)
    }

    /// `candidates` are those that arrived with or before the offer.
    pub(crate) fn callee(
        peer: PeerId,
        attempt: AttemptId,
        offer: SessionDescription,
        candidates: Vec<CandidateDescriptor>,
        config: &CallConfig,
        now: NaiveDateTime,
        out: &mut Vec<Command>,
    ) -> Self {
        Self::new(
            peer,
            Role::Callee,
            attempt,
            Some(offer),
            candidates,
            config,
            now,
            out,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        peer: PeerId,
        role: Role,
        attempt: AttemptId,
        remote_offer: Option<SessionDescription>,
        candidates: Vec<CandidateDescriptor>,
        config: &CallConfig,
        now: NaiveDateTime,
        out: &mut Vec<Command>,
    ) -> Self {
        debug!("session {attempt} with {peer} starts as {role:?}");
        out.push(Command::AcquireMedia {
            attempt,
            device_id: config.input_device.clone(),
        });
        Self {
            peer,
            role,
            phase: CallPhase::Acquiring,
            attempt,
            local_stream: None,
            connection_open: false,
            remote_candidates: RemoteCandidates::with_pending(candidates),
            held_local_candidates: Some(vec![]),
            remote_offer,
            awaiting_local: None,
            awaiting_remote: None,
            answered: false,
            discarding_candidates: false,
            health: HealthMonitor::new(config.health_probe_interval, config.degraded_timeout),
            deadline: now + config.negotiation_timeout,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn local_stream(&self) -> Option<MediaStreamHandle> {
        self.local_stream
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        self.health.health()
    }

    /// Remote candidates waiting for a remote description.
    pub fn pending_remote_candidates(&self) -> usize {
        self.remote_candidates.pending_len()
    }

    /// A caller whose offer has not been answered yet. Only such a session
    /// can collide with an inbound offer from the same peer.
    pub(crate) fn is_offering(&self) -> bool {
        self.role == Role::Caller
            && matches!(self.phase, CallPhase::Acquiring | CallPhase::Negotiating)
            && !self.answered
    }

    pub(crate) fn is_established(&self) -> bool {
        matches!(self.phase, CallPhase::Connected | CallPhase::Degraded)
    }

    pub(crate) fn media_acquired(
        &mut self,
        stream: MediaStreamHandle,
        config: &CallConfig,
        out: &mut Vec<Command>,
    ) -> Result<(), CallError> {
        if self.phase != CallPhase::Acquiring {
            out.push(Command::ReleaseMedia { stream });
            return Err(violation("media stream delivered twice"));
        }
        self.local_stream = Some(stream);
        self.phase = CallPhase::Negotiating;
        out.push(Command::OpenConnection {
            attempt: self.attempt,
            stream,
            ice_servers: config.ice_servers.clone(),
        });
        self.connection_open = true;

        match self.role {
            Role::Caller => self.request_local(SdpKind::Offer, out),
            Role::Callee => {
                let offer = self
                    .remote_offer
                    .take()
                    .ok_or_else(|| violation("callee session without an offer"))?;
                self.request_remote(SdpKind::Offer, offer, out);
            }
        }
        Ok(())
    }

    pub(crate) fn local_description_ready(
        &mut self,
        sdp: SessionDescription,
        out: &mut Vec<Command>,
    ) -> Result<(), CallError> {
        let Some(kind) = self.awaiting_local.take() else {
            return Err(violation("local description nobody asked for"));
        };
        if !sdp.is_well_formed() {
            return Err(CallError::NegotiationFailed(
                "empty local description".to_owned(),
            ));
        }
        let signal = match kind {
            SdpKind::Offer => Signal::Offer { sdp },
            SdpKind::Answer => Signal::Answer { sdp },
        };
        self.send(signal, out);
        if let Some(held) = self.held_local_candidates.take() {
            for candidate in held {
                self.send(Signal::IceCandidate { candidate }, out);
            }
        }
        Ok(())
    }

    pub(crate) fn remote_description_applied(
        &mut self,
        out: &mut Vec<Command>,
    ) -> Result<(), CallError> {
        let Some(kind) = self.awaiting_remote.take() else {
            return Err(violation("remote description nobody asked for"));
        };
        let drained = self.remote_candidates.remote_description_set();
        if !drained.is_empty() {
            debug!("applying {} buffered candidates from {}", drained.len(), self.peer);
        }
        for candidate in drained {
            out.push(Command::ApplyCandidate {
                attempt: self.attempt,
                candidate,
            });
        }
        if kind == SdpKind::Offer {
            self.request_local(SdpKind::Answer, out);
        }
        Ok(())
    }

    pub(crate) fn add_remote_candidate(
        &mut self,
        candidate: CandidateDescriptor,
        out: &mut Vec<Command>,
    ) {
        if self.discarding_candidates {
            debug!("dropping candidate from {} sent before its answer", self.peer);
            return;
        }
        match self.remote_candidates.add(candidate) {
            Some(candidate) => out.push(Command::ApplyCandidate {
                attempt: self.attempt,
                candidate,
            }),
            None => trace!("buffering candidate from {}", self.peer),
        }
    }

    pub(crate) fn add_local_candidate(
        &mut self,
        candidate: CandidateDescriptor,
        out: &mut Vec<Command>,
    ) {
        match &mut self.held_local_candidates {
            Some(held) => held.push(candidate),
            None => self.send(Signal::IceCandidate { candidate }, out),
        }
    }

    pub(crate) fn apply_answer(
        &mut self,
        sdp: SessionDescription,
        out: &mut Vec<Command>,
    ) -> Result<(), CallError> {
        if self.role != Role::Caller || self.phase != CallPhase::Negotiating {
            return Err(violation(&format!(
                "answer in phase {:?} as {:?}",
                self.phase, self.role
            )));
        }
        if self.answered || self.held_local_candidates.is_some() {
            return Err(violation("answer without an outstanding offer"));
        }
        if !sdp.is_well_formed() {
            return Err(violation("empty answer"));
        }
        self.answered = true;
        self.discarding_candidates = false;
        self.request_remote(SdpKind::Answer, sdp, out);
        Ok(())
    }

    /// A new offer from the peer of an established call.
    pub(crate) fn renegotiate(
        &mut self,
        offer: SessionDescription,
        out: &mut Vec<Command>,
    ) -> Result<(), CallError> {
        if !self.is_established() {
            return Err(violation("offer while still negotiating"));
        }
        if self.awaiting_local.is_some() || self.awaiting_remote.is_some() {
            return Err(violation("offer while a renegotiation is in flight"));
        }
        if !offer.is_well_formed() {
            return Err(violation("empty offer"));
        }
        info!("renegotiation requested by {}", self.peer);
        self.request_remote(SdpKind::Offer, offer, out);
        Ok(())
    }

    pub(crate) fn observe_path(
        &mut self,
        state: PathState,
        now: NaiveDateTime,
    ) -> Result<(), CallError> {
        if !matches!(
            self.phase,
            CallPhase::Negotiating | CallPhase::Connected | CallPhase::Degraded
        ) {
            debug!("ignoring path state {state:?} in phase {:?}", self.phase);
            return Ok(());
        }
        match self.health.observe(state, now) {
            ConnectionHealth::Unknown => {}
            ConnectionHealth::Connected => self.phase = CallPhase::Connected,
            ConnectionHealth::Degraded => self.phase = CallPhase::Degraded,
            ConnectionHealth::Failed => return Err(CallError::NetworkPathFailed),
        }
        Ok(())
    }

    pub(crate) fn tick(&mut self, now: NaiveDateTime, out: &mut Vec<Command>) -> Result<(), CallError> {
        match self.phase {
            CallPhase::Acquiring | CallPhase::Negotiating if now >= self.deadline => {
                Err(CallError::NegotiationTimedOut)
            }
            CallPhase::Connected | CallPhase::Degraded => match self.health.check(now) {
                HealthCheck::Fine => Ok(()),
                HealthCheck::ProbeDue => {
                    out.push(Command::ProbeHealth {
                        attempt: self.attempt,
                    });
                    Ok(())
                }
                HealthCheck::Expired => Err(CallError::NetworkPathFailed),
            },
            _ => Ok(()),
        }
    }

    /// Queued remote candidates that are still valid for a replacement
    /// session with the same peer.
    pub(crate) fn take_remote_candidates(&mut self) -> Vec<CandidateDescriptor> {
        self.remote_candidates.take_pending()
    }

    /// The peer's offer lost glare against ours. Its candidates up to its
    /// answer belong to the attempt it dropped.
    pub(crate) fn discard_remote_candidates_until_answer(&mut self) {
        let dropped = self.remote_candidates.take_pending().len();
        if dropped > 0 {
            debug!("dropping {dropped} candidates of {}'s dropped attempt", self.peer);
        }
        self.discarding_candidates = !self.answered;
    }

    /// Releases transport and media. Emitted synchronously, so the session
    /// can be dropped right after.
    pub(crate) fn teardown(mut self, termination: &Termination, out: &mut Vec<Command>) {
        self.phase = termination.phase();
        debug!(
            "session {} with {} torn down as {:?}",
            self.attempt, self.peer, self.phase
        );
        if self.connection_open {
            out.push(Command::CloseConnection {
                attempt: self.attempt,
            });
        }
        if let Some(stream) = self.local_stream.take() {
            out.push(Command::ReleaseMedia { stream });
        }
    }

    fn request_local(&mut self, kind: SdpKind, out: &mut Vec<Command>) {
        self.awaiting_local = Some(kind);
        out.push(Command::CreateDescription {
            attempt: self.attempt,
            kind,
        });
    }

    fn request_remote(&mut self, kind: SdpKind, sdp: SessionDescription, out: &mut Vec<Command>) {
        self.awaiting_remote = Some(kind);
        out.push(Command::ApplyRemoteDescription {
            attempt: self.attempt,
            kind,
            sdp,
        });
    }

    fn send(&self, signal: Signal, out: &mut Vec<Command>) {
        out.push(Command::Send {
            to: self.peer.clone(),
            signal,
        });
    }
}

fn violation(what: &str) -> CallError {
    CallError::NegotiationProtocolViolation(what.to_owned())
}
