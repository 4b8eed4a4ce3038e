//! The call coordinator.
//!
//! Single owner of "is there a call, and with whom". All inputs (user intent,
//! relay traffic, engine results, timer ticks) go through here, so this is
//! the one place that decides whether an envelope is valid in the current
//! phase.

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use proto::{CandidateDescriptor, PeerId, SessionDescription, Signal};

use crate::command::{AttemptId, Command, EngineEvent};
use crate::config::CallConfig;
use crate::error::CallError;
use crate::session::{CallPhase, CallSession, Role, Termination};
use crate::status;

const REASON_BUSY: &str = "busy";
const REASON_DECLINED: &str = "declined";
const REASON_HUNG_UP: &str = "hung up";
const REASON_FAILED: &str = "failed";
const REASON_RESTARTED: &str = "restarted";

/// An offer waiting for the user's decision.
#[derive(Debug)]
struct IncomingCall {
    from: PeerId,
    offer: SessionDescription,
    /// Candidates that arrived while the user makes up their mind.
    candidates: Vec<CandidateDescriptor>,
}

#[derive(Debug)]
pub struct Coordinator {
    config: CallConfig,
    self_id: Option<PeerId>,
    relay_up: bool,
    roster: Vec<PeerId>,
    session: Option<CallSession>,
    incoming: Option<IncomingCall>,
    last_attempt: u64,
    /// Signals held back while the relay is down.
    outbox: VecDeque<(PeerId, Signal)>,
    commands: Vec<Command>,
    status: String,
    last_termination: Option<Termination>,
}

impl Coordinator {
    pub fn new(config: CallConfig) -> Self {
        Self {
            config,
            self_id: None,
            relay_up: false,
            roster: vec![],
            session: None,
            incoming: None,
            last_attempt: 0,
            outbox: VecDeque::new(),
            commands: vec![],
            status: status::idle(false),
            last_termination: None,
        }
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn self_id(&self) -> Option<&PeerId> {
        self.self_id.as_ref()
    }

    /// Reachable peers, without ourselves.
    pub fn roster(&self) -> &[PeerId] {
        &self.roster
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> CallPhase {
        self.session
            .as_ref()
            .map_or(CallPhase::Idle, CallSession::phase)
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(CallSession::role)
    }

    /// Peer whose call is waiting for accept or reject.
    pub fn incoming_from(&self) -> Option<&PeerId> {
        self.incoming.as_ref().map(|call| &call.from)
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// How the previous session ended, kept for diagnostics.
    pub fn last_termination(&self) -> Option<&Termination> {
        self.last_termination.as_ref()
    }

    /// Everything the driver has to do, in order.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /* relay directory events */

    pub fn relay_connected(&mut self, id: PeerId) {
        info!("relay connection up, we are {id}");
        let changed = self.self_id.as_ref().map_or(false, |old| *old != id);
        if changed {
            warn!("relay assigned a new identity, now {id}");
            if self.session.as_ref().map_or(false, |s| !s.is_established()) {
                self.fail(CallError::RelayUnavailable);
            }
            if let Some(call) = self.incoming.take() {
                self.commands.push(Command::DismissPrompt { from: call.from });
            }
            // everything held was addressed under the old identity
            if !self.outbox.is_empty() {
                debug!("discarding {} signals held for the old identity", self.outbox.len());
                self.outbox.clear();
            }
        }
        self.self_id = Some(id);
        self.relay_up = true;
        if !self.outbox.is_empty() {
            debug!("flushing {} held signals", self.outbox.len());
        }
        while let Some((to, signal)) = self.outbox.pop_front() {
            self.commands.push(Command::Send { to, signal });
        }
        self.refresh_status();
    }

    pub fn relay_lost(&mut self) {
        warn!("relay connection lost");
        self.relay_up = false;
        if self.session.is_none() && self.incoming.is_none() {
            self.set_status(status::idle(false));
        }
    }

    pub fn update_roster(&mut self, peers: Vec<PeerId>) {
        let own = self.self_id.clone();
        self.roster = peers
            .into_iter()
            .filter(|peer| Some(peer) != own.as_ref())
            .collect();
        debug!("roster now has {} peers", self.roster.len());

        if let Some(session) = &self.session {
            if !session.is_established() && !self.roster.contains(session.peer()) {
                let peer = session.peer().clone();
                self.fail(CallError::PeerLeft(peer));
            }
        }
        if let Some(call) = &self.incoming {
            if !self.roster.contains(&call.from) {
                let from = call.from.clone();
                info!("{from} left while ringing");
                self.incoming = None;
                self.commands.push(Command::DismissPrompt { from });
                self.set_status(status::idle(self.relay_up));
            }
        }
    }

    /* user intent */

    pub fn start_call(&mut self, peer: PeerId, now: NaiveDateTime) -> Result<(), CallError> {
        let Some(own) = &self.self_id else {
            return Err(CallError::RelayUnavailable);
        };
        if *own == peer || peer.as_str().is_empty() {
            return Err(CallError::InvalidPeer(peer));
        }
        if let Some(session) = &self.session {
            if *session.peer() != peer {
                return Err(CallError::AlreadyInCall {
                    peer: session.peer().clone(),
                });
            }
        }
        match self.incoming.as_ref().map(|call| call.from == peer) {
            Some(true) => {
                // calling the peer that is ringing us is just picking up
                self.accept_incoming(now);
                return Ok(());
            }
            Some(false) => self.reject_incoming_with(REASON_BUSY),
            None => {}
        }
        if self.session.is_some() {
            info!("restarting call with {peer}");
            self.end_session(Termination::Ended, Some(REASON_RESTARTED));
        }

        let attempt = self.next_attempt();
        let mut out = vec![];
        let session = CallSession::caller(peer, attempt, &self.config, now, &mut out);
        self.begin(session, out);
        Ok(())
    }

    pub fn accept_incoming(&mut self, now: NaiveDateTime) {
        let Some(call) = self.incoming.take() else {
            warn!("accept without an incoming call");
            return;
        };
        debug_assert!(self.session.is_none(), "prompt while in a call");
        info!("accepting call from {}", call.from);
        self.commands.push(Command::DismissPrompt {
            from: call.from.clone(),
        });
        let attempt = self.next_attempt();
        let mut out = vec![];
        let session = CallSession::callee(
            call.from,
            attempt,
            call.offer,
            call.candidates,
            &self.config,
            now,
            &mut out,
        );
        self.begin(session, out);
    }

    pub fn reject_incoming(&mut self) {
        self.reject_incoming_with(REASON_DECLINED);
    }

    /// Ends whatever is going on. Calling it with nothing going on is fine.
    pub fn end_call(&mut self) {
        if self.session.is_some() {
            self.end_session(Termination::Ended, Some(REASON_HUNG_UP));
        } else if self.incoming.is_some() {
            self.reject_incoming();
        } else {
            debug!("end call while idle");
        }
    }

    /* inbound envelopes */

    pub fn handle_envelope(&mut self, from: PeerId, signal: Signal, now: NaiveDateTime) {
        debug!("{} from {from}", signal.kind());
        match signal {
            Signal::Offer { sdp } => self.handle_inbound_offer(from, sdp, now),
            Signal::Answer { sdp } => self.handle_inbound_answer(from, sdp),
            Signal::IceCandidate { candidate } => self.handle_inbound_candidate(from, candidate),
            Signal::Hangup { reason } => self.handle_inbound_hangup(from, reason),
        }
    }

    pub fn handle_inbound_offer(&mut self, from: PeerId, sdp: SessionDescription, now: NaiveDateTime) {
        if !sdp.is_well_formed() {
            warn!("discarding empty offer from {from}");
            return;
        }
        let Some(session) = &mut self.session else {
            match &mut self.incoming {
                None => {
                    info!("incoming call from {from}");
                    self.incoming = Some(IncomingCall {
                        from: from.clone(),
                        offer: sdp,
                        candidates: vec![],
                    });
                    self.commands.push(Command::PromptIncoming { from: from.clone() });
                    self.set_status(status::incoming(&from));
                }
                Some(call) if call.from == from => {
                    debug!("repeated offer from {from}, keeping the latest");
                    call.offer = sdp;
                }
                Some(call) => {
                    info!("auto-rejecting {from}, already ringing for {}", call.from);
                    self.send(from, Signal::Hangup { reason: REASON_BUSY.to_owned() });
                }
            }
            return;
        };

        if *session.peer() != from {
            info!("auto-rejecting {from}, in a call with {}", session.peer());
            self.send(from, Signal::Hangup { reason: REASON_BUSY.to_owned() });
        } else if session.is_offering() {
            self.resolve_glare(from, sdp, now);
        } else if session.is_established() {
            let mut out = vec![];
            let result = session.renegotiate(sdp, &mut out);
            self.emit_all(out);
            self.settle(result);
        } else {
            warn!("discarding duplicate offer from {from}");
        }
    }

    pub fn handle_inbound_answer(&mut self, from: PeerId, sdp: SessionDescription) {
        match &mut self.session {
            Some(session) if *session.peer() == from => {
                let mut out = vec![];
                let result = session.apply_answer(sdp, &mut out);
                self.emit_all(out);
                self.settle(result);
            }
            _ => warn!("discarding answer from {from}, no outstanding offer to it"),
        }
    }

    pub fn handle_inbound_candidate(&mut self, from: PeerId, candidate: CandidateDescriptor) {
        if let Some(session) = self.session.as_mut().filter(|s| *s.peer() == from) {
            let mut out = vec![];
            session.add_remote_candidate(candidate, &mut out);
            self.emit_all(out);
        } else if let Some(call) = self.incoming.as_mut().filter(|c| c.from == from) {
            call.candidates.push(candidate);
        } else {
            debug!("discarding candidate from {from}, no session with it");
        }
    }

    pub fn handle_inbound_hangup(&mut self, from: PeerId, reason: String) {
        if self.session.as_ref().map_or(false, |s| *s.peer() == from) {
            self.end_session(Termination::EndedByPeer { reason }, None);
        } else if self.incoming.as_ref().map_or(false, |c| c.from == from) {
            info!("{from} gave up calling ({reason})");
            self.incoming = None;
            self.commands.push(Command::DismissPrompt { from: from.clone() });
            self.set_status(format!("Missed call from {from}"));
        } else {
            debug!("ignoring hangup from {from}");
        }
    }

    /// The relay could not deliver a signal to `to`.
    pub fn handle_undeliverable(&mut self, to: PeerId) {
        match &self.session {
            Some(session) if *session.peer() == to && !session.is_established() => {
                self.fail(CallError::PeerLeft(to));
            }
            _ => debug!("signal to {to} was not delivered"),
        }
    }

    /* driver results and timers */

    pub fn handle_engine_event(&mut self, event: EngineEvent, now: NaiveDateTime) {
        let attempt = event.attempt();
        let Some(session) = self.session.as_mut().filter(|s| s.attempt() == attempt) else {
            debug!("dropping result of superseded attempt {attempt}");
            if let EngineEvent::MediaAcquired {
                result: Ok(stream), ..
            } = event
            {
                self.commands.push(Command::ReleaseMedia { stream });
            }
            return;
        };

        let mut out = vec![];
        let result = match event {
            EngineEvent::MediaAcquired { result, .. } => match result {
                Ok(stream) => session.media_acquired(stream, &self.config, &mut out),
                Err(reason) => Err(CallError::MediaAcquisitionFailed { reason }),
            },
            EngineEvent::LocalDescription { result, .. } => match result {
                Ok(sdp) => session.local_description_ready(sdp, &mut out),
                Err(err) => Err(CallError::NegotiationFailed(err)),
            },
            EngineEvent::RemoteDescriptionApplied { result, .. } => match result {
                Ok(()) => session.remote_description_applied(&mut out),
                Err(err) => Err(CallError::NegotiationFailed(err)),
            },
            EngineEvent::LocalCandidate { candidate, .. } => {
                session.add_local_candidate(candidate, &mut out);
                Ok(())
            }
            EngineEvent::PathState { state, .. } => session.observe_path(state, now),
        };
        self.emit_all(out);
        self.settle(result);
        self.refresh_status();
    }

    pub fn tick(&mut self, now: NaiveDateTime) {
        let Some(session) = &mut self.session else {
            return;
        };
        let mut out = vec![];
        let result = session.tick(now, &mut out);
        self.emit_all(out);
        self.settle(result);
        self.refresh_status();
    }

    /* internals */

    fn resolve_glare(&mut self, from: PeerId, offer: SessionDescription, now: NaiveDateTime) {
        let Some(own) = &self.self_id else {
            warn!("glare with {from} before we know our own id, ignoring its offer");
            return;
        };
        if *own >= from {
            info!("glare with {from}: {own} keeps its offer");
            if let Some(session) = &mut self.session {
                // the peer's candidates up to its answer belong to its dropped attempt
                session.discard_remote_candidates_until_answer();
            }
            return;
        }
        info!("glare with {from}: {own} yields and answers");
        let Some(mut ours) = self.session.take() else {
            return;
        };
        // these came from the peer's surviving attempt, the new session needs them
        let candidates = ours.take_remote_candidates();
        let mut out = vec![];
        ours.teardown(&Termination::Ended, &mut out);

        let attempt = self.next_attempt();
        let session = CallSession::callee(from, attempt, offer, candidates, &self.config, now, &mut out);
        self.begin(session, out);
    }

    fn reject_incoming_with(&mut self, reason: &str) {
        if let Some(call) = self.incoming.take() {
            info!("rejecting call from {} ({reason})", call.from);
            self.commands.push(Command::DismissPrompt {
                from: call.from.clone(),
            });
            self.send(call.from, Signal::Hangup { reason: reason.to_owned() });
            self.set_status(status::idle(self.relay_up));
        }
    }

    fn next_attempt(&mut self) -> AttemptId {
        self.last_attempt += 1;
        AttemptId(self.last_attempt)
    }

    fn begin(&mut self, session: CallSession, out: Vec<Command>) {
        debug_assert!(self.session.is_none(), "second active session");
        self.session = Some(session);
        self.emit_all(out);
        self.refresh_status();
    }

    fn end_session(&mut self, termination: Termination, hangup: Option<&str>) {
        let Some(session) = self.session.take() else {
            return;
        };
        let peer = session.peer().clone();
        let mut out = vec![];
        session.teardown(&termination, &mut out);
        self.emit_all(out);
        if let Some(reason) = hangup {
            self.send(peer.clone(), Signal::Hangup { reason: reason.to_owned() });
        }
        match &termination {
            Termination::Failed(err) => warn!("call with {peer} failed: {err}"),
            Termination::Ended => info!("call with {peer} ended"),
            Termination::EndedByPeer { reason } => info!("{peer} ended the call ({reason})"),
        }
        self.set_status(status::terminated(&peer, &termination));
        self.last_termination = Some(termination);
    }

    fn fail(&mut self, err: CallError) {
        self.end_session(Termination::Failed(err), Some(REASON_FAILED));
    }

    /// Violations cost the message, anything else costs the call.
    fn settle(&mut self, result: Result<(), CallError>) {
        match result {
            Ok(()) => {}
            Err(err) if err.is_fatal() => self.fail(err),
            Err(err) => warn!("discarding message: {err}"),
        }
    }

    fn send(&mut self, to: PeerId, signal: Signal) {
        if self.relay_up {
            self.commands.push(Command::Send { to, signal });
            return;
        }
        while self.outbox.len() >= self.config.outbox_capacity.max(1) {
            if let Some((dropped_to, dropped)) = self.outbox.pop_front() {
                warn!("outbox full, dropping {} to {dropped_to}", dropped.kind());
            }
        }
        self.outbox.push_back((to, signal));
    }

    fn emit_all(&mut self, out: Vec<Command>) {
        for command in out {
            match command {
                Command::Send { to, signal } => self.send(to, signal),
                other => self.commands.push(other),
            }
        }
    }

    fn set_status(&mut self, line: String) {
        if line != self.status {
            self.status = line.clone();
            self.commands.push(Command::ShowStatus(line));
        }
    }

    /// Follows the current phase. When idle, the last terminal message stays.
    fn refresh_status(&mut self) {
        let line = match (&self.session, &self.incoming) {
            (Some(session), _) => status::session(session),
            (None, Some(call)) => status::incoming(&call.from),
            (None, None) if self.last_termination.is_none() => status::idle(self.relay_up),
            (None, None) => return,
        };
        self.set_status(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{MediaStreamHandle, SdpKind};
    use crate::error::MediaError;
    use crate::health::PathState;
    use chrono::{Duration, NaiveDate};

    fn t(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + Duration::seconds(secs)
    }

    fn sdp(text: &str) -> SessionDescription {
        SessionDescription::new(text)
    }

    fn candidate(n: u16) -> CandidateDescriptor {
        CandidateDescriptor {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.{n} 4000 typ host"),
            sdp_m_line_index: 0,
            sdp_mid: "0".to_owned(),
        }
    }

    fn online(id: &str, peers: &[&str]) -> Coordinator {
        let mut coord = Coordinator::new(CallConfig::default());
        coord.relay_connected(id.into());
        coord.update_roster(peers.iter().map(|p| PeerId::from(*p)).collect());
        coord.take_commands();
        coord
    }

    fn attempt(coord: &Coordinator) -> AttemptId {
        coord.session().expect("no session").attempt()
    }

    fn sent(commands: &[Command]) -> Vec<(PeerId, Signal)> {
        commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::Send { to, signal } => Some((to.clone(), signal.clone())),
                _ => None,
            })
            .collect()
    }

    fn hangup(reason: &str) -> Signal {
        Signal::Hangup {
            reason: reason.to_owned(),
        }
    }

    #[test]
    fn start_call_requires_relay() {
        let mut coord = Coordinator::new(CallConfig::default());
        assert_eq!(
            coord.start_call("b".into(), t(0)),
            Err(CallError::RelayUnavailable)
        );
    }

    #[test]
    fn calling_yourself_is_invalid() {
        let mut coord = online("a", &["a", "b"]);
        assert_eq!(
            coord.start_call("a".into(), t(0)),
            Err(CallError::InvalidPeer("a".into()))
        );
        assert_eq!(coord.roster(), &[PeerId::from("b")]);
    }

    #[test]
    fn second_call_to_other_peer_is_refused() {
        let mut coord = online("a", &["b", "c"]);
        coord.start_call("b".into(), t(0)).unwrap();
        let first = attempt(&coord);
        assert_eq!(
            coord.start_call("c".into(), t(1)),
            Err(CallError::AlreadyInCall { peer: "b".into() })
        );
        assert_eq!(attempt(&coord), first);
    }

    #[test]
    fn inbound_offer_prompts_when_idle() {
        let mut coord = online("b", &["a"]);
        coord.handle_inbound_offer("a".into(), sdp("offer"), t(0));
        let commands = coord.take_commands();
        assert!(commands.contains(&Command::PromptIncoming { from: "a".into() }));
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert_eq!(coord.incoming_from(), Some(&PeerId::from("a")));
        assert_eq!(coord.status(), "Incoming call from a");
    }

    #[test]
    fn offer_from_stranger_during_call_is_rejected_silently() {
        let mut coord = online("a", &["b", "c"]);
        coord.start_call("b".into(), t(0)).unwrap();
        let before = attempt(&coord);
        coord.take_commands();

        coord.handle_inbound_offer("c".into(), sdp("offer"), t(1));
        let commands = coord.take_commands();
        assert!(!commands
            .iter()
            .any(|cmd| matches!(cmd, Command::PromptIncoming { .. })));
        assert_eq!(sent(&commands), vec![("c".into(), hangup("busy"))]);
        assert_eq!(attempt(&coord), before);
        assert_eq!(coord.session().unwrap().peer(), &PeerId::from("b"));
    }

    #[test]
    fn second_ringing_peer_is_rejected() {
        let mut coord = online("a", &["b", "c"]);
        coord.handle_inbound_offer("b".into(), sdp("offer"), t(0));
        coord.take_commands();
        coord.handle_inbound_offer("c".into(), sdp("offer"), t(1));
        let commands = coord.take_commands();
        assert_eq!(sent(&commands), vec![("c".into(), hangup("busy"))]);
        assert_eq!(coord.incoming_from(), Some(&PeerId::from("b")));
    }

    #[test]
    fn candidates_wait_with_the_prompt() {
        let mut coord = online("b", &["a"]);
        coord.handle_inbound_offer("a".into(), sdp("offer"), t(0));
        coord.handle_inbound_candidate("a".into(), candidate(1));
        coord.handle_inbound_candidate("a".into(), candidate(2));
        coord.take_commands();
        coord.accept_incoming(t(1));
        assert_eq!(coord.role(), Some(Role::Callee));
        assert_eq!(coord.session().unwrap().pending_remote_candidates(), 2);
        assert!(coord
            .take_commands()
            .contains(&Command::DismissPrompt { from: "a".into() }));
    }

    #[test]
    fn candidate_without_session_is_dropped() {
        let mut coord = online("b", &["a"]);
        coord.handle_inbound_candidate("a".into(), candidate(1));
        assert!(coord.take_commands().is_empty());
        assert_eq!(coord.phase(), CallPhase::Idle);
    }

    #[test]
    fn stray_answer_is_a_warning_only() {
        let mut coord = online("a", &["b"]);
        coord.handle_inbound_answer("b".into(), sdp("answer"));
        assert_eq!(coord.phase(), CallPhase::Idle);

        coord.start_call("b".into(), t(0)).unwrap();
        coord.handle_inbound_answer("b".into(), sdp("answer"));
        assert_eq!(coord.phase(), CallPhase::Acquiring);
    }

    #[test]
    fn end_call_is_idempotent() {
        let mut coord = online("a", &["b"]);
        coord.start_call("b".into(), t(0)).unwrap();
        let a = attempt(&coord);
        coord.handle_engine_event(
            EngineEvent::MediaAcquired {
                attempt: a,
                result: Ok(MediaStreamHandle(1)),
            },
            t(1),
        );
        coord.take_commands();

        coord.end_call();
        let first = coord.take_commands();
        assert!(first.contains(&Command::CloseConnection { attempt: a }));
        assert!(first.contains(&Command::ReleaseMedia {
            stream: MediaStreamHandle(1)
        }));
        assert_eq!(sent(&first), vec![("b".into(), hangup("hung up"))]);
        let status = coord.status().to_owned();

        coord.end_call();
        assert!(coord.take_commands().is_empty());
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert_eq!(coord.status(), status);
        assert_eq!(coord.last_termination(), Some(&Termination::Ended));
    }

    #[test]
    fn media_failure_tears_down_with_guidance() {
        let mut coord = online("a", &["b"]);
        coord.start_call("b".into(), t(0)).unwrap();
        let a = attempt(&coord);
        coord.take_commands();
        coord.handle_engine_event(
            EngineEvent::MediaAcquired {
                attempt: a,
                result: Err(MediaError::PermissionDenied),
            },
            t(1),
        );
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert!(coord.status().contains("Microphone access was denied"));
        assert_eq!(
            coord.last_termination(),
            Some(&Termination::Failed(CallError::MediaAcquisitionFailed {
                reason: MediaError::PermissionDenied
            }))
        );
        let commands = coord.take_commands();
        // nothing was opened, nothing to close
        assert!(!commands
            .iter()
            .any(|cmd| matches!(cmd, Command::CloseConnection { .. })));
    }

    #[test]
    fn late_stream_of_cancelled_attempt_is_released() {
        let mut coord = online("a", &["b"]);
        coord.start_call("b".into(), t(0)).unwrap();
        let a = attempt(&coord);
        coord.end_call();
        coord.take_commands();

        coord.handle_engine_event(
            EngineEvent::MediaAcquired {
                attempt: a,
                result: Ok(MediaStreamHandle(5)),
            },
            t(1),
        );
        assert_eq!(
            coord.take_commands(),
            vec![Command::ReleaseMedia {
                stream: MediaStreamHandle(5)
            }]
        );
        assert_eq!(coord.phase(), CallPhase::Idle);
    }

    #[test]
    fn late_description_of_replaced_attempt_is_ignored() {
        let mut coord = online("a", &["b"]);
        coord.start_call("b".into(), t(0)).unwrap();
        let old = attempt(&coord);
        coord.start_call("b".into(), t(1)).unwrap();
        let new = attempt(&coord);
        assert_ne!(old, new);
        coord.take_commands();

        coord.handle_engine_event(
            EngineEvent::LocalDescription {
                attempt: old,
                result: Ok(sdp("stale offer")),
            },
            t(2),
        );
        assert!(sent(&coord.take_commands()).is_empty());
        assert_eq!(coord.phase(), CallPhase::Acquiring);
    }

    fn offering(id: &str, peer: &str) -> Coordinator {
        let mut coord = online(id, &[peer]);
        coord.start_call(peer.into(), t(0)).unwrap();
        let a = attempt(&coord);
        coord.handle_engine_event(
            EngineEvent::MediaAcquired {
                attempt: a,
                result: Ok(MediaStreamHandle(1)),
            },
            t(0),
        );
        coord.handle_engine_event(
            EngineEvent::LocalDescription {
                attempt: a,
                result: Ok(sdp(&format!("offer from {id}"))),
            },
            t(0),
        );
        coord.take_commands();
        coord
    }

    #[test]
    fn glare_smaller_id_yields() {
        let mut a = offering("a", "b");
        a.handle_inbound_candidate("b".into(), candidate(1));
        a.handle_inbound_offer("b".into(), sdp("offer from b"), t(1));

        assert_eq!(a.role(), Some(Role::Callee));
        assert_eq!(a.phase(), CallPhase::Acquiring);
        // queued candidates of the surviving attempt carry over
        assert_eq!(a.session().unwrap().pending_remote_candidates(), 1);
        let commands = a.take_commands();
        assert!(sent(&commands).is_empty(), "yielding must not hang up");
        assert!(commands
            .iter()
            .any(|cmd| matches!(cmd, Command::ReleaseMedia { .. })));
        assert!(!commands
            .iter()
            .any(|cmd| matches!(cmd, Command::PromptIncoming { .. })));
    }

    #[test]
    fn glare_larger_id_keeps_offer() {
        let mut b = offering("b", "a");
        let before = attempt(&b);
        b.handle_inbound_offer("a".into(), sdp("offer from a"), t(1));
        assert_eq!(b.role(), Some(Role::Caller));
        assert_eq!(attempt(&b), before);
        assert!(b.take_commands().is_empty());
    }

    #[test]
    fn glare_larger_id_drops_candidates_of_the_yielded_attempt() {
        let mut b = offering("b", "a");
        let live = attempt(&b);
        b.handle_inbound_candidate("a".into(), candidate(1));
        b.handle_inbound_offer("a".into(), sdp("offer from a"), t(1));
        // trickled by a's attempt that yielded
        b.handle_inbound_candidate("a".into(), candidate(2));
        assert_eq!(b.session().unwrap().pending_remote_candidates(), 0);

        b.handle_inbound_answer("a".into(), sdp("answer from a"));
        b.handle_inbound_candidate("a".into(), candidate(3));
        b.handle_engine_event(
            EngineEvent::RemoteDescriptionApplied {
                attempt: live,
                result: Ok(()),
            },
            t(2),
        );
        let applied: Vec<CandidateDescriptor> = b
            .take_commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                Command::ApplyCandidate { candidate, .. } => Some(candidate),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![candidate(3)]);
    }

    #[test]
    fn renegotiation_keeps_the_call() {
        let mut coord = offering("a", "b");
        let a = attempt(&coord);
        coord.handle_inbound_answer("b".into(), sdp("answer"));
        coord.handle_engine_event(
            EngineEvent::RemoteDescriptionApplied {
                attempt: a,
                result: Ok(()),
            },
            t(1),
        );
        coord.handle_engine_event(
            EngineEvent::PathState {
                attempt: a,
                state: PathState::Connected,
            },
            t(2),
        );
        assert_eq!(coord.phase(), CallPhase::Connected);
        coord.take_commands();

        coord.handle_inbound_offer("b".into(), sdp("new offer"), t(3));
        assert_eq!(
            coord.take_commands(),
            vec![Command::ApplyRemoteDescription {
                attempt: a,
                kind: SdpKind::Offer,
                sdp: sdp("new offer")
            }]
        );
        coord.handle_engine_event(
            EngineEvent::RemoteDescriptionApplied {
                attempt: a,
                result: Ok(()),
            },
            t(3),
        );
        coord.handle_engine_event(
            EngineEvent::LocalDescription {
                attempt: a,
                result: Ok(sdp("new answer")),
            },
            t(3),
        );
        let commands = coord.take_commands();
        assert_eq!(
            sent(&commands),
            vec![(
                "b".into(),
                Signal::Answer {
                    sdp: sdp("new answer")
                }
            )]
        );
        assert_eq!(coord.phase(), CallPhase::Connected);
    }

    #[test]
    fn degraded_call_fails_after_window() {
        let mut coord = offering("a", "b");
        let a = attempt(&coord);
        coord.handle_engine_event(
            EngineEvent::PathState {
                attempt: a,
                state: PathState::Connected,
            },
            t(1),
        );
        coord.handle_engine_event(
            EngineEvent::PathState {
                attempt: a,
                state: PathState::Disconnected,
            },
            t(2),
        );
        assert_eq!(coord.phase(), CallPhase::Degraded);
        coord.tick(t(5));
        assert_eq!(coord.phase(), CallPhase::Degraded);
        coord.tick(t(12));
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert_eq!(
            coord.last_termination(),
            Some(&Termination::Failed(CallError::NetworkPathFailed))
        );
        assert_eq!(coord.status(), "Connection lost");
    }

    #[test]
    fn ticks_probe_established_calls() {
        let mut coord = offering("a", "b");
        let a = attempt(&coord);
        coord.handle_engine_event(
            EngineEvent::PathState {
                attempt: a,
                state: PathState::Connected,
            },
            t(1),
        );
        coord.take_commands();
        coord.tick(t(1));
        assert_eq!(
            coord.take_commands(),
            vec![Command::ProbeHealth { attempt: a }]
        );
        coord.tick(t(2));
        assert!(coord.take_commands().is_empty());
    }

    #[test]
    fn unanswered_call_times_out() {
        let mut coord = offering("a", "b");
        coord.tick(t(29));
        assert_eq!(coord.phase(), CallPhase::Negotiating);
        coord.tick(t(30));
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert_eq!(
            coord.last_termination(),
            Some(&Termination::Failed(CallError::NegotiationTimedOut))
        );
    }

    #[test]
    fn remote_hangup_ends_without_echo() {
        let mut coord = offering("a", "b");
        coord.handle_inbound_hangup("b".into(), "declined".to_owned());
        let commands = coord.take_commands();
        assert!(sent(&commands).is_empty());
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert_eq!(coord.status(), "b ended the call (declined)");
    }

    #[test]
    fn relay_outage_holds_signals() {
        let mut coord = online("a", &["b"]);
        coord.start_call("b".into(), t(0)).unwrap();
        let a = attempt(&coord);
        coord.handle_engine_event(
            EngineEvent::MediaAcquired {
                attempt: a,
                result: Ok(MediaStreamHandle(1)),
            },
            t(0),
        );
        coord.relay_lost();
        coord.handle_engine_event(
            EngineEvent::LocalDescription {
                attempt: a,
                result: Ok(sdp("offer")),
            },
            t(1),
        );
        assert!(sent(&coord.take_commands()).is_empty());

        coord.relay_connected("a".into());
        assert_eq!(
            sent(&coord.take_commands()),
            vec![("b".into(), Signal::Offer { sdp: sdp("offer") })]
        );
        assert_eq!(coord.phase(), CallPhase::Negotiating);
    }

    #[test]
    fn new_identity_fails_negotiating_call() {
        let mut coord = offering("a", "b");
        coord.relay_lost();
        coord.relay_connected("a2".into());
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert_eq!(
            coord.last_termination(),
            Some(&Termination::Failed(CallError::RelayUnavailable))
        );
    }

    #[test]
    fn new_identity_discards_signals_held_for_the_old_one() {
        let mut coord = online("a", &["b"]);
        coord.relay_lost();
        coord.start_call("b".into(), t(0)).unwrap();
        let a = attempt(&coord);
        coord.handle_engine_event(
            EngineEvent::MediaAcquired {
                attempt: a,
                result: Ok(MediaStreamHandle(1)),
            },
            t(0),
        );
        coord.handle_engine_event(
            EngineEvent::LocalDescription {
                attempt: a,
                result: Ok(sdp("offer from a")),
            },
            t(0),
        );
        coord.take_commands();

        coord.relay_connected("a2".into());
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert!(sent(&coord.take_commands()).is_empty());
    }

    #[test]
    fn same_identity_flushes_held_signals() {
        let mut coord = online("a", &["b"]);
        coord.relay_lost();
        coord.start_call("b".into(), t(0)).unwrap();
        let a = attempt(&coord);
        coord.handle_engine_event(
            EngineEvent::MediaAcquired {
                attempt: a,
                result: Ok(MediaStreamHandle(1)),
            },
            t(0),
        );
        coord.handle_engine_event(
            EngineEvent::LocalDescription {
                attempt: a,
                result: Ok(sdp("offer from a")),
            },
            t(0),
        );
        coord.take_commands();

        coord.relay_connected("a".into());
        assert_eq!(
            sent(&coord.take_commands()),
            vec![(
                "b".into(),
                Signal::Offer {
                    sdp: sdp("offer from a")
                }
            )]
        );
    }

    #[test]
    fn peer_leaving_before_connect_fails_call() {
        let mut coord = offering("a", "b");
        coord.update_roster(vec!["a".into()]);
        assert_eq!(coord.phase(), CallPhase::Idle);
        assert_eq!(
            coord.last_termination(),
            Some(&Termination::Failed(CallError::PeerLeft("b".into())))
        );
    }

    #[test]
    fn peer_leaving_dismisses_prompt() {
        let mut coord = online("b", &["a"]);
        coord.handle_inbound_offer("a".into(), sdp("offer"), t(0));
        coord.take_commands();
        coord.update_roster(vec!["b".into()]);
        assert!(coord
            .take_commands()
            .contains(&Command::DismissPrompt { from: "a".into() }));
        assert_eq!(coord.incoming_from(), None);
    }

    #[test]
    fn calling_the_ringing_peer_accepts() {
        let mut coord = online("b", &["a"]);
        coord.handle_inbound_offer("a".into(), sdp("offer"), t(0));
        coord.take_commands();
        coord.start_call("a".into(), t(1)).unwrap();
        assert_eq!(coord.role(), Some(Role::Callee));
        assert_eq!(coord.incoming_from(), None);
        assert!(coord
            .take_commands()
            .contains(&Command::DismissPrompt { from: "a".into() }));
    }

    #[test]
    fn undeliverable_offer_fails_fast() {
        let mut coord = offering("a", "b");
        coord.handle_undeliverable("b".into());
        assert_eq!(coord.phase(), CallPhase::Idle);
    }
}
