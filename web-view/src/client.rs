//! The event loop.
//!
//! Owns the coordinator and every browser-side resource. Inputs arrive
//! through the mailbox one at a time, so the coordinator is only ever
//! touched from here.

use call_core::{CallConfig, Command, Coordinator, EngineEvent, PeerId};
use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;
use js_sys::{Array, Object, Reflect};
use proto::{ClientMessage, RelayMessage};
use wasm_bindgen::JsValue;

use crate::mailbox::{Input, Mailbox};
use crate::media::{self, MediaRegistry};
use crate::relay_client::RelayClient;
use crate::rtc::RtcEngine;
use crate::timer;

pub(crate) struct Client {
    coord: Coordinator,
    relay: RelayClient,
    engine: RtcEngine,
    media: MediaRegistry,
    mailbox: Mailbox,
    subscriber: Option<js_sys::Function>,
    /// Peer currently ringing us.
    ringing: Option<PeerId>,
    /// Last rejected user request, cleared by the next one.
    notice: Option<String>,
}

impl Client {
    pub fn new(relay_url: String, config: CallConfig, mailbox: Mailbox) -> Self {
        let relay = RelayClient::new(relay_url, config.relay_retry.clone(), mailbox.clone());
        Self {
            coord: Coordinator::new(config),
            relay,
            engine: RtcEngine::new(mailbox.clone()),
            media: MediaRegistry::default(),
            mailbox,
            subscriber: None,
            ringing: None,
            notice: None,
        }
    }

    pub async fn run(mut self, mut inbox: UnboundedReceiver<Input>) {
        self.relay.connect();
        while let Some(input) = inbox.next().await {
            let publish = !matches!(input, Input::Tick);
            self.handle(input);
            let changed = self.drive();
            if publish || changed {
                self.publish();
            }
        }
        info!("event loop stopped");
    }

    fn handle(&mut self, input: Input) {
        let now = timer::now();
        match input {
            Input::Call(peer) => {
                self.notice = None;
                if let Err(err) = self.coord.start_call(PeerId::new(peer), now) {
                    warn!("cannot start call: {err}");
                    self.notice = Some(err.to_string());
                }
            }
            Input::Accept => {
                self.notice = None;
                self.coord.accept_incoming(now);
            }
            Input::Reject => {
                self.notice = None;
                self.coord.reject_incoming();
            }
            Input::HangUp => {
                self.notice = None;
                self.coord.end_call();
            }
            Input::Subscribe(callback) => self.subscriber = Some(callback),
            Input::Relay { generation, msg } if self.relay.is_current(generation) => {
                self.relay_message(msg, now)
            }
            Input::Relay { generation, .. } => debug!("message from stale relay socket #{generation}"),
            Input::RelayClosed { generation } if self.relay.is_current(generation) => {
                self.coord.relay_lost();
                self.relay.closed();
            }
            Input::RelayClosed { .. } => {}
            Input::Reconnect => self.relay.reconnect(),
            Input::MediaReady { attempt, result } => {
                let result = result.map(|stream| self.media.insert(stream));
                self.coord
                    .handle_engine_event(EngineEvent::MediaAcquired { attempt, result }, now);
            }
            Input::Engine(event) => self.coord.handle_engine_event(event, now),
            Input::Tick => {
                self.coord.tick(now);
                self.relay.keepalive(now);
            }
        }
    }

    fn relay_message(&mut self, msg: RelayMessage, now: chrono::NaiveDateTime) {
        match msg {
            RelayMessage::Welcome { id } => {
                self.relay.welcomed();
                self.coord.relay_connected(id);
            }
            RelayMessage::Roster { peers } => self.coord.update_roster(peers),
            RelayMessage::Signal { from, signal } => self.coord.handle_envelope(from, signal, now),
            RelayMessage::KeepAliveAck { seq } => trace!("keepalive {seq} acknowledged"),
            RelayMessage::Undeliverable { to } => self.coord.handle_undeliverable(to),
        }
    }

    /// Executes everything the coordinator asked for. Returns whether any
    /// command was executed.
    fn drive(&mut self) -> bool {
        let commands = self.coord.take_commands();
        let changed = !commands.is_empty();
        for command in commands {
            self.execute(command);
        }
        changed
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::AcquireMedia { attempt, device_id } => {
                let mailbox = self.mailbox.clone();
                wasm_bindgen_futures::spawn_local(async move {
                    let result = media::acquire_audio(device_id).await;
                    mailbox.post(Input::MediaReady { attempt, result });
                });
            }
            Command::ReleaseMedia { stream } => self.media.release(stream),
            Command::OpenConnection {
                attempt,
                stream,
                ice_servers,
            } => {
                let opened = match self.media.get(stream) {
                    Some(local) => self
                        .engine
                        .open(attempt, local, &ice_servers, self.coord.config().playback_retry.clone())
                        .map_err(|err| format!("{err:?}")),
                    None => Err(format!("unknown stream {stream:?}")),
                };
                if let Err(err) = opened {
                    error!("cannot open connection for attempt {attempt}: {err}");
                    self.mailbox.post(Input::Engine(EngineEvent::PathState {
                        attempt,
                        state: call_core::PathState::Failed,
                    }));
                }
            }
            Command::CreateDescription { attempt, kind } => {
                self.engine.create_description(attempt, kind)
            }
            Command::ApplyRemoteDescription { attempt, kind, sdp } => {
                self.engine.apply_remote_description(attempt, kind, sdp)
            }
            Command::ApplyCandidate { attempt, candidate } => {
                self.engine.apply_candidate(attempt, candidate)
            }
            Command::ProbeHealth { attempt } => self.engine.probe(attempt),
            Command::CloseConnection { attempt } => self.engine.close(attempt),
            Command::Send { to, signal } => {
                let kind = signal.kind();
                if let Err(err) = self.relay.send(&ClientMessage::Signal { signal, to }) {
                    warn!("{kind} not sent: {err}");
                }
            }
            Command::PromptIncoming { from } => self.ringing = Some(from),
            Command::DismissPrompt { from } => {
                if self.ringing.as_ref() == Some(&from) {
                    self.ringing = None;
                }
            }
            Command::ShowStatus(line) => info!("status: {line}"),
        }
    }

    fn publish(&self) {
        let Some(callback) = &self.subscriber else {
            return;
        };
        match self.snapshot() {
            Ok(update) => {
                if let Err(err) = callback.call1(&JsValue::NULL, &update) {
                    warn!("update callback threw: {err:?}");
                }
            }
            Err(err) => error!("cannot build update: {err:?}"),
        }
    }

    /// Plain object handed to the page on every change.
    fn snapshot(&self) -> Result<JsValue, JsValue> {
        let update = Object::new();
        let status = match (&self.notice, self.relay.gave_up()) {
            (Some(notice), _) => notice.clone(),
            (None, true) => "Relay unreachable, reload the page to try again".to_owned(),
            (None, false) => self.coord.status().to_owned(),
        };
        Reflect::set(&update, &"status".into(), &status.into())?;
        Reflect::set(
            &update,
            &"phase".into(),
            &format!("{:?}", self.coord.phase()).to_lowercase().into(),
        )?;
        Reflect::set(&update, &"selfId".into(), &opt_peer(self.coord.self_id()))?;
        Reflect::set(&update, &"ringing".into(), &opt_peer(self.ringing.as_ref()))?;
        Reflect::set(
            &update,
            &"peer".into(),
            &opt_peer(self.coord.session().map(|session| session.peer())),
        )?;
        let peers: Array = self
            .coord
            .roster()
            .iter()
            .map(|peer| JsValue::from_str(peer.as_str()))
            .collect();
        Reflect::set(&update, &"peers".into(), &peers)?;
        Ok(update.into())
    }
}

fn opt_peer(peer: Option<&PeerId>) -> JsValue {
    peer.map_or(JsValue::NULL, |peer| JsValue::from_str(peer.as_str()))
}
