//! Browser side of the peer connection.
//!
//! Executes the core's connection commands on `RtcPeerConnection`s and
//! reports results back through the mailbox, tagged with the attempt they
//! belong to. Results for connections that have been closed in the meantime
//! are still posted, the core drops them.

use std::collections::HashMap;

use call_core::{
    AttemptId, CandidateDescriptor, EngineEvent, PathState, RetryPolicy, SdpKind,
    SessionDescription,
};
use js_sys::{Array, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    MediaStream, MediaStreamTrack, RtcConfiguration, RtcIceCandidateInit, RtcIceConnectionState,
    RtcPeerConnection, RtcPeerConnectionIceEvent, RtcSdpType, RtcSessionDescriptionInit,
    RtcTrackEvent,
};

use crate::mailbox::{Input, Mailbox};
use crate::playback::RemoteAudio;

pub(crate) struct RtcEngine {
    mailbox: Mailbox,
    connections: HashMap<AttemptId, Connection>,
    /// closure to re-use
    on_err_add_ice_candidate: Closure<dyn FnMut(JsValue)>,
}

struct Connection {
    peer: RtcPeerConnection,
    audio: RemoteAudio,
    // closures to keep alive
    _on_ice: Closure<dyn FnMut(RtcPeerConnectionIceEvent)>,
    _on_state: Closure<dyn FnMut()>,
    _on_track: Closure<dyn FnMut(RtcTrackEvent)>,
}

impl RtcEngine {
    pub fn new(mailbox: Mailbox) -> Self {
        let on_err_add_ice_candidate = Closure::new(move |err| {
            warn!("adding remote candidate produced an error {err:?}");
        });
        Self {
            mailbox,
            connections: HashMap::new(),
            on_err_add_ice_candidate,
        }
    }

    /// Creates the connection for `attempt` and attaches the local tracks.
    pub fn open(
        &mut self,
        attempt: AttemptId,
        stream: &MediaStream,
        ice_servers: &[String],
        playback: RetryPolicy,
    ) -> Result<(), JsValue> {
        let peer = RtcPeerConnection::new_with_configuration(&rtc_config(ice_servers)?)?;
        for track in stream.get_audio_tracks().iter() {
            let track: MediaStreamTrack = track.dyn_into()?;
            peer.add_track_0(&track, stream);
        }

        let on_ice = ice_candidate_trickling_callback(attempt, self.mailbox.clone());
        peer.set_onicecandidate(Some(on_ice.as_ref().unchecked_ref()));

        let on_state = {
            let mailbox = self.mailbox.clone();
            let peer = peer.clone();
            Closure::<dyn FnMut()>::new(move || {
                let ice = peer.ice_connection_state();
                debug!("attempt {attempt}: ice connection {ice:?}");
                if let Some(state) = path_state(ice) {
                    mailbox.post(Input::Engine(EngineEvent::PathState { attempt, state }));
                }
            })
        };
        peer.set_oniceconnectionstatechange(Some(on_state.as_ref().unchecked_ref()));

        let audio = RemoteAudio::new()?;
        let on_track = {
            let audio_element = audio.clone();
            Closure::<dyn FnMut(_)>::new(move |ev: RtcTrackEvent| {
                match ev.streams().get(0).dyn_into::<MediaStream>() {
                    Ok(remote) => audio_element.play(&remote, playback.clone()),
                    Err(_) => warn!("attempt {attempt}: remote track without a stream"),
                }
            })
        };
        peer.set_ontrack(Some(on_track.as_ref().unchecked_ref()));

        let previous = self.connections.insert(
            attempt,
            Connection {
                peer,
                audio,
                _on_ice: on_ice,
                _on_state: on_state,
                _on_track: on_track,
            },
        );
        if let Some(previous) = previous {
            warn!("attempt {attempt} opened twice");
            previous.close();
        }
        Ok(())
    }

    /// Creates and applies a local description, reports it as
    /// `LocalDescription`.
    pub fn create_description(&self, attempt: AttemptId, kind: SdpKind) {
        let Some(peer) = self.peer(attempt) else {
            self.post_description(attempt, Err("no connection".to_owned()));
            return;
        };
        let mailbox = self.mailbox.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let result = create_local_description(peer, kind)
                .await
                .map(SessionDescription::new)
                .map_err(|err| format!("{err:?}"));
            mailbox.post(Input::Engine(EngineEvent::LocalDescription { attempt, result }));
        });
    }

    pub fn apply_remote_description(&self, attempt: AttemptId, kind: SdpKind, sdp: SessionDescription) {
        let Some(peer) = self.peer(attempt) else {
            self.post_applied(attempt, Err("no connection".to_owned()));
            return;
        };
        let mailbox = self.mailbox.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let init = RtcSessionDescriptionInit::new(sdp_type(kind));
            init.set_sdp(sdp.as_str());
            let result = JsFuture::from(peer.set_remote_description(&init))
                .await
                .map(|_| ())
                .map_err(|err| format!("{err:?}"));
            mailbox.post(Input::Engine(EngineEvent::RemoteDescriptionApplied { attempt, result }));
        });
    }

    pub fn apply_candidate(&self, attempt: AttemptId, candidate: CandidateDescriptor) {
        let Some(peer) = self.peer(attempt) else {
            debug!("candidate for closed attempt {attempt}");
            return;
        };
        let init = RtcIceCandidateInit::new(&candidate.candidate);
        init.set_sdp_m_line_index(Some(candidate.sdp_m_line_index));
        init.set_sdp_mid(Some(&candidate.sdp_mid));
        let _promise = peer
            .add_ice_candidate_with_opt_rtc_ice_candidate_init(Some(&init))
            .catch(&self.on_err_add_ice_candidate);
    }

    pub fn probe(&self, attempt: AttemptId) {
        let Some(peer) = self.peer(attempt) else {
            return;
        };
        match path_state(peer.ice_connection_state()) {
            Some(state) => self
                .mailbox
                .post(Input::Engine(EngineEvent::PathState { attempt, state })),
            None => trace!("attempt {attempt}: no path state yet"),
        }
    }

    pub fn close(&mut self, attempt: AttemptId) {
        match self.connections.remove(&attempt) {
            Some(connection) => connection.close(),
            None => debug!("attempt {attempt} has no open connection"),
        }
    }

    fn peer(&self, attempt: AttemptId) -> Option<RtcPeerConnection> {
        self.connections.get(&attempt).map(|c| c.peer.clone())
    }

    fn post_description(&self, attempt: AttemptId, result: Result<SessionDescription, String>) {
        self.mailbox
            .post(Input::Engine(EngineEvent::LocalDescription { attempt, result }));
    }

    fn post_applied(&self, attempt: AttemptId, result: Result<(), String>) {
        self.mailbox
            .post(Input::Engine(EngineEvent::RemoteDescriptionApplied { attempt, result }));
    }
}

impl Connection {
    fn close(self) {
        // unhook first, the closures are freed when `self` is dropped
        self.peer.set_onicecandidate(None);
        self.peer.set_oniceconnectionstatechange(None);
        self.peer.set_ontrack(None);
        self.peer.close();
        self.audio.stop();
    }
}

fn rtc_config(ice_servers: &[String]) -> Result<RtcConfiguration, JsValue> {
    let servers = Array::new();
    for url in ice_servers {
        let server = Object::new();
        Reflect::set(&server, &"urls".into(), &url.into())?;
        servers.push(&server);
    }
    let config = RtcConfiguration::new();
    config.set_ice_servers(&servers);
    Ok(config)
}

fn sdp_type(kind: SdpKind) -> RtcSdpType {
    match kind {
        SdpKind::Offer => RtcSdpType::Offer,
        SdpKind::Answer => RtcSdpType::Answer,
    }
}

async fn create_local_description(peer: RtcPeerConnection, kind: SdpKind) -> Result<String, JsValue> {
    let promise = match kind {
        SdpKind::Offer => peer.create_offer(),
        SdpKind::Answer => peer.create_answer(),
    };
    let description = JsFuture::from(promise).await?;
    let sdp = Reflect::get(&description, &JsValue::from_str("sdp"))?
        .as_string()
        .ok_or_else(|| JsValue::from_str("description without sdp"))?;

    let init = RtcSessionDescriptionInit::new(sdp_type(kind));
    init.set_sdp(&sdp);
    JsFuture::from(peer.set_local_description(&init)).await?;
    Ok(sdp)
}

fn path_state(ice: RtcIceConnectionState) -> Option<PathState> {
    match ice {
        RtcIceConnectionState::Connected | RtcIceConnectionState::Completed => {
            Some(PathState::Connected)
        }
        RtcIceConnectionState::Disconnected => Some(PathState::Disconnected),
        RtcIceConnectionState::Failed | RtcIceConnectionState::Closed => Some(PathState::Failed),
        _ => None,
    }
}

fn ice_candidate_trickling_callback(
    attempt: AttemptId,
    mailbox: Mailbox,
) -> Closure<dyn FnMut(RtcPeerConnectionIceEvent)> {
    Closure::<dyn FnMut(_)>::new(move |ev: RtcPeerConnectionIceEvent| {
        // `None` marks the end of gathering
        let Some(candidate) = ev.candidate() else {
            debug!("attempt {attempt}: candidate gathering complete");
            return;
        };
        let candidate_string = candidate.candidate();
        if candidate_string.is_empty() {
            return;
        }
        let candidate = CandidateDescriptor {
            candidate: candidate_string,
            sdp_m_line_index: candidate.sdp_m_line_index().unwrap_or(0),
            sdp_mid: candidate.sdp_mid().unwrap_or_default(),
        };
        mailbox.post(Input::Engine(EngineEvent::LocalCandidate { attempt, candidate }));
    })
}
