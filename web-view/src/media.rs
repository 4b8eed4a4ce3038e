//! Microphone capture.

use std::collections::HashMap;

use call_core::{MediaError, MediaStreamHandle};
use js_sys::{Object, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{DomException, MediaStream, MediaStreamConstraints, MediaStreamTrack};

/// Asks the browser for an audio input stream.
pub(crate) async fn acquire_audio(device_id: Option<String>) -> Result<MediaStream, MediaError> {
    let promise = request(device_id.as_deref()).map_err(|err| classify_js(&err))?;
    let stream = JsFuture::from(promise).await.map_err(|err| classify_js(&err))?;
    stream
        .dyn_into::<MediaStream>()
        .map_err(|_| MediaError::Other("getUserMedia did not return a stream".to_owned()))
}

fn request(device_id: Option<&str>) -> Result<js_sys::Promise, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let devices = window.navigator().media_devices()?;

    let constraints = MediaStreamConstraints::new();
    match device_id {
        Some(id) => {
            let exact = Object::new();
            Reflect::set(&exact, &"exact".into(), &id.into())?;
            let audio = Object::new();
            Reflect::set(&audio, &"deviceId".into(), &exact)?;
            constraints.set_audio(&audio);
        }
        None => constraints.set_audio(&JsValue::TRUE),
    }
    constraints.set_video(&JsValue::FALSE);
    devices.get_user_media_with_constraints(&constraints)
}

fn classify_js(err: &JsValue) -> MediaError {
    match err.dyn_ref::<DomException>() {
        Some(exception) => classify(&exception.name(), &exception.message()),
        None => MediaError::Other(format!("{err:?}")),
    }
}

fn classify(name: &str, message: &str) -> MediaError {
    match name {
        "NotAllowedError" | "SecurityError" => MediaError::PermissionDenied,
        "NotFoundError" | "OverconstrainedError" => MediaError::NotFound,
        _ if message.is_empty() => MediaError::Other(name.to_owned()),
        _ => MediaError::Other(format!("{name}: {message}")),
    }
}

/// Streams captured for the core, addressed by handle.
#[derive(Default)]
pub(crate) struct MediaRegistry {
    streams: HashMap<MediaStreamHandle, MediaStream>,
    last: u64,
}

impl MediaRegistry {
    pub fn insert(&mut self, stream: MediaStream) -> MediaStreamHandle {
        self.last += 1;
        let handle = MediaStreamHandle(self.last);
        self.streams.insert(handle, stream);
        handle
    }

    pub fn get(&self, handle: MediaStreamHandle) -> Option<&MediaStream> {
        self.streams.get(&handle)
    }

    /// Stops every track so the browser drops its recording indicator.
    pub fn release(&mut self, handle: MediaStreamHandle) {
        match self.streams.remove(&handle) {
            Some(stream) => stop_tracks(&stream),
            None => debug!("stream {handle:?} already released"),
        }
    }
}

pub(crate) fn stop_tracks(stream: &MediaStream) {
    for track in stream.get_tracks().iter() {
        if let Ok(track) = track.dyn_into::<MediaStreamTrack>() {
            track.stop();
        }
    }
}
