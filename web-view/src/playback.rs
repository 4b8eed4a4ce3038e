use call_core::RetryPolicy;
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;
use web_sys::{HtmlAudioElement, MediaStream};

use crate::timer;

/// Remote audio output of one connection.
#[derive(Clone)]
pub(crate) struct RemoteAudio {
    element: HtmlAudioElement,
}

impl RemoteAudio {
    pub fn new() -> Result<Self, JsValue> {
        let element = HtmlAudioElement::new()?;
        element.set_autoplay(true);
        Ok(Self { element })
    }

    /// Attaches `stream` and starts playing it, in the background.
    ///
    /// Browsers may refuse to start playback (autoplay policies, the element
    /// not being ready yet), so starting is retried under `policy` and then
    /// given up.
    pub fn play(&self, stream: &MediaStream, policy: RetryPolicy) {
        self.element.set_src_object(Some(stream));
        let element = self.element.clone();
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(err) = play_with_retry(&element, &policy).await {
                error!("remote audio does not play: {err:?}");
            }
        });
    }

    pub fn stop(&self) {
        if let Err(err) = self.element.pause() {
            debug!("pausing remote audio failed: {err:?}");
        }
        self.element.set_src_object(None);
    }
}

async fn play_with_retry(element: &HtmlAudioElement, policy: &RetryPolicy) -> Result<(), JsValue> {
    let mut last_err = JsValue::from_str("playback was never attempted");
    let mut attempt = 0;
    while let Some(delay) = policy.delay_before(attempt) {
        if attempt > 0 {
            timer::backoff(delay).await;
        }
        if element.src_object().is_none() {
            debug!("remote audio detached, not starting playback");
            return Ok(());
        }
        match element.play() {
            Ok(promise) => match JsFuture::from(promise).await {
                Ok(_) => {
                    debug!("remote audio playing after {} attempts", attempt + 1);
                    return Ok(());
                }
                Err(err) => last_err = err,
            },
            Err(err) => last_err = err,
        }
        warn!("starting remote audio failed (attempt {})", attempt + 1);
        attempt += 1;
    }
    Err(last_err)
}
