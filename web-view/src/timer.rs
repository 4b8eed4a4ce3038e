use chrono::{Duration, NaiveDateTime};
use gloo_timers::future::TimeoutFuture;

use crate::mailbox::{Input, Mailbox};

/// How often the event loop gets a `Tick`.
const TICK_MS: u32 = 1_000;

/// Upper bound of the random delay added on top of every backoff.
const MAX_JITTER_MS: f64 = 50.0;

pub(crate) fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Waits for `delay` plus a little random jitter.
pub(crate) async fn backoff(delay: Duration) {
    let millis = delay.num_milliseconds().clamp(0, u32::MAX as i64) as u32;
    let jitter = (js_sys::Math::random() * MAX_JITTER_MS) as u32;
    TimeoutFuture::new(millis.saturating_add(jitter)).await;
}

/// Posts a `Tick` every second, until the event loop is gone.
pub(crate) fn spawn_ticker(mailbox: Mailbox) {
    wasm_bindgen_futures::spawn_local(async move {
        while !mailbox.is_closed() {
            TimeoutFuture::new(TICK_MS).await;
            mailbox.post(Input::Tick);
        }
    });
}
