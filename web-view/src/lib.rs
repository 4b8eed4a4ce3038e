//! Browser client for one-to-one audio calls.
//!
//! The page calls [`start`] once and then drives calls through the other
//! exported functions. State changes are reported to the callback registered
//! with [`on_update`] as a plain object
//! `{status, phase, selfId, peer, ringing, peers}`.

#[macro_use]
extern crate log;

use std::cell::RefCell;

use call_core::CallConfig;
use log::LevelFilter;
use wasm_bindgen::prelude::*;

use crate::client::Client;
use crate::mailbox::{Input, Mailbox};

mod client;
mod logger;
mod mailbox;
mod media;
mod playback;
mod relay_client;
mod rtc;
mod timer;
mod ws;

thread_local! {
    static MAILBOX: RefCell<Option<Mailbox>> = RefCell::new(None);
}

/// Connects to the relay at `relay_url` and starts the event loop.
///
/// `device_id` selects the audio input, `None` lets the browser decide.
#[wasm_bindgen]
pub fn start(relay_url: String, device_id: Option<String>) -> Result<(), JsValue> {
    logger::init(LevelFilter::Debug);

    if MAILBOX.with(|mailbox| mailbox.borrow().is_some()) {
        return Err(JsValue::from_str("already started"));
    }
    let config = CallConfig::default().with_input_device(device_id);
    let (mailbox, inbox) = Mailbox::new();
    let client = Client::new(relay_url, config, mailbox.clone());
    wasm_bindgen_futures::spawn_local(client.run(inbox));
    timer::spawn_ticker(mailbox.clone());
    MAILBOX.with(|slot| *slot.borrow_mut() = Some(mailbox));
    info!("call client started");
    Ok(())
}

/// Calls `peer`. Calling the peer that is currently ringing accepts it.
#[wasm_bindgen]
pub fn call(peer: String) -> Result<(), JsValue> {
    post(Input::Call(peer))
}

#[wasm_bindgen]
pub fn accept() -> Result<(), JsValue> {
    post(Input::Accept)
}

#[wasm_bindgen]
pub fn reject() -> Result<(), JsValue> {
    post(Input::Reject)
}

/// Ends the current call, or rejects a ringing one. Harmless when idle.
#[wasm_bindgen]
pub fn hang_up() -> Result<(), JsValue> {
    post(Input::HangUp)
}

/// Registers the state change callback, replacing the previous one.
#[wasm_bindgen]
pub fn on_update(callback: js_sys::Function) -> Result<(), JsValue> {
    post(Input::Subscribe(callback))
}

fn post(input: Input) -> Result<(), JsValue> {
    MAILBOX.with(|mailbox| match mailbox.borrow().as_ref() {
        Some(mailbox) => {
            mailbox.post(input);
            Ok(())
        }
        None => Err(JsValue::from_str("call client not started")),
    })
}
