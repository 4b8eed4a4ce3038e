use std::rc::Rc;

use wasm_bindgen::prelude::*;
use web_sys::{BinaryType, ErrorEvent, MessageEvent, WebSocket};

pub(crate) struct WebSocketWrapper {
    ws: WebSocket,
    /// closure called on each message
    ///
    /// must be stored here to give it a lifetime tied to the connection
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    /// closure called on error events of the underlying web socket
    _onerror: Closure<dyn FnMut(ErrorEvent)>,
}

impl WebSocketWrapper {
    /// Opens a binary socket. `onmessage` receives every binary frame.
    pub fn open(url: &str, mut onmessage: impl FnMut(Vec<u8>) + 'static) -> Result<Self, JsValue> {
        let ws = WebSocket::new(url)?;
        ws.set_binary_type(BinaryType::Arraybuffer);

        let onmessage = Closure::<dyn FnMut(_)>::new(move |e: MessageEvent| {
            if let Ok(abuf) = e.data().dyn_into::<js_sys::ArrayBuffer>() {
                onmessage(js_sys::Uint8Array::new(&abuf).to_vec());
            } else if let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() {
                warn!("unexpectedly received string: {txt}");
            } else {
                warn!("unexpectedly received a non-binary frame");
            }
        });
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        // the close event that follows carries no details, log them here
        let onerror = Closure::<dyn FnMut(_)>::new(move |e: ErrorEvent| {
            warn!("relay socket error: {}", e.message());
        });
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        Ok(WebSocketWrapper {
            ws,
            _onmessage: onmessage,
            _onerror: onerror,
        })
    }

    pub fn send(&self, msg: &[u8]) -> Result<(), JsValue> {
        self.ws.send_with_u8_array(msg)
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::try_from(self.ws.ready_state()).unwrap_or(ReadyState::Closed)
    }

    pub fn state_change(&self) -> ReadyStateChange {
        ReadyStateChange::new(self.ws.clone())
    }
}

impl Drop for WebSocketWrapper {
    fn drop(&mut self) {
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        if let Err(err) = self.ws.close() {
            debug!("closing relay socket failed: {err:?}");
        }
    }
}

/// Resolves on each ready state transition of a socket.
pub(crate) struct ReadyStateChange {
    ws: WebSocket,
    current_state: Option<ReadyState>,
    waker_fn: Option<Rc<Closure<dyn FnMut()>>>,
}

impl ReadyStateChange {
    fn new(ws: WebSocket) -> Self {
        ReadyStateChange {
            current_state: None,
            waker_fn: None,
            ws,
        }
    }

    /// Syntactic sugar to replace `(&mut future).await` with `future.next().await`
    pub fn next(&mut self) -> &mut Self {
        self
    }
}

impl std::future::Future for &mut ReadyStateChange {
    type Output = ReadyState;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let new_state = ReadyState::try_from(self.ws.ready_state()).unwrap_or(ReadyState::Closed);
        if self.current_state == Some(new_state) {
            let waker = cx.waker().clone();
            let callback = Rc::clone(self.waker_fn.get_or_insert_with(|| {
                Rc::new(Closure::<dyn FnMut()>::new(move || waker.wake_by_ref()))
            }));
            let callback = callback.as_ref().as_ref().unchecked_ref();
            match new_state {
                ReadyState::Connecting => {
                    // a socket that never opens goes straight to closed
                    self.ws.set_onopen(Some(callback));
                    self.ws.set_onclose(Some(callback));
                }
                ReadyState::Open | ReadyState::Closing => {
                    self.ws.set_onclose(Some(callback));
                }
                ReadyState::Closed => {
                    // ain't gonna change from here
                    return std::task::Poll::Ready(new_state);
                }
            }
            std::task::Poll::Pending
        } else {
            self.current_state = Some(new_state);
            std::task::Poll::Ready(new_state)
        }
    }
}

impl Drop for ReadyStateChange {
    fn drop(&mut self) {
        if self.waker_fn.is_some() {
            self.ws.set_onopen(None);
            self.ws.set_onclose(None);
        }
    }
}

#[repr(u16)]
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum ReadyState {
    /// Socket has been created. The connection is not yet open.
    Connecting = 0,
    /// The connection is open and ready to communicate.
    Open = 1,
    /// The connection is in the process of closing.
    Closing = 2,
    /// The connection is closed or couldn't be opened.
    Closed = 3,
}

impl TryFrom<u16> for ReadyState {
    type Error = u16;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Connecting),
            1 => Ok(Self::Open),
            2 => Ok(Self::Closing),
            3 => Ok(Self::Closed),
            other => Err(other),
        }
    }
}
