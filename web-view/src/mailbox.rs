use call_core::{AttemptId, EngineEvent, MediaError};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use proto::RelayMessage;
use web_sys::MediaStream;

/// Everything the event loop reacts to. Browser callbacks and the JS API
/// only ever post one of these.
pub(crate) enum Input {
    Call(String),
    Accept,
    Reject,
    HangUp,
    Subscribe(js_sys::Function),
    Relay { generation: u64, msg: RelayMessage },
    RelayClosed { generation: u64 },
    Reconnect,
    MediaReady {
        attempt: AttemptId,
        result: Result<MediaStream, MediaError>,
    },
    Engine(EngineEvent),
    Tick,
}

#[derive(Clone)]
pub(crate) struct Mailbox(UnboundedSender<Input>);

impl Mailbox {
    pub fn new() -> (Self, UnboundedReceiver<Input>) {
        let (tx, rx) = futures_channel::mpsc::unbounded();
        (Self(tx), rx)
    }

    pub fn post(&self, input: Input) {
        if self.0.unbounded_send(input).is_err() {
            warn!("event loop is gone, dropping input");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}
