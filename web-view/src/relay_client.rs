use call_core::RetryPolicy;
use chrono::{Duration, NaiveDateTime};
use proto::{ClientMessage, RelayMessage};

use crate::mailbox::{Input, Mailbox};
use crate::timer;
use crate::ws::{ReadyState, WebSocketWrapper};

const KEEPALIVE_INTERVAL: Duration = Duration::milliseconds(15_000);

/// Connection to the relay directory.
///
/// Every socket gets a generation number. Frames and close notifications of
/// an older socket are recognized by it and ignored.
pub(crate) struct RelayClient {
    url: String,
    mailbox: Mailbox,
    policy: RetryPolicy,
    socket: Option<WebSocketWrapper>,
    generation: u64,
    /// Connection attempts since the last `Welcome`.
    failures: u32,
    gave_up: bool,
    keepalive_seq: u64,
    last_keepalive: Option<NaiveDateTime>,
}

impl RelayClient {
    pub fn new(url: String, policy: RetryPolicy, mailbox: Mailbox) -> Self {
        Self {
            url,
            mailbox,
            policy,
            socket: None,
            generation: 0,
            failures: 0,
            gave_up: false,
            keepalive_seq: 0,
            last_keepalive: None,
        }
    }

    pub fn connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        info!("connecting to relay at {} (#{generation})", self.url);

        let mailbox = self.mailbox.clone();
        let socket = WebSocketWrapper::open(&self.url, move |bytes| {
            match RelayMessage::decode(&bytes) {
                Ok(msg) => mailbox.post(Input::Relay { generation, msg }),
                Err(err) => warn!("unparsable relay message: {err}"),
            }
        });
        match socket {
            Ok(socket) => {
                self.watch(&socket, generation);
                self.socket = Some(socket);
            }
            Err(err) => {
                warn!("cannot open relay socket: {err:?}");
                self.mailbox.post(Input::RelayClosed { generation });
            }
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    /// The relay accepted us.
    pub fn welcomed(&mut self) {
        self.failures = 0;
        self.gave_up = false;
        self.last_keepalive = None;
    }

    /// The current socket closed. Schedules the next attempt.
    pub fn closed(&mut self) {
        self.socket = None;
        self.failures += 1;
        match self.policy.delay_before(self.failures) {
            Some(delay) => {
                debug!("reconnecting to relay in {}ms", delay.num_milliseconds());
                let mailbox = self.mailbox.clone();
                wasm_bindgen_futures::spawn_local(async move {
                    timer::backoff(delay).await;
                    mailbox.post(Input::Reconnect);
                });
            }
            None => {
                error!("relay unreachable after {} attempts, giving up", self.failures);
                self.gave_up = true;
            }
        }
    }

    pub fn reconnect(&mut self) {
        if self.socket.is_some() {
            return;
        }
        self.connect();
    }

    pub fn send(&self, msg: &ClientMessage) -> Result<(), String> {
        let socket = self
            .socket
            .as_ref()
            .filter(|socket| socket.ready_state() == ReadyState::Open)
            .ok_or_else(|| "relay socket is not open".to_owned())?;
        let bytes = msg.encode().map_err(|err| err.to_string())?;
        socket.send(&bytes).map_err(|err| format!("{err:?}"))
    }

    /// Sends a keepalive if one is due.
    pub fn keepalive(&mut self, now: NaiveDateTime) {
        let due = self
            .last_keepalive
            .map_or(true, |last| now - last >= KEEPALIVE_INTERVAL);
        if !due || self.socket.is_none() {
            return;
        }
        self.keepalive_seq += 1;
        let seq = self.keepalive_seq;
        match self.send(&ClientMessage::KeepAlive { seq }) {
            Ok(()) => self.last_keepalive = Some(now),
            Err(err) => debug!("keepalive {seq} not sent: {err}"),
        }
    }

    fn watch(&self, socket: &WebSocketWrapper, generation: u64) {
        let mut change = socket.state_change();
        let mailbox = self.mailbox.clone();
        wasm_bindgen_futures::spawn_local(async move {
            loop {
                match change.next().await {
                    ReadyState::Closed => {
                        mailbox.post(Input::RelayClosed { generation });
                        return;
                    }
                    state => debug!("relay socket #{generation} is {state:?}"),
                }
            }
        });
    }
}
