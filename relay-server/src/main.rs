use std::{ops::ControlFlow, sync::Arc};

use axum::{
    extract::{
        ws::{Message as WsMsg, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use proto::{ClientMessage, PeerId, RelayMessage};
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::directory::Directory;

#[macro_use]
extern crate log;

mod config;
mod directory;
mod names;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            std::process::exit(2);
        }
    };

    let app = Router::new()
        .route("/ws", get(handler))
        .with_state(Arc::new(Directory::new(config.roster_limit)));

    let addr = config.socket_addr();
    info!("starting relay on {addr}, at most {} peers", config.roster_limit);
    debug!("DEBUG is enabled");
    trace!("TRACE is enabled");

    let server = match axum::Server::try_bind(&addr) {
        Ok(builder) => builder.serve(app.into_make_service()),
        Err(err) => {
            error!("cannot listen on {addr}: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = server.await {
        error!("relay stopped: {err}");
        std::process::exit(1);
    }
}

async fn handler(ws: WebSocketUpgrade, State(directory): State<Arc<Directory>>) -> Response {
    debug!("receiving upgradable socket");
    ws.on_upgrade(move |socket| handle_socket(socket, directory))
}

async fn handle_socket(socket: WebSocket, directory: Arc<Directory>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayMessage>();

    let Some(id) = directory.admit(tx) else {
        let _ = ws_tx.send(WsMsg::Close(None)).await;
        return;
    };

    // one writer per socket, fed by the directory
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let bytes = match msg.encode() {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!("dropping outgoing message: {err}");
                    continue;
                }
            };
            if ws_tx.send(WsMsg::Binary(bytes)).await.is_err() {
                debug!("tx client disconnected");
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        if let ControlFlow::Break(()) = handle_ws_msg(msg, &directory, &id) {
            break;
        }
    }
    directory.leave(&id);
    writer.abort();
}

fn handle_ws_msg(
    msg: Result<WsMsg, axum::Error>,
    directory: &Directory,
    id: &PeerId,
) -> ControlFlow<()> {
    match msg {
        Ok(WsMsg::Binary(binary)) => match ClientMessage::decode(&binary) {
            Ok(ClientMessage::Signal { signal, to }) => directory.forward(id, to, signal),
            Ok(ClientMessage::KeepAlive { seq }) => {
                trace!("keepalive {seq} from {id}");
                directory.send(id, RelayMessage::KeepAliveAck { seq });
            }
            Err(err) => warn!("invalid binary WS message from {id}: {err}"),
        },
        Ok(WsMsg::Close(_)) => {
            debug!("{id} closed the connection");
            return ControlFlow::Break(());
        }
        Ok(WsMsg::Text(txt)) => {
            warn!("invalid WS message type received from {id}: `{txt}`");
        }
        // answered by the websocket layer
        Ok(WsMsg::Ping(_)) | Ok(WsMsg::Pong(_)) => {}
        Err(_) => {
            debug!("rx client {id} disconnected");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}
