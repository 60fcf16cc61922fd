//! WebSocket upgrade handler (spec §4.F, §4.G)
//!
//! Grounded on `ws/handler.rs::ws_handler`/`handle_socket`/`run_session`
//! directly — same split-sink writer-task shape — with the teacher's JWT
//! gate removed (spec names no admin-auth scheme) and the per-match
//! `broadcast::Receiver` swapped for the per-client `mpsc::Receiver` that
//! `WsServer::register` hands back.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock;
use crate::router::Router;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(router): State<Arc<Router>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, router))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, router: Arc<Router>) {
    let Some(rx) = router.ws_connect(addr, clock::now_ms()) else {
        warn!(%addr, "WS handshake refused, client table full");
        return;
    };
    info!(%addr, "WS client connected");

    let (mut sink, mut stream) = socket.split();

    let mut rx = rx;
    let writer_addr = addr;
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                debug!(%writer_addr, "WS send failed, closing writer");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                router.ws_text(addr, &text, clock::now_ms()).await;
            }
            Ok(Message::Pong(_)) => {
                router.ws_touch(addr, clock::now_ms());
            }
            Ok(Message::Ping(_)) | Ok(Message::Binary(_)) => {}
            Ok(Message::Close(_)) => {
                info!(%addr, "WS client closed");
                break;
            }
            Err(e) => {
                warn!(%addr, error = %e, "WS read error");
                break;
            }
        }
    }

    router.ws_disconnect(addr);
    writer.abort();
}
