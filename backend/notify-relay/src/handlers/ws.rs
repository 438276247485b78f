/// WebSocket upgrade endpoint
///
/// Adapts actix-ws to the session's transport-neutral frame types and hands
/// the connection to a new `Session` on the current worker.
use crate::state::AppState;
use crate::websocket::{FrameSink, InboundFrame, TransportError};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::debug;

/// GET /ws
pub async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (response, ws_session, msg_stream) = actix_ws::handle(&req, body)?;

    let session = state.new_session();
    debug!(
        session_id = %session.id(),
        peer = ?req.peer_addr(),
        "websocket upgraded"
    );

    let inbound = msg_stream.map(|msg| msg.map(inbound_frame));

    // actix-ws streams are bound to the worker thread
    actix_web::rt::spawn(session.run(inbound, WsSink(ws_session)));

    Ok(response)
}

fn inbound_frame(msg: Message) -> InboundFrame {
    match msg {
        Message::Text(text) => InboundFrame::Text(text.to_string()),
        Message::Binary(bytes) => InboundFrame::Binary(bytes),
        Message::Ping(payload) => InboundFrame::Ping(payload),
        Message::Close(_) => InboundFrame::Close,
        _ => InboundFrame::Other,
    }
}

/// Write half of an actix-ws connection
struct WsSink(actix_ws::Session);

#[async_trait]
impl FrameSink for WsSink {
    async fn write_text(&mut self, text: String) -> Result<(), TransportError> {
        self.0.text(text).await.map_err(|_| TransportError)
    }

    async fn write_binary(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        self.0.binary(bytes).await.map_err(|_| TransportError)
    }

    async fn write_pong(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.0.pong(&payload).await.map_err(|_| TransportError)
    }

    async fn shutdown(&mut self) {
        let _ = self.0.clone().close(None).await;
    }
}
