//! Speech recognition WebSocket endpoint

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chat_relay_core::RelayError;
use futures_util::{future, SinkExt, StreamExt};
use tracing::debug;

use crate::services::audio::{Duplex, Frame};
use crate::state::AppState;
use crate::utils::error::AppError;

pub async fn asr_socket(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let relay = state
        .audio
        .clone()
        .ok_or_else(|| RelayError::precondition("speech recognition is not configured"))?;

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = relay.run(client_duplex(socket)).await {
            debug!(code = e.code(), "Audio session ended: {}", e);
        }
    }))
}

fn client_duplex(socket: WebSocket) -> Duplex {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| RelayError::internal(format!("client write failed: {}", e)))
        .with(|frame: Frame| {
            future::ready(Ok::<_, RelayError>(match frame {
                Frame::Text(text) => WsMessage::Text(text),
                Frame::Binary(bytes) => WsMessage::Binary(bytes),
                Frame::Close => WsMessage::Close(None),
            }))
        });
    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(WsMessage::Text(text)) => Some(Ok(Frame::Text(text))),
            Ok(WsMessage::Binary(bytes)) => Some(Ok(Frame::Binary(bytes))),
            Ok(WsMessage::Close(_)) => Some(Ok(Frame::Close)),
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => None,
            Err(e) => Some(Err(RelayError::internal(format!(
                "client read failed: {}",
                e
            )))),
        })
    });
    Duplex::new(Box::pin(sink), Box::pin(stream))
}
