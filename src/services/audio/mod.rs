//! Audio Relay
//!
//! Bridges a client audio WebSocket to a downstream speech recognizer.
//! Both sockets are seen through [`Duplex`], so the session logic does not
//! depend on which WebSocket implementation sits underneath.

pub mod session;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chat_relay_core::{RelayError, RelayResult};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::info;

use crate::models::settings::AsrConfig;

pub use session::{AudioRelay, SessionState, BEGIN_UTTERANCE, END_UTTERANCE};

/// A WebSocket frame, stripped of ping/pong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = RelayError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = RelayResult<Frame>> + Send>>;

/// Both halves of one socket.
pub struct Duplex {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Duplex {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Duplex")
    }
}

/// Opens connections to the speech recognizer.
#[async_trait]
pub trait AsrConnector: Send + Sync {
    async fn connect(&self) -> RelayResult<Duplex>;
}

/// Session tunables.
#[derive(Debug, Clone)]
pub struct AsrSettings {
    pub init_payload: String,
    pub stop_payload: String,
    pub write_timeout: Duration,
    pub final_field: String,
}

impl From<&AsrConfig> for AsrSettings {
    fn from(config: &AsrConfig) -> Self {
        Self {
            init_payload: config.init_payload.clone(),
            stop_payload: config.stop_payload.clone(),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            final_field: config.final_field.clone(),
        }
    }
}

/// Connector for a recognizer speaking plain WebSocket.
#[derive(Debug, Clone)]
pub struct TungsteniteAsrConnector {
    url: String,
    connect_timeout: Duration,
}

impl TungsteniteAsrConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn from_config(config: &AsrConfig) -> Option<Self> {
        config.url.as_ref().map(|url| {
            Self::new(
                url.clone(),
                Duration::from_millis(config.connect_timeout_ms),
            )
        })
    }
}

#[async_trait]
impl AsrConnector for TungsteniteAsrConnector {
    async fn connect(&self) -> RelayResult<Duplex> {
        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(&self.url))
                .await
                .map_err(|_| RelayError::backend("speech recognizer connect timed out"))?
                .map_err(|e| RelayError::backend(format!("speech recognizer unreachable: {}", e)))?;
        info!(url = %self.url, "[Audio] recognizer connected");

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| RelayError::backend(format!("recognizer write failed: {}", e)))
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
                Ok(_) => None,
                Err(e) => Some(Err(RelayError::backend(format!(
                    "recognizer read failed: {}",
                    e
                )))),
            })
        });
        Ok(Duplex::new(Box::pin(sink), Box::pin(stream)))
    }
}
