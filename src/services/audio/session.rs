//! Audio Relay Session
//!
//! One session per client socket:
//!
//! ```text
//! Idle --token--> Authenticated --0x00--> Streaming --final result--> Closed
//! ```
//!
//! The read loop consumes client frames on the caller's task. Once a
//! recognizer connection is open, a receive loop forwards its results to
//! the client. Both report problems into a two-slot error channel owned by
//! a monitor task, which tears the session down on the first report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_relay_core::{RelayError, RelayResult};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AsrConnector, AsrSettings, Duplex, Frame, FrameSink, FrameStream};
use crate::services::auth::{Identity, TokenVerifier};

/// Single-byte frame that opens an utterance.
pub const BEGIN_UTTERANCE: u8 = 0x00;
/// Single-byte frame that ends an utterance.
pub const END_UTTERANCE: u8 = 0xFF;

const ERROR_CHANNEL_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Authenticated,
    Streaming,
    Closed,
}

/// Why a session is ending.
#[derive(Debug)]
enum Shutdown {
    Normal(&'static str),
    Failed(RelayError),
}

/// Sockets and the teardown gate shared by the session's tasks.
struct SessionShared {
    closed: AtomicBool,
    cancel: CancellationToken,
    client: Mutex<FrameSink>,
    asr: Mutex<Option<FrameSink>>,
    write_timeout: Duration,
}

impl SessionShared {
    fn new(client: FrameSink, write_timeout: Duration) -> Self {
        Self {
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            client: Mutex::new(client),
            asr: Mutex::new(None),
            write_timeout,
        }
    }

    /// Send a control frame to the recognizer under the write deadline.
    async fn send_control(&self, frame: Frame) -> RelayResult<()> {
        let mut asr = self.asr.lock().await;
        let sink = asr
            .as_mut()
            .ok_or_else(|| RelayError::precondition("recognizer is not connected"))?;
        tokio::time::timeout(self.write_timeout, sink.send(frame))
            .await
            .map_err(|_| RelayError::backend("recognizer control write timed out"))?
    }

    async fn send_audio(&self, bytes: Vec<u8>) -> RelayResult<()> {
        let mut asr = self.asr.lock().await;
        match asr.as_mut() {
            Some(sink) => sink.send(Frame::Binary(bytes)).await,
            None => Err(RelayError::precondition("recognizer is not connected")),
        }
    }

    async fn send_client(&self, frame: Frame) -> RelayResult<()> {
        self.client.lock().await.send(frame).await
    }

    /// Idempotent: the first caller closes both sockets, later calls return
    /// at once.
    async fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let client = async {
            let mut sink = self.client.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(self.write_timeout, client).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("[Audio] client close: {}", e),
            Err(_) => debug!("[Audio] client close timed out"),
        }

        let asr = async {
            let mut asr = self.asr.lock().await;
            match asr.as_mut() {
                Some(sink) => sink.close().await,
                None => Ok(()),
            }
        };
        match tokio::time::timeout(self.write_timeout, asr).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("[Audio] recognizer close: {}", e),
            Err(_) => debug!("[Audio] recognizer close timed out"),
        }
    }
}

/// Report into the error channel. The channel only needs the first report;
/// later ones are dropped once it is full.
fn report(errors: &mpsc::Sender<Shutdown>, shutdown: Shutdown) {
    if let Err(e) = errors.try_send(shutdown) {
        debug!("[Audio] shutdown already reported: {:?}", e.into_inner());
    }
}

async fn monitor(session: Arc<SessionShared>, mut errors: mpsc::Receiver<Shutdown>) -> RelayResult<()> {
    let result = match errors.recv().await {
        None | Some(Shutdown::Normal(_)) => {
            debug!("[Audio] session closed normally");
            Ok(())
        }
        Some(Shutdown::Failed(err)) => {
            warn!(code = err.code(), "[Audio] session failed: {}", err);
            Err(err)
        }
    };
    session.teardown().await;
    result
}

/// Relays one client session to the recognizer.
#[derive(Clone)]
pub struct AudioRelay {
    verifier: Arc<dyn TokenVerifier>,
    connector: Arc<dyn AsrConnector>,
    settings: AsrSettings,
}

impl AudioRelay {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        connector: Arc<dyn AsrConnector>,
        settings: AsrSettings,
    ) -> Self {
        Self {
            verifier,
            connector,
            settings,
        }
    }

    /// Run the session until it closes. Returns the error that ended it,
    /// or `Ok` for a normal close.
    pub async fn run(&self, client: Duplex) -> RelayResult<()> {
        let Duplex { sink, stream } = client;
        let session = Arc::new(SessionShared::new(sink, self.settings.write_timeout));
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let monitor = tokio::spawn(monitor(session.clone(), errors_rx));

        let mut reader = ReadLoop {
            relay: self,
            session: session.clone(),
            errors: errors_tx,
            state: SessionState::Idle,
            identity: None,
            receiver: None,
        };
        reader.run(stream).await;
        let receiver = reader.finish();

        let result = monitor
            .await
            .map_err(|e| RelayError::internal(format!("audio monitor task failed: {}", e)))?;
        if let Some(handle) = receiver {
            if let Err(e) = handle.await {
                warn!("[Audio] receive loop task failed: {}", e);
            }
        }
        result
    }
}

struct ReadLoop<'a> {
    relay: &'a AudioRelay,
    session: Arc<SessionShared>,
    errors: mpsc::Sender<Shutdown>,
    state: SessionState,
    identity: Option<Identity>,
    receiver: Option<JoinHandle<()>>,
}

impl ReadLoop<'_> {
    async fn run(&mut self, mut stream: FrameStream) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.session.cancel.cancelled() => break,
                frame = stream.next() => frame,
            };
            let step = match frame {
                Some(Ok(Frame::Text(text))) => self.on_text(&text).await,
                Some(Ok(Frame::Binary(bytes))) => self.on_binary(bytes).await,
                Some(Ok(Frame::Close)) | None => Err(Shutdown::Normal("client closed")),
                Some(Err(err)) => Err(Shutdown::Failed(err)),
            };
            if let Err(shutdown) = step {
                report(&self.errors, shutdown);
                break;
            }
        }
        self.state = SessionState::Closed;
    }

    /// Hand back the receive loop handle; drops this loop's error sender.
    fn finish(self) -> Option<JoinHandle<()>> {
        self.receiver
    }

    async fn on_text(&mut self, text: &str) -> Result<(), Shutdown> {
        if self.state != SessionState::Idle {
            debug!("[Audio] ignoring text frame after authentication");
            return Ok(());
        }
        let identity = self
            .relay
            .verifier
            .verify(&extract_token(text))
            .await
            .map_err(Shutdown::Failed)?;
        info!(user_id = %identity.user_id, "[Audio] session authenticated");
        self.identity = Some(identity);
        self.state = SessionState::Authenticated;
        Ok(())
    }

    async fn on_binary(&mut self, bytes: Vec<u8>) -> Result<(), Shutdown> {
        if self.state == SessionState::Idle {
            return Err(Shutdown::Failed(RelayError::unauthorized(
                "audio received before authentication",
            )));
        }
        match bytes.as_slice() {
            [BEGIN_UTTERANCE] => self.begin().await,
            [END_UTTERANCE] => {
                if self.state != SessionState::Streaming {
                    return Err(Shutdown::Failed(RelayError::precondition(
                        "end of utterance before it began",
                    )));
                }
                self.session
                    .send_control(Frame::Text(self.relay.settings.stop_payload.clone()))
                    .await
                    .map_err(Shutdown::Failed)
            }
            _ if self.state == SessionState::Streaming => self
                .session
                .send_audio(bytes)
                .await
                .map_err(Shutdown::Failed),
            _ => {
                debug!(len = bytes.len(), "[Audio] dropping audio outside an utterance");
                Ok(())
            }
        }
    }

    async fn begin(&mut self) -> Result<(), Shutdown> {
        if self.state == SessionState::Streaming {
            debug!("[Audio] utterance already open");
            return Ok(());
        }
        let Duplex { sink, stream } = self
            .relay
            .connector
            .connect()
            .await
            .map_err(Shutdown::Failed)?;
        *self.session.asr.lock().await = Some(sink);
        self.session
            .send_control(Frame::Text(self.relay.settings.init_payload.clone()))
            .await
            .map_err(Shutdown::Failed)?;

        self.receiver = Some(tokio::spawn(receive_loop(
            self.session.clone(),
            stream,
            self.errors.clone(),
            self.relay.settings.final_field.clone(),
        )));
        self.state = SessionState::Streaming;
        debug!(
            user_id = self.identity.as_ref().map(|i| i.user_id.as_str()),
            "[Audio] utterance started"
        );
        Ok(())
    }
}

/// Forward recognizer results to the client until the final one.
async fn receive_loop(
    session: Arc<SessionShared>,
    mut stream: FrameStream,
    errors: mpsc::Sender<Shutdown>,
    final_field: String,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        let shutdown = match frame {
            Some(Ok(Frame::Text(text))) => {
                let last = is_final(&text, &final_field);
                match session.send_client(Frame::Text(text)).await {
                    Err(err) => Shutdown::Failed(err),
                    Ok(()) if last => Shutdown::Normal("final result delivered"),
                    Ok(()) => continue,
                }
            }
            Some(Ok(Frame::Binary(_))) => {
                debug!("[Audio] ignoring binary frame from recognizer");
                continue;
            }
            Some(Ok(Frame::Close)) | None => Shutdown::Normal("recognizer closed"),
            Some(Err(err)) => Shutdown::Failed(err),
        };
        report(&errors, shutdown);
        return;
    }
}

/// Auth frames are either `{"token": "..."}` or the bare token.
fn extract_token(text: &str) -> String {
    let trimmed = text.trim();
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| v.get("token")?.as_str().map(str::to_string))
        .unwrap_or_else(|| trimmed.to_string())
}

fn is_final(text: &str, field: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get(field).and_then(|f| f.as_bool()))
        .unwrap_or(false)
}
