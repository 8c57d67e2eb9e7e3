use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage, SetupMessage};
use crate::audio::PcmChunk;

/// What the writer task is asked to do
#[derive(Debug, Clone)]
pub enum Outgoing {
    Message(ClientMessage),
    /// Request a clean close of the remote connection
    Close,
}

/// Inbound side of an open connection, delivered in arrival order
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(ServerMessage),
    Error(String),
    Closed(Option<String>),
}

/// Fire-and-forget handle for outbound frames.
///
/// Sends never wait: when the queue is full or the connection is gone the
/// frame is dropped and `false` is returned. Capture is never backpressured.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::Sender<Outgoing>,
}

impl OutboundSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn send_audio(&self, chunk: &PcmChunk) -> bool {
        self.try_send(Outgoing::Message(ClientMessage::audio(chunk)))
    }

    pub fn send_video(&self, jpeg: &[u8]) -> bool {
        self.try_send(Outgoing::Message(ClientMessage::video_frame(jpeg)))
    }

    /// Ask the writer to close the socket. Best effort.
    pub fn close(&self) {
        if self.tx.try_send(Outgoing::Close).is_err() {
            debug!("Close request not queued (connection already gone or queue full)");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn try_send(&self, outgoing: Outgoing) -> bool {
        match self.tx.try_send(outgoing) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// An open connection: the outbound sink plus the inbound event stream
pub struct LiveConnection {
    pub outbound: OutboundSink,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

impl LiveConnection {
    pub fn new(outbound: OutboundSink, inbound: mpsc::Receiver<TransportEvent>) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens streaming connections to the remote model
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a connection and complete the setup handshake
    async fn connect(&self, setup: SetupMessage) -> Result<LiveConnection>;
}

/// Settings for [`GeminiLiveConnector`]
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// `wss://` URL of the BidiGenerateContent endpoint
    pub endpoint: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    /// Outbound frames queued before new ones are dropped
    pub outbound_capacity: usize,
}

/// Websocket connector for the Gemini Live API
pub struct GeminiLiveConnector {
    config: ConnectorConfig,
}

impl GeminiLiveConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    async fn open(&self, setup: SetupMessage) -> Result<LiveConnection> {
        let url = format!("{}?key={}", self.config.endpoint, self.config.api_key);

        info!("Connecting to live endpoint {}", self.config.endpoint);

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("Failed to open websocket")?;
        let (mut write, mut read) = socket.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(setup))?;
        write
            .send(Message::Text(setup))
            .await
            .context("Failed to send setup message")?;

        // The server acknowledges setup before anything else
        loop {
            let frame = read
                .next()
                .await
                .ok_or_else(|| anyhow!("Connection closed during setup"))?
                .context("Failed to read setup response")?;

            match frame {
                Message::Close(reason) => {
                    bail!(
                        "Connection closed during setup: {}",
                        reason.map(|r| r.reason.to_string()).unwrap_or_default()
                    )
                }
                Message::Text(_) | Message::Binary(_) => {
                    let msg = parse_frame(&frame)?.context("Empty setup response")?;
                    if let Some(err) = msg.error {
                        bail!("Setup rejected: {}", err);
                    }
                    if msg.is_setup_complete() {
                        break;
                    }
                    debug!("Ignoring frame received before setupComplete");
                }
                _ => {}
            }
        }

        info!("Live session setup complete");

        let (outbound, mut outgoing_rx) = OutboundSink::channel(self.config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);

        // Writer task
        tokio::spawn(async move {
            while let Some(outgoing) = outgoing_rx.recv().await {
                match outgoing {
                    Outgoing::Message(msg) => {
                        let payload = match serde_json::to_string(&msg) {
                            Ok(p) => p,
                            Err(e) => {
                                error!("Failed to serialize outbound frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(payload)).await {
                            warn!("Failed to send frame: {}", e);
                            break;
                        }
                    }
                    Outgoing::Close => break,
                }
            }

            // Every sink dropped or an explicit close
            if let Err(e) = write.close().await {
                debug!("Websocket close: {}", e);
            }
            debug!("Writer task stopped");
        });

        // Reader task
        tokio::spawn(async move {
            let closing = loop {
                let Some(frame) = read.next().await else {
                    break TransportEvent::Closed(None);
                };

                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => break TransportEvent::Error(e.to_string()),
                };

                if let Message::Close(reason) = &frame {
                    break TransportEvent::Closed(reason.as_ref().map(|r| r.reason.to_string()));
                }

                match parse_frame(&frame) {
                    Ok(Some(msg)) => {
                        if let Some(err) = &msg.error {
                            break TransportEvent::Error(err.to_string());
                        }
                        if inbound_tx.send(TransportEvent::Message(msg)).await.is_err() {
                            debug!("Inbound consumer gone, stopping reader");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to parse server frame: {:#}", e),
                }
            };

            let _ = inbound_tx.send(closing).await;
            debug!("Reader task stopped");
        });

        Ok(LiveConnection::new(outbound, inbound_rx))
    }
}

#[async_trait::async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: SetupMessage) -> Result<LiveConnection> {
        tokio::time::timeout(self.config.connect_timeout, self.open(setup))
            .await
            .map_err(|_| {
                anyhow!(
                    "Timed out after {:?} waiting for the live endpoint",
                    self.config.connect_timeout
                )
            })?
    }
}

/// Parse a text or binary websocket frame as a server message.
/// Control frames yield `None`.
fn parse_frame(frame: &Message) -> Result<Option<ServerMessage>> {
    let bytes: &[u8] = match frame {
        Message::Text(text) => text.as_bytes(),
        Message::Binary(bin) => bin,
        _ => return Ok(None),
    };
    let msg = serde_json::from_slice(bytes).context("Invalid server message")?;
    Ok(Some(msg))
}
