//! WebSocket transport for the Gemini Live `BidiGenerateContent` API.
//!
//! [`GeminiConnector`] performs the setup handshake and then hands the socket
//! to a pump task that serialises outbound frames and parses inbound ones.
//! The session logic only ever sees the channels of the returned
//! [`LiveLink`].

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use aura_core::{
    live::{LinkEvent, LiveConnector, LiveLink, Outbound},
    protocol::{ClientMessage, ServerMessage, Setup},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::time::Duration;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 64;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Opens Live sessions with an API key.
#[derive(Clone)]
pub struct GeminiConnector {
    endpoint: String,
    api_key: String,
    handshake_timeout: Duration,
}

impl std::fmt::Debug for GeminiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConnector")
            .field("endpoint", &self.endpoint)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl GeminiConnector {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            handshake_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, setup: Setup) -> Result<LiveLink> {
        let (ws_stream, _) = connect_async(self.url())
            .await
            .context("Failed to reach the Gemini Live endpoint")?;
        info!(endpoint = %self.endpoint, "Connected to Gemini Live WebSocket.");
        let (mut sink, mut stream) = ws_stream.split();

        let model = setup.model.clone();
        let setup_msg = serde_json::to_string(&ClientMessage::Setup(setup))?;
        sink.send(WsMessage::Text(setup_msg.into())).await?;

        tokio::time::timeout(self.handshake_timeout, await_setup_complete(&mut stream))
            .await
            .map_err(|_| anyhow!("Timed out waiting for setup to complete"))??;
        info!(%model, "Gemini session setup is complete. Ready for bidirectional streaming.");

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        tokio::spawn(pump(sink, stream, outbound_rx, inbound_tx));
        Ok(LiveLink::new(outbound_tx, inbound_rx))
    }
}

/// Classification of one inbound WebSocket frame.
#[derive(Debug)]
enum Frame {
    Message(ServerMessage),
    Closed(Option<String>),
    Malformed(serde_json::Error),
    Control,
}

/// The service sends JSON in both text and binary frames.
fn decode_frame(frame: &WsMessage) -> Frame {
    let parsed = match frame {
        WsMessage::Text(text) => serde_json::from_str::<ServerMessage>(text.as_str()),
        WsMessage::Binary(data) => serde_json::from_slice::<ServerMessage>(data),
        WsMessage::Close(close) => {
            return Frame::Closed(close.as_ref().map(|c| c.reason.as_str().to_string()));
        }
        _ => return Frame::Control,
    };
    match parsed {
        Ok(msg) => Frame::Message(msg),
        Err(e) => Frame::Malformed(e),
    }
}

async fn await_setup_complete(stream: &mut WsStream) -> Result<()> {
    while let Some(frame) = stream.next().await {
        match decode_frame(&frame?) {
            Frame::Message(msg) if msg.setup_complete.is_some() => return Ok(()),
            Frame::Message(msg) => warn!(?msg, "Received unexpected message during Gemini setup"),
            Frame::Closed(reason) => {
                bail!(
                    "Session closed during setup: {}",
                    reason.unwrap_or_else(|| "no reason given".to_string())
                )
            }
            Frame::Malformed(e) => warn!(error = %e, "Failed to parse Gemini message during setup"),
            Frame::Control => {}
        }
    }
    bail!("Connection ended before setup completed")
}

/// Moves frames between the socket and the link channels until either side
/// closes.
async fn pump(
    mut sink: WsSink,
    mut stream: WsStream,
    mut outbound: mpsc::Receiver<Outbound>,
    inbound: mpsc::Sender<LinkEvent>,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Message(msg)) => {
                    let payload = match serde_json::to_string(&msg) {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!(error = %e, "Failed to serialise outbound message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::Text(payload.into())).await {
                        error!(error = %e, "Error writing to Gemini WebSocket");
                        let _ = inbound.send(LinkEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("Closing Gemini WebSocket");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(frame)) => match decode_frame(&frame) {
                    Frame::Message(msg) => {
                        if inbound.send(LinkEvent::Message(msg)).await.is_err() {
                            break;
                        }
                    }
                    Frame::Closed(reason) => {
                        info!(?reason, "Gemini WebSocket connection closed by server.");
                        let _ = inbound.send(LinkEvent::Closed(reason)).await;
                        break;
                    }
                    Frame::Malformed(e) => warn!(error = %e, "Ignoring unparseable Gemini message"),
                    Frame::Control => {}
                },
                Some(Err(e)) => {
                    error!("Error reading from Gemini WebSocket: {}", e);
                    let _ = inbound.send(LinkEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    let _ = inbound.send(LinkEvent::Closed(None)).await;
                    break;
                }
            },
        }
    }
    debug!("Gemini pump finished");
}
