//! Transport seam for the remote streaming session.

use crate::protocol::{ClientMessage, ServerMessage, Setup};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Frames queued for the transport writer.
#[derive(Debug)]
pub enum Outbound {
    Message(ClientMessage),
    /// Ask the writer to close the connection and stop.
    Close,
}

/// Events surfaced by the transport reader.
#[derive(Debug)]
pub enum LinkEvent {
    Message(ServerMessage),
    Error(String),
    Closed(Option<String>),
}

/// Opens sessions against the remote service.
#[async_trait]
pub trait LiveConnector: Send + Sync + 'static {
    /// Connects and completes the setup handshake. Resolves once the session
    /// is ready to stream.
    async fn connect(&self, setup: Setup) -> Result<LiveLink>;
}

/// An open session: a bounded outbound queue and the inbound event stream.
#[derive(Debug)]
pub struct LiveLink {
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<LinkEvent>,
}

impl LiveLink {
    pub fn new(outbound: mpsc::Sender<Outbound>, inbound: mpsc::Receiver<LinkEvent>) -> Self {
        Self { outbound, inbound }
    }

    /// Queues a message without waiting. Fails when the queue is full or the
    /// writer has gone away.
    pub fn try_send(&self, msg: ClientMessage) -> Result<(), TrySendError<Outbound>> {
        self.outbound.try_send(Outbound::Message(msg))
    }

    /// A handle on the outbound queue for frames that must wait for room
    /// rather than be dropped.
    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.outbound.clone()
    }

    /// Next inbound event. A reader that vanished without reporting is
    /// treated as a clean close.
    pub async fn recv(&mut self) -> LinkEvent {
        self.inbound.recv().await.unwrap_or(LinkEvent::Closed(None))
    }

    /// Requests an orderly close. Dropping the link afterwards is enough for
    /// the writer to stop even if the request could not be queued.
    pub fn close(self) {
        let _ = self.outbound.try_send(Outbound::Close);
    }
}
