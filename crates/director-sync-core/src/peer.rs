//! Per-connection pump shared by inbound and outbound peers
//!
//! Each WebSocket is owned by exactly one task. The coordinator talks to it
//! through a [`PeerHandle`]: queued frames are written in order, and a peer
//! counts as open for as long as its task is alive.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::coordinator::{Shared, State};
use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::types::Direction;

pub(crate) enum Outgoing {
    Frame(String),
    Close,
}

/// Coordinator-side handle to a live connection
#[derive(Debug)]
pub(crate) struct PeerHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl PeerHandle {
    pub(crate) fn channel(id: u64) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame; `false` if the connection is already gone
    pub(crate) fn send(&self, frame: String) -> bool {
        self.tx.send(Outgoing::Frame(frame)).is_ok()
    }

    /// Ask the pump to send a Close frame and stop
    pub(crate) fn close(&self) {
        debug!(peer = self.id, "Closing director peer");
        let _ = self.tx.send(Outgoing::Close);
    }
}

impl Shared {
    /// Create the handle for a newly established connection with the
    /// handshake (hello, then snapshot if any state is cached) already queued.
    ///
    /// Must be called under the state lock so no broadcast can slip in
    /// ahead of the hello.
    pub(crate) fn open_peer(
        &self,
        state: &State,
        id: u64,
    ) -> (PeerHandle, mpsc::UnboundedReceiver<Outgoing>) {
        let (peer, rx) = PeerHandle::channel(id);

        let mut handshake = vec![Envelope::hello(&self.instance_id)];
        let payloads = state.snapshots.payloads();
        if !payloads.is_empty() {
            handshake.push(Envelope::snapshot(payloads, &self.instance_id));
        }
        for envelope in handshake {
            match envelope.encode() {
                Ok(frame) => {
                    peer.send(frame);
                }
                Err(e) => warn!(error = %e, "Failed to encode handshake envelope"),
            }
        }

        (peer, rx)
    }

    /// Drive one connection until either side closes it
    pub(crate) async fn pump<S>(
        self: Arc<Self>,
        ws_stream: WebSocketStream<S>,
        mut rx: mpsc::UnboundedReceiver<Outgoing>,
        direction: Direction,
        id: u64,
        addr: Option<SocketAddr>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(Outgoing::Frame(text)) => {
                            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                                debug!(?direction, ?addr, error = %e, "Send to peer failed");
                                self.record_error(SyncError::Socket(e));
                                break;
                            }
                        }
                        Some(Outgoing::Close) | None => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }

                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming(&text, direction);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.handle_incoming(&String::from_utf8_lossy(&data), direction);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(?direction, ?addr, error = %e, "Sync WebSocket error");
                            self.record_error(SyncError::Socket(e));
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        // Handle reports closed from here on
        drop(rx);

        info!(?direction, ?addr, peer = id, "Director peer disconnected");
        match direction {
            Direction::Inbound => self.inbound_closed(id),
            Direction::Outbound => self.outbound_closed(id),
        }
    }
}
