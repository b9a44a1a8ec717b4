//! Inbound listener
//!
//! Binds `0.0.0.0:<listenPort>` while the server role is enabled and
//! attaches every accepted WebSocket to the inbound set. Changing the port
//! means stop + rebind. A failed bind is not retried until settings are
//! applied again.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

use crate::coordinator::{now_ms, Shared, State};
use crate::error::SyncError;
use crate::types::Direction;

/// A bound listener and its accept task
#[derive(Debug)]
pub(crate) struct ListenerSlot {
    pub(crate) id: u64,
    pub(crate) port: u16,
    task: JoinHandle<()>,
}

impl Shared {
    /// Make sure a listener is bound on the configured port
    pub(crate) async fn ensure_server(self: &Arc<Self>) {
        let (port, epoch, retiring) = {
            let mut state = self.lock();
            let port = state.settings.listen_port;
            if state.listener.as_ref().is_some_and(|l| l.port == port) {
                return;
            }
            self.stop_server(&mut state);
            (port, state.server_epoch, state.retiring_listener.take())
        };

        // The aborted accept task still owns the old socket until it is dropped
        if let Some(task) = retiring {
            let _ = task.await;
        }

        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                let mut state = self.lock();
                let wanted = state.settings.is_active() && state.settings.server_enabled;
                if state.server_epoch != epoch || !wanted {
                    debug!(port, "Discarding listener bound after stop");
                    return;
                }
                let id = state.next_id();
                let task = tokio::spawn(self.clone().accept_loop(listener, id));
                state.listener = Some(ListenerSlot { id, port, task });
                info!(port, "Director sync listener started");
            }
            Err(e) => {
                let err = SyncError::Bind { port, source: e };
                warn!(port, error = %err, "Director sync listener failed to start");
                self.lock().last_error = Some(err.to_string());
            }
        }
    }

    /// Unbind the listener and close every inbound peer
    pub(crate) fn stop_server(&self, state: &mut State) {
        state.server_epoch += 1;
        let Some(listener) = state.listener.take() else {
            return;
        };
        listener.task.abort();
        state.retiring_listener = Some(listener.task);

        for (_, peer) in state.inbound.drain() {
            peer.close();
        }
        info!(port = listener.port, "Director sync listener stopped");
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, listener_id: u64) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(self.clone().attach_inbound(stream, addr, listener_id));
                }
                Err(e) => {
                    error!(?e, "Failed to accept director sync connection");
                    self.record_error(SyncError::Accept(e));
                }
            }
        }
    }

    async fn attach_inbound(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, listener_id: u64) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(?addr, error = %e, "WebSocket handshake with director peer failed");
                return;
            }
        };

        let (id, rx, status) = {
            let mut state = self.lock();
            // Listener was stopped or replaced while the handshake ran
            if state.listener.as_ref().map(|l| l.id) != Some(listener_id) {
                return;
            }
            let id = state.next_id();
            let (peer, rx) = self.open_peer(&state, id);
            state.inbound.insert(id, peer);
            state.last_error = None;
            state.last_connected_at = Some(now_ms());
            (id, rx, self.status_of(&state))
        };

        info!(?addr, peer = id, "Director peer connected");
        self.emit_status(status);
        self.pump(ws_stream, rx, Direction::Inbound, id, Some(addr)).await;
    }

    pub(crate) fn inbound_closed(&self, id: u64) {
        let status = {
            let mut state = self.lock();
            state.inbound.remove(&id);
            self.status_of(&state)
        };
        self.emit_status(status);
    }
}
