//! Outbound connector
//!
//! Keeps at most one connection to `remoteHost:remotePort`. When that
//! connection drops (or never comes up) and reconnecting is wanted, a single
//! fixed-delay timer dials again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::coordinator::{now_ms, Shared, State};
use crate::error::SyncError;
use crate::peer::PeerHandle;
use crate::types::{Direction, SyncStatus};

/// Delay between a lost outbound connection and the next dial
pub const RECONNECT_DELAY: Duration = Duration::from_millis(2500);

/// The single outbound attempt: dialing, or open once `peer` is set
#[derive(Debug)]
pub(crate) struct OutboundSlot {
    pub(crate) id: u64,
    pub(crate) key: String,
    task: JoinHandle<()>,
    pub(crate) peer: Option<PeerHandle>,
}

impl OutboundSlot {
    /// Open, or still connecting
    fn is_live(&self) -> bool {
        match &self.peer {
            Some(peer) => peer.is_open(),
            None => !self.task.is_finished(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.peer.as_ref().is_some_and(PeerHandle::is_open)
    }
}

/// Cancellable one-shot timer. At most one is pending at a time.
#[derive(Debug, Default)]
pub(crate) struct ReconnectTimer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl ReconnectTimer {
    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Run `on_fire(generation)` after `delay`. No-op if a timer is already pending.
    pub(crate) fn schedule<F>(&mut self, delay: Duration, on_fire: F) -> bool
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if self.handle.is_some() {
            return false;
        }
        self.generation += 1;
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation);
        }));
        true
    }

    /// Idempotent; safe when nothing is pending
    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Claim a firing. `false` if the timer was cancelled or replaced meanwhile.
    pub(crate) fn fire(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && self.generation == generation {
            self.handle = None;
            return true;
        }
        false
    }
}

impl Shared {
    /// Dial the configured peer unless an attempt for the same key is live
    pub(crate) fn ensure_outbound(self: &Arc<Self>, state: &mut State) {
        let settings = &state.settings;
        if !settings.enabled || !settings.client_enabled || settings.remote_host.is_empty() {
            return;
        }
        let key = settings.outbound_key();
        let url = settings.remote_url();

        if state
            .outbound
            .as_ref()
            .is_some_and(|slot| slot.key == key && slot.is_live())
        {
            return;
        }

        self.stop_outbound(state);

        let id = state.next_id();
        debug!(%url, attempt = id, "Dialing director peer");
        let task = tokio::spawn(self.clone().dial(id, url));
        state.outbound = Some(OutboundSlot {
            id,
            key,
            task,
            peer: None,
        });
    }

    /// Cancel the reconnect timer and drop the outbound attempt
    pub(crate) fn stop_outbound(&self, state: &mut State) {
        state.reconnect_timer.cancel();
        let Some(slot) = state.outbound.take() else {
            return;
        };
        match slot.peer {
            Some(peer) => peer.close(),
            None => slot.task.abort(),
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut State) {
        let settings = &state.settings;
        if !settings.enabled
            || !settings.client_enabled
            || !state.should_reconnect
            || settings.remote_host.is_empty()
        {
            return;
        }
        let shared = self.clone();
        if state
            .reconnect_timer
            .schedule(RECONNECT_DELAY, move |generation| shared.reconnect_fired(generation))
        {
            debug!(delay_ms = RECONNECT_DELAY.as_millis() as u64, "Director sync reconnect scheduled");
        }
    }

    fn reconnect_fired(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if state.reconnect_timer.fire(generation) {
            self.ensure_outbound(&mut state);
        }
    }

    async fn dial(self: Arc<Self>, id: u64, url: String) {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                let (rx, status) = {
                    let mut state = self.lock();
                    // Superseded by a newer attempt or stopped
                    if state.outbound.as_ref().map(|s| s.id) != Some(id) {
                        return;
                    }
                    let (peer, rx) = self.open_peer(&state, id);
                    if let Some(slot) = state.outbound.as_mut() {
                        slot.peer = Some(peer);
                    }
                    state.reconnect_timer.cancel();
                    state.last_error = None;
                    state.last_connected_at = Some(now_ms());
                    (rx, self.status_of(&state))
                };

                info!(%url, "Connected to director peer");
                self.emit_status(status);
                self.pump(ws_stream, rx, Direction::Outbound, id, None).await;
            }
            Err(e) => {
                let err = SyncError::Connect { url, source: e };
                let status = {
                    let mut state = self.lock();
                    if state.outbound.as_ref().map(|s| s.id) != Some(id) {
                        return;
                    }
                    warn!(error = %err, "Director sync connection failed");
                    state.outbound = None;
                    state.last_error = Some(err.to_string());
                    self.schedule_reconnect(&mut state);
                    self.status_of(&state)
                };
                self.emit_status(status);
            }
        }
    }

    pub(crate) fn outbound_closed(self: &Arc<Self>, id: u64) {
        let status = {
            let mut state = self.lock();
            if state.outbound.as_ref().map(|s| s.id) != Some(id) {
                return;
            }
            state.outbound = None;
            self.schedule_reconnect(&mut state);
            self.status_of(&state)
        };
        self.emit_status(status);
    }

    pub(crate) fn reconnect_now(self: &Arc<Self>) -> SyncStatus {
        let status = {
            let mut state = self.lock();
            if !state.settings.enabled || !state.settings.client_enabled {
                return self.status_of(&state);
            }
            state.should_reconnect = true;
            self.ensure_outbound(&mut state);
            self.status_of(&state)
        };
        self.emit_status(status.clone());
        status
    }

    pub(crate) fn disconnect_now(&self) -> SyncStatus {
        let status = {
            let mut state = self.lock();
            state.should_reconnect = false;
            self.stop_outbound(&mut state);
            self.status_of(&state)
        };
        self.emit_status(status.clone());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_timer_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = ReconnectTimer::default();

        let counter = fired.clone();
        assert!(timer.schedule(Duration::from_millis(10), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        // Never duplicated while pending
        assert!(!timer.schedule(Duration::from_millis(10), |_| panic!("duplicate timer")));
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = ReconnectTimer::default();
        timer.cancel();

        let counter = fired.clone();
        timer.schedule(Duration::from_millis(10), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_pending());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_firing_is_rejected() {
        let mut timer = ReconnectTimer::default();
        timer.schedule(Duration::from_secs(60), |_| {});
        let first = timer.generation;
        timer.cancel();
        assert!(!timer.fire(first));

        timer.schedule(Duration::from_secs(60), |_| {});
        assert!(!timer.fire(first));
        assert!(timer.fire(timer.generation));
        assert!(!timer.is_pending());
    }
}
