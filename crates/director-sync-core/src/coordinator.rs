//! Sync coordinator
//!
//! Owns the listener, the outbound connector, the dedup window and the
//! snapshot cache, and exposes the host-facing operations. All state lives
//! behind one lock that is never held across an `.await`; host handlers run
//! after it is released.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{OutboundSlot, ReconnectTimer};
use crate::dedup::MessageDeduplicator;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::SyncError;
use crate::peer::PeerHandle;
use crate::server::ListenerSlot;
use crate::settings::{self, SyncSettings};
use crate::snapshot::SnapshotStore;
use crate::types::{Direction, EventHandler, IncomingMeta, SyncEvent, SyncStatus};

/// Coordinator construction options
#[derive(Default)]
pub struct SyncCoordinatorOptions {
    /// Fixed instance id (defaults to a random `<hex>-<pid>`)
    pub instance_id: Option<String>,
    /// Synchronous handler for incoming updates and status changes
    pub on_event: Option<EventHandler>,
}

/// Director sync engine
///
/// Most operations must run inside a Tokio runtime, since they may spawn
/// connection tasks. Dropping the coordinator disposes it.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) instance_id: String,
    state: Mutex<State>,
    events: broadcast::Sender<SyncEvent>,
    on_event: Option<EventHandler>,
    /// Serializes settings application across bind awaits
    apply_gate: tokio::sync::Mutex<()>,
}

pub(crate) struct State {
    pub(crate) settings: SyncSettings,
    pub(crate) listener: Option<ListenerSlot>,
    pub(crate) retiring_listener: Option<JoinHandle<()>>,
    /// Bumped by every listener stop; a bind that straddles one is discarded
    pub(crate) server_epoch: u64,
    pub(crate) inbound: HashMap<u64, PeerHandle>,
    pub(crate) outbound: Option<OutboundSlot>,
    pub(crate) reconnect_timer: ReconnectTimer,
    pub(crate) should_reconnect: bool,
    pub(crate) last_error: Option<String>,
    pub(crate) last_connected_at: Option<i64>,
    pub(crate) dedup: MessageDeduplicator,
    pub(crate) snapshots: SnapshotStore,
    next_id: u64,
}

impl State {
    fn new() -> Self {
        Self {
            settings: SyncSettings::default(),
            listener: None,
            retiring_listener: None,
            server_epoch: 0,
            inbound: HashMap::new(),
            outbound: None,
            reconnect_timer: ReconnectTimer::default(),
            should_reconnect: false,
            last_error: None,
            last_connected_at: None,
            dedup: MessageDeduplicator::default(),
            snapshots: SnapshotStore::new(),
            next_id: 0,
        }
    }

    /// Id for a listener, peer or dial attempt
    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn generate_instance_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", &hex[..12], std::process::id())
}

impl SyncCoordinator {
    pub fn new(options: SyncCoordinatorOptions) -> Self {
        let (events, _) = broadcast::channel(256);
        let instance_id = options
            .instance_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_instance_id);

        Self {
            shared: Arc::new(Shared {
                instance_id,
                state: Mutex::new(State::new()),
                events,
                on_event: options.on_event,
                apply_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    /// Subscribe to incoming updates and status changes
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    pub fn settings(&self) -> SyncSettings {
        self.shared.lock().settings.clone()
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.shared.lock();
        self.shared.status_of(&state)
    }

    /// Normalize and store `input`, then reconcile listener and connector.
    /// Returns the effective settings.
    pub async fn set_settings(&self, input: &Value) -> SyncSettings {
        let next = settings::normalize(input);
        self.shared.lock().settings = next;
        self.shared.apply_settings().await;

        let (settings, status) = {
            let state = self.shared.lock();
            (state.settings.clone(), self.shared.status_of(&state))
        };
        self.shared.emit_status(status);
        settings
    }

    /// Start or stop the listener and connector to match the stored settings
    pub async fn apply_settings(&self) {
        self.shared.apply_settings().await;
    }

    /// Fan an application update out to every open peer.
    ///
    /// Returns `true` if at least one peer accepted the frame.
    pub fn broadcast_update(&self, update: &Value) -> bool {
        self.shared.broadcast(update)
    }

    /// Process one raw frame as if it arrived on a connection of `direction`.
    /// Returns how many application updates were delivered to the host.
    pub fn handle_incoming(&self, raw: &str, direction: Direction) -> usize {
        self.shared.handle_incoming(raw, direction)
    }

    /// Re-enable reconnection and dial immediately
    pub fn reconnect_now(&self) -> SyncStatus {
        self.shared.reconnect_now()
    }

    /// Drop the outbound connection and stay idle until asked again
    pub fn disconnect_now(&self) -> SyncStatus {
        self.shared.disconnect_now()
    }

    /// Tear everything down. Applying settings again brings it back.
    pub fn dispose(&self) {
        let mut state = self.shared.lock();
        state.should_reconnect = false;
        self.shared.stop_all(&mut state);
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status_of(&self, state: &State) -> SyncStatus {
        let s = &state.settings;
        SyncStatus {
            enabled: s.enabled,
            server_enabled: s.server_enabled,
            client_enabled: s.client_enabled,
            listen_port: s.listen_port,
            listening: state.listener.is_some(),
            remote_host: s.remote_host.clone(),
            remote_port: s.remote_port,
            auto_connect: s.auto_connect,
            outbound_connected: state.outbound.as_ref().is_some_and(OutboundSlot::is_open),
            inbound_connection_count: state.inbound.len(),
            instance_id: self.instance_id.clone(),
            last_error: state.last_error.clone(),
            last_connected_at: state.last_connected_at,
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(handler) = &self.on_event {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Director sync event handler failed"),
                Err(_) => warn!("Director sync event handler panicked"),
            }
        }
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_status(&self, status: SyncStatus) {
        self.emit(SyncEvent::Status(status));
    }

    /// Store a transport error as `lastError` and notify
    pub(crate) fn record_error(&self, err: SyncError) {
        let status = {
            let mut state = self.lock();
            state.last_error = Some(err.to_string());
            self.status_of(&state)
        };
        self.emit_status(status);
    }

    pub(crate) fn stop_all(&self, state: &mut State) {
        self.stop_outbound(state);
        self.stop_server(state);
    }

    async fn apply_settings(self: &Arc<Self>) {
        let _gate = self.apply_gate.lock().await;

        let server_enabled = {
            let mut state = self.lock();
            if !state.settings.is_active() {
                self.stop_all(&mut state);
                state.last_error = None;
                return;
            }
            state.settings.server_enabled
        };

        if server_enabled {
            self.ensure_server().await;
        } else {
            let mut state = self.lock();
            self.stop_server(&mut state);
        }

        let mut state = self.lock();
        if state.settings.wants_outbound() {
            state.should_reconnect = true;
            self.ensure_outbound(&mut state);
        } else {
            state.should_reconnect = false;
            self.stop_outbound(&mut state);
        }
    }

    fn broadcast(&self, update: &Value) -> bool {
        let mut state = self.lock();
        if !state.settings.is_active() || !update.is_object() {
            return false;
        }
        state.snapshots.remember(update);

        let frame = match Envelope::update(update, &self.instance_id).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode director sync update");
                return false;
            }
        };

        let mut sent = false;
        for peer in state.inbound.values() {
            if peer.is_open() && peer.send(frame.clone()) {
                sent = true;
            }
        }
        if let Some(peer) = state.outbound.as_ref().and_then(|slot| slot.peer.as_ref()) {
            if peer.is_open() && peer.send(frame) {
                sent = true;
            }
        }
        sent
    }

    pub(crate) fn handle_incoming(&self, raw: &str, direction: Direction) -> usize {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(?direction, error = %e, "Dropping director sync frame");
                return 0;
            }
        };
        if envelope.origin.as_deref() == Some(self.instance_id.as_str()) {
            return 0;
        }

        let meta = |snapshot| IncomingMeta {
            direction,
            origin: envelope.origin.clone(),
            snapshot,
        };

        let deliveries: Vec<(Value, IncomingMeta)> = {
            let mut state = self.lock();
            if let Some(id) = envelope.dedup_id() {
                if state.dedup.seen(id) {
                    return 0;
                }
            }

            match envelope.kind {
                EnvelopeKind::Update => match envelope.update_data() {
                    Some(data) => {
                        state.snapshots.remember(data);
                        vec![(data.clone(), meta(false))]
                    }
                    None => Vec::new(),
                },
                EnvelopeKind::Snapshot => envelope
                    .snapshot_updates()
                    .into_iter()
                    .map(|item| {
                        state.snapshots.remember(item);
                        (item.clone(), meta(true))
                    })
                    .collect(),
                EnvelopeKind::Hello => {
                    debug!(?direction, origin = ?envelope.origin, "Director peer hello");
                    Vec::new()
                }
                EnvelopeKind::Unknown => Vec::new(),
            }
        };

        let delivered = deliveries.len();
        for (update, meta) in deliveries {
            self.emit(SyncEvent::Incoming { update, meta });
        }
        delivered
    }
}
