//! director-sync-core - live state mirroring between director instances
//!
//! Two (or more) instances of the broadcast director mirror each other's
//! BP/room state, score and post-match data over a LAN WebSocket link. Any
//! instance can listen, dial, or both; there is no central server.
//!
//! # Example
//!
//! ```no_run
//! use director_sync_core::{SyncCoordinator, SyncCoordinatorOptions, SyncEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sync = SyncCoordinator::new(SyncCoordinatorOptions {
//!         on_event: Some(Box::new(|event| {
//!             if let SyncEvent::Incoming { update, meta } = event {
//!                 println!("{:?} update from {:?}: {}", meta.direction, meta.origin, update);
//!             }
//!             Ok(())
//!         })),
//!         ..Default::default()
//!     });
//!
//!     sync.set_settings(&json!({
//!         "serverEnabled": true,
//!         "clientEnabled": true,
//!         "remoteHost": "192.168.1.20",
//!     }))
//!     .await;
//!
//!     sync.broadcast_update(&json!({ "type": "score", "scoreData": { "teamAWins": 1 } }));
//! }
//! ```

mod client;
mod coordinator;
pub mod dedup;
pub mod envelope;
mod error;
mod peer;
mod server;
pub mod settings;
pub mod snapshot;
mod types;

pub use client::RECONNECT_DELAY;
pub use coordinator::{SyncCoordinator, SyncCoordinatorOptions};
pub use dedup::{MessageDeduplicator, MAX_SEEN_MESSAGE_IDS};
pub use envelope::{Envelope, EnvelopeError, EnvelopeKind, PROTOCOL, VERSION};
pub use error::SyncError;
pub use settings::{normalize, SyncSettings, DEFAULT_PORT};
pub use snapshot::{SnapshotStore, UpdateKind};
pub use types::{ConnectionLabel, Direction, EventHandler, IncomingMeta, SyncEvent, SyncStatus};
