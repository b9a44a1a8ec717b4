//! Transport error taxonomy
//!
//! None of these reach the host as `Err`: they are rendered into the
//! status `lastError` string and logged.

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("listen failed on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("listen failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("connection error: {0}")]
    Socket(#[from] tungstenite::Error),
}
