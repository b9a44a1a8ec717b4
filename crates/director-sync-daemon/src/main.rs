//! director-syncd - standalone director sync node
//!
//! Mirrors live production state with another director instance.
//!
//! - stdin: one JSON application update per line, broadcast to peers
//! - stdout: one `{"update": ..., "meta": ...}` line per incoming update
//! - stderr (and optionally `--log-dir`): status and diagnostics
//!
//! Usage:
//!   director-syncd --server
//!   director-syncd --client -H 192.168.1.20 --remote-port 19625

mod config;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use director_sync_core::{SyncCoordinator, SyncCoordinatorOptions, SyncEvent};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "director-syncd")]
#[command(about = "Mirror director state with another instance over the LAN")]
#[command(version)]
struct Args {
    /// Settings file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Accept connections from other directors
    #[arg(long)]
    server: bool,

    /// Dial the remote director
    #[arg(long)]
    client: bool,

    /// Port to listen on
    #[arg(long)]
    listen_port: Option<u16>,

    /// Remote director host
    #[arg(short = 'H', long)]
    remote_host: Option<String>,

    /// Remote director port
    #[arg(long)]
    remote_port: Option<u16>,

    /// Don't dial (or redial) the remote automatically
    #[arg(long)]
    no_auto_connect: bool,

    /// Fixed instance id instead of a random one
    #[arg(long)]
    instance_id: Option<String>,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save: bool,
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("DIRECTOR_SYNC_LOG") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "info".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn init_logging(
    log_dir: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "director-syncd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Layer CLI flags over the settings file
fn apply_overrides(base: Value, args: &Args) -> Value {
    let mut map = match base {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    if args.server {
        map.insert("serverEnabled".into(), json!(true));
    }
    if args.client {
        map.insert("clientEnabled".into(), json!(true));
    }
    if let Some(port) = args.listen_port {
        map.insert("listenPort".into(), json!(port));
    }
    if let Some(host) = &args.remote_host {
        map.insert("remoteHost".into(), json!(host));
    }
    if let Some(port) = args.remote_port {
        map.insert("remotePort".into(), json!(port));
    }
    if args.no_auto_connect {
        map.insert("autoConnect".into(), json!(false));
    }
    Value::Object(map)
}

fn on_event(event: &SyncEvent) -> Result<()> {
    match event {
        SyncEvent::Incoming { update, meta } => {
            let line = serde_json::to_string(&json!({ "update": update, "meta": meta }))?;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{line}")?;
            stdout.flush()?;
        }
        SyncEvent::Status(status) => {
            info!(label = %status.label(), "{}", status.summary());
        }
    }
    Ok(())
}

fn broadcast_line(sync: &SyncCoordinator, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let update: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Skipping stdin line that is not JSON");
            return;
        }
    };
    if !update.is_object() {
        warn!("Skipping stdin line that is not a JSON object");
        return;
    }
    let sent = sync.broadcast_update(&update);
    debug!(sent, kind = ?update.get("type"), "Broadcast local update");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_deref())?;

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let input = apply_overrides(config::load_settings_value(&config_path)?, &args);

    let sync = SyncCoordinator::new(SyncCoordinatorOptions {
        instance_id: args.instance_id.clone(),
        on_event: Some(Box::new(on_event)),
    });

    let settings = sync.set_settings(&input).await;
    if args.save {
        config::save_settings(&config_path, &settings)?;
        info!(path = %config_path.display(), "Settings saved");
    }
    if !settings.is_active() {
        warn!("Sync is disabled; pass --server and/or --client (or enable it in the settings file)");
    }
    info!(
        instance_id = sync.instance_id(),
        summary = %sync.status().summary(),
        "director-syncd started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => broadcast_line(&sync, &line),
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!(?e, "Failed to read stdin");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    sync.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_sync_core::normalize;

    #[test]
    fn test_flags_override_file() {
        let args = Args::parse_from([
            "director-syncd",
            "--client",
            "-H",
            "10.0.0.9",
            "--remote-port",
            "20001",
            "--no-auto-connect",
        ]);
        let file = json!({ "serverEnabled": true, "remoteHost": "old-host", "listenPort": 20000 });

        let settings = normalize(&apply_overrides(file, &args));
        assert!(settings.server_enabled);
        assert!(settings.client_enabled);
        assert_eq!(settings.listen_port, 20000);
        assert_eq!(settings.remote_host, "10.0.0.9");
        assert_eq!(settings.remote_port, 20001);
        assert!(!settings.auto_connect);
    }

    #[test]
    fn test_no_flags_keep_file() {
        let args = Args::parse_from(["director-syncd"]);
        let file = json!({ "enabled": true });
        assert_eq!(apply_overrides(file.clone(), &args), file);
    }
}
