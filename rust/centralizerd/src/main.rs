mod catalog;
mod centralize;
mod collaborators;
mod config;
mod db;
mod error;
mod ipc;
mod ledger;
mod model;
mod settings;
mod stats;

use std::io::{self, BufRead, Write};

use config::DaemonConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(cfg: &DaemonConfig) {
    let filter =
        EnvFilter::try_new(&cfg.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries IPC responses; logs go to stderr only.
    if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(io::stderr),
            )
            .init();
    }
}

fn main() {
    let cfg = DaemonConfig::from_env();
    init_tracing(&cfg);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        busy_timeout: cfg.busy_timeout,
    };
    if let Some(path) = cfg.workspace.clone() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            tracing::error!(error = ?e, "failed to open CENTRALIZERD_WORKSPACE");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "centralizerd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, shutting down");
}
