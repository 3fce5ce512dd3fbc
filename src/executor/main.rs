//! `cloister-executor` — the Host Executor Daemon binary.
//!
//! A separate host-side process from the main Guardian: it is the only
//! thing in this system allowed to run arbitrary host commands, so it
//! gets its own process boundary, its own Unix socket, and a freshly
//! generated shared secret per run.

use anyhow::{Context, Result};
use clap::Parser;
use cloister_guardian::hostexec::{DaemonState, ExecutorDaemon};
use cloister_guardian::token::TokenRegistry;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cloister-executor", about = "Host Executor Daemon for Cloister Guardian")]
struct Args {
    /// Unix socket path to listen on.
    #[arg(long, env = "CLOISTER_EXECUTOR_SOCKET")]
    socket: Option<PathBuf>,

    /// Instance id suffix, for running multiple daemons side by side in tests.
    #[arg(long, env = "CLOISTER_INSTANCE_ID")]
    instance_id: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CLOISTER_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("cloister-executor: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("cloister");
    std::fs::create_dir_all(&data_dir).context("failed to create data dir")?;

    let suffix = args.instance_id.as_deref().unwrap_or("");
    let state_name = if suffix.is_empty() { "executor.json".to_string() } else { format!("executor-{suffix}.json") };
    let state_path = data_dir.join(state_name);

    gc_stale_state(&state_path);

    let socket_path = args.socket.unwrap_or_else(|| data_dir.join("executor.sock"));
    let secret = TokenRegistry::generate();

    let state = DaemonState {
        pid: std::process::id(),
        secret: secret.clone(),
        tcp_port: None,
        token_api_port: None,
        approval_port: None,
        socket_path: socket_path.to_string_lossy().to_string(),
    };
    write_state(&state_path, &state)?;

    let daemon = Arc::new(ExecutorDaemon::new(&socket_path, secret));

    let shutdown_path = state_path.clone();
    let result = tokio::select! {
        res = daemon.serve() => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    let _ = std::fs::remove_file(&shutdown_path);
    let _ = std::fs::remove_file(&socket_path);
    result
}

/// Remove a stale state file left by a daemon whose process no longer
/// exists (best-effort: `kill -0` failing is the only portable signal).
fn gc_stale_state(path: &PathBuf) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(state) = serde_json::from_str::<DaemonState>(&content) else {
        let _ = std::fs::remove_file(path);
        return;
    };
    if !process_alive(state.pid) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(&state.socket_path);
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn write_state(path: &PathBuf, state: &DaemonState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    std::fs::write(path, json).with_context(|| format!("failed to write daemon state: {}", path.display()))?;
    set_owner_only(path)
}

#[cfg(unix)]
fn set_owner_only(path: &PathBuf) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &PathBuf) -> Result<()> {
    Ok(())
}
