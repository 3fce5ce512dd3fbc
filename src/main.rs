//! `cloister` — the primary Guardian process.
//!
//! Parses CLI arguments, loads configuration, wires the Token Registry,
//! Decision Cache, Audit Logger, Approval Queue, Host-Exec Service, Egress
//! Proxy, and Approval Server together in that order, and runs until a
//! shutdown signal arrives.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloister_guardian::approval::{ApprovalQueue, server as approval_server};
use cloister_guardian::audit::{self, AuditLogger};
use cloister_guardian::config::GuardianConfig;
use cloister_guardian::decision::{DecisionCache, DecisionStore};
use cloister_guardian::hostexec::{DaemonClient, DaemonState, HostExecConfig, HostExecService};
use cloister_guardian::proxy::{EgressProxy, ProxyConfig};
use cloister_guardian::token::TokenRegistry;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "cloister",
    version,
    about = "Network egress mediation and host-command approval for sandboxed AI coding agents"
)]
struct Cli {
    /// Path to the Guardian config file.
    #[arg(long, env = "CLOISTER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Guardian (proxy + host-exec + approval server).
    Run {
        /// Override the egress proxy's listen address.
        #[arg(long)]
        proxy_listen: Option<String>,
        /// Override the host-exec service's listen address.
        #[arg(long)]
        hostexec_listen: Option<String>,
        /// Override the approval server's listen address.
        #[arg(long)]
        approval_listen: Option<String>,
    },

    /// Show Guardian status (config summary, registered token count).
    Status,

    /// Manage container tokens.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Generate and register a new token for a container.
    Register {
        container: String,
        project: String,
    },
    /// Revoke a token.
    Revoke {
        token: String,
    },
    /// List registered tokens.
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = GuardianConfig::resolve_path(cli.config.clone());
    let config = match GuardianConfig::load(&config_path) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{} failed to load config: {err}", "✗".red().bold());
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    let result = match cli.command {
        None => run_guardian(config, None, None, None).await,
        Some(Commands::Run { proxy_listen, hostexec_listen, approval_listen }) => {
            run_guardian(config, proxy_listen, hostexec_listen, approval_listen).await
        }
        Some(Commands::Status) => show_status(&config),
        Some(Commands::Token { action }) => run_token_command(&config, action),
    };

    if let Err(err) = result {
        eprintln!();
        eprintln!("  {} {}", "✗".red().bold(), err);
        for cause in err.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".dimmed(), cause);
        }
        eprintln!();
        std::process::exit(1);
    }
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("CLOISTER_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Init order: Audit Logger, Token Registry, Decision Cache, Approval
/// Queue, Host-Exec Service, Egress Proxy, Approval Server.
async fn run_guardian(
    mut config: GuardianConfig,
    proxy_listen: Option<String>,
    hostexec_listen: Option<String>,
    approval_listen: Option<String>,
) -> Result<()> {
    if let Some(addr) = proxy_listen {
        config.proxy.listen_addr = addr.parse().context("invalid --proxy-listen address")?;
    }
    if let Some(addr) = hostexec_listen {
        config.hostexec.listen_addr = addr.parse().context("invalid --hostexec-listen address")?;
    }
    if let Some(addr) = approval_listen {
        config.approval_server.listen_addr = addr.parse().context("invalid --approval-listen address")?;
    }

    std::fs::create_dir_all(&config.config_dir).context("failed to create config dir")?;
    std::fs::create_dir_all(&config.data_dir).context("failed to create data dir")?;

    let audit_path = audit::logger::default_audit_path(&config.data_dir);
    let audit = Arc::new(AuditLogger::open(&audit_path).context("failed to open audit sink")?);

    let token_dir = config.config_dir.join("tokens");
    let tokens = Arc::new(TokenRegistry::new(&token_dir));
    let rehydrated = tokens.rehydrate().context("failed to rehydrate token registry")?;
    tracing::info!(count = rehydrated, "rehydrated tokens from disk");

    let store = DecisionStore::new(&config.config_dir);
    store.migrate_legacy_dir().context("failed to migrate legacy decisions dir")?;
    let cache = Arc::new(DecisionCache::new(store, config.proxy.allow.clone()));

    let queue = Arc::new(ApprovalQueue::new());

    let executor_secret = std::env::var("CLOISTER_EXECUTOR_SECRET").unwrap_or_default();
    let daemon_client = DaemonClient::new(&config.executor.socket_path, executor_secret);
    let hostexec = Arc::new(
        HostExecService::new(
            HostExecConfig {
                listen_addr: config.hostexec.listen_addr,
                approval_timeout: Duration::from_secs(config.hostexec.approval_timeout_secs),
            },
            tokens.clone(),
            queue.clone(),
            audit.clone(),
            daemon_client,
            config.hostexec.auto_approve.clone(),
        )
        .context("failed to compile host-exec auto-approve patterns")?,
    );

    let proxy = Arc::new(EgressProxy::new(
        ProxyConfig {
            listen_addr: config.proxy.listen_addr,
            allowed_port: config.proxy.allowed_port,
            approval_timeout: Duration::from_secs(config.proxy.approval_timeout_secs),
        },
        tokens.clone(),
        cache.clone(),
        queue.clone(),
        audit.clone(),
    ));

    tracing::info!("cloister guardian starting");

    let approval_addr = config.approval_server.listen_addr;
    let approval_queue = queue.clone();

    tokio::select! {
        res = proxy.serve() => res.context("egress proxy exited"),
        res = hostexec.serve() => res.context("host-exec service exited"),
        res = approval_server::serve(approval_addr, approval_queue) => res.context("approval server exited"),
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, closing pending approvals");
            queue.close();
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

fn show_status(config: &GuardianConfig) -> Result<()> {
    let token_dir = config.config_dir.join("tokens");
    let tokens = TokenRegistry::new(&token_dir);
    let count = tokens.rehydrate().unwrap_or(0);

    println!();
    println!("  {}  {}", "cloister".bold(), "guardian status".green());
    println!("  {}", "─".repeat(40).dimmed());

    match read_daemon_state() {
        Some(state) if process_alive(state.pid) => {
            println!("  Guardian:       {} (pid {})", "running".green(), state.pid);
            println!("  Socket:         {}", state.socket_path);
            if let Some(port) = state.tcp_port {
                println!("  TCP port:       {port}");
            }
            if let Some(port) = state.token_api_port {
                println!("  Token API port: {port}");
            }
            if let Some(port) = state.approval_port {
                println!("  Approval port:  {port}");
            }
        }
        Some(_) => println!("  Guardian:       {} (stale state file)", "not running".red()),
        None => println!("  Guardian:       {} (no state file found)", "not running".red()),
    }

    println!("  Config dir:     {}", config.config_dir.display());
    println!("  Data dir:       {}", config.data_dir.display());
    println!("  Tokens:         {count}");
    println!("  Proxy config:   {}", config.proxy.listen_addr);
    println!("  Host-exec cfg:  {}", config.hostexec.listen_addr);
    println!("  Approval cfg:   http://{}", config.approval_server.listen_addr);
    println!();
    Ok(())
}

/// Read the host executor daemon's state file, written by `cloister-executor`
/// at the same path it derives from the local data dir.
fn read_daemon_state() -> Option<DaemonState> {
    let data_dir = dirs::data_local_dir()?.join("cloister");
    let content = std::fs::read_to_string(data_dir.join("executor.json")).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn run_token_command(config: &GuardianConfig, action: TokenAction) -> Result<()> {
    let token_dir = config.config_dir.join("tokens");
    let registry = TokenRegistry::new(&token_dir);
    registry.rehydrate()?;

    match action {
        TokenAction::Register { container, project } => {
            let token = TokenRegistry::generate();
            registry.register(&token, &container, &project)?;
            println!("{}", token);
        }
        TokenAction::Revoke { token } => {
            if registry.revoke(&token) {
                println!("{} revoked", "✓".green());
            } else {
                println!("{} token not found", "✗".red());
                std::process::exit(1);
            }
        }
        TokenAction::List => {
            println!("{} token(s) registered", registry.count());
        }
    }
    Ok(())
}
