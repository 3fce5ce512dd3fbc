//! `cloister-ctl` — thin operator CLI for inspecting a running Guardian.
//!
//! Talks to the Approval Server's unauthenticated loopback HTTP surface
//! for live state, and reads the Decision Store / Token Registry
//! directories directly for anything the HTTP surface doesn't expose.
//! Carries no business logic of its own.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloister_guardian::config::GuardianConfig;
use cloister_guardian::decision::DecisionStore;
use cloister_guardian::token::TokenRegistry;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cloister-ctl", about = "Inspect a running Cloister Guardian")]
struct Cli {
    #[arg(long, env = "CLOISTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending approval requests.
    Pending,
    /// List decisions recorded for a project (or global if omitted).
    Decisions {
        project: Option<String>,
    },
    /// List registered tokens.
    Tokens,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{} {}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = GuardianConfig::resolve_path(cli.config);
    let config = GuardianConfig::load(&config_path)?;

    match cli.command {
        Commands::Pending => show_pending(&config).await,
        Commands::Decisions { project } => show_decisions(&config, project.as_deref()),
        Commands::Tokens => show_tokens(&config),
    }
}

async fn show_pending(config: &GuardianConfig) -> Result<()> {
    let url = format!("http://{}/pending", config.approval_server.listen_addr);
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach approval server at {url}"))?;
    let body: serde_json::Value = resp.json().await.context("failed to parse approval server response")?;

    let requests = body.as_array().cloned().unwrap_or_default();
    if requests.is_empty() {
        println!("no pending approvals");
        return Ok(());
    }
    for req in requests {
        println!(
            "{} {} {} {}",
            req.get("id").and_then(|v| v.as_str()).unwrap_or("?").dimmed(),
            req.get("kind").and_then(|v| v.as_str()).unwrap_or("?").bold(),
            req.get("project").and_then(|v| v.as_str()).unwrap_or("?"),
            req.get("target").and_then(|v| v.as_str()).unwrap_or("?"),
        );
    }
    Ok(())
}

fn show_decisions(config: &GuardianConfig, project: Option<&str>) -> Result<()> {
    let store = DecisionStore::new(&config.config_dir);
    let decisions = match project {
        Some(p) => store.load_project(p)?,
        None => store.load_global()?,
    };

    println!("{}: {:?}", "domains".green(), decisions.domains);
    println!("{}: {:?}", "patterns".green(), decisions.patterns);
    println!("{}: {:?}", "denied_domains".red(), decisions.denied_domains);
    println!("{}: {:?}", "denied_patterns".red(), decisions.denied_patterns);
    Ok(())
}

fn show_tokens(config: &GuardianConfig) -> Result<()> {
    let token_dir = config.config_dir.join("tokens");
    let registry = TokenRegistry::new(&token_dir);
    let count = registry.rehydrate()?;
    println!("{} token(s) registered under {}", count, token_dir.display());
    Ok(())
}
