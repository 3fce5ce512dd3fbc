//! Egress Proxy — a CONNECT-only HTTP proxy.
//!
//! Parses the CONNECT request line and headers by hand off a buffered
//! async reader, matching this codebase's line-oriented socket handling
//! elsewhere rather than pulling in a general HTTP server framework for a
//! single-verb protocol. Accepts only `CONNECT host:port HTTP/1.1`; any
//! other verb gets a `400` and the connection is closed — the Guardian
//! never proxies cleartext HTTP.

use crate::approval::{ApprovalQueue, Kind as ApprovalKind, Resolution};
use crate::audit::AuditLogger;
use crate::decision::{Decision, DecisionCache, Kind as DecisionKind, Scope, Verdict};
use crate::error::GuardianError;
use crate::token::TokenRegistry;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub allowed_port: u16,
    pub approval_timeout: Duration,
}

pub struct EgressProxy {
    config: ProxyConfig,
    tokens: Arc<TokenRegistry>,
    cache: Arc<DecisionCache>,
    queue: Arc<ApprovalQueue>,
    audit: Arc<AuditLogger>,
}

impl EgressProxy {
    pub fn new(
        config: ProxyConfig,
        tokens: Arc<TokenRegistry>,
        cache: Arc<DecisionCache>,
        queue: Arc<ApprovalQueue>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self { config, tokens, cache, queue, audit }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind proxy listener on {}", self.config.listen_addr))?;
        tracing::info!(addr = %self.config.listen_addr, "egress proxy listening");

        loop {
            let (stream, _peer) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(stream).await {
                    tracing::debug!(error = %err, "connect handling failed");
                }
            });
        }
    }

    #[tracing::instrument(skip(self, stream), fields(token, project, container))]
    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let started = Instant::now();
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }
        let request_line = request_line.trim_end();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            if line.is_empty() {
                break;
            }
            headers.push(line);
        }

        let mut stream = reader.into_inner();

        let Some((host, port)) = parse_connect_authority(request_line) else {
            write_response(&mut stream, 400, "Bad Request").await?;
            return Ok(());
        };

        let token = match extract_bearer_token(&headers) {
            Some(t) => t,
            None => {
                write_response(&mut stream, 407, "Proxy Authentication Required").await?;
                return Ok(());
            }
        };

        let token_prefix: String = token.chars().take(8).collect();
        tracing::Span::current().record("token", tracing::field::display(&token_prefix));

        let binding = match self.tokens.lookup(&token) {
            Some(b) => b,
            None => {
                let err = GuardianError::BadToken { token_prefix };
                self.audit.proxy_deny("unknown", &host, err.reason_tag(), None);
                write_response(&mut stream, 403, "Forbidden").await?;
                return Ok(());
            }
        };
        tracing::Span::current().record("project", tracing::field::display(&binding.project));
        tracing::Span::current().record("container", tracing::field::display(&binding.container));

        if host.is_empty() || port != self.config.allowed_port {
            // distinct from a decision-cache rule deny: the wire contract's
            // reason=policy covers port/host validation specifically
            self.audit.proxy_deny(&binding.project, &host, "policy", None);
            write_response(&mut stream, 403, "Forbidden").await?;
            return Ok(());
        }

        let verdict = self.cache.evaluate(&binding.project, &host, &token)?;
        let outcome = match verdict {
            Verdict::Allow => {
                self.audit.proxy_auto_approve(&binding.project, &host);
                ApprovalOutcome::Allow
            }
            Verdict::Deny => {
                let err = GuardianError::PolicyDeny { reason: "static rule".to_string() };
                self.audit.proxy_deny(&binding.project, &host, err.reason_tag(), None);
                ApprovalOutcome::Deny
            }
            Verdict::Unknown => {
                self.await_approval(&binding.project, &binding.container, &token, &host).await?
            }
        };

        match outcome {
            ApprovalOutcome::Deny => {
                write_response(&mut stream, 403, "Forbidden").await?;
                return Ok(());
            }
            ApprovalOutcome::Timeout => {
                write_response(&mut stream, 504, "Gateway Timeout").await?;
                return Ok(());
            }
            ApprovalOutcome::Allow => {}
        }

        write_response(&mut stream, 200, "Connection Established").await?;
        let (host_for_splice, port_for_splice) = (host.clone(), port);
        let project = binding.project.clone();
        let splice_result = splice(stream, &host_for_splice, port_for_splice).await;
        self.audit.proxy_complete(&project, &host, started.elapsed());
        splice_result
    }

    /// Enqueue a domain approval and block until the queue resolves it or
    /// the server-side timeout elapses. A timeout is distinct from an
    /// operator denial: the caller maps it to its own status code (504
    /// rather than 403) since nobody actually made a deny decision.
    async fn await_approval(
        &self,
        project: &str,
        container: &str,
        token: &str,
        host: &str,
    ) -> Result<ApprovalOutcome> {
        let (id, rx) = self.queue.enqueue(
            ApprovalKind::Domain,
            project.to_string(),
            container.to_string(),
            host.to_string(),
        );

        let resolution = tokio::time::timeout(self.config.approval_timeout, rx).await;
        match resolution {
            Ok(Ok(Resolution::Approved { scope, wildcard, .. })) => {
                self.cache.apply(project, token, Decision {
                    kind: DecisionKind::Allow,
                    host: host.to_string(),
                    scope,
                    wildcard,
                })?;
                self.audit.proxy_approve(project, host, scope);
                Ok(ApprovalOutcome::Allow)
            }
            Ok(Ok(Resolution::Denied { reason, scope, wildcard })) => {
                if let Some(scope) = scope {
                    self.cache.apply(project, token, Decision {
                        kind: DecisionKind::Deny,
                        host: host.to_string(),
                        scope,
                        wildcard,
                    })?;
                }
                let err = GuardianError::PolicyDeny {
                    reason: reason.unwrap_or_else(|| "operator denied".to_string()),
                };
                self.audit.proxy_deny(project, host, err.reason_tag(), None);
                Ok(ApprovalOutcome::Deny)
            }
            Ok(Ok(Resolution::TimedOut)) | Err(_) => {
                self.queue.resolve(&id, Resolution::TimedOut);
                let err = GuardianError::ApprovalTimeout;
                tracing::debug!(reason = err.reason_tag(), project, host, "approval wait timed out");
                self.audit.proxy_timeout(project, host);
                Ok(ApprovalOutcome::Timeout)
            }
            Ok(Err(_recv_dropped)) => {
                // sender side was dropped without resolving; treat as deny
                let err = GuardianError::PolicyDeny { reason: "waiter disconnected".to_string() };
                self.audit.proxy_deny(project, host, err.reason_tag(), None);
                Ok(ApprovalOutcome::Deny)
            }
        }
    }
}

/// Outcome of waiting on an approval decision, distinct from a plain bool
/// so the caller can tell a timeout apart from an operator's explicit deny.
enum ApprovalOutcome {
    Allow,
    Deny,
    Timeout,
}

fn parse_connect_authority(request_line: &str) -> Option<(String, u16)> {
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    if !method.eq_ignore_ascii_case("CONNECT") {
        return None;
    }
    let authority = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let (host, port_str) = authority.rsplit_once(':')?;
    let port: u16 = port_str.parse().ok()?;
    Some((host.to_string(), port))
}

fn extract_bearer_token(headers: &[String]) -> Option<String> {
    headers.iter().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("Proxy-Authorization") {
            return None;
        }
        value.trim().strip_prefix("Bearer ").map(|t| t.trim().to_string())
    })
}

async fn write_response(stream: &mut TcpStream, code: u16, reason: &str) -> Result<()> {
    let body = format!("{code} {reason}\n");
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

async fn splice(mut client: TcpStream, host: &str, port: u16) -> Result<()> {
    let mut upstream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect upstream {host}:{port}"))?;

    let (mut client_r, mut client_w) = client.split();
    let (mut upstream_r, mut upstream_w) = upstream.split();

    let client_to_upstream = tokio::io::copy(&mut client_r, &mut upstream_w);
    let upstream_to_client = tokio::io::copy(&mut upstream_r, &mut client_w);

    tokio::select! {
        res = client_to_upstream => { res?; }
        res = upstream_to_client => { res?; }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_authority() {
        assert_eq!(
            parse_connect_authority("CONNECT api.anthropic.com:443 HTTP/1.1"),
            Some(("api.anthropic.com".to_string(), 443))
        );
        assert_eq!(parse_connect_authority("GET / HTTP/1.1"), None);
        assert_eq!(parse_connect_authority("CONNECT badauthority HTTP/1.1"), None);
    }

    #[test]
    fn test_extract_bearer_token() {
        let headers = vec!["Proxy-Authorization: Bearer abc123".to_string()];
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));
        assert_eq!(extract_bearer_token(&[]), None);
    }
}
