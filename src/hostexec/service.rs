//! Host-Exec Service — the `POST /exec` surface reachable from inside a
//! container, sitting in front of the Host Executor Daemon.

use crate::approval::{ApprovalQueue, Kind as ApprovalKind, Resolution};
use crate::audit::AuditLogger;
use crate::error::GuardianError;
use crate::hostexec::client::DaemonClient;
use crate::hostexec::protocol::{ExecRequest, ExecResponse, ExecStatus, ExecuteRequest};
use crate::token::TokenRegistry;
use crate::utils::paths::CompiledMatcher;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct HostExecConfig {
    pub listen_addr: SocketAddr,
    pub approval_timeout: Duration,
}

pub struct HostExecService {
    config: HostExecConfig,
    tokens: Arc<TokenRegistry>,
    queue: Arc<ApprovalQueue>,
    audit: Arc<AuditLogger>,
    client: DaemonClient,
    /// Per-project auto-approve command patterns, compiled once at load.
    auto_approve: HashMap<String, CompiledMatcher>,
}

#[derive(Clone)]
struct ServiceState(Arc<HostExecService>);

impl HostExecService {
    pub fn new(
        config: HostExecConfig,
        tokens: Arc<TokenRegistry>,
        queue: Arc<ApprovalQueue>,
        audit: Arc<AuditLogger>,
        client: DaemonClient,
        auto_approve: HashMap<String, Vec<String>>,
    ) -> anyhow::Result<Self> {
        let mut compiled = HashMap::new();
        for (project, patterns) in auto_approve {
            compiled.insert(project, CompiledMatcher::new(&patterns)?);
        }
        Ok(Self { config, tokens, queue, audit, client, auto_approve: compiled })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/exec", post(exec_handler))
            .with_state(ServiceState(self))
    }

    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "host-exec service listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    fn matches_auto_approve(&self, project: &str, command: &str) -> Option<&str> {
        self.auto_approve
            .get(project)
            .filter(|m| m.matches(command))
            .map(|_| "configured")
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

fn shell_quote(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.chars().any(|c| c.is_whitespace() || "\"'$`\\".contains(c)) {
                format!("'{}'", a.replace('\'', "'\\''"))
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[tracing::instrument(skip(service, headers, body), fields(token, project, container))]
async fn exec_handler(
    State(ServiceState(service)): State<ServiceState>,
    headers: HeaderMap,
    Json(body): Json<ExecRequest>,
) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, Json(ExecResponse::denied("missing bearer token")));
    };
    let token_prefix: String = token.chars().take(8).collect();
    tracing::Span::current().record("token", tracing::field::display(&token_prefix));

    let Some(binding) = service.tokens.lookup(&token) else {
        return (StatusCode::FORBIDDEN, Json(ExecResponse::denied("bad token")));
    };
    tracing::Span::current().record("project", tracing::field::display(&binding.project));
    tracing::Span::current().record("container", tracing::field::display(&binding.container));

    let cmd_str = shell_quote(&body.argv);
    let started = Instant::now();
    let branch = "unknown"; // not tracked by the token binding; recorded as-is

    let Some((command, args)) = body.argv.split_first() else {
        return (StatusCode::BAD_REQUEST, Json(ExecResponse::error("empty argv")));
    };

    let approved_via_pattern = service.matches_auto_approve(&binding.project, &cmd_str);

    let approved = if let Some(pattern) = approved_via_pattern {
        service.audit.hostexec_auto_approve(&binding.project, branch, &binding.container, &cmd_str, pattern);
        true
    } else {
        service.audit.hostexec_request(&binding.project, branch, &binding.container, &cmd_str);
        let (id, rx) = service.queue.enqueue(
            ApprovalKind::Command,
            binding.project.clone(),
            binding.container.clone(),
            cmd_str.clone(),
        );

        match tokio::time::timeout(service.config.approval_timeout, rx).await {
            Ok(Ok(Resolution::Approved { user, .. })) => {
                let user = user.unwrap_or_else(|| "operator".to_string());
                service.audit.hostexec_approve(&binding.project, branch, &binding.container, &cmd_str, &user);
                true
            }
            Ok(Ok(Resolution::Denied { reason, .. })) => {
                let reason = reason.unwrap_or_else(|| "denied".to_string());
                service.audit.hostexec_deny(&binding.project, branch, &binding.container, &cmd_str, &reason);
                return (StatusCode::OK, Json(ExecResponse::denied(reason)));
            }
            Ok(Ok(Resolution::TimedOut)) | Err(_) => {
                service.queue.resolve(&id, Resolution::TimedOut);
                service.audit.hostexec_timeout(&binding.project, branch, &binding.container, &cmd_str);
                return (
                    StatusCode::OK,
                    Json(ExecResponse {
                        status: ExecStatus::Denied,
                        exit_code: None,
                        stdout: None,
                        stderr: None,
                        error: Some(GuardianError::ApprovalTimeout.to_string()),
                    }),
                );
            }
            Ok(Err(_dropped)) => {
                service.audit.hostexec_deny(&binding.project, branch, &binding.container, &cmd_str, "operator_disconnected");
                return (StatusCode::OK, Json(ExecResponse::denied("operator_disconnected")));
            }
        }
    };

    if !approved {
        return (StatusCode::OK, Json(ExecResponse::denied("denied")));
    }

    let daemon_request = ExecuteRequest {
        command: command.clone(),
        args: args.to_vec(),
        workdir: body.cwd,
        env: body.env,
        timeout_ms: body.timeout_ms,
    };

    match service.client.execute(daemon_request).await {
        Ok(resp) if resp.success => {
            let result = resp.response.unwrap();
            service.audit.hostexec_complete(
                &binding.project,
                branch,
                &binding.container,
                &cmd_str,
                result.exit_code,
                started.elapsed(),
            );
            (
                StatusCode::OK,
                Json(ExecResponse {
                    status: result.status,
                    exit_code: Some(result.exit_code),
                    stdout: Some(result.stdout),
                    stderr: Some(result.stderr),
                    error: result.error,
                }),
            )
        }
        Ok(resp) => (
            StatusCode::OK,
            Json(ExecResponse::error(resp.error.unwrap_or_else(|| GuardianError::DaemonUnavailable.to_string()))),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "host executor unreachable");
            (StatusCode::OK, Json(ExecResponse::error(GuardianError::DaemonUnavailable.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote(&["git".to_string(), "status".to_string()]), "git status");
    }

    #[test]
    fn test_shell_quote_quotes_whitespace() {
        assert_eq!(
            shell_quote(&["echo".to_string(), "hello world".to_string()]),
            "echo 'hello world'"
        );
    }
}
