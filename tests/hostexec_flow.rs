//! End-to-end exercise of the Host-Exec Service fronting a real Host
//! Executor Daemon over a Unix socket: auto-approved commands execute and
//! return real output, while unregistered tokens are rejected before ever
//! reaching the queue or the daemon.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cloister_guardian::approval::ApprovalQueue;
use cloister_guardian::audit::AuditLogger;
use cloister_guardian::hostexec::{DaemonClient, ExecutorDaemon, HostExecConfig, HostExecService};
use cloister_guardian::token::TokenRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn spawn_daemon() -> (std::path::PathBuf, String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("executor.sock");
    let secret = "test-secret".to_string();
    let daemon = Arc::new(ExecutorDaemon::new(&socket_path, secret.clone()));
    tokio::spawn(daemon.serve());
    tokio::time::sleep(Duration::from_millis(50)).await;
    (socket_path, secret, dir)
}

fn exec_body(argv: &[&str], cwd: &std::path::Path) -> String {
    serde_json::json!({
        "argv": argv,
        "cwd": cwd.to_string_lossy(),
        "env": {},
        "timeout_ms": 5000,
    })
    .to_string()
}

#[tokio::test]
async fn auto_approved_command_runs_via_daemon() {
    let (socket_path, secret, _daemon_dir) = spawn_daemon().await;
    let work_dir = tempfile::tempdir().unwrap();

    let config_dir = tempfile::tempdir().unwrap();
    let tokens = Arc::new(TokenRegistry::new(config_dir.path().join("tokens")));
    tokens.register("tok1", "container-a", "acme").unwrap();

    let mut auto_approve = HashMap::new();
    auto_approve.insert("acme".to_string(), vec!["echo*".to_string()]);

    let client = DaemonClient::new(&socket_path, secret);
    let service = Arc::new(
        HostExecService::new(
            HostExecConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                approval_timeout: Duration::from_millis(500),
            },
            tokens,
            Arc::new(ApprovalQueue::new()),
            Arc::new(AuditLogger::null()),
            client,
            auto_approve,
        )
        .unwrap(),
    );

    let app = service.router();
    let resp = app
        .oneshot(
            Request::post("/exec")
                .header("authorization", "Bearer tok1")
                .header("content-type", "application/json")
                .body(Body::from(exec_body(&["echo", "hello-guardian"], work_dir.path())))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "completed");
    assert_eq!(parsed["exit_code"], 0);
    assert!(parsed["stdout"].as_str().unwrap().contains("hello-guardian"));
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_before_daemon() {
    let (socket_path, secret, _daemon_dir) = spawn_daemon().await;
    let config_dir = tempfile::tempdir().unwrap();
    let tokens = Arc::new(TokenRegistry::new(config_dir.path().join("tokens")));
    let client = DaemonClient::new(&socket_path, secret);

    let service = Arc::new(
        HostExecService::new(
            HostExecConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                approval_timeout: Duration::from_millis(500),
            },
            tokens,
            Arc::new(ApprovalQueue::new()),
            Arc::new(AuditLogger::null()),
            client,
            HashMap::new(),
        )
        .unwrap(),
    );

    let app = service.router();
    let resp = app
        .oneshot(
            Request::post("/exec")
                .header("content-type", "application/json")
                .body(Body::from(exec_body(&["echo", "hi"], std::path::Path::new("/tmp"))))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_token_is_forbidden() {
    let (socket_path, secret, _daemon_dir) = spawn_daemon().await;
    let config_dir = tempfile::tempdir().unwrap();
    let tokens = Arc::new(TokenRegistry::new(config_dir.path().join("tokens")));
    let client = DaemonClient::new(&socket_path, secret);

    let service = Arc::new(
        HostExecService::new(
            HostExecConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                approval_timeout: Duration::from_millis(500),
            },
            tokens,
            Arc::new(ApprovalQueue::new()),
            Arc::new(AuditLogger::null()),
            client,
            HashMap::new(),
        )
        .unwrap(),
    );

    let app = service.router();
    let resp = app
        .oneshot(
            Request::post("/exec")
                .header("authorization", "Bearer does-not-exist")
                .header("content-type", "application/json")
                .body(Body::from(exec_body(&["echo", "hi"], std::path::Path::new("/tmp"))))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
