//! Approval Server — HTTP + SSE surface over the Approval Queue.
//!
//! Binds to loopback by default; the operator UI is not authenticated by
//! design (§4.4 of the design notes) since it is not reachable from the
//! container network.

use crate::approval::queue::{ApprovalQueue, QueueEvent};
use crate::approval::types::{CommandResolution, DomainResolution, Kind, Resolution};
use crate::approval::ui::INDEX_HTML;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

#[derive(Clone)]
pub struct ApprovalServerState {
    pub queue: Arc<ApprovalQueue>,
}

pub fn router(queue: Arc<ApprovalQueue>) -> Router {
    let state = ApprovalServerState { queue };
    Router::new()
        .route("/", get(index))
        .route("/events", get(events))
        .route("/pending", get(pending))
        .route("/approve-domain/:id", post(approve_domain))
        .route("/deny-domain/:id", post(deny_domain))
        .route("/approve-command/:id", post(approve_command))
        .route("/deny-command/:id", post(deny_command))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, queue: Arc<ApprovalQueue>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(queue)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn pending(State(state): State<ApprovalServerState>) -> impl IntoResponse {
    Json(state.queue.snapshot())
}

async fn events(
    State(state): State<ApprovalServerState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let snapshot = state.queue.snapshot();
    let snapshot_event = Event::default().data(
        json!({ "type": "snapshot", "requests": snapshot }).to_string(),
    );

    let rx = state.queue.subscribe();
    let tail = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(QueueEvent::Added(req)) => Some(Ok(Event::default().data(
            json!({ "type": "added", "request": req }).to_string(),
        ))),
        Ok(QueueEvent::Removed(id)) => Some(Ok(Event::default().data(
            json!({ "type": "removed", "id": id }).to_string(),
        ))),
        // a lagged subscriber drops events and relies on a fresh `/pending`
        // fetch on reconnect, per the approval queue's pub/sub contract
        Err(_) => None,
    });

    let stream = tokio_stream::once(Ok(snapshot_event)).chain(tail);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn approve_domain(
    State(state): State<ApprovalServerState>,
    Path(id): Path<String>,
    Json(body): Json<DomainResolution>,
) -> impl IntoResponse {
    resolve_one(&state, &id, Kind::Domain, Resolution::Approved {
        scope: body.scope,
        wildcard: body.wildcard,
        user: None,
    })
}

async fn deny_domain(
    State(state): State<ApprovalServerState>,
    Path(id): Path<String>,
    Json(body): Json<DomainResolution>,
) -> impl IntoResponse {
    resolve_one(&state, &id, Kind::Domain, Resolution::Denied {
        reason: None,
        scope: Some(body.scope),
        wildcard: body.wildcard,
    })
}

async fn approve_command(
    State(state): State<ApprovalServerState>,
    Path(id): Path<String>,
    Json(body): Json<CommandResolution>,
) -> impl IntoResponse {
    resolve_one(&state, &id, Kind::Command, Resolution::Approved {
        scope: crate::decision::Scope::Once,
        wildcard: false,
        user: body.user,
    })
}

async fn deny_command(
    State(state): State<ApprovalServerState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    resolve_one(&state, &id, Kind::Command, Resolution::Denied {
        reason: None,
        scope: None,
        wildcard: false,
    })
}

fn resolve_one(
    state: &ApprovalServerState,
    id: &str,
    _expected_kind: Kind,
    resolution: Resolution,
) -> axum::response::Response {
    if state.queue.resolve(id, resolution) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::types::PendingRequest;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_pending_snapshot_and_resolve() {
        let queue = Arc::new(ApprovalQueue::new());
        let (id, rx) = queue.enqueue(Kind::Domain, "acme".into(), "c1".into(), "example.com".into());
        let app = router(queue.clone());

        let resp = app
            .clone()
            .oneshot(Request::get("/pending").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                Request::post(format!("/approve-domain/{id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"scope":"session"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resolution = rx.await.unwrap();
        assert!(matches!(resolution, Resolution::Approved { .. }));
    }

    #[tokio::test]
    async fn test_unknown_id_returns_404() {
        let queue = Arc::new(ApprovalQueue::new());
        let app = router(queue);
        let resp = app
            .oneshot(
                Request::post("/deny-domain/does-not-exist")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"scope":"once"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[allow(dead_code)]
    fn _type_check(_: PendingRequest) {}
}
