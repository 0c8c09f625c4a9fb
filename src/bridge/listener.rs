//! HTTP side of the bridge.
//!
//! Every request is captured as a [`Job`] and queued; the handler future
//! then acts as the job's waiter, parked on the completion signal with a
//! timeout. Handlers run on the I/O runtime and never touch host state.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::BridgeStats;
use super::job::{Job, Outcome, Route};
use super::queue::{JobQueue, Rejected};
use crate::error::SkillError;
use crate::events::{Event, EventBus};

const CORS_HEADERS: [(HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
];

#[derive(Clone)]
pub(crate) struct ListenerState {
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) stats: Arc<BridgeStats>,
    pub(crate) events: EventBus,
    pub(crate) wait_timeout: Duration,
    pub(crate) max_body_bytes: usize,
}

pub(crate) fn router(state: ListenerState) -> Router {
    let limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new().fallback(handle).layer(limit).with_state(state)
}

/// Serve until `shutdown` fires. In-flight requests are allowed to finish.
pub(crate) async fn serve(
    listener: TcpListener,
    state: ListenerState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn handle(
    State(state): State<ListenerState>,
    method: Method,
    uri: Uri,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method == Method::OPTIONS {
        return preflight();
    }
    BridgeStats::bump(&state.stats.received);

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(%method, path = uri.path(), error = %rejection, "request body refused");
            return respond(body_refused(&rejection));
        }
    };
    // Management routes ignore the body; invocations must get valid JSON text.
    let body = match String::from_utf8(Vec::from(body)) {
        Ok(text) => text,
        Err(e) => match Route::resolve(method.as_str(), uri.path()) {
            Route::Invoke { skill } => {
                let err = SkillError::malformed(format!("Request body is not valid UTF-8: {e}"));
                return respond(Outcome::skill_error(&skill, &err));
            }
            _ => String::new(),
        },
    };

    let (job, completion) = Job::new(method.as_str(), uri.path(), body);
    let path = job.path().to_string();

    let job_id = match state.queue.enqueue(job) {
        Ok(id) => id,
        Err(Rejected::Closed) => return respond(Outcome::server_stopped()),
        Err(Rejected::Full { depth }) => {
            warn!(%method, path = %path, depth, "queue full, refusing request");
            return respond(Outcome::queue_full(depth));
        }
    };
    trace!(job_id, %method, path = %path, "job queued");

    let outcome = match timeout(state.wait_timeout, completion).await {
        Ok(Ok(outcome)) => outcome,
        // Every dequeued or drained job is published, so this is a bug.
        Ok(Err(_)) => Outcome::internal("job dropped without an outcome"),
        Err(_) => {
            BridgeStats::bump(&state.stats.timed_out);
            warn!(job_id, path = %path, "execution thread did not answer in time");
            state.events.emit(Event::WaitTimedOut {
                job_id,
                path: path.clone(),
            });
            Outcome::gateway_timeout(state.wait_timeout)
        }
    };
    debug!(job_id, path = %path, status = outcome.status, "responding");
    respond(outcome)
}

fn body_refused(rejection: &BytesRejection) -> Outcome {
    let status = rejection.status();
    let kind = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "PayloadTooLarge"
    } else {
        "BadRequest"
    };
    Outcome::new(
        status.as_u16(),
        json!({
            "status": "error",
            "error": rejection.body_text(),
            "type": kind,
        }),
    )
}

fn preflight() -> Response {
    (StatusCode::NO_CONTENT, CORS_HEADERS).into_response()
}

fn respond(outcome: Outcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if outcome.body.is_null() {
        return (status, CORS_HEADERS).into_response();
    }
    (
        status,
        CORS_HEADERS,
        [(header::CONTENT_TYPE, "application/json")],
        outcome.body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_is_empty_with_cors() {
        let response = preflight();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
        assert_eq!(headers["access-control-allow-headers"], "Content-Type");
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn respond_sets_status_and_json() {
        let response = respond(Outcome::new(429, json!({"status": "error"})));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[test]
    fn invalid_status_falls_back_to_500() {
        let response = respond(Outcome::new(42, json!({})));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
