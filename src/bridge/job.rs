//! The unit of work flowing through the bridge.

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::error::SkillError;
use crate::journal::LateCompletion;

pub type JobId = u64;

/// What a request asks the execution thread to do.
///
/// Resolved from method and path alone; no host state is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Manifest,
    /// `POST /skill/{skill}`; the name keeps its original case.
    Invoke { skill: String },
    NotFound,
}

impl Route {
    pub fn resolve(method: &str, path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower == "/" || lower == "/health" {
            return Route::Health;
        }
        if lower == "/skills" && method.eq_ignore_ascii_case("GET") {
            return Route::Manifest;
        }
        if lower.starts_with("/skill/") && method.eq_ignore_ascii_case("POST") {
            return Route::Invoke {
                skill: path["/skill/".len()..].to_string(),
            };
        }
        Route::NotFound
    }

    /// Whether the rate limiter applies.
    pub fn is_invocation(&self) -> bool {
        matches!(self, Route::Invoke { .. })
    }
}

/// Status and JSON body delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: u16,
    pub body: Value,
}

impl Outcome {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn skill_error(skill: &str, err: &SkillError) -> Self {
        let mut body = json!({
            "status": "error",
            "skill": skill,
            "error": err.to_string(),
            "type": err.kind(),
        });
        match err {
            SkillError::NotFound { available, .. } => {
                body["availableSkills"] = json!(available);
            }
            SkillError::ArgumentBinding {
                parameter: Some(parameter),
                ..
            } => {
                body["parameter"] = json!(parameter);
            }
            _ => {}
        }
        Self::new(err.status_code(), body)
    }

    pub fn not_found() -> Self {
        Self::new(
            404,
            json!({
                "status": "error",
                "error": "Not found",
                "type": "NotFound",
                "endpoints": ["GET /health", "GET /skills", "POST /skill/{name}"],
            }),
        )
    }

    pub fn rate_limited(limit: u32) -> Self {
        Self::new(
            429,
            json!({
                "status": "error",
                "error": "Rate limit exceeded",
                "type": "RateLimited",
                "limit": limit,
                "suggestion": "Please slow down requests",
            }),
        )
    }

    pub fn queue_full(depth: usize) -> Self {
        Self::new(
            429,
            json!({
                "status": "error",
                "error": "Too many queued requests",
                "type": "QueueFull",
                "limit": depth,
                "suggestion": "Wait for pending requests to finish",
            }),
        )
    }

    pub fn server_stopped() -> Self {
        Self::new(
            503,
            json!({
                "status": "error",
                "error": "Server stopped",
                "type": "ServerStopped",
            }),
        )
    }

    pub fn gateway_timeout(waited: Duration) -> Self {
        Self::new(
            504,
            json!({
                "status": "error",
                "error": format!(
                    "Gateway Timeout: execution thread did not respond within {} seconds",
                    waited.as_secs_f64()
                ),
                "type": "GatewayTimeout",
                "suggestion": "The host may be paused or blocked by a modal dialog",
            }),
        )
    }

    pub fn internal(message: &str) -> Self {
        Self::new(
            500,
            json!({
                "status": "error",
                "error": message,
                "type": "Internal",
            }),
        )
    }
}

/// One inbound request awaiting execution.
///
/// The completion signal is a oneshot sender; [`Job::publish`] consumes the
/// job, so an outcome is published at most once and a published job can
/// never be re-queued.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    method: String,
    path: String,
    body: String,
    route: Route,
    enqueued_at: Instant,
    completion: oneshot::Sender<Outcome>,
}

impl Job {
    /// Capture a fully-read request. The receiver is the waiter's half of
    /// the completion signal.
    pub fn new(method: &str, path: &str, body: String) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let job = Self {
            id: 0,
            method: method.to_string(),
            path: path.to_string(),
            body,
            route: Route::resolve(method, path),
            enqueued_at: Instant::now(),
            completion: tx,
        };
        (job, rx)
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: JobId) {
        self.id = id;
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Deliver the outcome and set the completion signal.
    ///
    /// Returns the undelivered outcome as a [`LateCompletion`] when the
    /// waiter has already gone away.
    pub fn publish(self, outcome: Outcome) -> Option<LateCompletion> {
        let waited_ms = self.enqueued_at.elapsed().as_millis() as u64;
        match self.completion.send(outcome) {
            Ok(()) => None,
            Err(outcome) => Some(LateCompletion {
                job_id: self.id,
                method: self.method,
                path: self.path,
                status: outcome.status,
                body: outcome.body.to_string(),
                waited_ms,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_resolve_case_insensitively() {
        assert_eq!(Route::resolve("GET", "/"), Route::Health);
        assert_eq!(Route::resolve("POST", "/HEALTH"), Route::Health);
        assert_eq!(Route::resolve("GET", "/Skills"), Route::Manifest);
        assert_eq!(
            Route::resolve("POST", "/Skill/CreateCube"),
            Route::Invoke {
                skill: "CreateCube".to_string()
            }
        );
    }

    #[test]
    fn wrong_method_is_not_found() {
        assert_eq!(Route::resolve("POST", "/skills"), Route::NotFound);
        assert_eq!(Route::resolve("GET", "/skill/create_cube"), Route::NotFound);
        assert_eq!(Route::resolve("GET", "/nope"), Route::NotFound);
    }

    #[test]
    fn only_invocations_are_rate_limited() {
        assert!(Route::resolve("POST", "/skill/x").is_invocation());
        assert!(!Route::Health.is_invocation());
        assert!(!Route::Manifest.is_invocation());
    }

    #[tokio::test]
    async fn publish_reaches_waiter() {
        let (job, rx) = Job::new("GET", "/health", String::new());
        assert!(job.publish(Outcome::ok(json!({"status": "ok"}))).is_none());

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body["status"], "ok");
    }

    #[test]
    fn publish_without_waiter_is_late() {
        let (mut job, rx) = Job::new("POST", "/skill/slow", "{}".to_string());
        job.assign_id(42);
        drop(rx);

        let late = job.publish(Outcome::ok(json!({"status": "success"}))).unwrap();
        assert_eq!(late.job_id, 42);
        assert_eq!(late.path, "/skill/slow");
        assert_eq!(late.status, 200);
        assert!(late.body.contains("success"));
    }

    #[test]
    fn skill_error_payload_names_parameter() {
        let outcome = Outcome::skill_error("move", &SkillError::missing("x"));
        assert_eq!(outcome.status, 400);
        assert_eq!(outcome.body["parameter"], "x");
        assert_eq!(outcome.body["type"], "ArgumentBinding");
    }

    #[test]
    fn gateway_timeout_reports_wait() {
        let outcome = Outcome::gateway_timeout(Duration::from_secs(60));
        assert_eq!(outcome.status, 504);
        assert!(
            outcome.body["error"]
                .as_str()
                .unwrap()
                .contains("within 60 seconds")
        );
    }
}
