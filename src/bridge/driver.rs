//! The execution driver: the only code that touches host state.

use std::panic::{self, AssertUnwindSafe};

use serde_json::json;
use tracing::{debug, info, warn};

use super::job::{Job, Outcome, Route};
use super::rate_limit::RateLimiter;
use super::{BridgeStats, DriverContext};
use crate::consts::{SERVICE_NAME, VERSION};
use crate::error::SkillError;
use crate::events::Event;
use crate::skills::SkillRegistry;

/// Drains queued jobs on the host's thread, one batch per tick.
///
/// Owns the registry and the rate limiter outright. Neither needs to be
/// `Send`, which lets skills hold single-threaded host handles.
pub struct ExecutionDriver {
    ctx: DriverContext,
    registry: SkillRegistry,
    limiter: RateLimiter,
}

impl ExecutionDriver {
    pub fn new(ctx: DriverContext, mut registry: SkillRegistry) -> Self {
        registry.set_base_url(&ctx.url);
        info!(skills = registry.len(), batch_size = ctx.batch_size, "execution driver ready");
        let limiter = RateLimiter::new(ctx.rate_limit);
        Self {
            ctx,
            registry,
            limiter,
        }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// For hosts that add or reload skills between ticks.
    pub fn registry_mut(&mut self) -> &mut SkillRegistry {
        &mut self.registry
    }

    /// Run one tick: execute up to `batch_size` jobs in enqueue order.
    /// Never blocks. Returns the number of jobs processed.
    pub fn drive(&mut self) -> usize {
        let batch = self.ctx.queue.dequeue_up_to(self.ctx.batch_size);
        let count = batch.len();
        for job in batch {
            let outcome = self.process(&job);
            self.finish(job, outcome);
        }
        if count > 0 {
            debug!(count, remaining = self.ctx.queue.len(), "tick processed jobs");
        }
        count
    }

    fn process(&mut self, job: &Job) -> Outcome {
        match job.route() {
            Route::Health => Outcome::ok(self.health()),
            Route::Manifest => Outcome::ok(self.registry.manifest()),
            Route::NotFound => Outcome::not_found(),
            Route::Invoke { skill } => {
                if !self.limiter.check() {
                    BridgeStats::bump(&self.ctx.stats.rate_limited);
                    warn!(job_id = job.id(), skill = %skill, limit = self.limiter.ceiling(), "rate limit exceeded");
                    return Outcome::rate_limited(self.limiter.ceiling());
                }
                match self.invoke(skill, job.body()) {
                    Ok(body) => Outcome::ok(body),
                    Err(e) => {
                        warn!(job_id = job.id(), skill = %skill, kind = e.kind(), error = %e, "skill failed");
                        Outcome::skill_error(skill, &e)
                    }
                }
            }
        }
    }

    fn invoke(&self, skill: &str, payload: &str) -> Result<serde_json::Value, SkillError> {
        let registry = &self.registry;
        panic::catch_unwind(AssertUnwindSafe(|| registry.execute(skill, payload))).unwrap_or_else(
            |panic| {
                Err(SkillError::Failed {
                    category: "Panic".to_string(),
                    message: panic_message(panic.as_ref()),
                })
            },
        )
    }

    fn health(&self) -> serde_json::Value {
        let stats = self.ctx.stats.snapshot();
        json!({
            "status": "ok",
            "service": SERVICE_NAME,
            "version": VERSION,
            "serverRunning": stats.running,
            "queuedRequests": self.ctx.queue.len(),
            "totalReceived": stats.received,
            "totalProcessed": stats.processed,
            "skills": self.registry.len(),
        })
    }

    fn finish(&self, job: Job, outcome: Outcome) {
        BridgeStats::bump(&self.ctx.stats.processed);
        if let Some(late) = job.publish(outcome) {
            BridgeStats::bump(&self.ctx.stats.late);
            warn!(
                job_id = late.job_id,
                path = %late.path,
                status = late.status,
                waited_ms = late.waited_ms,
                "outcome published after its waiter gave up"
            );
            self.ctx.events.emit(Event::LateCompletion(late));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Skill panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Skill panicked: {s}")
    } else {
        "Skill panicked".to_string()
    }
}
