//! Fixed one-second window limiter for skill executions.
//!
//! Owned by the execution driver alone; takes `&mut self` and needs no lock.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct RateLimiter {
    ceiling: u32,
    window_start: Option<Instant>,
    count: u32,
}

impl RateLimiter {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            window_start: None,
            count: 0,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Count one execution now. Returns `false` when it exceeds the ceiling.
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Count one execution at `now`. The window resets once `now` is at
    /// least one second past its start.
    pub fn check_at(&mut self, now: Instant) -> bool {
        let expired = self
            .window_start
            .is_none_or(|start| now.saturating_duration_since(start) >= WINDOW);
        if expired {
            self.window_start = Some(now);
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count <= self.ceiling
    }
}
