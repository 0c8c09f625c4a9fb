//! The host side of the bridge: how the bridge asks for a tick, and a
//! simulated single-threaded host loop for the `serve` command and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};
use std::time::Duration;

/// The host's scheduler, as seen from background threads.
pub trait HostScheduler: Send + Sync {
    /// Ask the host to run its next tick as soon as possible.
    /// Must be safe to call from any thread.
    fn request_tick(&self);
}

/// For hosts that tick on their own regardless.
pub struct NoopScheduler;

impl HostScheduler for NoopScheduler {
    fn request_tick(&self) {}
}

/// Wakes a [`FrameLoop`] parked between idle ticks.
#[derive(Debug, Clone)]
pub struct FrameWaker {
    thread: Thread,
}

impl HostScheduler for FrameWaker {
    fn request_tick(&self) {
        self.thread.unpark();
    }
}

/// Makes a [`FrameLoop`] return after its current tick.
#[derive(Debug, Clone)]
pub struct QuitSignal {
    flag: Arc<AtomicBool>,
    thread: Thread,
}

impl QuitSignal {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A host loop that ticks slowly while idle and immediately when woken,
/// like an editor that throttles updates while unfocused.
///
/// Must be created on the thread that will call [`FrameLoop::run`].
pub struct FrameLoop {
    idle_interval: Duration,
    thread: Thread,
    quit: Arc<AtomicBool>,
}

const MIN_IDLE_INTERVAL: Duration = Duration::from_millis(1);

impl FrameLoop {
    /// `idle_interval` is floored at one millisecond; a zero park would spin.
    pub fn new(idle_interval: Duration) -> Self {
        Self {
            idle_interval: idle_interval.max(MIN_IDLE_INTERVAL),
            thread: thread::current(),
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn waker(&self) -> Arc<FrameWaker> {
        Arc::new(FrameWaker {
            thread: self.thread.clone(),
        })
    }

    pub fn quit_signal(&self) -> QuitSignal {
        QuitSignal {
            flag: Arc::clone(&self.quit),
            thread: self.thread.clone(),
        }
    }

    /// Call `tick` once per frame until quit. Returns the number of ticks.
    pub fn run(&self, mut tick: impl FnMut()) -> u64 {
        let mut ticks = 0;
        while !self.quit.load(Ordering::SeqCst) {
            tick();
            ticks += 1;
            thread::park_timeout(self.idle_interval);
        }
        ticks
    }
}
