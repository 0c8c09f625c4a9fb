//! Keeps the host ticking while work is pending.
//!
//! Hosts often throttle their tick when idle or unfocused; the automation
//! client cannot fix that, so the bridge asks for ticks itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::queue::JobQueue;
use crate::host::HostScheduler;

/// Every `period`, request a host tick if the queue is non-empty.
/// Only reads the queue length.
pub async fn run(
    queue: Arc<JobQueue>,
    scheduler: Arc<dyn HostScheduler>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let pending = queue.len();
                if pending > 0 {
                    trace!(pending, "nudging host");
                    scheduler.request_tick();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::job::Job;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingScheduler {
        nudges: AtomicUsize,
    }

    impl HostScheduler for CountingScheduler {
        fn request_tick(&self) {
            self.nudges.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn nudges_only_while_jobs_pending() {
        let queue = Arc::new(JobQueue::new(8));
        let scheduler = Arc::new(CountingScheduler::default());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run(
            Arc::clone(&queue),
            scheduler.clone(),
            Duration::from_millis(5),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(scheduler.nudges.load(Ordering::SeqCst), 0);

        queue.enqueue(Job::new("GET", "/health", String::new()).0).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(scheduler.nudges.load(Ordering::SeqCst) > 0);

        shutdown.cancel();
        task.await.unwrap();
    }
}
