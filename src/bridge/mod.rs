//! The request-execution bridge.
//!
//! Requests arrive on the bridge's own I/O runtime, are captured as
//! [`Job`](job::Job)s in a [`JobQueue`](queue::JobQueue), and are executed by
//! an [`ExecutionDriver`] that the host calls from its own tick. Nothing on
//! the I/O side touches host state.

pub mod driver;
pub mod job;
pub mod keepalive;
pub mod listener;
pub mod queue;
pub mod rate_limit;

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::consts::{
    DEFAULT_BATCH_SIZE, DEFAULT_EVENT_CAPACITY, DEFAULT_IO_THREADS,
    DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT, DEFAULT_WAIT_TIMEOUT,
};
use crate::error::BridgeError;
use crate::events::{Event, EventBus};
use crate::host::{HostScheduler, NoopScheduler};
use crate::journal::{self, Journal};
use crate::skills::SkillRegistry;

pub use driver::ExecutionDriver;
use job::Outcome;
use queue::JobQueue;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Use port 0 to let the OS pick one.
    pub addr: SocketAddr,
    pub batch_size: usize,
    /// Skill executions per one-second window.
    pub rate_limit: u32,
    pub wait_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub max_queue_depth: usize,
    /// Larger request bodies are answered with 413.
    pub max_body_bytes: usize,
    pub event_capacity: usize,
    pub io_threads: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit: DEFAULT_RATE_LIMIT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            io_threads: DEFAULT_IO_THREADS,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), BridgeError> {
        let zero = |what: &str| Err(BridgeError::Config(format!("{what} must be greater than zero")));
        if self.batch_size == 0 {
            return zero("batch_size");
        }
        if self.rate_limit == 0 {
            return zero("rate_limit");
        }
        if self.wait_timeout.is_zero() {
            return zero("wait_timeout");
        }
        if self.keep_alive_interval.is_zero() {
            return zero("keep_alive_interval");
        }
        if self.max_queue_depth == 0 {
            return zero("max_queue_depth");
        }
        if self.max_body_bytes == 0 {
            return zero("max_body_bytes");
        }
        if self.event_capacity == 0 {
            return zero("event_capacity");
        }
        if self.io_threads == 0 {
            return zero("io_threads");
        }
        Ok(())
    }
}

/// Counters shared between the I/O side and the execution driver.
#[derive(Debug, Default)]
pub struct BridgeStats {
    running: AtomicBool,
    received: AtomicU64,
    processed: AtomicU64,
    rate_limited: AtomicU64,
    timed_out: AtomicU64,
    late: AtomicU64,
}

/// A point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub running: bool,
    pub received: u64,
    pub processed: u64,
    pub rate_limited: u64,
    pub timed_out: u64,
    pub late: u64,
}

impl BridgeStats {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            running: self.is_running(),
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed(),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything an [`ExecutionDriver`] needs from the bridge. `Send`, so it
/// can be moved onto whichever thread the host ticks on.
#[derive(Clone)]
pub struct DriverContext {
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) stats: Arc<BridgeStats>,
    pub(crate) events: EventBus,
    pub(crate) url: String,
    pub(crate) batch_size: usize,
    pub(crate) rate_limit: u32,
}

/// Builder for a running bridge.
pub struct Bridge {
    config: BridgeConfig,
    scheduler: Arc<dyn HostScheduler>,
    journal: Option<Arc<dyn Journal>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            scheduler: Arc::new(NoopScheduler),
            journal: None,
        }
    }

    /// Scheduler nudged by the keep-alive while jobs are pending.
    pub fn scheduler(mut self, scheduler: Arc<dyn HostScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Journal for outcomes that arrive after their waiter timed out.
    pub fn journal(mut self, journal: Option<Arc<dyn Journal>>) -> Self {
        self.journal = journal;
        self
    }

    /// Bind the listener and start the I/O thread.
    ///
    /// Binding happens before this returns, so address errors surface here.
    pub fn start(self) -> Result<BridgeHandle, BridgeError> {
        let config = self.config;
        config.validate()?;

        let std_listener = StdTcpListener::bind(config.addr).map_err(|source| BridgeError::Bind {
            addr: config.addr,
            source,
        })?;
        std_listener.set_nonblocking(true)?;
        let addr = std_listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("skillgate-io")
            .enable_all()
            .build()?;

        let queue = Arc::new(JobQueue::new(config.max_queue_depth));
        let stats = Arc::new(BridgeStats::default());
        let events = EventBus::new(config.event_capacity);
        let shutdown = CancellationToken::new();
        stats.running.store(true, Ordering::SeqCst);

        let state = listener::ListenerState {
            queue: Arc::clone(&queue),
            stats: Arc::clone(&stats),
            events: events.clone(),
            wait_timeout: config.wait_timeout,
            max_body_bytes: config.max_body_bytes,
        };
        // Subscribe before anything can emit.
        let recorder = self
            .journal
            .map(|journal| (events.subscribe(), journal));
        let scheduler = self.scheduler;
        let keep_alive_interval = config.keep_alive_interval;
        let thread_queue = Arc::clone(&queue);
        let thread_events = events.clone();
        let thread_shutdown = shutdown.clone();

        let thread = thread::Builder::new()
            .name("skillgate-bridge".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(std_listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!(error = %e, "failed to register listener with runtime");
                            return;
                        }
                    };
                    tokio::spawn(keepalive::run(
                        thread_queue,
                        scheduler,
                        keep_alive_interval,
                        thread_shutdown.clone(),
                    ));
                    if let Some((rx, journal)) = recorder {
                        tokio::spawn(journal::record_late_completions(rx, journal));
                    }
                    thread_events.emit(Event::Started { addr });
                    if let Err(e) = listener::serve(listener, state, thread_shutdown).await {
                        error!(error = %e, "listener stopped with error");
                    }
                });
            })?;

        info!(
            %addr,
            batch_size = config.batch_size,
            rate_limit = config.rate_limit,
            wait_timeout_ms = config.wait_timeout.as_millis() as u64,
            max_queue_depth = config.max_queue_depth,
            "bridge listening"
        );

        Ok(BridgeHandle {
            addr,
            config,
            queue,
            stats,
            events,
            shutdown,
            thread: Some(thread),
        })
    }
}

/// Control surface of a running bridge. Dropping it stops the bridge.
pub struct BridgeHandle {
    addr: SocketAddr,
    config: BridgeConfig,
    queue: Arc<JobQueue>,
    stats: Arc<BridgeStats>,
    events: EventBus,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL with a trailing slash, e.g. `http://127.0.0.1:8090/`.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_running()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn driver_context(&self) -> DriverContext {
        DriverContext {
            queue: Arc::clone(&self.queue),
            stats: Arc::clone(&self.stats),
            events: self.events.clone(),
            url: self.url(),
            batch_size: self.config.batch_size,
            rate_limit: self.config.rate_limit,
        }
    }

    /// Build the driver the host calls from its tick.
    pub fn execution_driver(&self, registry: SkillRegistry) -> ExecutionDriver {
        ExecutionDriver::new(self.driver_context(), registry)
    }

    /// Stop accepting, answer every queued job with 503, and shut the
    /// listener down. Idempotent.
    pub fn stop(&self) {
        if !self.stats.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let drained = self.queue.close();
        let count = drained.len();
        for job in drained {
            // A waiter that already gave up has nothing to receive.
            let _ = job.publish(Outcome::server_stopped());
        }
        self.events.emit(Event::Stopped { drained: count });
        self.shutdown.cancel();
        info!(drained = count, "bridge stopped");
    }

    /// Stop and wait for the I/O thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("bridge thread panicked");
            }
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
