//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name reported by the health endpoint.
pub const SERVICE_NAME: &str = "skillgate";

/// Version of the manifest format served on `GET /skills`.
pub const MANIFEST_VERSION: &str = "1.0.0";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8090;

/// Jobs executed per host tick at most.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Skill executions allowed per one-second window.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// How long a request waits for the execution thread before 504.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Period of the keep-alive nudge while jobs are pending.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(50);

/// Jobs allowed to sit in the queue before admission is refused.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1024;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Largest request body the listener will buffer.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Worker threads of the bridge's I/O runtime.
pub const DEFAULT_IO_THREADS: usize = 2;

/// How long an idle host waits between ticks when nothing nudges it.
pub const DEFAULT_IDLE_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Default database path: `~/.skillgate/skillgate.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".skillgate")
        .join("skillgate.db")
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
