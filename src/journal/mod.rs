//! Journal of late completions: outcomes the execution thread published
//! after the caller had stopped waiting.
//!
//! Side effects of a late skill still happen, so the result is kept here
//! instead of being dropped on the floor.

pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::events::Event;

/// An outcome that arrived after its waiter gave up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateCompletion {
    pub job_id: u64,
    pub method: String,
    pub path: String,
    pub status: u16,
    /// The JSON body the caller would have received.
    pub body: String,
    /// Time between enqueue and publication.
    pub waited_ms: u64,
}

/// A stored late completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub recorded_at: String,
    pub completion: LateCompletion,
}

/// Where late completions are kept. Could be in-memory, SQLite, etc.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, completion: LateCompletion) -> Result<()>;
    /// The last `limit` entries, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>>;
    async fn clear(&self) -> Result<()>;
}

/// Persist every [`Event::LateCompletion`] until the bus closes.
pub async fn record_late_completions(
    mut rx: broadcast::Receiver<Event>,
    journal: Arc<dyn Journal>,
) {
    loop {
        match rx.recv().await {
            Ok(Event::LateCompletion(completion)) => {
                let job_id = completion.job_id;
                match journal.record(completion).await {
                    Ok(()) => debug!(job_id, "late completion journaled"),
                    Err(e) => warn!(job_id, error = %e, "failed to journal late completion"),
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "journal recorder lagged; events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
