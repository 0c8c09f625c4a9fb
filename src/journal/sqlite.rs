use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::sync::{Mutex, MutexGuard};

use super::{Journal, JournalEntry, LateCompletion};

/// SQLite-backed late-completion journal.
pub struct SqliteJournal {
    conn: Mutex<Connection>,
}

impl SqliteJournal {
    /// Open or create the journal table. Use `":memory:"` for tests.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS late_completions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
                job_id INTEGER NOT NULL,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                status INTEGER NOT NULL,
                body TEXT NOT NULL,
                waited_ms INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("journal connection lock poisoned"))
    }
}

#[async_trait]
impl Journal for SqliteJournal {
    async fn record(&self, completion: LateCompletion) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO late_completions (job_id, method, path, status, body, waited_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                completion.job_id as i64,
                completion.method,
                completion.path,
                completion.status,
                completion.body,
                completion.waited_ms as i64,
            ],
        )?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let conn = self.conn()?;
        // Last `limit` rows, returned in chronological order
        let mut stmt = conn.prepare(
            "SELECT recorded_at, job_id, method, path, status, body, waited_ms FROM (
                SELECT * FROM late_completions ORDER BY id DESC LIMIT ?1
            ) ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(JournalEntry {
                    recorded_at: row.get(0)?,
                    completion: LateCompletion {
                        job_id: row.get::<_, i64>(1)? as u64,
                        method: row.get(2)?,
                        path: row.get(3)?,
                        status: row.get(4)?,
                        body: row.get(5)?,
                        waited_ms: row.get::<_, i64>(6)? as u64,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM late_completions", [])?;
        Ok(())
    }
}
