//! SQLite-backed priority sequence.
//!
//! A single `AUTOINCREMENT` table stands in for a database sequence: SQLite
//! never reuses an AUTOINCREMENT rowid, so every connection and process
//! sharing the database file draws unique, increasing priorities.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use super::PriorityAllocator;
use crate::error::AllocationError;
use crate::types::Priority;

const SEQUENCE_NAME: &str = "seq_notifelect";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the SQL statements for a (possibly prefixed) sequence table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceQueries {
    table: String,
}

impl SequenceQueries {
    /// Statements for the sequence named `<prefix>seq_notifelect`.
    ///
    /// The prefix becomes part of an SQL identifier, so only ASCII
    /// alphanumerics and `_` are kept.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix: String = prefix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        Self {
            table: format!("{prefix}{SEQUENCE_NAME}"),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn install(&self) -> String {
        format!(
            "CREATE TABLE {} (priority INTEGER PRIMARY KEY AUTOINCREMENT);",
            self.table
        )
    }

    pub fn uninstall(&self) -> String {
        format!("DROP TABLE {};", self.table)
    }

    pub fn next_value(&self) -> String {
        format!("INSERT INTO {} DEFAULT VALUES;", self.table)
    }
}

impl Default for SequenceQueries {
    fn default() -> Self {
        Self::with_prefix("")
    }
}

/// Priority allocator drawing from a SQLite sequence table.
///
/// The connection is shared behind a mutex; each call runs on tokio's
/// blocking pool so the caller's runtime is never stalled on disk I/O.
#[derive(Clone)]
pub struct SqliteSequence {
    conn: Arc<Mutex<Connection>>,
    queries: SequenceQueries,
}

impl SqliteSequence {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, queries: SequenceQueries) -> Result<Self, AllocationError> {
        let conn = Connection::open(path).map_err(|e| AllocationError::Unreachable {
            reason: e.to_string(),
        })?;
        // Other processes may hold the write lock while drawing their own value.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self::from_connection(conn, queries))
    }

    /// Private in-memory database (tests, simulations).
    pub fn open_in_memory(queries: SequenceQueries) -> Result<Self, AllocationError> {
        let conn = Connection::open_in_memory().map_err(|e| AllocationError::Unreachable {
            reason: e.to_string(),
        })?;
        Ok(Self::from_connection(conn, queries))
    }

    pub fn from_connection(conn: Connection, queries: SequenceQueries) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            queries,
        }
    }

    pub fn queries(&self) -> &SequenceQueries {
        &self.queries
    }

    /// Create the sequence table. Fails if it already exists.
    pub async fn install(&self) -> Result<(), AllocationError> {
        let sql = self.queries.install();
        self.with_conn(move |conn| conn.execute_batch(&sql).map_err(Into::into))
            .await
    }

    /// Drop the sequence table. Fails if it does not exist.
    pub async fn uninstall(&self) -> Result<(), AllocationError> {
        let sql = self.queries.uninstall();
        self.with_conn(move |conn| conn.execute_batch(&sql).map_err(Into::into))
            .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AllocationError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AllocationError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AllocationError::Sequence("connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| AllocationError::Unreachable {
            reason: format!("blocking task failed: {e}"),
        })?
    }
}

#[async_trait::async_trait]
impl PriorityAllocator for SqliteSequence {
    async fn allocate(&self) -> Result<Priority, AllocationError> {
        let sql = self.queries.next_value();
        let table = self.queries.table().to_string();
        let value = self
            .with_conn(move |conn| {
                conn.execute(&sql, ())?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        debug!(table = %table, priority = value, "allocated priority");
        Ok(Priority(value))
    }
}
