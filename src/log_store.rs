use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("log store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("log store auth failed: {0}")]
    Auth(String),
    #[error("log store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("log store response malformed: {0}")]
    Malformed(String),
    #[error("log database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("log store task failed: {0}")]
    Task(String),
}

/// Append-only table of changes, read in full on every request
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Every data row, each an ordered list of cells
    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>, LogStoreError>;
}

/// Local changes log in a SQLite table `changes_log(date, category)`
pub struct SqliteLogStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogStoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(path.as_ref().to_path_buf(), conn)
    }

    pub fn open_in_memory() -> Result<Self, LogStoreError> {
        Self::from_connection(PathBuf::from(":memory:"), Connection::open_in_memory()?)
    }

    fn from_connection(path: PathBuf, conn: Connection) -> Result<Self, LogStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS changes_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                category TEXT NOT NULL
            )",
        )?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row. The bot only reads the log; this is how a local database gets seeded.
    pub fn append(&self, date: &str, category: &str) -> Result<(), LogStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LogStoreError::Task("log database lock poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO changes_log (date, category) VALUES (?1, ?2)",
            rusqlite::params![date, category],
        )?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>, LogStoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<String>>, LogStoreError> {
            let conn = conn
                .lock()
                .map_err(|_| LogStoreError::Task("log database lock poisoned".to_string()))?;
            let mut stmt = conn.prepare("SELECT date, category FROM changes_log ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok(vec![row.get::<_, String>(0)?, row.get::<_, String>(1)?]))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| LogStoreError::Task(e.to_string()))?
    }
}
