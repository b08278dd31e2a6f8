//! SQLite message table.
//!
//! Blocking access to the single table the polling transport uses. Every
//! method runs on a blocking thread (see [`MessageStore::run`]); the
//! connection is opened by `open()` and dropped by `close()` so a store can
//! be restarted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One row of the message table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageRow {
    pub id: i64,
    pub channel: String,
    pub msg: String,
}

#[derive(Clone)]
pub(crate) struct MessageStore {
    path: PathBuf,
    table: String,
    conn: Arc<Mutex<Option<Connection>>>,
}

/// Strip a `sqlite:` / `sqlite://` prefix; anything else is taken as a path.
pub(crate) fn database_path(uri: &str) -> Result<PathBuf> {
    // ---
    let path = uri
        .strip_prefix("sqlite://")
        .or_else(|| uri.strip_prefix("sqlite:"))
        .unwrap_or(uri);

    if path.is_empty() {
        return Err(Error::MissingConfig("sql transport requires a database path".into()));
    }
    Ok(PathBuf::from(path))
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub(crate) fn validate_table(table: &str) -> Result<()> {
    // ---
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "table name {table:?} is not a plain SQL identifier"
        )))
    }
}

fn sql_err(context: &str) -> impl Fn(rusqlite::Error) -> Error + '_ {
    move |err| Error::Transport(format!("sql: {context}: {err}"))
}

impl MessageStore {
    // ---

    pub(crate) fn new(path: PathBuf, table: String) -> Result<Self> {
        validate_table(&table)?;
        Ok(Self {
            path,
            table,
            conn: Arc::new(Mutex::new(None)),
        })
    }

    /// Run `f` against this store on Tokio's blocking pool.
    pub(crate) async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&MessageStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|err| Error::Transport(format!("sql: blocking task failed: {err}")))?
    }

    /// Open the connection and make sure the table exists.
    pub(crate) fn open(&self) -> Result<()> {
        // ---
        let conn = Connection::open(&self.path).map_err(sql_err("open"))?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(sql_err("busy_timeout"))?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(sql_err("journal_mode"))?;

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time INTEGER NOT NULL,
                channel TEXT NOT NULL,
                msg TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {table}_time ON {table}(time);",
            table = self.table
        );
        conn.execute_batch(&create).map_err(sql_err("create table"))?;

        *self.conn.lock() = Some(conn);
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.conn.lock().take();
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(Error::NotStarted)?;
        f(conn)
    }

    /// Highest row id currently stored, 0 for an empty table.
    pub(crate) fn max_id(&self) -> Result<i64> {
        // ---
        self.with_conn(|conn| {
            let sql = format!("SELECT MAX(id) FROM {}", self.table);
            let max: Option<i64> = conn
                .query_row(&sql, [], |row| row.get(0))
                .map_err(sql_err("max id"))?;
            Ok(max.unwrap_or(0))
        })
    }

    pub(crate) fn insert(&self, time_ms: i64, channel: &str, msg: &str) -> Result<()> {
        // ---
        self.with_conn(|conn| {
            let sql = format!("INSERT INTO {} (time, channel, msg) VALUES (?1, ?2, ?3)", self.table);
            conn.execute(&sql, params![time_ms, channel, msg])
                .map_err(sql_err("insert"))?;
            Ok(())
        })
    }

    /// Rows after `cursor` written at or after `since_ms`, ascending by id.
    pub(crate) fn fetch_since(&self, cursor: i64, since_ms: i64) -> Result<Vec<MessageRow>> {
        // ---
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, channel, msg FROM {} WHERE id > ?1 AND time >= ?2 ORDER BY id ASC",
                self.table
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(sql_err("prepare poll"))?;
            let rows = stmt
                .query_map(params![cursor, since_ms], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        channel: row.get(1)?,
                        msg: row.get(2)?,
                    })
                })
                .map_err(sql_err("poll"))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_err("read row"))
        })
    }

    /// Delete rows written before `before_ms`; returns the number removed.
    pub(crate) fn purge(&self, before_ms: i64) -> Result<usize> {
        // ---
        self.with_conn(|conn| {
            let sql = format!("DELETE FROM {} WHERE time < ?1", self.table);
            conn.execute(&sql, params![before_ms])
                .map_err(sql_err("cleanup"))
        })
    }
}
