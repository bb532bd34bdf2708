use crate::schema::{sqlite_ddl, sqlite_upsert, validate_identifier};
use crate::{RecordStore, SqliteConfig, StoreError, StoreResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use scan_core::{NaturalKey, ScanRecord};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

const KIND: &str = "sqlite";

/// Single-file SQLite backend.
///
/// Statements run on the blocking pool; the connection slot is shared by all
/// tasks and emptied by `close`.
pub struct SqliteStore {
    path: PathBuf,
    table: String,
    upsert_sql: String,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    pub fn new(config: &SqliteConfig) -> StoreResult<Self> {
        validate_identifier(&config.table)?;
        Ok(SqliteStore {
            path: config.path.clone(),
            table: config.table.clone(),
            upsert_sql: sqlite_upsert(&config.table),
            conn: Arc::new(Mutex::new(None)),
        })
    }

    /// Stored response for a natural key, if any.
    pub async fn find(&self, key: &NaturalKey) -> StoreResult<Option<String>> {
        let sql = format!(
            "SELECT response FROM {} WHERE ip=? AND port=? AND service=? AND timestamp=?",
            self.table
        );
        let ip = key.ip.clone();
        let port = key.port;
        let service = key.service.clone();
        let ts = encode_timestamp(key.timestamp)?;
        self.with_connection(move |conn| {
            let found = conn
                .query_row(&sql, params![ip, port, service, ts], |r| r.get::<_, String>(0))
                .optional()?;
            Ok(found)
        })
        .await
    }

    pub async fn row_count(&self) -> StoreResult<i64> {
        let sql = format!("SELECT COUNT(1) FROM {}", self.table);
        self.with_connection(move |conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?)).await
    }

    async fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = slot.lock().map_err(|_| StoreError::write("sqlite connection lock poisoned", false))?;
            let conn = guard.as_ref().ok_or(StoreError::NotConnected(KIND))?;
            f(conn)
        })
        .await
        .map_err(|e| StoreError::write(format!("sqlite worker failed: {e}"), false))?
    }
}

fn open(path: &Path, table: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    conn.execute_batch(&sqlite_ddl(table))?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

fn encode_timestamp(ts: OffsetDateTime) -> StoreResult<String> {
    ts.format(&Rfc3339).map_err(|e| StoreError::write(format!("unencodable timestamp: {e}"), false))
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn connect(&mut self) -> StoreResult<()> {
        let path = self.path.clone();
        let table = self.table.clone();
        let conn = tokio::task::spawn_blocking(move || open(&path, &table))
            .await
            .map_err(|e| StoreError::connection(KIND, e))?
            .map_err(|e| StoreError::connection(KIND, e))?;
        let mut slot = self.conn.lock().map_err(|_| StoreError::connection(KIND, "connection lock poisoned"))?;
        *slot = Some(conn);
        info!(path = %self.path.display(), table = %self.table, "connected to sqlite");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::write("sqlite connection lock poisoned", false))?
            .take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::from(e))?;
            debug!("sqlite connection closed");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(ip = %record.ip, port = record.port, service = %record.service))]
    async fn upsert(&self, record: &ScanRecord) -> StoreResult<()> {
        let sql = self.upsert_sql.clone();
        let ts = encode_timestamp(record.timestamp)?;
        let ip = record.ip.clone();
        let port = record.port;
        let service = record.service.clone();
        let response = record.response.clone();
        self.with_connection(move |conn| {
            conn.prepare_cached(&sql)?.execute(params![ip, port, service, ts, response])?;
            Ok(())
        })
        .await?;
        debug!("upserted scan record");
        Ok(())
    }
}
