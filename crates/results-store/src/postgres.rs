use crate::schema::{postgres_ddl, postgres_upsert, validate_identifier};
use crate::{CockroachConfig, RecordStore, StoreError, StoreResult};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use scan_core::ScanRecord;
use tokio_postgres::NoTls;
use tracing::{debug, info, instrument};

const KIND: &str = "cockroachdb";

/// CockroachDB (or any PostgreSQL-compatible) backend with a pooled client.
///
/// The pool is built by `connect`; the upsert is a single
/// `INSERT .. ON CONFLICT .. DO UPDATE` statement, which both engines execute
/// atomically per key.
pub struct CockroachStore {
    pool_config: Config,
    max_pool_size: usize,
    schema: String,
    table: String,
    migrate: bool,
    upsert_sql: String,
    pool: Option<Pool>,
}

impl CockroachStore {
    pub fn new(config: &CockroachConfig) -> StoreResult<Self> {
        validate_identifier(&config.schema)?;
        validate_identifier(&config.table)?;
        if config.max_pool_size == 0 {
            return Err(StoreError::InvalidConfig("max_pool_size must be at least 1".into()));
        }

        let mut pool_config = Config::new();
        pool_config.host = Some(config.host.clone());
        pool_config.port = Some(config.port);
        pool_config.user = Some(config.user.clone());
        pool_config.password = config.password.clone();
        pool_config.dbname = Some(config.database.clone());
        pool_config.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });

        Ok(CockroachStore {
            pool_config,
            max_pool_size: config.max_pool_size,
            schema: config.schema.clone(),
            table: config.table.clone(),
            migrate: config.migrate,
            upsert_sql: postgres_upsert(&config.schema, &config.table),
            pool: None,
        })
    }

    fn pool(&self) -> StoreResult<&Pool> {
        self.pool.as_ref().ok_or(StoreError::NotConnected(KIND))
    }
}

#[async_trait]
impl RecordStore for CockroachStore {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn connect(&mut self) -> StoreResult<()> {
        let pool = self
            .pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::connection(KIND, e))?;
        pool.resize(self.max_pool_size);

        let client = pool.get().await.map_err(|e| StoreError::connection(KIND, e))?;
        client.execute("SELECT 1", &[]).await.map_err(|e| StoreError::connection(KIND, e))?;
        if self.migrate {
            client
                .batch_execute(&postgres_ddl(&self.schema, &self.table))
                .await
                .map_err(|e| StoreError::connection(KIND, e))?;
            info!(schema = %self.schema, table = %self.table, "ensured scan table exists");
        }
        drop(client);

        info!(
            host = ?self.pool_config.host,
            database = ?self.pool_config.dbname,
            max_pool_size = self.max_pool_size,
            "connected to cockroachdb"
        );
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if let Some(pool) = &self.pool {
            pool.close();
            debug!("cockroachdb pool closed");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(ip = %record.ip, port = record.port, service = %record.service))]
    async fn upsert(&self, record: &ScanRecord) -> StoreResult<()> {
        let client = self.pool()?.get().await?;
        let stmt = client.prepare_cached(&self.upsert_sql).await?;
        let port = i32::from(record.port);
        client
            .execute(&stmt, &[&record.ip, &port, &record.service, &record.timestamp, &record.response])
            .await?;
        debug!("upserted scan record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn construction_does_not_connect() {
        let store = CockroachStore::new(&CockroachConfig::default()).unwrap();
        assert!(store.pool.is_none());
        assert_eq!(store.kind(), "cockroachdb");
    }

    #[test]
    fn rejects_bad_identifiers() {
        let cfg = CockroachConfig { schema: "mini scan".into(), ..CockroachConfig::default() };
        assert!(matches!(CockroachStore::new(&cfg), Err(StoreError::InvalidConfig(_))));
        let cfg = CockroachConfig { table: "scans;".into(), ..CockroachConfig::default() };
        assert!(matches!(CockroachStore::new(&cfg), Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_empty_pool() {
        let cfg = CockroachConfig { max_pool_size: 0, ..CockroachConfig::default() };
        assert!(matches!(CockroachStore::new(&cfg), Err(StoreError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn upsert_before_connect_fails() {
        let store = CockroachStore::new(&CockroachConfig::default()).unwrap();
        let record = ScanRecord {
            ip: "1.1.1.1".into(),
            port: 80,
            service: "HTTP".into(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            response: "hello world".into(),
        };
        let err = store.upsert(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::NotConnected("cockroachdb")));
    }

    #[tokio::test]
    async fn close_without_connect_is_noop() {
        let store = CockroachStore::new(&CockroachConfig::default()).unwrap();
        assert!(store.close().await.is_ok());
    }
}
