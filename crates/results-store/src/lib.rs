//! Durable, idempotent persistence of scan records.
//!
//! Every backend writes a record with a single atomic upsert keyed by
//! [`NaturalKey`](scan_core::NaturalKey); replaying the same record leaves the
//! stored state unchanged. Backends are picked by name through
//! [`StoreRegistry`].

mod error;
mod memory;
mod models;
#[cfg(feature = "cockroach")]
mod postgres;
mod registry;
mod retry;
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{CockroachConfig, SqliteConfig, StoreConfig};
#[cfg(feature = "cockroach")]
pub use postgres::CockroachStore;
pub use registry::{new_store, StoreConstructor, StoreRegistry};
pub use retry::{RetryPolicy, RetryingStore};
pub use schema::validate_identifier;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use scan_core::ScanRecord;

/// Capability set every storage backend provides.
///
/// `connect` runs once at startup and its failure is fatal to the caller.
/// `upsert` may be called concurrently from many tasks; backends rely on their
/// own pool and the engine's upsert primitive for safety.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend name, for logs.
    fn kind(&self) -> &'static str;

    async fn connect(&mut self) -> StoreResult<()>;

    async fn close(&self) -> StoreResult<()>;

    async fn upsert(&self, record: &ScanRecord) -> StoreResult<()>;
}
