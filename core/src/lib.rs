//! Core types shared by the scan ingestion pipeline.

pub mod backoff;
mod envelope;
mod record;

pub use envelope::ScanEnvelope;
pub use record::{NaturalKey, ScanRecord};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
