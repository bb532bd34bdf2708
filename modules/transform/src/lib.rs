//! Normalizes versioned scan payloads into a single record shape.
//!
//! Each known `data_version` maps to one payload struct and one rule for
//! resolving the response text. Adding a version means adding a
//! [`DataVersion`] variant, its payload struct, and one arm in
//! [`VersionedPayload::decode`] and [`VersionedPayload::into_response`];
//! the exhaustive matches point at every place that needs it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use scan_core::{ScanEnvelope, ScanRecord};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unsupported data version: {0}")]
    UnsupportedVersion(i64),
    #[error("failed to parse {version} data: {source}")]
    MalformedPayload {
        version: DataVersion,
        #[source]
        source: PayloadError,
    },
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("response is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl TransformError {
    fn malformed(version: DataVersion, source: impl Into<PayloadError>) -> Self {
        TransformError::MalformedPayload { version, source: source.into() }
    }
}

/// Payload schema versions understood by this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVersion {
    V1,
    V2,
}

impl TryFrom<i64> for DataVersion {
    type Error = TransformError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DataVersion::V1),
            2 => Ok(DataVersion::V2),
            other => Err(TransformError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataVersion::V1 => f.write_str("V1"),
            DataVersion::V2 => f.write_str("V2"),
        }
    }
}

/// Version 1: raw response bytes, base64 encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct V1Data {
    pub response_bytes_utf8: String,
}

/// Version 2: response already decoded to text.
#[derive(Debug, Clone, Deserialize)]
pub struct V2Data {
    pub response_str: String,
}

#[derive(Debug, Clone)]
pub enum VersionedPayload {
    V1(V1Data),
    V2(V2Data),
}

impl VersionedPayload {
    /// Re-decode the opaque `data` blob according to its version tag.
    pub fn decode(data_version: i64, data: Value) -> Result<Self, TransformError> {
        let version = DataVersion::try_from(data_version)?;
        let decoded = match version {
            DataVersion::V1 => serde_json::from_value(data).map(VersionedPayload::V1),
            DataVersion::V2 => serde_json::from_value(data).map(VersionedPayload::V2),
        };
        decoded.map_err(|e| TransformError::malformed(version, e))
    }

    pub fn version(&self) -> DataVersion {
        match self {
            VersionedPayload::V1(_) => DataVersion::V1,
            VersionedPayload::V2(_) => DataVersion::V2,
        }
    }

    pub fn into_response(self) -> Result<String, TransformError> {
        match self {
            VersionedPayload::V1(data) => {
                let bytes = STANDARD
                    .decode(data.response_bytes_utf8.as_bytes())
                    .map_err(|e| TransformError::malformed(DataVersion::V1, e))?;
                String::from_utf8(bytes).map_err(|e| TransformError::malformed(DataVersion::V1, e))
            }
            VersionedPayload::V2(data) => Ok(data.response_str),
        }
    }
}

/// Map a decoded envelope to its canonical record.
///
/// Fails without side effects; the returned record always carries a fully
/// resolved response.
pub fn transform(envelope: ScanEnvelope) -> Result<ScanRecord, TransformError> {
    let ScanEnvelope { ip, port, service, timestamp, data_version, data } = envelope;
    let response = VersionedPayload::decode(data_version, data)?.into_response()?;
    let timestamp = OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .filter(|ts| (0..=9999).contains(&ts.year()))
        .ok_or(TransformError::InvalidTimestamp(timestamp))?;
    Ok(ScanRecord { ip, port, service, timestamp, response })
}
