use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level scan message as published by the scanners.
///
/// `data` stays opaque here; its shape depends on `data_version` and is
/// resolved by the transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEnvelope {
    pub ip: String,
    pub port: u16,
    pub service: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub data_version: i64,
    #[serde(default)]
    pub data: Value,
}

impl ScanEnvelope {
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_envelope() {
        let raw = br#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":0,"data_version":2,"data":{"response_str":"hello world"}}"#;
        let env = ScanEnvelope::from_slice(raw).unwrap();
        assert_eq!(env.ip, "1.1.1.1");
        assert_eq!(env.port, 80);
        assert_eq!(env.service, "HTTP");
        assert_eq!(env.timestamp, 0);
        assert_eq!(env.data_version, 2);
        assert_eq!(env.data["response_str"], "hello world");
    }

    #[test]
    fn missing_data_is_null() {
        let raw = br#"{"ip":"10.0.0.1","port":22,"service":"SSH","timestamp":1700000000,"data_version":1}"#;
        let env = ScanEnvelope::from_slice(raw).unwrap();
        assert!(env.data.is_null());
    }

    #[test]
    fn rejects_out_of_range_port() {
        let raw = br#"{"ip":"10.0.0.1","port":70000,"service":"SSH","timestamp":0,"data_version":1,"data":{}}"#;
        assert!(ScanEnvelope::from_slice(raw).is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let raw = br#"{"port":22,"service":"SSH","timestamp":0,"data_version":1,"data":{}}"#;
        assert!(ScanEnvelope::from_slice(raw).is_err());
    }

    #[test]
    fn rejects_non_json() {
        assert!(ScanEnvelope::from_slice(b"invalid").is_err());
    }
}
