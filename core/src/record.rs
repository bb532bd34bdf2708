use time::OffsetDateTime;

/// Normalized scan outcome, ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ip: String,
    pub port: u16,
    pub service: String,
    pub timestamp: OffsetDateTime,
    pub response: String,
}

/// Identity of a stored row. Two records with the same key overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub ip: String,
    pub port: u16,
    pub service: String,
    pub timestamp: OffsetDateTime,
}

impl ScanRecord {
    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            ip: self.ip.clone(),
            port: self.port,
            service: self.service.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_response() {
        let a = ScanRecord {
            ip: "1.1.1.1".into(),
            port: 80,
            service: "HTTP".into(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            response: "a".into(),
        };
        let b = ScanRecord { response: "b".into(), ..a.clone() };
        assert_eq!(a.key(), b.key());
    }
}
