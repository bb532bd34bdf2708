use crate::{StoreError, StoreResult};

/// Reject anything that is not a plain SQL identifier; schema and table names
/// are interpolated into statements.
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidConfig(format!("invalid SQL identifier: {name:?}")))
    }
}

#[cfg(feature = "sqlite")]
pub(crate) fn sqlite_ddl(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
  ip          TEXT NOT NULL,
  port        INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
  service     TEXT NOT NULL,
  timestamp   TEXT NOT NULL,
  response    TEXT NOT NULL,
  PRIMARY KEY (ip, port, service, timestamp)
);
"#
    )
}

#[cfg(feature = "sqlite")]
pub(crate) fn sqlite_upsert(table: &str) -> String {
    format!(
        "INSERT INTO {table}(ip,port,service,timestamp,response) VALUES (?,?,?,?,?)
         ON CONFLICT(ip,port,service,timestamp) DO UPDATE SET response=excluded.response"
    )
}

#[cfg(feature = "cockroach")]
pub(crate) fn postgres_ddl(schema: &str, table: &str) -> String {
    format!(
        r#"
CREATE SCHEMA IF NOT EXISTS {schema};
CREATE TABLE IF NOT EXISTS {schema}.{table} (
  ip          TEXT NOT NULL,
  port        INTEGER NOT NULL,
  service     TEXT NOT NULL,
  "timestamp" TIMESTAMPTZ NOT NULL,
  response    TEXT NOT NULL,
  PRIMARY KEY (ip, port, service, "timestamp")
);
"#
    )
}

#[cfg(feature = "cockroach")]
pub(crate) fn postgres_upsert(schema: &str, table: &str) -> String {
    format!(
        r#"INSERT INTO {schema}.{table} (ip, port, service, "timestamp", response)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (ip, port, service, "timestamp") DO UPDATE SET response = EXCLUDED.response"#
    )
}
