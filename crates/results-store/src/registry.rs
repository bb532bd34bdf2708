use crate::{MemoryStore, RecordStore, StoreConfig, StoreError, StoreResult};
use std::collections::BTreeMap;

/// Builds an unconnected store from configuration.
pub type StoreConstructor = fn(&StoreConfig) -> StoreResult<Box<dyn RecordStore>>;

/// Maps store type names (the `type` config field) to constructors.
pub struct StoreRegistry {
    constructors: BTreeMap<String, StoreConstructor>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl StoreRegistry {
    pub fn empty() -> Self {
        StoreRegistry { constructors: BTreeMap::new() }
    }

    /// Registry holding every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        #[cfg(feature = "sqlite")]
        registry.register("sqlite", build_sqlite);
        #[cfg(feature = "cockroach")]
        {
            registry.register("cockroachdb", build_cockroach);
            registry.register("postgres", build_cockroach);
        }
        registry.register("memory", build_memory);
        registry
    }

    /// Add or replace a backend.
    pub fn register(&mut self, kind: impl Into<String>, constructor: StoreConstructor) -> &mut Self {
        self.constructors.insert(kind.into(), constructor);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn build(&self, config: &StoreConfig) -> StoreResult<Box<dyn RecordStore>> {
        let constructor = self
            .constructors
            .get(config.kind.as_str())
            .ok_or_else(|| StoreError::UnsupportedBackend(config.kind.clone()))?;
        constructor(config)
    }
}

/// Build a store with the built-in backends.
pub fn new_store(config: &StoreConfig) -> StoreResult<Box<dyn RecordStore>> {
    StoreRegistry::with_builtin().build(config)
}

fn build_memory(_: &StoreConfig) -> StoreResult<Box<dyn RecordStore>> {
    Ok(Box::new(MemoryStore::new()))
}

#[cfg(feature = "sqlite")]
fn build_sqlite(config: &StoreConfig) -> StoreResult<Box<dyn RecordStore>> {
    Ok(Box::new(crate::SqliteStore::new(&config.sqlite)?))
}

#[cfg(feature = "cockroach")]
fn build_cockroach(config: &StoreConfig) -> StoreResult<Box<dyn RecordStore>> {
    Ok(Box::new(crate::CockroachStore::new(&config.cockroach)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str) -> StoreConfig {
        StoreConfig { kind: kind.to_string(), ..StoreConfig::default() }
    }

    #[test]
    fn builds_builtin_backends() {
        let registry = StoreRegistry::with_builtin();
        assert_eq!(registry.build(&config("memory")).unwrap().kind(), "memory");
        #[cfg(feature = "sqlite")]
        assert_eq!(registry.build(&config("sqlite")).unwrap().kind(), "sqlite");
        #[cfg(feature = "cockroach")]
        {
            assert_eq!(registry.build(&config("cockroachdb")).unwrap().kind(), "cockroachdb");
            assert_eq!(registry.build(&config("postgres")).unwrap().kind(), "cockroachdb");
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = new_store(&config("unsupported")).err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedBackend(ref k) if k == "unsupported"));
    }

    #[test]
    fn custom_backends_can_be_registered() {
        fn build_custom(_: &StoreConfig) -> StoreResult<Box<dyn RecordStore>> {
            Ok(Box::new(MemoryStore::new()))
        }
        let mut registry = StoreRegistry::empty();
        assert!(registry.build(&config("custom")).is_err());
        registry.register("custom", build_custom);
        assert!(registry.build(&config("custom")).is_ok());
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["custom"]);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn constructor_errors_propagate() {
        let mut cfg = config("sqlite");
        cfg.sqlite.table = "bad table".into();
        assert!(matches!(new_store(&cfg).err(), Some(StoreError::InvalidConfig(_))));
    }
}
