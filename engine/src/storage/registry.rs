//! Adapter lookup by identifier.
//!
//! Storage backends are registered under a string id at startup and
//! constructed through their factory function.

use super::{MemoryStore, StorageAdapter, TableDef};
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Options handed to an adapter factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterOptions {
    /// Connection string, meaning defined by the adapter
    #[serde(default)]
    pub url: Option<String>,
    /// Tables the adapter should expose
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

/// Constructor for a storage adapter.
pub type AdapterFactory =
    Box<dyn Fn(&AdapterOptions) -> Result<Box<dyn StorageAdapter + Send>> + Send + Sync>;

/// Registry of adapter factories keyed by id.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in adapters (`"memory"`).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", Box::new(memory_factory));
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, factory: AdapterFactory) -> &mut Self {
        self.factories.insert(id.into(), factory);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construct the adapter registered under `id`.
    pub fn create(
        &self,
        id: &str,
        options: &AdapterOptions,
    ) -> Result<Box<dyn StorageAdapter + Send>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| Error::Config(format!("unknown storage adapter: {id}")))?;
        factory(options)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("ids", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn memory_factory(options: &AdapterOptions) -> Result<Box<dyn StorageAdapter + Send>> {
    let store = MemoryStore::new();
    for def in &options.tables {
        store.create_table(def.clone())?;
    }
    Ok(Box::new(store.connect()))
}
