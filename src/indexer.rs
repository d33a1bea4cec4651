use std::{collections::HashMap, path::Path};

use serde::Deserialize;

use crate::error::QueryError;

/// Maps metric identifiers and tag keys to the integer codes stored in
/// indexed tables.
pub trait Indexer: Send + Sync {
    fn resolve(&self, use_case: &str, name: &str) -> Option<u64>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticIndexer {
    entries: HashMap<String, HashMap<String, u64>>,
}

impl StaticIndexer {
    pub fn from_file(path: &Path) -> Result<Self, QueryError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            QueryError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|err| QueryError::Config(format!("invalid index file: {err}")))
    }

    pub fn insert(&mut self, use_case: &str, name: &str, id: u64) {
        self.entries
            .entry(use_case.to_string())
            .or_default()
            .insert(name.to_string(), id);
    }

    pub fn with(mut self, use_case: &str, name: &str, id: u64) -> Self {
        self.insert(use_case, name, id);
        self
    }
}

impl Indexer for StaticIndexer {
    fn resolve(&self, use_case: &str, name: &str) -> Option<u64> {
        self.entries.get(use_case)?.get(name).copied()
    }
}
