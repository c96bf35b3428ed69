//! In-memory resource store backed by DashMap. All data is lost on exit.

use dashmap::DashMap;

use crate::graph::PolicyDocument;

use super::{ResourceStore, StoreResult};

/// Concurrent in-memory resource store.
#[derive(Debug, Default)]
pub struct MemResourceStore {
    data: DashMap<String, PolicyDocument>,
}

impl MemResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub fn insert(&self, url: impl Into<String>, document: impl Into<PolicyDocument>) {
        self.data.insert(url.into(), document.into());
    }

    pub fn contains(&self, url: &str) -> bool {
        self.data.contains_key(url)
    }

    pub fn remove(&self, url: &str) -> Option<PolicyDocument> {
        self.data.remove(url).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ResourceStore for MemResourceStore {
    fn get(&self, url: &str) -> StoreResult<Option<PolicyDocument>> {
        Ok(self.data.get(url).map(|v| v.value().clone()))
    }

    fn put(&self, url: &str, document: &PolicyDocument) -> StoreResult<()> {
        self.data.insert(url.to_string(), document.clone());
        Ok(())
    }
}
