//! Read-only document store decorator.
//!
//! Wraps another store and prevents write operations from executing, while
//! still indicating success on return.

use async_trait::async_trait;

use crate::backend::DocumentStream;
use crate::document::{Document, Patch};
use crate::error::Result;
use crate::path::{CollectionPath, DocumentPath};
use crate::{DocumentStore, StoreHandle};

/// Read-only document store.
///
/// Wraps another store and silently drops all write operations, logging an
/// [`info event`](tracing::Event).
#[derive(Clone)]
pub struct ReadOnlyStore {
    inner: StoreHandle,
}
impl ReadOnlyStore {
    pub fn new(inner: StoreHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DocumentStore for ReadOnlyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_upsert_increment(&self) -> bool {
        self.inner.supports_upsert_increment()
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocumentPath, patch: &Patch, merge: bool) -> Result<()> {
        tracing::info!(store = self.name(), %path, fields = patch.len(), merge, "Skipping set during read-only mode");
        Ok(())
    }

    async fn update(&self, path: &DocumentPath, patch: &Patch) -> Result<()> {
        tracing::info!(store = self.name(), %path, fields = patch.len(), "Skipping update during read-only mode");
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        tracing::info!(store = self.name(), %path, "Skipping delete during read-only mode");
        Ok(())
    }

    fn list_stream<'a>(&'a self, collection: &'a CollectionPath) -> DocumentStream<'a> {
        self.inner.list_stream(collection)
    }
}
