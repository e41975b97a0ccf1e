//! Document store trait and implementations.
//!
//! This module defines the `DocumentStore` trait, a unified interface over
//! hierarchical document databases (in-memory, local JSON files, or a hosted
//! service behind an adapter implemented elsewhere).

mod local;
#[cfg(any(test, feature = "memory"))]
mod memory;
mod ro;

pub use self::local::LocalStore;
#[cfg(any(test, feature = "memory"))]
pub use self::memory::MemoryStore;
pub use self::ro::ReadOnlyStore;
use crate::document::{Document, Fields, Patch};
use crate::error::{ErrorKind, Result};
use crate::path::{CollectionPath, DocumentPath};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use time::OffsetDateTime;

pub type DocumentStream<'a> = Pin<Box<dyn Stream<Item = Result<Document>> + Send + 'a>>;

/// Unified interface for document stores.
///
/// Documents are addressed by [`DocumentPath`] and hold a flat map of JSON
/// fields. Every write is atomic per document: concurrent increments against
/// the same field never lose updates. Nothing spans more than one document;
/// there are no transactions.
///
/// # Examples
///
/// ```
/// use booktally_store::{DocumentPath, DocumentStore, Patch, error::Result};
///
/// async fn bump(store: &dyn DocumentStore, user: &str) -> Result<()> {
///     let path = DocumentPath::new("users", user)?;
///     if store.get(&path).await?.is_none() {
///         store.set(&path, &Patch::new().set("downloads", 0), true).await?;
///     }
///     store.update(&path, &Patch::new().increment("downloads", 1)).await
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the configured store (used for logging only).
    fn name(&self) -> &str;

    /// Whether a merge [`set()`](Self::set) carrying an increment against a
    /// missing document creates it with a zero base, in one atomic write.
    ///
    /// Callers may use this to skip the get-then-create round trip before an
    /// increment. Stores that return `false` still accept such writes but make
    /// no promise about their atomicity.
    fn supports_upsert_increment(&self) -> bool {
        false
    }

    /// Fetch a document. Absence is not an error.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// Check if a document exists.
    async fn exists(&self, path: &DocumentPath) -> Result<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Write a document, creating it if needed.
    ///
    /// With `merge`, only the fields named in the patch are touched. Without
    /// it, the document is replaced by the patch's fields.
    async fn set(&self, path: &DocumentPath, patch: &Patch, merge: bool) -> Result<()>;

    /// Apply a patch to an existing document.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the
    /// document does not exist.
    async fn update(&self, path: &DocumentPath, patch: &Patch) -> Result<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, path: &DocumentPath) -> Result<()>;

    /// Stream the documents directly inside a collection, in ID order.
    ///
    /// Documents in nested sub-collections are not included. Listing a
    /// collection that has never been written to yields nothing.
    fn list_stream<'a>(&'a self, collection: &'a CollectionPath) -> DocumentStream<'a>;

    /// Collect [`list_stream()`](Self::list_stream) into a [`Vec`].
    async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>> {
        self.list_stream(collection).try_collect().await
    }
}

/// Compute the fields resulting from a `set`.
pub(crate) fn apply_set(existing: Option<&Fields>, patch: &Patch, merge: bool, now: OffsetDateTime) -> Result<Fields> {
    let mut fields = match (merge, existing) {
        (true, Some(existing)) => existing.clone(),
        _ => Fields::new(),
    };
    patch.apply(&mut fields, now)?;
    Ok(fields)
}

/// Compute the fields resulting from an `update`.
pub(crate) fn apply_update(
    path: &DocumentPath,
    existing: Option<&Fields>,
    patch: &Patch,
    now: OffsetDateTime,
) -> Result<Fields> {
    let Some(existing) = existing else {
        exn::bail!(ErrorKind::NotFound(path.to_string()));
    };
    let mut fields = existing.clone();
    patch.apply(&mut fields, now)?;
    Ok(fields)
}
