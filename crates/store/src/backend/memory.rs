//! In-memory document store.

use super::{DocumentStream, apply_set, apply_update};
use crate::document::{Document, Fields, Patch};
use crate::error::{ErrorKind, Result};
use crate::path::{CollectionPath, DocumentPath};
use async_stream::stream;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::DocumentStore;

/// In-memory document store.
///
/// Documents are stored in a `BTreeMap` behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation, and each
/// write holds the write lock for its whole read-modify-write cycle.
///
/// Two switches make it useful for exercising callers:
/// - [`with_upsert_increment(false)`](Self::with_upsert_increment) makes the
///   store report no upsert-increment support, so callers take their
///   check-then-create path.
/// - [`set_offline(true)`](Self::set_offline) makes every call fail with
///   [`Unavailable`](ErrorKind::Unavailable).
///
/// # Examples
///
/// ```
/// use booktally_store::{DocumentPath, DocumentStore, MemoryStore, Patch};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::with_documents([
///     ("users/u1", json!({ "downloads": 2 })),
/// ]);
/// let path = DocumentPath::parse("users/u1")?;
/// store.update(&path, &Patch::new().increment("downloads", 1)).await?;
/// assert_eq!(store.get(&path).await?.unwrap().get("downloads"), Some(&json!(3)));
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    name: String,
    upsert_increment: bool,
    offline: AtomicBool,
    documents: RwLock<BTreeMap<DocumentPath, (OffsetDateTime, Fields)>>,
}

impl MemoryStore {
    /// Create a store pre-populated with documents.
    ///
    /// Panics if any path fails validation or any value is not a JSON
    /// object. If test setup is wrong, then test should not pass.
    pub fn with_documents(documents: impl IntoIterator<Item = (impl AsRef<str>, Value)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut map = BTreeMap::new();
        for (path, value) in documents {
            let path = path.as_ref();
            let Ok(validated) = DocumentPath::parse(path) else {
                panic!("MemoryStore::with_documents: invalid path {path}");
            };
            let Value::Object(fields) = value else {
                panic!("MemoryStore::with_documents: document {path} is not an object");
            };
            map.insert(validated, (now, fields));
        }
        Self {
            name: "memory".to_string(),
            upsert_increment: true,
            offline: AtomicBool::new(false),
            documents: RwLock::new(map),
        }
    }

    /// Change the name of the store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Change what [`supports_upsert_increment()`](DocumentStore::supports_upsert_increment) reports.
    pub fn with_upsert_increment(mut self, supported: bool) -> Self {
        self.upsert_increment = supported;
        self
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored documents across all collections.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unavailable(format!("store `{}` is offline", self.name)));
        }
        Ok(())
    }
}
impl Default for MemoryStore {
    fn default() -> Self {
        let documents: [(&str, Value); 0] = [];
        Self::with_documents(documents)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_upsert_increment(&self) -> bool {
        self.upsert_increment
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.ensure_online()?;
        let guard = self.documents.read().await;
        Ok(guard
            .get(path)
            .map(|(updated, fields)| Document::new(path.clone(), fields.clone(), *updated)))
    }

    async fn set(&self, path: &DocumentPath, patch: &Patch, merge: bool) -> Result<()> {
        self.ensure_online()?;
        let now = OffsetDateTime::now_utc();
        let mut guard = self.documents.write().await;
        let fields = apply_set(guard.get(path).map(|(_, fields)| fields), patch, merge, now)?;
        guard.insert(path.clone(), (now, fields));
        Ok(())
    }

    async fn update(&self, path: &DocumentPath, patch: &Patch) -> Result<()> {
        self.ensure_online()?;
        let now = OffsetDateTime::now_utc();
        let mut guard = self.documents.write().await;
        let fields = apply_update(path, guard.get(path).map(|(_, fields)| fields), patch, now)?;
        guard.insert(path.clone(), (now, fields));
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        self.ensure_online()?;
        self.documents.write().await.remove(path);
        Ok(())
    }

    fn list_stream<'a>(&'a self, collection: &'a CollectionPath) -> DocumentStream<'a> {
        Box::pin(stream! {
            match self.ensure_online() {
                Err(e) => {
                    yield Err(e);
                },
                Ok(()) => {
                    // Snapshot matching entries under the read lock, then drop it
                    // before yielding to avoid holding the lock across yield points.
                    let documents: Vec<Document> = {
                        let guard = self.documents.read().await;
                        guard
                            .iter()
                            .filter(|(path, _)| collection.contains(path))
                            .map(|(path, (updated, fields))| Document::new(path.clone(), fields.clone(), *updated))
                            .collect()
                    };
                    for document in documents {
                        yield Ok(document);
                    }
                },
            }
        })
    }
}
