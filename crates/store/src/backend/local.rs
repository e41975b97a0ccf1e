//! Local filesystem document store.
//!
//! Each document is a JSON file under a configured root directory. The
//! document `downloads/u1/downloads/b7` lives at
//! `{root}/downloads/u1/downloads/b7.json`, so a document and its
//! sub-collections sit side by side (`u1.json` next to the `u1/` directory).

use crate::backend::{DocumentStream, apply_set, apply_update};
use crate::document::{Document, Fields, Patch};
use crate::error::{ErrorKind, Result};
use crate::path::{CollectionPath, DocumentPath};
use crate::DocumentStore;
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::Mutex;

const EXTENSION: &str = ".json";
const TEMP_EXTENSION: &str = "json.tmp";

/// On-disk representation of a document.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    #[serde(with = "time::serde::rfc3339")]
    updated: OffsetDateTime,
    fields: Fields,
}

/// Local filesystem document store.
///
/// Reads go straight to disk. Writes are serialized through a mutex shared by
/// all clones of the store, so a read-modify-write (increments in particular)
/// is atomic with respect to every other write made through the same
/// instance. Files are replaced by rename, so readers never observe a
/// half-written document.
///
/// Other processes writing to the same root are not coordinated with.
///
/// # Examples
///
/// ```no_run
/// use booktally_store::LocalStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = LocalStore::new("local", "/var/lib/booktally")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalStore {
    name: String,
    /// Root directory holding every collection
    root: PathBuf,
    writes: Arc<Mutex<()>>,
}
impl LocalStore {
    /// Create a new local filesystem store.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root.display().to_string()))?;
        }
        Ok(Self {
            name: name.into(),
            root,
            writes: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &CollectionPath) -> PathBuf {
        let mut dir = self.root.clone();
        dir.extend(collection.segments());
        dir
    }

    fn file_path(&self, path: &DocumentPath) -> PathBuf {
        self.collection_dir(&path.collection()).join(format!("{}{EXTENSION}", path.id()))
    }

    fn map_io_error(e: std::io::Error, path: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn read_document(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let bytes = match fs::read(self.file_path(path)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                exn::bail!(Self::map_io_error(e, &path.to_string()));
            },
        };
        let stored: StoredDocument =
            serde_json::from_slice(&bytes).or_raise(|| ErrorKind::InvalidData(path.to_string()))?;
        Ok(Some(Document::new(path.clone(), stored.fields, stored.updated)))
    }

    /// Must only be called while holding the write lock.
    async fn write_document(&self, path: &DocumentPath, fields: Fields, updated: OffsetDateTime) -> Result<()> {
        let file = self.file_path(path);
        let temp = file.with_extension(TEMP_EXTENSION);
        let bytes = serde_json::to_vec_pretty(&StoredDocument { updated, fields })
            .or_raise(|| ErrorKind::BackendError(format!("could not encode document {path}")))?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, &path.to_string()))?;
        }
        fs::write(&temp, bytes).await.map_err(|e| Self::map_io_error(e, &path.to_string()))?;
        Ok(fs::rename(&temp, &file).await.map_err(|e| Self::map_io_error(e, &path.to_string()))?)
    }

    /// Sorted IDs of the documents directly inside a collection.
    async fn document_ids(&self, collection: &CollectionPath) -> Result<Vec<String>> {
        let dir = self.collection_dir(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // A collection nobody has written to yet is just empty.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                exn::bail!(Self::map_io_error(e, &collection.to_string()));
            },
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            if !entry.file_type().await.map_err(ErrorKind::Io)?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            // Note: silently skip anything that isn't one of ours (temp files,
            // non-UTF8 names, stray files dropped into the directory).
            let Some(id) = file_name.to_str().and_then(|name| name.strip_suffix(EXTENSION)) else {
                continue;
            };
            ids.push(id.to_string());
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_upsert_increment(&self) -> bool {
        true
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.read_document(path).await
    }

    async fn set(&self, path: &DocumentPath, patch: &Patch, merge: bool) -> Result<()> {
        let _guard = self.writes.lock().await;
        let now = OffsetDateTime::now_utc();
        let existing = match merge {
            true => self.read_document(path).await?,
            false => None,
        };
        let fields = apply_set(existing.as_ref().map(|d| &d.fields), patch, merge, now)?;
        self.write_document(path, fields, now).await
    }

    async fn update(&self, path: &DocumentPath, patch: &Patch) -> Result<()> {
        let _guard = self.writes.lock().await;
        let now = OffsetDateTime::now_utc();
        let existing = self.read_document(path).await?;
        let fields = apply_update(path, existing.as_ref().map(|d| &d.fields), patch, now)?;
        self.write_document(path, fields, now).await
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        let _guard = self.writes.lock().await;
        match fs::remove_file(self.file_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                exn::bail!(Self::map_io_error(e, &path.to_string()));
            },
        }
    }

    fn list_stream<'a>(&'a self, collection: &'a CollectionPath) -> DocumentStream<'a> {
        Box::pin(stream! {
            match self.document_ids(collection).await {
                Err(e) => {
                    yield Err(e);
                },
                Ok(ids) => {
                    for id in ids {
                        let path = match collection.doc(&id) {
                            Ok(path) => path,
                            Err(_) => {
                                tracing::debug!(collection = %collection, id = %id, "Skipping file with invalid document ID");
                                continue;
                            },
                        };
                        match self.read_document(&path).await {
                            Ok(Some(document)) => {
                                yield Ok(document);
                            },
                            // Deleted between listing and reading.
                            Ok(None) => {},
                            Err(e) => {
                                yield Err(e);
                            },
                        }
                    }
                },
            }
        })
    }
}
