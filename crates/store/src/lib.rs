//! Document store abstraction for booktally.
//!
//! A [`DocumentStore`] holds JSON documents addressed by hierarchical
//! [`DocumentPath`]s and applies [`Patch`]es to them, one document at a time.
//! Backends live in [`backend`]; callers share a store through a
//! [`StoreHandle`].

pub mod backend;
pub mod document;
pub mod error;
pub mod path;

#[cfg(any(test, feature = "memory"))]
pub use crate::backend::MemoryStore;
pub use crate::backend::{DocumentStore, LocalStore, ReadOnlyStore};
pub use crate::document::{Document, FieldValue, Fields, Patch};
pub use crate::path::{CollectionPath, DocumentPath};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn DocumentStore + Send + Sync>;
