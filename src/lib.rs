//! Per-user download accounting over a document store.
//!
//! Each user has a download counter (`users/{userId}.downloads`) and a ledger
//! with one document per downloaded book
//! (`downloads/{userId}/downloads/{bookId}`). [`open()`] builds the store
//! named by a [`Config`] and hands back the [`DownloadAccounting`] over it.
//!
//! ```
//! use booktally::{Config, StoreConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     read_only: false,
//!     store: StoreConfig::Memory { name: "scratch".to_string() },
//! };
//! let accounting = booktally::open(&config)?;
//! accounting.record_download("u1", "b7").await?;
//! accounting.increment_downloads("u1").await?;
//! assert_eq!(accounting.download_count("u1").await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use std::sync::Arc;

pub use booktally_accounting::{Consistency, DownloadAccounting, DownloadRecord, UserCounter};
pub use booktally_config::{Config, StoreConfig};
pub use booktally_store::{DocumentStore, LocalStore, MemoryStore, ReadOnlyStore, StoreHandle};

/// Build the configured store and the accounting over it.
///
/// The configuration is validated first, so a default [`Config`] resolves its
/// store root to the platform data directory.
pub fn open(config: &Config) -> Result<DownloadAccounting> {
    let config = config.clone().validated().map_err(ErrorKind::config)?;
    let store = build_store(&config.store)?;
    let store: StoreHandle = match config.read_only {
        true => Arc::new(ReadOnlyStore::new(store)),
        false => store,
    };
    tracing::info!(store = store.name(), read_only = config.read_only, "Opened download accounting");
    Ok(DownloadAccounting::new(store))
}

fn build_store(config: &StoreConfig) -> Result<StoreHandle> {
    Ok(match config {
        StoreConfig::Local { name, root } => {
            let root = match root {
                Some(root) => root.clone(),
                None => booktally_config::default_root().map_err(ErrorKind::config)?,
            };
            tracing::debug!(name = %name, root = %root.display(), "Opening local store");
            Arc::new(LocalStore::new(name.as_str(), root).map_err(ErrorKind::store)?)
        },
        StoreConfig::Memory { name } => Arc::new(MemoryStore::default().with_name(name.as_str())),
    })
}
