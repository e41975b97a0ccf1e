//! Download accounting for booktally.
//!
//! Keeps a per-user download counter and a per-(user, book) download ledger
//! in a [`DocumentStore`](booktally_store::DocumentStore). See
//! [`DownloadAccounting`] for the operations and their consistency contract.

mod accounting;
mod models;

pub use crate::accounting::{
    DOWNLOADS_COLLECTION, DownloadAccounting, USERS_COLLECTION, counter_path, ledger_path, record_path,
};
pub use crate::models::{
    BOOK_ID_FIELD, Consistency, DOWNLOADED_AT_FIELD, DOWNLOADS_FIELD, DownloadRecord, UserCounter,
};
