//! Accounting records as read back from the store.
//!
//! Parsing is lenient: a counter with a corrupt `downloads` field reads as
//! zero, and a ledger entry that can't be understood comes back as `None`.

use booktally_store::Document;
use booktally_store::document::parse_timestamp;
use serde_json::Value;
use time::OffsetDateTime;

/// Field holding the per-user download counter.
pub const DOWNLOADS_FIELD: &str = "downloads";
/// Ledger field holding the book ID.
pub const BOOK_ID_FIELD: &str = "bookId";
/// Ledger field holding the time of the last download.
pub const DOWNLOADED_AT_FIELD: &str = "downloadedAt";

/// Per-user aggregate download counter (`users/{userId}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCounter {
    pub user_id: String,
    /// Raw stored value. Can be negative: decrements have no floor.
    pub downloads: i64,
    pub updated: OffsetDateTime,
}
impl UserCounter {
    pub fn from_document(document: &Document) -> Self {
        let downloads = read_downloads(document.get(DOWNLOADS_FIELD)).unwrap_or_else(|| {
            tracing::warn!(path = %document.path, "Counter field is missing or not a number, reading as zero");
            0
        });
        Self {
            user_id: document.id().to_string(),
            downloads,
            updated: document.updated,
        }
    }

    /// The counter as exposed to callers: never below zero.
    pub fn count(&self) -> u64 {
        self.downloads.max(0).unsigned_abs()
    }
}

/// Read a stored counter value, accepting any JSON number.
pub(crate) fn read_downloads(value: Option<&Value>) -> Option<i64> {
    let Value::Number(number) = value? else {
        return None;
    };
    if let Some(int) = number.as_i64() {
        return Some(int);
    }
    if number.as_u64().is_some() {
        return Some(i64::MAX);
    }
    // `as` saturates, and NaN can't be represented in JSON.
    number.as_f64().map(|float| float.trunc() as i64)
}

/// One entry of the per-user download ledger
/// (`downloads/{userId}/downloads/{bookId}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub user_id: String,
    pub book_id: String,
    pub downloaded_at: OffsetDateTime,
}
impl DownloadRecord {
    /// Parse a ledger document, or `None` if its fields are malformed.
    ///
    /// The document ID is authoritative for the book ID; the `bookId` field
    /// must agree with it when present.
    pub fn from_document(user_id: &str, document: &Document) -> Option<Self> {
        let book_id = document.id();
        if let Some(stored) = document.get(BOOK_ID_FIELD)
            && stored.as_str() != Some(book_id)
        {
            return None;
        }
        let downloaded_at = document.get(DOWNLOADED_AT_FIELD)?.as_str().and_then(parse_timestamp)?;
        Some(Self {
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            downloaded_at,
        })
    }
}

/// Result of comparing a user's counter against their ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Counter and ledger agree.
    Consistent { downloads: u64 },
    /// Counter and ledger disagree. `counter` is the raw stored value
    /// (zero when absent) and `ledger` the number of ledger entries.
    Drifted { counter: i64, ledger: u64 },
}
impl Consistency {
    pub fn compare(counter: i64, ledger: u64) -> Self {
        match u64::try_from(counter) {
            Ok(downloads) if downloads == ledger => Self::Consistent { downloads },
            _ => Self::Drifted { counter, ledger },
        }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent { .. })
    }
}
