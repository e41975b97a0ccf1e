//! Counter and ledger maintenance over a document store.

use booktally_store::error::Result;
use booktally_store::{CollectionPath, DocumentPath, Patch, StoreHandle};
use futures::TryStreamExt;
use std::fmt;
use tracing::instrument;

use crate::models::{BOOK_ID_FIELD, Consistency, DOWNLOADED_AT_FIELD, DOWNLOADS_FIELD, DownloadRecord, UserCounter};

/// Collection of per-user counter documents.
pub const USERS_COLLECTION: &str = "users";
/// Top-level collection (and per-user sub-collection) holding the ledger.
pub const DOWNLOADS_COLLECTION: &str = "downloads";

/// `users/{userId}`
pub fn counter_path(user_id: &str) -> Result<DocumentPath> {
    DocumentPath::new(USERS_COLLECTION, user_id)
}

/// `downloads/{userId}/downloads`
pub fn ledger_path(user_id: &str) -> Result<CollectionPath> {
    DocumentPath::new(DOWNLOADS_COLLECTION, user_id)?.subcollection(DOWNLOADS_COLLECTION)
}

/// `downloads/{userId}/downloads/{bookId}`
pub fn record_path(user_id: &str, book_id: &str) -> Result<DocumentPath> {
    ledger_path(user_id)?.doc(book_id)
}

/// Per-user download accounting.
///
/// Maintains two views of the same facts:
/// - a denormalized counter, `users/{userId}.downloads`, and
/// - a ledger with one document per downloaded book,
///   `downloads/{userId}/downloads/{bookId}`.
///
/// Every operation is an independent sequence of at most two store calls.
/// Nothing is cached between calls, and no operation touches both views:
/// keeping the counter in line with the ledger is up to the caller (pair
/// [`record_download()`](Self::record_download) with
/// [`increment_downloads()`](Self::increment_downloads), and
/// [`remove_download()`](Self::remove_download) with
/// [`decrement_downloads()`](Self::decrement_downloads)). A failure between
/// the two calls leaves them out of step; [`consistency()`](Self::consistency)
/// reports that, nothing repairs it.
///
/// Store errors are returned unmodified, and never retried.
///
/// # Examples
///
/// ```
/// use booktally_accounting::DownloadAccounting;
/// use booktally_store::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let accounting = DownloadAccounting::new(Arc::new(MemoryStore::default()));
/// accounting.record_download("u1", "b7").await?;
/// accounting.increment_downloads("u1").await?;
/// assert_eq!(accounting.download_count("u1").await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadAccounting {
    store: StoreHandle,
}
impl fmt::Debug for DownloadAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadAccounting").field("store", &self.store.name()).finish()
    }
}

impl DownloadAccounting {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Add one to the user's download counter.
    pub async fn increment_downloads(&self, user_id: &str) -> Result<()> {
        self.increment_downloads_by(user_id, 1).await
    }

    /// Add `amount` to the user's download counter, creating it at zero first
    /// if the user has none.
    ///
    /// Stores that [support upsert increments](booktally_store::DocumentStore::supports_upsert_increment)
    /// get a single merge write. Otherwise the counter is fetched, created if
    /// missing, then incremented. The existence check is not atomic with the
    /// increment, so racing callers may both create the counter. Creation is a
    /// merge write adding zero, which leaves an existing `downloads` value and
    /// any other user fields untouched.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn increment_downloads_by(&self, user_id: &str, amount: i64) -> Result<()> {
        let path = counter_path(user_id)?;
        let increment = Patch::new().increment(DOWNLOADS_FIELD, amount);
        if self.store.supports_upsert_increment() {
            tracing::debug!(%path, amount, "Applying upsert increment");
            return self.store.set(&path, &increment, true).await;
        }
        if self.store.get(&path).await?.is_none() {
            tracing::debug!(%path, "Creating missing counter");
            self.store.set(&path, &Patch::new().increment(DOWNLOADS_FIELD, 0), true).await?;
        }
        tracing::debug!(%path, amount, "Applying increment");
        self.store.update(&path, &increment).await
    }

    /// Subtract one from the user's download counter.
    ///
    /// There is no floor: decrementing a user with no counter stores `-1`.
    /// [`download_count()`](Self::download_count) still reads that as zero;
    /// [`counter()`](Self::counter) shows the raw value.
    pub async fn decrement_downloads(&self, user_id: &str) -> Result<()> {
        self.increment_downloads_by(user_id, -1).await
    }

    /// Record that the user downloaded a book, stamped with the store's
    /// current time.
    ///
    /// Downloading the same book again only refreshes `downloadedAt`.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn record_download(&self, user_id: &str, book_id: &str) -> Result<()> {
        let path = record_path(user_id, book_id)?;
        let patch = Patch::new().set(BOOK_ID_FIELD, book_id).server_timestamp(DOWNLOADED_AT_FIELD);
        tracing::debug!(%path, "Recording download");
        self.store.set(&path, &patch, true).await
    }

    /// The user's download count. Zero when the user has no counter, when the
    /// stored value is not a number, or when it has gone negative.
    pub async fn download_count(&self, user_id: &str) -> Result<u64> {
        Ok(self.counter(user_id).await?.map(|counter| counter.count()).unwrap_or(0))
    }

    /// Delete the ledger entry for one book. The counter is left alone.
    ///
    /// Removing a download that was never recorded succeeds.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn remove_download(&self, user_id: &str, book_id: &str) -> Result<()> {
        let path = record_path(user_id, book_id)?;
        tracing::debug!(%path, "Removing download");
        self.store.delete(&path).await
    }

    /// The user's stored counter, including negative values.
    pub async fn counter(&self, user_id: &str) -> Result<Option<UserCounter>> {
        let path = counter_path(user_id)?;
        Ok(self.store.get(&path).await?.as_ref().map(UserCounter::from_document))
    }

    /// A single ledger entry, or `None` if absent or malformed.
    pub async fn download(&self, user_id: &str, book_id: &str) -> Result<Option<DownloadRecord>> {
        let path = record_path(user_id, book_id)?;
        let Some(document) = self.store.get(&path).await? else {
            return Ok(None);
        };
        let record = DownloadRecord::from_document(user_id, &document);
        if record.is_none() {
            tracing::warn!(%path, "Ledger entry is malformed");
        }
        Ok(record)
    }

    /// Every ledger entry of the user, in book ID order. Malformed entries are
    /// skipped.
    pub async fn downloads(&self, user_id: &str) -> Result<Vec<DownloadRecord>> {
        let collection = ledger_path(user_id)?;
        let documents = self.store.list(&collection).await?;
        Ok(documents
            .iter()
            .filter_map(|document| {
                let record = DownloadRecord::from_document(user_id, document);
                if record.is_none() {
                    tracing::warn!(path = %document.path, "Skipping malformed ledger entry");
                }
                record
            })
            .collect())
    }

    /// Compare the user's counter against the size of their ledger.
    ///
    /// Every ledger document counts, malformed or not. Purely a report: the
    /// two reads are not a snapshot, so concurrent writers can make a
    /// consistent pair look drifted (or the reverse).
    pub async fn consistency(&self, user_id: &str) -> Result<Consistency> {
        let counter = self.counter(user_id).await?.map(|counter| counter.downloads).unwrap_or(0);
        let collection = ledger_path(user_id)?;
        let mut stream = self.store.list_stream(&collection);
        let mut ledger = 0u64;
        while stream.try_next().await?.is_some() {
            ledger += 1;
        }
        Ok(Consistency::compare(counter, ledger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use booktally_store::backend::DocumentStream;
    use booktally_store::error::ErrorKind;
    use booktally_store::{Document, DocumentStore, LocalStore, MemoryStore};
    use rstest::rstest;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn accounting(upsert: bool) -> (Arc<MemoryStore>, DownloadAccounting) {
        let store = Arc::new(MemoryStore::default().with_upsert_increment(upsert));
        (store.clone(), DownloadAccounting::new(store))
    }

    async fn fields(store: &MemoryStore, path: &str) -> Option<Value> {
        let path = DocumentPath::parse(path).unwrap();
        store.get(&path).await.unwrap().map(|document| Value::Object(document.fields))
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_fresh_user_counts_zero(#[case] upsert: bool) {
        let (_, accounting) = accounting(upsert);
        assert_eq!(accounting.download_count("u1").await.unwrap(), 0);
        assert_eq!(accounting.counter("u1").await.unwrap(), None);
    }

    #[rstest]
    #[case::upsert_once(true, 1)]
    #[case::upsert_many(true, 7)]
    #[case::two_step_once(false, 1)]
    #[case::two_step_many(false, 7)]
    #[tokio::test]
    async fn test_increment_counts_each_call(#[case] upsert: bool, #[case] times: u64) {
        let (store, accounting) = accounting(upsert);
        for _ in 0..times {
            accounting.increment_downloads("u1").await.unwrap();
        }
        assert_eq!(accounting.download_count("u1").await.unwrap(), times);
        assert_eq!(fields(&store, "users/u1").await, Some(json!({ "downloads": times })));
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_increment_then_decrement_restores_count(#[case] upsert: bool) {
        let (_, accounting) = accounting(upsert);
        accounting.increment_downloads_by("u1", 3).await.unwrap();
        accounting.increment_downloads("u1").await.unwrap();
        accounting.decrement_downloads("u1").await.unwrap();
        assert_eq!(accounting.download_count("u1").await.unwrap(), 3);
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_decrement_fresh_user_goes_negative(#[case] upsert: bool) {
        let (_, accounting) = accounting(upsert);
        accounting.decrement_downloads("u1").await.unwrap();
        let counter = accounting.counter("u1").await.unwrap().unwrap();
        assert_eq!(counter.downloads, -1);
        assert_eq!(accounting.download_count("u1").await.unwrap(), 0);

        accounting.increment_downloads("u1").await.unwrap();
        accounting.increment_downloads("u1").await.unwrap();
        assert_eq!(accounting.download_count("u1").await.unwrap(), 1);
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_existing_counter_keeps_counting(#[case] upsert: bool) {
        let store = MemoryStore::with_documents([("users/u1", json!({ "downloads": 1 }))]).with_upsert_increment(upsert);
        let accounting = DownloadAccounting::new(Arc::new(store));
        for _ in 0..5 {
            accounting.increment_downloads("u1").await.unwrap();
        }
        assert_eq!(accounting.download_count("u1").await.unwrap(), 6);
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_increment_keeps_other_user_fields(#[case] upsert: bool) {
        let store = Arc::new(
            MemoryStore::with_documents([("users/u1", json!({ "name": "Ada" }))]).with_upsert_increment(upsert),
        );
        let accounting = DownloadAccounting::new(store.clone());
        accounting.increment_downloads("u1").await.unwrap();
        assert_eq!(fields(&store, "users/u1").await, Some(json!({ "name": "Ada", "downloads": 1 })));
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_corrupt_counter_reads_zero_and_restarts(#[case] upsert: bool) {
        let store = MemoryStore::with_documents([("users/u1", json!({ "downloads": "lots" }))]).with_upsert_increment(upsert);
        let accounting = DownloadAccounting::new(Arc::new(store));
        assert_eq!(accounting.download_count("u1").await.unwrap(), 0);
        accounting.increment_downloads("u1").await.unwrap();
        assert_eq!(accounting.download_count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_download() {
        let (store, accounting) = accounting(true);
        let before = time::OffsetDateTime::now_utc();
        accounting.record_download("u1", "b7").await.unwrap();

        let record = accounting.download("u1", "b7").await.unwrap().unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.book_id, "b7");
        assert!(record.downloaded_at >= before);
        // The ledger write never touches the counter.
        assert_eq!(fields(&store, "users/u1").await, None);
    }

    #[tokio::test]
    async fn test_record_twice_refreshes_timestamp() {
        let (store, accounting) = accounting(true);
        accounting.record_download("u1", "b7").await.unwrap();
        let first = accounting.download("u1", "b7").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        accounting.record_download("u1", "b7").await.unwrap();
        let second = accounting.download("u1", "b7").await.unwrap().unwrap();

        assert!(second.downloaded_at > first.downloaded_at);
        assert_eq!(accounting.downloads("u1").await.unwrap().len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_record_keeps_extra_fields() {
        let store = Arc::new(MemoryStore::with_documents([(
            "downloads/u1/downloads/b7",
            json!({ "bookId": "b7", "downloadedAt": "2024-03-01T12:00:00Z", "format": "epub" }),
        )]));
        let accounting = DownloadAccounting::new(store.clone());
        accounting.record_download("u1", "b7").await.unwrap();
        let stored = fields(&store, "downloads/u1/downloads/b7").await.unwrap();
        assert_eq!(stored["format"], json!("epub"));
        assert_ne!(stored["downloadedAt"], json!("2024-03-01T12:00:00Z"));
    }

    #[tokio::test]
    async fn test_remove_download() {
        let (_, accounting) = accounting(true);
        accounting.record_download("u1", "b7").await.unwrap();
        accounting.increment_downloads("u1").await.unwrap();

        accounting.remove_download("u1", "b7").await.unwrap();
        assert_eq!(accounting.download("u1", "b7").await.unwrap(), None);
        assert_eq!(accounting.download_count("u1").await.unwrap(), 1);

        // Removing again is not an error.
        accounting.remove_download("u1", "b7").await.unwrap();
    }

    #[tokio::test]
    async fn test_downloads_are_sorted_and_skip_malformed() {
        let store = MemoryStore::with_documents([
            ("downloads/u1/downloads/b9", json!({ "bookId": "b9", "downloadedAt": "2024-03-02T08:00:00Z" })),
            ("downloads/u1/downloads/b1", json!({ "bookId": "b1", "downloadedAt": "2024-03-01T12:00:00Z" })),
            ("downloads/u1/downloads/b5", json!({ "bookId": "b5" })),
            ("downloads/u2/downloads/b3", json!({ "bookId": "b3", "downloadedAt": "2024-03-01T12:00:00Z" })),
        ]);
        let accounting = DownloadAccounting::new(Arc::new(store));
        let books: Vec<_> = accounting
            .downloads("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.book_id)
            .collect();
        assert_eq!(books, ["b1", "b9"]);
        assert!(accounting.downloads("u3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paired_calls_stay_consistent() {
        let (_, accounting) = accounting(true);
        for book in ["b1", "b2", "b3"] {
            accounting.record_download("u1", book).await.unwrap();
            accounting.increment_downloads("u1").await.unwrap();
        }
        accounting.remove_download("u1", "b2").await.unwrap();
        accounting.decrement_downloads("u1").await.unwrap();
        assert_eq!(accounting.consistency("u1").await.unwrap(), Consistency::Consistent { downloads: 2 });
    }

    #[tokio::test]
    async fn test_failure_between_calls_shows_as_drift() {
        let (store, accounting) = accounting(true);
        accounting.record_download("u1", "b7").await.unwrap();
        store.set_offline(true);
        let err = accounting.increment_downloads("u1").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unavailable(_)));
        store.set_offline(false);

        let consistency = accounting.consistency("u1").await.unwrap();
        assert_eq!(consistency, Consistency::Drifted { counter: 0, ledger: 1 });
        assert!(!consistency.is_consistent());
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_store_errors_propagate(#[case] upsert: bool) {
        let (store, accounting) = accounting(upsert);
        store.set_offline(true);
        let unavailable = |err: booktally_store::error::Error| matches!(&*err, ErrorKind::Unavailable(_));
        assert!(unavailable(accounting.increment_downloads("u1").await.unwrap_err()));
        assert!(unavailable(accounting.decrement_downloads("u1").await.unwrap_err()));
        assert!(unavailable(accounting.record_download("u1", "b7").await.unwrap_err()));
        assert!(unavailable(accounting.download_count("u1").await.unwrap_err()));
        assert!(unavailable(accounting.remove_download("u1", "b7").await.unwrap_err()));
        assert!(unavailable(accounting.downloads("u1").await.unwrap_err()));
        assert!(unavailable(accounting.consistency("u1").await.unwrap_err()));
    }

    #[rstest]
    #[case("", "b7")]
    #[case("u/1", "b7")]
    #[case("u1", "..")]
    #[case("u1", "")]
    #[tokio::test]
    async fn test_invalid_ids_never_reach_the_store(#[case] user_id: &str, #[case] book_id: &str) {
        let (store, accounting) = accounting(true);
        let err = accounting.record_download(user_id, book_id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        let err = accounting.remove_download(user_id, book_id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_user_id_on_counter() {
        let (store, accounting) = accounting(false);
        let err = accounting.increment_downloads("a/b").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        let err = accounting.download_count("").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upsert_increments() {
        let (_, accounting) = accounting(true);
        let handles: Vec<_> = (0..40)
            .map(|_| {
                let accounting = accounting.clone();
                tokio::spawn(async move { accounting.increment_downloads("u1").await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(accounting.download_count("u1").await.unwrap(), 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_on_existing_counter() {
        let store = MemoryStore::with_documents([("users/u1", json!({ "downloads": 0 }))]).with_upsert_increment(false);
        let accounting = DownloadAccounting::new(Arc::new(store));
        let handles: Vec<_> = (0..40)
            .map(|_| {
                let accounting = accounting.clone();
                tokio::spawn(async move { accounting.increment_downloads("u1").await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(accounting.download_count("u1").await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new("local", temp.path()).unwrap());
        let accounting = DownloadAccounting::new(store);

        accounting.record_download("u1", "b7").await.unwrap();
        accounting.increment_downloads("u1").await.unwrap();
        accounting.record_download("u1", "b8").await.unwrap();
        accounting.increment_downloads("u1").await.unwrap();
        accounting.remove_download("u1", "b7").await.unwrap();
        accounting.decrement_downloads("u1").await.unwrap();

        // A fresh handle over the same directory sees the same state.
        let reopened = DownloadAccounting::new(Arc::new(LocalStore::new("local", temp.path()).unwrap()));
        assert_eq!(reopened.download_count("u1").await.unwrap(), 1);
        let books: Vec<_> = reopened.downloads("u1").await.unwrap().into_iter().map(|r| r.book_id).collect();
        assert_eq!(books, ["b8"]);
        assert!(reopened.consistency("u1").await.unwrap().is_consistent());
    }

    #[rstest]
    #[case::upsert(true)]
    #[case::two_step(false)]
    #[tokio::test]
    async fn test_increment_then_increment_by(#[case] upsert: bool) {
        let (_, accounting) = accounting(upsert);
        accounting.increment_downloads("u1").await.unwrap();
        accounting.increment_downloads_by("u1", 5).await.unwrap();
        assert_eq!(accounting.download_count("u1").await.unwrap(), 6);
    }

    /// Answers every `get` with `None`, as if each caller checked for the
    /// counter before any other caller created it.
    struct StaleReads(Arc<MemoryStore>);

    #[async_trait]
    impl DocumentStore for StaleReads {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn get(&self, _path: &DocumentPath) -> Result<Option<Document>> {
            Ok(None)
        }

        async fn set(&self, path: &DocumentPath, patch: &Patch, merge: bool) -> Result<()> {
            self.0.set(path, patch, merge).await
        }

        async fn update(&self, path: &DocumentPath, patch: &Patch) -> Result<()> {
            self.0.update(path, patch).await
        }

        async fn delete(&self, path: &DocumentPath) -> Result<()> {
            self.0.delete(path).await
        }

        fn list_stream<'a>(&'a self, collection: &'a CollectionPath) -> DocumentStream<'a> {
            self.0.list_stream(collection)
        }
    }

    #[tokio::test]
    async fn test_redundant_counter_creation_keeps_count() {
        let inner = Arc::new(MemoryStore::with_documents([("users/u1", json!({ "name": "Ada" }))]));
        let stale = DownloadAccounting::new(Arc::new(StaleReads(inner.clone())));
        stale.increment_downloads("u1").await.unwrap();
        stale.increment_downloads("u1").await.unwrap();
        stale.increment_downloads_by("u1", 3).await.unwrap();

        assert_eq!(DownloadAccounting::new(inner.clone()).download_count("u1").await.unwrap(), 5);
        assert_eq!(fields(&inner, "users/u1").await, Some(json!({ "name": "Ada", "downloads": 5 })));
    }

    #[test]
    fn test_debug_names_the_store() {
        let accounting = DownloadAccounting::new(Arc::new(MemoryStore::default().with_name("scratch")));
        assert_eq!(format!("{accounting:?}"), r#"DownloadAccounting { store: "scratch" }"#);
    }

    #[test]
    fn test_paths() {
        assert_eq!(counter_path("u1").unwrap().to_string(), "users/u1");
        assert_eq!(record_path("u1", "b7").unwrap().to_string(), "downloads/u1/downloads/b7");
        assert!(ledger_path("u1").unwrap().contains(&record_path("u1", "b7").unwrap()));
    }
}
