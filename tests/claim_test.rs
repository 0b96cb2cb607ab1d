//! Claim protocol integration tests.
//!
//! Everything runs against the bundled memory store, which implements the
//! same conditional-write contract a networked backend does. The wrapper
//! stores at the bottom inject conflicts and outages to drive the retry
//! paths that a healthy store never exercises.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use instructpad::claim::{ClaimConfig, ClaimCoordinator, ClaimOutcome};
use instructpad::error::{Error, Result};
use instructpad::model::{ItemId, Payload, Status, WorkItem};
use instructpad::status::Verdict;
use instructpad::store::{
    CursorId, DocumentStore, DocumentUpdate, KeywordField, MemoryStore, SearchFilter, StoredItem,
    TermsBucket, UpdateOutcome, VersionToken,
};

fn payload(n: usize) -> Payload {
    Payload {
        instruction: format!("Rewrite sentence {n}"),
        input: format!("source text {n}"),
        output: String::new(),
    }
}

/// Helper: a store holding `count` unclaimed items under `script`.
fn seeded_store(script: &str, count: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for n in 0..count {
        store.insert_new(script, payload(n)).unwrap();
    }
    store
}

/// Helper: a coordinator with no inter-attempt pause, so conflict tests
/// finish quickly.
fn coordinator(store: Arc<dyn DocumentStore>, max_attempts: u32) -> ClaimCoordinator {
    ClaimCoordinator::with_config(
        store,
        ClaimConfig {
            max_attempts,
            retry_delay: Duration::ZERO,
        },
    )
}

fn claimed_item(outcome: ClaimOutcome) -> StoredItem {
    match outcome {
        ClaimOutcome::Claimed(stored) => *stored,
        other => panic!("expected Claimed, got {other:?}"),
    }
}

#[tokio::test]
async fn claim_on_an_empty_pool_is_nothing_new() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = ClaimCoordinator::new(store);

    let outcome = coordinator
        .claim_next("alpaca", "ann@example.com")
        .await
        .unwrap();
    assert!(
        matches!(outcome, ClaimOutcome::NothingNew),
        "got {outcome:?}"
    );
}

#[tokio::test]
async fn claim_takes_the_front_of_the_pool() {
    let store = seeded_store("alpaca", 3);
    let coordinator = coordinator(store.clone(), 5);

    let first = claimed_item(
        coordinator
            .claim_next("alpaca", "ann@example.com")
            .await
            .unwrap(),
    );
    assert_eq!(first.item.status, Status::InProgress);
    assert_eq!(first.item.updated_by.as_deref(), Some("ann@example.com"));
    assert_eq!(first.item.payload.instruction, "Rewrite sentence 0");

    // The second claim moves on; the first item is spoken for.
    let second = claimed_item(
        coordinator
            .claim_next("alpaca", "bob@example.com")
            .await
            .unwrap(),
    );
    assert_ne!(second.id, first.id);
    assert_eq!(second.item.payload.instruction, "Rewrite sentence 1");
}

#[tokio::test]
async fn claim_is_scoped_to_the_script() {
    let store = seeded_store("alpaca", 1);
    store.insert_new("dolly", payload(9)).unwrap();
    let coordinator = coordinator(store.clone(), 5);

    let claimed = claimed_item(
        coordinator
            .claim_next("dolly", "ann@example.com")
            .await
            .unwrap(),
    );
    assert_eq!(claimed.item.meta.script, "dolly");

    let outcome = coordinator
        .claim_next("grammar", "ann@example.com")
        .await
        .unwrap();
    assert!(
        matches!(outcome, ClaimOutcome::NothingNew),
        "unknown script should claim nothing, got {outcome:?}"
    );
}

#[tokio::test]
async fn claim_rejects_a_blank_claimant_before_touching_the_store() {
    let store = Arc::new(CountingStore::new(MemoryStore::new()));
    let coordinator = ClaimCoordinator::new(store.clone());

    let err = coordinator.claim_next("alpaca", "  ").await.unwrap_err();
    assert!(matches!(err, Error::EmptyClaimant), "got {err:?}");
    assert_eq!(store.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_claimants_never_share_an_item() {
    let items = 12;
    let claimants = 8;
    let store = seeded_store("alpaca", items);

    // Budget of one attempt per rival: a lost race always means some rival
    // claimed that candidate, so the pool shrinks and the loop terminates.
    let coordinator = Arc::new(coordinator(store.clone(), claimants));

    let mut handles = Vec::new();
    for i in 0..claimants {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let claimant = format!("annotator{i}@example.com");
            let outcome = coordinator.claim_next("alpaca", &claimant).await.unwrap();
            (claimant, outcome)
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let (claimant, outcome) = handle.await.unwrap();
        let stored = claimed_item(outcome);
        assert_eq!(stored.item.status, Status::InProgress);
        assert_eq!(stored.item.updated_by.as_deref(), Some(claimant.as_str()));
        assert!(
            seen.insert(stored.id.clone()),
            "item {} was handed to two claimants",
            stored.id
        );
    }
    assert_eq!(seen.len(), claimants as usize);

    // The store agrees: exactly one in-progress item per claimant, the
    // rest untouched.
    let in_progress = store
        .search(
            &SearchFilter::for_script("alpaca").with_status(Status::InProgress),
            100,
        )
        .await
        .unwrap();
    let unclaimed = store
        .search(
            &SearchFilter::for_script("alpaca").with_status(Status::New),
            100,
        )
        .await
        .unwrap();
    assert_eq!(in_progress.len(), claimants as usize);
    assert_eq!(unclaimed.len(), items - claimants as usize);
}

#[tokio::test]
async fn two_rivals_on_a_two_item_script_both_claim() {
    let store = seeded_store("alpaca", 2);
    store.insert_new("dolly", payload(5)).unwrap();
    let coordinator = Arc::new(coordinator(store.clone(), 5));

    let a = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.claim_next("alpaca", "a@example.com").await })
    };
    let b = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.claim_next("alpaca", "b@example.com").await })
    };

    let first = claimed_item(a.await.unwrap().unwrap());
    let second = claimed_item(b.await.unwrap().unwrap());

    assert_ne!(first.id, second.id);
    assert_eq!(first.item.meta.script, "alpaca");
    assert_eq!(second.item.meta.script, "alpaca");

    // The unrelated script is untouched.
    let dolly = store
        .search(
            &SearchFilter::for_script("dolly").with_status(Status::New),
            10,
        )
        .await
        .unwrap();
    assert_eq!(dolly.len(), 1);
}

#[tokio::test]
async fn conflicted_claim_requeries_instead_of_retrying_the_same_write() {
    let store = Arc::new(FlakyStore::conflicting_first(MemoryStore::new(), 2));
    store.inner.insert_new("alpaca", payload(0)).unwrap();
    let coordinator = coordinator(store.clone(), 5);

    let claimed = claimed_item(
        coordinator
            .claim_next("alpaca", "ann@example.com")
            .await
            .unwrap(),
    );
    assert_eq!(claimed.item.status, Status::InProgress);

    // Two injected conflicts, then the win, then the authoritative re-read:
    // every retry goes back to search before writing again.
    let ops = store.ops.lock().unwrap().clone();
    assert_eq!(
        ops,
        vec!["search", "update", "search", "update", "search", "update", "get"]
    );
}

#[tokio::test]
async fn claim_gives_up_after_the_attempt_budget() {
    let store = Arc::new(ContendedStore::new(MemoryStore::new()));
    store.inner.insert_new("alpaca", payload(0)).unwrap();
    let coordinator = coordinator(store.clone(), 3);

    let outcome = coordinator
        .claim_next("alpaca", "ann@example.com")
        .await
        .unwrap();
    match outcome {
        ClaimOutcome::ConflictExhausted { attempts } => assert_eq!(attempts, 3),
        other => panic!("expected ConflictExhausted, got {other:?}"),
    }
    assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn store_outages_surface_immediately_without_retry() {
    let store = Arc::new(OfflineStore::default());
    let coordinator = coordinator(store.clone(), 5);

    let err = coordinator
        .claim_next("alpaca", "ann@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)), "got {err:?}");
    assert_eq!(
        store.search_calls.load(Ordering::SeqCst),
        1,
        "an unavailable store must not be hammered with retries"
    );
}

#[tokio::test]
async fn finalize_ok_persists_the_edited_payload() {
    let store = seeded_store("alpaca", 1);
    let coordinator = coordinator(store.clone(), 5);

    let claimed = claimed_item(
        coordinator
            .claim_next("alpaca", "ann@example.com")
            .await
            .unwrap(),
    );

    let edited = Payload {
        instruction: "Rewrite sentence 0".into(),
        input: "source text 0".into(),
        output: "a corrected answer".into(),
    };
    let finalized = coordinator
        .finalize(&claimed.id, "ann@example.com", Verdict::Ok(edited.clone()))
        .await
        .unwrap();

    assert_eq!(finalized.item.status, Status::Ok);
    assert_eq!(finalized.item.payload, edited);
    assert_eq!(finalized.item.updated_by.as_deref(), Some("ann@example.com"));

    let stored = store.get(&claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.item.status, Status::Ok);
    assert_eq!(stored.item.payload, edited);
}

#[tokio::test]
async fn finalize_not_ok_keeps_the_stored_payload() {
    let store = seeded_store("alpaca", 1);
    let coordinator = coordinator(store.clone(), 5);

    let claimed = claimed_item(
        coordinator
            .claim_next("alpaca", "ann@example.com")
            .await
            .unwrap(),
    );
    let original = claimed.item.payload.clone();

    let finalized = coordinator
        .finalize(&claimed.id, "ann@example.com", Verdict::NotOk)
        .await
        .unwrap();

    assert_eq!(finalized.item.status, Status::NotOk);
    assert_eq!(finalized.item.payload, original);
}

#[tokio::test]
async fn finalize_without_a_claim_is_rejected() {
    let store = seeded_store("alpaca", 1);
    let seeded = store
        .search(&SearchFilter::for_script("alpaca"), 1)
        .await
        .unwrap()
        .remove(0);
    let coordinator = coordinator(store.clone(), 5);

    let err = coordinator
        .finalize(&seeded.id, "ann@example.com", Verdict::Ok(payload(9)))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::InvalidTransition {
                from: Status::New,
                to: Status::Ok
            }
        ),
        "got {err:?}"
    );

    // Rejection happened before any write.
    let current = store.get(&seeded.id).await.unwrap().unwrap();
    assert_eq!(current.item.status, Status::New);
    assert_eq!(current.version, seeded.version);
    assert_eq!(current.item.payload.output, "");
}

#[tokio::test]
async fn finalize_by_a_non_holder_is_rejected() {
    let store = seeded_store("alpaca", 1);
    let coordinator = coordinator(store.clone(), 5);

    let claimed = claimed_item(
        coordinator
            .claim_next("alpaca", "ann@example.com")
            .await
            .unwrap(),
    );

    let err = coordinator
        .finalize(&claimed.id, "bob@example.com", Verdict::NotOk)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClaimantMismatch { .. }), "got {err:?}");

    let current = store.get(&claimed.id).await.unwrap().unwrap();
    assert_eq!(current.item.status, Status::InProgress);
    assert_eq!(current.item.updated_by.as_deref(), Some("ann@example.com"));
}

#[tokio::test]
async fn finalized_items_accept_no_further_verdicts() {
    let store = seeded_store("alpaca", 1);
    let coordinator = coordinator(store.clone(), 5);

    let claimed = claimed_item(
        coordinator
            .claim_next("alpaca", "ann@example.com")
            .await
            .unwrap(),
    );
    coordinator
        .finalize(&claimed.id, "ann@example.com", Verdict::NotOk)
        .await
        .unwrap();

    let err = coordinator
        .finalize(&claimed.id, "ann@example.com", Verdict::Ok(payload(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }), "got {err:?}");
}

#[tokio::test]
async fn finalize_on_an_unknown_item_is_not_found() {
    let store = seeded_store("alpaca", 1);
    let coordinator = coordinator(store, 5);

    let err = coordinator
        .finalize(&ItemId("missing".into()), "ann@example.com", Verdict::NotOk)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn finalize_exhausts_conflicts_as_an_error() {
    let store = Arc::new(MemoryStore::new());
    let seeded = {
        let mut item = WorkItem::new("alpaca", payload(0));
        item.status = Status::InProgress;
        item.updated_by = Some("ann@example.com".into());
        store.insert(item).unwrap()
    };
    let contended = Arc::new(ContendedStore::new_shared(store));
    let coordinator = coordinator(contended.clone(), 4);

    let err = coordinator
        .finalize(&seeded.id, "ann@example.com", Verdict::NotOk)
        .await
        .unwrap_err();
    match err {
        Error::ConflictExhausted { attempts } => assert_eq!(attempts, 4),
        other => panic!("expected ConflictExhausted, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Wrapper stores
// ---------------------------------------------------------------------------

/// Delegates everything and counts search calls.
struct CountingStore {
    inner: MemoryStore,
    search_calls: AtomicU32,
}

impl CountingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            search_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn search(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredItem>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.search(filter, limit).await
    }

    async fn get(&self, id: &ItemId) -> Result<Option<StoredItem>> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: &ItemId,
        expected: &VersionToken,
        update: DocumentUpdate,
    ) -> Result<UpdateOutcome> {
        self.inner.update(id, expected, update).await
    }

    async fn terms_counts(
        &self,
        filter: &SearchFilter,
        field: KeywordField,
        max_buckets: usize,
    ) -> Result<Vec<TermsBucket>> {
        self.inner.terms_counts(filter, field, max_buckets).await
    }

    async fn open_cursor(
        &self,
        filter: &SearchFilter,
        page_size: usize,
        ttl: Duration,
    ) -> Result<CursorId> {
        self.inner.open_cursor(filter, page_size, ttl).await
    }

    async fn fetch_page(&self, cursor: &CursorId) -> Result<Vec<StoredItem>> {
        self.inner.fetch_page(cursor).await
    }

    async fn close_cursor(&self, cursor: &CursorId) -> Result<()> {
        self.inner.close_cursor(cursor).await
    }
}

/// Every conditional write loses, as if rivals take each candidate the
/// moment we reach for it.
struct ContendedStore {
    inner: Arc<MemoryStore>,
    update_calls: AtomicU32,
}

impl ContendedStore {
    fn new(inner: MemoryStore) -> Self {
        Self::new_shared(Arc::new(inner))
    }

    fn new_shared(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            update_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for ContendedStore {
    async fn search(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredItem>> {
        self.inner.search(filter, limit).await
    }

    async fn get(&self, id: &ItemId) -> Result<Option<StoredItem>> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        _id: &ItemId,
        _expected: &VersionToken,
        _update: DocumentUpdate,
    ) -> Result<UpdateOutcome> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        Ok(UpdateOutcome::VersionConflict {
            current: VersionToken::new("somebody-else"),
        })
    }

    async fn terms_counts(
        &self,
        filter: &SearchFilter,
        field: KeywordField,
        max_buckets: usize,
    ) -> Result<Vec<TermsBucket>> {
        self.inner.terms_counts(filter, field, max_buckets).await
    }

    async fn open_cursor(
        &self,
        filter: &SearchFilter,
        page_size: usize,
        ttl: Duration,
    ) -> Result<CursorId> {
        self.inner.open_cursor(filter, page_size, ttl).await
    }

    async fn fetch_page(&self, cursor: &CursorId) -> Result<Vec<StoredItem>> {
        self.inner.fetch_page(cursor).await
    }

    async fn close_cursor(&self, cursor: &CursorId) -> Result<()> {
        self.inner.close_cursor(cursor).await
    }
}

/// Conflicts the first `conflicts` writes, then behaves, recording the call
/// sequence along the way.
struct FlakyStore {
    inner: MemoryStore,
    remaining_conflicts: AtomicU32,
    ops: std::sync::Mutex<Vec<&'static str>>,
}

impl FlakyStore {
    fn conflicting_first(inner: MemoryStore, conflicts: u32) -> Self {
        Self {
            inner,
            remaining_conflicts: AtomicU32::new(conflicts),
            ops: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn record(&self, op: &'static str) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn search(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredItem>> {
        self.record("search");
        self.inner.search(filter, limit).await
    }

    async fn get(&self, id: &ItemId) -> Result<Option<StoredItem>> {
        self.record("get");
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: &ItemId,
        expected: &VersionToken,
        update: DocumentUpdate,
    ) -> Result<UpdateOutcome> {
        self.record("update");
        let remaining = self.remaining_conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_conflicts.store(remaining - 1, Ordering::SeqCst);
            return Ok(UpdateOutcome::VersionConflict {
                current: VersionToken::new("somebody-else"),
            });
        }
        self.inner.update(id, expected, update).await
    }

    async fn terms_counts(
        &self,
        filter: &SearchFilter,
        field: KeywordField,
        max_buckets: usize,
    ) -> Result<Vec<TermsBucket>> {
        self.inner.terms_counts(filter, field, max_buckets).await
    }

    async fn open_cursor(
        &self,
        filter: &SearchFilter,
        page_size: usize,
        ttl: Duration,
    ) -> Result<CursorId> {
        self.inner.open_cursor(filter, page_size, ttl).await
    }

    async fn fetch_page(&self, cursor: &CursorId) -> Result<Vec<StoredItem>> {
        self.inner.fetch_page(cursor).await
    }

    async fn close_cursor(&self, cursor: &CursorId) -> Result<()> {
        self.inner.close_cursor(cursor).await
    }
}

/// A store that is down: every call fails with `StoreUnavailable`.
#[derive(Default)]
struct OfflineStore {
    search_calls: AtomicU32,
}

impl OfflineStore {
    fn outage<T>(&self) -> Result<T> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }
}

#[async_trait]
impl DocumentStore for OfflineStore {
    async fn search(&self, _filter: &SearchFilter, _limit: usize) -> Result<Vec<StoredItem>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.outage()
    }

    async fn get(&self, _id: &ItemId) -> Result<Option<StoredItem>> {
        self.outage()
    }

    async fn update(
        &self,
        _id: &ItemId,
        _expected: &VersionToken,
        _update: DocumentUpdate,
    ) -> Result<UpdateOutcome> {
        self.outage()
    }

    async fn terms_counts(
        &self,
        _filter: &SearchFilter,
        _field: KeywordField,
        _max_buckets: usize,
    ) -> Result<Vec<TermsBucket>> {
        self.outage()
    }

    async fn open_cursor(
        &self,
        _filter: &SearchFilter,
        _page_size: usize,
        _ttl: Duration,
    ) -> Result<CursorId> {
        self.outage()
    }

    async fn fetch_page(&self, _cursor: &CursorId) -> Result<Vec<StoredItem>> {
        self.outage()
    }

    async fn close_cursor(&self, _cursor: &CursorId) -> Result<()> {
        self.outage()
    }
}
