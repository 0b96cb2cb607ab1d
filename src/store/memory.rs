//! In-memory document store.
//!
//! A complete implementation of the store contract for tests and embedders:
//! insertion-ordered documents, numeric version tokens behind the opaque
//! [`VersionToken`], real terms aggregations, and scan cursors with a
//! keep-alive. Single process, not durable.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ItemId, Payload, WorkItem};

use super::{
    CursorId, DocumentStore, DocumentUpdate, KeywordField, SearchFilter, StoredItem, TermsBucket,
    UpdateOutcome, VersionToken,
};

/// In-memory store. Wrap in an `Arc` to share across tasks; all methods take
/// `&self` and synchronize internally.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Documents in insertion order. This is the store's natural order.
    docs: Vec<Doc>,
    /// Open scan handles.
    cursors: HashMap<CursorId, Cursor>,
}

struct Doc {
    id: ItemId,
    version: i64,
    item: WorkItem,
}

struct Cursor {
    /// Matching documents frozen at open time. Pages serve the scan as it
    /// stood when it opened, later writes notwithstanding.
    snapshot: Vec<StoredItem>,
    next: usize,
    page_size: usize,
    ttl: Duration,
    deadline: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one unclaimed record. Stands in for the external bulk loader
    /// that fills the real index.
    pub fn insert_new(&self, script: impl Into<String>, payload: Payload) -> Result<StoredItem> {
        self.insert(WorkItem::new(script, payload))
    }

    /// Seed a fully specified document, whatever its status. Useful for
    /// driving the pool into mid-lifecycle shapes.
    pub fn insert(&self, item: WorkItem) -> Result<StoredItem> {
        let mut inner = self.write()?;
        let doc = Doc {
            id: ItemId(Uuid::new_v4().to_string()),
            version: 1,
            item,
        };
        let stored = doc.to_stored();
        inner.docs.push(doc);
        Ok(stored)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Other("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Other("store lock poisoned".into()))
    }
}

impl Doc {
    fn to_stored(&self) -> StoredItem {
        StoredItem {
            id: self.id.clone(),
            version: VersionToken::new(self.version.to_string()),
            item: self.item.clone(),
        }
    }

    /// The indexed value of a keyword field, `None` when the document does
    /// not carry the field.
    fn field_value(&self, field: KeywordField) -> Option<String> {
        match field {
            KeywordField::Status => Some(self.item.status.as_str().to_string()),
            KeywordField::UpdatedBy => self.item.updated_by.clone(),
            KeywordField::Script => Some(self.item.meta.script.clone()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn search(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredItem>> {
        let inner = self.read()?;
        Ok(inner
            .docs
            .iter()
            .filter(|doc| filter.matches(&doc.item))
            .take(limit)
            .map(Doc::to_stored)
            .collect())
    }

    async fn get(&self, id: &ItemId) -> Result<Option<StoredItem>> {
        let inner = self.read()?;
        Ok(inner
            .docs
            .iter()
            .find(|doc| &doc.id == id)
            .map(Doc::to_stored))
    }

    async fn update(
        &self,
        id: &ItemId,
        expected: &VersionToken,
        update: DocumentUpdate,
    ) -> Result<UpdateOutcome> {
        let mut inner = self.write()?;
        let doc = inner
            .docs
            .iter_mut()
            .find(|doc| &doc.id == id)
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))?;

        // The whole method holds the write lock, which is what makes the
        // check plus write atomic here.
        if doc.version.to_string() != expected.as_str() {
            return Ok(UpdateOutcome::VersionConflict {
                current: VersionToken::new(doc.version.to_string()),
            });
        }

        if let Some(status) = update.status {
            doc.item.status = status;
        }
        if let Some(updated_by) = update.updated_by {
            doc.item.updated_by = Some(updated_by);
        }
        if let Some(last_modified) = update.last_modified {
            doc.item.last_modified = last_modified;
        }
        if let Some(payload) = update.payload {
            doc.item.payload = payload;
        }
        doc.version += 1;

        Ok(UpdateOutcome::Applied {
            version: VersionToken::new(doc.version.to_string()),
        })
    }

    async fn terms_counts(
        &self,
        filter: &SearchFilter,
        field: KeywordField,
        max_buckets: usize,
    ) -> Result<Vec<TermsBucket>> {
        let inner = self.read()?;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for doc in inner.docs.iter().filter(|doc| filter.matches(&doc.item)) {
            if let Some(key) = doc.field_value(field) {
                *counts.entry(key).or_insert(0) += 1;
            }
        }

        let mut buckets: Vec<TermsBucket> = counts
            .into_iter()
            .map(|(key, count)| TermsBucket { key, count })
            .collect();
        // Count-descending, ties key-ascending, so the cap drops the
        // smallest groups first.
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        buckets.truncate(max_buckets);
        Ok(buckets)
    }

    async fn open_cursor(
        &self,
        filter: &SearchFilter,
        page_size: usize,
        ttl: Duration,
    ) -> Result<CursorId> {
        let mut inner = self.write()?;
        let snapshot: Vec<StoredItem> = inner
            .docs
            .iter()
            .filter(|doc| filter.matches(&doc.item))
            .map(Doc::to_stored)
            .collect();

        let id = CursorId::new(Uuid::new_v4().to_string());
        inner.cursors.insert(
            id.clone(),
            Cursor {
                snapshot,
                next: 0,
                page_size: page_size.max(1),
                ttl,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(id)
    }

    async fn fetch_page(&self, cursor: &CursorId) -> Result<Vec<StoredItem>> {
        let mut inner = self.write()?;
        let now = Instant::now();

        let expired = match inner.cursors.get(cursor) {
            None => return Err(Error::CursorExpired(cursor.to_string())),
            Some(open) => now > open.deadline,
        };
        if expired {
            inner.cursors.remove(cursor);
            return Err(Error::CursorExpired(cursor.to_string()));
        }

        let Some(open) = inner.cursors.get_mut(cursor) else {
            return Err(Error::CursorExpired(cursor.to_string()));
        };
        let end = (open.next + open.page_size).min(open.snapshot.len());
        let page = open.snapshot[open.next..end].to_vec();
        open.next = end;
        // Each successful fetch renews the keep-alive, like a scroll.
        open.deadline = now + open.ttl;
        Ok(page)
    }

    async fn close_cursor(&self, cursor: &CursorId) -> Result<()> {
        let mut inner = self.write()?;
        inner.cursors.remove(cursor);
        Ok(())
    }
}
