// In-process document store
// Backs offline mode and the test-suite; behaves like the remote store minus the network

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{watch, RwLock};
use tracing::debug;

use super::store::{Collection, Document, FieldFilter, RemoteStore, SnapshotStream};

/// Kind of write observed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Put,
    Create,
    Merge,
    Delete,
}

/// One accepted write, kept for inspection
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub collection: Collection,
    pub doc_id: String,
    pub kind: WriteKind,
    pub data: Value,
}

const ALL_COLLECTIONS: [Collection; 8] = [
    Collection::Users,
    Collection::Usernames,
    Collection::Books,
    Collection::Relationships,
    Collection::ChatMessages,
    Collection::Notifications,
    Collection::Comments,
    Collection::Reports,
];

pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
    watchers: HashMap<Collection, watch::Sender<Vec<Document>>>,
    writes: RwLock<Vec<WriteRecord>>,
    fail_writes: AtomicBool,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let watchers = ALL_COLLECTIONS
            .iter()
            .map(|c| (*c, watch::channel(Vec::new()).0))
            .collect();

        Self {
            collections: RwLock::new(HashMap::new()),
            watchers,
            writes: RwLock::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make every subsequent write fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All accepted writes, oldest first
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.writes.read().await.clone()
    }

    /// Accepted writes to one collection
    pub async fn writes_to(&self, collection: Collection) -> Vec<WriteRecord> {
        self.writes
            .read()
            .await
            .iter()
            .filter(|w| w.collection == collection)
            .cloned()
            .collect()
    }

    /// Current documents of a collection, sorted by id
    pub async fn documents(&self, collection: Collection) -> Vec<Document> {
        let collections = self.collections.read().await;
        snapshot_of(collections.get(&collection))
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store: writes are disabled"));
        }
        Ok(())
    }

    async fn apply(
        &self,
        collection: Collection,
        doc_id: &str,
        kind: WriteKind,
        data: &Value,
    ) -> Result<()> {
        self.check_writable()?;

        let snapshot = {
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection).or_default();
            match kind {
                WriteKind::Put | WriteKind::Create => {
                    docs.insert(doc_id.to_string(), data.clone());
                }
                WriteKind::Merge => {
                    let entry = docs
                        .entry(doc_id.to_string())
                        .or_insert_with(|| Value::Object(Default::default()));
                    merge_top_level(entry, data);
                }
                WriteKind::Delete => {
                    docs.remove(doc_id);
                }
            }
            snapshot_of(Some(docs))
        };

        self.writes.write().await.push(WriteRecord {
            collection,
            doc_id: doc_id.to_string(),
            kind,
            data: data.clone(),
        });

        if let Some(tx) = self.watchers.get(&collection) {
            tx.send_replace(snapshot);
        }
        debug!("memory store: {:?} {}/{}", kind, collection, doc_id);
        Ok(())
    }
}

fn snapshot_of(docs: Option<&BTreeMap<String, Value>>) -> Vec<Document> {
    docs.map(|docs| {
        docs.iter()
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect()
    })
    .unwrap_or_default()
}

fn merge_top_level(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_profile(&self, uid: &str) -> Result<Option<Value>> {
        self.get_document(Collection::Users, uid).await
    }

    async fn set_profile(&self, uid: &str, patch: &Value) -> Result<()> {
        self.apply(Collection::Users, uid, WriteKind::Merge, patch).await
    }

    async fn put_document(&self, collection: Collection, doc_id: &str, data: &Value) -> Result<()> {
        self.apply(collection, doc_id, WriteKind::Put, data).await
    }

    async fn create_document(&self, collection: Collection, data: &Value) -> Result<String> {
        let id = format!("doc{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.apply(collection, &id, WriteKind::Create, data).await?;
        Ok(id)
    }

    async fn update_document(&self, collection: Collection, doc_id: &str, patch: &Value) -> Result<()> {
        let exists = self
            .collections
            .read()
            .await
            .get(&collection)
            .map(|docs| docs.contains_key(doc_id))
            .unwrap_or(false);
        if !exists {
            return Err(anyhow!("memory store: {}/{} not found", collection, doc_id));
        }
        self.apply(collection, doc_id, WriteKind::Merge, patch).await
    }

    async fn delete_document(&self, collection: Collection, doc_id: &str) -> Result<()> {
        self.apply(collection, doc_id, WriteKind::Delete, &Value::Null).await
    }

    async fn get_document(&self, collection: Collection, doc_id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.get(doc_id))
            .cloned())
    }

    async fn query(&self, collection: Collection, filters: &[FieldFilter]) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(snapshot_of(collections.get(&collection))
            .into_iter()
            .filter(|doc| filters.iter().all(|f| f.matches(&doc.data)))
            .collect())
    }

    fn subscribe(&self, collection: Collection) -> SnapshotStream {
        let rx = match self.watchers.get(&collection) {
            Some(tx) => tx.subscribe(),
            None => return futures::stream::empty().boxed(),
        };

        futures::stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let snapshot = rx.borrow_and_update().clone();
            Some((Ok(snapshot), (rx, false)))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_profile_merge() {
        let store = MemoryStore::new();
        store.set_profile("u1", &json!({ "points": 5, "username": "ana" })).await.unwrap();
        store.set_profile("u1", &json!({ "points": 9 })).await.unwrap();

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile["points"], 9);
        assert_eq!(profile["username"], "ana");
        assert_eq!(store.writes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_writes_leave_no_trace() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.set_profile("u1", &json!({ "points": 5 })).await.is_err());
        assert!(store.get_profile("u1").await.unwrap().is_none());
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_query_and_subscribe() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe(Collection::Relationships);
        assert!(stream.next().await.unwrap().unwrap().is_empty());

        store
            .create_document(Collection::Relationships, &json!({ "admirer": "ana", "target": "ben" }))
            .await
            .unwrap();
        store
            .create_document(Collection::Relationships, &json!({ "admirer": "ben", "target": "ana" }))
            .await
            .unwrap();

        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 2);

        let hits = store
            .query(Collection::Relationships, &[FieldFilter::eq("admirer", "ana")])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].data["target"], "ben");
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = MemoryStore::new();
        assert!(store
            .update_document(Collection::Comments, "nope", &json!({ "text": "x" }))
            .await
            .is_err());
    }
}
