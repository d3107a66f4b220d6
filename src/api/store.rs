// Remote document store boundary
// Everything the core needs from the backend, collection-scoped and asynchronous

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;

/// Named collections in the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Users,
    Usernames,
    Books,
    Relationships,
    ChatMessages,
    Notifications,
    Comments,
    Reports,
}

impl Collection {
    /// Collections mirrored locally through live subscriptions
    pub const SHARED: [Collection; 6] = [
        Collection::Books,
        Collection::Relationships,
        Collection::ChatMessages,
        Collection::Notifications,
        Collection::Comments,
        Collection::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Usernames => "usernames",
            Collection::Books => "books",
            Collection::Relationships => "relationships",
            Collection::ChatMessages => "chatMessages",
            Collection::Notifications => "notifications",
            Collection::Comments => "comments",
            Collection::Reports => "reports",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document: its id plus plain JSON data
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Equality filter on a top-level field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}

/// One full snapshot of a collection, or the error that interrupted it
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>>>;

/// At-least-once, eventually-consistent document store. No ordering is
/// guaranteed across collections or across concurrent writes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a user profile document
    async fn get_profile(&self, uid: &str) -> Result<Option<Value>>;

    /// Merge the top-level fields of `patch` into a profile document
    async fn set_profile(&self, uid: &str, patch: &Value) -> Result<()>;

    /// Write a document under a chosen id, replacing it
    async fn put_document(&self, collection: Collection, doc_id: &str, data: &Value) -> Result<()>;

    /// Add a document with a store-assigned id
    async fn create_document(&self, collection: Collection, data: &Value) -> Result<String>;

    /// Merge top-level fields into an existing document
    async fn update_document(&self, collection: Collection, doc_id: &str, patch: &Value) -> Result<()>;

    async fn delete_document(&self, collection: Collection, doc_id: &str) -> Result<()>;

    /// One-shot read of a single document
    async fn get_document(&self, collection: Collection, doc_id: &str) -> Result<Option<Value>>;

    /// One-shot read of documents matching every filter
    async fn query(&self, collection: Collection, filters: &[FieldFilter]) -> Result<Vec<Document>>;

    /// Live stream of full collection snapshots
    fn subscribe(&self, collection: Collection) -> SnapshotStream;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches() {
        let filter = FieldFilter::eq("admirer", "ana");
        assert!(filter.matches(&json!({ "admirer": "ana", "target": "ben" })));
        assert!(!filter.matches(&json!({ "admirer": "ben" })));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::ChatMessages.to_string(), "chatMessages");
        assert_eq!(Collection::SHARED.len(), 6);
    }
}
