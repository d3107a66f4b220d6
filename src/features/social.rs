// Social actions
// Writes against the shared collections. Nothing here touches local state; the
// reconciler picks results up from the next snapshot.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::economy::{self, Eligibility};
use super::reconciler::normalize_book;
use crate::api::store::{Collection, Document, FieldFilter, RemoteStore};
use crate::models::book::{Book, Chapter};
use crate::models::social::{Comment, Notification, Report};
use crate::models::timestamp::{format_instant, parse_instant};

pub const ADMIRE_NOTIFICATION: &str = "admire";

/// What a toggle request turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmireOutcome {
    Admiring,
    Unadmiring,
    /// Same toggle already in flight; nothing was sent
    Dropped,
}

#[derive(Clone)]
pub struct SocialActions {
    remote: Arc<dyn RemoteStore>,
    pending: Arc<DashSet<String>>,
    /// Serializes read-modify-write cycles on book documents
    book_writes: Arc<Mutex<()>>,
}

impl SocialActions {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            pending: Arc::new(DashSet::new()),
            book_writes: Arc::new(Mutex::new(())),
        }
    }

    /// Toggles still waiting on the store
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Flip an admire edge. Only one toggle per admirer/target pair may be in
    /// flight; later calls are dropped until it settles.
    pub fn toggle_admire(
        &self,
        admirer: &str,
        target: &str,
        currently_admiring: bool,
        now: DateTime<Utc>,
    ) -> AdmireOutcome {
        let key = format!("{}→{}", admirer, target);
        if !self.pending.insert(key.clone()) {
            debug!("Admire toggle {} already pending", key);
            return AdmireOutcome::Dropped;
        }

        let actions = self.clone();
        let admirer = admirer.to_string();
        let target = target.to_string();
        tokio::spawn(async move {
            let result = if currently_admiring {
                actions.remove_relationship(&admirer, &target).await.map(|_| ())
            } else {
                actions.admire(&admirer, &target, now).await
            };
            if let Err(e) = result {
                error!("Admire toggle {} failed: {}", key, e);
            }
            actions.pending.remove(&key);
        });

        if currently_admiring {
            AdmireOutcome::Unadmiring
        } else {
            AdmireOutcome::Admiring
        }
    }

    async fn admire(&self, admirer: &str, target: &str, now: DateTime<Utc>) -> Result<()> {
        let stamp = format_instant(&now);
        self.remote
            .create_document(
                Collection::Relationships,
                &json!({ "admirer": admirer, "target": target, "timestamp": stamp }),
            )
            .await?;

        self.add_notification(&Notification {
            recipient: target.to_string(),
            sender: Some(admirer.to_string()),
            kind: ADMIRE_NOTIFICATION.to_string(),
            message: format!("{} started admiring you", admirer),
            timestamp: Some(now),
            ..Default::default()
        })
        .await?;
        info!("{} now admires {}", admirer, target);
        Ok(())
    }

    /// Delete every `admirer → target` edge; returns how many went
    pub async fn remove_relationship(&self, admirer: &str, target: &str) -> Result<usize> {
        let edges = self
            .remote
            .query(
                Collection::Relationships,
                &[FieldFilter::eq("admirer", admirer), FieldFilter::eq("target", target)],
            )
            .await?;
        for edge in &edges {
            self.remote.delete_document(Collection::Relationships, &edge.id).await?;
        }
        Ok(edges.len())
    }

    pub async fn remove_relationships_between(&self, a: &str, b: &str) -> Result<usize> {
        Ok(self.remove_relationship(a, b).await? + self.remove_relationship(b, a).await?)
    }

    /// Drop every edge touching `username`, in either direction
    pub async fn remove_all_relationships_for(&self, username: &str) -> Result<usize> {
        let mut removed = 0;
        for field in ["admirer", "target"] {
            let edges = self
                .remote
                .query(Collection::Relationships, &[FieldFilter::eq(field, username)])
                .await?;
            for edge in &edges {
                self.remote.delete_document(Collection::Relationships, &edge.id).await?;
            }
            removed += edges.len();
        }
        Ok(removed)
    }

    // ============ Chat ============

    pub async fn send_chat_message(
        &self,
        from: &str,
        to: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.remote
            .create_document(
                Collection::ChatMessages,
                &json!({
                    "from": from,
                    "to": to,
                    "text": text.trim(),
                    "timestamp": format_instant(&now),
                    "read": false,
                }),
            )
            .await
    }

    /// Mark everything `other` sent to `reader` as read
    pub async fn mark_conversation_read(&self, reader: &str, other: &str) -> Result<usize> {
        let unread = self
            .remote
            .query(
                Collection::ChatMessages,
                &[
                    FieldFilter::eq("from", other),
                    FieldFilter::eq("to", reader),
                    FieldFilter::eq("read", false),
                ],
            )
            .await?;
        for message in &unread {
            self.remote
                .update_document(Collection::ChatMessages, &message.id, &json!({ "read": true }))
                .await?;
        }
        Ok(unread.len())
    }

    /// Delete chat messages sent before `cutoff`
    pub async fn purge_chat_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let messages = self.remote.query(Collection::ChatMessages, &[]).await?;
        let mut purged = 0;
        for message in messages {
            let sent = message.data.get("timestamp").and_then(parse_instant);
            if matches!(sent, Some(at) if at < cutoff) {
                self.remote.delete_document(Collection::ChatMessages, &message.id).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!("Purged {} chat messages older than {}", purged, cutoff);
        }
        Ok(purged)
    }

    // ============ Notifications ============

    pub async fn add_notification(&self, notification: &Notification) -> Result<String> {
        self.remote
            .create_document(Collection::Notifications, &document_body(notification)?)
            .await
    }

    pub async fn mark_notifications_read(&self, recipient: &str) -> Result<usize> {
        let unread = self
            .remote
            .query(
                Collection::Notifications,
                &[FieldFilter::eq("recipient", recipient), FieldFilter::eq("read", false)],
            )
            .await?;
        for notification in &unread {
            self.remote
                .update_document(Collection::Notifications, &notification.id, &json!({ "read": true }))
                .await?;
        }
        Ok(unread.len())
    }

    // ============ Comments ============

    pub async fn add_comment(&self, comment: &Comment) -> Result<String> {
        self.remote
            .create_document(Collection::Comments, &document_body(comment)?)
            .await
    }

    pub async fn update_comment(&self, comment_id: &str, text: &str) -> Result<()> {
        self.remote
            .update_document(Collection::Comments, comment_id, &json!({ "text": text.trim() }))
            .await
    }

    pub async fn remove_comment(&self, comment_id: &str) -> Result<()> {
        self.remote.delete_document(Collection::Comments, comment_id).await
    }

    pub async fn remove_comments_by_author(&self, author: &str) -> Result<usize> {
        let comments = self
            .remote
            .query(Collection::Comments, &[FieldFilter::eq("authorUsername", author)])
            .await?;
        for comment in &comments {
            self.remote.delete_document(Collection::Comments, &comment.id).await?;
        }
        Ok(comments.len())
    }

    // ============ Reports ============

    pub async fn add_report(&self, report: &Report) -> Result<String> {
        self.remote
            .create_document(Collection::Reports, &document_body(report)?)
            .await
    }

    pub async fn update_report_status(&self, report_id: &str, status: &str) -> Result<()> {
        self.remote
            .update_document(Collection::Reports, report_id, &json!({ "status": status }))
            .await
    }

    // ============ Books ============

    /// Append a published chapter with zero likes to the stored book;
    /// returns its index
    pub async fn publish_chapter(&self, book_id: &str, title: &str, now: DateTime<Utc>) -> Result<u32> {
        let _guard = self.book_writes.lock().await;
        let (doc_id, book) = self.fetch_book(book_id).await?;

        let mut chapters = book.chapters;
        let index = chapters.len();
        chapters.push(Chapter {
            id: format!("ch{}", index + 1),
            title: title.trim().to_string(),
            is_published: true,
        });

        let mut likes = book.likes;
        likes.resize(index, 0);
        likes.push(0);

        self.remote
            .update_document(
                Collection::Books,
                &doc_id,
                &json!({ "chapters": chapters, "likes": likes, "lastUpdated": format_instant(&now) }),
            )
            .await?;
        info!("Published chapter {} of {}", index + 1, book_id);
        Ok(index as u32)
    }

    /// Record a monetization request when the stored book qualifies
    pub async fn request_monetization(&self, book_id: &str, now: DateTime<Utc>) -> Result<Eligibility> {
        let _guard = self.book_writes.lock().await;
        let (doc_id, book) = self.fetch_book(book_id).await?;

        let eligibility = economy::monetization_eligibility(&book, now);
        if !eligibility.eligible() {
            return Ok(eligibility);
        }
        self.remote
            .update_document(
                Collection::Books,
                &doc_id,
                &json!({
                    "monetizationAttempts": book.monetization_attempts + 1,
                    "monetizationRequestedAt": format_instant(&now),
                }),
            )
            .await?;
        info!("Monetization requested for {}", book_id);
        Ok(eligibility)
    }

    /// Read the stored book. Books carry their own `id` field, which may
    /// differ from the document id.
    async fn fetch_book(&self, book_id: &str) -> Result<(String, Book)> {
        let hits = self
            .remote
            .query(Collection::Books, &[FieldFilter::eq("id", book_id)])
            .await?;
        let doc = match hits.into_iter().next() {
            Some(doc) => doc,
            None => match self.remote.get_document(Collection::Books, book_id).await? {
                Some(data) => Document {
                    id: book_id.to_string(),
                    data,
                },
                None => bail!("book {} not found", book_id),
            },
        };
        let doc_id = doc.id.clone();
        match normalize_book(doc) {
            Some(book) => Ok((doc_id, book)),
            None => bail!("book {} is malformed", book_id),
        }
    }
}

/// Serialize an item for a store-assigned document, dropping the local id
fn document_body<T: Serialize>(item: &T) -> Result<Value> {
    let mut value = serde_json::to_value(item)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("id");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    async fn settle(actions: &SocialActions) {
        while actions.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_rapid_toggles_create_one_edge() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());

        assert_eq!(actions.toggle_admire("ana", "ben", false, now()), AdmireOutcome::Admiring);
        assert_eq!(actions.toggle_admire("ana", "ben", false, now()), AdmireOutcome::Dropped);
        settle(&actions).await;

        assert_eq!(memory.documents(Collection::Relationships).await.len(), 1);
        let notifications = memory.documents(Collection::Notifications).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].data["type"], "admire");
        assert_eq!(notifications[0].data["recipient"], "ben");
        assert!(notifications[0].data.get("id").is_none());
    }

    #[tokio::test]
    async fn test_toggle_off_removes_edge() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());

        actions.toggle_admire("ana", "ben", false, now());
        settle(&actions).await;
        assert_eq!(
            actions.toggle_admire("ana", "ben", true, now()),
            AdmireOutcome::Unadmiring
        );
        settle(&actions).await;

        assert!(memory.documents(Collection::Relationships).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_toggle_releases_lock() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());

        memory.set_fail_writes(true);
        actions.toggle_admire("ana", "ben", false, now());
        settle(&actions).await;

        memory.set_fail_writes(false);
        assert_eq!(actions.toggle_admire("ana", "ben", false, now()), AdmireOutcome::Admiring);
        settle(&actions).await;
        assert_eq!(memory.documents(Collection::Relationships).await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_relationships() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());
        for (a, b) in [("ana", "ben"), ("ben", "ana"), ("ana", "cy"), ("dee", "ben")] {
            memory
                .create_document(Collection::Relationships, &json!({ "admirer": a, "target": b }))
                .await
                .unwrap();
        }

        assert_eq!(actions.remove_relationships_between("ana", "ben").await.unwrap(), 2);
        assert_eq!(actions.remove_all_relationships_for("ben").await.unwrap(), 1);
        let left = memory.documents(Collection::Relationships).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].data["target"], "cy");
    }

    #[tokio::test]
    async fn test_chat_read_and_purge() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());

        actions
            .send_chat_message("ben", "ana", "old news", now() - Duration::days(40))
            .await
            .unwrap();
        actions.send_chat_message("ben", "ana", " hi ", now()).await.unwrap();
        actions.send_chat_message("ana", "ben", "hey", now()).await.unwrap();

        assert_eq!(actions.mark_conversation_read("ana", "ben").await.unwrap(), 2);
        assert_eq!(actions.mark_conversation_read("ana", "ben").await.unwrap(), 0);

        let purged = actions
            .purge_chat_older_than(now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);

        let left = memory.documents(Collection::ChatMessages).await;
        assert_eq!(left.len(), 2);
        assert!(left.iter().any(|m| m.data["text"] == "hi"));
    }

    #[tokio::test]
    async fn test_comments_by_author() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());
        let comment = |author: &str| Comment {
            book_id: "b1".to_string(),
            author_username: author.to_string(),
            text: "nice".to_string(),
            timestamp: Some(now()),
            ..Default::default()
        };

        let first = actions.add_comment(&comment("troll")).await.unwrap();
        actions.add_comment(&comment("troll")).await.unwrap();
        actions.add_comment(&comment("ana")).await.unwrap();
        actions.update_comment(&first, "edited").await.unwrap();

        assert_eq!(actions.remove_comments_by_author("troll").await.unwrap(), 2);
        let left = memory.documents(Collection::Comments).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].data["authorUsername"], "ana");
    }

    #[tokio::test]
    async fn test_publish_chapter_appends_zero_like() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());
        memory
            .put_document(
                Collection::Books,
                "doc-b1",
                &json!({
                    "id": "b1",
                    "title": "Tide",
                    "chapters": [{ "id": "ch1", "title": "One", "isPublished": true }],
                    "likes": [4]
                }),
            )
            .await
            .unwrap();

        assert_eq!(actions.publish_chapter("b1", "Two", now()).await.unwrap(), 1);
        assert_eq!(actions.publish_chapter("b1", " Three ", now()).await.unwrap(), 2);

        let stored = memory.get_document(Collection::Books, "doc-b1").await.unwrap().unwrap();
        assert_eq!(stored["chapters"][0]["title"], "One");
        assert_eq!(stored["chapters"][1]["title"], "Two");
        assert_eq!(stored["chapters"][2]["title"], "Three");
        assert_eq!(stored["likes"], json!([4, 0, 0]));
    }

    #[tokio::test]
    async fn test_publish_chapter_unknown_book_fails() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());
        assert!(actions.publish_chapter("missing", "One", now()).await.is_err());
        assert!(memory.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_monetization_attempts_count_from_stored_book() {
        let memory = Arc::new(MemoryStore::new());
        let actions = SocialActions::new(memory.clone());
        let chapters: Vec<_> = (1..=10)
            .map(|i| json!({ "id": format!("ch{}", i), "title": format!("{}", i), "isPublished": true }))
            .collect();
        memory
            .put_document(
                Collection::Books,
                "b1",
                &json!({
                    "id": "b1",
                    "isCompleted": true,
                    "publishedDate": "2025-01-01T00:00:00Z",
                    "chapters": chapters,
                    "likes": vec![200; 10]
                }),
            )
            .await
            .unwrap();

        assert!(actions.request_monetization("b1", now()).await.unwrap().eligible());
        assert!(actions.request_monetization("b1", now()).await.unwrap().eligible());
        let third = actions.request_monetization("b1", now()).await.unwrap();
        assert!(!third.eligible());

        let stored = memory.get_document(Collection::Books, "b1").await.unwrap().unwrap();
        assert_eq!(stored["monetizationAttempts"], 2);
    }
}
