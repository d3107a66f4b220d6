// Subscription reconciler
// Mirrors shared collections locally; each remote snapshot replaces its mirror wholesale

use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::store::{Collection, Document, RemoteStore};
use crate::models::book::{normalize_likes, Book};
use crate::models::social::{ChatMessage, Comment, Notification, Relationship, Report, SocialCounts};

/// Local copies of every shared collection
#[derive(Debug, Clone, Default)]
pub struct Mirrors {
    pub books: Vec<Book>,
    pub relationships: Vec<Relationship>,
    pub chat_messages: Vec<ChatMessage>,
    pub notifications: Vec<Notification>,
    pub comments: Vec<Comment>,
    pub reports: Vec<Report>,
}

impl Mirrors {
    pub fn book(&self, book_id: &str) -> Option<&Book> {
        self.books.iter().find(|b| b.id == book_id)
    }

    pub fn books_by(&self, author: &str) -> Vec<&Book> {
        self.books.iter().filter(|b| b.author_username == author).collect()
    }

    pub fn is_admiring(&self, admirer: &str, target: &str) -> bool {
        self.relationships
            .iter()
            .any(|r| r.admirer == admirer && r.target == target)
    }

    pub fn social_counts(&self, username: &str) -> SocialCounts {
        SocialCounts::for_user(&self.relationships, username)
    }

    /// Messages between two users, oldest first
    pub fn conversation(&self, a: &str, b: &str) -> Vec<&ChatMessage> {
        self.chat_messages
            .iter()
            .filter(|m| (m.from == a && m.to == b) || (m.from == b && m.to == a))
            .collect()
    }

    pub fn unread_notifications(&self, username: &str) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.recipient == username && !n.read)
            .count()
    }

    pub fn comments_for(&self, book_id: &str) -> Vec<&Comment> {
        self.comments.iter().filter(|c| c.book_id == book_id).collect()
    }

    /// Replace one mirror with a fresh snapshot. Documents that fail to decode
    /// are skipped.
    pub fn ingest(&mut self, collection: Collection, docs: Vec<Document>) {
        match collection {
            Collection::Books => {
                self.books = docs.into_iter().filter_map(normalize_book).collect();
            }
            Collection::Relationships => {
                self.relationships = decode_all(collection, docs, |r: &mut Relationship, id| {
                    r.id = id.to_string()
                });
            }
            Collection::ChatMessages => {
                let mut messages = decode_all(collection, docs, |m: &mut ChatMessage, id| {
                    fill_id(&mut m.id, id)
                });
                messages.sort_by_key(|m| m.timestamp);
                self.chat_messages = messages;
            }
            Collection::Notifications => {
                let mut notifications = decode_all(collection, docs, |n: &mut Notification, id| {
                    fill_id(&mut n.id, id)
                });
                notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                self.notifications = notifications;
            }
            Collection::Comments => {
                let mut comments = decode_all(collection, docs, |c: &mut Comment, id| {
                    fill_id(&mut c.id, id)
                });
                comments.sort_by_key(|c| c.timestamp);
                self.comments = comments;
            }
            Collection::Reports => {
                let mut reports = decode_all(collection, docs, |r: &mut Report, id| {
                    fill_id(&mut r.id, id)
                });
                reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                self.reports = reports;
            }
            Collection::Users | Collection::Usernames => {
                warn!("{} is not a mirrored collection", collection);
            }
        }
    }
}

fn fill_id(id: &mut String, doc_id: &str) {
    if id.is_empty() {
        *id = doc_id.to_string();
    }
}

fn decode_all<T: DeserializeOwned>(
    collection: Collection,
    docs: Vec<Document>,
    with_id: impl Fn(&mut T, &str),
) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value::<T>(doc.data) {
            Ok(mut item) => {
                with_id(&mut item, &doc.id);
                Some(item)
            }
            Err(e) => {
                warn!("Skipping malformed {}/{}: {}", collection, doc.id, e);
                None
            }
        })
        .collect()
}

/// Decode a book document, coercing legacy scalar likes into a per-chapter list
pub fn normalize_book(doc: Document) -> Option<Book> {
    let Document { id, mut data } = doc;
    let raw_likes = data.as_object_mut().and_then(|obj| obj.remove("likes"));

    let mut book: Book = match serde_json::from_value(data) {
        Ok(book) => book,
        Err(e) => {
            warn!("Skipping malformed books/{}: {}", id, e);
            return None;
        }
    };
    fill_id(&mut book.id, &id);
    book.likes = normalize_likes(raw_likes.as_ref(), book.chapters.len());
    Some(book)
}

/// Runs one subscription task per shared collection
pub struct SubscriptionReconciler {
    mirrors: Arc<RwLock<Mirrors>>,
    changes: broadcast::Sender<Collection>,
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriptionReconciler {
    pub fn start(remote: Arc<dyn RemoteStore>) -> Self {
        let mirrors = Arc::new(RwLock::new(Mirrors::default()));
        let (changes, _) = broadcast::channel(64);

        let tasks = Collection::SHARED
            .iter()
            .map(|&collection| {
                let mut stream = remote.subscribe(collection);
                let mirrors = mirrors.clone();
                let changes = changes.clone();

                tokio::spawn(async move {
                    while let Some(snapshot) = stream.next().await {
                        match snapshot {
                            Ok(docs) => {
                                let count = docs.len();
                                mirrors.write().await.ingest(collection, docs);
                                debug!("Mirrored {} {} documents", count, collection);
                                // No receivers is fine
                                let _ = changes.send(collection);
                            }
                            Err(e) => {
                                error!("Subscription to {} failed, keeping last mirror: {}", collection, e);
                            }
                        }
                    }
                    info!("Subscription to {} ended", collection);
                })
            })
            .collect();

        Self {
            mirrors,
            changes,
            tasks,
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Mirrors> {
        self.mirrors.read().await
    }

    pub fn mirrors(&self) -> Arc<RwLock<Mirrors>> {
        self.mirrors.clone()
    }

    /// Receive the name of each collection as its mirror is replaced
    pub fn changes(&self) -> broadcast::Receiver<Collection> {
        self.changes.subscribe()
    }

    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for SubscriptionReconciler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn doc(id: &str, data: serde_json::Value) -> Document {
        Document {
            id: id.to_string(),
            data,
        }
    }

    #[test]
    fn test_book_likes_normalized() {
        let book = normalize_book(doc(
            "b1",
            json!({
                "title": "Tide",
                "author": "ana",
                "chapters": [{ "title": "One" }, { "title": "Two" }, { "title": "Three" }],
                "likes": 12
            }),
        ))
        .unwrap();
        assert_eq!(book.id, "b1");
        assert_eq!(book.author_username, "ana");
        assert_eq!(book.likes, vec![12, 0, 0]);
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let mut mirrors = Mirrors::default();
        mirrors.ingest(
            Collection::Relationships,
            vec![
                doc("r1", json!({ "admirer": "ana", "target": "ben" })),
                doc("r2", json!({ "admirer": "ben", "target": "ana" })),
            ],
        );
        assert_eq!(mirrors.social_counts("ana").mutuals, 1);

        mirrors.ingest(
            Collection::Relationships,
            vec![doc("r1", json!({ "admirer": "ana", "target": "ben" }))],
        );
        assert_eq!(mirrors.relationships.len(), 1);
        assert_eq!(mirrors.relationships[0].id, "r1");
        assert_eq!(mirrors.social_counts("ana").mutuals, 0);
    }

    #[test]
    fn test_chat_sorted_by_time_with_mixed_encodings() {
        let mut mirrors = Mirrors::default();
        mirrors.ingest(
            Collection::ChatMessages,
            vec![
                doc("m1", json!({ "from": "ana", "to": "ben", "text": "late", "timestamp": "2026-03-01T12:00:00Z" })),
                doc("m2", json!({ "from": "ben", "to": "ana", "text": "early", "timestamp": 1_767_225_600_000_i64 })),
                doc("m3", json!("not an object")),
            ],
        );
        let texts: Vec<_> = mirrors.conversation("ana", "ben").iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["early", "late"]);
        assert_eq!(mirrors.chat_messages[1].id, "m1");
    }

    #[test]
    fn test_notifications_newest_first() {
        let mut mirrors = Mirrors::default();
        mirrors.ingest(
            Collection::Notifications,
            vec![
                doc("n1", json!({ "recipient": "ana", "type": "admire", "timestamp": "2026-01-01T00:00:00Z" })),
                doc("n2", json!({ "recipient": "ana", "type": "comment", "timestamp": "2026-02-01T00:00:00Z", "read": true })),
            ],
        );
        assert_eq!(mirrors.notifications[0].id, "n2");
        assert_eq!(mirrors.unread_notifications("ana"), 1);
    }

    #[tokio::test]
    async fn test_live_mirror_follows_store() {
        let memory = Arc::new(MemoryStore::new());
        let reconciler = SubscriptionReconciler::start(memory.clone());
        let mut changes = reconciler.changes();

        memory
            .create_document(Collection::Relationships, &json!({ "admirer": "ana", "target": "ben" }))
            .await
            .unwrap();

        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if changes.recv().await == Ok(Collection::Relationships)
                    && reconciler.read().await.relationships.len() == 1
                {
                    break;
                }
            }
        });
        assert!(deadline.await.is_ok());
        assert!(reconciler.read().await.is_admiring("ana", "ben"));
        reconciler.stop();
    }
}
