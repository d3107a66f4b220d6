// Per-user maps: avatar, unlocks, library ownership, reading progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::utils::config::READING_ACTIVITY_LIMIT;

/// Avatar appearance: gender plus four wearable slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AvatarConfig {
    pub gender: String,
    pub hair: Option<String>,
    pub top: Option<String>,
    pub bottom: Option<String>,
    pub shoes: Option<String>,
}

impl AvatarConfig {
    /// Item ids currently worn
    pub fn worn_items(&self) -> impl Iterator<Item = &str> {
        [&self.hair, &self.top, &self.bottom, &self.shoes]
            .into_iter()
            .filter_map(|slot| slot.as_deref())
    }
}

/// Where a reader stopped in a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BookProgress {
    /// Percentage through the current chapter, 0 to 100
    #[serde(rename = "scrollProgress")]
    pub scroll_progress: f64,
    #[serde(rename = "chapterIndex")]
    pub chapter_index: u32,
}

/// One entry of the recently-read list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingActivityEntry {
    #[serde(rename = "bookId")]
    pub book_id: String,
    #[serde(rename = "chapterIndex")]
    pub chapter_index: u32,
    pub timestamp: DateTime<Utc>,
}

/// Everything tracked per username
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserMaps {
    pub avatar_config: AvatarConfig,
    pub unlocked_item_ids: BTreeSet<String>,
    pub owned_book_ids: BTreeSet<String>,
    /// Never shrinks: a purchase stays readable after removal from the library view
    pub purchased_book_ids: BTreeSet<String>,
    pub book_progress: BTreeMap<String, BookProgress>,
    pub reading_activity: Vec<ReadingActivityEntry>,
}

impl UserMaps {
    /// Whether the user may open a book
    pub fn has_access(&self, book_id: &str) -> bool {
        self.owned_book_ids.contains(book_id) || self.purchased_book_ids.contains(book_id)
    }

    /// Move a book to the front of the recently-read list
    pub fn record_activity(&mut self, book_id: &str, chapter_index: u32, now: DateTime<Utc>) {
        self.reading_activity.retain(|entry| entry.book_id != book_id);
        self.reading_activity.insert(
            0,
            ReadingActivityEntry {
                book_id: book_id.to_string(),
                chapter_index,
                timestamp: now,
            },
        );
        self.reading_activity.truncate(READING_ACTIVITY_LIMIT);
    }
}
