// Book data model
// Matches documents in the shared `books` collection after ingest normalization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::timestamp::opt_instant;

fn published_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Chapter {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "isPublished", default = "published_default")]
    pub is_published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(alias = "author")]
    pub author_username: String,
    pub chapters: Vec<Chapter>,
    /// Likes per chapter, index-aligned with `chapters`
    pub likes: Vec<u32>,
    pub is_completed: bool,
    #[serde(with = "opt_instant")]
    pub published_date: Option<DateTime<Utc>>,
    pub price: f64,
    pub cover_color: Option<String>,
    pub cover_image: Option<String>,
    pub is_monetized: bool,
    pub was_monetized_before: bool,
    pub monetization_attempts: u32,
}

impl Book {
    pub fn published_chapters(&self) -> usize {
        self.chapters.iter().filter(|c| c.is_published).count()
    }

    /// Fewest likes on any chapter; zero for a book without chapters
    pub fn min_likes_per_chapter(&self) -> u32 {
        if self.chapters.is_empty() {
            return 0;
        }
        (0..self.chapters.len())
            .map(|i| self.likes.get(i).copied().unwrap_or(0))
            .min()
            .unwrap_or(0)
    }
}

/// Coerce whatever is stored under `likes` into a per-chapter sequence.
/// Legacy documents hold a single total, which lands on the first chapter.
pub fn normalize_likes(raw: Option<&Value>, chapter_count: usize) -> Vec<u32> {
    let mut likes = match raw {
        Some(Value::Array(items)) => items.iter().map(like_count).collect(),
        Some(scalar @ (Value::Number(_) | Value::String(_))) => {
            let mut likes = vec![0; chapter_count.max(1)];
            likes[0] = like_count(scalar);
            likes
        }
        _ => Vec::new(),
    };
    if likes.len() < chapter_count {
        likes.resize(chapter_count, 0);
    }
    likes
}

fn like_count(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0)
            .min(u32::MAX as u64) as u32,
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_scalar_likes() {
        assert_eq!(normalize_likes(Some(&json!(42)), 3), vec![42, 0, 0]);
        assert_eq!(normalize_likes(Some(&json!(7)), 0), vec![7]);
    }

    #[test]
    fn test_array_likes_padded() {
        assert_eq!(normalize_likes(Some(&json!([5, "8", null])), 4), vec![5, 8, 0, 0]);
        assert_eq!(normalize_likes(None, 2), vec![0, 0]);
    }

    #[test]
    fn test_min_likes() {
        let book = Book {
            chapters: vec![Chapter::default(); 3],
            likes: vec![60, 51],
            ..Default::default()
        };
        assert_eq!(book.min_likes_per_chapter(), 0);
        assert_eq!(Book::default().min_likes_per_chapter(), 0);
    }
}
