// Shared social collections: relationships, chat, notifications, comments, reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp::opt_instant;

/// Directed "admire" edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Relationship {
    #[serde(skip_serializing)]
    pub id: String,
    pub admirer: String,
    pub target: String,
    #[serde(with = "opt_instant")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    #[serde(with = "opt_instant")]
    pub timestamp: Option<DateTime<Utc>>,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
    pub id: String,
    pub recipient: String,
    pub sender: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub book_id: Option<String>,
    #[serde(with = "opt_instant")]
    pub timestamp: Option<DateTime<Utc>>,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Comment {
    pub id: String,
    pub book_id: String,
    pub chapter_index: Option<u32>,
    pub author_username: String,
    pub text: String,
    #[serde(with = "opt_instant")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Report {
    pub id: String,
    pub reporter: String,
    /// "book", "comment" or "user"
    pub target_kind: String,
    pub target_id: String,
    pub reason: String,
    pub status: String,
    #[serde(with = "opt_instant")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Admire counts derived from the relationship mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocialCounts {
    pub admirers: u32,
    pub admiring: u32,
    pub mutuals: u32,
}

impl SocialCounts {
    pub fn for_user(relationships: &[Relationship], username: &str) -> Self {
        let admirers: Vec<&str> = relationships
            .iter()
            .filter(|r| r.target == username)
            .map(|r| r.admirer.as_str())
            .collect();
        let admiring: Vec<&str> = relationships
            .iter()
            .filter(|r| r.admirer == username)
            .map(|r| r.target.as_str())
            .collect();

        let mut mutuals: Vec<&str> = admiring
            .iter()
            .filter(|target| admirers.contains(target))
            .copied()
            .collect();
        mutuals.sort_unstable();
        mutuals.dedup();

        let mut distinct_admirers = admirers.clone();
        distinct_admirers.sort_unstable();
        distinct_admirers.dedup();
        let mut distinct_admiring = admiring.clone();
        distinct_admiring.sort_unstable();
        distinct_admiring.dedup();

        Self {
            admirers: distinct_admirers.len() as u32,
            admiring: distinct_admiring.len() as u32,
            mutuals: mutuals.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(admirer: &str, target: &str) -> Relationship {
        Relationship {
            admirer: admirer.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_mutual_needs_both_directions() {
        let rels = vec![
            edge("ana", "ben"),
            edge("ben", "ana"),
            edge("cy", "ana"),
            edge("ana", "dee"),
        ];
        let counts = SocialCounts::for_user(&rels, "ana");
        assert_eq!(counts.admirers, 2);
        assert_eq!(counts.admiring, 2);
        assert_eq!(counts.mutuals, 1);
    }

    #[test]
    fn test_duplicate_edges_count_once() {
        let rels = vec![edge("ben", "ana"), edge("ben", "ana")];
        assert_eq!(SocialCounts::for_user(&rels, "ana").admirers, 1);
    }
}
