// Payment return handling
// The processor redirect is opaque; we only keep a descriptor across it and read the outcome back

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// What the user is paying for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PaymentKind {
    #[serde(rename_all = "camelCase")]
    BookPurchase { book_ids: Vec<String> },
    PointsPack { points: i64 },
    Membership,
}

/// Descriptor stored before leaving for the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayment {
    #[serde(flatten)]
    pub kind: PaymentKind,
    pub amount_cents: i64,
    #[serde(default)]
    pub coupon_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result reported on return to the app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Cancelled,
}

impl PaymentOutcome {
    /// Read the outcome from the return URL query (`?payment=success`)
    pub fn from_return_query(query: &str) -> Option<Self> {
        query
            .trim_start_matches('?')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .filter(|(key, _)| matches!(*key, "payment" | "status"))
            .find_map(|(_, value)| {
                let value = urlencoding::decode(value).ok()?;
                match value.to_lowercase().as_str() {
                    "success" | "succeeded" | "paid" => Some(PaymentOutcome::Success),
                    "cancel" | "cancelled" | "canceled" | "failed" => Some(PaymentOutcome::Cancelled),
                    _ => None,
                }
            })
    }
}

/// Client-side storage for the pending descriptor
#[derive(Debug, Clone)]
pub struct PaymentLedger {
    path: PathBuf,
}

impl PaymentLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Remember a payment before redirecting, replacing any older one
    pub async fn save(&self, pending: &PendingPayment) -> Result<()> {
        let content = serde_json::to_vec_pretty(pending)?;
        tokio::fs::write(&self.path, content).await?;
        debug!("Saved pending payment to {}", self.path.display());
        Ok(())
    }

    /// Read back and forget the pending descriptor
    pub async fn take(&self) -> Result<Option<PendingPayment>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        tokio::fs::remove_file(&self.path).await?;

        match serde_json::from_slice(&content) {
            Ok(pending) => Ok(Some(pending)),
            Err(e) => {
                warn!("Discarding unreadable pending payment: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_query() {
        assert_eq!(
            PaymentOutcome::from_return_query("?payment=success&session_id=cs_1"),
            Some(PaymentOutcome::Success)
        );
        assert_eq!(
            PaymentOutcome::from_return_query("status=canceled"),
            Some(PaymentOutcome::Cancelled)
        );
        assert_eq!(PaymentOutcome::from_return_query("?tab=library"), None);
    }

    #[test]
    fn test_descriptor_shape() {
        let pending = PendingPayment {
            kind: PaymentKind::BookPurchase {
                book_ids: vec!["b1".to_string()],
            },
            amount_cents: 499,
            coupon_id: None,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&pending).unwrap();
        assert_eq!(value["kind"], "bookPurchase");
        assert_eq!(value["bookIds"][0], "b1");
        assert_eq!(value["amountCents"], 499);
    }

    #[tokio::test]
    async fn test_ledger_take_clears() {
        let path = std::env::temp_dir().join(format!("pagebound-ledger-{}.json", std::process::id()));
        let ledger = PaymentLedger::new(&path);
        let pending = PendingPayment {
            kind: PaymentKind::PointsPack { points: 500 },
            amount_cents: 299,
            coupon_id: None,
            created_at: Utc::now(),
        };

        ledger.save(&pending).await.unwrap();
        assert_eq!(ledger.take().await.unwrap(), Some(pending));
        assert_eq!(ledger.take().await.unwrap(), None);
    }
}
