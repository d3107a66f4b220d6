// Shopping cart data model

use serde::{Deserialize, Serialize};

/// A book waiting in the cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub title: String,
    /// Price in dollars
    pub price: f64,
    #[serde(rename = "coverColor", default, skip_serializing_if = "Option::is_none")]
    pub cover_color: Option<String>,
    #[serde(rename = "coverImage", default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
}

/// Cart total in cents after an optional coupon discount (coupon values are dollars)
pub fn total_cents(items: &[CartItem], coupon_value: Option<u32>) -> i64 {
    let gross: i64 = items.iter().map(|i| (i.price * 100.0).round() as i64).sum();
    let discount = coupon_value.map(|v| v as i64 * 100).unwrap_or(0);
    (gross - discount).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, price: f64) -> CartItem {
        CartItem {
            id: id.to_string(),
            title: format!("Book {}", id),
            price,
            cover_color: None,
            cover_image: None,
        }
    }

    #[test]
    fn test_total_with_coupon() {
        let items = vec![item("a", 4.99), item("b", 2.50)];
        assert_eq!(total_cents(&items, None), 749);
        assert_eq!(total_cents(&items, Some(3)), 449);
        assert_eq!(total_cents(&items, Some(10)), 0);
    }
}
