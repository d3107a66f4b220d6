// Coupon data model

use serde::{Deserialize, Serialize};

/// Cumulative draw table over a roll in [0, 100): (upper bound, coupon value)
pub const DRAW_TABLE: [(f64, u32); 4] = [(84.0, 1), (93.0, 3), (98.0, 5), (100.0, 10)];

/// A discount token won from a spin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    pub value: u32,
    #[serde(default)]
    pub used: bool,
}

impl Coupon {
    pub fn new(id: impl Into<String>, value: u32) -> Self {
        Self {
            id: id.into(),
            value,
            used: false,
        }
    }

    /// Map a uniform roll in [0, 100) onto a coupon value
    pub fn draw_value(roll: f64) -> u32 {
        DRAW_TABLE
            .iter()
            .find(|(upper, _)| roll < *upper)
            .map(|(_, value)| *value)
            .unwrap_or(DRAW_TABLE[DRAW_TABLE.len() - 1].1)
    }
}

/// Unused coupons in insertion order
pub fn unused(coupons: &[Coupon]) -> impl Iterator<Item = &Coupon> {
    coupons.iter().filter(|c| !c.used)
}
