//! Checkout totals for processor-paid orders. All amounts are in cents.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Orders at or above this subtotal ship for free.
pub const FREE_SHIPPING_THRESHOLD: i64 = 5_000;
pub const FLAT_SHIPPING: i64 = 999;
/// Sales tax in basis points (8%).
pub const TAX_RATE_BPS: i64 = 800;

/// One priced cart line. Serialized into payment session metadata as a snapshot
/// so the order can be rebuilt exactly as it was paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i32,
}

impl PriceLine {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Totals {
    pub subtotal: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
}

pub fn subtotal(lines: &[PriceLine]) -> i64 {
    lines.iter().map(PriceLine::line_total).sum()
}

pub fn totals(lines: &[PriceLine]) -> Totals {
    let subtotal = subtotal(lines);
    let shipping = if subtotal >= FREE_SHIPPING_THRESHOLD || subtotal == 0 {
        0
    } else {
        FLAT_SHIPPING
    };
    // round half up
    let tax = (subtotal * TAX_RATE_BPS + 5_000) / 10_000;
    Totals {
        subtotal,
        shipping,
        tax,
        total: subtotal + shipping + tax,
    }
}

/// Formats cents as a decimal major-unit string, e.g. `1234` -> `"12.34"`.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
