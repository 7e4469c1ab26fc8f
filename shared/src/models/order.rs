//! Order Model
//!
//! Canonical order record owned by one merchant (and through it one tenant).
//! All timestamps are Unix milliseconds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle state
///
/// ```text
/// PENDING -> READY | HELD | ERROR
/// HELD    -> READY | ERROR
/// READY   -> EXPORTED | ERROR
/// ERROR   -> READY (operator retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Inside the delay window, not yet validated
    Pending,
    /// Validation failed, waiting on an operator or revalidation
    Held,
    /// Validated and eligible for the next export batch
    Ready,
    /// Delivered to fulfillment
    Exported,
    /// Cancelled or failed export
    Error,
}

impl OrderState {
    pub const ALL: [OrderState; 5] = [
        Self::Pending,
        Self::Held,
        Self::Ready,
        Self::Exported,
        Self::Error,
    ];

    /// Parse from database string value
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "HELD" => Some(Self::Held),
            "READY" => Some(Self::Ready),
            "EXPORTED" => Some(Self::Exported),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// Database string representation
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Held => "HELD",
            Self::Ready => "READY",
            Self::Exported => "EXPORTED",
            Self::Error => "ERROR",
        }
    }

    /// `ready_at` only drives scheduling in these states
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Pending | Self::Held)
    }

    /// A cancellation may still stop the order in these states
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Held | Self::Ready)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db())
    }
}

/// One purchased line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: String,
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: Decimal,
}

impl LineItem {
    /// SKU with surrounding whitespace removed, `None` when blank
    pub fn trimmed_sku(&self) -> Option<&str> {
        self.sku.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Destination address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    /// ISO 3166-1 alpha-2
    #[serde(default)]
    pub country_code: Option<String>,
}

impl ShippingAddress {
    /// Names of required fields that are missing or blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.address1) {
            missing.push("address1");
        }
        if blank(&self.city) {
            missing.push("city");
        }
        if blank(&self.postal_code) {
            missing.push("postal_code");
        }
        if blank(&self.country_code) {
            missing.push("country_code");
        }
        missing
    }
}

/// Normalized order body, persisted as JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub tenant_id: String,
    pub merchant_id: i64,
    /// Platform-assigned id, unique per merchant
    pub external_order_id: String,
    /// Platform display name (e.g. `#1001`)
    pub display_name: String,
    pub state: OrderState,
    pub payload: OrderPayload,
    pub currency: String,
    pub total_price: Decimal,
    /// Platform-reported creation time
    pub placed_at: i64,
    /// `placed_at` + tenant delay window
    pub ready_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub cancelled_at: Option<i64>,
    pub export_batch_id: Option<String>,
    pub last_error: Option<String>,
    /// Batch currently holding the export claim
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    /// Row version, bumped on every write
    pub version: i64,
}

impl Order {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Delay window has elapsed at `now`
    pub fn is_due(&self, now: i64) -> bool {
        self.ready_at <= now
    }
}

/// Order counts per state for one merchant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStateCounts {
    pub pending: i64,
    pub held: i64,
    pub ready: i64,
    pub exported: i64,
    pub error: i64,
}

impl OrderStateCounts {
    pub fn add(&mut self, state: OrderState, n: i64) {
        match state {
            OrderState::Pending => self.pending += n,
            OrderState::Held => self.held += n,
            OrderState::Ready => self.ready += n,
            OrderState::Exported => self.exported += n,
            OrderState::Error => self.error += n,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.held + self.ready + self.exported + self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_db_strings_match_serde() {
        for state in OrderState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_db()));
            assert_eq!(OrderState::from_db(state.as_db()), Some(state));
        }
        assert_eq!(OrderState::from_db("pending"), None);
    }

    #[test]
    fn missing_address_fields_treats_blank_as_missing() {
        let addr = ShippingAddress {
            address1: Some("1 Main St".into()),
            city: Some("  ".into()),
            postal_code: None,
            country_code: Some("US".into()),
            ..Default::default()
        };
        assert_eq!(addr.missing_fields(), vec!["city", "postal_code"]);
    }

    #[test]
    fn blank_sku_is_none() {
        let item = LineItem {
            sku: Some("  ".into()),
            title: "Mug".into(),
            quantity: 1,
            unit_price: Decimal::ZERO,
        };
        assert_eq!(item.trimmed_sku(), None);
    }

    #[test]
    fn counts_accumulate_by_state() {
        let mut counts = OrderStateCounts::default();
        counts.add(OrderState::Ready, 3);
        counts.add(OrderState::Error, 1);
        counts.add(OrderState::Ready, 2);
        assert_eq!(counts.ready, 5);
        assert_eq!(counts.total(), 6);
    }
}
