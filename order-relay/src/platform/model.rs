//! Storefront order wire format

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use shared::models::{LineItem, OrderPayload, ShippingAddress};

/// Platform ids arrive as JSON numbers on some topics and strings on others
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Num(n) => n.to_string(),
        Raw::Str(s) => s,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalLineItem {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default)]
    pub price: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalAddress {
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
    pub zip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

/// Order record as sent in webhooks and returned by the admin API
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalOrder {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// RFC 3339
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub total_price: Decimal,
    #[serde(default)]
    pub line_items: Vec<ExternalLineItem>,
    #[serde(default)]
    pub shipping_address: Option<ExternalAddress>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ExternalOrder {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("#{}", self.id))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Normalized payload stored on the order
    pub fn to_payload(&self) -> OrderPayload {
        OrderPayload {
            line_items: self
                .line_items
                .iter()
                .map(|li| LineItem {
                    sku: li.sku.clone(),
                    title: li.title.clone(),
                    quantity: li.quantity,
                    unit_price: li.price,
                })
                .collect(),
            shipping_address: self.shipping_address.as_ref().map(|a| ShippingAddress {
                name: a.name.clone(),
                address1: a.address1.clone(),
                address2: a.address2.clone(),
                city: a.city.clone(),
                province: a.province.clone(),
                postal_code: a.zip.clone(),
                country_code: a.country_code.as_ref().map(|c| c.trim().to_ascii_uppercase()),
            }),
            email: self.email.clone(),
            note: self.note.clone(),
        }
    }
}

/// `customers/redact` body
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerRedact {
    #[serde(default)]
    pub orders_to_redact: Vec<serde_json::Value>,
}

impl CustomerRedact {
    pub fn order_ids(&self) -> Vec<String> {
        self.orders_to_redact
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_id_and_string_prices() {
        let raw = r##"{
            "id": 450789469,
            "name": "#1001",
            "created_at": "2024-03-01T10:00:00-05:00",
            "currency": "USD",
            "total_price": "59.90",
            "line_items": [{"sku": "TEE-M", "title": "Tee", "quantity": 2, "price": "29.95"}],
            "shipping_address": {"address1": "1 Main", "city": "Ottawa", "zip": "K1A", "country_code": "ca"}
        }"##;
        let order: ExternalOrder = serde_json::from_str(raw).unwrap();
        assert_eq!(order.id, "450789469");
        assert_eq!(order.total_price, Decimal::new(5990, 2));

        let payload = order.to_payload();
        assert_eq!(payload.line_items[0].unit_price, Decimal::new(2995, 2));
        let addr = payload.shipping_address.unwrap();
        assert_eq!(addr.postal_code.as_deref(), Some("K1A"));
        assert_eq!(addr.country_code.as_deref(), Some("CA"));
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let order: ExternalOrder =
            serde_json::from_str(r#"{"id":"abc","created_at":"2024-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(order.display_name(), "#abc");
        assert!(!order.is_cancelled());
    }

    #[test]
    fn redact_ids_accept_numbers_and_strings() {
        let r: CustomerRedact =
            serde_json::from_str(r#"{"orders_to_redact":[1,"2",null]}"#).unwrap();
        assert_eq!(r.order_ids(), vec!["1", "2"]);
    }
}
