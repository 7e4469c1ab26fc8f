//! Inbound webhook topics

use super::model::{CustomerRedact, ExternalOrder};

/// Decoded webhook event
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// `orders/create`, `orders/updated`, `orders/paid`, `orders/fulfilled`
    OrderUpserted(ExternalOrder),
    /// `orders/cancelled`
    OrderCancelled(ExternalOrder),
    /// `app/uninstalled`, `shop/redact`: wipe everything for the shop
    ComplianceErasure,
    /// `customers/redact`: wipe the listed orders
    CustomerRedact(CustomerRedact),
    /// Anything else; acknowledged and ignored
    Unknown(String),
}

impl InboundEvent {
    pub fn from_topic(topic: &str, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match topic {
            "orders/create" | "orders/updated" | "orders/paid" | "orders/fulfilled" => {
                let order: ExternalOrder = serde_json::from_slice(body)?;
                // updates can carry a cancellation
                if order.is_cancelled() {
                    Self::OrderCancelled(order)
                } else {
                    Self::OrderUpserted(order)
                }
            }
            "orders/cancelled" => Self::OrderCancelled(serde_json::from_slice(body)?),
            "app/uninstalled" | "shop/redact" => Self::ComplianceErasure,
            "customers/redact" => Self::CustomerRedact(serde_json::from_slice(body)?),
            other => Self::Unknown(other.to_string()),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderUpserted(_) => "order_upserted",
            Self::OrderCancelled(_) => "order_cancelled",
            Self::ComplianceErasure => "compliance_erasure",
            Self::CustomerRedact(_) => "customer_redact",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &[u8] = br#"{"id":1,"created_at":"2024-01-01T00:00:00Z"}"#;

    #[test]
    fn topics_map_to_events() {
        assert!(matches!(
            InboundEvent::from_topic("orders/create", ORDER).unwrap(),
            InboundEvent::OrderUpserted(_)
        ));
        assert!(matches!(
            InboundEvent::from_topic("orders/cancelled", ORDER).unwrap(),
            InboundEvent::OrderCancelled(_)
        ));
        assert!(matches!(
            InboundEvent::from_topic("shop/redact", b"{}").unwrap(),
            InboundEvent::ComplianceErasure
        ));
        assert!(matches!(
            InboundEvent::from_topic("carts/create", b"garbage").unwrap(),
            InboundEvent::Unknown(_)
        ));
    }

    #[test]
    fn update_with_cancelled_at_is_a_cancellation() {
        let body = br#"{"id":1,"created_at":"2024-01-01T00:00:00Z","cancelled_at":"2024-01-01T01:00:00Z"}"#;
        assert!(matches!(
            InboundEvent::from_topic("orders/updated", body).unwrap(),
            InboundEvent::OrderCancelled(_)
        ));
    }

    #[test]
    fn malformed_order_body_is_an_error() {
        assert!(InboundEvent::from_topic("orders/create", b"{").is_err());
    }
}
