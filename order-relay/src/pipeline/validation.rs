//! Validation rules
//!
//! Rules are evaluated in a fixed order and all of them run, so one pass
//! reports every problem with an order and identical input gives identical
//! findings.

use std::collections::{BTreeSet, HashSet};

use shared::models::{OrderPayload, OrderState, TenantSettings, ValidationFinding};

use crate::db::OrderStore;

pub const ADDRESS_INCOMPLETE: &str = "ADDRESS_INCOMPLETE";
pub const NO_LINE_ITEMS: &str = "NO_LINE_ITEMS";
pub const LINE_ITEM_INCOMPLETE: &str = "LINE_ITEM_INCOMPLETE";
pub const SKU_NOT_READY: &str = "SKU_NOT_READY";
pub const SKU_REGISTRY_UNAVAILABLE: &str = "SKU_REGISTRY_UNAVAILABLE";
pub const REGION_NOT_ALLOWED: &str = "REGION_NOT_ALLOWED";

/// Result of the SKU registry lookup for one order
#[derive(Debug, Clone)]
pub enum RegistryLookup {
    /// Tenant does not enforce the registry
    NotEnforced,
    /// SKUs from the order that are registered
    Found(HashSet<String>),
    Unavailable(String),
}

/// Distinct non-blank SKUs on the order, sorted
pub fn order_skus(payload: &OrderPayload) -> Vec<String> {
    payload
        .line_items
        .iter()
        .filter_map(|li| li.trimmed_sku())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Run every rule against `payload`
pub fn evaluate(
    payload: &OrderPayload,
    settings: &TenantSettings,
    registry: &RegistryLookup,
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();

    // 1. address
    match payload.shipping_address {
        None => findings.push(ValidationFinding::new(
            ADDRESS_INCOMPLETE,
            "Order has no shipping address",
        )),
        Some(ref addr) => {
            let missing = addr.missing_fields();
            if !missing.is_empty() {
                findings.push(ValidationFinding::new(
                    ADDRESS_INCOMPLETE,
                    format!("Shipping address is missing: {}", missing.join(", ")),
                ));
            }
        }
    }

    // 2. line items present
    if payload.line_items.is_empty() {
        findings.push(ValidationFinding::new(NO_LINE_ITEMS, "Order has no line items"));
    }

    // 3. line item completeness
    let incomplete: Vec<String> = payload
        .line_items
        .iter()
        .enumerate()
        .filter(|(_, li)| li.trimmed_sku().is_none() || li.quantity <= 0)
        .map(|(i, li)| {
            let label = if li.title.is_empty() {
                format!("line {}", i + 1)
            } else {
                format!("line {} ({})", i + 1, li.title)
            };
            match (li.trimmed_sku(), li.quantity) {
                (None, q) if q <= 0 => format!("{label}: no SKU, quantity {q}"),
                (None, _) => format!("{label}: no SKU"),
                (Some(_), q) => format!("{label}: quantity {q}"),
            }
        })
        .collect();
    if !incomplete.is_empty() {
        findings.push(ValidationFinding::new(
            LINE_ITEM_INCOMPLETE,
            incomplete.join("; "),
        ));
    }

    // 4/5. SKU registry
    match registry {
        RegistryLookup::NotEnforced => {}
        RegistryLookup::Found(registered) => {
            let unknown: Vec<String> = order_skus(payload)
                .into_iter()
                .filter(|s| !registered.contains(s))
                .collect();
            if !unknown.is_empty() {
                findings.push(ValidationFinding::new(
                    SKU_NOT_READY,
                    format!("SKUs not in registry: {}", unknown.join(", ")),
                ));
            }
        }
        RegistryLookup::Unavailable(reason) => findings.push(ValidationFinding::new(
            SKU_REGISTRY_UNAVAILABLE,
            format!("SKU registry lookup failed: {reason}"),
        )),
    }

    // 6. destination region
    if !settings.allowed_countries.is_empty()
        && let Some(country) = payload
            .shipping_address
            .as_ref()
            .and_then(|a| a.country_code.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
    {
        let country = country.to_ascii_uppercase();
        if !settings.allowed_countries.contains(&country) {
            findings.push(ValidationFinding::new(
                REGION_NOT_ALLOWED,
                format!(
                    "Destination {country} is not in allowed countries ({})",
                    settings.allowed_countries.join(", ")
                ),
            ));
        }
    }

    findings
}

/// Look up the order's SKUs when the tenant enforces the registry
pub async fn lookup_registry(
    store: &dyn OrderStore,
    settings: &TenantSettings,
    payload: &OrderPayload,
) -> RegistryLookup {
    if !settings.enforce_sku_registry {
        return RegistryLookup::NotEnforced;
    }
    let skus = order_skus(payload);
    if skus.is_empty() {
        return RegistryLookup::Found(HashSet::new());
    }
    match store.registered_skus(&settings.tenant_id, &skus).await {
        Ok(found) => RegistryLookup::Found(found),
        Err(e) => {
            tracing::warn!(tenant_id = %settings.tenant_id, error = %e, "SKU registry lookup failed");
            RegistryLookup::Unavailable(e.to_string())
        }
    }
}

/// Target state after a validation pass
pub fn next_state(findings: &[ValidationFinding], ready_at: i64, now: i64) -> OrderState {
    if !findings.is_empty() {
        OrderState::Held
    } else if now >= ready_at {
        OrderState::Ready
    } else {
        OrderState::Pending
    }
}
