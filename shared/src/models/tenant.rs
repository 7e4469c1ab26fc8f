//! Tenant settings and merchant credential models

use serde::{Deserialize, Serialize};

pub const DEFAULT_DELAY_HOURS: i32 = 6;
pub const DEFAULT_EXPORT_CADENCE_MINUTES: i32 = 15;
pub const DEFAULT_SWEEP_INTERVAL_MINUTES: i32 = 1;

const HOUR_MS: i64 = 3_600_000;
const MINUTE_MS: i64 = 60_000;

/// When HELD orders get revalidated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeldRevalidation {
    /// Only an operator action moves a HELD order
    #[default]
    Manual,
    /// The delay sweep revalidates HELD orders on every pass
    Automatic,
}

impl HeldRevalidation {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "automatic" => Some(Self::Automatic),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
        }
    }
}

/// Per-tenant pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: String,
    /// Buffer after order creation before validation/export
    pub delay_hours: i32,
    /// Minimum minutes between export runs per merchant
    pub export_cadence_minutes: i32,
    /// Minimum minutes between delay sweeps per merchant
    pub sweep_interval_minutes: i32,
    /// Simulate deliveries instead of calling fulfillment
    pub demo_mode: bool,
    /// Check SKUs against the tenant SKU registry
    pub enforce_sku_registry: bool,
    /// Destination countries accepted; empty means any
    pub allowed_countries: Vec<String>,
    pub held_revalidation: HeldRevalidation,
    /// Overrides the platform webhook secret for this tenant's shops
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub updated_at: i64,
}

impl TenantSettings {
    /// Settings used when a tenant has never saved any
    pub fn defaults(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            delay_hours: DEFAULT_DELAY_HOURS,
            export_cadence_minutes: DEFAULT_EXPORT_CADENCE_MINUTES,
            sweep_interval_minutes: DEFAULT_SWEEP_INTERVAL_MINUTES,
            demo_mode: false,
            enforce_sku_registry: false,
            allowed_countries: Vec::new(),
            held_revalidation: HeldRevalidation::Manual,
            webhook_secret: None,
            updated_at: 0,
        }
    }

    pub fn delay_ms(&self) -> i64 {
        i64::from(self.delay_hours.max(0)) * HOUR_MS
    }

    pub fn export_cadence_ms(&self) -> i64 {
        i64::from(self.export_cadence_minutes.max(1)) * MINUTE_MS
    }

    pub fn sweep_interval_ms(&self) -> i64 {
        i64::from(self.sweep_interval_minutes.max(1)) * MINUTE_MS
    }

    /// `ready_at` for an order placed at `placed_at`
    pub fn ready_at(&self, placed_at: i64) -> i64 {
        placed_at + self.delay_ms()
    }

    /// Apply a partial update, returning the names of changed fields
    pub fn apply(&mut self, update: &TenantSettingsUpdate, now: i64) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if let Some(v) = update.delay_hours {
            self.delay_hours = v;
            changed.push("delay_hours");
        }
        if let Some(v) = update.export_cadence_minutes {
            self.export_cadence_minutes = v;
            changed.push("export_cadence_minutes");
        }
        if let Some(v) = update.sweep_interval_minutes {
            self.sweep_interval_minutes = v;
            changed.push("sweep_interval_minutes");
        }
        if let Some(v) = update.demo_mode {
            self.demo_mode = v;
            changed.push("demo_mode");
        }
        if let Some(v) = update.enforce_sku_registry {
            self.enforce_sku_registry = v;
            changed.push("enforce_sku_registry");
        }
        if let Some(ref v) = update.allowed_countries {
            self.allowed_countries = v.iter().map(|c| c.trim().to_ascii_uppercase()).collect();
            changed.push("allowed_countries");
        }
        if let Some(v) = update.held_revalidation {
            self.held_revalidation = v;
            changed.push("held_revalidation");
        }
        if let Some(ref v) = update.webhook_secret {
            self.webhook_secret = Some(v.clone()).filter(|s| !s.is_empty());
            changed.push("webhook_secret");
        }
        self.updated_at = now;
        changed
    }
}

/// Partial settings update payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSettingsUpdate {
    #[serde(default)]
    pub delay_hours: Option<i32>,
    #[serde(default)]
    pub export_cadence_minutes: Option<i32>,
    #[serde(default)]
    pub sweep_interval_minutes: Option<i32>,
    #[serde(default)]
    pub demo_mode: Option<bool>,
    #[serde(default)]
    pub enforce_sku_registry: Option<bool>,
    #[serde(default)]
    pub allowed_countries: Option<Vec<String>>,
    #[serde(default)]
    pub held_revalidation: Option<HeldRevalidation>,
    /// Empty string clears the override
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl TenantSettingsUpdate {
    /// Range checks, returning a message for the first bad field
    pub fn check(&self) -> Result<(), String> {
        if let Some(h) = self.delay_hours
            && !(0..=168).contains(&h)
        {
            return Err(format!("delay_hours must be between 0 and 168, got {h}"));
        }
        if let Some(m) = self.export_cadence_minutes
            && !(1..=1440).contains(&m)
        {
            return Err(format!(
                "export_cadence_minutes must be between 1 and 1440, got {m}"
            ));
        }
        if let Some(m) = self.sweep_interval_minutes
            && !(1..=1440).contains(&m)
        {
            return Err(format!(
                "sweep_interval_minutes must be between 1 and 1440, got {m}"
            ));
        }
        if let Some(ref countries) = self.allowed_countries
            && let Some(bad) = countries.iter().find(|c| c.trim().len() != 2)
        {
            return Err(format!("allowed_countries entry '{bad}' is not a 2-letter code"));
        }
        Ok(())
    }
}

/// Connected storefront account, written by the provisioning system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: i64,
    pub tenant_id: String,
    /// Platform shop identifier (e.g. `acme.myshop.example`)
    pub shop_domain: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub active: bool,
    /// Last export run start, for tenant cadence
    pub last_export_at: Option<i64>,
    /// Last delay sweep, for the tenant sweep interval
    pub last_sweep_at: Option<i64>,
}

impl Merchant {
    /// Export run is due under the given cadence
    pub fn export_due(&self, cadence_ms: i64, now: i64) -> bool {
        self.last_export_at.is_none_or(|last| now - last >= cadence_ms)
    }

    pub fn sweep_due(&self, interval_ms: i64, now: i64) -> bool {
        self.last_sweep_at.is_none_or(|last| now - last >= interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_six_hour_delay() {
        let s = TenantSettings::defaults("t1");
        assert_eq!(s.delay_hours, 6);
        assert_eq!(s.export_cadence_minutes, 15);
        assert_eq!(s.ready_at(1_000), 1_000 + 6 * 3_600_000);
    }

    #[test]
    fn apply_normalizes_countries_and_clears_secret() {
        let mut s = TenantSettings::defaults("t1");
        s.webhook_secret = Some("old".into());
        let update = TenantSettingsUpdate {
            allowed_countries: Some(vec![" us".into(), "ca".into()]),
            webhook_secret: Some(String::new()),
            ..Default::default()
        };
        let changed = s.apply(&update, 99);
        assert_eq!(changed, vec!["allowed_countries", "webhook_secret"]);
        assert_eq!(s.allowed_countries, vec!["US", "CA"]);
        assert!(s.webhook_secret.is_none());
        assert_eq!(s.updated_at, 99);
    }

    #[test]
    fn check_rejects_out_of_range_values() {
        let bad_delay = TenantSettingsUpdate {
            delay_hours: Some(-1),
            ..Default::default()
        };
        assert!(bad_delay.check().is_err());

        let bad_country = TenantSettingsUpdate {
            allowed_countries: Some(vec!["USA".into()]),
            ..Default::default()
        };
        assert!(bad_country.check().is_err());

        let bad_sweep = TenantSettingsUpdate {
            sweep_interval_minutes: Some(0),
            ..Default::default()
        };
        assert!(bad_sweep.check().is_err());

        assert!(TenantSettingsUpdate::default().check().is_ok());
    }

    #[test]
    fn export_due_respects_cadence() {
        let mut m = Merchant {
            id: 1,
            tenant_id: "t1".into(),
            shop_domain: "a.example".into(),
            access_token: "tok".into(),
            active: true,
            last_export_at: None,
            last_sweep_at: None,
        };
        assert!(m.export_due(900_000, 0));
        m.last_export_at = Some(100_000);
        assert!(!m.export_due(900_000, 500_000));
        // sweep bookkeeping is tracked separately
        assert!(m.sweep_due(60_000, 500_000));
        assert!(m.export_due(900_000, 1_000_000));
    }
}
