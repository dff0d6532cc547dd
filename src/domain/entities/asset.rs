use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Integer identity of an asset. Internal maps are always keyed by this;
/// symbols are resolved only at the presentation boundary.
pub type AssetId = i64;

/// A tradeable instrument with a finite lifetime.
///
/// An asset is ACTIVE from creation until it either reaches `expires_at` or
/// its price falls below the worthlessness threshold. Expiry happens exactly
/// once: `is_active`, `final_price` and `settled_at` flip together and the
/// record is immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: String,
    /// Display color for charts, assigned at creation.
    pub color: String,
    pub initial_price: f64,
    pub current_price: f64,
    /// Per-tick volatility sigma, in [0, 1].
    pub volatility: f64,
    /// Mean log-return per tick. Zero makes the price a martingale.
    pub drift: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub final_price: Option<f64>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Asset {
    /// Mark the asset expired at `final_price`. Returns false (and leaves
    /// the record untouched) if the asset is already inactive.
    pub fn expire(&mut self, final_price: f64, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.final_price = Some(final_price);
        self.settled_at = Some(now);
        true
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_worthless(&self, threshold: f64) -> bool {
        self.current_price < threshold
    }

    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Expiry fields must move together: active assets carry neither a
    /// final price nor a settlement time, inactive assets carry both.
    pub fn lifecycle_fields_consistent(&self) -> bool {
        self.is_active == self.final_price.is_none()
            && self.is_active == self.settled_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_asset() -> Asset {
        let now = Utc::now();
        Asset {
            id: 1,
            symbol: "XQR".to_string(),
            color: "#4e79a7".to_string(),
            initial_price: 100.0,
            current_price: 100.0,
            volatility: 0.05,
            drift: 0.0,
            created_at: now,
            expires_at: now + Duration::minutes(10),
            is_active: true,
            final_price: None,
            settled_at: None,
        }
    }

    #[test]
    fn test_new_asset_is_consistent() {
        let asset = sample_asset();
        assert!(asset.is_active);
        assert!(asset.lifecycle_fields_consistent());
    }

    #[test]
    fn test_expire_sets_all_lifecycle_fields() {
        let mut asset = sample_asset();
        let now = Utc::now();
        assert!(asset.expire(42.5, now));

        assert!(!asset.is_active);
        assert_eq!(asset.final_price, Some(42.5));
        assert_eq!(asset.settled_at, Some(now));
        assert!(asset.lifecycle_fields_consistent());
    }

    #[test]
    fn test_expire_is_idempotent() {
        let mut asset = sample_asset();
        let now = Utc::now();
        assert!(asset.expire(42.5, now));

        // A second expiry must not overwrite the recorded final price.
        assert!(!asset.expire(1.0, now + Duration::seconds(5)));
        assert_eq!(asset.final_price, Some(42.5));
        assert_eq!(asset.settled_at, Some(now));
    }

    #[test]
    fn test_worthless_threshold() {
        let mut asset = sample_asset();
        asset.current_price = 0.005;
        assert!(asset.is_worthless(0.01));

        asset.current_price = 0.01;
        assert!(!asset.is_worthless(0.01));
    }

    #[test]
    fn test_time_to_expiry() {
        let asset = sample_asset();
        let remaining = asset.time_to_expiry(asset.created_at);
        assert_eq!(remaining.num_minutes(), 10);
        assert!(!asset.is_expired(asset.created_at));
        assert!(asset.is_expired(asset.expires_at));
    }
}
