use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::asset::AssetId;

/// Integer identity of a user. User management itself lives outside the
/// core; portfolios are keyed by this id.
pub type UserId = i64;

/// Running VWAP accumulator for one open position.
///
/// `total_cost / total_quantity` is the average cost basis of the shares
/// still held. Sells strip cost proportionally, never FIFO/LIFO.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub total_cost: f64,
    pub total_quantity: f64,
}

impl PositionInfo {
    pub fn average_cost(&self) -> f64 {
        if self.total_quantity > 0.0 {
            self.total_cost / self.total_quantity
        } else {
            0.0
        }
    }
}

/// One user's cash and holdings.
///
/// Invariant: every asset id present in `holdings` (quantity > 0) has a
/// matching `position_info` entry with `total_quantity` equal to the held
/// quantity. Closed positions are removed from both maps, never left at
/// zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: UserId,
    pub cash: f64,
    pub holdings: HashMap<AssetId, f64>,
    pub position_info: HashMap<AssetId, PositionInfo>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(user_id: UserId, initial_cash: f64) -> Self {
        Portfolio {
            user_id,
            cash: initial_cash,
            holdings: HashMap::new(),
            position_info: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn holding(&self, asset_id: AssetId) -> f64 {
        self.holdings.get(&asset_id).copied().unwrap_or(0.0)
    }

    /// Check the structural invariants of the holdings/position_info pair.
    pub fn validate_consistency(&self) -> Result<(), String> {
        if !self.cash.is_finite() {
            return Err("cash is not finite".to_string());
        }
        if self.cash < 0.0 {
            return Err(format!("cash {} is negative", self.cash));
        }

        for (asset_id, quantity) in &self.holdings {
            if !quantity.is_finite() || *quantity < 0.0 {
                return Err(format!("holding {} has invalid quantity {}", asset_id, quantity));
            }
            let info = self
                .position_info
                .get(asset_id)
                .ok_or_else(|| format!("holding {} has no position info", asset_id))?;
            if !info.total_cost.is_finite() || info.total_cost < 0.0 {
                return Err(format!("position {} has invalid cost {}", asset_id, info.total_cost));
            }
            if (info.total_quantity - quantity).abs() > 1e-6 {
                return Err(format!(
                    "position {} quantity {} disagrees with holding {}",
                    asset_id, info.total_quantity, quantity
                ));
            }
        }

        for asset_id in self.position_info.keys() {
            if !self.holdings.contains_key(asset_id) {
                return Err(format!("position info {} has no holding", asset_id));
            }
        }

        Ok(())
    }
}
