//! Database row types and their conversions to domain entities.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::asset::{Asset, AssetId};
use crate::domain::entities::portfolio::{Portfolio, PositionInfo, UserId};
use crate::domain::services::validation::TradeValidator;
use crate::persistence::DatabaseError;

/// Asset row. Mirrors the domain entity field for field.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssetRecord {
    pub id: AssetId,
    pub symbol: String,
    pub color: String,
    pub initial_price: f64,
    pub current_price: f64,
    pub volatility: f64,
    pub drift: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub final_price: Option<f64>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<&Asset> for AssetRecord {
    fn from(asset: &Asset) -> Self {
        AssetRecord {
            id: asset.id,
            symbol: asset.symbol.clone(),
            color: asset.color.clone(),
            initial_price: asset.initial_price,
            current_price: asset.current_price,
            volatility: asset.volatility,
            drift: asset.drift,
            created_at: asset.created_at,
            expires_at: asset.expires_at,
            is_active: asset.is_active,
            final_price: asset.final_price,
            settled_at: asset.settled_at,
        }
    }
}

impl From<AssetRecord> for Asset {
    fn from(record: AssetRecord) -> Self {
        Asset {
            id: record.id,
            symbol: record.symbol,
            color: record.color,
            initial_price: record.initial_price,
            current_price: record.current_price,
            volatility: record.volatility,
            drift: record.drift,
            created_at: record.created_at,
            expires_at: record.expires_at,
            is_active: record.is_active,
            final_price: record.final_price,
            settled_at: record.settled_at,
        }
    }
}

/// Portfolio row. Holdings and position info live as JSON text; JSON
/// object keys are strings, so asset ids round-trip through their
/// decimal representation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioRecord {
    pub user_id: UserId,
    pub cash: f64,
    pub holdings: String,
    pub position_info: String,
    pub updated_at: DateTime<Utc>,
}

fn parse_keyed_map<V: for<'de> Deserialize<'de>>(
    json: &str,
    what: &str,
) -> Result<HashMap<AssetId, V>, DatabaseError> {
    let by_string: HashMap<String, V> = serde_json::from_str(json)
        .map_err(|e| DatabaseError::CorruptState(format!("bad {} JSON: {}", what, e)))?;
    by_string
        .into_iter()
        .map(|(key, value)| {
            key.parse::<AssetId>()
                .map(|id| (id, value))
                .map_err(|e| DatabaseError::CorruptState(format!("bad {} key '{}': {}", what, key, e)))
        })
        .collect()
}

fn encode_keyed_map<V: Serialize>(map: &HashMap<AssetId, V>) -> String {
    let by_string: HashMap<String, &V> =
        map.iter().map(|(id, value)| (id.to_string(), value)).collect();
    // A String-keyed map of serializable values cannot fail to encode.
    serde_json::to_string(&by_string).unwrap_or_else(|_| "{}".to_string())
}

impl PortfolioRecord {
    pub fn from_portfolio(portfolio: &Portfolio) -> Self {
        PortfolioRecord {
            user_id: portfolio.user_id,
            cash: portfolio.cash,
            holdings: encode_keyed_map(&portfolio.holdings),
            position_info: encode_keyed_map(&portfolio.position_info),
            updated_at: portfolio.updated_at,
        }
    }

    pub fn into_portfolio(self) -> Result<Portfolio, DatabaseError> {
        // Stored cash must land inside the validator's balance bounds;
        // anything outside is a corrupt row, not a loadable portfolio.
        TradeValidator::balance(self.cash).map_err(|e| {
            DatabaseError::CorruptState(format!(
                "bad cash {} for user {}: {}",
                self.cash,
                self.user_id,
                String::from(e)
            ))
        })?;
        Ok(Portfolio {
            user_id: self.user_id,
            cash: self.cash,
            holdings: parse_keyed_map::<f64>(&self.holdings, "holdings")?,
            position_info: parse_keyed_map::<PositionInfo>(&self.position_info, "position_info")?,
            updated_at: self.updated_at,
        })
    }
}

/// Transaction row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: UserId,
    pub timestamp_ms: i64,
    pub asset_id: AssetId,
    pub symbol: String,
    pub kind: String,
    pub quantity: f64,
    pub price: f64,
    pub total_cost: f64,
}

/// Settlement row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SettlementRecord {
    pub id: i64,
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub symbol: String,
    pub quantity: f64,
    pub settlement_price: f64,
    pub settlement_value: f64,
    pub settled_at: DateTime<Utc>,
}
