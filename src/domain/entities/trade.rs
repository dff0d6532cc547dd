use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::asset::AssetId;
use crate::domain::entities::portfolio::UserId;

/// Kind of ledger movement recorded for a portfolio.
///
/// `Settlement` entries are written by the expiration sweep, not by user
/// trades, but they flow through the same transaction log so that
/// starting cash can be reconstructed from the log alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Buy,
    Sell,
    Settlement,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "buy",
            TradeKind::Sell => "sell",
            TradeKind::Settlement => "settlement",
        }
    }

    pub fn parse(s: &str) -> Option<TradeKind> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Some(TradeKind::Buy),
            "sell" => Some(TradeKind::Sell),
            "settlement" => Some(TradeKind::Settlement),
            _ => None,
        }
    }
}

/// One executed trade or settlement as it appears in the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub user_id: UserId,
    /// Unix milliseconds at execution time.
    pub timestamp_ms: i64,
    pub asset_id: AssetId,
    pub symbol: String,
    pub kind: TradeKind,
    pub quantity: f64,
    pub price: f64,
    pub total_cost: f64,
}

/// Record of a forced position close at asset expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub symbol: String,
    pub quantity: f64,
    pub settlement_price: f64,
    pub settlement_value: f64,
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_kind_parse() {
        assert_eq!(TradeKind::parse("buy"), Some(TradeKind::Buy));
        assert_eq!(TradeKind::parse(" SELL "), Some(TradeKind::Sell));
        assert_eq!(TradeKind::parse("Settlement"), Some(TradeKind::Settlement));
        assert_eq!(TradeKind::parse("short"), None);
        assert_eq!(TradeKind::parse(""), None);
    }

    #[test]
    fn test_trade_kind_serde_lowercase() {
        let json = serde_json::to_string(&TradeKind::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
        let kind: TradeKind = serde_json::from_str("\"settlement\"").unwrap();
        assert_eq!(kind, TradeKind::Settlement);
    }

    #[test]
    fn test_trade_record_round_trip() {
        let record = TradeRecord {
            user_id: 1,
            timestamp_ms: 1_700_000_000_000,
            asset_id: 9,
            symbol: "XYZ".to_string(),
            kind: TradeKind::Sell,
            quantity: 2.5,
            price: 101.25,
            total_cost: 253.125,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: TradeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
