//! Portfolio ledger: cash, holdings and VWAP cost basis.
//!
//! All mutations here are pure in-memory transforms of a `Portfolio`.
//! Persistence and rollback happen one layer up, so a failed save can
//! restore the pre-trade snapshot without this module knowing.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::entities::asset::AssetId;
use crate::domain::entities::portfolio::{Portfolio, PositionInfo};
use crate::domain::entities::trade::{Settlement, TradeKind, TradeRecord};
use crate::domain::errors::ValidationError;
use crate::domain::services::price_engine::PricePoint;

/// Holdings at or below this quantity are treated as fully closed and
/// removed from the portfolio maps. Keeps float dust from accumulating
/// as phantom positions.
pub const MIN_POSITION_QUANTITY: f64 = 1e-8;

/// Valuation snapshot of one portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub portfolio_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
    pub total_return_pct: f64,
}

/// One point of a reconstructed portfolio-value series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValuePoint {
    pub time: i64,
    pub value: f64,
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Buy `quantity` of an asset at `price`, debiting cash and folding the
/// cost into the position's VWAP accumulator.
pub fn execute_buy(
    portfolio: &mut Portfolio,
    asset_id: AssetId,
    symbol: &str,
    quantity: f64,
    price: f64,
    now_ms: i64,
) -> Result<TradeRecord, ValidationError> {
    let cost = quantity * price;
    if cost > portfolio.cash {
        return Err(ValidationError::InsufficientFunds {
            available: portfolio.cash,
            required: cost,
        });
    }

    portfolio.cash -= cost;
    *portfolio.holdings.entry(asset_id).or_insert(0.0) += quantity;
    let info = portfolio.position_info.entry(asset_id).or_insert(PositionInfo {
        total_cost: 0.0,
        total_quantity: 0.0,
    });
    info.total_cost += cost;
    info.total_quantity += quantity;
    portfolio.updated_at = Utc::now();

    Ok(TradeRecord {
        user_id: portfolio.user_id,
        timestamp_ms: now_ms,
        asset_id,
        symbol: symbol.to_string(),
        kind: TradeKind::Buy,
        quantity,
        price,
        total_cost: cost,
    })
}

/// Sell `quantity` of an asset at `price`. Cost basis leaves the position
/// proportionally to the quantity sold, which is what keeps the average
/// cost of the remainder unchanged.
pub fn execute_sell(
    portfolio: &mut Portfolio,
    asset_id: AssetId,
    symbol: &str,
    quantity: f64,
    price: f64,
    now_ms: i64,
) -> Result<TradeRecord, ValidationError> {
    let held = portfolio.holding(asset_id);
    if quantity > held + MIN_POSITION_QUANTITY {
        return Err(ValidationError::InsufficientHoldings {
            held,
            required: quantity,
        });
    }
    let quantity = quantity.min(held);

    let proceeds = quantity * price;
    portfolio.cash += proceeds;

    let remaining = held - quantity;
    if let Some(info) = portfolio.position_info.get_mut(&asset_id) {
        if info.total_quantity > 0.0 {
            info.total_cost -= info.total_cost * quantity / info.total_quantity;
        }
        info.total_quantity = remaining;
    }

    if remaining <= MIN_POSITION_QUANTITY {
        portfolio.holdings.remove(&asset_id);
        portfolio.position_info.remove(&asset_id);
    } else {
        portfolio.holdings.insert(asset_id, remaining);
    }
    portfolio.updated_at = Utc::now();

    Ok(TradeRecord {
        user_id: portfolio.user_id,
        timestamp_ms: now_ms,
        asset_id,
        symbol: symbol.to_string(),
        kind: TradeKind::Sell,
        quantity,
        price,
        total_cost: proceeds,
    })
}

/// Force-close a position at the asset's final price. Returns `None` when
/// the portfolio holds nothing of the asset. The paired `TradeRecord`
/// keeps the transaction log complete enough to reconstruct cash flow.
pub fn settle_position(
    portfolio: &mut Portfolio,
    asset_id: AssetId,
    symbol: &str,
    final_price: f64,
    settled_at: DateTime<Utc>,
) -> Option<(Settlement, TradeRecord)> {
    let quantity = portfolio.holding(asset_id);
    if quantity <= MIN_POSITION_QUANTITY {
        portfolio.holdings.remove(&asset_id);
        portfolio.position_info.remove(&asset_id);
        return None;
    }

    let value = sanitize(quantity * final_price);
    portfolio.cash += value;
    portfolio.holdings.remove(&asset_id);
    portfolio.position_info.remove(&asset_id);
    portfolio.updated_at = Utc::now();

    let settlement = Settlement {
        user_id: portfolio.user_id,
        asset_id,
        symbol: symbol.to_string(),
        quantity,
        settlement_price: final_price,
        settlement_value: value,
        settled_at,
    };
    let record = TradeRecord {
        user_id: portfolio.user_id,
        timestamp_ms: settled_at.timestamp_millis(),
        asset_id,
        symbol: symbol.to_string(),
        kind: TradeKind::Settlement,
        quantity,
        price: final_price,
        total_cost: value,
    };
    Some((settlement, record))
}

/// Value the portfolio against current prices.
///
/// Holdings without a known price are skipped; their value already came
/// back as cash when they settled. Every intermediate is sanitized so a
/// NaN from bad stored state can never reach the caller.
pub fn value(
    portfolio: &Portfolio,
    prices: &HashMap<AssetId, f64>,
    initial_cash: f64,
) -> PerformanceSummary {
    let mut market_value = 0.0;
    let mut unrealized = 0.0;

    for (asset_id, quantity) in &portfolio.holdings {
        let Some(price) = prices.get(asset_id) else {
            continue;
        };
        let position_value = sanitize(quantity * price);
        market_value += position_value;
        if let Some(info) = portfolio.position_info.get(asset_id) {
            unrealized += sanitize(position_value - quantity * info.average_cost());
        }
    }

    let portfolio_value = sanitize(portfolio.cash + market_value);
    let unrealized_pnl = sanitize(unrealized);
    let total_pnl = sanitize(portfolio_value - initial_cash);
    let realized_pnl = sanitize(total_pnl - unrealized_pnl);
    let total_return_pct = if initial_cash > 0.0 {
        sanitize(total_pnl / initial_cash * 100.0)
    } else {
        0.0
    };

    PerformanceSummary {
        portfolio_value,
        realized_pnl,
        unrealized_pnl,
        total_pnl,
        total_return_pct,
    }
}

/// Reconstruct a portfolio-value time series from the transaction log and
/// per-asset price history.
///
/// Starting cash is back-computed by undoing every transaction's cash
/// delta from the current balance, so the series is self-consistent even
/// when the log predates this process. Valuation at each point uses the
/// last known price at or before that time and never interpolates
/// forward.
pub fn performance_history(
    portfolio: &Portfolio,
    transactions: &[TradeRecord],
    price_history: &HashMap<AssetId, Vec<PricePoint>>,
) -> Vec<ValuePoint> {
    let mut transactions: Vec<&TradeRecord> = transactions.iter().collect();
    transactions.sort_by_key(|t| t.timestamp_ms);

    let mut starting_cash = portfolio.cash;
    for tx in &transactions {
        match tx.kind {
            TradeKind::Buy => starting_cash += tx.total_cost,
            TradeKind::Sell | TradeKind::Settlement => starting_cash -= tx.total_cost,
        }
    }
    if !starting_cash.is_finite() {
        warn!("non-finite reconstructed starting cash, using current balance");
        starting_cash = portfolio.cash;
    }

    let mut times: BTreeSet<i64> = BTreeSet::new();
    for series in price_history.values() {
        times.extend(series.iter().map(|p| p.time));
    }
    times.extend(transactions.iter().map(|t| t.timestamp_ms));
    if times.is_empty() {
        return Vec::new();
    }

    let mut cash = starting_cash;
    let mut holdings: HashMap<AssetId, f64> = HashMap::new();
    let mut next_tx = 0;
    let mut points = Vec::with_capacity(times.len());

    for time in times {
        while next_tx < transactions.len() && transactions[next_tx].timestamp_ms <= time {
            let tx = transactions[next_tx];
            match tx.kind {
                TradeKind::Buy => {
                    cash -= tx.total_cost;
                    *holdings.entry(tx.asset_id).or_insert(0.0) += tx.quantity;
                }
                TradeKind::Sell | TradeKind::Settlement => {
                    cash += tx.total_cost;
                    let entry = holdings.entry(tx.asset_id).or_insert(0.0);
                    *entry -= tx.quantity;
                    if *entry <= MIN_POSITION_QUANTITY {
                        holdings.remove(&tx.asset_id);
                    }
                }
            }
            next_tx += 1;
        }

        let mut market_value = 0.0;
        for (asset_id, quantity) in &holdings {
            let Some(series) = price_history.get(asset_id) else {
                continue;
            };
            let price_at = series
                .iter()
                .take_while(|p| p.time <= time)
                .last()
                .map(|p| p.price);
            if let Some(price) = price_at {
                market_value += sanitize(quantity * price);
            }
        }
        points.push(ValuePoint {
            time,
            value: sanitize(cash + market_value),
        });
    }

    points
}
