//! Simulation orchestrator.
//!
//! Owns the price engine, the lifecycle manager and all in-memory
//! portfolios, and coordinates them with persistence. Locking is split
//! in two: the engine sits behind an `RwLock` written only by the tick
//! loop, and everything else shares one `Mutex` so trades and sweeps are
//! serialized per process. The two locks are never held at the same
//! time; callers fetch what they need from one, drop it, then take the
//! other.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::SimulationConfig;
use crate::domain::entities::asset::{Asset, AssetId};
use crate::domain::entities::portfolio::{Portfolio, UserId};
use crate::domain::entities::trade::{TradeKind, TradeRecord};
use crate::domain::errors::TradeError;
use crate::domain::services::ledger::{self, PerformanceSummary, ValuePoint};
use crate::domain::services::lifecycle::{CreateAssetParams, LifecycleManager};
use crate::domain::services::price_engine::{PriceEngine, PricePoint};
use crate::domain::services::validation::{QueryValidator, SymbolValidator, TradeValidator};
use crate::persistence::models::{SettlementRecord, TransactionRecord};
use crate::persistence::repository::{
    AssetRepository, PortfolioRepository, SettlementRepository, TransactionRepository,
};
use crate::persistence::{DatabaseError, DbPool};

/// Trade request as it arrives from the transport layer, untrusted.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub quantity: f64,
    #[serde(rename = "type")]
    pub trade_type: String,
}

/// Result of an accepted trade.
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    pub record: TradeRecord,
    pub cash_after: f64,
    pub holding_after: f64,
}

/// One entry of the public asset listing.
#[derive(Debug, Clone, Serialize)]
pub struct AssetView {
    pub price: f64,
    pub expires_at: DateTime<Utc>,
    pub time_to_expiry_seconds: i64,
    pub initial_price: f64,
    pub volatility: f64,
    pub color: String,
}

/// Per-position slice of a portfolio snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub quantity: f64,
    pub average_cost: f64,
    pub current_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
}

/// Portfolio snapshot keyed by symbol for display.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    pub cash: f64,
    pub positions: HashMap<String, PositionView>,
}

struct CoreState {
    lifecycle: LifecycleManager,
    portfolios: HashMap<UserId, Portfolio>,
}

pub struct SimulationService {
    config: SimulationConfig,
    engine: RwLock<PriceEngine>,
    state: Mutex<CoreState>,
    assets: AssetRepository,
    portfolios: PortfolioRepository,
    transactions: TransactionRepository,
    settlements: SettlementRepository,
}

impl SimulationService {
    /// Load persisted state, top the asset pool up to its minimum and
    /// return a ready service.
    pub async fn bootstrap(
        config: SimulationConfig,
        pool: DbPool,
    ) -> Result<Self, DatabaseError> {
        Self::bootstrap_inner(config, pool, None).await
    }

    /// Deterministic variant for tests.
    pub async fn bootstrap_with_seed(
        config: SimulationConfig,
        pool: DbPool,
        seed: u64,
    ) -> Result<Self, DatabaseError> {
        Self::bootstrap_inner(config, pool, Some(seed)).await
    }

    async fn bootstrap_inner(
        config: SimulationConfig,
        pool: DbPool,
        seed: Option<u64>,
    ) -> Result<Self, DatabaseError> {
        let assets = AssetRepository::new(pool.clone());
        let portfolios_repo = PortfolioRepository::new(pool.clone());
        let transactions = TransactionRepository::new(pool.clone());
        let settlements = SettlementRepository::new(pool);

        let mut lifecycle = match seed {
            Some(seed) => LifecycleManager::with_seed(config.lifecycle(), seed),
            None => LifecycleManager::new(config.lifecycle()),
        };
        let mut engine = match seed {
            Some(seed) => PriceEngine::with_seed(config.max_price_history, seed),
            None => PriceEngine::new(config.max_price_history),
        };

        let stored = assets.load_all().await?;
        info!(count = stored.len(), "restored assets from storage");
        lifecycle.restore(stored);

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        for asset in lifecycle.active_assets() {
            engine.add_asset(
                &asset.symbol,
                asset.current_price,
                asset.drift,
                asset.volatility,
                now_ms,
            );
        }

        let created = lifecycle
            .maintain_pool(now)
            .map_err(|e| DatabaseError::QueryError(format!("initial pool fill failed: {}", e)))?;
        for id in created {
            let asset = lifecycle.asset(id).cloned();
            if let Some(asset) = asset {
                assets.upsert(&asset).await?;
                engine.add_asset(
                    &asset.symbol,
                    asset.initial_price,
                    asset.drift,
                    asset.volatility,
                    now_ms,
                );
            }
        }

        let mut portfolio_map = HashMap::new();
        for portfolio in portfolios_repo.list_all().await? {
            portfolio_map.insert(portfolio.user_id, portfolio);
        }
        info!(count = portfolio_map.len(), "restored portfolios from storage");

        Ok(SimulationService {
            config,
            engine: RwLock::new(engine),
            state: Mutex::new(CoreState {
                lifecycle,
                portfolios: portfolio_map,
            }),
            assets,
            portfolios: portfolios_repo,
            transactions,
            settlements,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Advance every active asset's price one step.
    pub async fn tick_prices(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        self.engine.write().await.tick(now_ms).len()
    }

    /// Validate and execute one trade.
    ///
    /// The portfolio is snapshotted before mutation; a persistence
    /// failure restores the snapshot so memory never disagrees with
    /// storage about an accepted trade.
    pub async fn execute_trade(
        &self,
        user_id: UserId,
        request: &TradeRequest,
    ) -> Result<TradeOutcome, TradeError> {
        let symbol = SymbolValidator::validate(&request.symbol)?;
        let kind = TradeValidator::trade_type(&request.trade_type)?;
        let quantity = TradeValidator::quantity(request.quantity, false)?;
        let quantity_value = quantity.value();

        let price = self.engine.read().await.current_price(&symbol);
        let now_ms = Utc::now().timestamp_millis();

        let mut state = self.state.lock().await;

        let asset = state
            .lifecycle
            .asset_by_symbol(&symbol)
            .ok_or_else(|| TradeError::UnknownAsset(symbol.clone()))?;
        if !asset.is_active {
            return Err(TradeError::AssetInactive(symbol.clone()));
        }
        let asset_id = asset.id;
        let price = price.ok_or_else(|| TradeError::NoPriceAvailable(symbol.clone()))?;
        let price = TradeValidator::price(price)?;
        TradeValidator::trade_value(quantity, price)?;
        let price_value = price.value();

        let initial_cash = self.config.initial_cash;
        let portfolio = state
            .portfolios
            .entry(user_id)
            .or_insert_with(|| Portfolio::new(user_id, initial_cash));
        let snapshot = portfolio.clone();

        let record = match kind {
            TradeKind::Buy => {
                ledger::execute_buy(portfolio, asset_id, &symbol, quantity_value, price_value, now_ms)
            }
            TradeKind::Sell => {
                ledger::execute_sell(portfolio, asset_id, &symbol, quantity_value, price_value, now_ms)
            }
            TradeKind::Settlement => unreachable!("validator only passes buy/sell"),
        }?;

        // Sell proceeds could push cash past the balance ceiling; reject
        // the trade rather than store an unloadable portfolio.
        if let Err(e) = TradeValidator::balance(portfolio.cash) {
            state.portfolios.insert(user_id, snapshot);
            return Err(TradeError::Validation(e));
        }

        let persisted = async {
            self.portfolios.upsert(portfolio).await?;
            self.transactions.insert(&record).await
        }
        .await;

        if let Err(e) = persisted {
            error!(user_id, %symbol, "trade persistence failed, rolling back: {}", e);
            let restored = snapshot.clone();
            state.portfolios.insert(user_id, snapshot);
            // Best effort to push the rollback to storage too.
            if let Err(e2) = self.portfolios.upsert(&restored).await {
                error!(user_id, "rollback persistence also failed: {}", e2);
            }
            return Err(TradeError::Persistence(e.to_string()));
        }

        let portfolio = &state.portfolios[&user_id];
        info!(
            user_id,
            %symbol,
            kind = kind.as_str(),
            quantity = quantity_value,
            price = price_value,
            "trade executed"
        );
        Ok(TradeOutcome {
            cash_after: portfolio.cash,
            holding_after: portfolio.holding(asset_id),
            record,
        })
    }

    /// One expiration sweep: settle worthless assets, expire past-due
    /// ones, pay out positions and refill the pool.
    pub async fn process_expirations(&self) -> Result<(), DatabaseError> {
        let prices = self.engine.read().await.current_prices();
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let mut retired_symbols: Vec<String> = Vec::new();
        let mut listed: Vec<Asset> = Vec::new();

        {
            let mut state = self.state.lock().await;
            state.lifecycle.sync_prices(&prices);

            let mut expired = state.lifecycle.check_and_settle_worthless(now);
            expired.extend(state.lifecycle.check_and_expire(now));

            for id in &expired {
                let Some(asset) = state.lifecycle.asset(*id).cloned() else {
                    continue;
                };
                retired_symbols.push(asset.symbol.clone());
                // One broken asset must not stall the rest of the sweep.
                if let Err(e) = self.settle_asset(&mut state, &asset, now).await {
                    error!(symbol = %asset.symbol, "settlement failed: {}", e);
                }
            }

            match state.lifecycle.maintain_pool(now) {
                Ok(created) => {
                    for id in created {
                        if let Some(asset) = state.lifecycle.asset(id).cloned() {
                            self.assets.upsert(&asset).await?;
                            listed.push(asset);
                        }
                    }
                }
                Err(e) => error!("pool maintenance failed: {}", e),
            }
        }

        let mut engine = self.engine.write().await;
        for symbol in &retired_symbols {
            engine.remove_asset(symbol);
        }
        for asset in &listed {
            engine.add_asset(
                &asset.symbol,
                asset.initial_price,
                asset.drift,
                asset.volatility,
                now_ms,
            );
        }

        Ok(())
    }

    /// Persist one expired asset and pay out every portfolio holding it.
    async fn settle_asset(
        &self,
        state: &mut CoreState,
        asset: &Asset,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.assets.upsert(asset).await?;
        let final_price = asset.final_price.unwrap_or(asset.current_price);

        for portfolio in state.portfolios.values_mut() {
            let snapshot = portfolio.clone();
            let Some((settlement, record)) =
                ledger::settle_position(portfolio, asset.id, &asset.symbol, final_price, now)
            else {
                continue;
            };

            let persisted = async {
                self.portfolios.upsert(portfolio).await?;
                self.settlements.insert(&settlement).await?;
                self.transactions.insert(&record).await
            }
            .await;

            // A failure paying one holder must not starve the rest; the
            // asset is already inactive and this sweep will not rerun
            // for it.
            if let Err(e) = persisted {
                warn!(
                    user_id = snapshot.user_id,
                    symbol = %asset.symbol,
                    "settlement persistence failed, rolling back: {}",
                    e
                );
                *portfolio = snapshot;
                continue;
            }
            info!(
                user_id = settlement.user_id,
                symbol = %asset.symbol,
                value = settlement.settlement_value,
                "position settled"
            );
        }
        Ok(())
    }

    /// Drop long-settled assets from memory and storage.
    pub async fn cleanup_old_assets(&self) -> Result<usize, DatabaseError> {
        let now = Utc::now();
        let retention = Duration::hours(self.config.cleanup_retention_hours);
        let removed = {
            let mut state = self.state.lock().await;
            state.lifecycle.cleanup_old(now, retention)
        };
        if !removed.is_empty() {
            self.assets.delete_many(&removed).await?;
        }
        Ok(removed.len())
    }

    /// Force-create one asset with explicit parameters. Used by tests and
    /// operator tooling; regular listing happens through pool maintenance.
    pub async fn create_asset(&self, params: CreateAssetParams) -> Result<Asset, DatabaseError> {
        let now = Utc::now();
        let asset = {
            let mut state = self.state.lock().await;
            state
                .lifecycle
                .create_asset(params, now)
                .map_err(|e| DatabaseError::QueryError(e.to_string()))?
                .clone()
        };
        self.assets.upsert(&asset).await?;
        self.engine.write().await.add_asset(
            &asset.symbol,
            asset.initial_price,
            asset.drift,
            asset.volatility,
            now.timestamp_millis(),
        );
        Ok(asset)
    }

    /// Active-asset listing keyed by symbol.
    pub async fn list_assets(&self) -> HashMap<String, AssetView> {
        let prices = self.engine.read().await.current_prices();
        let now = Utc::now();
        let state = self.state.lock().await;
        state
            .lifecycle
            .active_assets()
            .map(|asset| {
                let price = prices.get(&asset.symbol).copied().unwrap_or(asset.current_price);
                (
                    asset.symbol.clone(),
                    AssetView {
                        price,
                        expires_at: asset.expires_at,
                        time_to_expiry_seconds: asset.time_to_expiry(now).num_seconds().max(0),
                        initial_price: asset.initial_price,
                        volatility: asset.volatility,
                        color: asset.color.clone(),
                    },
                )
            })
            .collect()
    }

    /// Price history per active symbol, optionally capped to the last
    /// `limit` points per series. Unset limits return the full retained
    /// series.
    pub async fn asset_histories(&self, limit: Option<i64>) -> HashMap<String, Vec<PricePoint>> {
        let cap = limit
            .map(|l| QueryValidator::limit(Some(l), self.config.max_price_history as i64) as usize);
        self.engine.read().await.all_histories(cap)
    }

    /// Symbol-keyed snapshot of one portfolio with per-position P&L.
    pub async fn portfolio_view(&self, user_id: UserId) -> PortfolioView {
        let (portfolio, symbols) = {
            let state = self.state.lock().await;
            let portfolio = state
                .portfolios
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| Portfolio::new(user_id, self.config.initial_cash));
            let symbols = Self::symbols_for(&state.lifecycle, portfolio.holdings.keys());
            (portfolio, symbols)
        };
        let prices = self.engine.read().await.current_prices();

        let mut positions = HashMap::new();
        for (asset_id, quantity) in &portfolio.holdings {
            let symbol = symbols
                .get(asset_id)
                .cloned()
                .unwrap_or_else(|| asset_id.to_string());
            let average_cost = portfolio
                .position_info
                .get(asset_id)
                .map(|info| info.average_cost())
                .unwrap_or(0.0);
            let current_price = prices.get(&symbol).copied();
            let unrealized_pnl = current_price.map(|p| (p - average_cost) * quantity);
            positions.insert(
                symbol,
                PositionView {
                    quantity: *quantity,
                    average_cost,
                    current_price,
                    unrealized_pnl,
                },
            );
        }

        PortfolioView {
            cash: portfolio.cash,
            positions,
        }
    }

    /// Valuation summary against current prices.
    pub async fn performance(&self, user_id: UserId) -> PerformanceSummary {
        let (portfolio, symbols) = {
            let state = self.state.lock().await;
            let portfolio = state
                .portfolios
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| Portfolio::new(user_id, self.config.initial_cash));
            let symbols = Self::symbols_for(&state.lifecycle, portfolio.holdings.keys());
            (portfolio, symbols)
        };
        let engine_prices = self.engine.read().await.current_prices();

        let prices: HashMap<AssetId, f64> = symbols
            .iter()
            .filter_map(|(id, symbol)| engine_prices.get(symbol).map(|p| (*id, *p)))
            .collect();
        ledger::value(&portfolio, &prices, self.config.initial_cash)
    }

    /// Reconstructed portfolio-value series from the transaction log.
    pub async fn performance_series(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ValuePoint>, DatabaseError> {
        let records = self.transactions.list_all(user_id).await?;
        let transactions: Vec<TradeRecord> = records
            .iter()
            .filter_map(|r| match TradeKind::parse(&r.kind) {
                Some(kind) => Some(TradeRecord {
                    user_id: r.user_id,
                    timestamp_ms: r.timestamp_ms,
                    asset_id: r.asset_id,
                    symbol: r.symbol.clone(),
                    kind,
                    quantity: r.quantity,
                    price: r.price,
                    total_cost: r.total_cost,
                }),
                None => {
                    warn!(kind = %r.kind, "skipping transaction with unknown kind");
                    None
                }
            })
            .collect();

        let (portfolio, id_by_symbol) = {
            let state = self.state.lock().await;
            let portfolio = state
                .portfolios
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| Portfolio::new(user_id, self.config.initial_cash));
            let ids: HashMap<String, AssetId> = state
                .lifecycle
                .all_assets()
                .map(|a| (a.symbol.clone(), a.id))
                .collect();
            (portfolio, ids)
        };

        let histories = self.engine.read().await.all_histories(None);
        let history_by_id: HashMap<AssetId, Vec<PricePoint>> = histories
            .into_iter()
            .filter_map(|(symbol, series)| id_by_symbol.get(&symbol).map(|id| (*id, series)))
            .collect();

        Ok(ledger::performance_history(&portfolio, &transactions, &history_by_id))
    }

    /// Recent transactions, newest first.
    pub async fn recent_transactions(
        &self,
        user_id: UserId,
        limit: Option<i64>,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        let limit = QueryValidator::limit(limit, 500);
        self.transactions.list_recent(user_id, limit).await
    }

    /// Recent settlements, newest first.
    pub async fn recent_settlements(
        &self,
        user_id: UserId,
        limit: Option<i64>,
    ) -> Result<Vec<SettlementRecord>, DatabaseError> {
        let limit = QueryValidator::limit(limit, 500);
        self.settlements.list_recent(user_id, limit).await
    }

    fn symbols_for<'a>(
        lifecycle: &LifecycleManager,
        ids: impl Iterator<Item = &'a AssetId>,
    ) -> HashMap<AssetId, String> {
        ids.filter_map(|id| lifecycle.asset(*id).map(|a| (*id, a.symbol.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            database_url: "sqlite::memory:".to_string(),
            min_active_assets: 4,
            ..Default::default()
        }
    }

    async fn service() -> SimulationService {
        let pool = init_database("sqlite::memory:").await.unwrap();
        SimulationService::bootstrap_with_seed(test_config(), pool, 99)
            .await
            .unwrap()
    }

    fn buy(symbol: &str, quantity: f64) -> TradeRequest {
        TradeRequest {
            symbol: symbol.to_string(),
            quantity,
            trade_type: "buy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_fills_pool() {
        let svc = service().await;
        let listing = svc.list_assets().await;
        assert_eq!(listing.len(), 4);
        for view in listing.values() {
            assert!(view.price > 0.0);
            assert!(view.time_to_expiry_seconds > 0);
        }
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let svc = service().await;
        let symbol = svc.list_assets().await.keys().next().unwrap().clone();

        let outcome = svc.execute_trade(1, &buy(&symbol, 2.0)).await.unwrap();
        assert_eq!(outcome.holding_after, 2.0);
        assert!(outcome.cash_after < 100_000.0);

        let sell = TradeRequest {
            symbol: symbol.clone(),
            quantity: 2.0,
            trade_type: "sell".to_string(),
        };
        let outcome = svc.execute_trade(1, &sell).await.unwrap();
        assert_eq!(outcome.holding_after, 0.0);

        // Round trip at an unmoved price restores the full balance.
        assert!((outcome.cash_after - 100_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_trade_rejections() {
        let svc = service().await;
        let symbol = svc.list_assets().await.keys().next().unwrap().clone();

        let err = svc.execute_trade(1, &buy("ZZZZZZZZ", 1.0)).await.unwrap_err();
        assert!(matches!(err, TradeError::UnknownAsset(_)));

        let err = svc.execute_trade(1, &buy(&symbol, -1.0)).await.unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));

        let sell_without_holdings = TradeRequest {
            symbol: symbol.clone(),
            quantity: 1.0,
            trade_type: "sell".to_string(),
        };
        let err = svc.execute_trade(1, &sell_without_holdings).await.unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_tick_moves_every_active_asset() {
        let svc = service().await;
        // Engine timestamps round to the second, so jump a fake second
        // ahead by waiting for a new wall-clock second boundary.
        let before = svc.asset_histories(None).await;
        let mut moved = 0;
        for _ in 0..3 {
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
            moved += svc.tick_prices().await;
        }
        assert!(moved >= 4, "expected at least one full tick, moved {moved}");
        let after = svc.asset_histories(None).await;
        for (symbol, series) in &after {
            assert!(series.len() > before[symbol].len());
        }

        // Capped reads keep only the newest points of each series.
        let capped = svc.asset_histories(Some(1)).await;
        for (symbol, series) in capped {
            assert_eq!(series.len(), 1);
            assert_eq!(series[0], *after[&symbol].last().unwrap());
        }
    }

    #[tokio::test]
    async fn test_expiration_settles_holdings_and_refills_pool() {
        let svc = service().await;
        let asset = svc
            .create_asset(CreateAssetParams {
                initial_price: Some(50.0),
                volatility: Some(0.0),
                drift: Some(0.0),
                minutes_to_expiry: Some(0.0005),
            })
            .await
            .unwrap();

        svc.execute_trade(1, &buy(&asset.symbol, 10.0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        svc.process_expirations().await.unwrap();

        // Position paid out at the final price of 50.
        let view = svc.portfolio_view(1).await;
        assert!(view.positions.is_empty());
        assert!((view.cash - 100_000.0).abs() < 1e-6);

        let settlements = svc.recent_settlements(1, None).await.unwrap();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].settlement_value, 500.0);

        // Retired symbol is gone from the listing, pool is back at its
        // minimum.
        let listing = svc.list_assets().await;
        assert!(!listing.contains_key(&asset.symbol));
        assert_eq!(listing.len(), 4);
    }

    #[tokio::test]
    async fn test_every_holder_is_paid_in_one_sweep() {
        let svc = service().await;
        let asset = svc
            .create_asset(CreateAssetParams {
                initial_price: Some(20.0),
                volatility: Some(0.0),
                drift: Some(0.0),
                minutes_to_expiry: Some(0.0005),
            })
            .await
            .unwrap();

        for user_id in 1..=3 {
            svc.execute_trade(user_id, &buy(&asset.symbol, 5.0)).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        svc.process_expirations().await.unwrap();

        for user_id in 1..=3 {
            let settlements = svc.recent_settlements(user_id, None).await.unwrap();
            assert_eq!(settlements.len(), 1, "user {user_id} was not settled");
            assert_eq!(settlements[0].settlement_value, 100.0);
            let view = svc.portfolio_view(user_id).await;
            assert!((view.cash - 100_000.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_repeat_sweep_adds_no_settlements() {
        let svc = service().await;
        let asset = svc
            .create_asset(CreateAssetParams {
                initial_price: Some(50.0),
                volatility: Some(0.0),
                drift: Some(0.0),
                minutes_to_expiry: Some(0.0005),
            })
            .await
            .unwrap();
        svc.execute_trade(1, &buy(&asset.symbol, 4.0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        svc.process_expirations().await.unwrap();
        let settlements = svc.recent_settlements(1, None).await.unwrap();
        assert_eq!(settlements.len(), 1);
        let cash = svc.portfolio_view(1).await.cash;

        // The asset is already settled, so another sweep pays nothing.
        svc.process_expirations().await.unwrap();
        let settlements = svc.recent_settlements(1, None).await.unwrap();
        assert_eq!(settlements.len(), 1);
        assert_eq!(svc.portfolio_view(1).await.cash, cash);
    }

    #[tokio::test]
    async fn test_out_of_bounds_stored_balance_fails_bootstrap() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = PortfolioRepository::new(pool.clone());
        let mut portfolio = Portfolio::new(1, 10_000.0);
        portfolio.cash = 5e11;
        repo.upsert(&portfolio).await.unwrap();

        let result = SimulationService::bootstrap_with_seed(test_config(), pool, 7).await;
        assert!(matches!(result, Err(DatabaseError::CorruptState(_))));
    }

    #[tokio::test]
    async fn test_sell_breaching_balance_ceiling_is_rejected() {
        use crate::domain::entities::portfolio::PositionInfo;

        let pool = init_database("sqlite::memory:").await.unwrap();
        let svc = SimulationService::bootstrap_with_seed(test_config(), pool.clone(), 21)
            .await
            .unwrap();
        let asset = svc
            .create_asset(CreateAssetParams {
                initial_price: Some(100.0),
                volatility: Some(0.0),
                drift: Some(0.0),
                minutes_to_expiry: Some(15.0),
            })
            .await
            .unwrap();

        // Stored portfolio sits exactly at the balance ceiling with a
        // position whose proceeds would push it over.
        let mut stored = Portfolio::new(9, 1e11);
        stored.holdings.insert(asset.id, 1000.0);
        stored.position_info.insert(
            asset.id,
            PositionInfo {
                total_cost: 100_000.0,
                total_quantity: 1000.0,
            },
        );
        PortfolioRepository::new(pool.clone()).upsert(&stored).await.unwrap();

        let svc = SimulationService::bootstrap_with_seed(test_config(), pool, 22)
            .await
            .unwrap();
        let sell = TradeRequest {
            symbol: asset.symbol.clone(),
            quantity: 1000.0,
            trade_type: "sell".to_string(),
        };
        let err = svc.execute_trade(9, &sell).await.unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));

        // The rejected sell leaves cash and holdings untouched.
        let view = svc.portfolio_view(9).await;
        assert_eq!(view.cash, 1e11);
        assert_eq!(view.positions[&asset.symbol].quantity, 1000.0);
    }

    #[tokio::test]
    async fn test_performance_summary_tracks_trades() {
        let svc = service().await;
        let symbol = svc.list_assets().await.keys().next().unwrap().clone();
        svc.execute_trade(1, &buy(&symbol, 3.0)).await.unwrap();

        let summary = svc.performance(1).await;
        // Bought at the current price, so value is unchanged.
        assert!((summary.portfolio_value - 100_000.0).abs() < 1e-6);
        assert!(summary.unrealized_pnl.abs() < 1e-6);
        assert!(summary.total_pnl.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_transactions_are_logged_newest_first() {
        let svc = service().await;
        let symbol = svc.list_assets().await.keys().next().unwrap().clone();
        svc.execute_trade(1, &buy(&symbol, 1.0)).await.unwrap();
        svc.execute_trade(1, &buy(&symbol, 2.0)).await.unwrap();

        let txs = svc.recent_transactions(1, Some(10)).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].quantity, 2.0);
        assert_eq!(txs[1].quantity, 1.0);
    }
}
