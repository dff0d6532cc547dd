//! Data access layer for assets, portfolios, transactions and
//! settlements.

use tracing::{debug, error};

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::asset::{Asset, AssetId};
use crate::domain::entities::portfolio::{Portfolio, UserId};
use crate::domain::entities::trade::{Settlement, TradeRecord};

pub struct AssetRepository {
    pool: DbPool,
}

impl AssetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or fully replace one asset row.
    pub async fn upsert(&self, asset: &Asset) -> Result<(), DatabaseError> {
        let record = AssetRecord::from(asset);
        sqlx::query(
            r#"
            INSERT INTO assets (
                id, symbol, color, initial_price, current_price,
                volatility, drift, created_at, expires_at,
                is_active, final_price, settled_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                current_price = excluded.current_price,
                is_active = excluded.is_active,
                final_price = excluded.final_price,
                settled_at = excluded.settled_at
            "#,
        )
        .bind(record.id)
        .bind(&record.symbol)
        .bind(&record.color)
        .bind(record.initial_price)
        .bind(record.current_price)
        .bind(record.volatility)
        .bind(record.drift)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.is_active)
        .bind(record.final_price)
        .bind(record.settled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to upsert asset {}: {}", asset.symbol, e);
            DatabaseError::QueryError(format!("Failed to upsert asset: {}", e))
        })?;
        Ok(())
    }

    pub async fn load_all(&self) -> Result<Vec<Asset>, DatabaseError> {
        let records = sqlx::query_as::<_, AssetRecord>("SELECT * FROM assets ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to load assets: {}", e)))?;
        Ok(records.into_iter().map(Asset::from).collect())
    }

    pub async fn delete_many(&self, ids: &[AssetId]) -> Result<(), DatabaseError> {
        for id in ids {
            sqlx::query("DELETE FROM assets WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    DatabaseError::QueryError(format!("Failed to delete asset {}: {}", id, e))
                })?;
        }
        Ok(())
    }
}

pub struct PortfolioRepository {
    pool: DbPool,
}

impl PortfolioRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, portfolio: &Portfolio) -> Result<(), DatabaseError> {
        let record = PortfolioRecord::from_portfolio(portfolio);
        sqlx::query(
            r#"
            INSERT INTO portfolios (user_id, cash, holdings, position_info, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                cash = excluded.cash,
                holdings = excluded.holdings,
                position_info = excluded.position_info,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.user_id)
        .bind(record.cash)
        .bind(&record.holdings)
        .bind(&record.position_info)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save portfolio {}: {}", portfolio.user_id, e);
            DatabaseError::QueryError(format!("Failed to save portfolio: {}", e))
        })?;
        debug!("Saved portfolio for user {}", portfolio.user_id);
        Ok(())
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<Portfolio>, DatabaseError> {
        let record = sqlx::query_as::<_, PortfolioRecord>(
            "SELECT * FROM portfolios WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to get portfolio: {}", e)))?;
        record.map(PortfolioRecord::into_portfolio).transpose()
    }

    pub async fn list_all(&self) -> Result<Vec<Portfolio>, DatabaseError> {
        let records =
            sqlx::query_as::<_, PortfolioRecord>("SELECT * FROM portfolios ORDER BY user_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    DatabaseError::QueryError(format!("Failed to list portfolios: {}", e))
                })?;
        records.into_iter().map(PortfolioRecord::into_portfolio).collect()
    }
}

pub struct TransactionRepository {
    pool: DbPool,
}

impl TransactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, trade: &TradeRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                user_id, timestamp_ms, asset_id, symbol, kind,
                quantity, price, total_cost
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(trade.user_id)
        .bind(trade.timestamp_ms)
        .bind(trade.asset_id)
        .bind(&trade.symbol)
        .bind(trade.kind.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.total_cost)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record transaction: {}", e);
            DatabaseError::QueryError(format!("Failed to record transaction: {}", e))
        })?;
        Ok(())
    }

    /// Newest first, capped at `limit`.
    pub async fn list_recent(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT * FROM transactions
            WHERE user_id = ?1
            ORDER BY timestamp_ms DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to list transactions: {}", e)))
    }

    /// Full history in chronological order, for value-series replay.
    pub async fn list_all(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT * FROM transactions
            WHERE user_id = ?1
            ORDER BY timestamp_ms ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to list transactions: {}", e)))
    }
}

pub struct SettlementRepository {
    pool: DbPool,
}

impl SettlementRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, settlement: &Settlement) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO settlements (
                user_id, asset_id, symbol, quantity,
                settlement_price, settlement_value, settled_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(settlement.user_id)
        .bind(settlement.asset_id)
        .bind(&settlement.symbol)
        .bind(settlement.quantity)
        .bind(settlement.settlement_price)
        .bind(settlement.settlement_value)
        .bind(settlement.settled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record settlement: {}", e);
            DatabaseError::QueryError(format!("Failed to record settlement: {}", e))
        })?;
        Ok(())
    }

    pub async fn list_recent(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<SettlementRecord>, DatabaseError> {
        sqlx::query_as::<_, SettlementRecord>(
            r#"
            SELECT * FROM settlements
            WHERE user_id = ?1
            ORDER BY settled_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to list settlements: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::trade::TradeKind;
    use crate::persistence::init_database;
    use chrono::Utc;

    fn sample_asset(id: AssetId, symbol: &str) -> Asset {
        let now = Utc::now();
        Asset {
            id,
            symbol: symbol.to_string(),
            color: "#3cb44b".to_string(),
            initial_price: 100.0,
            current_price: 100.0,
            volatility: 0.05,
            drift: 0.0,
            created_at: now,
            expires_at: now + chrono::Duration::minutes(10),
            is_active: true,
            final_price: None,
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn test_asset_upsert_and_reload() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = AssetRepository::new(pool);

        let mut asset = sample_asset(1, "ABC");
        repo.upsert(&asset).await.unwrap();

        asset.current_price = 123.45;
        asset.expire(123.45, Utc::now());
        repo.upsert(&asset).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].current_price, 123.45);
        assert!(!loaded[0].is_active);
        assert_eq!(loaded[0].final_price, Some(123.45));
        assert!(loaded[0].lifecycle_fields_consistent());
    }

    #[tokio::test]
    async fn test_asset_delete_many() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = AssetRepository::new(pool);
        repo.upsert(&sample_asset(1, "ABC")).await.unwrap();
        repo.upsert(&sample_asset(2, "DEF")).await.unwrap();
        repo.delete_many(&[1]).await.unwrap();
        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "DEF");
    }

    #[tokio::test]
    async fn test_portfolio_round_trip() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = PortfolioRepository::new(pool);

        assert!(repo.get(1).await.unwrap().is_none());

        let mut portfolio = Portfolio::new(1, 100_000.0);
        portfolio.holdings.insert(5, 3.0);
        portfolio.position_info.insert(
            5,
            crate::domain::entities::portfolio::PositionInfo {
                total_cost: 300.0,
                total_quantity: 3.0,
            },
        );
        repo.upsert(&portfolio).await.unwrap();

        let loaded = repo.get(1).await.unwrap().unwrap();
        assert_eq!(loaded.cash, 100_000.0);
        assert_eq!(loaded.holding(5), 3.0);
        assert!(loaded.validate_consistency().is_ok());
    }

    #[tokio::test]
    async fn test_transactions_newest_first_and_capped() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = TransactionRepository::new(pool);

        for i in 0..5 {
            repo.insert(&TradeRecord {
                user_id: 1,
                timestamp_ms: 1000 * (i + 1),
                asset_id: 1,
                symbol: "ABC".to_string(),
                kind: TradeKind::Buy,
                quantity: 1.0,
                price: 100.0,
                total_cost: 100.0,
            })
            .await
            .unwrap();
        }

        let recent = repo.list_recent(1, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp_ms, 5000);
        assert_eq!(recent[2].timestamp_ms, 3000);

        let all = repo.list_all(1).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].timestamp_ms, 1000);

        // Other users see nothing.
        assert!(repo.list_recent(2, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settlement_insert_and_list() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = SettlementRepository::new(pool);

        repo.insert(&Settlement {
            user_id: 1,
            asset_id: 4,
            symbol: "XYZ".to_string(),
            quantity: 2.0,
            settlement_price: 55.0,
            settlement_value: 110.0,
            settled_at: Utc::now(),
        })
        .await
        .unwrap();

        let listed = repo.list_recent(1, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].settlement_value, 110.0);
    }
}
