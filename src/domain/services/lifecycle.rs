//! Asset lifecycle: creation with sampled parameters, expiry detection,
//! worthlessness detection and minimum-pool maintenance.
//!
//! The manager is the in-memory source of truth for asset records. The
//! application layer persists changes after each sweep and reloads the
//! manager at boot via `restore`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::domain::entities::asset::{Asset, AssetId};
use crate::domain::errors::LifecycleError;
use crate::domain::services::priors::{self, PriorConfig};

const COLOR_PALETTE: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4",
    "#46f0f0", "#f032e6", "#bcf60c", "#fabebe", "#008080", "#e6beff",
];

/// Tunables for asset creation and sweeps.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub min_active_assets: usize,
    pub worthless_threshold: f64,
    pub symbol_length: usize,
    pub symbol_max_retries: u32,
    pub expiry_minutes_mean: f64,
    pub expiry_minutes_sd: f64,
    pub expiry_minutes_min: f64,
    pub expiry_minutes_max: f64,
    pub priors: PriorConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            min_active_assets: 16,
            worthless_threshold: 0.01,
            symbol_length: 3,
            symbol_max_retries: 100,
            expiry_minutes_mean: 10.0,
            expiry_minutes_sd: 2.0,
            expiry_minutes_min: 5.0,
            expiry_minutes_max: 15.0,
            priors: PriorConfig::default(),
        }
    }
}

/// Optional overrides for one asset creation; anything left `None` is
/// drawn from the priors.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateAssetParams {
    pub initial_price: Option<f64>,
    pub volatility: Option<f64>,
    pub drift: Option<f64>,
    pub minutes_to_expiry: Option<f64>,
}

pub struct LifecycleManager {
    config: LifecycleConfig,
    assets: HashMap<AssetId, Asset>,
    next_id: AssetId,
    rng: StdRng,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        LifecycleManager {
            config,
            assets: HashMap::new(),
            next_id: 1,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(config: LifecycleConfig, seed: u64) -> Self {
        LifecycleManager {
            config,
            assets: HashMap::new(),
            next_id: 1,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Load previously persisted assets. Id allocation resumes above the
    /// highest loaded id.
    pub fn restore(&mut self, assets: Vec<Asset>) {
        for asset in assets {
            self.next_id = self.next_id.max(asset.id + 1);
            self.assets.insert(asset.id, asset);
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn asset(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(&id)
    }

    pub fn asset_by_symbol(&self, symbol: &str) -> Option<&Asset> {
        self.assets.values().find(|a| a.symbol == symbol)
    }

    pub fn all_assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn active_assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values().filter(|a| a.is_active)
    }

    pub fn active_count(&self) -> usize {
        self.assets.values().filter(|a| a.is_active).count()
    }

    fn random_symbol(&mut self) -> Result<String, LifecycleError> {
        for _ in 0..self.config.symbol_max_retries {
            let candidate: String = (0..self.config.symbol_length)
                .map(|_| char::from(b'A' + self.rng.gen_range(0..26)))
                .collect();
            if !self.assets.values().any(|a| a.symbol == candidate) {
                return Ok(candidate);
            }
        }
        Err(LifecycleError::SymbolExhaustion {
            attempts: self.config.symbol_max_retries,
        })
    }

    /// Create one asset, sampling any parameter the caller did not pin.
    pub fn create_asset(
        &mut self,
        params: CreateAssetParams,
        now: DateTime<Utc>,
    ) -> Result<&Asset, LifecycleError> {
        let symbol = self.random_symbol()?;
        let initial_price = params
            .initial_price
            .unwrap_or_else(|| priors::sample_initial_price(&mut self.rng, &self.config.priors));
        let sampled = priors::sample_asset_params(
            &mut self.rng,
            &self.config.priors,
            params.drift,
            params.volatility,
        );
        let minutes = params.minutes_to_expiry.unwrap_or_else(|| {
            priors::sample_expiry_minutes(
                &mut self.rng,
                self.config.expiry_minutes_mean,
                self.config.expiry_minutes_sd,
                self.config.expiry_minutes_min,
                self.config.expiry_minutes_max,
            )
        });
        let color = COLOR_PALETTE[self.rng.gen_range(0..COLOR_PALETTE.len())].to_string();

        let id = self.next_id;
        self.next_id += 1;
        let asset = Asset {
            id,
            symbol,
            color,
            initial_price,
            current_price: initial_price,
            volatility: sampled.volatility,
            drift: sampled.drift,
            created_at: now,
            expires_at: now + Duration::milliseconds((minutes * 60_000.0) as i64),
            is_active: true,
            final_price: None,
            settled_at: None,
        };
        info!(
            symbol = %asset.symbol,
            price = asset.initial_price,
            volatility = asset.volatility,
            drift = asset.drift,
            expires_at = %asset.expires_at,
            "listed new asset"
        );
        Ok(self.assets.entry(id).or_insert(asset))
    }

    /// Copy the engine's latest prices onto active asset records. Symbols
    /// the engine no longer tracks are left as-is.
    pub fn sync_prices(&mut self, prices: &HashMap<String, f64>) {
        for asset in self.assets.values_mut().filter(|a| a.is_active) {
            if let Some(price) = prices.get(&asset.symbol) {
                asset.current_price = *price;
            }
        }
    }

    /// Mark active assets past their expiry as expired at their current
    /// price. Already-inactive assets are untouched.
    pub fn check_and_expire(&mut self, now: DateTime<Utc>) -> Vec<AssetId> {
        let mut expired = Vec::new();
        for asset in self.assets.values_mut() {
            if asset.is_active && asset.is_expired(now) {
                let final_price = asset.current_price;
                if asset.expire(final_price, now) {
                    info!(symbol = %asset.symbol, final_price, "asset expired");
                    expired.push(asset.id);
                }
            }
        }
        expired
    }

    /// Expire active assets whose price has collapsed below the
    /// worthlessness threshold, using that sub-threshold price as the
    /// final price.
    pub fn check_and_settle_worthless(&mut self, now: DateTime<Utc>) -> Vec<AssetId> {
        let threshold = self.config.worthless_threshold;
        let mut expired = Vec::new();
        for asset in self.assets.values_mut() {
            if asset.is_active && asset.is_worthless(threshold) {
                let final_price = asset.current_price;
                if asset.expire(final_price, now) {
                    info!(symbol = %asset.symbol, final_price, "asset settled as worthless");
                    expired.push(asset.id);
                }
            }
        }
        expired
    }

    /// Top the pool back up to the configured minimum of active assets.
    pub fn maintain_pool(&mut self, now: DateTime<Utc>) -> Result<Vec<AssetId>, LifecycleError> {
        let mut created = Vec::new();
        while self.active_count() < self.config.min_active_assets {
            let asset = self.create_asset(CreateAssetParams::default(), now)?;
            created.push(asset.id);
        }
        Ok(created)
    }

    /// Drop settled assets older than `retention`. Returns removed ids so
    /// the caller can purge their price series and storage rows.
    pub fn cleanup_old(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<AssetId> {
        let cutoff = now - retention;
        let stale: Vec<AssetId> = self
            .assets
            .values()
            .filter(|a| !a.is_active && a.settled_at.map(|t| t < cutoff).unwrap_or(false))
            .map(|a| a.id)
            .collect();
        for id in &stale {
            self.assets.remove(id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "pruned settled assets");
        }
        stale
    }
}
