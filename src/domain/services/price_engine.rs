//! Geometric Brownian motion price simulation.
//!
//! Every active asset advances one GBM step per tick:
//!
//!   log_return = (mu - sigma^2 / 2) * dt + sigma * sqrt(dt) * z
//!
//! with dt fixed at one time unit per tick and z standard normal. With
//! mu = 0 the price process is a martingale, which is what makes the
//! simulated market fair to trade against.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prices never reach zero exactly; a zero price would make every later
/// multiplicative step a no-op. This floor sits far below the 0.01
/// worthlessness threshold, so flooring never masks a settlement.
pub const PRICE_FLOOR: f64 = 1e-9;

const DT: f64 = 1.0;

/// One point of a price series. `time` is unix milliseconds rounded down
/// to the second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub time: i64,
    pub price: f64,
}

#[derive(Debug, Clone)]
struct TrackedAsset {
    price: f64,
    drift: f64,
    volatility: f64,
    last_update: i64,
    history: Vec<PricePoint>,
}

/// In-memory GBM engine over a set of symbols.
///
/// The engine is deliberately ignorant of asset lifecycle: symbols are
/// added and removed by the lifecycle manager, and expired symbols simply
/// stop being tracked.
pub struct PriceEngine {
    assets: HashMap<String, TrackedAsset>,
    max_history: usize,
    rng: StdRng,
}

impl PriceEngine {
    pub fn new(max_history: usize) -> Self {
        PriceEngine {
            assets: HashMap::new(),
            max_history,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(max_history: usize, seed: u64) -> Self {
        PriceEngine {
            assets: HashMap::new(),
            max_history,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Start tracking a symbol at the given price. Replaces any existing
    /// series under the same symbol.
    pub fn add_asset(&mut self, symbol: &str, price: f64, drift: f64, volatility: f64, now_ms: i64) {
        let time = round_to_second(now_ms);
        self.assets.insert(
            symbol.to_string(),
            TrackedAsset {
                price,
                drift,
                volatility,
                last_update: time,
                history: vec![PricePoint { time, price }],
            },
        );
    }

    pub fn remove_asset(&mut self, symbol: &str) {
        self.assets.remove(symbol);
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.assets.contains_key(symbol)
    }

    /// Advance every tracked symbol one step.
    ///
    /// Timestamps are rounded to the second and at most one step is taken
    /// per symbol per second, so a tick replayed with the same timestamp
    /// is a no-op. Returns the symbols that actually moved.
    pub fn tick(&mut self, now_ms: i64) -> Vec<String> {
        let time = round_to_second(now_ms);
        let mut moved = Vec::new();

        for (symbol, asset) in self.assets.iter_mut() {
            if asset.last_update == time {
                continue;
            }
            if asset.history.last().map(|p| p.time) == Some(time) {
                continue;
            }

            let z: f64 = StandardNormal.sample(&mut self.rng);
            let log_return = (asset.drift - asset.volatility * asset.volatility / 2.0) * DT
                + asset.volatility * DT.sqrt() * z;
            let next = asset.price * log_return.exp();
            if next.is_finite() {
                asset.price = next.max(PRICE_FLOOR);
            } else {
                warn!(symbol = %symbol, "non-finite price step, holding price");
            }
            asset.last_update = time;
            asset.history.push(PricePoint {
                time,
                price: asset.price,
            });
            if asset.history.len() > self.max_history {
                let excess = asset.history.len() - self.max_history;
                asset.history.drain(..excess);
            }
            moved.push(symbol.clone());
        }

        moved
    }

    pub fn current_price(&self, symbol: &str) -> Option<f64> {
        self.assets.get(symbol).map(|a| a.price)
    }

    pub fn current_prices(&self) -> HashMap<String, f64> {
        self.assets
            .iter()
            .map(|(symbol, asset)| (symbol.clone(), asset.price))
            .collect()
    }

    /// Recorded series for one symbol, optionally capped to the last
    /// `limit` points.
    pub fn price_history(&self, symbol: &str, limit: Option<usize>) -> Option<&[PricePoint]> {
        self.assets.get(symbol).map(|a| tail(&a.history, limit))
    }

    pub fn all_histories(&self, limit: Option<usize>) -> HashMap<String, Vec<PricePoint>> {
        self.assets
            .iter()
            .map(|(symbol, asset)| (symbol.clone(), tail(&asset.history, limit).to_vec()))
            .collect()
    }

    /// Overwrite a symbol's parameters, keeping its series. Used when an
    /// asset record is reloaded from storage.
    pub fn set_params(&mut self, symbol: &str, drift: f64, volatility: f64) {
        if let Some(asset) = self.assets.get_mut(symbol) {
            asset.drift = drift;
            asset.volatility = volatility;
        }
    }
}

fn round_to_second(now_ms: i64) -> i64 {
    (now_ms / 1000) * 1000
}

fn tail(history: &[PricePoint], limit: Option<usize>) -> &[PricePoint] {
    match limit {
        Some(k) => &history[history.len().saturating_sub(k)..],
        None => history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(symbols: &[&str], price: f64, drift: f64, vol: f64, seed: u64) -> PriceEngine {
        let mut engine = PriceEngine::with_seed(100, seed);
        for symbol in symbols {
            engine.add_asset(symbol, price, drift, vol, 0);
        }
        engine
    }

    #[test]
    fn test_add_and_remove() {
        let mut engine = engine_with(&["ABC"], 100.0, 0.0, 0.05, 1);
        assert!(engine.contains("ABC"));
        assert_eq!(engine.current_price("ABC"), Some(100.0));
        engine.remove_asset("ABC");
        assert!(!engine.contains("ABC"));
        assert_eq!(engine.current_price("ABC"), None);
    }

    #[test]
    fn test_tick_moves_price_and_appends_history() {
        let mut engine = engine_with(&["ABC"], 100.0, 0.0, 0.05, 2);
        let moved = engine.tick(1000);
        assert_eq!(moved, vec!["ABC".to_string()]);
        let history = engine.price_history("ABC", None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].time, 1000);
        assert!(history[1].price > 0.0);
    }

    #[test]
    fn test_tick_same_second_is_noop() {
        let mut engine = engine_with(&["ABC"], 100.0, 0.0, 0.05, 3);
        engine.tick(5000);
        let price = engine.current_price("ABC").unwrap();
        // Same second, sub-second jitter in the caller's clock.
        assert!(engine.tick(5000).is_empty());
        assert!(engine.tick(5999).is_empty());
        assert_eq!(engine.current_price("ABC"), Some(price));
        assert_eq!(engine.price_history("ABC", None).unwrap().len(), 2);
    }

    #[test]
    fn test_history_is_capped() {
        let mut engine = PriceEngine::with_seed(10, 4);
        engine.add_asset("ABC", 100.0, 0.0, 0.05, 0);
        for i in 1..50 {
            engine.tick(i * 1000);
        }
        let history = engine.price_history("ABC", None).unwrap();
        assert_eq!(history.len(), 10);
        // Oldest points dropped, newest kept.
        assert_eq!(history.last().unwrap().time, 49_000);
    }

    #[test]
    fn test_history_reads_honor_limit() {
        let mut engine = engine_with(&["ABC", "DEF"], 100.0, 0.0, 0.05, 6);
        for i in 1..=8 {
            engine.tick(i * 1000);
        }
        // Nine points recorded per symbol (listing plus eight ticks).
        let full = engine.price_history("ABC", None).unwrap();
        assert_eq!(full.len(), 9);

        let capped = engine.price_history("ABC", Some(3)).unwrap();
        assert_eq!(capped.len(), 3);
        assert_eq!(capped, &full[6..]);
        assert_eq!(capped.last().unwrap().time, 8000);

        // A limit larger than the series returns everything.
        assert_eq!(engine.price_history("ABC", Some(50)).unwrap().len(), 9);

        let all = engine.all_histories(Some(2));
        assert_eq!(all.len(), 2);
        for series in all.values() {
            assert_eq!(series.len(), 2);
            assert_eq!(series.last().unwrap().time, 8000);
        }
    }

    #[test]
    fn test_price_never_reaches_zero() {
        let mut engine = engine_with(&["ABC"], 1e-8, 0.0, 1.0, 5);
        for i in 1..500 {
            engine.tick(i * 1000);
        }
        assert!(engine.current_price("ABC").unwrap() >= PRICE_FLOOR);
    }

    #[test]
    fn test_seeded_engine_is_deterministic() {
        let mut a = engine_with(&["ABC"], 100.0, 0.0, 0.05, 42);
        let mut b = engine_with(&["ABC"], 100.0, 0.0, 0.05, 42);
        for i in 1..20 {
            a.tick(i * 1000);
            b.tick(i * 1000);
        }
        assert_eq!(a.current_price("ABC"), b.current_price("ABC"));
    }

    // With zero drift the expected price is constant: E[S_T] = S_0.
    // 10,000 paths of 100 steps at sigma = 0.05 puts the standard error of
    // the sample mean around 0.5%, so a 2% band is a solid test.
    #[test]
    fn test_zero_drift_is_a_martingale() {
        let paths = 10_000;
        let symbols: Vec<String> = (0..paths).map(|i| format!("A{i}")).collect();
        let refs: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        let mut engine = PriceEngine::with_seed(2, 7);
        for symbol in &refs {
            engine.add_asset(symbol, 100.0, 0.0, 0.05, 0);
        }
        for i in 1..=100 {
            engine.tick(i * 1000);
        }
        let sum: f64 = engine.current_prices().values().sum();
        let mean = sum / paths as f64;
        let rel_err = (mean - 100.0).abs() / 100.0;
        assert!(rel_err < 0.02, "mean {} rel err {}", mean, rel_err);
    }

    // Positive drift compounds: E[S_T] = S_0 * exp(mu * T).
    #[test]
    fn test_positive_drift_compounds() {
        let paths = 10_000;
        let symbols: Vec<String> = (0..paths).map(|i| format!("A{i}")).collect();
        let mut engine = PriceEngine::with_seed(2, 8);
        for symbol in &symbols {
            engine.add_asset(symbol, 100.0, 0.001, 0.05, 0);
        }
        for i in 1..=100 {
            engine.tick(i * 1000);
        }
        let sum: f64 = engine.current_prices().values().sum();
        let mean = sum / paths as f64;
        let expected = 100.0 * (0.001f64 * 100.0).exp();
        let rel_err = (mean - expected).abs() / expected;
        assert!(rel_err < 0.03, "mean {} expected {}", mean, expected);
    }
}
