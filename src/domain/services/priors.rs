//! Prior distributions for newly listed assets.
//!
//! New assets draw their initial price, drift and volatility from
//! configurable priors so that the pool stays varied without any manual
//! curation. The (drift, log-volatility) pair is jointly normal; when a
//! caller pins one of the two, the other is drawn from the conditional
//! distribution so the joint prior is still respected.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

const VOLATILITY_MIN: f64 = 0.0;
const VOLATILITY_MAX: f64 = 1.0;

/// Parameters of the creation-time priors. Defaults give a lognormal
/// price with mean 100 and a gently negative drift around 5% per-tick
/// volatility.
#[derive(Debug, Clone, Copy)]
pub struct PriorConfig {
    /// Mean of the initial-price lognormal.
    pub price_mean: f64,
    /// Log-space sigma of the initial-price lognormal.
    pub price_log_sigma: f64,
    pub drift_mean: f64,
    pub drift_sd: f64,
    pub log_vol_mean: f64,
    pub log_vol_sd: f64,
    /// Covariance between drift and log-volatility.
    pub drift_log_vol_cov: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        PriorConfig {
            price_mean: 100.0,
            price_log_sigma: 1.0,
            drift_mean: -0.001,
            drift_sd: 0.001,
            log_vol_mean: 0.05f64.ln(),
            log_vol_sd: 0.5,
            drift_log_vol_cov: 0.0,
        }
    }
}

/// Drift and volatility drawn (or pinned) for one asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetParams {
    pub drift: f64,
    pub volatility: f64,
}

fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    StandardNormal.sample(rng)
}

/// Initial price prior: lognormal with the log-mean shifted down by
/// sigma^2/2, the standard mean correction, so the arithmetic mean is
/// `price_mean`.
pub fn sample_initial_price<R: Rng>(rng: &mut R, config: &PriorConfig) -> f64 {
    let sigma = config.price_log_sigma;
    let mu = config.price_mean.max(f64::MIN_POSITIVE).ln() - sigma * sigma / 2.0;
    (mu + sigma * standard_normal(rng)).exp()
}

/// Draw drift and volatility, honoring any pinned component.
pub fn sample_asset_params<R: Rng>(
    rng: &mut R,
    config: &PriorConfig,
    drift: Option<f64>,
    volatility: Option<f64>,
) -> AssetParams {
    let var_drift = config.drift_sd * config.drift_sd;
    let var_log_vol = config.log_vol_sd * config.log_vol_sd;
    let cov = config.drift_log_vol_cov;

    let (drift, log_vol) = match (drift, volatility) {
        (Some(d), Some(v)) => (d, v.max(f64::MIN_POSITIVE).ln()),
        (Some(d), None) => {
            // Conditional normal of log-vol given drift.
            let cond_mean = config.log_vol_mean + cov / var_drift * (d - config.drift_mean);
            let cond_var = var_log_vol - cov * cov / var_drift;
            (d, cond_mean + cond_var.sqrt() * standard_normal(rng))
        }
        (None, Some(v)) => {
            let lv = v.max(f64::MIN_POSITIVE).ln();
            let cond_mean = config.drift_mean + cov / var_log_vol * (lv - config.log_vol_mean);
            let cond_var = var_drift - cov * cov / var_log_vol;
            (cond_mean + cond_var.sqrt() * standard_normal(rng), lv)
        }
        (None, None) => {
            // Joint draw via the Cholesky factor of the 2x2 covariance.
            let z1 = standard_normal(rng);
            let z2 = standard_normal(rng);
            let a11 = var_drift.sqrt();
            let a21 = cov / a11;
            let a22 = (var_log_vol - a21 * a21).sqrt();
            (
                config.drift_mean + a11 * z1,
                config.log_vol_mean + a21 * z1 + a22 * z2,
            )
        }
    };

    AssetParams {
        drift,
        volatility: log_vol.exp().clamp(VOLATILITY_MIN, VOLATILITY_MAX),
    }
}

/// Expiry horizon prior in minutes: normal, clamped to the configured band.
pub fn sample_expiry_minutes<R: Rng>(rng: &mut R, mean: f64, sd: f64, min: f64, max: f64) -> f64 {
    (mean + sd * standard_normal(rng)).clamp(min, max)
}
