use crate::domain::services::lifecycle::LifecycleConfig;
use crate::domain::services::priors::PriorConfig;

/// Runtime configuration for the simulation service.
#[derive(Clone)]
pub struct SimulationConfig {
    pub database_url: String,
    pub bind_address: String,
    pub initial_cash: f64,
    pub min_active_assets: usize,
    pub worthless_threshold: f64,
    pub symbol_length: usize,
    pub symbol_max_retries: u32,
    pub price_update_interval_seconds: u64,
    pub expiration_check_interval_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub cleanup_retention_hours: i64,
    pub max_price_history: usize,
    pub expiry_minutes_mean: f64,
    pub expiry_minutes_sd: f64,
    pub expiry_minutes_min: f64,
    pub expiry_minutes_max: f64,
    pub priors: PriorConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            database_url: "sqlite://data/martingale.db".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            initial_cash: 100_000.0,
            min_active_assets: 16,
            worthless_threshold: 0.01,
            symbol_length: 3,
            symbol_max_retries: 100,
            price_update_interval_seconds: 1,
            expiration_check_interval_seconds: 10,
            cleanup_interval_seconds: 3600,
            cleanup_retention_hours: 24,
            max_price_history: 100,
            expiry_minutes_mean: 10.0,
            expiry_minutes_sd: 2.0,
            expiry_minutes_min: 5.0,
            expiry_minutes_max: 15.0,
            priors: PriorConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> SimulationConfig {
        let mut config = SimulationConfig::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if !addr.trim().is_empty() {
                config.bind_address = addr;
            }
        }

        if let Ok(cash) = std::env::var("INITIAL_CASH") {
            match cash.parse::<f64>() {
                Ok(value) if value > 0.0 && value.is_finite() => config.initial_cash = value,
                _ => tracing::warn!(
                    "Invalid INITIAL_CASH value: {}, using default: {}",
                    cash,
                    config.initial_cash
                ),
            }
        }

        if let Ok(min) = std::env::var("MIN_ACTIVE_ASSETS") {
            if let Ok(value) = min.parse::<usize>() {
                if value > 0 {
                    config.min_active_assets = value;
                }
            }
        }

        if let Ok(threshold) = std::env::var("WORTHLESS_THRESHOLD") {
            if let Ok(value) = threshold.parse::<f64>() {
                if value > 0.0 && value.is_finite() {
                    config.worthless_threshold = value;
                }
            }
        }

        if let Ok(interval) = std::env::var("PRICE_UPDATE_INTERVAL_SECONDS") {
            if let Ok(value) = interval.parse::<u64>() {
                if value > 0 {
                    config.price_update_interval_seconds = value;
                }
            }
        }

        if let Ok(interval) = std::env::var("EXPIRATION_CHECK_INTERVAL_SECONDS") {
            if let Ok(value) = interval.parse::<u64>() {
                if value > 0 {
                    config.expiration_check_interval_seconds = value;
                }
            }
        }

        if let Ok(interval) = std::env::var("CLEANUP_INTERVAL_SECONDS") {
            if let Ok(value) = interval.parse::<u64>() {
                if value > 0 {
                    config.cleanup_interval_seconds = value;
                }
            }
        }

        if let Ok(hours) = std::env::var("CLEANUP_RETENTION_HOURS") {
            if let Ok(value) = hours.parse::<i64>() {
                if value > 0 {
                    config.cleanup_retention_hours = value;
                }
            }
        }

        if let Ok(len) = std::env::var("MAX_PRICE_HISTORY") {
            if let Ok(value) = len.parse::<usize>() {
                if value > 0 {
                    config.max_price_history = value;
                }
            }
        }

        if let Ok(mean) = std::env::var("EXPIRY_MINUTES_MEAN") {
            if let Ok(value) = mean.parse::<f64>() {
                if value > 0.0 {
                    config.expiry_minutes_mean = value;
                }
            }
        }

        if let Ok(sd) = std::env::var("EXPIRY_MINUTES_SD") {
            if let Ok(value) = sd.parse::<f64>() {
                if value > 0.0 {
                    config.expiry_minutes_sd = value;
                }
            }
        }

        if let Ok(len) = std::env::var("SYMBOL_LENGTH") {
            if let Ok(value) = len.parse::<usize>() {
                if (1..=10).contains(&value) {
                    config.symbol_length = value;
                }
            }
        }

        if let Ok(retries) = std::env::var("SYMBOL_MAX_RETRIES") {
            if let Ok(value) = retries.parse::<u32>() {
                if value > 0 {
                    config.symbol_max_retries = value;
                }
            }
        }

        if let Some(value) = env_f64("PRIOR_PRICE_MEAN") {
            if value > 0.0 {
                config.priors.price_mean = value;
            }
        }

        if let Some(value) = env_f64("PRIOR_PRICE_LOG_SIGMA") {
            if value > 0.0 {
                config.priors.price_log_sigma = value;
            }
        }

        if let Some(value) = env_f64("PRIOR_DRIFT_MEAN") {
            config.priors.drift_mean = value;
        }

        if let Some(value) = env_f64("PRIOR_DRIFT_SD") {
            if value > 0.0 {
                config.priors.drift_sd = value;
            }
        }

        if let Some(value) = env_f64("PRIOR_LOG_VOL_MEAN") {
            config.priors.log_vol_mean = value;
        }

        if let Some(value) = env_f64("PRIOR_LOG_VOL_SD") {
            if value > 0.0 {
                config.priors.log_vol_sd = value;
            }
        }

        // The covariance must keep the 2x2 prior covariance matrix
        // positive definite, i.e. |cov| < drift_sd * log_vol_sd.
        if let Some(value) = env_f64("PRIOR_DRIFT_LOG_VOL_COV") {
            if value.abs() < config.priors.drift_sd * config.priors.log_vol_sd {
                config.priors.drift_log_vol_cov = value;
            } else {
                tracing::warn!(
                    "PRIOR_DRIFT_LOG_VOL_COV {} breaks positive definiteness, ignoring",
                    value
                );
            }
        }

        // Legacy deployments ran long-dated assets, up to eight hours.
        if let Ok(band) = std::env::var("EXPIRY_MINUTES_RANGE") {
            if let Some((min, max)) = band.split_once(',') {
                if let (Ok(min), Ok(max)) = (min.trim().parse::<f64>(), max.trim().parse::<f64>()) {
                    if min > 0.0 && max > min {
                        config.expiry_minutes_min = min;
                        config.expiry_minutes_max = max;
                    }
                }
            }
        }

        config
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            min_active_assets: self.min_active_assets,
            worthless_threshold: self.worthless_threshold,
            symbol_length: self.symbol_length,
            symbol_max_retries: self.symbol_max_retries,
            expiry_minutes_mean: self.expiry_minutes_mean,
            expiry_minutes_sd: self.expiry_minutes_sd,
            expiry_minutes_min: self.expiry_minutes_min,
            expiry_minutes_max: self.expiry_minutes_max,
            priors: self.priors,
        }
    }
}

fn env_f64(key: &str) -> Option<f64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            tracing::warn!("Invalid {} value: {}, using default", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.initial_cash, 100_000.0);
        assert_eq!(config.min_active_assets, 16);
        assert_eq!(config.worthless_threshold, 0.01);
        assert_eq!(config.max_price_history, 100);
    }

    #[test]
    fn test_lifecycle_projection() {
        let config = SimulationConfig::default();
        let lifecycle = config.lifecycle();
        assert_eq!(lifecycle.min_active_assets, config.min_active_assets);
        assert_eq!(lifecycle.expiry_minutes_max, 15.0);
        assert_eq!(lifecycle.symbol_length, 3);
        assert_eq!(lifecycle.symbol_max_retries, 100);
        assert_eq!(lifecycle.priors.drift_mean, config.priors.drift_mean);
    }

    #[test]
    fn test_prior_and_symbol_env_overrides() {
        std::env::set_var("SYMBOL_LENGTH", "4");
        std::env::set_var("SYMBOL_MAX_RETRIES", "50");
        std::env::set_var("PRIOR_PRICE_MEAN", "250.0");
        std::env::set_var("PRIOR_DRIFT_MEAN", "0.002");
        std::env::set_var("PRIOR_DRIFT_SD", "0.01");
        std::env::set_var("PRIOR_LOG_VOL_SD", "0.25");
        std::env::set_var("PRIOR_DRIFT_LOG_VOL_COV", "0.001");

        let config = SimulationConfig::from_env();
        assert_eq!(config.symbol_length, 4);
        assert_eq!(config.symbol_max_retries, 50);
        assert_eq!(config.priors.price_mean, 250.0);
        assert_eq!(config.priors.drift_mean, 0.002);
        assert_eq!(config.priors.drift_sd, 0.01);
        assert_eq!(config.priors.log_vol_sd, 0.25);
        assert_eq!(config.priors.drift_log_vol_cov, 0.001);

        // A covariance too large for the chosen standard deviations is
        // rejected rather than producing an invalid matrix.
        std::env::set_var("PRIOR_DRIFT_LOG_VOL_COV", "1.0");
        let config = SimulationConfig::from_env();
        assert_eq!(config.priors.drift_log_vol_cov, 0.0);

        for key in [
            "SYMBOL_LENGTH",
            "SYMBOL_MAX_RETRIES",
            "PRIOR_PRICE_MEAN",
            "PRIOR_DRIFT_MEAN",
            "PRIOR_DRIFT_SD",
            "PRIOR_LOG_VOL_SD",
            "PRIOR_DRIFT_LOG_VOL_COV",
        ] {
            std::env::remove_var(key);
        }
    }
}
