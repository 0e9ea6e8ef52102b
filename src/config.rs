use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::order;
use crate::risk::RiskLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Interface to bind the API server to (e.g., "127.0.0.1").
    pub host: String,
    /// TCP port for the API server (e.g., 8080).
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    COMPACT,
    JSON,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogLevel {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<LogLevel> for LevelFilter {
    fn from(val: LogLevel) -> Self {
        match val {
            LogLevel::TRACE => LevelFilter::TRACE,
            LogLevel::DEBUG => LevelFilter::DEBUG,
            LogLevel::INFO => LevelFilter::INFO,
            LogLevel::WARN => LevelFilter::WARN,
            LogLevel::ERROR => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::INFO,
            format: LogFormat::COMPACT,
        }
    }
}

/// The one symbol this engine instance trades and its sizing hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub symbol: String,
    /// Expected number of concurrently resting orders; used to pre-allocate.
    pub capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSD".to_string(),
            capacity: 1024,
        }
    }
}

/// Pre-trade risk limits. `max_price` is a decimal and converts to ticks when
/// the engine is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_order_size: u64,
    pub max_price: f64,
    pub max_position: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_order_size: 10_000,
            max_price: 1_000_000.0,
            max_position: 1_000_000,
        }
    }
}

impl RiskConfig {
    /// Convert into engine limits, rejecting unrepresentable prices.
    pub fn limits(&self) -> Result<RiskLimits, String> {
        let max_price = order::price_from_decimal(self.max_price)
            .filter(|ticks| *ticks > 0)
            .ok_or_else(|| format!("risk.max_price {} is not a usable price", self.max_price))?;
        Ok(RiskLimits {
            max_order_size: self.max_order_size,
            max_price,
            max_position: self.max_position,
        })
    }
}

/// Top-level application configuration wrapper.
///
/// Loaded with the following precedence (lowest to highest):
/// 1) Built-in defaults
/// 2) Optional config file (if present)
/// 3) Environment variables
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub logger: LogConfig,
    pub engine: EngineConfig,
    pub risk: RiskConfig,
}

impl AppConfig {
    pub fn load(config_path: &Path) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if config_path.exists() {
            figment = figment.merge(Toml::file(config_path));
        }
        figment = figment.merge(Env::prefixed("MATCHBOOK_").split("_"));

        let cfg = figment.extract()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_risk_config_converts_to_limits() {
        let limits = RiskConfig::default().limits().expect("defaults convert");
        assert_eq!(limits.max_order_size, 10_000);
        assert_eq!(limits.max_price, 100_000_000, "1,000,000.00 in ticks");
        assert_eq!(limits.max_position, 1_000_000);
    }

    #[test]
    fn unusable_max_price_is_rejected() {
        let cfg = RiskConfig {
            max_price: f64::NAN,
            ..RiskConfig::default()
        };
        assert!(cfg.limits().is_err(), "NaN max price must not convert");

        let cfg = RiskConfig {
            max_price: 0.0,
            ..RiskConfig::default()
        };
        assert!(cfg.limits().is_err(), "zero max price admits nothing");
    }
}
