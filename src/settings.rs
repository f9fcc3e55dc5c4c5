//! Runtime settings
//!
//! Loaded from an optional TOML file overlaid with `CRYPTOTRADER__*`
//! environment variables, e.g.
//! `CRYPTOTRADER__EXCHANGES__BINANCE_FUTURES__API_KEY`.

use crate::error::Result;
use crate::exchange::{Credentials, Endpoints};
use crate::models::ExchangeKind;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/cryptotrader.toml";
const ENV_PREFIX: &str = "CRYPTOTRADER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_filter: String,
    pub exchanges: ExchangesSettings,
    pub rest: RestSettings,
    pub stream: StreamSettings,
    pub reconciliation: ReconciliationSettings,
    pub candles: CandleSettings,
    pub workspace_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "cryptotrader=info".to_string(),
            exchanges: ExchangesSettings::default(),
            rest: RestSettings::default(),
            stream: StreamSettings::default(),
            reconciliation: ReconciliationSettings::default(),
            candles: CandleSettings::default(),
            workspace_path: PathBuf::from("workspace.json"),
        }
    }
}

/// Exchanges without a section are not started
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExchangesSettings {
    pub binance_futures: Option<ExchangeSettings>,
    pub binance_spot: Option<ExchangeSettings>,
    pub bitmex: Option<ExchangeSettings>,
}

impl ExchangesSettings {
    /// Configured exchanges in a stable order
    pub fn enabled(&self) -> Vec<(ExchangeKind, &ExchangeSettings)> {
        [
            (ExchangeKind::BinanceFutures, self.binance_futures.as_ref()),
            (ExchangeKind::BinanceSpot, self.binance_spot.as_ref()),
            (ExchangeKind::Bitmex, self.bitmex.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, settings)| settings.map(|s| (kind, s)))
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_testnet")]
    pub testnet: bool,
}

fn default_testnet() -> bool {
    true
}

impl ExchangeSettings {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    pub fn endpoints(&self, kind: ExchangeKind) -> Endpoints {
        Endpoints::for_exchange(kind, self.testnet)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            requests_per_minute: 1200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub reconnect_delay_ms: u64,
}

impl StreamSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    pub poll_interval_ms: u64,
    /// Unset means poll until filled
    pub max_polls: Option<u32>,
}

impl ReconciliationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_polls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CandleSettings {
    pub max_candles: usize,
}

impl Default for CandleSettings {
    fn default() -> Self {
        Self { max_candles: 1000 }
    }
}

impl Settings {
    /// Load from `path` (optional file) with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));

        let config = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        tracing::debug!(
            path = %path.display(),
            exchanges = settings.exchanges.enabled().len(),
            "Loaded settings"
        );
        Ok(settings)
    }

    /// Parse settings from TOML text, without environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.log_filter, "cryptotrader=info");
        assert_eq!(settings.rest.timeout_secs, 10);
        assert_eq!(settings.rest.requests_per_minute, 1200);
        assert_eq!(settings.stream.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(settings.reconciliation.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.reconciliation.max_polls, None);
        assert_eq!(settings.candles.max_candles, 1000);
        assert_eq!(settings.workspace_path, PathBuf::from("workspace.json"));
        assert!(settings.exchanges.enabled().is_empty());
    }

    #[test]
    fn test_exchange_sections() {
        let settings = Settings::from_toml_str(
            r#"
            [exchanges.binance_futures]
            api_key = "key"
            api_secret = "secret"

            [exchanges.bitmex]
            api_key = "bkey"
            api_secret = "bsecret"
            testnet = false

            [reconciliation]
            max_polls = 30
            "#,
        )
        .unwrap();

        let enabled = settings.exchanges.enabled();
        assert_eq!(enabled.len(), 2);
        assert_eq!(enabled[0].0, ExchangeKind::BinanceFutures);
        assert!(enabled[0].1.testnet);
        assert_eq!(enabled[1].0, ExchangeKind::Bitmex);
        assert_eq!(
            enabled[1].1.endpoints(ExchangeKind::Bitmex).rest,
            "https://www.bitmex.com"
        );
        assert_eq!(settings.reconciliation.max_polls, Some(30));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load(Some(Path::new("does/not/exist.toml"))).unwrap();
        assert_eq!(settings.candles.max_candles, 1000);
    }
}
