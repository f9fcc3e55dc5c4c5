use crate::error::{Error, Result};
use crate::models::{ExchangeKind, Timeframe};
use crate::strategy::{
    BreakoutParams, RiskParams, StrategyConfig, StrategyKind, StrategyParams, TechnicalParams,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Saved watchlist row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    pub exchange: ExchangeKind,
}

/// Saved strategy row; variant parameters travel as a JSON string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRow {
    pub strategy_type: String,
    pub symbol: String,
    pub timeframe: String,
    pub balance_pct: f64,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub extra_params_json: String,
}

impl StrategyRow {
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let extra_params_json = match &config.params {
            StrategyParams::Technical(params) => serde_json::to_string(params)?,
            StrategyParams::Breakout(params) => serde_json::to_string(params)?,
        };

        Ok(Self {
            strategy_type: config.params.kind().to_string(),
            symbol: config.symbol.clone(),
            timeframe: config.timeframe.to_string(),
            balance_pct: config.risk.balance_pct,
            take_profit: config.risk.take_profit,
            stop_loss: config.risk.stop_loss,
            extra_params_json,
        })
    }

    pub fn into_config(self) -> Result<StrategyConfig> {
        let extra = if self.extra_params_json.trim().is_empty() {
            "{}"
        } else {
            self.extra_params_json.as_str()
        };

        let params = match self.strategy_type.parse::<StrategyKind>()? {
            StrategyKind::Technical => {
                StrategyParams::Technical(serde_json::from_str::<TechnicalParams>(extra)?)
            }
            StrategyKind::Breakout => {
                StrategyParams::Breakout(serde_json::from_str::<BreakoutParams>(extra)?)
            }
        };
        let timeframe = self
            .timeframe
            .parse::<Timeframe>()
            .map_err(|err| Error::decode("strategy row", err))?;

        Ok(StrategyConfig {
            params,
            symbol: self.symbol,
            timeframe,
            risk: RiskParams {
                balance_pct: self.balance_pct,
                take_profit: self.take_profit,
                stop_loss: self.stop_loss,
            },
        })
    }
}

/// Storage for the user's workspace: watchlist and strategy setup
///
/// Saving replaces the stored table wholesale.
pub trait WorkspaceStore {
    fn load_watchlist(&self) -> Result<Vec<WatchlistEntry>>;
    fn save_watchlist(&self, entries: &[WatchlistEntry]) -> Result<()>;
    fn load_strategies(&self) -> Result<Vec<StrategyRow>>;
    fn save_strategies(&self, rows: &[StrategyRow]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspaceFile {
    #[serde(default)]
    watchlist: Vec<WatchlistEntry>,
    #[serde(default)]
    strategies: Vec<StrategyRow>,
}

/// Workspace kept in a single JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<WorkspaceFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(WorkspaceFile::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(WorkspaceFile::default()),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn write(&self, file: &WorkspaceFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Write to a sibling file, then rename into place
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            watchlist = file.watchlist.len(),
            strategies = file.strategies.len(),
            "Workspace saved"
        );
        Ok(())
    }
}

impl WorkspaceStore for JsonFileStore {
    fn load_watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        Ok(self.read()?.watchlist)
    }

    fn save_watchlist(&self, entries: &[WatchlistEntry]) -> Result<()> {
        let mut file = self.read()?;
        file.watchlist = entries.to_vec();
        self.write(&file)
    }

    fn load_strategies(&self) -> Result<Vec<StrategyRow>> {
        Ok(self.read()?.strategies)
    }

    fn save_strategies(&self, rows: &[StrategyRow]) -> Result<()> {
        let mut file = self.read()?;
        file.strategies = rows.to_vec();
        self.write(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> JsonFileStore {
        let dir = std::env::temp_dir().join(format!("cryptotrader-{}-{}", name, uuid::Uuid::new_v4()));
        JsonFileStore::new(dir.join("workspace.json"))
    }

    fn technical() -> StrategyConfig {
        StrategyConfig {
            params: StrategyParams::Technical(TechnicalParams {
                ema_fast: 10,
                ema_slow: 20,
                ema_signal: 5,
                rsi_length: 7,
            }),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M15,
            risk: RiskParams {
                balance_pct: 5.0,
                take_profit: Some(3.0),
                stop_loss: None,
            },
        }
    }

    #[test]
    fn test_strategy_row_carries_extra_params() {
        let row = StrategyRow::from_config(&technical()).unwrap();
        assert_eq!(row.strategy_type, "Technical");
        assert_eq!(row.timeframe, "15m");
        let extra: serde_json::Value = serde_json::from_str(&row.extra_params_json).unwrap();
        assert_eq!(extra["ema_fast"], 10);
        assert_eq!(extra["rsi_length"], 7);

        assert_eq!(row.into_config().unwrap(), technical());
    }

    #[test]
    fn test_breakout_row_with_missing_params_uses_defaults() {
        let row = StrategyRow {
            strategy_type: "Breakout".to_string(),
            symbol: "XBTUSD".to_string(),
            timeframe: "1h".to_string(),
            balance_pct: 1.0,
            take_profit: None,
            stop_loss: Some(2.0),
            extra_params_json: String::new(),
        };
        let config = row.into_config().unwrap();
        assert_eq!(config.params, StrategyParams::Breakout(BreakoutParams::default()));
        assert_eq!(config.timeframe, Timeframe::H1);
    }

    #[test]
    fn test_unknown_strategy_type() {
        let mut row = StrategyRow::from_config(&technical()).unwrap();
        row.strategy_type = "Grid".to_string();
        assert!(matches!(row.into_config(), Err(Error::UnknownStrategy(_))));
    }

    #[test]
    fn test_json_store_replaces_tables() {
        let store = temp_store("store");
        assert!(store.load_watchlist().unwrap().is_empty());

        let watchlist = vec![
            WatchlistEntry {
                symbol: "BTCUSDT".to_string(),
                exchange: ExchangeKind::BinanceFutures,
            },
            WatchlistEntry {
                symbol: "XBTUSD".to_string(),
                exchange: ExchangeKind::Bitmex,
            },
        ];
        store.save_watchlist(&watchlist).unwrap();
        store
            .save_strategies(&[StrategyRow::from_config(&technical()).unwrap()])
            .unwrap();

        assert_eq!(store.load_watchlist().unwrap(), watchlist);
        assert_eq!(store.load_strategies().unwrap().len(), 1);

        store.save_watchlist(&watchlist[1..]).unwrap();
        assert_eq!(store.load_watchlist().unwrap(), watchlist[1..].to_vec());
        // Other table untouched
        assert_eq!(store.load_strategies().unwrap().len(), 1);

        if let Some(dir) = store.path().parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
