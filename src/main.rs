use anyhow::Context;
use clap::Parser;
use cryptotrader::exchange::Connector;
use cryptotrader::persistence::{JsonFileStore, StrategyRow, WatchlistEntry, WorkspaceStore};
use cryptotrader::settings::Settings;
use cryptotrader::{ActivityLog, SessionHandle, TradingSession};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Parser)]
#[command(name = "cryptotrader", about = "Automated crypto trading client")]
struct Args {
    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the settings file
    #[arg(long)]
    log_filter: Option<String>,

    /// Symbol to add to the watchlist on every exchange that lists it
    #[arg(long = "watch", value_name = "SYMBOL")]
    watch: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    setup_logging(args.log_filter.as_deref().unwrap_or(settings.log_filter.as_str()));

    // Several crates pull rustls in; pick the provider once for the process
    let _ = rustls::crypto::ring::default_provider().install_default();

    let enabled = settings.exchanges.enabled();
    if enabled.is_empty() {
        anyhow::bail!("no exchange configured, add an [exchanges.<name>] section");
    }

    tracing::info!("CryptoTrader starting ({} exchanges)", enabled.len());

    let mut sessions = Vec::new();
    for (kind, exchange) in enabled {
        let connector = Connector::new(
            kind,
            exchange.credentials(),
            exchange.endpoints(kind),
            &settings.rest,
        )
        .with_context(|| format!("creating {} connector", kind))?;

        let session =
            TradingSession::spawn(Arc::new(connector), &settings, ActivityLog::new()).await;
        sessions.push(session);
    }

    let store = JsonFileStore::new(&settings.workspace_path);
    let mut watchlist = restore_workspace(&store, &sessions).await;
    for symbol in &args.watch {
        watch_everywhere(&sessions, symbol, &mut watchlist);
    }

    tracing::info!("Press Ctrl+C to stop...");

    let mut logs = interval(Duration::from_secs(1));
    let mut status = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    logs.set_missed_tick_behavior(MissedTickBehavior::Skip);
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = logs.tick() => {
                for session in &sessions {
                    for message in session.drain_logs() {
                        tracing::info!(exchange = %session.exchange(), "{}", message);
                    }
                }
            }
            _ = status.tick() => log_status(&sessions),
        }
    }

    save_workspace(&store, &sessions, &watchlist);
    for session in sessions {
        session.shutdown().await;
    }

    tracing::info!("CryptoTrader stopped");
    Ok(())
}

fn setup_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Re-watch saved symbols and restart saved strategies
///
/// Strategy rows carry no exchange; each one starts on the first exchange
/// whose catalog lists its symbol.
async fn restore_workspace(
    store: &JsonFileStore,
    sessions: &[SessionHandle],
) -> Vec<WatchlistEntry> {
    let mut watchlist = Vec::new();

    match store.load_watchlist() {
        Ok(entries) => {
            for entry in entries {
                let Some(session) = sessions.iter().find(|s| s.exchange() == entry.exchange) else {
                    tracing::warn!(symbol = %entry.symbol, exchange = %entry.exchange, "Exchange not enabled, skipping");
                    continue;
                };
                match session.watch(&entry.symbol) {
                    Ok(_) => watchlist.push(entry),
                    Err(err) => tracing::warn!(error = %err, "Cannot restore watchlist entry"),
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "Failed to load watchlist"),
    }

    let rows = store.load_strategies().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Failed to load strategies");
        Vec::new()
    });
    let pending: Vec<_> = rows
        .into_iter()
        .filter_map(|row| match row.into_config() {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping saved strategy");
                None
            }
        })
        .collect();

    for config in pending {
        let Some(session) = sessions
            .iter()
            .find(|s| s.connector().contract(&config.symbol).is_some())
        else {
            tracing::warn!(symbol = %config.symbol, "No enabled exchange lists saved strategy symbol");
            continue;
        };
        let symbol = config.symbol.clone();
        if let Err(err) = session.start_strategy(config).await {
            tracing::warn!(symbol = %symbol, error = %err, "Cannot restore strategy");
        }
    }

    watchlist
}

fn watch_everywhere(sessions: &[SessionHandle], symbol: &str, watchlist: &mut Vec<WatchlistEntry>) {
    let mut found = false;
    for session in sessions {
        if session.watch(symbol).is_ok() {
            found = true;
            let entry = WatchlistEntry {
                symbol: symbol.to_string(),
                exchange: session.exchange(),
            };
            if !watchlist.contains(&entry) {
                watchlist.push(entry);
            }
        }
    }
    if !found {
        tracing::warn!(symbol, "Symbol not listed on any enabled exchange");
    }
}

fn save_workspace(store: &JsonFileStore, sessions: &[SessionHandle], watchlist: &[WatchlistEntry]) {
    if let Err(err) = store.save_watchlist(watchlist) {
        tracing::error!(error = %err, "Failed to save watchlist");
    }

    let rows: Vec<StrategyRow> = sessions
        .iter()
        .flat_map(|s| s.snapshot().strategies)
        .filter_map(|strategy| StrategyRow::from_config(&strategy.config).ok())
        .collect();
    if let Err(err) = store.save_strategies(&rows) {
        tracing::error!(error = %err, "Failed to save strategies");
    }
}

fn log_status(sessions: &[SessionHandle]) {
    for session in sessions {
        let snapshot = session.snapshot();
        let prices = session.prices();
        for strategy in &snapshot.strategies {
            let open: Vec<_> = strategy.trades.iter().filter(|t| t.is_open()).collect();
            let pnl: f64 = open.iter().map(|t| t.pnl).sum();
            tracing::info!(
                exchange = %session.exchange(),
                symbol = %strategy.config.symbol,
                timeframe = %strategy.config.timeframe,
                candles = strategy.candles,
                open_trades = open.len(),
                bid = prices.get(&strategy.config.symbol).map(|q| q.bid),
                "Strategy status: PnL {:.4}",
                pnl
            );
        }
    }
}
