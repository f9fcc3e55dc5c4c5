// Trading session: one connector, its strategies and its event loop
use crate::activity::ActivityLog;
use crate::error::{Error, Result};
use crate::exchange::{run_stream, Channel, Connector, StreamEvent};
use crate::execution::{OrderReconciler, ReconcileNotice};
use crate::models::{Balance, BidAsk, Contract, ExchangeKind, Trade};
use crate::settings::Settings;
use crate::strategy::{StrategyConfig, StrategyInstance};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_BUFFER: usize = 1024;
const COMMAND_BUFFER: usize = 64;
/// Stream-driven changes reach the UI at most this often
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(250);

/// Read-only view of one strategy for the UI
#[derive(Debug, Clone, Serialize)]
pub struct StrategySnapshot {
    pub id: Uuid,
    pub config: StrategyConfig,
    pub trades: Vec<Trade>,
    pub ongoing_position: bool,
    pub candles: usize,
    pub last_close: Option<f64>,
}

impl StrategySnapshot {
    fn of(instance: &StrategyInstance) -> Self {
        Self {
            id: instance.id(),
            config: instance.config().clone(),
            trades: instance.trades().to_vec(),
            ongoing_position: instance.ongoing_position(),
            candles: instance.candles().len(),
            last_close: instance.candles().last().map(|c| c.close),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub strategies: Vec<StrategySnapshot>,
}

enum SessionCommand {
    StartStrategy {
        config: StrategyConfig,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    StopStrategy {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
}

/// Single writer for everything a connector's strategies own
///
/// Stream events, reconciliation notices and UI commands are handled one
/// at a time on the session task, so strategies and trades need no locks.
pub struct TradingSession {
    connector: Arc<Connector>,
    strategies: Vec<StrategyInstance>,
    reconciler: OrderReconciler,
    log: ActivityLog,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    /// Stream events applied since the last publish
    dirty: bool,
    max_candles: usize,
}

impl TradingSession {
    pub fn new(
        connector: Arc<Connector>,
        settings: &Settings,
        log: ActivityLog,
    ) -> (Self, mpsc::UnboundedReceiver<ReconcileNotice>) {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let reconciler =
            OrderReconciler::new(Arc::clone(&connector), &settings.reconciliation, notices_tx);

        let session = Self {
            connector,
            strategies: Vec::new(),
            reconciler,
            log,
            snapshot: Arc::new(RwLock::new(SessionSnapshot::default())),
            dirty: false,
            max_candles: settings.candles.max_candles,
        };
        (session, notices_rx)
    }

    /// Load the catalog, then run the stream and the event loop in the background
    pub async fn spawn(
        connector: Arc<Connector>,
        settings: &Settings,
        log: ActivityLog,
    ) -> SessionHandle {
        let exchange = connector.kind();
        let contracts = connector.fetch_contracts().await;
        if contracts.is_empty() {
            tracing::warn!(exchange = %exchange, "Instrument catalog is empty");
        } else {
            tracing::info!(exchange = %exchange, contracts = contracts.len(), "Instrument catalog loaded");
        }

        let (session, notices) = TradingSession::new(Arc::clone(&connector), settings, log.clone());
        let snapshot = Arc::clone(&session.snapshot);
        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        let stream_task = tokio::spawn(run_stream(
            Arc::clone(&connector),
            events_tx,
            shutdown.clone(),
            settings.stream.reconnect_delay(),
        ));
        let session_task = tokio::spawn(session.run(commands_rx, events_rx, notices, shutdown.clone()));

        SessionHandle {
            connector,
            commands: commands_tx,
            snapshot,
            log,
            shutdown,
            tasks: vec![stream_task, session_task],
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut events: mpsc::Receiver<StreamEvent>,
        mut notices: mpsc::UnboundedReceiver<ReconcileNotice>,
        shutdown: CancellationToken,
    ) {
        let exchange = self.connector.kind();
        tracing::info!(exchange = %exchange, "Trading session started");

        let mut publish = tokio::time::interval(SNAPSHOT_INTERVAL);
        publish.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                    self.publish_snapshot();
                }
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                    self.dirty = true;
                }
                Some(notice) = notices.recv() => {
                    self.handle_notice(notice);
                    self.publish_snapshot();
                }
                _ = publish.tick(), if self.dirty => self.publish_snapshot(),
                else => break,
            }
        }

        self.reconciler.cancel_all();
        tracing::info!(exchange = %exchange, "Trading session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartStrategy { config, reply } => {
                let _ = reply.send(self.start_strategy(config).await);
            }
            SessionCommand::StopStrategy { id, reply } => {
                let _ = reply.send(self.stop_strategy(id));
            }
        }
    }

    /// Resolve the contract, seed candles and subscribe the symbol's feeds
    pub async fn start_strategy(&mut self, config: StrategyConfig) -> Result<Uuid> {
        let contract = self
            .connector
            .contract(&config.symbol)
            .ok_or_else(|| Error::UnknownSymbol(config.symbol.clone()))?;

        let history = self
            .connector
            .fetch_historical_candles(&contract, config.timeframe)
            .await;
        if history.is_empty() {
            tracing::warn!(symbol = %contract.symbol, timeframe = %config.timeframe, "No candle history");
        }

        let kind = config.params.kind();
        let timeframe = config.timeframe;
        let instance = StrategyInstance::new(
            config,
            contract.clone(),
            history,
            self.max_candles,
            self.log.clone(),
        );
        let id = instance.id();

        let feeds = [contract];
        self.connector.subscribe(&feeds, Channel::AggTrade);
        self.connector.subscribe(&feeds, Channel::BookTicker);

        self.log.push(format!(
            "{} strategy on {} / {} started",
            kind, feeds[0].symbol, timeframe
        ));
        self.strategies.push(instance);
        self.publish_snapshot();
        Ok(id)
    }

    /// Remove a strategy and abandon its pending order polls
    pub fn stop_strategy(&mut self, id: Uuid) -> bool {
        let Some(index) = self.strategies.iter().position(|s| s.id() == id) else {
            return false;
        };
        let instance = self.strategies.remove(index);
        self.reconciler.cancel_strategy(id);
        self.log.push(format!(
            "{} strategy on {} / {} stopped",
            instance.config().params.kind(),
            instance.contract().symbol,
            instance.config().timeframe
        ));
        self.publish_snapshot();
        true
    }

    pub async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Trade {
                symbol,
                price,
                size,
                timestamp,
            } => {
                for instance in self.strategies.iter_mut().filter(|s| s.contract().symbol == symbol) {
                    instance
                        .on_trade(&self.connector, &mut self.reconciler, price, size, timestamp)
                        .await;
                }
            }
            StreamEvent::BookTicker { symbol, quote } => {
                for instance in self.strategies.iter_mut().filter(|s| s.contract().symbol == symbol) {
                    instance.update_pnl(quote);
                }
            }
        }
    }

    pub fn handle_notice(&mut self, notice: ReconcileNotice) {
        match notice {
            ReconcileNotice::Filled {
                strategy_id,
                status,
            } => {
                self.reconciler.complete(&status.order_id);
                let patched = self
                    .strategies
                    .iter_mut()
                    .find(|s| s.id() == strategy_id)
                    .is_some_and(|s| s.apply_fill(&status));
                if !patched {
                    tracing::debug!(order_id = %status.order_id, "Fill for unknown trade ignored");
                }
            }
            ReconcileNotice::Stuck {
                strategy_id,
                order_id,
                polls,
            } => {
                self.reconciler.complete(&order_id);
                self.log.push(format!(
                    "Order {} still not filled after {} checks, entry price unknown",
                    order_id, polls
                ));
                tracing::warn!(strategy_id = %strategy_id, order_id = %order_id, "Stuck order");
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            strategies: self.strategies.iter().map(StrategySnapshot::of).collect(),
        }
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.snapshot();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        self.dirty = false;
    }
}

/// UI-facing side of a running trading session
pub struct SessionHandle {
    connector: Arc<Connector>,
    commands: mpsc::Sender<SessionCommand>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    log: ActivityLog,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn exchange(&self) -> ExchangeKind {
        self.connector.kind()
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    pub async fn start_strategy(&self, config: StrategyConfig) -> Result<Uuid> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::StartStrategy { config, reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn stop_strategy(&self, id: Uuid) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::StopStrategy { id, reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Add a symbol to the watchlist: subscribe its book ticker
    pub fn watch(&self, symbol: &str) -> Result<Contract> {
        let contract = self
            .connector
            .contract(symbol)
            .ok_or_else(|| Error::UnknownSymbol(symbol.to_string()))?;
        self.connector
            .subscribe(std::slice::from_ref(&contract), Channel::BookTicker);
        Ok(contract)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contracts(&self) -> HashMap<String, Contract> {
        self.connector.contracts()
    }

    pub fn prices(&self) -> HashMap<String, BidAsk> {
        self.connector.prices().snapshot()
    }

    pub async fn balances(&self) -> Option<HashMap<String, Balance>> {
        self.connector.fetch_balances().await
    }

    pub fn drain_logs(&self) -> Vec<String> {
        self.log.drain_new()
    }

    /// Stop the stream and the event loop, then wait for both
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}
