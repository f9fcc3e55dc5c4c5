use super::{Signal, Strategy, StrategyConfig};
use crate::activity::ActivityLog;
use crate::exchange::Connector;
use crate::execution::{should_exit, OrderReconciler};
use crate::market::{CandleSeries, TickOutcome};
use crate::models::{
    BidAsk, Candle, Contract, ExitReason, OrderStatus, OrderType, PositionSide, Side, Trade,
};
use uuid::Uuid;

/// Closed trades kept per strategy; older ones are dropped first
const MAX_CLOSED_TRADES: usize = 500;

/// One running strategy: a contract, a timeframe, its candles and trades
///
/// Owned by a trading session and only ever touched from its event loop.
pub struct StrategyInstance {
    id: Uuid,
    config: StrategyConfig,
    contract: Contract,
    strategy: Box<dyn Strategy>,
    series: CandleSeries,
    trades: Vec<Trade>,
    ongoing_position: bool,
    log: ActivityLog,
}

impl StrategyInstance {
    pub fn new(
        config: StrategyConfig,
        contract: Contract,
        history: Vec<Candle>,
        max_candles: usize,
        log: ActivityLog,
    ) -> Self {
        let strategy = config.params.build();
        let series = CandleSeries::with_history(config.timeframe, max_candles, history);
        Self {
            id: Uuid::new_v4(),
            config,
            contract,
            strategy,
            series,
            trades: Vec::new(),
            ongoing_position: false,
            log,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn candles(&self) -> &CandleSeries {
        &self.series
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn ongoing_position(&self) -> bool {
        self.ongoing_position
    }

    /// Feed one trade tick from the stream
    ///
    /// Aggregates the tick, re-checks exits of open trades, then looks for
    /// an entry if no position is ongoing.
    pub async fn on_trade(
        &mut self,
        connector: &Connector,
        reconciler: &mut OrderReconciler,
        price: f64,
        size: f64,
        timestamp: i64,
    ) -> TickOutcome {
        let outcome = self.series.apply_tick(price, size, timestamp);
        if let TickOutcome::NewCandle { filled } = outcome {
            tracing::debug!(
                symbol = %self.contract.symbol,
                timeframe = %self.config.timeframe,
                filled,
                "New candle"
            );
        }

        self.check_exits(connector).await;

        if !self.ongoing_position && (outcome.is_new_candle() || self.strategy.evaluates_every_tick()) {
            match self.strategy.generate_signal(self.series.candles()) {
                Signal::None => {}
                signal => self.open_position(connector, reconciler, signal).await,
            }
        }

        outcome
    }

    async fn check_exits(&mut self, connector: &Connector) {
        let Some(price) = self.series.last().map(|c| c.close) else {
            return;
        };

        let exits: Vec<(usize, ExitReason)> = self
            .trades
            .iter()
            .enumerate()
            .filter_map(|(i, trade)| should_exit(trade, &self.config.risk, price).map(|r| (i, r)))
            .collect();

        for (index, reason) in exits {
            let trade = &self.trades[index];
            let label = match reason {
                ExitReason::StopLoss => "Stop loss",
                ExitReason::TakeProfit => "Take profit",
            };
            self.log.push(format!(
                "{} for {} {} | Current Price = {} (Entry price was {})",
                label,
                self.contract.symbol,
                self.config.timeframe,
                price,
                trade.entry_price.unwrap_or_default()
            ));

            let side = trade.side.exit_side();
            let mut quantity = trade.quantity;
            if !connector.supports_shorting() && side == Side::Sell {
                quantity = self.cap_to_free_base(connector, quantity).await;
            }

            let Some(_status) = connector
                .place_order(&self.contract, side, OrderType::Market, quantity, None, None)
                .await
            else {
                continue;
            };

            self.log.push(format!(
                "Exit order on {} {} placed successfully",
                self.contract.symbol, self.config.timeframe
            ));
            self.trades[index].close(reason, price, self.contract.derivative.as_ref());
            self.ongoing_position = false;
        }

        self.prune_closed_trades();
    }

    fn prune_closed_trades(&mut self) {
        let closed = self.trades.iter().filter(|t| !t.is_open()).count();
        let mut excess = closed.saturating_sub(MAX_CLOSED_TRADES);
        if excess == 0 {
            return;
        }
        self.trades.retain(|trade| {
            if excess > 0 && !trade.is_open() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    /// Spot sells cannot exceed what the account actually holds
    async fn cap_to_free_base(&self, connector: &Connector, quantity: f64) -> f64 {
        let free = connector
            .fetch_balances()
            .await
            .and_then(|balances| balances.get(&self.contract.base_asset).map(|b| b.available()));
        match free {
            Some(free) if free < quantity => {
                tracing::info!(
                    symbol = %self.contract.symbol,
                    requested = quantity,
                    free,
                    "Capping spot exit to free balance"
                );
                free
            }
            _ => quantity,
        }
    }

    async fn open_position(
        &mut self,
        connector: &Connector,
        reconciler: &mut OrderReconciler,
        signal: Signal,
    ) {
        let side = match signal {
            Signal::Long => PositionSide::Long,
            Signal::Short if connector.supports_shorting() => PositionSide::Short,
            Signal::Short => {
                tracing::debug!(symbol = %self.contract.symbol, "Short signal ignored on spot account");
                return;
            }
            Signal::None => return,
        };

        let Some(price) = self.series.last().map(|c| c.close) else {
            return;
        };
        let Some(quantity) = connector
            .compute_trade_size(&self.contract, price, self.config.risk.balance_pct)
            .await
        else {
            return;
        };

        let label = match side {
            PositionSide::Long => "Long",
            PositionSide::Short => "Short",
        };
        self.log.push(format!(
            "{} signal on {} {}",
            label, self.contract.symbol, self.config.timeframe
        ));

        let order_side = side.entry_side();
        let Some(status) = connector
            .place_order(&self.contract, order_side, OrderType::Market, quantity, None, None)
            .await
        else {
            return;
        };

        self.log.push(format!(
            "{:?} order placed on {} | Status: {:?}",
            order_side,
            connector.kind(),
            status.state
        ));
        self.ongoing_position = true;

        let executed = if status.executed_qty > 0.0 {
            status.executed_qty
        } else {
            quantity
        };
        let entry_price = status.has_fill_price().then_some(status.avg_price);
        if entry_price.is_none() {
            reconciler.schedule(self.id, self.contract.clone(), status.order_id.clone());
        }

        self.trades.push(Trade::open(
            &self.contract.symbol,
            self.strategy.name(),
            side,
            entry_price,
            executed,
            status.order_id,
        ));
    }

    /// Patch the trade whose entry order just filled
    pub fn apply_fill(&mut self, status: &OrderStatus) -> bool {
        let Some(trade) = self
            .trades
            .iter_mut()
            .find(|t| t.entry_order_id == status.order_id && t.entry_price.is_none())
        else {
            return false;
        };

        trade.confirm_fill(status.avg_price, status.executed_qty);
        self.log.push(format!(
            "Entry order {} on {} filled at {}",
            status.order_id, self.contract.symbol, status.avg_price
        ));
        true
    }

    /// Mark open trades to market: longs at the bid, shorts at the ask
    pub fn update_pnl(&mut self, quote: BidAsk) {
        for trade in self.trades.iter_mut().filter(|t| t.is_open()) {
            let price = match trade.side {
                PositionSide::Long => quote.bid,
                PositionSide::Short => quote.ask,
            };
            trade.mark_to_market(price, self.contract.derivative.as_ref());
        }
    }
}
