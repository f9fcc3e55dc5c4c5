use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DerivativeTerms, OrderId, Side};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens this position
    pub fn entry_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// Order side that closes this position
    pub fn exit_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeExit {
    pub reason: ExitReason,
    pub price: f64,
    pub time: DateTime<Utc>,
}

/// Application-level position record opened by a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub strategy: String,
    pub side: PositionSide,
    /// `None` until the entry order reports filled
    pub entry_price: Option<f64>,
    pub quantity: f64,
    pub pnl: f64,
    pub status: TradeStatus,
    pub entry_order_id: OrderId,
    pub exit: Option<TradeExit>,
}

impl Trade {
    pub fn open(
        symbol: &str,
        strategy: &str,
        side: PositionSide,
        entry_price: Option<f64>,
        quantity: f64,
        entry_order_id: OrderId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: Utc::now(),
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            side,
            entry_price,
            quantity,
            pnl: 0.0,
            status: TradeStatus::Open,
            entry_order_id,
            exit: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// PnL at `price`, or `None` while the entry fill is unconfirmed
    ///
    /// Derivative positions are valued through their contract terms and
    /// settle in the contract's settlement asset.
    pub fn pnl_at(&self, price: f64, terms: Option<&DerivativeTerms>) -> Option<f64> {
        let entry = self.entry_price?;
        if entry <= 0.0 || price <= 0.0 {
            return None;
        }
        let long = match terms {
            Some(terms) => terms.long_pnl(entry, price, self.quantity),
            None => (price - entry) * self.quantity,
        };
        Some(match self.side {
            PositionSide::Long => long,
            PositionSide::Short => -long,
        })
    }

    /// Recompute running PnL. No-op for closed trades and unconfirmed entries.
    pub fn mark_to_market(&mut self, price: f64, terms: Option<&DerivativeTerms>) {
        if !self.is_open() {
            return;
        }
        if let Some(pnl) = self.pnl_at(price, terms) {
            self.pnl = pnl;
        }
    }

    pub fn confirm_fill(&mut self, avg_price: f64, executed_qty: f64) {
        self.entry_price = Some(avg_price);
        if executed_qty > 0.0 {
            self.quantity = executed_qty;
        }
    }

    pub fn close(&mut self, reason: ExitReason, price: f64, terms: Option<&DerivativeTerms>) {
        self.mark_to_market(price, terms);
        self.status = TradeStatus::Closed;
        self.exit = Some(TradeExit {
            reason,
            price,
            time: Utc::now(),
        });
    }
}
