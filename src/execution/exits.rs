use crate::models::{ExitReason, PositionSide, Trade};
use crate::strategy::RiskParams;

/// Relative slack so a threshold computed in floating point still fires
/// when the market prints exactly at it
const PRICE_TOLERANCE: f64 = 1e-9;

/// Trigger prices derived from an entry price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevels {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl ExitLevels {
    pub fn new(entry_price: f64, side: PositionSide, risk: &RiskParams) -> Self {
        let (sl_sign, tp_sign) = match side {
            PositionSide::Long => (-1.0, 1.0),
            PositionSide::Short => (1.0, -1.0),
        };
        Self {
            stop_loss: risk
                .stop_loss
                .map(|pct| entry_price * (1.0 + sl_sign * pct / 100.0)),
            take_profit: risk
                .take_profit
                .map(|pct| entry_price * (1.0 + tp_sign * pct / 100.0)),
        }
    }
}

fn at_or_above(price: f64, level: f64) -> bool {
    price >= level - level.abs() * PRICE_TOLERANCE
}

fn at_or_below(price: f64, level: f64) -> bool {
    price <= level + level.abs() * PRICE_TOLERANCE
}

/// Check whether an open trade must be closed at `price`
///
/// Trades without a confirmed entry price never exit.
pub fn should_exit(trade: &Trade, risk: &RiskParams, price: f64) -> Option<ExitReason> {
    if !trade.is_open() {
        return None;
    }
    let entry = trade.entry_price?;
    let levels = ExitLevels::new(entry, trade.side, risk);

    match trade.side {
        PositionSide::Long => {
            if levels.stop_loss.is_some_and(|sl| at_or_below(price, sl)) {
                return Some(ExitReason::StopLoss);
            }
            if levels.take_profit.is_some_and(|tp| at_or_above(price, tp)) {
                return Some(ExitReason::TakeProfit);
            }
        }
        PositionSide::Short => {
            if levels.stop_loss.is_some_and(|sl| at_or_above(price, sl)) {
                return Some(ExitReason::StopLoss);
            }
            if levels.take_profit.is_some_and(|tp| at_or_below(price, tp)) {
                return Some(ExitReason::TakeProfit);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderId;

    fn risk(take_profit: Option<f64>, stop_loss: Option<f64>) -> RiskParams {
        RiskParams {
            balance_pct: 10.0,
            take_profit,
            stop_loss,
        }
    }

    fn trade(side: PositionSide, entry: Option<f64>) -> Trade {
        Trade::open("BTCUSDT", "Technical", side, entry, 1.0, OrderId::from("1"))
    }

    #[test]
    fn test_take_profit_fires_exactly_at_target() {
        let long = trade(PositionSide::Long, Some(100.0));
        let risk = risk(Some(5.0), None);

        assert_eq!(should_exit(&long, &risk, 104.99), None);
        assert_eq!(should_exit(&long, &risk, 105.0), Some(ExitReason::TakeProfit));
        assert_eq!(should_exit(&long, &risk, 110.0), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_long_stop_loss() {
        let long = trade(PositionSide::Long, Some(100.0));
        let risk = risk(Some(5.0), Some(2.0));

        assert_eq!(should_exit(&long, &risk, 98.5), None);
        assert_eq!(should_exit(&long, &risk, 98.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_short_thresholds_are_mirrored() {
        let short = trade(PositionSide::Short, Some(100.0));
        let risk = risk(Some(5.0), Some(2.0));

        assert_eq!(should_exit(&short, &risk, 96.0), None);
        assert_eq!(should_exit(&short, &risk, 95.0), Some(ExitReason::TakeProfit));
        assert_eq!(should_exit(&short, &risk, 102.0), Some(ExitReason::StopLoss));
        assert_eq!(should_exit(&short, &risk, 101.0), None);
    }

    #[test]
    fn test_no_exit_without_entry_or_thresholds() {
        let pending = trade(PositionSide::Long, None);
        assert_eq!(should_exit(&pending, &risk(Some(5.0), Some(2.0)), 1000.0), None);

        let long = trade(PositionSide::Long, Some(100.0));
        assert_eq!(should_exit(&long, &risk(None, None), 1000.0), None);
    }

    #[test]
    fn test_closed_trade_never_exits_again() {
        let mut long = trade(PositionSide::Long, Some(100.0));
        long.close(ExitReason::TakeProfit, 105.0, None);
        assert_eq!(should_exit(&long, &risk(Some(5.0), None), 200.0), None);
    }
}
