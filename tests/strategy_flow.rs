use cryptotrader::exchange::{Connector, Credentials, Endpoints, StreamEvent};
use cryptotrader::execution::ReconcileNotice;
use cryptotrader::models::{ExchangeKind, PositionSide, Timeframe};
use cryptotrader::settings::{RestSettings, Settings};
use cryptotrader::strategy::{RiskParams, StrategyConfig, StrategyParams, TechnicalParams};
use cryptotrader::{ActivityLog, TradingSession};
use mockito::{Matcher, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const MINUTE: i64 = 60_000;

/// Closes that leave RSI near zero while MACD turns up after 46 candles
fn declining_closes(len: usize) -> Vec<f64> {
    let mut price = 1000.0;
    (0..len)
        .map(|i| {
            price = if i < 40 { 1000.0 - 5.0 * i as f64 } else { price - 0.1 };
            price
        })
        .collect()
}

fn klines_body(closes: &[f64]) -> String {
    let rows: Vec<_> = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let open_time = i as i64 * MINUTE;
            let close = format!("{:.1}", close);
            json!([open_time, close, close, close, close, "1.0", open_time + MINUTE - 1])
        })
        .collect();
    json!(rows).to_string()
}

async fn mock_market(server: &mut ServerGuard, history: usize) {
    server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .with_body(
            r#"{"symbols":[
                {"symbol":"BTCUSDT","baseAsset":"BTC","quoteAsset":"USDT","filters":[
                    {"filterType":"PRICE_FILTER","tickSize":"0.10"},
                    {"filterType":"LOT_SIZE","stepSize":"0.001"}]}
            ]}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/klines")
        .match_query(Matcher::Any)
        .with_body(klines_body(&declining_closes(history)))
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v2/account")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"assets":[{"asset":"USDT","initialMargin":"0","maintMargin":"0",
                "marginBalance":"1000","walletBalance":"1000","unrealizedProfit":"0"}]}"#,
        )
        .create_async()
        .await;
}

fn buy_order_query() -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
        Matcher::UrlEncoded("side".into(), "BUY".into()),
        Matcher::UrlEncoded("type".into(), "MARKET".into()),
        Matcher::UrlEncoded("quantity".into(), "0.125".into()),
    ])
}

fn connector(url: &str) -> Arc<Connector> {
    Arc::new(
        Connector::new(
            ExchangeKind::BinanceFutures,
            Credentials::new("key", "secret"),
            Endpoints::new(url, "ws://127.0.0.1:9"),
            &RestSettings::default(),
        )
        .unwrap(),
    )
}

fn technical_config() -> StrategyConfig {
    StrategyConfig {
        params: StrategyParams::Technical(TechnicalParams::default()),
        symbol: "BTCUSDT".to_string(),
        timeframe: Timeframe::M1,
        risk: RiskParams {
            balance_pct: 10.0,
            take_profit: None,
            stop_loss: None,
        },
    }
}

fn trade_tick(price: f64, timestamp: i64) -> StreamEvent {
    StreamEvent::Trade {
        symbol: "BTCUSDT".to_string(),
        price,
        size: 1.0,
        timestamp,
    }
}

#[tokio::test]
async fn test_oversold_series_places_exactly_one_entry() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, 46).await;
    let buy = server
        .mock("POST", "/fapi/v1/order")
        .match_query(buy_order_query())
        .with_body(r#"{"orderId":1,"status":"FILLED","avgPrice":"800.0","executedQty":"0.125"}"#)
        .expect(1)
        .create_async()
        .await;

    let connector = connector(&server.url());
    connector.fetch_contracts().await;
    let log = ActivityLog::new();
    let (mut session, _notices) = TradingSession::new(connector, &Settings::default(), log.clone());
    session.start_strategy(technical_config()).await.unwrap();

    // Opens candle 46; candles 0..=45 are closed
    session.handle_event(trade_tick(800.0, 46 * MINUTE + 1_000)).await;
    for i in 47..52 {
        session.handle_event(trade_tick(799.0, i * MINUTE + 1_000)).await;
    }

    buy.assert_async().await;

    let snapshot = session.snapshot();
    let strategy = &snapshot.strategies[0];
    assert!(strategy.ongoing_position);
    assert_eq!(strategy.trades.len(), 1);
    assert_eq!(strategy.trades[0].side, PositionSide::Long);
    assert_eq!(strategy.trades[0].quantity, 0.125);
    assert_eq!(strategy.trades[0].entry_price, Some(800.0));

    let messages = log.drain_new();
    assert!(messages.iter().any(|m| m == "Long signal on BTCUSDT 1m"));
}

#[tokio::test]
async fn test_no_entry_before_macd_turns() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, 41).await;
    let orders = server
        .mock("POST", "/fapi/v1/order")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let connector = connector(&server.url());
    connector.fetch_contracts().await;
    let (mut session, _notices) = TradingSession::new(connector, &Settings::default(), ActivityLog::new());
    session.start_strategy(technical_config()).await.unwrap();

    session.handle_event(trade_tick(800.0, 41 * MINUTE + 1_000)).await;

    orders.assert_async().await;
    assert!(session.snapshot().strategies[0].trades.is_empty());
}

#[tokio::test]
async fn test_unfilled_entry_is_patched_by_reconciliation() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, 46).await;
    server
        .mock("POST", "/fapi/v1/order")
        .match_query(buy_order_query())
        .with_body(r#"{"orderId":5,"status":"NEW","avgPrice":"0.00","executedQty":"0"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/order")
        .match_query(Matcher::UrlEncoded("orderId".into(), "5".into()))
        .with_body(r#"{"orderId":5,"status":"FILLED","avgPrice":"800.3","executedQty":"0.125"}"#)
        .create_async()
        .await;

    let mut settings = Settings::default();
    settings.reconciliation.poll_interval_ms = 20;

    let connector = connector(&server.url());
    connector.fetch_contracts().await;
    let (mut session, mut notices) = TradingSession::new(connector, &settings, ActivityLog::new());
    session.start_strategy(technical_config()).await.unwrap();

    session.handle_event(trade_tick(800.0, 46 * MINUTE + 1_000)).await;
    assert_eq!(session.snapshot().strategies[0].trades[0].entry_price, None);

    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(notice, ReconcileNotice::Filled { .. }));
    session.handle_notice(notice);

    let trade = &session.snapshot().strategies[0].trades[0];
    assert_eq!(trade.entry_price, Some(800.3));
    assert_eq!(trade.quantity, 0.125);
}
