use super::rest::{encode_query, flexible_f64, flexible_f64_or_zero, RestClient};
use super::signing::binance_query;
use super::{Channel, Credentials, StreamEvent};
use crate::error::{Error, Result};
use crate::models::precision::{round_to_step_f64, step_decimals};
use crate::models::{
    Balance, BidAsk, Candle, Contract, ExchangeKind, MarginBalance, OrderId, OrderState,
    OrderStatus, OrderType, Side, SpotBalance, TimeInForce, Timeframe,
};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const KLINES_LIMIT: u32 = 1000;

/// Binance account flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    Futures,
    Spot,
}

impl BinanceMarket {
    fn path(&self, endpoint: &str) -> String {
        match self {
            BinanceMarket::Futures => {
                let version = if endpoint == "account" { "v2" } else { "v1" };
                format!("/fapi/{version}/{endpoint}")
            }
            BinanceMarket::Spot => format!("/api/v3/{endpoint}"),
        }
    }

    fn kind(&self) -> ExchangeKind {
        match self {
            BinanceMarket::Futures => ExchangeKind::BinanceFutures,
            BinanceMarket::Spot => ExchangeKind::BinanceSpot,
        }
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FuturesAccount {
    assets: Vec<FuturesAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesAsset {
    asset: String,
    #[serde(deserialize_with = "flexible_f64")]
    initial_margin: f64,
    #[serde(deserialize_with = "flexible_f64")]
    maint_margin: f64,
    #[serde(deserialize_with = "flexible_f64")]
    margin_balance: f64,
    #[serde(deserialize_with = "flexible_f64")]
    wallet_balance: f64,
    #[serde(deserialize_with = "flexible_f64")]
    unrealized_profit: f64,
}

#[derive(Debug, Deserialize)]
struct SpotAccount {
    balances: Vec<SpotAsset>,
}

#[derive(Debug, Deserialize)]
struct SpotAsset {
    asset: String,
    #[serde(deserialize_with = "flexible_f64")]
    free: f64,
    #[serde(deserialize_with = "flexible_f64")]
    locked: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    #[serde(deserialize_with = "flexible_f64")]
    bid_price: f64,
    #[serde(deserialize_with = "flexible_f64")]
    ask_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    avg_price: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    executed_qty: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountTrade {
    order_id: i64,
    #[serde(deserialize_with = "flexible_f64")]
    price: f64,
    #[serde(deserialize_with = "flexible_f64")]
    qty: f64,
}

// ============== Implementation ==============

/// Binance Futures / Spot REST client
#[derive(Clone)]
pub struct BinanceClient {
    rest: RestClient,
    credentials: Credentials,
    market: BinanceMarket,
}

impl BinanceClient {
    pub fn new(rest: RestClient, credentials: Credentials, market: BinanceMarket) -> Self {
        Self {
            rest,
            credentials,
            market,
        }
    }

    pub fn market(&self) -> BinanceMarket {
        self.market
    }

    async fn public_get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = encode_query(params)?;
        self.rest
            .send(Method::GET, &self.market.path(endpoint), &query, HeaderMap::new())
            .await
    }

    async fn signed<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = binance_query(
            params,
            Utc::now().timestamp_millis(),
            &self.credentials.api_secret,
        )?;
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.credentials.api_key)
            .map_err(|err| Error::Signing(err.to_string()))?;
        headers.insert("X-MBX-APIKEY", key);

        self.rest
            .send(method, &self.market.path(endpoint), &query, headers)
            .await
    }

    /// GET /fapi/v1/exchangeInfo or /api/v3/exchangeInfo
    pub async fn fetch_contracts(&self) -> Result<Vec<Contract>> {
        let info: ExchangeInfo = self.public_get("exchangeInfo", &[]).await?;
        let kind = self.market.kind();

        let contracts = info
            .symbols
            .into_iter()
            .filter_map(|s| {
                let tick_size = filter_value(&s.filters, "PRICE_FILTER", "tickSize")?;
                let lot_size = filter_value(&s.filters, "LOT_SIZE", "stepSize")?;
                Some(Contract {
                    symbol: s.symbol,
                    base_asset: s.base_asset,
                    quote_asset: s.quote_asset,
                    tick_size,
                    lot_size,
                    price_decimals: step_decimals(tick_size),
                    quantity_decimals: step_decimals(lot_size),
                    exchange: kind,
                    derivative: None,
                })
            })
            .collect();

        Ok(contracts)
    }

    /// Signed account snapshot: `assets[]` for futures, `balances[]` for spot
    pub async fn fetch_balances(&self) -> Result<HashMap<String, Balance>> {
        let balances = match self.market {
            BinanceMarket::Futures => {
                let account: FuturesAccount = self.signed(Method::GET, "account", &[]).await?;
                account
                    .assets
                    .into_iter()
                    .map(|a| {
                        let balance = Balance::Margin(MarginBalance {
                            initial_margin: a.initial_margin,
                            maintenance_margin: a.maint_margin,
                            margin_balance: a.margin_balance,
                            wallet_balance: a.wallet_balance,
                            unrealized_pnl: a.unrealized_profit,
                        });
                        (a.asset, balance)
                    })
                    .collect()
            }
            BinanceMarket::Spot => {
                let account: SpotAccount = self.signed(Method::GET, "account", &[]).await?;
                account
                    .balances
                    .into_iter()
                    .map(|a| {
                        let balance = Balance::Spot(SpotBalance {
                            free: a.free,
                            locked: a.locked,
                        });
                        (a.asset, balance)
                    })
                    .collect()
            }
        };
        Ok(balances)
    }

    pub async fn fetch_bid_ask(&self, symbol: &str) -> Result<BidAsk> {
        let ticker: BookTicker = self
            .public_get("ticker/bookTicker", &[("symbol", symbol.to_string())])
            .await?;
        Ok(BidAsk {
            bid: ticker.bid_price,
            ask: ticker.ask_price,
        })
    }

    pub async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<Value>> = self
            .public_get(
                "klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.as_str().to_string()),
                    ("limit", KLINES_LIMIT.to_string()),
                ],
            )
            .await?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }

    pub async fn place_order(
        &self,
        contract: &Contract,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        tif: Option<TimeInForce>,
    ) -> Result<OrderStatus> {
        let quantity = contract
            .format_quantity(quantity)
            .ok_or_else(|| Error::Decode(format!("invalid quantity {quantity}")))?;

        let mut params = vec![
            ("symbol", contract.symbol.clone()),
            ("side", side_param(side).to_string()),
            ("quantity", quantity),
            ("type", order_type_param(order_type).to_string()),
        ];
        if let Some(price) = price {
            let price = contract
                .format_price(price)
                .ok_or_else(|| Error::Decode(format!("invalid price {price}")))?;
            params.push(("price", price));
        }
        if let Some(tif) = tif {
            params.push(("timeInForce", tif_param(tif).to_string()));
        }

        let response: OrderResponse = self.signed(Method::POST, "order", &params).await?;
        self.order_status(contract, response).await
    }

    pub async fn cancel_order(&self, contract: &Contract, order_id: &OrderId) -> Result<OrderStatus> {
        let params = [
            ("orderId", order_id.0.clone()),
            ("symbol", contract.symbol.clone()),
        ];
        let response: OrderResponse = self.signed(Method::DELETE, "order", &params).await?;
        self.order_status(contract, response).await
    }

    pub async fn query_order(&self, contract: &Contract, order_id: &OrderId) -> Result<OrderStatus> {
        let params = [
            ("symbol", contract.symbol.clone()),
            ("orderId", order_id.0.clone()),
        ];
        let response: OrderResponse = self.signed(Method::GET, "order", &params).await?;
        self.order_status(contract, response).await
    }

    /// Normalize an order response; spot fills get their price from account trades
    async fn order_status(&self, contract: &Contract, response: OrderResponse) -> Result<OrderStatus> {
        let state = parse_order_state(&response.status)?;
        let avg_price = match (self.market, state) {
            (BinanceMarket::Spot, OrderState::Filled) => {
                // The order stands even when its fill price cannot be read
                match self.execution_price(contract, response.order_id).await {
                    Ok(price) => price,
                    Err(err) => {
                        tracing::warn!(
                            symbol = %contract.symbol,
                            order_id = response.order_id,
                            error = %err,
                            "Spot fill price unavailable"
                        );
                        0.0
                    }
                }
            }
            (BinanceMarket::Spot, _) => 0.0,
            (BinanceMarket::Futures, _) => response.avg_price,
        };

        Ok(OrderStatus {
            order_id: OrderId(response.order_id.to_string()),
            state,
            avg_price,
            executed_qty: response.executed_qty,
        })
    }

    /// Quantity-weighted fill price of a spot order, rounded to tick size
    async fn execution_price(&self, contract: &Contract, order_id: i64) -> Result<f64> {
        let trades: Vec<AccountTrade> = self
            .signed(
                Method::GET,
                "myTrades",
                &[
                    ("symbol", contract.symbol.clone()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        let fills: Vec<&AccountTrade> = trades.iter().filter(|t| t.order_id == order_id).collect();
        let executed: f64 = fills.iter().map(|t| t.qty).sum();
        if executed <= 0.0 {
            return Ok(0.0);
        }

        let avg: f64 = fills.iter().map(|t| t.price * t.qty / executed).sum();
        Ok(round_to_step_f64(avg, contract.tick_size).unwrap_or(avg))
    }
}

fn filter_value(filters: &[Value], filter_type: &str, field: &str) -> Option<f64> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some(filter_type))?
        .get(field)?
        .as_str()?
        .parse()
        .ok()
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

fn parse_kline(row: &[Value]) -> Result<Candle> {
    let field = |i: usize| {
        row.get(i)
            .and_then(value_f64)
            .ok_or_else(|| Error::Decode(format!("kline field {i} missing")))
    };
    let timestamp = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Decode("kline open time missing".to_string()))?;

    Ok(Candle {
        timestamp,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

fn parse_order_state(status: &str) -> Result<OrderState> {
    match status {
        "NEW" => Ok(OrderState::New),
        "PARTIALLY_FILLED" => Ok(OrderState::PartiallyFilled),
        "FILLED" => Ok(OrderState::Filled),
        "CANCELED" | "PENDING_CANCEL" | "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderState::Canceled),
        "REJECTED" => Ok(OrderState::Rejected),
        other => Err(Error::Decode(format!("unknown order status {other}"))),
    }
}

fn side_param(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn order_type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
    }
}

fn tif_param(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::GoodTillCancel => "GTC",
        TimeInForce::ImmediateOrCancel => "IOC",
        TimeInForce::FillOrKill => "FOK",
    }
}

// ============== Streaming ==============

/// `{"method":"SUBSCRIBE","params":["btcusdt@bookTicker"],"id":1}`
pub fn subscribe_message(channel: Channel, symbols: &[String], id: u64) -> String {
    let params: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@{}", s.to_lowercase(), channel))
        .collect();
    json!({ "method": "SUBSCRIBE", "params": params, "id": id }).to_string()
}

/// Decode one stream message
///
/// Book tickers carry no event type on spot, so they are recognised by
/// their update id and best ask quantity fields.
pub fn parse_stream_message(text: &str) -> Vec<StreamEvent> {
    let Ok(data) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("Ignoring non-JSON stream message");
        return Vec::new();
    };

    let event_type = data.get("e").and_then(Value::as_str);
    let is_book_ticker = event_type == Some("bookTicker")
        || (data.get("u").is_some() && data.get("A").is_some());
    let symbol = data.get("s").and_then(Value::as_str).map(str::to_string);

    let event = if is_book_ticker {
        symbol.zip(parse_quote(&data)).map(|(symbol, quote)| StreamEvent::BookTicker { symbol, quote })
    } else if event_type == Some("aggTrade") {
        let price = data.get("p").and_then(value_f64);
        let size = data.get("q").and_then(value_f64);
        let timestamp = data.get("T").and_then(Value::as_i64);
        match (symbol, price, size, timestamp) {
            (Some(symbol), Some(price), Some(size), Some(timestamp)) => Some(StreamEvent::Trade {
                symbol,
                price,
                size,
                timestamp,
            }),
            _ => None,
        }
    } else {
        None
    };

    if event.is_none() {
        tracing::debug!(message = %text, "Ignoring stream message");
    }
    event.into_iter().collect()
}

fn parse_quote(data: &Value) -> Option<BidAsk> {
    Some(BidAsk {
        bid: data.get("b").and_then(value_f64)?,
        ask: data.get("a").and_then(value_f64)?,
    })
}
