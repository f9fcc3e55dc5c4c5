use super::rest::{encode_query, flexible_f64_or_zero, RestClient};
use super::signing::bitmex_signature;
use super::{Channel, Credentials, StreamEvent};
use crate::error::{Error, Result};
use crate::models::precision::step_decimals;
use crate::models::{
    Balance, BidAsk, Candle, Contract, DerivativeTerms, ExchangeKind, MarginBalance, OrderId,
    OrderState, OrderStatus, OrderType, Side, TimeInForce, Timeframe,
};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const SIGNATURE_TTL_SECS: i64 = 5;
const BUCKET_COUNT: u32 = 500;

/// Scale applied to amounts reported in an asset's smallest unit
pub fn settlement_scale(currency: &str) -> f64 {
    match currency {
        "XBt" => 1e-8,
        "USDt" => 1e-6,
        _ => 1.0,
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    root_symbol: String,
    quote_currency: String,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    tick_size: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    lot_size: f64,
    #[serde(default)]
    is_inverse: bool,
    #[serde(default)]
    is_quanto: bool,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    multiplier: f64,
    #[serde(default)]
    settl_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Margin {
    currency: String,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    init_margin: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    maint_margin: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    margin_balance: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    wallet_balance: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    unrealised_pnl: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quote {
    #[serde(default)]
    bid_price: Option<f64>,
    #[serde(default)]
    ask_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Bucket {
    timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    open: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    high: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    low: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    close: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    #[serde(rename = "orderID")]
    order_id: String,
    ord_status: String,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    avg_px: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    cum_qty: f64,
}

impl OrderResponse {
    fn into_status(self) -> Result<OrderStatus> {
        Ok(OrderStatus {
            order_id: OrderId(self.order_id),
            state: parse_order_state(&self.ord_status)?,
            avg_price: self.avg_px,
            executed_qty: self.cum_qty,
        })
    }
}

// ============== Implementation ==============

/// Bitmex REST client
#[derive(Clone)]
pub struct BitmexClient {
    rest: RestClient,
    credentials: Credentials,
}

impl BitmexClient {
    pub fn new(rest: RestClient, credentials: Credentials) -> Self {
        Self { rest, credentials }
    }

    async fn public_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = encode_query(params)?;
        self.rest.send(Method::GET, path, &query, HeaderMap::new()).await
    }

    async fn signed<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = encode_query(params)?;
        let expires = Utc::now().timestamp() + SIGNATURE_TTL_SECS;
        let signature = bitmex_signature(
            &self.credentials.api_secret,
            method.as_str(),
            path,
            &query,
            expires,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert("api-expires", HeaderValue::from(expires));
        headers.insert(
            "api-key",
            HeaderValue::from_str(&self.credentials.api_key)
                .map_err(|err| Error::Signing(err.to_string()))?,
        );
        headers.insert(
            "api-signature",
            HeaderValue::from_str(&signature).map_err(|err| Error::Signing(err.to_string()))?,
        );

        self.rest.send(method, path, &query, headers).await
    }

    /// GET /api/v1/instrument/active
    pub async fn fetch_contracts(&self) -> Result<Vec<Contract>> {
        let instruments: Vec<Instrument> = self.public_get("/api/v1/instrument/active", &[]).await?;

        let contracts = instruments
            .into_iter()
            .filter(|i| i.tick_size > 0.0 && i.lot_size > 0.0)
            .map(|i| {
                let settlement_asset = i.settl_currency.unwrap_or_else(|| "XBt".to_string());
                let multiplier = i.multiplier.abs() * settlement_scale(&settlement_asset);
                Contract {
                    symbol: i.symbol,
                    base_asset: i.root_symbol,
                    quote_asset: i.quote_currency,
                    tick_size: i.tick_size,
                    lot_size: i.lot_size,
                    price_decimals: step_decimals(i.tick_size),
                    quantity_decimals: step_decimals(i.lot_size),
                    exchange: ExchangeKind::Bitmex,
                    derivative: Some(DerivativeTerms {
                        inverse: i.is_inverse,
                        quanto: i.is_quanto,
                        multiplier,
                        settlement_asset,
                    }),
                }
            })
            .collect();

        Ok(contracts)
    }

    /// GET /api/v1/user/margin?currency=all, amounts scaled to whole units
    pub async fn fetch_balances(&self) -> Result<HashMap<String, Balance>> {
        let margins: Vec<Margin> = self
            .signed(Method::GET, "/api/v1/user/margin", &[("currency", "all".to_string())])
            .await?;

        let balances = margins
            .into_iter()
            .map(|m| {
                let scale = settlement_scale(&m.currency);
                let balance = Balance::Margin(MarginBalance {
                    initial_margin: m.init_margin * scale,
                    maintenance_margin: m.maint_margin * scale,
                    margin_balance: m.margin_balance * scale,
                    wallet_balance: m.wallet_balance * scale,
                    unrealized_pnl: m.unrealised_pnl * scale,
                });
                (m.currency, balance)
            })
            .collect();

        Ok(balances)
    }

    pub async fn fetch_bid_ask(&self, symbol: &str) -> Result<BidAsk> {
        let quotes: Vec<Quote> = self
            .public_get("/api/v1/instrument", &[("symbol", symbol.to_string())])
            .await?;
        let quote = quotes
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode(format!("no instrument data for {symbol}")))?;

        match (quote.bid_price, quote.ask_price) {
            (Some(bid), Some(ask)) => Ok(BidAsk { bid, ask }),
            _ => Err(Error::Decode(format!("no bid/ask for {symbol}"))),
        }
    }

    /// Trade buckets, oldest first, stamped at interval start
    pub async fn fetch_buckets(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let Some(bin_size) = bin_size(timeframe) else {
            tracing::warn!(
                symbol = %symbol,
                timeframe = %timeframe,
                "Bitmex has no bucketed trades for this timeframe"
            );
            return Ok(Vec::new());
        };

        let buckets: Vec<Bucket> = self
            .public_get(
                "/api/v1/trade/bucketed",
                &[
                    ("symbol", symbol.to_string()),
                    ("partial", "true".to_string()),
                    ("binSize", bin_size.to_string()),
                    ("count", BUCKET_COUNT.to_string()),
                    ("reverse", "true".to_string()),
                ],
            )
            .await?;

        let tf = timeframe.as_millis();
        let candles = buckets
            .into_iter()
            .rev()
            .map(|b| Candle {
                timestamp: b.timestamp.timestamp_millis() - tf,
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
            })
            .collect();

        Ok(candles)
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
            ("orderQty", quantity),
            ("ordType", order_type_param(order_type).to_string()),
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

        let response: OrderResponse = self.signed(Method::POST, "/api/v1/order", &params).await?;
        response.into_status()
    }

    /// DELETE /api/v1/order; the exchange answers with a list
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<OrderStatus> {
        let responses: Vec<OrderResponse> = self
            .signed(Method::DELETE, "/api/v1/order", &[("orderID", order_id.0.clone())])
            .await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode(format!("empty cancel response for {order_id}")))?
            .into_status()
    }

    /// Lists the symbol's orders newest first and picks `order_id`
    pub async fn query_order(&self, contract: &Contract, order_id: &OrderId) -> Result<OrderStatus> {
        let responses: Vec<OrderResponse> = self
            .signed(
                Method::GET,
                "/api/v1/order",
                &[
                    ("symbol", contract.symbol.clone()),
                    ("reverse", "true".to_string()),
                ],
            )
            .await?;
        responses
            .into_iter()
            .find(|o| o.order_id == order_id.0)
            .ok_or_else(|| Error::Decode(format!("order {order_id} not found")))?
            .into_status()
    }
}

fn bin_size(timeframe: Timeframe) -> Option<&'static str> {
    match timeframe {
        Timeframe::M1 => Some("1m"),
        Timeframe::M5 => Some("5m"),
        Timeframe::H1 => Some("1h"),
        _ => None,
    }
}

fn parse_order_state(status: &str) -> Result<OrderState> {
    match status {
        "New" => Ok(OrderState::New),
        "PartiallyFilled" => Ok(OrderState::PartiallyFilled),
        "Filled" => Ok(OrderState::Filled),
        "Canceled" | "Expired" => Ok(OrderState::Canceled),
        "Rejected" => Ok(OrderState::Rejected),
        other => Err(Error::Decode(format!("unknown order status {other}"))),
    }
}

fn side_param(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

fn order_type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "Market",
        OrderType::Limit => "Limit",
    }
}

fn tif_param(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::GoodTillCancel => "GoodTillCancel",
        TimeInForce::ImmediateOrCancel => "ImmediateOrCancel",
        TimeInForce::FillOrKill => "FillOrKill",
    }
}

// ============== Streaming ==============

fn table(channel: Channel) -> &'static str {
    match channel {
        Channel::BookTicker => "instrument",
        Channel::AggTrade => "trade",
    }
}

/// `{"op":"subscribe","args":["instrument:XBTUSD"]}`
pub fn subscribe_message(channel: Channel, symbols: &[String]) -> String {
    let args: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}:{}", table(channel), s))
        .collect();
    json!({ "op": "subscribe", "args": args }).to_string()
}

/// Decode one realtime message
///
/// Instrument updates may carry only one side of the book; `cached` supplies
/// the last known quote for the other side.
pub fn parse_stream_message(
    text: &str,
    cached: impl Fn(&str) -> Option<BidAsk>,
) -> Vec<StreamEvent> {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("Ignoring non-JSON stream message");
        return Vec::new();
    };

    let Some(rows) = message.get("data").and_then(Value::as_array) else {
        tracing::debug!(message = %text, "Ignoring stream message");
        return Vec::new();
    };

    match message.get("table").and_then(Value::as_str) {
        Some("instrument") => rows
            .iter()
            .filter_map(|row| {
                let symbol = row.get("symbol")?.as_str()?;
                let bid = row.get("bidPrice").and_then(Value::as_f64);
                let ask = row.get("askPrice").and_then(Value::as_f64);
                if bid.is_none() && ask.is_none() {
                    return None;
                }
                let previous = cached(symbol);
                let quote = BidAsk {
                    bid: bid.or(previous.map(|q| q.bid))?,
                    ask: ask.or(previous.map(|q| q.ask))?,
                };
                Some(StreamEvent::BookTicker {
                    symbol: symbol.to_string(),
                    quote,
                })
            })
            .collect(),
        Some("trade") => rows
            .iter()
            .filter_map(|row| {
                let timestamp = row
                    .get("timestamp")?
                    .as_str()?
                    .parse::<DateTime<Utc>>()
                    .ok()?
                    .timestamp_millis();
                Some(StreamEvent::Trade {
                    symbol: row.get("symbol")?.as_str()?.to_string(),
                    price: row.get("price")?.as_f64()?,
                    size: row.get("size")?.as_f64()?,
                    timestamp,
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}
