use super::binance::{self, BinanceClient, BinanceMarket};
use super::bitmex::{self, BitmexClient};
use super::rest::RestClient;
use super::subscriptions::BATCH_WARN_THRESHOLD;
use super::{Channel, Credentials, Endpoints, StreamEvent, SubscriptionSet};
use crate::error::{Error, Result};
use crate::market::PriceCache;
use crate::models::{
    Balance, BidAsk, Candle, Contract, ExchangeKind, OrderId, OrderStatus, OrderType, Side,
    TimeInForce, Timeframe,
};
use crate::settings::RestSettings;
use reqwest::header::HeaderValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

enum Venue {
    Binance(BinanceClient),
    Bitmex(BitmexClient),
}

/// Uniform exchange interface over one account
///
/// REST operations never fail loudly: errors are logged and surface as
/// `None` (or an empty collection) meaning "did not happen". The stream
/// task is the only writer of stream-driven state (prices, outbound sink).
pub struct Connector {
    kind: ExchangeKind,
    venue: Venue,
    endpoints: Endpoints,
    prices: PriceCache,
    contracts: RwLock<HashMap<String, Contract>>,
    stream: Mutex<StreamState>,
    next_message_id: AtomicU64,
}

/// Subscription set and the sink of the live connection, updated together
#[derive(Default)]
struct StreamState {
    subscriptions: SubscriptionSet,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Connector {
    /// Build a connector, rejecting unusable credentials
    pub fn new(
        kind: ExchangeKind,
        credentials: Credentials,
        endpoints: Endpoints,
        rest: &RestSettings,
    ) -> Result<Self> {
        validate_credentials(&credentials)?;

        let client = RestClient::new(&endpoints.rest, rest)?;
        let venue = match kind {
            ExchangeKind::BinanceFutures => {
                Venue::Binance(BinanceClient::new(client, credentials, BinanceMarket::Futures))
            }
            ExchangeKind::BinanceSpot => {
                Venue::Binance(BinanceClient::new(client, credentials, BinanceMarket::Spot))
            }
            ExchangeKind::Bitmex => Venue::Bitmex(BitmexClient::new(client, credentials)),
        };

        tracing::info!(
            exchange = %kind,
            rest = %endpoints.rest,
            stream = %endpoints.stream,
            "Connector initialized"
        );

        Ok(Self {
            kind,
            venue,
            endpoints,
            prices: PriceCache::new(),
            contracts: RwLock::new(HashMap::new()),
            stream: Mutex::new(StreamState::default()),
            next_message_id: AtomicU64::new(1),
        })
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn stream_url(&self) -> &str {
        &self.endpoints.stream
    }

    /// Only margin accounts may open short positions
    pub fn supports_shorting(&self) -> bool {
        self.kind != ExchangeKind::BinanceSpot
    }

    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    fn log_failure(&self, operation: &str, err: &Error) {
        tracing::error!(
            exchange = %self.kind,
            operation,
            error = %err,
            "Exchange request failed"
        );
    }

    fn ok_or_log<T>(&self, operation: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.log_failure(operation, &err);
                None
            }
        }
    }

    // ============== Catalog ==============

    /// Fetch and cache the instrument catalog; empty on failure
    pub async fn fetch_contracts(&self) -> HashMap<String, Contract> {
        let result = match &self.venue {
            Venue::Binance(client) => client.fetch_contracts().await,
            Venue::Bitmex(client) => client.fetch_contracts().await,
        };

        let Some(list) = self.ok_or_log("fetch_contracts", result) else {
            return HashMap::new();
        };

        let contracts: HashMap<String, Contract> =
            list.into_iter().map(|c| (c.symbol.clone(), c)).collect();

        tracing::info!(
            exchange = %self.kind,
            count = contracts.len(),
            "Loaded contracts"
        );

        *self.contracts.write().unwrap_or_else(PoisonError::into_inner) = contracts.clone();
        contracts
    }

    pub fn contract(&self, symbol: &str) -> Option<Contract> {
        self.contracts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    pub fn contracts(&self) -> HashMap<String, Contract> {
        self.contracts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ============== Account ==============

    pub async fn fetch_balances(&self) -> Option<HashMap<String, Balance>> {
        let result = match &self.venue {
            Venue::Binance(client) => client.fetch_balances().await,
            Venue::Bitmex(client) => client.fetch_balances().await,
        };
        self.ok_or_log("fetch_balances", result)
    }

    /// Fetch the best bid/ask and store it in the price cache
    pub async fn fetch_bid_ask(&self, contract: &Contract) -> Option<BidAsk> {
        let result = match &self.venue {
            Venue::Binance(client) => client.fetch_bid_ask(&contract.symbol).await,
            Venue::Bitmex(client) => client.fetch_bid_ask(&contract.symbol).await,
        };
        let quote = self.ok_or_log("fetch_bid_ask", result)?;
        Some(self.prices.update(&contract.symbol, quote))
    }

    /// Recent candles, oldest first; empty on failure
    pub async fn fetch_historical_candles(
        &self,
        contract: &Contract,
        timeframe: Timeframe,
    ) -> Vec<Candle> {
        let result = match &self.venue {
            Venue::Binance(client) => client.fetch_klines(&contract.symbol, timeframe).await,
            Venue::Bitmex(client) => client.fetch_buckets(&contract.symbol, timeframe).await,
        };
        self.ok_or_log("fetch_historical_candles", result)
            .unwrap_or_default()
    }

    // ============== Orders ==============

    /// Submit an order; quantity and price are rounded to lot and tick size
    pub async fn place_order(
        &self,
        contract: &Contract,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        tif: Option<TimeInForce>,
    ) -> Option<OrderStatus> {
        let result = match &self.venue {
            Venue::Binance(client) => {
                client
                    .place_order(contract, side, order_type, quantity, price, tif)
                    .await
            }
            Venue::Bitmex(client) => {
                client
                    .place_order(contract, side, order_type, quantity, price, tif)
                    .await
            }
        };

        let status = self.ok_or_log("place_order", result)?;
        tracing::info!(
            exchange = %self.kind,
            symbol = %contract.symbol,
            order_id = %status.order_id,
            side = ?side,
            state = ?status.state,
            "Order placed"
        );
        Some(status)
    }

    pub async fn cancel_order(&self, contract: &Contract, order_id: &OrderId) -> Option<OrderStatus> {
        let result = match &self.venue {
            Venue::Binance(client) => client.cancel_order(contract, order_id).await,
            Venue::Bitmex(client) => client.cancel_order(order_id).await,
        };
        self.ok_or_log("cancel_order", result)
    }

    pub async fn query_order(&self, contract: &Contract, order_id: &OrderId) -> Option<OrderStatus> {
        let result = match &self.venue {
            Venue::Binance(client) => client.query_order(contract, order_id).await,
            Venue::Bitmex(client) => client.query_order(contract, order_id).await,
        };
        self.ok_or_log("query_order", result)
    }

    /// Position size for `balance_pct` percent of the funding balance
    ///
    /// `None` when balances are unavailable or hold no entry for the
    /// contract's funding asset.
    pub async fn compute_trade_size(
        &self,
        contract: &Contract,
        price: f64,
        balance_pct: f64,
    ) -> Option<f64> {
        if price <= 0.0 {
            return None;
        }

        let balances = self.fetch_balances().await?;
        let asset = contract.margin_asset();
        let Some(balance) = balances.get(asset) else {
            tracing::warn!(
                exchange = %self.kind,
                symbol = %contract.symbol,
                asset,
                "No balance for funding asset"
            );
            return None;
        };

        let budget = balance.available() * balance_pct / 100.0;
        let raw_size = match &contract.derivative {
            Some(terms) if terms.multiplier > 0.0 => {
                let contract_value = if terms.inverse {
                    terms.multiplier / price
                } else {
                    terms.multiplier * price
                };
                budget / contract_value
            }
            _ => budget / price,
        };

        let size = contract.round_quantity(raw_size)?;
        tracing::info!(
            exchange = %self.kind,
            symbol = %contract.symbol,
            asset,
            available = balance.available(),
            size,
            "Computed trade size"
        );
        Some(size)
    }

    // ============== Streaming ==============

    /// Subscribe symbols to a channel, skipping those already subscribed
    ///
    /// New subscriptions are sent immediately when the stream is connected
    /// and replayed on every reconnect.
    pub fn subscribe(&self, contracts: &[Contract], channel: Channel) {
        if contracts.len() > BATCH_WARN_THRESHOLD {
            tracing::warn!(
                exchange = %self.kind,
                channel = %channel,
                count = contracts.len(),
                "Subscribing to more than {} symbols at once will most likely fail",
                BATCH_WARN_THRESHOLD
            );
        }

        let symbols: Vec<&str> = contracts.iter().map(|c| c.symbol.as_str()).collect();
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let added = stream.subscriptions.add(channel, &symbols);
        if added.is_empty() {
            return;
        }
        if let Some(tx) = stream.outbound.as_ref() {
            self.send_subscribe(tx, channel, &added);
        }
    }

    pub fn subscriptions(&self) -> SubscriptionSet {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions
            .clone()
    }

    /// Install the sink of a fresh stream connection and replay every subscription
    pub fn attach_outbound(&self, tx: mpsc::UnboundedSender<String>) {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        for (channel, symbols) in stream.subscriptions.resubscribe_batches() {
            self.send_subscribe(&tx, channel, &symbols);
        }
        stream.outbound = Some(tx);
    }

    pub fn detach_outbound(&self) {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outbound = None;
    }

    fn send_subscribe(&self, tx: &mpsc::UnboundedSender<String>, channel: Channel, symbols: &[String]) {
        let message = match self.venue {
            Venue::Binance(_) => {
                let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
                binance::subscribe_message(channel, symbols, id)
            }
            Venue::Bitmex(_) => bitmex::subscribe_message(channel, symbols),
        };

        if tx.send(message).is_err() {
            tracing::debug!(exchange = %self.kind, "Stream writer gone, subscription deferred");
            return;
        }
        tracing::info!(
            exchange = %self.kind,
            channel = %channel,
            symbols = %symbols.join(","),
            "Subscribing"
        );
    }

    /// Decode an inbound stream message, updating the price cache
    pub fn handle_stream_message(&self, text: &str) -> Vec<StreamEvent> {
        let events = match self.venue {
            Venue::Binance(_) => binance::parse_stream_message(text),
            Venue::Bitmex(_) => bitmex::parse_stream_message(text, |symbol| self.prices.get(symbol)),
        };

        for event in &events {
            if let StreamEvent::BookTicker { symbol, quote } = event {
                self.prices.update(symbol, *quote);
            }
        }
        events
    }
}

fn validate_credentials(credentials: &Credentials) -> Result<()> {
    if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
        return Err(Error::Signing("API key and secret are required".to_string()));
    }
    HeaderValue::from_str(&credentials.api_key)
        .map_err(|_| Error::Signing("API key contains invalid characters".to_string()))?;
    Ok(())
}
