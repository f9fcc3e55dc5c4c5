use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Subscribing more symbols than this in one batch tends to fail silently
pub const BATCH_WARN_THRESHOLD: usize = 200;
/// Max symbols per message when resubscribing after reconnect
pub const RESUBSCRIBE_CHUNK: usize = 200;

/// Market data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    BookTicker,
    AggTrade,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::BookTicker, Channel::AggTrade];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::BookTicker => f.write_str("bookTicker"),
            Channel::AggTrade => f.write_str("aggTrade"),
        }
    }
}

/// Live (channel, symbol) subscriptions of one connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    channels: BTreeMap<Channel, BTreeSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record symbols for a channel, returning those not already present
    pub fn add<S: AsRef<str>>(&mut self, channel: Channel, symbols: &[S]) -> Vec<String> {
        let entry = self.channels.entry(channel).or_default();
        let mut added = Vec::new();
        for symbol in symbols {
            let symbol = symbol.as_ref();
            if entry.insert(symbol.to_string()) {
                added.push(symbol.to_string());
            }
        }
        added
    }

    pub fn contains(&self, channel: Channel, symbol: &str) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|symbols| symbols.contains(symbol))
    }

    pub fn symbols(&self, channel: Channel) -> Vec<String> {
        self.channels
            .get(&channel)
            .map(|symbols| symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.channels.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches to send after a reconnect: one per channel, chunked
    pub fn resubscribe_batches(&self) -> Vec<(Channel, Vec<String>)> {
        let mut batches = Vec::new();
        for (channel, symbols) in &self.channels {
            let symbols: Vec<String> = symbols.iter().cloned().collect();
            for chunk in symbols.chunks(RESUBSCRIBE_CHUNK) {
                batches.push((*channel, chunk.to_vec()));
            }
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_deduplicates() {
        let mut set = SubscriptionSet::new();

        let added = set.add(Channel::BookTicker, &["BTCUSDT", "ETHUSDT"]);
        assert_eq!(added, vec!["BTCUSDT", "ETHUSDT"]);

        let added = set.add(Channel::BookTicker, &["BTCUSDT", "SOLUSDT"]);
        assert_eq!(added, vec!["SOLUSDT"]);

        let added = set.add(Channel::AggTrade, &["BTCUSDT"]);
        assert_eq!(added, vec!["BTCUSDT"]);

        assert_eq!(set.len(), 4);
        assert!(set.contains(Channel::AggTrade, "BTCUSDT"));
        assert!(!set.contains(Channel::AggTrade, "ETHUSDT"));
    }

    #[test]
    fn test_resubscribe_batches_chunked() {
        let mut set = SubscriptionSet::new();
        let many: Vec<String> = (0..450).map(|i| format!("SYM{:03}", i)).collect();
        set.add(Channel::BookTicker, &many);
        set.add(Channel::AggTrade, &["BTCUSDT"]);

        let batches = set.resubscribe_batches();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].0, Channel::BookTicker);
        assert_eq!(batches[0].1.len(), 200);
        assert_eq!(batches[1].1.len(), 200);
        assert_eq!(batches[2].1.len(), 50);
        assert_eq!(batches[3], (Channel::AggTrade, vec!["BTCUSDT".to_string()]));
    }

    #[test]
    fn test_resubscribe_independent_of_request_order() {
        let mut a = SubscriptionSet::new();
        a.add(Channel::AggTrade, &["ETHUSDT"]);
        a.add(Channel::BookTicker, &["BTCUSDT", "ETHUSDT"]);

        let mut b = SubscriptionSet::new();
        b.add(Channel::BookTicker, &["ETHUSDT"]);
        b.add(Channel::AggTrade, &["ETHUSDT"]);
        b.add(Channel::BookTicker, &["BTCUSDT"]);

        assert_eq!(a.resubscribe_batches(), b.resubscribe_batches());
    }
}
