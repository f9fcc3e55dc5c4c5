use crate::exchange::Connector;
use crate::models::{Contract, OrderId, OrderStatus};
use crate::settings::ReconciliationSettings;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of polling one order, delivered to the owning session
#[derive(Debug, Clone)]
pub enum ReconcileNotice {
    Filled {
        strategy_id: Uuid,
        status: OrderStatus,
    },
    /// `max_polls` queries went by without a fill
    Stuck {
        strategy_id: Uuid,
        order_id: OrderId,
        polls: u32,
    },
}

struct PendingOrder {
    strategy_id: Uuid,
    token: CancellationToken,
}

/// Polls unfilled orders until they fill
///
/// Each order gets its own task, keyed by order id and cancellable. Results
/// go back over a channel so trades are only ever patched by the session
/// that owns them.
pub struct OrderReconciler {
    connector: Arc<Connector>,
    interval: Duration,
    max_polls: Option<u32>,
    notices: mpsc::UnboundedSender<ReconcileNotice>,
    pending: HashMap<OrderId, PendingOrder>,
}

impl OrderReconciler {
    pub fn new(
        connector: Arc<Connector>,
        settings: &ReconciliationSettings,
        notices: mpsc::UnboundedSender<ReconcileNotice>,
    ) -> Self {
        Self {
            connector,
            interval: settings.poll_interval(),
            max_polls: settings.max_polls,
            notices,
            pending: HashMap::new(),
        }
    }

    /// Start polling `order_id`. Already-pending orders are left alone.
    pub fn schedule(&mut self, strategy_id: Uuid, contract: Contract, order_id: OrderId) {
        if self.pending.contains_key(&order_id) {
            return;
        }

        let token = CancellationToken::new();
        let task = PollTask {
            connector: Arc::clone(&self.connector),
            interval: self.interval,
            max_polls: self.max_polls,
            notices: self.notices.clone(),
            token: token.clone(),
            strategy_id,
            contract,
            order_id: order_id.clone(),
        };

        tracing::debug!(order_id = %order_id, "Scheduling order status poll");
        tokio::spawn(task.run());
        self.pending.insert(order_id, PendingOrder { strategy_id, token });
    }

    /// Forget an order after its notice has been handled
    pub fn complete(&mut self, order_id: &OrderId) {
        self.pending.remove(order_id);
    }

    pub fn cancel(&mut self, order_id: &OrderId) {
        if let Some(pending) = self.pending.remove(order_id) {
            pending.token.cancel();
        }
    }

    pub fn cancel_strategy(&mut self, strategy_id: Uuid) {
        self.pending.retain(|_, pending| {
            if pending.strategy_id == strategy_id {
                pending.token.cancel();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.token.cancel();
        }
    }

    pub fn is_pending(&self, order_id: &OrderId) -> bool {
        self.pending.contains_key(order_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for OrderReconciler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

struct PollTask {
    connector: Arc<Connector>,
    interval: Duration,
    max_polls: Option<u32>,
    notices: mpsc::UnboundedSender<ReconcileNotice>,
    token: CancellationToken,
    strategy_id: Uuid,
    contract: Contract,
    order_id: OrderId,
}

impl PollTask {
    async fn run(self) {
        let mut polls = 0u32;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }

            polls += 1;
            let status = self.connector.query_order(&self.contract, &self.order_id).await;

            // Cancelled while the query was in flight
            if self.token.is_cancelled() {
                return;
            }

            match status {
                Some(status) if status.has_fill_price() => {
                    tracing::info!(
                        order_id = %self.order_id,
                        avg_price = status.avg_price,
                        executed_qty = status.executed_qty,
                        "Order filled"
                    );
                    let _ = self.notices.send(ReconcileNotice::Filled {
                        strategy_id: self.strategy_id,
                        status,
                    });
                    return;
                }
                Some(status) => {
                    tracing::debug!(order_id = %self.order_id, state = ?status.state, polls, "Order fill not confirmed yet");
                }
                None => {
                    tracing::debug!(order_id = %self.order_id, polls, "Order status unavailable");
                }
            }

            if self.max_polls.is_some_and(|max| polls >= max) {
                tracing::warn!(order_id = %self.order_id, polls, "Order still unfilled, giving up");
                let _ = self.notices.send(ReconcileNotice::Stuck {
                    strategy_id: self.strategy_id,
                    order_id: self.order_id,
                    polls,
                });
                return;
            }
        }
    }
}
