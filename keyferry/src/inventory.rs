//! Collects every target-platform key across the user's orders.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::InventoryConfig;
use crate::keys::{KeyRecord, OrderRef};
use crate::remote::{KeySourceClient, RemoteError};
use crate::session::Session;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("{failed} of {total} orders failed to load (at most {tolerated} tolerated)")]
    PartialFailureThresholdExceeded {
        failed: usize,
        total: usize,
        tolerated: usize,
    },

    #[error("key source session expired while loading orders")]
    SessionExpired,

    #[error("could not list orders: {0}")]
    ListingFailed(String),

    #[error("order loading cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct OrderFailure {
    pub order_id: String,
    pub error: RemoteError,
}

/// Every key found, ordered by order listing position then position in
/// the order.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub keys: Vec<KeyRecord>,
    pub orders_total: usize,
    pub failed_orders: Vec<OrderFailure>,
}

enum OrderFetch {
    Loaded(usize, Vec<KeyRecord>),
    Failed(OrderRef, RemoteError),
    /// Never dispatched because loading was stopped.
    Skipped,
}

pub struct InventoryAggregator {
    client: Arc<dyn KeySourceClient>,
    config: InventoryConfig,
    only: Option<HashSet<String>>,
}

impl InventoryAggregator {
    pub fn new(client: Arc<dyn KeySourceClient>, config: InventoryConfig) -> Self {
        Self {
            client,
            config,
            only: None,
        }
    }

    /// Load only these orders. Listing positions are kept.
    pub fn restrict_to(mut self, order_ids: impl IntoIterator<Item = String>) -> Self {
        self.only = Some(order_ids.into_iter().collect());
        self
    }

    /// Fetch all order details with bounded concurrency.
    ///
    /// A rejected session stops new dispatch and fails the whole fetch.
    /// Other failures are tolerated up to `max_failed_orders`.
    #[instrument(skip_all)]
    pub async fn fetch_all_keys(
        &self,
        session: Arc<Session>,
        cancel: &CancellationToken,
    ) -> Result<Inventory, AggregationError> {
        let orders = match self.client.list_orders(&session).await {
            Ok(orders) => orders,
            Err(RemoteError::Unauthorized) => {
                session.mark_expired();
                return Err(AggregationError::SessionExpired);
            }
            Err(e) => return Err(AggregationError::ListingFailed(e.to_string())),
        };
        session.mark_in_use();

        let orders: Vec<OrderRef> = match &self.only {
            Some(only) => orders.into_iter().filter(|o| only.contains(&o.id)).collect(),
            None => orders,
        };
        let total = orders.len();
        info!(orders = total, "Loading order details");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let stop = cancel.child_token();
        let mut tasks = JoinSet::new();

        for order in orders {
            let client = self.client.clone();
            let session = session.clone();
            let semaphore = semaphore.clone();
            let stop = stop.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = stop.cancelled() => return OrderFetch::Skipped,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return OrderFetch::Skipped,
                    },
                };
                if stop.is_cancelled() {
                    return OrderFetch::Skipped;
                }

                match client.fetch_order(&session, &order).await {
                    Ok(keys) => OrderFetch::Loaded(order.position, keys),
                    Err(e) => OrderFetch::Failed(order, e),
                }
            });
        }

        let mut loaded: Vec<(usize, Vec<KeyRecord>)> = Vec::with_capacity(total);
        let mut failed: Vec<OrderFailure> = Vec::new();
        let mut session_expired = false;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(OrderFetch::Loaded(position, keys)) => {
                    debug!(position, keys = keys.len(), "Order loaded");
                    loaded.push((position, keys));
                }
                Ok(OrderFetch::Failed(order, RemoteError::Unauthorized)) => {
                    if !session_expired {
                        warn!(order = %order.id, "Session rejected, stopping order dispatch");
                    }
                    session_expired = true;
                    session.mark_expired();
                    stop.cancel();
                }
                Ok(OrderFetch::Failed(order, error)) => {
                    warn!(order = %order.id, error = %error, "Failed to load order");
                    failed.push(OrderFailure {
                        order_id: order.id,
                        error,
                    });
                    if failed.len() > self.config.max_failed_orders {
                        stop.cancel();
                    }
                }
                Ok(OrderFetch::Skipped) => {}
                Err(e) => {
                    warn!(error = %e, "Order task panicked");
                    failed.push(OrderFailure {
                        order_id: String::new(),
                        error: RemoteError::Protocol(e.to_string()),
                    });
                    if failed.len() > self.config.max_failed_orders {
                        stop.cancel();
                    }
                }
            }
        }

        if session_expired {
            return Err(AggregationError::SessionExpired);
        }
        if failed.len() > self.config.max_failed_orders {
            return Err(AggregationError::PartialFailureThresholdExceeded {
                failed: failed.len(),
                total,
                tolerated: self.config.max_failed_orders,
            });
        }
        if cancel.is_cancelled() {
            return Err(AggregationError::Cancelled);
        }

        loaded.sort_by_key(|(position, _)| *position);
        let keys: Vec<KeyRecord> = loaded.into_iter().flat_map(|(_, keys)| keys).collect();

        info!(
            keys = keys.len(),
            orders = total,
            failed = failed.len(),
            "Inventory loaded"
        );
        Ok(Inventory {
            keys,
            orders_total: total,
            failed_orders: failed,
        })
    }
}
