//! The `node-core` crate implements the payment side of a Lightning node on
//! top of a [`NodeClient`]: hold invoices, payment execution with retries,
//! pathfinding settings, and channel close reconciliation.

// Ignore this useless lint
#![allow(clippy::new_without_default)]

use std::sync::Arc;

use common::api::error::NodeApiError;

use crate::{
    client::NodeClient,
    close::ChannelCloses,
    config::CoreConfig,
    invoice::InvoiceManager,
    pathfinding::PathfindingStore,
    pay::{PaymentExecutor, RetryPolicy},
};

/// The interface to the underlying node, and the types it speaks.
pub mod client;
/// Closed channels and close output reconciliation.
pub mod close;
/// TOML configuration.
pub mod config;
/// Defaults.
pub mod constants;
/// Hold invoices.
pub mod invoice;
/// Pathfinding settings and payment outcome scoring.
pub mod pathfinding;
/// Paying.
pub mod pay;

/// `MockNode` and fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Everything the node core offers, wired to one [`NodeClient`].
pub struct NodeCore<C> {
    pub invoices: InvoiceManager<C>,
    pub payments: PaymentExecutor<C>,
    pub pathfinding: PathfindingStore<C>,
    pub closes: ChannelCloses<C>,
}

impl<C: NodeClient> NodeCore<C> {
    /// Loads the node's pathfinding settings, so this talks to the node.
    pub async fn init(
        client: Arc<C>,
        config: &CoreConfig,
    ) -> Result<Self, NodeApiError> {
        let pathfinding = PathfindingStore::load(client.clone()).await?;
        let payments = PaymentExecutor::new(
            client.clone(),
            pathfinding.clone(),
            RetryPolicy::from(&config.pay),
        );
        Ok(Self {
            invoices: InvoiceManager::new(client.clone(), &config.invoice),
            payments,
            pathfinding,
            closes: ChannelCloses::new(client, &config.reconcile),
        })
    }
}
