use std::time::Duration;

use common::{api::error::NodeApiError, ln::hashes::PaymentHash};
use futures::stream::{self, Stream};
use tokio::sync::watch;

use super::Invoice;

/// A watcher over a single invoice.
///
/// - The first snapshot delivered is the invoice's state at (or after)
///   subscription time, so a subscriber never misses the current state.
/// - Snapshots are delivered in commit order and never repeat. Intermediate
///   snapshots may be coalesced if the subscriber falls behind.
/// - The snapshot in which the invoice resolves is always delivered, after
///   which the subscription ends.
///
/// Subscribing before the invoice exists is allowed; the first snapshot
/// arrives once it is created.
pub struct InvoiceSubscription {
    id: PaymentHash,
    rx: watch::Receiver<Option<Invoice>>,
    last_revision: Option<u64>,
    finished: bool,
    wait_timeout: Duration,
}

impl InvoiceSubscription {
    pub(super) fn new(
        id: PaymentHash,
        rx: watch::Receiver<Option<Invoice>>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            id,
            rx,
            last_revision: None,
            finished: false,
            wait_timeout,
        }
    }

    pub fn id(&self) -> PaymentHash {
        self.id
    }

    /// Whether the resolving snapshot has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The next snapshot, waiting at most the manager's default timeout.
    /// `Ok(None)` once the subscription has ended.
    pub async fn next(&mut self) -> Result<Option<Invoice>, NodeApiError> {
        self.next_timeout(self.wait_timeout).await
    }

    /// The next snapshot, waiting at most `timeout`.
    pub async fn next_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Invoice>, NodeApiError> {
        let id = self.id;
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| {
                NodeApiError::timeout(format!(
                    "No update for invoice {id} within {timeout:?}"
                ))
            })
    }

    /// Skip snapshots until one satisfies `pred`. Fails if the subscription
    /// ends first or nothing matches within `timeout`.
    pub async fn wait_for(
        &mut self,
        timeout: Duration,
        mut pred: impl FnMut(&Invoice) -> bool,
    ) -> Result<Invoice, NodeApiError> {
        let id = self.id;
        let wait = async {
            while let Some(invoice) = self.recv().await {
                if pred(&invoice) {
                    return Ok(invoice);
                }
            }
            Err(NodeApiError::invalid_state(format!(
                "Invoice {id} resolved without reaching the awaited state"
            )))
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            NodeApiError::timeout(format!(
                "Invoice {id} didn't reach the awaited state within \
                 {timeout:?}"
            ))
        })?
    }

    /// Consume the subscription as a [`Stream`] of snapshots without a
    /// per-item timeout.
    pub fn into_stream(self) -> impl Stream<Item = Invoice> + Send {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|invoice| (invoice, sub))
        })
    }

    async fn recv(&mut self) -> Option<Invoice> {
        if self.finished {
            return None;
        }

        loop {
            let snapshot = self.rx.borrow_and_update().clone();
            if let Some(invoice) = snapshot {
                let is_new = self
                    .last_revision
                    .is_none_or(|last| invoice.revision > last);
                if is_new {
                    self.last_revision = Some(invoice.revision);
                    if invoice.is_resolved() {
                        self.finished = true;
                    }
                    return Some(invoice);
                }
            }

            // The sender only goes away with the manager.
            if self.rx.changed().await.is_err() {
                self.finished = true;
                return None;
            }
        }
    }
}
