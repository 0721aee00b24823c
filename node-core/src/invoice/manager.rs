use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use common::{
    api::error::NodeApiError,
    ln::hashes::{PaymentHash, PaymentSecret},
    task::NamedTask,
    time::TimestampMs,
};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, info_span, instrument, warn};

use super::{Invoice, InvoiceEvent, InvoiceState, InvoiceSubscription, Transition};
use crate::{
    client::{CreateHoldInvoice, NodeClient},
    config::InvoiceConfig,
};

/// The cloneable entrypoint for creating, settling, canceling, and watching
/// hold invoices.
///
/// Every state change goes through three stages while holding that
/// invoice's lock, so concurrent events and commands for the same invoice
/// are applied one at a time against the latest state:
///
/// 1) Check: [`Invoice::check_event`], [`Invoice::check_settle`], or
///    [`Invoice::check_cancel`] validate the transition.
/// 2) Apply: commands which must reach the node (settle, cancel) are sent,
///    bounded by the configured wait timeout.
/// 3) Commit: the new snapshot is stored and published to subscribers.
///
/// Invoices never wait on each other. Reads and subscriptions only touch
/// the index briefly and never wait on a node call.
pub struct InvoiceManager<C> {
    client: Arc<C>,
    index: Arc<Mutex<HashMap<PaymentHash, Arc<InvoiceSlot>>>>,
    wait_timeout: Duration,
}

/// Per-invoice state. The channel holds `None` until the invoice is
/// created, which lets callers subscribe ahead of creation.
struct InvoiceSlot {
    tx: watch::Sender<Option<Invoice>>,
    /// Serializes check-apply-commit for this invoice.
    op_lock: tokio::sync::Mutex<()>,
}

impl<C> Clone for InvoiceManager<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            index: self.index.clone(),
            wait_timeout: self.wait_timeout,
        }
    }
}

impl<C: NodeClient> InvoiceManager<C> {
    pub fn new(client: Arc<C>, config: &InvoiceConfig) -> Self {
        Self {
            client,
            index: Arc::new(Mutex::new(HashMap::new())),
            wait_timeout: config.wait_timeout,
        }
    }

    /// Create a hold invoice on the node and start tracking it locally.
    #[instrument(skip_all, name = "(create-invoice)")]
    pub async fn create(
        &self,
        req: CreateHoldInvoice,
    ) -> Result<Invoice, NodeApiError> {
        // Hold the requested id's lock across the node call so two creates
        // for the same id can't both pass the existence check.
        let requested = req.id.map(|id| (id, self.slot(id)));
        let _requested_guard = match &requested {
            Some((id, slot)) => {
                let guard = slot.op_lock.lock().await;
                if slot.get().is_some() {
                    return Err(already_exists(id));
                }
                Some(guard)
            }
            None => None,
        };

        let invoice = self
            .node_call("create_hold_invoice", self.client.create_hold_invoice(req))
            .await?;
        if invoice.state != InvoiceState::Open || !invoice.htlcs.is_empty() {
            return Err(NodeApiError::internal(format!(
                "Node returned a new invoice in state {:?}",
                invoice.state
            )));
        }

        let slot = self.slot(invoice.id);
        let _generated_guard = match &requested {
            Some(_) => None,
            None => Some(slot.op_lock.lock().await),
        };
        if slot.get().is_some() {
            return Err(already_exists(&invoice.id));
        }

        info!(id = %invoice.id, tokens = invoice.tokens, "Created hold invoice");
        slot.commit(invoice.clone());
        Ok(invoice)
    }

    /// Apply a node-side event. Returns the invoice after the event.
    #[instrument(skip_all, name = "(invoice-event)", fields(%id))]
    pub async fn on_htlc_event(
        &self,
        id: PaymentHash,
        event: InvoiceEvent,
    ) -> Result<Invoice, NodeApiError> {
        let slot = self.existing_slot(&id)?;
        let _guard = slot.op_lock.lock().await;
        let current = slot.current(&id)?;

        match current.check_event(&event, TimestampMs::now())? {
            Transition::Changed(invoice) => {
                debug!(state = ?invoice.state, "Applied invoice event");
                slot.commit(invoice.clone());
                Ok(invoice)
            }
            Transition::Unchanged(why) => {
                debug!("Ignoring invoice event: {why}");
                Ok(current)
            }
        }
    }

    /// Release the held HTLCs by revealing `secret`.
    ///
    /// The secret is checked against `id` before anything is sent to the
    /// node. A `Timeout` error means the node didn't answer in time; the
    /// settle may still have gone through, so keep watching the invoice.
    #[instrument(skip_all, name = "(settle-invoice)", fields(%id))]
    pub async fn settle(
        &self,
        id: PaymentHash,
        secret: PaymentSecret,
    ) -> Result<Invoice, NodeApiError> {
        let slot = self.existing_slot(&id)?;
        let _guard = slot.op_lock.lock().await;
        let current = slot.current(&id)?;

        match current.check_settle(&secret, TimestampMs::now())? {
            Transition::Changed(invoice) => {
                self.node_call(
                    "settle_hold_invoice",
                    self.client.settle_hold_invoice(secret),
                )
                .await?;
                info!(
                    held_mtokens = current.held_mtokens(),
                    "Settled hold invoice"
                );
                slot.commit(invoice.clone());
                Ok(invoice)
            }
            Transition::Unchanged(why) => {
                debug!("Settle is a no-op: {why}");
                Ok(current)
            }
        }
    }

    /// Cancel the invoice, failing any held HTLCs back to the payer.
    #[instrument(skip_all, name = "(cancel-invoice)", fields(%id))]
    pub async fn cancel(&self, id: PaymentHash) -> Result<Invoice, NodeApiError> {
        let slot = self.existing_slot(&id)?;
        let _guard = slot.op_lock.lock().await;
        let current = slot.current(&id)?;

        match current.check_cancel(TimestampMs::now())? {
            Transition::Changed(invoice) => {
                self.node_call(
                    "cancel_hold_invoice",
                    self.client.cancel_hold_invoice(id),
                )
                .await?;
                info!("Canceled hold invoice");
                slot.commit(invoice.clone());
                Ok(invoice)
            }
            Transition::Unchanged(why) => {
                debug!("Cancel is a no-op: {why}");
                Ok(current)
            }
        }
    }

    /// The latest snapshot of invoice `id`, if it exists.
    pub async fn get(&self, id: &PaymentHash) -> Option<Invoice> {
        self.lock_index().get(id).and_then(|slot| slot.get())
    }

    /// Watch invoice `id`. See [`InvoiceSubscription`] for the delivery
    /// guarantees.
    pub async fn subscribe(&self, id: PaymentHash) -> InvoiceSubscription {
        let rx = self.slot(id).tx.subscribe();
        InvoiceSubscription::new(id, rx, self.wait_timeout)
    }

    /// Subscribe to the node's event feed for `id` and apply every event to
    /// the local invoice until it resolves.
    ///
    /// The node's feed only carries events that happen after it's
    /// established, so call this before handing out the payment request.
    pub async fn track(
        &self,
        id: PaymentHash,
    ) -> Result<NamedTask<()>, NodeApiError> {
        let mut events = self
            .node_call("subscribe_invoice", self.client.subscribe_invoice(id))
            .await?;
        let manager = self.clone();

        let task = NamedTask::spawn_named_with_span(
            "invoice tracker",
            info_span!("(invoice-tracker)", %id),
            async move {
                while let Some(result) = events.next().await {
                    let event = match result {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Invoice event feed failed: {e:#}");
                            break;
                        }
                    };
                    match manager.on_htlc_event(id, event).await {
                        Ok(invoice) if invoice.is_resolved() => break,
                        Ok(_) => (),
                        Err(e) => warn!("Couldn't apply invoice event: {e:#}"),
                    }
                }
                debug!("Invoice tracker finished");
            },
        );
        Ok(task)
    }

    /// Await a node call for at most the wait timeout.
    async fn node_call<T>(
        &self,
        name: &'static str,
        call: impl Future<Output = Result<T, NodeApiError>>,
    ) -> Result<T, NodeApiError> {
        let timeout = self.wait_timeout;
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            warn!("Node call {name} timed out");
            NodeApiError::timeout(format!(
                "Node didn't answer {name} within {timeout:?}"
            ))
        })?
    }

    fn lock_index(
        &self,
    ) -> MutexGuard<'_, HashMap<PaymentHash, Arc<InvoiceSlot>>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The slot for `id`, created empty if needed.
    fn slot(&self, id: PaymentHash) -> Arc<InvoiceSlot> {
        self.lock_index()
            .entry(id)
            .or_insert_with(|| {
                Arc::new(InvoiceSlot {
                    tx: watch::channel(None).0,
                    op_lock: tokio::sync::Mutex::new(()),
                })
            })
            .clone()
    }

    fn existing_slot(
        &self,
        id: &PaymentHash,
    ) -> Result<Arc<InvoiceSlot>, NodeApiError> {
        self.lock_index()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }
}

impl InvoiceSlot {
    fn get(&self) -> Option<Invoice> {
        self.tx.borrow().clone()
    }

    fn current(&self, id: &PaymentHash) -> Result<Invoice, NodeApiError> {
        self.get().ok_or_else(|| not_found(id))
    }

    /// Store and publish a validated snapshot.
    fn commit(&self, invoice: Invoice) {
        self.tx.send_replace(Some(invoice));
    }
}

fn not_found(id: &PaymentHash) -> NodeApiError {
    NodeApiError::not_found(format!("Unknown invoice {id}"))
}

fn already_exists(id: &PaymentHash) -> NodeApiError {
    NodeApiError::invalid_state(format!("Invoice {id} already exists"))
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use common::ln::{channel::ChannelId, tlv::TlvRecord};

    use super::*;
    use crate::{
        invoice::{HtlcAccepted, HtlcState},
        test_utils::MockNode,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn manager(node: &MockNode) -> InvoiceManager<MockNode> {
        InvoiceManager::new(Arc::new(node.clone()), &InvoiceConfig::default())
    }

    fn hold_req(secret: &PaymentSecret) -> CreateHoldInvoice {
        CreateHoldInvoice {
            tokens: 100,
            cltv_delta: 40,
            id: Some(secret.compute_hash()),
            description: None,
        }
    }

    fn accepted(htlc_index: u64) -> InvoiceEvent {
        InvoiceEvent::HtlcAccepted(HtlcAccepted {
            channel_id: ChannelId::new(443, 1, 0),
            htlc_index,
            mtokens: 100_000,
            created_at: TimestampMs::MIN,
            created_height: 500,
            messages: vec![TlvRecord::new(65537, vec![0, 0])],
        })
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_before_create_sees_every_state() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([1; 32]);
        let id = secret.compute_hash();

        let mut sub = manager.subscribe(id).await;
        manager.create(hold_req(&secret)).await.unwrap();
        manager.on_htlc_event(id, accepted(0)).await.unwrap();
        manager.settle(id, secret).await.unwrap();

        // Coalescing may skip intermediate snapshots, but the terminal one
        // always arrives and revisions strictly increase.
        let mut last_revision = None;
        let mut last = None;
        while let Some(invoice) = sub.next().await.unwrap() {
            assert!(last_revision < Some(invoice.revision));
            last_revision = Some(invoice.revision);
            last = Some(invoice);
        }
        let last = last.unwrap();
        assert_eq!(last.state, InvoiceState::Confirmed);
        assert!(sub.is_finished());
        assert_eq!(sub.next().await.unwrap(), None);
    }

    /// Two subscribers to one invoice each get their own ordered stream,
    /// even when one of them only reads at the end.
    #[tokio::test(start_paused = true)]
    async fn independent_subscribers_see_terminal_snapshot() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([11; 32]);
        let id = secret.compute_hash();

        let mut eager = manager.subscribe(id).await;
        let mut lagging = manager.subscribe(id).await;

        manager.create(hold_req(&secret)).await.unwrap();
        let open = eager.next().await.unwrap().unwrap();
        assert_eq!(open.state, InvoiceState::Open);

        manager.on_htlc_event(id, accepted(0)).await.unwrap();
        let held_one = eager.next().await.unwrap().unwrap();
        assert_eq!(held_one.htlcs.len(), 1);

        manager.on_htlc_event(id, accepted(1)).await.unwrap();
        let held_two = eager.next().await.unwrap().unwrap();
        assert_eq!(held_two.htlcs.len(), 2);
        assert_eq!(held_two.state, InvoiceState::Held);

        manager.settle(id, secret).await.unwrap();
        let confirmed = eager.next().await.unwrap().unwrap();
        assert_eq!(confirmed.state, InvoiceState::Confirmed);
        assert_eq!(eager.next().await.unwrap(), None);

        let revisions = [&open, &held_one, &held_two, &confirmed]
            .map(|invoice| invoice.revision);
        assert!(revisions.windows(2).all(|w| w[0] < w[1]));

        // The lagging reader skips straight to the latest snapshot.
        let caught_up = lagging.next().await.unwrap().unwrap();
        assert_eq!(caught_up, confirmed);
        assert_eq!(lagging.next().await.unwrap(), None);
        assert!(lagging.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_after_resolution() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([12; 32]);
        let id = secret.compute_hash();
        manager.create(hold_req(&secret)).await.unwrap();

        let stream = manager.subscribe(id).await.into_stream();
        manager.on_htlc_event(id, accepted(0)).await.unwrap();
        manager.cancel(id).await.unwrap();

        let snapshots = tokio::time::timeout(WAIT, stream.collect::<Vec<_>>())
            .await
            .unwrap();
        let last = snapshots.last().unwrap();
        assert_eq!(last.state, InvoiceState::Canceled);
        assert!(snapshots.iter().all(|invoice| invoice.id == id));
    }

    /// A node that never answers a settle holds up only that invoice, and
    /// only until the wait timeout.
    #[tokio::test(start_paused = true)]
    async fn stuck_settle_leaves_other_invoices_alone() {
        let node = MockNode::new();
        let manager = manager(&node);
        let stuck = PaymentSecret::new([13; 32]);
        let other = PaymentSecret::new([14; 32]);
        let (stuck_id, other_id) = (stuck.compute_hash(), other.compute_hash());
        for secret in [&stuck, &other] {
            manager.create(hold_req(secret)).await.unwrap();
            manager
                .on_htlc_event(secret.compute_hash(), accepted(0))
                .await
                .unwrap();
        }
        node.set_stall_settles(true);

        let settling = tokio::spawn({
            let manager = manager.clone();
            async move { manager.settle(stuck_id, stuck).await }
        });
        tokio::task::yield_now().await;

        let instant = Duration::from_millis(1);
        let held = tokio::time::timeout(instant, manager.get(&other_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.state, InvoiceState::Held);
        let canceled = tokio::time::timeout(instant, manager.cancel(other_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(canceled.state, InvoiceState::Canceled);
        let mut sub = tokio::time::timeout(instant, manager.subscribe(stuck_id))
            .await
            .unwrap();
        assert_eq!(
            sub.next().await.unwrap().unwrap().state,
            InvoiceState::Held
        );

        let err = settling.await.unwrap().unwrap_err();
        assert_eq!(err.reason(), "Timeout");
        let still_held = manager.get(&stuck_id).await.unwrap();
        assert_eq!(still_held.state, InvoiceState::Held);
        assert_eq!(node.settle_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn create_duplicate_id_fails() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([2; 32]);

        manager.create(hold_req(&secret)).await.unwrap();
        let err = manager.create(hold_req(&secret)).await.unwrap_err();
        assert_eq!(err.reason(), "InvalidState");
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_secret_never_reaches_node() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([3; 32]);
        let id = secret.compute_hash();
        manager.create(hold_req(&secret)).await.unwrap();
        manager.on_htlc_event(id, accepted(0)).await.unwrap();

        let wrong = PaymentSecret::new([4; 32]);
        let err = manager.settle(id, wrong).await.unwrap_err();
        assert_eq!(err.reason(), "InvalidSecret");
        assert_eq!(node.settle_calls(), 0);

        let invoice = manager.get(&id).await.unwrap();
        assert_eq!(invoice.state, InvoiceState::Held);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_blocks_settle() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([5; 32]);
        let id = secret.compute_hash();
        manager.create(hold_req(&secret)).await.unwrap();
        manager.on_htlc_event(id, accepted(0)).await.unwrap();

        let canceled = manager.cancel(id).await.unwrap();
        assert_eq!(canceled.state, InvoiceState::Canceled);
        assert_eq!(canceled.htlcs[0].state, HtlcState::Canceled);

        let again = manager.cancel(id).await.unwrap();
        assert_eq!(again, canceled);

        let err = manager.settle(id, secret).await.unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_invoice_is_not_found() {
        let node = MockNode::new();
        let manager = manager(&node);
        let id = PaymentSecret::new([6; 32]).compute_hash();

        let err = manager.on_htlc_event(id, accepted(0)).await.unwrap_err();
        assert_eq!(err.code(), 404);
        let err = manager.cancel(id).await.unwrap_err();
        assert_eq!(err.code(), 404);
        assert!(manager.get(&id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn next_times_out_without_updates() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([7; 32]);
        let id = secret.compute_hash();
        manager.create(hold_req(&secret)).await.unwrap();

        let mut sub = manager.subscribe(id).await;
        let open = sub.next().await.unwrap().unwrap();
        assert_eq!(open.state, InvoiceState::Open);

        let err = sub.next_timeout(WAIT).await.unwrap_err();
        assert_eq!(err.reason(), "Timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_applies_node_events() {
        let node = MockNode::new();
        let manager = manager(&node);
        let secret = PaymentSecret::new([8; 32]);
        let id = secret.compute_hash();
        manager.create(hold_req(&secret)).await.unwrap();
        let tracker = manager.track(id).await.unwrap();

        let mut sub = manager.subscribe(id).await;
        node.emit_invoice_event(id, accepted(3));
        let held = sub
            .wait_for(WAIT, |invoice| invoice.state == InvoiceState::Held)
            .await
            .unwrap();
        assert_eq!(held.htlcs[0].htlc_index, 3);

        manager.settle(id, secret).await.unwrap();
        tokio::time::timeout(WAIT, tracker).await.unwrap().unwrap();
    }
}
