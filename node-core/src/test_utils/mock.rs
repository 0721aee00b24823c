use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use common::{
    api::error::NodeApiError,
    ln::{
        channel::ChannelId,
        hashes::{PaymentHash, PaymentSecret},
    },
    time::TimestampMs,
};
use futures::{StreamExt, stream};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    watch,
};

use crate::{
    client::{
        CandidateRoute, ChainTransaction, CreateHoldInvoice, FindRoutes,
        InvoiceEventStream, NodeClient, PaymentDetails, RouteDispatch,
        RouteOutcome, TerminalReason, TransientReason,
    },
    close::ClosedChannel,
    invoice::{HtlcAccepted, Invoice, InvoiceEvent},
    pathfinding::{PathfindingConfig, PathfindingConfigUpdate},
};

/// An in-memory Lightning node.
///
/// - Routes come from [`add_route`](Self::add_route), filtered by
///   destination.
/// - A dispatched route fails at the first channel marked with
///   [`fail_channel`](Self::fail_channel).
/// - Invoices added with [`add_invoice`](Self::add_invoice) settle as soon
///   as they're paid. Hold invoices hold the HTLC until they're settled or
///   canceled.
#[derive(Clone)]
pub struct MockNode {
    state: Arc<Mutex<MockState>>,
    events: broadcast::Sender<(PaymentHash, InvoiceEvent)>,
}

struct MockState {
    height: u32,
    routes: Vec<CandidateRoute>,
    failing: HashMap<ChannelId, TransientReason>,
    invoices: HashMap<PaymentHash, MockInvoice>,
    payment_requests: HashMap<String, PaymentDetails>,
    dispatched: Vec<RouteDispatch>,
    ignored_per_query: Vec<Vec<ChannelId>>,
    settle_calls: usize,
    next_htlc_index: u64,
    bogus_secrets: bool,
    stall_settles: bool,
    pathfinding: Option<PathfindingConfig>,
    pathfinding_delay: Duration,
    closed_channels: Vec<ClosedChannel>,
    chain_txs: Vec<ChainTransaction>,
}

struct MockInvoice {
    tokens: u64,
    /// Known up front for regular invoices; only on settle for hold
    /// invoices created with an explicit hash.
    secret: Option<PaymentSecret>,
    is_hold: bool,
    resolution: watch::Sender<Resolution>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Resolution {
    Open,
    Settled(PaymentSecret),
    Canceled,
}

impl MockNode {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        let state = MockState {
            height: 500,
            routes: Vec::new(),
            failing: HashMap::new(),
            invoices: HashMap::new(),
            payment_requests: HashMap::new(),
            dispatched: Vec::new(),
            ignored_per_query: Vec::new(),
            settle_calls: 0,
            next_htlc_index: 0,
            bogus_secrets: false,
            stall_settles: false,
            pathfinding: Some(PathfindingConfig::default()),
            pathfinding_delay: Duration::ZERO,
            closed_channels: Vec::new(),
            chain_txs: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn height(&self) -> u32 {
        self.lock().height
    }

    pub fn set_height(&self, height: u32) {
        self.lock().height = height;
    }

    pub fn add_route(&self, route: CandidateRoute) {
        self.lock().routes.push(route);
    }

    /// HTLCs forwarded over `channel_id` fail with `reason`.
    pub fn fail_channel(&self, channel_id: ChannelId, reason: TransientReason) {
        self.lock().failing.insert(channel_id, reason);
    }

    /// A regular invoice for `tokens`, settled by the first sufficient
    /// payment.
    pub fn add_invoice(&self, secret: PaymentSecret, tokens: u64) {
        let invoice = MockInvoice {
            tokens,
            secret: Some(secret),
            is_hold: false,
            resolution: watch::channel(Resolution::Open).0,
        };
        self.lock().invoices.insert(secret.compute_hash(), invoice);
    }

    pub fn add_payment_request(&self, request: &str, details: PaymentDetails) {
        self.lock()
            .payment_requests
            .insert(request.to_owned(), details);
    }

    /// Push a node-side event to every subscriber of invoice `id`.
    pub fn emit_invoice_event(&self, id: PaymentHash, event: InvoiceEvent) {
        // No subscribers is fine.
        let _ = self.events.send((id, event));
    }

    pub fn settle_calls(&self) -> usize {
        self.lock().settle_calls
    }

    /// Every route dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<RouteDispatch> {
        self.lock().dispatched.clone()
    }

    /// Make `settle_hold_invoice` hang forever, like an unresponsive node.
    pub fn set_stall_settles(&self, stall: bool) {
        self.lock().stall_settles = stall;
    }

    /// Report successes with a secret that doesn't match the payment hash.
    pub fn set_bogus_secrets(&self, bogus: bool) {
        self.lock().bogus_secrets = bogus;
    }

    /// Whether the node supports pathfinding settings at all.
    pub fn set_pathfinding_supported(&self, supported: bool) {
        self.lock().pathfinding =
            supported.then(PathfindingConfig::default);
    }

    /// How long settings updates take to apply.
    pub fn set_pathfinding_delay(&self, delay: Duration) {
        self.lock().pathfinding_delay = delay;
    }

    pub fn pathfinding_settings(&self) -> Option<PathfindingConfig> {
        self.lock().pathfinding.clone()
    }

    pub fn add_closed_channel(&self, channel: ClosedChannel) {
        self.lock().closed_channels.push(channel);
    }

    pub fn add_chain_transaction(&self, tx: ChainTransaction) {
        self.lock().chain_txs.push(tx);
    }

    /// The `ignore` list of every `find_routes` call so far.
    pub fn ignored_per_query(&self) -> Vec<Vec<ChannelId>> {
        self.lock().ignored_per_query.clone()
    }

    /// The secret of invoice `id`, if the node knows it.
    pub fn secret_for(&self, id: &PaymentHash) -> Option<PaymentSecret> {
        self.lock().invoices.get(id).and_then(|invoice| invoice.secret)
    }

    fn unsupported() -> NodeApiError {
        NodeApiError::unsupported("Node doesn't support pathfinding settings")
    }
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn get_height(&self) -> Result<u32, NodeApiError> {
        Ok(self.height())
    }

    async fn subscribe_invoice(
        &self,
        id: PaymentHash,
    ) -> Result<InvoiceEventStream, NodeApiError> {
        let rx = self.events.subscribe();
        let events = stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok((event_id, event)) if event_id == id =>
                        return Some((Ok(event), rx)),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }

    async fn create_hold_invoice(
        &self,
        req: CreateHoldInvoice,
    ) -> Result<Invoice, NodeApiError> {
        let (id, secret) = match req.id {
            Some(id) => (id, None),
            None => {
                let secret = PaymentSecret::generate()?;
                (secret.compute_hash(), Some(secret))
            }
        };

        let mut state = self.lock();
        if state.invoices.contains_key(&id) {
            return Err(NodeApiError::invalid_state(format!(
                "Invoice {id} already exists"
            )));
        }
        state.invoices.insert(
            id,
            MockInvoice {
                tokens: req.tokens,
                secret,
                is_hold: true,
                resolution: watch::channel(Resolution::Open).0,
            },
        );

        let mut invoice = Invoice::new(
            id,
            req.tokens,
            req.cltv_delta,
            TimestampMs::now(),
            state.height,
        );
        invoice.description = req.description;
        invoice.request = Some(format!("lnbcrt{}n1p{id}", req.tokens * 10));
        Ok(invoice)
    }

    async fn settle_hold_invoice(
        &self,
        secret: PaymentSecret,
    ) -> Result<(), NodeApiError> {
        let stall = self.lock().stall_settles;
        if stall {
            std::future::pending::<()>().await;
        }

        let id = secret.compute_hash();
        {
            let mut state = self.lock();
            let invoice = state.invoices.get_mut(&id).ok_or_else(|| {
                NodeApiError::not_found(format!("Unknown invoice {id}"))
            })?;
            if *invoice.resolution.borrow() == Resolution::Canceled {
                return Err(NodeApiError::invalid_state("Invoice canceled"));
            }
            invoice.secret = Some(secret);
            invoice.resolution.send_replace(Resolution::Settled(secret));
            state.settle_calls += 1;
        }
        self.emit_invoice_event(id, InvoiceEvent::Settled { secret });
        Ok(())
    }

    async fn cancel_hold_invoice(
        &self,
        id: PaymentHash,
    ) -> Result<(), NodeApiError> {
        {
            let state = self.lock();
            let invoice = state.invoices.get(&id).ok_or_else(|| {
                NodeApiError::not_found(format!("Unknown invoice {id}"))
            })?;
            if matches!(*invoice.resolution.borrow(), Resolution::Settled(_)) {
                return Err(NodeApiError::invalid_state("Invoice settled"));
            }
            invoice.resolution.send_replace(Resolution::Canceled);
        }
        self.emit_invoice_event(id, InvoiceEvent::Canceled);
        Ok(())
    }

    async fn decode_payment_request(
        &self,
        request: &str,
    ) -> Result<PaymentDetails, NodeApiError> {
        self.lock()
            .payment_requests
            .get(request)
            .cloned()
            .ok_or_else(|| {
                NodeApiError::not_found(format!("Can't decode '{request}'"))
            })
    }

    async fn find_routes(
        &self,
        req: FindRoutes,
    ) -> Result<Vec<CandidateRoute>, NodeApiError> {
        let mut state = self.lock();
        state.ignored_per_query.push(req.ignore.clone());
        let routes = state
            .routes
            .iter()
            .filter(|route| {
                route.hops.last().map(|hop| hop.public_key)
                    == Some(req.destination)
            })
            .filter(|route| {
                !route
                    .hops
                    .iter()
                    .any(|hop| req.ignore.contains(&hop.channel_id))
            })
            .cloned()
            .collect();
        Ok(routes)
    }

    async fn dispatch_route(
        &self,
        dispatch: RouteDispatch,
    ) -> Result<RouteOutcome, NodeApiError> {
        let incorrect = RouteOutcome::TerminalFailure {
            reason: TerminalReason::IncorrectPaymentDetails,
        };

        let mut resolution = {
            let mut state = self.lock();
            state.dispatched.push(dispatch.clone());

            let failure = dispatch.route.hops.iter().enumerate().find_map(
                |(hop, h)| {
                    state
                        .failing
                        .get(&h.channel_id)
                        .map(|reason| (hop, *reason))
                },
            );
            if let Some((hop, reason)) = failure {
                return Ok(RouteOutcome::TransientFailure { hop, reason });
            }

            let bogus_secrets = state.bogus_secrets;
            let height = state.height;
            let htlc_index = state.next_htlc_index;
            let Some(invoice) = state.invoices.get(&dispatch.id) else {
                return Ok(incorrect);
            };
            let delivered = dispatch.route.delivered_mtokens();
            let is_open = *invoice.resolution.borrow() == Resolution::Open;
            if !is_open || delivered < invoice.tokens.saturating_mul(1000) {
                return Ok(incorrect);
            }

            if !invoice.is_hold {
                let secret = invoice.secret.ok_or_else(|| {
                    NodeApiError::internal("Regular invoice without secret")
                })?;
                invoice.resolution.send_replace(Resolution::Settled(secret));
                let secret = if bogus_secrets {
                    PaymentSecret::new([0xff; 32])
                } else {
                    secret
                };
                return Ok(RouteOutcome::Success {
                    secret,
                    settled_at: Some(TimestampMs::now()),
                    hops: Some(dispatch.route.hops.clone()),
                });
            }

            let resolution = invoice.resolution.subscribe();
            let channel_id = dispatch
                .route
                .hops
                .last()
                .map(|hop| hop.channel_id)
                .ok_or_else(|| NodeApiError::internal("Empty route"))?;
            state.next_htlc_index += 1;
            drop(state);

            let accepted = HtlcAccepted {
                channel_id,
                htlc_index,
                mtokens: delivered,
                created_at: TimestampMs::now(),
                created_height: height,
                messages: dispatch.messages.clone(),
            };
            self.emit_invoice_event(
                dispatch.id,
                InvoiceEvent::HtlcAccepted(accepted),
            );
            resolution
        };

        // The HTLC is held until the payee decides.
        let resolved = *resolution
            .wait_for(|resolution| *resolution != Resolution::Open)
            .await
            .map_err(|_| NodeApiError::internal("Invoice dropped"))?;
        match resolved {
            Resolution::Settled(secret) => Ok(RouteOutcome::Success {
                secret,
                settled_at: Some(TimestampMs::now()),
                hops: Some(dispatch.route.hops),
            }),
            Resolution::Canceled | Resolution::Open =>
                Ok(RouteOutcome::TerminalFailure {
                    reason: TerminalReason::Canceled,
                }),
        }
    }

    async fn get_closed_channels(
        &self,
    ) -> Result<Vec<ClosedChannel>, NodeApiError> {
        Ok(self.lock().closed_channels.clone())
    }

    async fn get_chain_transactions(
        &self,
    ) -> Result<Vec<ChainTransaction>, NodeApiError> {
        Ok(self.lock().chain_txs.clone())
    }

    async fn get_pathfinding_settings(
        &self,
    ) -> Result<PathfindingConfig, NodeApiError> {
        self.lock().pathfinding.clone().ok_or_else(Self::unsupported)
    }

    async fn update_pathfinding_settings(
        &self,
        update: PathfindingConfigUpdate,
    ) -> Result<(), NodeApiError> {
        let delay = {
            let state = self.lock();
            if state.pathfinding.is_none() {
                return Err(Self::unsupported());
            }
            state.pathfinding_delay
        };
        tokio::time::sleep(delay).await;

        let mut state = self.lock();
        let merged = state
            .pathfinding
            .as_ref()
            .ok_or_else(Self::unsupported)?
            .merge(&update);
        state.pathfinding = Some(merged);
        Ok(())
    }
}
