use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use common::{
    api::error::NodeApiError,
    ln::{
        amount::tokens_from_mtokens,
        channel::ChannelId,
        hashes::{PaymentHash, PaymentSecret},
        node::NodePk,
        tlv::TlvRecord,
    },
    time::TimestampMs,
};
use futures::{StreamExt, stream::FuturesUnordered};
use tracing::{debug, info, instrument, warn};

use super::{
    PayConstraints, PaymentResult, PaymentTarget, RetryPolicy,
    route::{Hop, Route},
};
use crate::{
    client::{FindRoutes, NodeClient, PaymentDetails, RouteDispatch, RouteOutcome},
    pathfinding::PathfindingStore,
};

/// Pays targets over routes from the node, best-scoring first, retrying
/// transient failures within the [`RetryPolicy`].
pub struct PaymentExecutor<C> {
    client: Arc<C>,
    pathfinding: PathfindingStore<C>,
    policy: RetryPolicy,
}

/// A payment target resolved down to what route selection needs.
struct Resolved {
    destination: NodePk,
    id: PaymentHash,
    mtokens: u64,
    final_cltv_delta: u32,
    /// Set if the caller supplied the route.
    route: Option<Route>,
}

impl<C> Clone for PaymentExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            pathfinding: self.pathfinding.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<C: NodeClient> PaymentExecutor<C> {
    pub fn new(
        client: Arc<C>,
        pathfinding: PathfindingStore<C>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            pathfinding,
            policy,
        }
    }

    /// Pay `target` within `constraints`.
    ///
    /// Returns either the successful payment or a single terminal error.
    /// If the deadline elapses first this fails with `Timeout`, but any HTLC
    /// already dispatched stays on the wire and may still settle.
    #[instrument(skip_all, name = "(pay)")]
    pub async fn pay(
        &self,
        target: PaymentTarget,
        constraints: PayConstraints,
    ) -> Result<PaymentResult, NodeApiError> {
        let deadline = constraints.deadline.or(self.policy.deadline);
        let pay_fut = self.pay_inner(target, constraints);

        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, pay_fut)
                .await
                .map_err(|_| {
                    NodeApiError::timeout(format!(
                        "Payment didn't resolve within {deadline:?}"
                    ))
                })?,
            None => pay_fut.await,
        }
    }

    async fn pay_inner(
        &self,
        target: PaymentTarget,
        constraints: PayConstraints,
    ) -> Result<PaymentResult, NodeApiError> {
        let resolved = self.resolve(target, constraints.id).await?;
        info!(
            id = %resolved.id,
            destination = %resolved.destination,
            mtokens = resolved.mtokens,
            "Paying"
        );

        let routes = self.candidate_routes(&resolved, &constraints, &[]).await?;
        self.attempt_routes(&resolved, &constraints, routes).await
    }

    async fn resolve(
        &self,
        target: PaymentTarget,
        id_override: Option<PaymentHash>,
    ) -> Result<Resolved, NodeApiError> {
        let from_details = |details: PaymentDetails| Resolved {
            destination: details.destination,
            id: details.id,
            mtokens: details.mtokens,
            final_cltv_delta: details.cltv_delta,
            route: None,
        };

        let mut resolved = match target {
            PaymentTarget::Route { id, route } => {
                route.validate()?;
                let destination = route.destination().ok_or_else(|| {
                    NodeApiError::pathfinding_failed("Route has no hops")
                })?;
                Resolved {
                    destination,
                    id,
                    mtokens: route.delivered_mtokens(),
                    final_cltv_delta: 0,
                    route: Some(route),
                }
            }
            PaymentTarget::Details(details) => from_details(details),
            PaymentTarget::Request(request) => {
                let details =
                    self.client.decode_payment_request(&request).await?;
                from_details(details)
            }
        };

        if let Some(id) = id_override {
            resolved.id = id;
        }
        Ok(resolved)
    }

    /// Routes which satisfy `constraints` and avoid `ignore`, best-scoring
    /// first.
    async fn candidate_routes(
        &self,
        resolved: &Resolved,
        constraints: &PayConstraints,
        ignore: &[ChannelId],
    ) -> Result<Vec<Route>, NodeApiError> {
        let height = self.client.get_height().await?;

        if let Some(route) = &resolved.route {
            let final_timeout = route.hops.last().map_or(0, |hop| hop.timeout);
            if final_timeout <= height {
                return Err(NodeApiError::pathfinding_failed(format!(
                    "Route's final timeout {final_timeout} has already \
                     passed at height {height}"
                )));
            }
            check_constraints(route, constraints)?;
            return Ok(vec![route.clone()]);
        }

        let candidates = self
            .client
            .find_routes(FindRoutes {
                destination: resolved.destination,
                mtokens: resolved.mtokens,
                final_cltv_delta: resolved.final_cltv_delta,
                max_timeout_height: constraints.max_timeout_height,
                ignore: ignore.to_vec(),
            })
            .await?;

        let mut routes = Vec::with_capacity(candidates.len());
        let mut last_rejection = None;
        for candidate in &candidates {
            let result = Route::from_candidate(
                candidate,
                resolved.mtokens,
                resolved.final_cltv_delta,
                height,
            )
            .and_then(|route| {
                check_constraints(&route, constraints)?;
                Ok(route)
            });
            match result {
                Ok(route) => routes.push(route),
                Err(e) => {
                    debug!("Rejected candidate route: {e:#}");
                    last_rejection = Some(e);
                }
            }
        }

        if routes.is_empty() {
            return Err(last_rejection.unwrap_or_else(|| {
                NodeApiError::pathfinding_failed(format!(
                    "No route to {}",
                    resolved.destination
                ))
            }));
        }

        // Stable sort; equally scored routes keep the node's order.
        let now = TimestampMs::now();
        let mut scored = Vec::with_capacity(routes.len());
        for route in routes {
            let score = self.pathfinding.score_route(&route, now).await;
            scored.push((score, route));
        }
        scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));
        Ok(scored.into_iter().map(|(_, route)| route).collect())
    }

    /// Dispatch `routes` in order, keeping up to `max_parallel`
    /// channel-disjoint routes in flight, until one succeeds, the
    /// destination rejects the payment, or the budget runs out.
    ///
    /// A channel which fails a hop is dropped from every queued route. Once
    /// the queue drains, the node is asked again for routes avoiding every
    /// channel that failed so far.
    async fn attempt_routes(
        &self,
        resolved: &Resolved,
        constraints: &PayConstraints,
        routes: Vec<Route>,
    ) -> Result<PaymentResult, NodeApiError> {
        let max_attempts = self.policy.max_attempts;
        let max_parallel = self.policy.max_parallel.max(1);
        let messages = &constraints.messages;

        let mut queue = VecDeque::from(routes);
        let mut active = HashMap::<u32, Route>::new();
        let mut in_flight = FuturesUnordered::new();
        let mut backoff = self.policy.backoff.iter();
        let mut attempts = 0u32;
        let mut last_failure = None::<NodeApiError>;
        let mut failed_channels = Vec::<ChannelId>::new();
        let mut requery = false;

        loop {
            if requery
                && queue.is_empty()
                && in_flight.is_empty()
                && attempts < max_attempts
                && resolved.route.is_none()
            {
                requery = false;
                match self
                    .candidate_routes(resolved, constraints, &failed_channels)
                    .await
                {
                    Ok(routes) => queue.extend(routes),
                    Err(e) => debug!("No routes avoiding failed channels: {e:#}"),
                }
            }

            while in_flight.len() < max_parallel && attempts < max_attempts {
                let next = queue.iter().position(|route| {
                    active.values().all(|a| a.is_channel_disjoint(route))
                });
                let Some(route) = next.and_then(|idx| queue.remove(idx)) else {
                    break;
                };

                attempts += 1;
                let attempt = attempts;
                debug!(attempt, timeout = route.timeout, "Dispatching route");

                let dispatch = RouteDispatch {
                    id: resolved.id,
                    route: route.clone(),
                    messages: messages.clone(),
                };
                active.insert(attempt, route);
                let client = self.client.clone();
                in_flight.push(async move {
                    (attempt, client.dispatch_route(dispatch).await)
                });
            }

            let Some((attempt, result)) = in_flight.next().await else {
                break;
            };
            let Some(route) = active.remove(&attempt) else {
                continue;
            };

            let failure = match result {
                Ok(RouteOutcome::Success {
                    secret,
                    settled_at,
                    hops,
                }) =>
                    return self
                        .finish(
                            resolved,
                            route,
                            secret,
                            settled_at,
                            hops,
                            messages.clone(),
                        )
                        .await,
                Ok(RouteOutcome::TerminalFailure { reason }) => {
                    warn!(attempt, %reason, "Destination rejected payment");
                    return Err(NodeApiError::rejected_by_destination(reason));
                }
                Ok(RouteOutcome::TransientFailure { hop, reason }) => {
                    let now = TimestampMs::now();
                    if let Some(failed) = route.hops.get(hop) {
                        self.pathfinding
                            .record_failure(
                                failed.channel_id,
                                failed.public_key,
                                now,
                            )
                            .await;
                        warn!(
                            attempt,
                            channel = %failed.channel_id,
                            %reason,
                            "Route failed at hop {hop}"
                        );

                        let channel = failed.channel_id;
                        queue.retain(|queued| {
                            queued.channel_ids().all(|id| id != channel)
                        });
                        if !failed_channels.contains(&channel) {
                            failed_channels.push(channel);
                            requery = true;
                        }
                    }
                    NodeApiError::pathfinding_failed(format!(
                        "Hop {hop} failed: {reason}"
                    ))
                }
                Err(e) if e.kind.is_transient() => {
                    warn!(attempt, "Route dispatch failed: {e:#}");
                    e
                }
                Err(e) => return Err(e),
            };
            last_failure = Some(failure);

            let more_to_try =
                (!queue.is_empty() || requery) && attempts < max_attempts;
            if more_to_try && let Some(wait) = backoff.next() {
                tokio::time::sleep(wait).await;
            }
        }

        let detail = last_failure
            .map(|e| format!("; last failure: {}", e.msg))
            .unwrap_or_default();
        Err(NodeApiError::pathfinding_failed(format!(
            "No route succeeded after {attempts} attempt(s){detail}"
        )))
    }

    async fn finish(
        &self,
        resolved: &Resolved,
        route: Route,
        secret: PaymentSecret,
        settled_at: Option<TimestampMs>,
        hops: Option<Vec<Hop>>,
        messages: Vec<TlvRecord>,
    ) -> Result<PaymentResult, NodeApiError> {
        if !secret.matches(&resolved.id) {
            return Err(NodeApiError::internal(format!(
                "Node reported success for {} with a secret that doesn't \
                 match",
                resolved.id
            )));
        }

        let now = TimestampMs::now();
        self.pathfinding.record_success(&route, now).await;

        // Prefer the hops as the remote state confirmed them.
        let hops = match hops {
            Some(hops) if !hops.is_empty() => hops,
            _ => route.hops,
        };
        let fee_mtokens = hops.iter().map(|hop| hop.fee_mtokens).sum::<u64>();
        let mtokens = hops
            .last()
            .map_or(0, |hop| hop.forward_mtokens)
            .saturating_add(fee_mtokens);

        info!(id = %resolved.id, mtokens, fee_mtokens, "Payment succeeded");
        Ok(PaymentResult {
            destination: resolved.destination,
            id: resolved.id,
            mtokens,
            tokens: tokens_from_mtokens(mtokens),
            fee: tokens_from_mtokens(fee_mtokens),
            fee_mtokens,
            hops,
            confirmed_at: settled_at.unwrap_or(now),
            secret,
            messages,
        })
    }
}

fn check_constraints(
    route: &Route,
    constraints: &PayConstraints,
) -> Result<(), NodeApiError> {
    if let Some(max) = constraints.max_timeout_height
        && route.timeout > max
    {
        return Err(NodeApiError::pathfinding_failed(format!(
            "Route timeout {} exceeds max timeout height {max}",
            route.timeout
        )));
    }
    if let Some(max) = constraints.max_fee_mtokens
        && route.fee_mtokens > max
    {
        return Err(NodeApiError::pathfinding_failed(format!(
            "Route fee {} exceeds max fee {max}",
            route.fee_mtokens
        )));
    }
    Ok(())
}
