//! Working out per-hop amounts and timeouts for a route.
//!
//! For a route of `n` hops paying `amount` with final CLTV delta `d` at
//! block height `h`:
//!
//! - `forward[n-1] = amount`, `fee[n-1] = 0`
//! - `forward[i] = forward[i+1] + fee[i+1]`
//! - `fee[i] = base_fee[i] + forward[i] * fee_rate[i] / 1_000_000`
//! - `timeout[n-1] = h + d`, `timeout[i] = timeout[i+1] + cltv_delta[i]`
//!
//! The sender pays `forward[0] + fee[0]` into the first channel.

use common::{
    api::error::NodeApiError,
    ln::{amount::tokens_from_mtokens, channel::ChannelId, node::NodePk},
};
use serde::{Deserialize, Serialize};

use crate::{client::CandidateRoute, constants::PPM};

/// A single hop of a fully computed route.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub channel_id: ChannelId,
    /// Channel capacity in tokens.
    pub channel_capacity: u64,
    /// The fee this hop's node charges, in tokens (rounded down).
    pub fee: u64,
    pub fee_mtokens: u64,
    /// Amount this hop's node forwards onward, in tokens (rounded down).
    pub forward: u64,
    pub forward_mtokens: u64,
    pub public_key: NodePk,
    /// Absolute CLTV expiry of the HTLC this hop's node receives.
    pub timeout: u32,
}

/// A fully computed route, ready to dispatch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub hops: Vec<Hop>,
    /// Total sent into the first channel, fees included.
    pub mtokens: u64,
    pub fee_mtokens: u64,
    /// The first hop's timeout; the latest height the sender's funds may be
    /// locked until.
    pub timeout: u32,
}

impl Route {
    /// Compute amounts and timeouts for a node-suggested route delivering
    /// `mtokens` with final CLTV delta `final_cltv_delta` at `height`.
    pub fn from_candidate(
        candidate: &CandidateRoute,
        mtokens: u64,
        final_cltv_delta: u32,
        height: u32,
    ) -> Result<Self, NodeApiError> {
        let n = candidate.hops.len();
        if n == 0 {
            return Err(NodeApiError::pathfinding_failed("Route has no hops"));
        }
        let overflow =
            || NodeApiError::pathfinding_failed("Route amounts overflow");

        let last_timeout =
            height.checked_add(final_cltv_delta).ok_or_else(overflow)?;

        // (forward_mtokens, fee_mtokens, timeout), filled back to front.
        let mut computed = vec![(0u64, 0u64, 0u32); n];
        computed[n - 1] = (mtokens, 0, last_timeout);
        for i in (0..n - 1).rev() {
            let (next_forward, next_fee, next_timeout) = computed[i + 1];
            let policy = &candidate.hops[i];

            let forward =
                next_forward.checked_add(next_fee).ok_or_else(overflow)?;
            let proportional = u128::from(forward)
                * u128::from(policy.fee_rate)
                / u128::from(PPM);
            let fee = u64::try_from(proportional)
                .ok()
                .and_then(|p| p.checked_add(policy.base_fee_mtokens))
                .ok_or_else(overflow)?;
            let timeout = next_timeout
                .checked_add(policy.cltv_delta)
                .ok_or_else(overflow)?;

            computed[i] = (forward, fee, timeout);
        }

        let hops = candidate
            .hops
            .iter()
            .zip(computed)
            .map(|(hop, (forward_mtokens, fee_mtokens, timeout))| Hop {
                channel_id: hop.channel_id,
                channel_capacity: hop.channel_capacity,
                fee: tokens_from_mtokens(fee_mtokens),
                fee_mtokens,
                forward: tokens_from_mtokens(forward_mtokens),
                forward_mtokens,
                public_key: hop.public_key,
                timeout,
            })
            .collect::<Vec<_>>();

        let fee_mtokens = hops
            .iter()
            .try_fold(0u64, |acc, hop| acc.checked_add(hop.fee_mtokens))
            .ok_or_else(overflow)?;
        let total = hops[0]
            .forward_mtokens
            .checked_add(hops[0].fee_mtokens)
            .ok_or_else(overflow)?;

        let route = Self {
            timeout: hops[0].timeout,
            hops,
            mtokens: total,
            fee_mtokens,
        };
        route.validate()?;
        Ok(route)
    }

    /// Check the route's internal consistency: the forwarding law, the
    /// fee-free final hop, non-increasing timeouts, and totals that add up.
    pub fn validate(&self) -> Result<(), NodeApiError> {
        let invalid = |msg: &str| {
            Err(NodeApiError::pathfinding_failed(format!(
                "Inconsistent route: {msg}"
            )))
        };

        let Some(last) = self.hops.last() else {
            return invalid("no hops");
        };
        if last.fee_mtokens != 0 {
            return invalid("final hop charges a fee");
        }
        for pair in self.hops.windows(2) {
            let (hop, next) = (&pair[0], &pair[1]);
            if Some(hop.forward_mtokens)
                != next.forward_mtokens.checked_add(next.fee_mtokens)
            {
                return invalid("forwarded amounts don't chain");
            }
            if hop.timeout < next.timeout {
                return invalid("timeouts increase along the route");
            }
        }

        let fee_sum = self
            .hops
            .iter()
            .try_fold(0u64, |acc, hop| acc.checked_add(hop.fee_mtokens));
        if fee_sum != Some(self.fee_mtokens) {
            return invalid("fee total doesn't match hops");
        }
        if last.forward_mtokens.checked_add(self.fee_mtokens)
            != Some(self.mtokens)
        {
            return invalid("total doesn't match delivered amount plus fees");
        }
        if self.timeout != self.hops[0].timeout {
            return invalid("route timeout isn't the first hop's timeout");
        }
        Ok(())
    }

    /// The node the route delivers to.
    pub fn destination(&self) -> Option<NodePk> {
        self.hops.last().map(|hop| hop.public_key)
    }

    /// The amount delivered to the destination.
    pub fn delivered_mtokens(&self) -> u64 {
        self.hops.last().map_or(0, |hop| hop.forward_mtokens)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.hops.iter().map(|hop| hop.channel_id)
    }

    /// Whether `self` and `other` share no channel.
    pub fn is_channel_disjoint(&self, other: &Route) -> bool {
        self.channel_ids()
            .all(|id| other.channel_ids().all(|other_id| other_id != id))
    }
}
