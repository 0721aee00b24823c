use std::collections::VecDeque;

use common::{
    ln::{channel::ChannelId, node::NodePk},
    time::TimestampMs,
};

use super::PathfindingConfig;
use crate::{constants::PPM, pay::route::Route};

/// Remembers recent payment attempt outcomes and turns them into hop
/// success probabilities.
///
/// - A failure puts a full penalty on the failing channel and its node.
/// - A success through a channel halves that channel's penalty.
/// - Penalties halve every `penalty_half_life_ms`.
/// - At most `max_payment_records` outcomes are kept; the oldest go first.
#[derive(Debug)]
pub struct MissionControl {
    records: VecDeque<PaymentRecord>,
    max_records: u64,
}

#[derive(Clone, Debug)]
enum PaymentRecord {
    Failure {
        channel_id: ChannelId,
        node: NodePk,
        at: TimestampMs,
    },
    Success {
        channel_id: ChannelId,
        at: TimestampMs,
    },
}

impl MissionControl {
    pub fn new(max_records: u64) -> Self {
        Self {
            records: VecDeque::new(),
            max_records,
        }
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    pub fn set_max_records(&mut self, max_records: u64) {
        self.max_records = max_records;
        self.evict();
    }

    pub fn record_failure(
        &mut self,
        channel_id: ChannelId,
        node: NodePk,
        at: TimestampMs,
    ) {
        self.records.push_back(PaymentRecord::Failure {
            channel_id,
            node,
            at,
        });
        self.evict();
    }

    pub fn record_success(
        &mut self,
        channels: impl IntoIterator<Item = ChannelId>,
        at: TimestampMs,
    ) {
        for channel_id in channels {
            self.records
                .push_back(PaymentRecord::Success { channel_id, at });
        }
        self.evict();
    }

    fn evict(&mut self) {
        let max = usize::try_from(self.max_records).unwrap_or(usize::MAX);
        while self.records.len() > max {
            self.records.pop_front();
        }
    }

    /// Current penalty on `channel_id`, in ppm.
    fn channel_penalty(
        &self,
        channel_id: ChannelId,
        half_life_ms: u64,
        now: TimestampMs,
    ) -> u64 {
        let mut penalty = Penalty::default();
        for record in &self.records {
            match record {
                PaymentRecord::Failure {
                    channel_id: id, at, ..
                } if *id == channel_id => penalty.add(*at),
                PaymentRecord::Success { channel_id: id, at }
                    if *id == channel_id =>
                    penalty.reduce(*at, half_life_ms),
                _ => (),
            }
        }
        penalty.decayed(now, half_life_ms)
    }

    /// Current penalty on `node`, in ppm.
    fn node_penalty(
        &self,
        node: &NodePk,
        half_life_ms: u64,
        now: TimestampMs,
    ) -> u64 {
        let mut penalty = Penalty::default();
        for record in &self.records {
            if let PaymentRecord::Failure { node: n, at, .. } = record
                && n == node
            {
                penalty.add(*at);
            }
        }
        penalty.decayed(now, half_life_ms)
    }

    /// Success probability of a single hop, in ppm.
    pub fn hop_probability(
        &self,
        config: &PathfindingConfig,
        channel_id: ChannelId,
        node: &NodePk,
        now: TimestampMs,
    ) -> u64 {
        let half_life = config.penalty_half_life_ms;
        let baseline = config.baseline_success_rate.min(PPM);
        let channel_penalty = self.channel_penalty(channel_id, half_life, now);
        let node_penalty = self.node_penalty(node, half_life, now)
            * config.node_ignore_rate.min(PPM)
            / PPM;

        baseline * (PPM - channel_penalty) / PPM * (PPM - node_penalty) / PPM
    }

    /// Success probability of the whole route: the product of its hops'.
    pub fn route_probability(
        &self,
        config: &PathfindingConfig,
        route: &Route,
        now: TimestampMs,
    ) -> f64 {
        route
            .hops
            .iter()
            .map(|hop| {
                let ppm = self.hop_probability(
                    config,
                    hop.channel_id,
                    &hop.public_key,
                    now,
                );
                ppm as f64 / PPM as f64
            })
            .product()
    }
}

/// A penalty in ppm which halves every half-life.
struct Penalty {
    undecayed: u64,
    last_updated: TimestampMs,
}

impl Default for Penalty {
    fn default() -> Self {
        Self {
            undecayed: 0,
            last_updated: TimestampMs::MIN,
        }
    }
}

impl Penalty {
    /// A fresh failure is a full penalty.
    fn add(&mut self, at: TimestampMs) {
        self.undecayed = PPM;
        self.last_updated = at;
    }

    fn reduce(&mut self, at: TimestampMs, half_life_ms: u64) {
        self.undecayed = self.decayed(at, half_life_ms) >> 1;
        self.last_updated = at;
    }

    fn decayed(&self, now: TimestampMs, half_life_ms: u64) -> u64 {
        let elapsed_ms = u64::try_from(
            now.saturating_duration_since(self.last_updated).as_millis(),
        )
        .unwrap_or(u64::MAX);
        elapsed_ms
            .checked_div(half_life_ms)
            .and_then(|decays| u32::try_from(decays).ok())
            .and_then(|decays| self.undecayed.checked_shr(decays))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bitcoin::secp256k1::SecretKey;

    use super::*;

    const HOUR_MS: u64 = 60 * 60 * 1000;

    fn node(byte: u8) -> NodePk {
        NodePk::from_secret_key(&SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    fn config() -> PathfindingConfig {
        PathfindingConfig {
            baseline_success_rate: 600_000,
            node_ignore_rate: 500_000,
            penalty_half_life_ms: HOUR_MS,
            max_payment_records: 10,
        }
    }

    fn at(ms: u64) -> TimestampMs {
        TimestampMs::MIN.checked_add(Duration::from_millis(ms)).unwrap()
    }

    #[test]
    fn untried_hop_gets_baseline() {
        let mc = MissionControl::new(10);
        let chan = ChannelId::new(1, 1, 0);
        assert_eq!(mc.hop_probability(&config(), chan, &node(1), at(0)), 600_000);
    }

    #[test]
    fn failure_penalty_halves_every_half_life() {
        let mut mc = MissionControl::new(10);
        let chan = ChannelId::new(1, 1, 0);
        let other = ChannelId::new(2, 1, 0);
        mc.record_failure(chan, node(1), at(0));

        // Fresh failure: the channel is ruled out entirely.
        assert_eq!(mc.hop_probability(&config(), chan, &node(1), at(0)), 0);

        // One half-life later: channel penalty 50%, node penalty 50% * 50%.
        let p = mc.hop_probability(&config(), chan, &node(1), at(HOUR_MS));
        assert_eq!(p, 600_000 / 2 * 3 / 4);

        // The node's penalty also taints its other channels.
        let p = mc.hop_probability(&config(), other, &node(1), at(HOUR_MS));
        assert_eq!(p, 600_000 * 3 / 4);

        // Long after, everything is forgiven.
        let p = mc.hop_probability(&config(), chan, &node(1), at(64 * HOUR_MS));
        assert_eq!(p, 600_000);
    }

    #[test]
    fn success_reduces_channel_penalty() {
        let mut mc = MissionControl::new(10);
        let chan = ChannelId::new(1, 1, 0);
        let config = PathfindingConfig {
            node_ignore_rate: 0,
            ..config()
        };
        mc.record_failure(chan, node(1), at(0));
        mc.record_success([chan], at(0));
        assert_eq!(mc.hop_probability(&config, chan, &node(1), at(0)), 300_000);
    }

    #[test]
    fn zero_half_life_forgets_immediately() {
        let mut mc = MissionControl::new(10);
        let chan = ChannelId::new(1, 1, 0);
        let config = PathfindingConfig {
            penalty_half_life_ms: 0,
            ..config()
        };
        mc.record_failure(chan, node(1), at(0));
        assert_eq!(mc.hop_probability(&config, chan, &node(1), at(0)), 600_000);
    }

    #[test]
    fn oldest_records_evicted() {
        let mut mc = MissionControl::new(2);
        let chan = ChannelId::new(1, 1, 0);
        mc.record_failure(chan, node(1), at(0));
        mc.record_success([ChannelId::new(2, 1, 0), ChannelId::new(3, 1, 0)], at(1));
        assert_eq!(mc.num_records(), 2);

        // The failure was evicted, so the channel scores as untried.
        let p = mc.hop_probability(&config(), chan, &node(1), at(1));
        assert_eq!(p, 600_000);

        mc.set_max_records(0);
        assert_eq!(mc.num_records(), 0);
    }
}
