//! Route-scoring parameters bound to a node connection.
//!
//! The [`PathfindingStore`] mirrors the node's pathfinding settings. Reads
//! are lock-free snapshot loads; updates are serialized by a writer lock and
//! swap in a fully merged config, so a reader sees either the old or the new
//! config and never a mix. The store also keeps the [`MissionControl`]
//! penalty model the payment executor feeds and consults.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use common::{
    api::error::{NodeApiError, NodeErrorKind},
    ln::{channel::ChannelId, node::NodePk},
    time::TimestampMs,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::{
    client::NodeClient,
    constants::{
        DEFAULT_BASELINE_SUCCESS_RATE_PPM, DEFAULT_MAX_PAYMENT_RECORDS,
        DEFAULT_NODE_IGNORE_RATE_PPM, DEFAULT_PENALTY_HALF_LIFE_MS,
    },
    pay::route::Route,
};

/// The failure/success penalty model.
pub mod scoring;

pub use scoring::MissionControl;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PathfindingConfig {
    /// Assumed success probability of an untried hop, in ppm.
    pub baseline_success_rate: u64,
    /// Weight of a node's recent failures, in ppm.
    pub node_ignore_rate: u64,
    pub penalty_half_life_ms: u64,
    pub max_payment_records: u64,
}

/// A partial [`PathfindingConfig`]. `None` fields keep their current
/// value.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PathfindingConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_success_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ignore_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_half_life_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payment_records: Option<u64>,
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            baseline_success_rate: DEFAULT_BASELINE_SUCCESS_RATE_PPM,
            node_ignore_rate: DEFAULT_NODE_IGNORE_RATE_PPM,
            penalty_half_life_ms: DEFAULT_PENALTY_HALF_LIFE_MS,
            max_payment_records: DEFAULT_MAX_PAYMENT_RECORDS,
        }
    }
}

impl PathfindingConfig {
    /// Apply the fields present in `update`.
    pub fn merge(&self, update: &PathfindingConfigUpdate) -> Self {
        Self {
            baseline_success_rate: update
                .baseline_success_rate
                .unwrap_or(self.baseline_success_rate),
            node_ignore_rate: update
                .node_ignore_rate
                .unwrap_or(self.node_ignore_rate),
            penalty_half_life_ms: update
                .penalty_half_life_ms
                .unwrap_or(self.penalty_half_life_ms),
            max_payment_records: update
                .max_payment_records
                .unwrap_or(self.max_payment_records),
        }
    }
}

impl From<PathfindingConfig> for PathfindingConfigUpdate {
    fn from(config: PathfindingConfig) -> Self {
        Self {
            baseline_success_rate: Some(config.baseline_success_rate),
            node_ignore_rate: Some(config.node_ignore_rate),
            penalty_half_life_ms: Some(config.penalty_half_life_ms),
            max_payment_records: Some(config.max_payment_records),
        }
    }
}

// --- PathfindingStore --- //

/// Cheaply cloneable handle to the pathfinding state of one node
/// connection.
pub struct PathfindingStore<C> {
    inner: Arc<StoreInner<C>>,
}

struct StoreInner<C> {
    client: Arc<C>,
    /// `None` if the node doesn't support pathfinding settings.
    snapshot: ArcSwapOption<PathfindingConfig>,
    /// Serializes updates.
    writer: Mutex<()>,
    mission_control: Mutex<MissionControl>,
}

impl<C> Clone for PathfindingStore<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: NodeClient> PathfindingStore<C> {
    /// Read the node's current settings. A node without pathfinding
    /// settings support still yields a usable store; only [`get`] and
    /// [`update`] report [`Unsupported`].
    ///
    /// [`get`]: Self::get
    /// [`update`]: Self::update
    /// [`Unsupported`]: NodeErrorKind::Unsupported
    #[instrument(skip_all, name = "(pathfinding-load)")]
    pub async fn load(client: Arc<C>) -> Result<Self, NodeApiError> {
        let snapshot = match client.get_pathfinding_settings().await {
            Ok(config) => Some(Arc::new(config)),
            Err(e) if e.kind == NodeErrorKind::Unsupported => {
                info!("Node doesn't support pathfinding settings: {e:#}");
                None
            }
            Err(e) => return Err(e),
        };

        let max_records = snapshot
            .as_deref()
            .map_or(DEFAULT_MAX_PAYMENT_RECORDS, |c| c.max_payment_records);
        Ok(Self {
            inner: Arc::new(StoreInner {
                client,
                snapshot: ArcSwapOption::new(snapshot),
                writer: Mutex::new(()),
                mission_control: Mutex::new(MissionControl::new(max_records)),
            }),
        })
    }

    pub fn get(&self) -> Result<PathfindingConfig, NodeApiError> {
        match self.inner.snapshot.load_full() {
            Some(config) => Ok((*config).clone()),
            None => Err(unsupported()),
        }
    }

    /// Merge `update` into the current config, push it to the node, and
    /// publish the merged result.
    #[instrument(skip_all, name = "(pathfinding-update)")]
    pub async fn update(
        &self,
        update: PathfindingConfigUpdate,
    ) -> Result<PathfindingConfig, NodeApiError> {
        let _writer = self.inner.writer.lock().await;

        let current = self.get()?;
        let merged = current.merge(&update);
        if merged == current {
            return Ok(merged);
        }

        self.inner.client.update_pathfinding_settings(update).await?;
        self.inner.snapshot.store(Some(Arc::new(merged.clone())));
        self.inner
            .mission_control
            .lock()
            .await
            .set_max_records(merged.max_payment_records);

        info!(?merged, "Updated pathfinding settings");
        Ok(merged)
    }

    /// The config used for scoring: the node's settings, or the defaults if
    /// the node doesn't support them.
    pub fn scoring_config(&self) -> PathfindingConfig {
        self.inner
            .snapshot
            .load_full()
            .map(|config| (*config).clone())
            .unwrap_or_default()
    }

    /// Estimated success probability of `route`, in `[0, 1]`.
    pub async fn score_route(&self, route: &Route, now: TimestampMs) -> f64 {
        let config = self.scoring_config();
        let mission_control = self.inner.mission_control.lock().await;
        mission_control.route_probability(&config, route, now)
    }

    /// Feed a failing hop back into the penalty model.
    pub async fn record_failure(
        &self,
        channel_id: ChannelId,
        node: NodePk,
        now: TimestampMs,
    ) {
        let mut mission_control = self.inner.mission_control.lock().await;
        mission_control.record_failure(channel_id, node, now);
    }

    pub async fn record_success(&self, route: &Route, now: TimestampMs) {
        let mut mission_control = self.inner.mission_control.lock().await;
        mission_control.record_success(route.channel_ids(), now);
    }
}

fn unsupported() -> NodeApiError {
    NodeApiError::unsupported(
        "Pathfinding settings require a newer node version",
    )
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use proptest::{arbitrary::any, option, prop_assert_eq, proptest};

    use super::*;
    use crate::test_utils::MockNode;

    fn full_update() -> PathfindingConfigUpdate {
        PathfindingConfigUpdate {
            baseline_success_rate: Some(70_000),
            max_payment_records: Some(100),
            node_ignore_rate: Some(7_000),
            penalty_half_life_ms: Some(460_000),
        }
    }

    #[tokio::test]
    async fn partial_update_law() {
        let node = MockNode::new();
        let store = PathfindingStore::load(Arc::new(node.clone()))
            .await
            .unwrap();

        let full = store.update(full_update()).await.unwrap();
        let partial = store
            .update(PathfindingConfigUpdate {
                max_payment_records: Some(1_000_000),
                ..Default::default()
            })
            .await
            .unwrap();

        let expected = PathfindingConfig {
            max_payment_records: 1_000_000,
            ..full
        };
        assert_eq!(partial, expected);
        assert_eq!(store.get().unwrap(), expected);
        assert_eq!(node.pathfinding_settings(), Some(expected));
    }

    #[tokio::test]
    async fn unsupported_node() {
        let node = MockNode::new();
        node.set_pathfinding_supported(false);
        let store = PathfindingStore::load(Arc::new(node)).await.unwrap();

        assert_eq!(store.get().unwrap_err().to_tuple(), (501, "MethodUnsupported"));
        let err = store.update(full_update()).await.unwrap_err();
        assert_eq!(err.to_tuple(), (501, "MethodUnsupported"));
        assert_eq!(store.scoring_config(), PathfindingConfig::default());
    }

    /// Concurrent updates touching disjoint fields both land.
    #[tokio::test(start_paused = true)]
    async fn concurrent_updates_serialize() {
        let node = MockNode::new();
        node.set_pathfinding_delay(Duration::from_millis(10));
        let store = PathfindingStore::load(Arc::new(node)).await.unwrap();
        let before = store.get().unwrap();

        let a = store.update(PathfindingConfigUpdate {
            node_ignore_rate: Some(1),
            ..Default::default()
        });
        let b = store.update(PathfindingConfigUpdate {
            penalty_half_life_ms: Some(2),
            ..Default::default()
        });

        let (reader_saw, _, _) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                store.get().unwrap()
            },
            async { a.await.unwrap() },
            async { b.await.unwrap() },
        );

        // The mid-update read sees a whole snapshot, never a partial merge.
        assert!(reader_saw == before || reader_saw.node_ignore_rate == 1);
        assert_eq!(reader_saw.penalty_half_life_ms, before.penalty_half_life_ms);

        let after = store.get().unwrap();
        assert_eq!(after.node_ignore_rate, 1);
        assert_eq!(after.penalty_half_life_ms, 2);
        assert_eq!(after.baseline_success_rate, before.baseline_success_rate);
    }

    #[test]
    fn merge_keeps_omitted_fields() {
        let any_config = (any::<u64>(), any::<u64>(), any::<u64>(), any::<u64>());
        let any_update = (
            option::of(any::<u64>()),
            option::of(any::<u64>()),
            option::of(any::<u64>()),
            option::of(any::<u64>()),
        );
        proptest!(|((a, b, c, d) in any_config, (w, x, y, z) in any_update)| {
            let config = PathfindingConfig {
                baseline_success_rate: a,
                node_ignore_rate: b,
                penalty_half_life_ms: c,
                max_payment_records: d,
            };
            let update = PathfindingConfigUpdate {
                baseline_success_rate: w,
                node_ignore_rate: x,
                penalty_half_life_ms: y,
                max_payment_records: z,
            };
            let merged = config.merge(&update);
            prop_assert_eq!(merged.baseline_success_rate, w.unwrap_or(a));
            prop_assert_eq!(merged.node_ignore_rate, x.unwrap_or(b));
            prop_assert_eq!(merged.penalty_half_life_ms, y.unwrap_or(c));
            prop_assert_eq!(merged.max_payment_records, z.unwrap_or(d));

            // Merging an empty update is the identity.
            prop_assert_eq!(
                config.merge(&PathfindingConfigUpdate::default()),
                config.clone()
            );
        });
    }

    #[test]
    fn update_json_omits_absent_fields() {
        let update = PathfindingConfigUpdate {
            max_payment_records: Some(1_000_000),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"max_payment_records":1000000}"#);
    }
}
