//! Ordering router: inbound deliveries to lanes.
//!
//! A delivery goes to lane `hash(partition_key) % lane_count`. The hasher
//! is fixed for the life of the process, so a key always lands on the same
//! lane. Lane queues are bounded: when a lane is full the router waits,
//! which in turn stops it pulling from the inbound source.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use termwatch_exec::InboundDelivery;

use crate::health::HealthState;
use crate::lane::LaneItem;

/// Lane index for `partition_key`.
pub fn lane_for(partition_key: &str, lane_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    partition_key.hash(&mut hasher);
    (hasher.finish() % lane_count.max(1) as u64) as usize
}

/// Feeds lane queues from the inbound source.
pub struct Router {
    lanes: Vec<mpsc::Sender<LaneItem>>,
    health: Arc<HealthState>,
}

impl Router {
    /// Create a router over the lane senders, indexed by lane.
    pub fn new(lanes: Vec<mpsc::Sender<LaneItem>>, health: Arc<HealthState>) -> Self {
        Self { lanes, health }
    }

    /// Queue a delivery on its lane, waiting while the lane is full.
    ///
    /// Returns `false` if the lane has shut down.
    pub async fn route(&self, delivery: InboundDelivery) -> bool {
        let lane = lane_for(&delivery.receipt.partition_key, self.lanes.len());
        let stats = self.health.lane(lane);

        stats.enqueued();
        match self.lanes[lane].send(LaneItem::new(delivery)).await {
            Ok(()) => true,
            Err(_) => {
                stats.dequeued(std::time::Duration::ZERO);
                error!(lane, "Lane closed, cannot route delivery");
                false
            },
        }
    }

    /// Pull deliveries until the source ends or shutdown is requested.
    ///
    /// Dropping the router afterwards closes every lane queue, which lets
    /// the lanes drain and exit.
    pub async fn run(self, mut source: mpsc::Receiver<InboundDelivery>, shutdown: CancellationToken) {
        info!(lanes = self.lanes.len(), "Router started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Router stopping: shutdown requested");
                    break;
                }
                delivery = source.recv() => match delivery {
                    Some(delivery) => {
                        if !self.route(delivery).await {
                            break;
                        }
                    }
                    None => {
                        info!("Router stopping: inbound stream ended");
                        break;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use termwatch_exec::DeliveryReceipt;
    use termwatch_registry::TermRegistry;

    fn delivery(id: u64, key: &str) -> InboundDelivery {
        InboundDelivery {
            receipt: DeliveryReceipt { delivery_id: id, partition_key: key.to_string() },
            payload: Vec::new(),
        }
    }

    fn health(lanes: usize) -> Arc<HealthState> {
        Arc::new(
            HealthState::new(
                Environment::Test,
                Arc::new(TermRegistry::new()),
                lanes,
                CancellationToken::new(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_lane_for_is_stable_and_in_range() {
        for key in ["USD-SWAP", "EUR-SWAP", "JPY-SWAP", ""] {
            let lane = lane_for(key, 8);
            assert!(lane < 8);
            assert_eq!(lane, lane_for(key, 8));
        }
        assert_eq!(lane_for("USD-SWAP", 1), 0);
    }

    #[test]
    fn test_lane_for_spreads_keys() {
        let lanes: std::collections::HashSet<_> =
            (0..100).map(|i| lane_for(&format!("INSTR-{}", i), 8)).collect();
        assert!(lanes.len() > 1);
    }

    #[tokio::test]
    async fn test_same_key_lands_on_same_lane_in_order() {
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        let router = Router::new(vec![tx_a, tx_b], health(2));

        for id in 1..=3 {
            assert!(router.route(delivery(id, "USD-SWAP")).await);
        }
        drop(router);

        let lane = lane_for("USD-SWAP", 2);
        let rx = if lane == 0 { &mut rx_a } else { &mut rx_b };
        let mut ids = Vec::new();
        while let Some(item) = rx.recv().await {
            ids.push(item.delivery.receipt.delivery_id);
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_closes_lanes() {
        let (tx, mut rx) = mpsc::channel(16);
        let (_source_tx, source_rx) = mpsc::channel::<InboundDelivery>(16);
        let shutdown = CancellationToken::new();
        let router = Router::new(vec![tx], health(1));

        shutdown.cancel();
        router.run(source_rx, shutdown).await;

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_routes_until_source_ends() {
        let (tx, mut rx) = mpsc::channel(16);
        let (source_tx, source_rx) = mpsc::channel(16);
        let health = health(1);
        let router = Router::new(vec![tx], health.clone());

        source_tx.send(delivery(1, "USD-SWAP")).await.unwrap();
        drop(source_tx);
        router.run(source_rx, CancellationToken::new()).await;

        assert_eq!(health.lane(0).queue_depth(), 1);
        assert_eq!(rx.recv().await.unwrap().delivery.receipt.delivery_id, 1);
        assert!(rx.recv().await.is_none());
    }
}
