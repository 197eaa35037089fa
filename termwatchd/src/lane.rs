//! Lane: one sequential worker over a bounded queue.
//!
//! Every delivery routed to a lane is decoded, resequenced per instrument
//! key and run through the pipeline one at a time, so same-key events keep
//! their order. Lanes run concurrently with each other.
//!
//! When the router drops its sender the lane finishes its queue, releases
//! whatever the resequencer still buffers, and exits.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use termwatch_domain::MarketDataUpdate;
use termwatch_exec::{AlertSink, DeliveryReceipt, InboundDelivery, InboundSource};

use crate::health::LaneStats;
use crate::pipeline::Pipeline;
use crate::resequencer::{Released, Resequencer};

/// A delivery waiting in a lane queue.
#[derive(Debug)]
pub struct LaneItem {
    /// The raw delivery
    pub delivery: InboundDelivery,
    /// When the router queued it
    pub enqueued_at: Instant,
}

impl LaneItem {
    /// Wrap a delivery queued now.
    pub fn new(delivery: InboundDelivery) -> Self {
        Self { delivery, enqueued_at: Instant::now() }
    }
}

type Pending = (DeliveryReceipt, MarketDataUpdate);

/// Sequential worker for one lane.
pub struct Lane<I: InboundSource, S: AlertSink> {
    index: usize,
    queue: mpsc::Receiver<LaneItem>,
    resequencer: Resequencer<Pending>,
    pipeline: Arc<Pipeline<I, S>>,
    stats: Arc<LaneStats>,
}

impl<I, S> Lane<I, S>
where
    I: InboundSource + 'static,
    S: AlertSink + 'static,
{
    /// Create a lane reading from `queue`.
    pub fn new(
        index: usize,
        queue: mpsc::Receiver<LaneItem>,
        resequencer: Resequencer<Pending>,
        pipeline: Arc<Pipeline<I, S>>,
        stats: Arc<LaneStats>,
    ) -> Self {
        Self { index, queue, resequencer, pipeline, stats }
    }

    /// Start the lane in the background.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!(lane = self.index, "Lane started");

        let idle = self.resequencer.idle();
        let mut sweep = interval_at(Instant::now() + idle, idle);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.resequencer.next_deadline();
            tokio::select! {
                item = self.queue.recv() => match item {
                    Some(item) => self.accept(item).await,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let released = self.resequencer.expire(Instant::now());
                    self.evaluate(released).await;
                }
                _ = sweep.tick() => {
                    let evicted = self.resequencer.evict_idle(Instant::now());
                    if evicted > 0 {
                        debug!(
                            lane = self.index,
                            evicted,
                            tracked = self.resequencer.tracked_keys(),
                            "Evicted idle resequencer keys"
                        );
                    }
                }
            }
        }

        let buffered = self.resequencer.drain();
        if !buffered.is_empty() {
            info!(lane = self.index, buffered = buffered.len(), "Draining resequencer");
        }
        self.evaluate(buffered).await;

        debug!(lane = self.index, "Lane stopped");
    }

    async fn accept(&mut self, item: LaneItem) {
        self.stats.dequeued(item.enqueued_at.elapsed());
        let LaneItem { delivery, .. } = item;

        match delivery.decode() {
            Ok(update) => {
                let key = update.instrument.clone();
                let sequence = update.sequence;
                let released =
                    self.resequencer.offer(&key, sequence, (delivery.receipt, update), Instant::now());
                self.evaluate(released).await;
            },
            Err(error) => {
                self.pipeline.handle_malformed(self.index, &delivery.receipt, &error).await;
            },
        }
    }

    async fn evaluate(&self, released: Vec<Released<Pending>>) {
        for Released { item: (receipt, update), out_of_order, .. } in released {
            self.pipeline.process(self.index, &receipt, &update, out_of_order).await;
        }
    }
}
