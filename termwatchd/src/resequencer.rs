//! Per-key resequencing inside a lane.
//!
//! Events for one instrument key are released in sequence order. An event
//! ahead of the expected sequence waits for its predecessors, bounded by a
//! count window and a hold time; once either bound is hit, everything
//! buffered for the key is released in order and the gap is abandoned.
//!
//! ```text
//! offer(seq = last + 1)  → released, plus any buffered successors
//! offer(seq = last)      → released unflagged (redelivery)
//! offer(seq < last)      → released, flagged out_of_order
//! offer(seq > last + 1)  → buffered until the gap fills, overflows or expires
//! ```
//!
//! The first event seen for a key is released as-is and sets the baseline.
//! `u64::MAX` has no successor: nothing is buffered behind it. A key with
//! nothing buffered that stays quiet for the idle window is forgotten and
//! its next event sets a new baseline.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use termwatch_domain::InstrumentKey;
use tokio::time::Instant;

/// An event handed back by the resequencer, ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released<T> {
    /// The buffered item
    pub item: T,
    /// Sequence number of the item
    pub sequence: u64,
    /// Released after a higher sequence of the same key
    pub out_of_order: bool,
}

#[derive(Debug)]
struct KeyState<T> {
    last_released: Option<u64>,
    pending: BTreeMap<u64, Vec<(T, Instant)>>,
    buffered: usize,
    last_seen: Instant,
}

impl<T> KeyState<T> {
    fn new(now: Instant) -> Self {
        Self { last_released: None, pending: BTreeMap::new(), buffered: 0, last_seen: now }
    }

    fn successor(&self) -> Option<u64> {
        self.last_released.and_then(|last| last.checked_add(1))
    }

    fn oldest_arrival(&self) -> Option<Instant> {
        self.pending.values().flatten().map(|(_, arrived)| *arrived).min()
    }

    fn release_contiguous(&mut self, out: &mut Vec<Released<T>>) {
        while let Some(next) = self.successor() {
            let Some(items) = self.pending.remove(&next) else {
                break;
            };
            self.buffered -= items.len();
            self.last_released = Some(next);
            out.extend(items.into_iter().map(|(item, _)| Released {
                item,
                sequence: next,
                out_of_order: false,
            }));
        }
    }

    fn flush(&mut self, out: &mut Vec<Released<T>>) {
        for (sequence, items) in std::mem::take(&mut self.pending) {
            self.last_released = Some(sequence);
            out.extend(items.into_iter().map(|(item, _)| Released {
                item,
                sequence,
                out_of_order: false,
            }));
        }
        self.buffered = 0;
    }
}

/// Resequencing buffers for every key on one lane.
#[derive(Debug)]
pub struct Resequencer<T> {
    window: usize,
    hold: Duration,
    idle: Duration,
    keys: HashMap<InstrumentKey, KeyState<T>>,
}

impl<T> Resequencer<T> {
    /// Create a resequencer buffering at most `window` events per key for at
    /// most `hold`, forgetting keys idle for longer than `idle`.
    pub fn new(window: usize, hold: Duration, idle: Duration) -> Self {
        Self { window, hold, idle, keys: HashMap::new() }
    }

    /// Idle window after which a key with nothing buffered is forgotten.
    pub fn idle(&self) -> Duration {
        self.idle
    }

    /// Offer an event and collect everything that can be released now.
    pub fn offer(
        &mut self,
        key: &InstrumentKey,
        sequence: u64,
        item: T,
        now: Instant,
    ) -> Vec<Released<T>> {
        let state = self.keys.entry(key.clone()).or_insert_with(|| KeyState::new(now));
        state.last_seen = now;
        let mut out = Vec::new();

        match state.last_released {
            None => {
                state.last_released = Some(sequence);
                out.push(Released { item, sequence, out_of_order: false });
                state.release_contiguous(&mut out);
            },
            Some(_) if state.successor() == Some(sequence) => {
                state.last_released = Some(sequence);
                out.push(Released { item, sequence, out_of_order: false });
                state.release_contiguous(&mut out);
            },
            Some(last) if sequence == last => {
                out.push(Released { item, sequence, out_of_order: false });
            },
            Some(last) if sequence < last => {
                out.push(Released { item, sequence, out_of_order: true });
            },
            Some(_) => {
                state.pending.entry(sequence).or_default().push((item, now));
                state.buffered += 1;
                if state.buffered > self.window {
                    state.flush(&mut out);
                }
            },
        }

        out
    }

    /// Release every key whose oldest buffered event has waited out the hold time.
    pub fn expire(&mut self, now: Instant) -> Vec<Released<T>> {
        let mut out = Vec::new();
        for state in self.keys.values_mut() {
            let expired = state
                .oldest_arrival()
                .map(|arrived| arrived + self.hold <= now)
                .unwrap_or(false);
            if expired {
                state.flush(&mut out);
            }
        }
        out
    }

    /// Forget keys with nothing buffered that have been quiet for the idle window.
    ///
    /// Returns the number of keys dropped.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let before = self.keys.len();
        let idle = self.idle;
        self.keys
            .retain(|_, state| state.buffered > 0 || state.last_seen + idle > now);
        before - self.keys.len()
    }

    /// Number of keys with resequencing state.
    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }

    /// When the next hold time runs out, if anything is buffered.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.keys
            .values()
            .filter_map(|state| state.oldest_arrival())
            .min()
            .map(|arrived| arrived + self.hold)
    }

    /// Release everything buffered, per key in sequence order.
    pub fn drain(&mut self) -> Vec<Released<T>> {
        let mut out = Vec::new();
        for state in self.keys.values_mut() {
            state.flush(&mut out);
        }
        out
    }

    /// Number of events waiting for a predecessor.
    pub fn buffered(&self) -> usize {
        self.keys.values().map(|state| state.buffered).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(300);

    fn key(name: &str) -> InstrumentKey {
        InstrumentKey::new(name).unwrap()
    }

    fn seqs(released: &[Released<u64>]) -> Vec<u64> {
        released.iter().map(|r| r.sequence).collect()
    }

    #[test]
    fn test_in_order_passes_through() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), IDLE);
        let now = Instant::now();

        for seq in 1..=3 {
            let out = reseq.offer(&key("USD-SWAP"), seq, seq, now);
            assert_eq!(seqs(&out), vec![seq]);
        }
        assert_eq!(reseq.buffered(), 0);
    }

    #[test]
    fn test_gap_is_filled_then_released_in_order() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), IDLE);
        let now = Instant::now();

        reseq.offer(&key("USD-SWAP"), 1, 1, now);
        assert!(reseq.offer(&key("USD-SWAP"), 3, 3, now).is_empty());
        assert!(reseq.offer(&key("USD-SWAP"), 4, 4, now).is_empty());
        assert_eq!(reseq.buffered(), 2);

        let out = reseq.offer(&key("USD-SWAP"), 2, 2, now);

        assert_eq!(seqs(&out), vec![2, 3, 4]);
        assert!(out.iter().all(|r| !r.out_of_order));
        assert_eq!(reseq.buffered(), 0);
    }

    #[test]
    fn test_window_overflow_abandons_gap() {
        let mut reseq = Resequencer::new(2, Duration::from_secs(60), IDLE);
        let now = Instant::now();

        reseq.offer(&key("USD-SWAP"), 1, 1, now);
        reseq.offer(&key("USD-SWAP"), 4, 4, now);
        reseq.offer(&key("USD-SWAP"), 3, 3, now);
        let out = reseq.offer(&key("USD-SWAP"), 5, 5, now);

        assert_eq!(seqs(&out), vec![3, 4, 5]);

        // The abandoned sequence arrives late and is flagged
        let late = reseq.offer(&key("USD-SWAP"), 2, 2, now);
        assert_eq!(seqs(&late), vec![2]);
        assert!(late[0].out_of_order);
    }

    #[test]
    fn test_hold_expiry_releases_buffer() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), IDLE);
        let start = Instant::now();

        reseq.offer(&key("USD-SWAP"), 1, 1, start);
        reseq.offer(&key("USD-SWAP"), 3, 3, start);

        assert_eq!(reseq.next_deadline(), Some(start + Duration::from_millis(100)));
        assert!(reseq.expire(start + Duration::from_millis(99)).is_empty());

        let out = reseq.expire(start + Duration::from_millis(100));
        assert_eq!(seqs(&out), vec![3]);
        assert_eq!(reseq.next_deadline(), None);

        // Continues from the released sequence
        assert_eq!(seqs(&reseq.offer(&key("USD-SWAP"), 4, 4, start)), vec![4]);
    }

    #[test]
    fn test_redelivery_of_last_released_is_unflagged() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), IDLE);
        let now = Instant::now();

        reseq.offer(&key("USD-SWAP"), 7, 7, now);
        let out = reseq.offer(&key("USD-SWAP"), 7, 7, now);

        assert_eq!(seqs(&out), vec![7]);
        assert!(!out[0].out_of_order);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), IDLE);
        let now = Instant::now();

        reseq.offer(&key("USD-SWAP"), 1, 1, now);
        reseq.offer(&key("USD-SWAP"), 3, 3, now);

        let out = reseq.offer(&key("EUR-SWAP"), 10, 10, now);
        assert_eq!(seqs(&out), vec![10]);
        assert_eq!(reseq.buffered(), 1);
    }

    #[test]
    fn test_drain_flushes_everything() {
        let mut reseq = Resequencer::new(8, Duration::from_secs(60), IDLE);
        let now = Instant::now();

        reseq.offer(&key("USD-SWAP"), 1, 1, now);
        reseq.offer(&key("USD-SWAP"), 5, 5, now);
        reseq.offer(&key("USD-SWAP"), 3, 3, now);

        assert_eq!(seqs(&reseq.drain()), vec![3, 5]);
        assert_eq!(reseq.buffered(), 0);
    }

    #[test]
    fn test_max_sequence_does_not_overflow() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), IDLE);
        let now = Instant::now();

        let out = reseq.offer(&key("USD-SWAP"), u64::MAX, u64::MAX, now);
        assert_eq!(seqs(&out), vec![u64::MAX]);

        // Nothing follows u64::MAX; lower sequences are late
        let late = reseq.offer(&key("USD-SWAP"), 1, 1, now);
        assert_eq!(seqs(&late), vec![1]);
        assert!(late[0].out_of_order);

        // Redelivery of the maximum passes through
        let again = reseq.offer(&key("USD-SWAP"), u64::MAX, u64::MAX, now);
        assert!(!again[0].out_of_order);
        assert_eq!(reseq.buffered(), 0);
    }

    #[test]
    fn test_gap_filled_up_to_max_sequence() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), IDLE);
        let now = Instant::now();

        reseq.offer(&key("USD-SWAP"), u64::MAX - 2, 0, now);
        assert!(reseq.offer(&key("USD-SWAP"), u64::MAX, 0, now).is_empty());

        let out = reseq.offer(&key("USD-SWAP"), u64::MAX - 1, 0, now);
        assert_eq!(seqs(&out), vec![u64::MAX - 1, u64::MAX]);
    }

    #[test]
    fn test_idle_keys_are_evicted() {
        let mut reseq = Resequencer::new(8, Duration::from_millis(100), Duration::from_secs(1));
        let start = Instant::now();

        reseq.offer(&key("USD-SWAP"), 1, 1, start);
        reseq.offer(&key("EUR-SWAP"), 1, 1, start);
        reseq.offer(&key("EUR-SWAP"), 3, 3, start);
        reseq.offer(&key("GBP-SWAP"), 1, 1, start + Duration::from_millis(900));

        assert_eq!(reseq.evict_idle(start + Duration::from_millis(999)), 0);

        // USD is idle; EUR still buffers; GBP was seen recently
        assert_eq!(reseq.evict_idle(start + Duration::from_secs(1)), 1);
        assert_eq!(reseq.tracked_keys(), 2);

        // A forgotten key starts a new baseline
        let out = reseq.offer(&key("USD-SWAP"), 7, 7, start + Duration::from_secs(2));
        assert_eq!(seqs(&out), vec![7]);
        assert!(!out[0].out_of_order);
    }
}
