//! End-to-end ordering, term lifecycle and shutdown tests.
//!
//! Flow:
//! 1. Start the daemon with stub collaborators
//! 2. Interleave market data for several instruments (and term changes)
//! 3. Check per-instrument order of published alerts
//! 4. Cancel and check that buffered events were drained before exit

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{rate_update, threshold, Harness};
use rust_decimal_macros::dec;
use termwatch_domain::{TermChangeEvent, TermId, TermStatus};
use termwatchd::Config;

fn long_hold() -> Config {
    let mut config = Config::test();
    config.lanes.resequence_hold = Duration::from_secs(30);
    config
}

// =============================================================================
// Per-key ordering
// =============================================================================

#[tokio::test]
async fn test_alerts_follow_sequence_order_per_instrument() {
    let instruments = ["USD-SWAP", "EUR-SWAP", "GBP-SWAP"];
    let terms = instruments.iter().map(|i| threshold(&format!("CAP_{}", i), i, dec!(1.0))).collect();
    let h = Harness::start(Config::test(), terms).await;

    for seq in 1..=20 {
        for instrument in instruments {
            h.push(&rate_update(instrument, seq, dec!(2.0))).await;
        }
    }
    h.settled(60).await;

    let mut per_key: HashMap<String, Vec<u64>> = HashMap::new();
    for alert in h.sink.alerts() {
        per_key
            .entry(alert.decision.instrument().to_string())
            .or_default()
            .push(alert.decision.sequence());
    }

    assert_eq!(per_key.len(), 3);
    for (instrument, sequences) in per_key {
        assert_eq!(sequences, (1..=20).collect::<Vec<_>>(), "{}", instrument);
    }

    h.stop().await;
}

#[tokio::test]
async fn test_gap_is_resequenced_before_evaluation() {
    let h = Harness::start(long_hold(), vec![threshold("RATE_CAP_5PCT", "USD-SWAP", dec!(5.0))])
        .await;

    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    h.push(&rate_update("USD-SWAP", 3, dec!(6.0))).await;
    h.push(&rate_update("USD-SWAP", 2, dec!(6.0))).await;
    h.settled(3).await;

    let sequences: Vec<u64> = h.sink.alerts().iter().map(|a| a.decision.sequence()).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(h.sink.alerts().iter().all(|a| !a.decision.out_of_order));

    h.stop().await;
}

#[tokio::test]
async fn test_late_event_after_hold_is_flagged_out_of_order() {
    // Hold is 50ms in the test config
    let h = Harness::start(Config::test(), vec![threshold("RATE_CAP_5PCT", "USD-SWAP", dec!(5.0))])
        .await;

    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    h.push(&rate_update("USD-SWAP", 3, dec!(6.0))).await;
    h.settled(2).await;

    h.push(&rate_update("USD-SWAP", 2, dec!(6.0))).await;
    h.settled(3).await;

    let alerts = h.sink.alerts();
    let sequences: Vec<u64> = alerts.iter().map(|a| a.decision.sequence()).collect();
    assert_eq!(sequences, vec![1, 3, 2]);
    assert!(!alerts[1].decision.out_of_order);
    assert!(alerts[2].decision.out_of_order);
    assert_eq!(h.handle.health().report().counters.out_of_order_events, 1);

    h.stop().await;
}

#[tokio::test]
async fn test_max_sequence_does_not_stop_the_lane() {
    let mut config = Config::test();
    config.lanes.count = 1;
    let h = Harness::start(
        config,
        vec![
            threshold("USD_CAP", "USD-SWAP", dec!(5.0)),
            threshold("EUR_CAP", "EUR-SWAP", dec!(5.0)),
        ],
    )
    .await;

    h.push(&rate_update("USD-SWAP", u64::MAX, dec!(6.0))).await;
    h.push(&rate_update("EUR-SWAP", 1, dec!(6.0))).await;
    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    h.settled(3).await;

    let alerts = h.sink.alerts();
    assert_eq!(alerts.len(), 3);
    assert_eq!(alerts[0].decision.sequence(), u64::MAX);
    // Anything below the maximum is late for that key
    assert!(alerts[2].decision.out_of_order);

    h.stop().await;
}

// =============================================================================
// Term changes mid-stream
// =============================================================================

#[tokio::test]
async fn test_suspension_takes_effect_for_later_events() {
    let term = threshold("RATE_CAP_5PCT", "USD-SWAP", dec!(5.0));
    let h = Harness::start(Config::test(), vec![term.clone()]).await;

    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    h.settled(1).await;

    let suspended = term.transition(TermStatus::Suspended).unwrap();
    assert!(h.feed.push(TermChangeEvent::from(&suspended)).await);
    h.registry_version(2).await;

    h.push(&rate_update("USD-SWAP", 2, dec!(6.0))).await;
    h.settled(2).await;

    assert_eq!(h.sink.alerts().len(), 1);
    assert_eq!(h.sink.alerts()[0].decision.sequence(), 1);

    // Reactivation is a new version; its alerts carry it
    let reactivated = suspended.transition(TermStatus::Active).unwrap();
    assert!(h.feed.push(TermChangeEvent::from(&reactivated)).await);
    h.registry_version(3).await;

    h.push(&rate_update("USD-SWAP", 3, dec!(6.0))).await;
    h.settled(3).await;

    let alerts = h.sink.alerts();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[1].decision.term_version, 3);

    h.stop().await;
}

#[tokio::test]
async fn test_stale_term_change_is_ignored() {
    let term = threshold("RATE_CAP_5PCT", "USD-SWAP", dec!(5.0));
    let h = Harness::start(Config::test(), vec![term.clone()]).await;

    // Same version, different status: rejected as stale
    let mut stale = TermChangeEvent::from(&term);
    stale.status = TermStatus::Retired;
    assert!(h.feed.push(stale).await);

    // A newer change proves the stale one was already handled
    let raised = {
        let mut change = TermChangeEvent::from(&term);
        change.version = 2;
        change.term_id = TermId::new("RATE_CAP_9PCT").unwrap();
        change
    };
    assert!(h.feed.push(raised).await);
    h.registry_version(2).await;

    let snapshot = h.registry.snapshot().unwrap();
    let held = snapshot.get(&term.id).unwrap();
    assert_eq!(held.status, TermStatus::Active);
    assert_eq!(held.version, 1);

    h.stop().await;
}

#[tokio::test]
async fn test_events_wait_for_first_registry_snapshot() {
    let h = Harness::start(Config::test(), Vec::new()).await;
    assert!(!h.registry.is_ready());

    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.inbound.settled_count(), 0);

    let term = threshold("RATE_CAP_5PCT", "USD-SWAP", dec!(5.0));
    assert!(h.feed.push(TermChangeEvent::from(&term)).await);
    h.settled(1).await;

    assert_eq!(h.sink.alerts().len(), 1);
    assert_eq!(h.handle.health().report().status, "healthy");

    h.stop().await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_drains_buffered_events() {
    let h = Harness::start(long_hold(), vec![threshold("RATE_CAP_5PCT", "USD-SWAP", dec!(5.0))])
        .await;

    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    h.push(&rate_update("USD-SWAP", 3, dec!(6.0))).await;
    h.settled(1).await;

    // Sequence 3 waits on the missing 2 until the lane drains
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.inbound.settled_count(), 1);

    let (inbound, sink) = h.stop().await;

    assert_eq!(inbound.acked().len(), 2);
    let sequences: Vec<u64> = sink.alerts().iter().map(|a| a.decision.sequence()).collect();
    assert_eq!(sequences, vec![1, 3]);
}

#[tokio::test]
async fn test_shutdown_while_waiting_for_registry_leaves_event_unsettled() {
    let h = Harness::start(Config::test(), Vec::new()).await;

    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (inbound, sink) = h.stop().await;

    assert_eq!(inbound.settled_count(), 0);
    assert!(sink.alerts().is_empty());
}

#[tokio::test]
async fn test_inbound_close_stops_daemon() {
    let h = Harness::start(Config::test(), vec![threshold("RATE_CAP_5PCT", "USD-SWAP", dec!(5.0))])
        .await;

    h.push(&rate_update("USD-SWAP", 1, dec!(6.0))).await;
    h.inbound.close();

    tokio::time::timeout(common::WAIT, h.handle.join()).await.unwrap().unwrap();
    assert_eq!(h.inbound.acked().len(), 1);
    assert_eq!(h.sink.alerts().len(), 1);
}
