//! Integration-style tests over the full tick pipeline

use super::*;
use crate::config::RadarConfig;
use crate::types::{BookLevel, OrderBookSnapshot, Trade};
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn config(dir: &TempDir) -> RadarConfig {
    let mut cfg = RadarConfig::for_symbol("DOGE/USDT");
    cfg.persistence.dir = dir.path().to_path_buf();
    cfg
}

fn trade(id: &str, price: Decimal, quantity: Decimal, buy: bool, ts: u64) -> Trade {
    Trade {
        id: Some(id.to_string()),
        price,
        quantity,
        is_taker_buy: buy,
        timestamp_ms: ts,
    }
}

fn book(bid_qty: Decimal, ask_qty: Decimal, ts: u64) -> OrderBookSnapshot {
    OrderBookSnapshot {
        timestamp_ms: ts,
        bids: vec![BookLevel { price: dec!(0.99), quantity: bid_qty }],
        asks: vec![BookLevel { price: dec!(1.01), quantity: ask_qty }],
    }
}

fn tick(ts: u64, trades: Vec<Trade>, score: Decimal) -> TickInput {
    TickInput {
        timestamp_ms: ts,
        trades,
        book: book(dec!(100), dec!(100), ts),
        composite_score: score,
        book_imbalance: Decimal::ZERO,
    }
}

/// A deterministic scripted sequence exercising trades, book churn and
/// score swings.
fn scripted_inputs() -> Vec<TickInput> {
    let mut inputs = Vec::new();
    for i in 0..60u64 {
        let ts = i * 5_000;
        let buy = i % 3 != 0;
        let trades = vec![
            trade(&format!("t{i}a"), dec!(1.00), dec!(10), buy, ts),
            trade(&format!("t{i}b"), dec!(1.00), Decimal::from(1 + i), !buy, ts),
        ];
        let score = if i < 30 { dec!(70) } else { dec!(25) };
        let bid_qty = if i % 2 == 0 { dec!(300) } else { dec!(0) };
        inputs.push(TickInput {
            timestamp_ms: ts,
            trades,
            book: OrderBookSnapshot {
                timestamp_ms: ts,
                bids: vec![BookLevel { price: dec!(0.99), quantity: bid_qty }],
                asks: vec![BookLevel { price: dec!(1.01), quantity: dec!(120) }],
            },
            composite_score: score,
            book_imbalance: dec!(0.1),
        });
    }
    inputs
}

#[test]
fn test_dedup_idempotence_on_cvd() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    let trades = vec![
        trade("a", dec!(1.0), dec!(5), true, 1000),
        trade("b", dec!(1.0), dec!(3), false, 1000),
    ];

    radar.process_tick(tick(1_000, trades.clone(), dec!(50))).unwrap();
    let cvd_after_first = radar.cvd_total();
    assert_eq!(cvd_after_first, dec!(2));

    // Identical batch re-delivered in the same TTL window: zero net
    // change, duplicate counter up by exactly the batch size
    let before = radar.monitoring().dedup.duplicates;
    radar.process_tick(tick(2_000, trades, dec!(50))).unwrap();
    assert_eq!(radar.cvd_total(), cvd_after_first);
    assert_eq!(radar.monitoring().dedup.duplicates, before + 2);
}

#[test]
fn test_malformed_trades_are_skipped_individually() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    let trades = vec![
        trade("good", dec!(1.0), dec!(5), true, 1000),
        trade("zero-qty", dec!(1.0), dec!(0), true, 1000),
        trade("neg-price", dec!(-1), dec!(5), false, 1000),
    ];
    let report = radar.process_tick(tick(1_000, trades, dec!(50))).unwrap();

    // The batch survives; only the good trade moved CVD
    assert_eq!(report.fresh_trades, 3);
    assert_eq!(radar.cvd_total(), dec!(5));
}

#[test]
fn test_timestamp_regression_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    radar.process_tick(tick(10_000, vec![], dec!(50))).unwrap();
    let err = radar.process_tick(tick(9_000, vec![], dec!(50))).unwrap_err();
    assert!(matches!(err, Error::TimestampRegression { .. }));

    // Equal timestamps are allowed (non-decreasing)
    radar.process_tick(tick(10_000, vec![], dec!(50))).unwrap();
}

#[test]
fn test_whale_classification_against_floor() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    // Under-sampled window: the 5000 floor applies
    let trades = vec![
        trade("small", dec!(1.0), dec!(100), true, 1000),
        trade("big", dec!(2.0), dec!(4000), true, 1000), // notional 8000
    ];
    let report = radar.process_tick(tick(1_000, trades, dec!(50))).unwrap();

    assert_eq!(report.whale_trades.len(), 1);
    assert_eq!(report.whale_trades[0].notional, dec!(8000));
    assert_eq!(radar.whale_flow_total(), dec!(8000));
}

#[test]
fn test_replay_determinism() {
    // Feeding the identical recorded sequence through two fresh radars
    // must produce identical classifications, aggregates and signals.
    let run = || {
        let dir = TempDir::new().unwrap();
        let mut radar = Radar::new(config(&dir)).unwrap();
        let mut out = Vec::new();
        for input in scripted_inputs() {
            let report = radar.process_tick(input).unwrap();
            out.push((
                report.classification.state,
                report.classification.confidence,
                report.cvd_total,
                report.whale_flow_total,
                report.iceberg.buy_volume,
                report.new_icebergs.len(),
                report.divergence.map(|d| d.kind),
            ));
        }
        out
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn test_hysteresis_limits_transition_rate() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    // Alternate the bid ladder so a buy-side iceberg forms and the
    // hidden read goes bullish; scores then flip the raw matrix between
    // TrendUp and Accumulating on every single tick.
    let mut transition_times = Vec::new();
    for i in 0..90u64 {
        let ts = i * 1000;
        let score = if i % 2 == 0 { dec!(66) } else { dec!(54) };
        let bid_qty = if i % 2 == 0 { dec!(300) } else { dec!(0) };
        let input = TickInput {
            timestamp_ms: ts,
            trades: vec![],
            book: OrderBookSnapshot {
                timestamp_ms: ts,
                bids: vec![BookLevel { price: dec!(0.99), quantity: bid_qty }],
                asks: vec![BookLevel { price: dec!(1.01), quantity: dec!(100) }],
            },
            composite_score: score,
            book_imbalance: Decimal::ZERO,
        };
        let report = radar.process_tick(input).unwrap();
        if report.classification.state_changed {
            transition_times.push(ts);
        }
    }
    assert!(transition_times.len() >= 2, "expected some accepted transitions");
    for pair in transition_times.windows(2) {
        assert!(
            pair[1] - pair[0] >= 30_000,
            "transitions at {} and {} inside one cooldown",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_persistence_round_trip_through_restart() {
    let dir = TempDir::new().unwrap();

    let (cvd, whale_flow) = {
        let mut radar = Radar::new(config(&dir)).unwrap();
        for input in scripted_inputs() {
            radar.process_tick(input).unwrap();
        }
        radar.shutdown();
        (radar.cvd_total(), radar.whale_flow_total())
    };
    assert_ne!(cvd, Decimal::ZERO);

    // Restart shortly after (event time): aggregates carry over
    let radar = Radar::with_restore(config(&dir), 400_000).unwrap();
    assert_eq!(radar.cvd_total(), cvd);
    assert_eq!(radar.whale_flow_total(), whale_flow);
}

#[test]
fn test_stale_snapshot_is_discarded_on_restart() {
    let dir = TempDir::new().unwrap();

    {
        let mut radar = Radar::new(config(&dir)).unwrap();
        for input in scripted_inputs() {
            radar.process_tick(input).unwrap();
        }
        radar.shutdown();
    }

    // Two days of event time later the snapshot is stale
    let two_days = 48 * 3_600_000u64;
    let radar = Radar::with_restore(config(&dir), two_days).unwrap();
    assert_eq!(radar.cvd_total(), Decimal::ZERO);
    assert_eq!(radar.current_state(), MarketState::Neutral);
}

#[test]
fn test_shutdown_forces_save_despite_throttle() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    // Two ticks 5s apart: the second is inside the save interval
    radar
        .process_tick(tick(0, vec![trade("a", dec!(1.0), dec!(5), true, 0)], dec!(50)))
        .unwrap();
    radar
        .process_tick(tick(5_000, vec![trade("b", dec!(1.0), dec!(7), true, 5_000)], dec!(50)))
        .unwrap();
    radar.shutdown();

    // The forced save captured the second trade's contribution
    let restored = Radar::with_restore(config(&dir), 10_000).unwrap();
    assert_eq!(restored.cvd_total(), dec!(12));
}

#[test]
fn test_gap_in_ticks_is_handled() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    radar
        .process_tick(tick(0, vec![trade("a", dec!(1.0), dec!(5), true, 0)], dec!(50)))
        .unwrap();
    // An hour of silence, then a normal tick: time-based pruning copes
    let report = radar
        .process_tick(tick(3_600_000, vec![trade("b", dec!(1.0), dec!(5), true, 3_600_000)], dec!(50)))
        .unwrap();
    assert_eq!(report.timestamp_ms, 3_600_000);
    assert_eq!(radar.monitoring().ticks_processed, 2);
}

#[test]
fn test_monitoring_counters() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    for input in scripted_inputs().into_iter().take(10) {
        radar.process_tick(input).unwrap();
    }
    let monitoring = radar.monitoring();
    assert_eq!(monitoring.ticks_processed, 10);
    assert_eq!(monitoring.last_event_ms, 45_000);
    assert_eq!(monitoring.dedup.total, 20);
}

#[test]
fn test_divergence_adjustment_is_clamped() {
    let mut classification = Classification {
        state: MarketState::TrapDistribution,
        confidence: dec!(95),
        reason: String::new(),
        cooldown_remaining_ms: 0,
        state_changed: false,
        previous_state: None,
    };
    let divergence = DivergenceSignal {
        kind: DivergenceType::Bearish,
        confidence: Decimal::ONE,
        price_change: dec!(0.05),
        cvd_change: dec!(-0.3),
        description: String::new(),
    };

    // Bearish divergence confirms a bearish state: +20, clamped at 100
    Radar::adjust_confidence(&mut classification, &divergence);
    assert_eq!(classification.confidence, dec!(100));

    // The same divergence contradicting a bullish state subtracts
    classification.state = MarketState::TrendUp;
    classification.confidence = dec!(10);
    Radar::adjust_confidence(&mut classification, &divergence);
    assert_eq!(classification.confidence, Decimal::ZERO);
}

struct ScriptedSource {
    inputs: std::vec::IntoIter<TickInput>,
    fail_first: bool,
}

#[async_trait]
impl TickSource for ScriptedSource {
    async fn next_tick(&mut self) -> std::result::Result<Option<TickInput>, anyhow::Error> {
        if self.fail_first {
            self.fail_first = false;
            anyhow::bail!("exchange timeout");
        }
        Ok(self.inputs.next())
    }
}

#[tokio::test]
async fn test_run_loop_skips_failed_fetches_and_saves_on_end() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();
    let mut source = ScriptedSource {
        inputs: scripted_inputs().into_iter(),
        fail_first: true,
    };
    let (_tx, rx) = watch::channel(false);

    radar.run(&mut source, rx).await.unwrap();
    assert_eq!(radar.monitoring().ticks_processed, 60);

    // The end-of-stream shutdown persisted state
    let restored = Radar::with_restore(config(&dir), 400_000).unwrap();
    assert_eq!(restored.cvd_total(), radar.cvd_total());
}

#[tokio::test]
async fn test_run_loop_honors_shutdown_signal() {
    let dir = TempDir::new().unwrap();
    let mut radar = Radar::new(config(&dir)).unwrap();

    struct Endless;
    #[async_trait]
    impl TickSource for Endless {
        async fn next_tick(&mut self) -> std::result::Result<Option<TickInput>, anyhow::Error> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            anyhow::bail!("nothing yet")
        }
    }

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut source = Endless;
        radar.run(&mut source, rx).await.unwrap();
        radar
    });

    tx.send(true).unwrap();
    let radar = handle.await.unwrap();
    assert_eq!(radar.monitoring().ticks_processed, 0);
}
