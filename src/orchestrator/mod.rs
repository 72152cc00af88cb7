//! Per-symbol tick orchestration
//!
//! One [`Radar`] instance owns all mutable analytics state for one
//! traded symbol and processes one tick at a time to completion. Inputs
//! arrive as a single immutable [`TickInput`] batch (the feed joins its
//! concurrent fetches before the core sees anything), and one injected
//! event timestamp drives every time-based computation — the core never
//! reads the wall clock, so replaying a recorded sequence reproduces
//! every classification bit-for-bit.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classifier::{Classification, MarketState, StateMachine};
use crate::config::RadarConfig;
use crate::dedup::{DedupStats, TradeDeduplicator};
use crate::divergence::{DivergenceDetector, DivergenceSignal, DivergenceType};
use crate::error::{Error, Result};
use crate::levels::{IcebergBaseline, IcebergSignal, IcebergStats, LevelTracker};
use crate::persistence::{RadarSnapshot, StateStore};
use crate::threshold::{AdaptiveThresholdEngine, ThresholdSnapshot};
use crate::types::{TickInput, WhaleTrade};

#[cfg(test)]
mod tests;

/// Supplies joined tick batches to the run loop.
///
/// Implementations live in the market-data collaborator; they are
/// expected to fetch ticker/book/trades concurrently and join the
/// results into one immutable batch. `Err` means "no input this tick"
/// (the loop logs and skips), `Ok(None)` ends the stream.
#[async_trait]
pub trait TickSource: Send {
    async fn next_tick(&mut self) -> std::result::Result<Option<TickInput>, anyhow::Error>;
}

/// Everything produced by one processing tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub timestamp_ms: u64,
    pub classification: Classification,
    pub divergence: Option<DivergenceSignal>,
    pub new_icebergs: Vec<IcebergSignal>,
    pub whale_trades: Vec<WhaleTrade>,
    pub iceberg: IcebergStats,
    pub thresholds: ThresholdSnapshot,
    pub cvd_total: Decimal,
    pub whale_flow_total: Decimal,
    pub book_imbalance: Decimal,
    /// Trades surviving deduplication this tick
    pub fresh_trades: usize,
    pub snapshot_written: bool,
}

/// Counters exposed for external monitoring/export
#[derive(Debug, Clone, Serialize)]
pub struct Monitoring {
    pub ticks_processed: u64,
    pub last_event_ms: u64,
    pub dedup: DedupStats,
    pub signals_emitted: usize,
    pub tracked_levels: usize,
}

/// Single-symbol orchestrator over all detectors
pub struct Radar {
    config: RadarConfig,
    dedup: TradeDeduplicator,
    thresholds: AdaptiveThresholdEngine,
    tracker: LevelTracker,
    divergence: DivergenceDetector,
    classifier: StateMachine,
    store: StateStore,
    cvd_total: Decimal,
    whale_flow_total: Decimal,
    last_price: Decimal,
    last_score: Decimal,
    last_event_ms: u64,
    ticks: u64,
}

impl Radar {
    /// Build a radar with empty state; no snapshot is consulted.
    pub fn new(config: RadarConfig) -> Result<Self> {
        let store = StateStore::new(&config.symbol, &config.persistence)?;
        Ok(Self {
            dedup: TradeDeduplicator::new(config.dedup.clone()),
            thresholds: AdaptiveThresholdEngine::new(config.threshold.clone()),
            tracker: LevelTracker::new(config.iceberg.clone()),
            divergence: DivergenceDetector::new(config.divergence.clone()),
            classifier: StateMachine::new(config.classifier.clone()),
            store,
            config,
            cvd_total: Decimal::ZERO,
            whale_flow_total: Decimal::ZERO,
            last_price: Decimal::ZERO,
            last_score: dec!(50),
            last_event_ms: 0,
            ticks: 0,
        })
    }

    /// Build a radar and seed it from the persisted snapshot, unless the
    /// snapshot is older than the configured staleness bound relative to
    /// `startup_ms` (the first event time the caller knows about —
    /// using event time keeps replayed restores deterministic).
    pub fn with_restore(config: RadarConfig, startup_ms: u64) -> Result<Self> {
        let mut radar = Self::new(config)?;

        let Some(snapshot) = radar.store.load() else {
            info!(symbol = %radar.config.symbol, "no prior state, starting fresh");
            return Ok(radar);
        };

        if radar
            .store
            .is_stale(radar.config.persistence.stale_after_hours, startup_ms)
        {
            warn!(
                symbol = %radar.config.symbol,
                saved_at = snapshot.saved_at_ms,
                "persisted state is stale, discarding"
            );
            return Ok(radar);
        }

        radar.cvd_total = snapshot.cvd_total;
        radar.whale_flow_total = snapshot.whale_flow_total;
        radar.last_price = snapshot.last_price;
        radar.last_score = snapshot.last_score;
        radar.tracker.restore_baseline(IcebergBaseline {
            buy_count: snapshot.iceberg_buy_count,
            sell_count: snapshot.iceberg_sell_count,
            buy_volume: snapshot.iceberg_buy_volume,
            sell_volume: snapshot.iceberg_sell_volume,
        });
        radar.classifier.force_state(snapshot.state);
        info!(
            symbol = %radar.config.symbol,
            state = snapshot.state.label(),
            cvd = %snapshot.cvd_total,
            "state restored"
        );
        Ok(radar)
    }

    /// Process one joined batch. Steps, in order: dedup, trade
    /// ingestion (thresholds, CVD, whale flow), book ingestion (level
    /// tracking, eviction, iceberg detection), classification,
    /// divergence adjustment, throttled persistence.
    pub fn process_tick(&mut self, input: TickInput) -> Result<TickReport> {
        if input.timestamp_ms < self.last_event_ms {
            return Err(Error::TimestampRegression {
                last_ms: self.last_event_ms,
                incoming_ms: input.timestamp_ms,
            });
        }
        let now = input.timestamp_ms;
        self.last_event_ms = now;
        self.ticks += 1;

        // Whale cutoff from the window as of the previous ticks; this
        // batch feeds the window for the next evaluation.
        let whale_threshold = self.thresholds.whale_threshold(now);

        let fresh = self.dedup.filter(&input.trades, now);
        let mut whale_trades = Vec::new();
        let mut tick_high: Option<Decimal> = None;
        let mut tick_low: Option<Decimal> = None;

        for trade in &fresh {
            if trade.price <= Decimal::ZERO || trade.quantity <= Decimal::ZERO {
                debug!(?trade, "skipping malformed trade record");
                continue;
            }
            let notional = trade.notional();
            self.thresholds.add_trade(notional, now);
            self.cvd_total += trade.signed_quantity();

            tick_high = Some(tick_high.map_or(trade.price, |h| h.max(trade.price)));
            tick_low = Some(tick_low.map_or(trade.price, |l| l.min(trade.price)));

            if notional >= whale_threshold {
                let signed = if trade.is_taker_buy { notional } else { -notional };
                self.whale_flow_total += signed;
                info!(
                    side = if trade.is_taker_buy { "buy" } else { "sell" },
                    price = %trade.price,
                    notional = %notional,
                    "whale trade"
                );
                whale_trades.push(WhaleTrade {
                    price: trade.price,
                    quantity: trade.quantity,
                    notional,
                    is_taker_buy: trade.is_taker_buy,
                    timestamp_ms: trade.timestamp_ms,
                });
            }
        }

        // Reference price: book mid, else last trade, else carry forward
        let price = input
            .book
            .mid_price()
            .or_else(|| fresh.last().map(|t| t.price))
            .unwrap_or(self.last_price);
        if price > Decimal::ZERO {
            self.thresholds.add_price(price, now);
            self.last_price = price;
        }

        self.tracker.apply_book(&input.book, now);
        self.tracker.record_trades(&fresh, now);

        let intensity_threshold = self.thresholds.iceberg_intensity_threshold();
        self.tracker.evict_stale(intensity_threshold, now);
        let new_icebergs = self.tracker.detect(intensity_threshold, now);

        let iceberg = self.tracker.aggregates();
        let ratio = iceberg.buy_ratio();

        let mut classification = self.classifier.update(
            input.composite_score,
            ratio,
            iceberg.buy_volume,
            iceberg.sell_volume,
            now,
        );
        self.last_score = input.composite_score;

        let divergence = self.divergence.update(
            price,
            self.cvd_total,
            tick_high.unwrap_or(price),
            tick_low.unwrap_or(price),
        );
        if let Some(div) = &divergence {
            Self::adjust_confidence(&mut classification, div);
        }

        let snapshot_written = self.persist(now, false);

        Ok(TickReport {
            timestamp_ms: now,
            classification,
            divergence,
            new_icebergs,
            whale_trades,
            iceberg,
            thresholds: self.thresholds.snapshot(now),
            cvd_total: self.cvd_total,
            whale_flow_total: self.whale_flow_total,
            book_imbalance: input.book_imbalance,
            fresh_trades: fresh.len(),
            snapshot_written,
        })
    }

    /// Divergence is a second-order confirmation: when it agrees with
    /// the classified state it strengthens the call, when it contradicts
    /// it it weakens it. Applied after classification, never inside the
    /// state machine, and clamped to the 0-100 scale.
    fn adjust_confidence(classification: &mut Classification, divergence: &DivergenceSignal) {
        let state = classification.state;
        let delta = divergence.confidence * dec!(20);
        let adjusted = match divergence.kind {
            DivergenceType::Bearish if state.is_bearish() => classification.confidence + delta,
            DivergenceType::Bearish if state.is_bullish() => classification.confidence - delta,
            DivergenceType::Bullish if state.is_bullish() => classification.confidence + delta,
            DivergenceType::Bullish if state.is_bearish() => classification.confidence - delta,
            _ => classification.confidence,
        };
        classification.confidence = adjusted.clamp(Decimal::ZERO, dec!(100));
    }

    fn persist(&mut self, now_ms: u64, force: bool) -> bool {
        let iceberg = self.tracker.aggregates();
        let snapshot = RadarSnapshot {
            saved_at_ms: now_ms,
            symbol: self.config.symbol.clone(),
            cvd_total: self.cvd_total,
            whale_flow_total: self.whale_flow_total,
            iceberg_buy_count: iceberg.buy_count,
            iceberg_sell_count: iceberg.sell_count,
            iceberg_buy_volume: iceberg.buy_volume,
            iceberg_sell_volume: iceberg.sell_volume,
            state: self.classifier.current_state(),
            last_score: self.last_score,
            last_price: self.last_price,
        };
        match self.store.save(&snapshot, now_ms, force) {
            Ok(written) => written,
            Err(e) => {
                // Non-fatal: in-memory state is intact and the next
                // scheduled save retries.
                warn!(symbol = %self.config.symbol, error = %e, "snapshot save failed");
                false
            }
        }
    }

    /// One forced, synchronous save at the last successfully processed
    /// event timestamp. Called on cancellation between ticks — an
    /// in-progress tick is never partially persisted.
    pub fn shutdown(&mut self) {
        if self.ticks > 0 {
            self.persist(self.last_event_ms, true);
        }
        info!(symbol = %self.config.symbol, ticks = self.ticks, "radar shut down");
    }

    /// Drive the radar from a source until it ends or shutdown flips.
    /// Fetch failures skip the tick; cancellation lands between ticks
    /// and triggers the forced save.
    pub async fn run<S: TickSource>(
        &mut self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                tick = source.next_tick() => match tick {
                    Ok(Some(input)) => {
                        if let Err(e) = self.process_tick(input) {
                            warn!(symbol = %self.config.symbol, error = %e, "tick rejected");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(symbol = %self.config.symbol, error = %e, "no input this tick");
                    }
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    pub fn monitoring(&self) -> Monitoring {
        Monitoring {
            ticks_processed: self.ticks,
            last_event_ms: self.last_event_ms,
            dedup: self.dedup.stats(),
            signals_emitted: self.tracker.signals().len(),
            tracked_levels: self.tracker.tracked_levels(),
        }
    }

    pub fn current_state(&self) -> MarketState {
        self.classifier.current_state()
    }

    pub fn cvd_total(&self) -> Decimal {
        self.cvd_total
    }

    pub fn whale_flow_total(&self) -> Decimal {
        self.whale_flow_total
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }
}
