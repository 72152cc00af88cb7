//! Per-price-level depth tracking and iceberg detection
//!
//! Tracks every visible price level on both sides of the book across
//! ticks. A level that keeps absorbing volume while its displayed
//! quantity replenishes is hiding size; once a level's absorption
//! intensity, cumulative fill and refill count all clear their
//! thresholds it emits an [`IcebergSignal`]. Aggregated buy/sell iceberg
//! flow is the "hidden" input to the market-state classifier.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;

use crate::config::IcebergConfig;
use crate::types::{normalize_price, OrderBookSnapshot, Side, Trade};


/// Signal grade for a tracked level.
///
/// `Activity` and `Confirmed` are evaluated independently from the same
/// counters; `Confirmed` is strictly stronger and supersedes `Activity`
/// in aggregate reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IcebergLevel {
    None,
    /// Some replenishment observed; possibly market-maker noise
    Activity,
    /// Absorption and refill counters both clear the confirmation bar
    Confirmed,
}

/// One tracked price level on one side of the book
#[derive(Debug, Clone, Serialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub side: Side,
    pub visible_quantity: Decimal,
    pub previous_visible: Decimal,
    pub cumulative_filled: Decimal,
    /// Historical peak of the visible quantity
    pub max_visible: Decimal,
    pub fill_count: u32,
    /// Monotonically non-decreasing for the lifetime of the level
    pub refill_count: u32,
    pub first_seen_ms: u64,
    pub last_updated_ms: u64,
}

impl PriceLevel {
    fn new(price: Decimal, side: Side, visible: Decimal, now_ms: u64) -> Self {
        Self {
            price,
            side,
            visible_quantity: visible,
            previous_visible: Decimal::ZERO,
            cumulative_filled: Decimal::ZERO,
            max_visible: visible,
            fill_count: 0,
            refill_count: 0,
            first_seen_ms: now_ms,
            last_updated_ms: now_ms,
        }
    }

    /// Apply one observation of the level's visible quantity plus any
    /// volume known to have filled against it since the last tick.
    ///
    /// Replenishment is detected with two branches: the single-tick
    /// consume-and-recover test, and the full-depletion-then-reappearance
    /// test. The second branch exists because a naive "visible grew"
    /// check misses the 100 -> 0 -> 100 sequence entirely.
    pub fn apply(&mut self, new_visible: Decimal, filled: Decimal, now_ms: u64, cfg: &IcebergConfig) {
        let prev = self.visible_quantity;
        if prev > Decimal::ZERO {
            let consumed_ratio = Decimal::ONE - new_visible / prev;
            if consumed_ratio >= cfg.depletion_ratio
                && new_visible >= cfg.recovery_ratio * self.max_visible
            {
                self.refill_count += 1;
            }
        } else if new_visible > Decimal::ZERO && self.cumulative_filled > Decimal::ZERO {
            self.refill_count += 1;
        }

        self.previous_visible = prev;
        self.visible_quantity = new_visible;
        if new_visible > self.max_visible {
            self.max_visible = new_visible;
        }
        self.cumulative_filled += filled;
        if filled > Decimal::ZERO {
            self.fill_count += 1;
        }
        self.last_updated_ms = now_ms;
    }

    /// Record a trade print that consumed this level without changing
    /// the observed depth.
    pub fn record_fill(&mut self, quantity: Decimal, now_ms: u64, cfg: &IcebergConfig) {
        self.apply(self.visible_quantity, quantity, now_ms, cfg);
    }

    /// Absorption intensity: cumulative fill against the largest
    /// quantity ever displayed. The unit floor avoids division blowups
    /// on dust levels.
    pub fn intensity(&self) -> Decimal {
        let base = self
            .visible_quantity
            .max(self.max_visible)
            .max(Decimal::ONE);
        self.cumulative_filled / base
    }

    /// Does the level currently qualify as an iceberg signal source?
    pub fn is_iceberg(&self, intensity_threshold: Decimal, cfg: &IcebergConfig) -> bool {
        self.intensity() >= intensity_threshold
            && self.cumulative_filled >= cfg.min_cumulative_volume
            && self.refill_count >= cfg.min_refill_count
    }

    /// Independent classification used for aggregate reporting. The
    /// confirmation cutoffs are configured separately from the signal
    /// cutoffs.
    pub fn classify(&self, cfg: &IcebergConfig) -> IcebergLevel {
        let absorption = self.cumulative_filled / self.max_visible.max(Decimal::ONE);
        if absorption >= cfg.confirmed_absorption
            && self.refill_count >= cfg.confirmed_refill_count
        {
            return IcebergLevel::Confirmed;
        }
        if self.refill_count >= 1 {
            return IcebergLevel::Activity;
        }
        IcebergLevel::None
    }

    /// Additive confidence score for an emitted signal, capped at 95.
    pub fn confidence(&self) -> Decimal {
        let mut confidence = dec!(50);

        let intensity = self.intensity();
        if intensity >= dec!(10) {
            confidence += dec!(20);
        } else if intensity >= dec!(5) {
            confidence += dec!(10);
        }

        if self.refill_count >= 10 {
            confidence += dec!(15);
        } else if self.refill_count >= 5 {
            confidence += dec!(10);
        }

        if self.cumulative_filled >= dec!(5000) {
            confidence += dec!(15);
        } else if self.cumulative_filled >= dec!(2000) {
            confidence += dec!(10);
        }

        confidence.min(dec!(95))
    }
}

/// Emitted the first time a level qualifies; refreshed from the live
/// level while it stays active, frozen when the level is evicted.
#[derive(Debug, Clone, Serialize)]
pub struct IcebergSignal {
    pub side: Side,
    pub price: Decimal,
    pub cumulative_volume: Decimal,
    pub visible_depth: Decimal,
    pub intensity: Decimal,
    pub refill_count: u32,
    /// 0-95
    pub confidence: Decimal,
    pub level: IcebergLevel,
    pub timestamp_ms: u64,
}

impl IcebergSignal {
    fn from_level(level: &PriceLevel, cfg: &IcebergConfig, now_ms: u64) -> Self {
        Self {
            side: level.side,
            price: level.price,
            cumulative_volume: level.cumulative_filled,
            visible_depth: level.visible_quantity,
            intensity: level.intensity(),
            refill_count: level.refill_count,
            confidence: level.confidence(),
            level: level.classify(cfg),
            timestamp_ms: now_ms,
        }
    }
}

/// Aggregated iceberg flow across all emitted signals
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IcebergStats {
    pub buy_count: u64,
    pub sell_count: u64,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub confirmed_count: u64,
    pub confirmed_volume: Decimal,
    pub active_count: usize,
}

impl IcebergStats {
    /// Buy-side share of iceberg volume; 0.5 when nothing is known,
    /// which the classifier reads as hidden-neutral.
    pub fn buy_ratio(&self) -> Decimal {
        let total = self.buy_volume + self.sell_volume;
        if total <= Decimal::ZERO {
            return dec!(0.5);
        }
        self.buy_volume / total
    }
}

/// Restored lifetime totals from a persisted snapshot, folded into the
/// aggregates on top of this run's signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcebergBaseline {
    pub buy_count: u64,
    pub sell_count: u64,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
}

/// Tracks both book sides for one symbol
pub struct LevelTracker {
    config: IcebergConfig,
    bids: HashMap<Decimal, PriceLevel>,
    asks: HashMap<Decimal, PriceLevel>,
    /// (side, price) -> index into `signals` while the level is active
    active: HashMap<(Side, Decimal), usize>,
    /// Every signal emitted this run, in emission order
    signals: Vec<IcebergSignal>,
    baseline: IcebergBaseline,
}

impl LevelTracker {
    pub fn new(config: IcebergConfig) -> Self {
        Self {
            config,
            bids: HashMap::new(),
            asks: HashMap::new(),
            active: HashMap::new(),
            signals: Vec::new(),
            baseline: IcebergBaseline::default(),
        }
    }

    /// Seed lifetime totals restored from a snapshot.
    pub fn restore_baseline(&mut self, baseline: IcebergBaseline) {
        self.baseline = baseline;
    }

    /// Ingest one full depth snapshot: create unseen levels, diff the
    /// visible quantity of known ones into fills.
    pub fn apply_book(&mut self, book: &OrderBookSnapshot, now_ms: u64) {
        let scale = self.config.price_scale;
        for level in &book.bids {
            let price = normalize_price(level.price, scale);
            Self::apply_side(&mut self.bids, &self.config, Side::Bid, price, level.quantity, now_ms);
        }
        for level in &book.asks {
            let price = normalize_price(level.price, scale);
            Self::apply_side(&mut self.asks, &self.config, Side::Ask, price, level.quantity, now_ms);
        }
    }

    fn apply_side(
        map: &mut HashMap<Decimal, PriceLevel>,
        cfg: &IcebergConfig,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        now_ms: u64,
    ) {
        match map.get_mut(&price) {
            Some(level) => {
                let filled = (level.visible_quantity - quantity).max(Decimal::ZERO);
                level.apply(quantity, filled, now_ms, cfg);
            }
            None => {
                map.insert(price, PriceLevel::new(price, side, quantity, now_ms));
            }
        }
    }

    /// Match trade prints to resting levels: a taker buy consumes the
    /// ask at its price, a taker sell the bid.
    pub fn record_trades(&mut self, trades: &[Trade], now_ms: u64) {
        let scale = self.config.price_scale;
        for trade in trades {
            let price = normalize_price(trade.price, scale);
            let map = if trade.is_taker_buy {
                &mut self.asks
            } else {
                &mut self.bids
            };
            if let Some(level) = map.get_mut(&price) {
                level.record_fill(trade.quantity, now_ms, &self.config);
            }
        }
    }

    /// Evict levels idle past the detection window, unless they still
    /// qualify as icebergs under the given intensity threshold —
    /// dropping those would lose an active signal. A deterministic,
    /// explicit pass: nothing is reclaimed implicitly.
    pub fn evict_stale(&mut self, intensity_threshold: Decimal, now_ms: u64) {
        let window_ms = self.config.detection_window_secs * 1000;
        let cutoff = now_ms.saturating_sub(window_ms);
        let cfg = &self.config;

        let mut retired: Vec<(Side, Decimal)> = Vec::new();
        for map in [&mut self.bids, &mut self.asks] {
            map.retain(|price, level| {
                let keep =
                    level.last_updated_ms >= cutoff || level.is_iceberg(intensity_threshold, cfg);
                if !keep {
                    retired.push((level.side, *price));
                }
                keep
            });
        }

        // A retired level's signal freezes; a later re-qualifying level
        // at the same price emits a fresh one.
        for key in retired {
            self.active.remove(&key);
        }
    }

    /// Refresh active signals from their live levels and emit new ones
    /// for levels qualifying for the first time. Candidates are visited
    /// in price order so replay runs emit identically ordered signals.
    pub fn detect(&mut self, intensity_threshold: Decimal, now_ms: u64) -> Vec<IcebergSignal> {
        let mut emitted = Vec::new();

        for side in [Side::Bid, Side::Ask] {
            let map = match side {
                Side::Bid => &self.bids,
                Side::Ask => &self.asks,
            };

            let mut prices: Vec<Decimal> = map.keys().copied().collect();
            prices.sort();

            for price in prices {
                let level = &map[&price];
                if let Some(&idx) = self.active.get(&(side, price)) {
                    let emitted_at = self.signals[idx].timestamp_ms;
                    let mut refreshed = IcebergSignal::from_level(level, &self.config, now_ms);
                    refreshed.timestamp_ms = emitted_at;
                    self.signals[idx] = refreshed;
                    continue;
                }
                if level.is_iceberg(intensity_threshold, &self.config) {
                    let signal = IcebergSignal::from_level(level, &self.config, now_ms);
                    info!(
                        side = side.as_str(),
                        price = %signal.price,
                        cumulative = %signal.cumulative_volume,
                        intensity = %signal.intensity,
                        refills = signal.refill_count,
                        confidence = %signal.confidence,
                        "iceberg signal"
                    );
                    self.active.insert((side, price), self.signals.len());
                    self.signals.push(signal.clone());
                    emitted.push(signal);
                }
            }
        }

        emitted
    }

    /// Recompute aggregates from every emitted signal plus the restored
    /// baseline. O(n) in signal count, which stays small relative to
    /// tick rate.
    pub fn aggregates(&self) -> IcebergStats {
        let mut stats = IcebergStats {
            buy_count: self.baseline.buy_count,
            sell_count: self.baseline.sell_count,
            buy_volume: self.baseline.buy_volume,
            sell_volume: self.baseline.sell_volume,
            confirmed_count: 0,
            confirmed_volume: Decimal::ZERO,
            active_count: self.active.len(),
        };

        for signal in &self.signals {
            match signal.side {
                Side::Bid => {
                    stats.buy_count += 1;
                    stats.buy_volume += signal.cumulative_volume;
                }
                Side::Ask => {
                    stats.sell_count += 1;
                    stats.sell_volume += signal.cumulative_volume;
                }
            }
            if signal.level == IcebergLevel::Confirmed {
                stats.confirmed_count += 1;
                stats.confirmed_volume += signal.cumulative_volume;
            }
        }

        stats
    }

    /// All signals emitted this run, in emission order.
    pub fn signals(&self) -> &[IcebergSignal] {
        &self.signals
    }

    pub fn level(&self, side: Side, price: Decimal) -> Option<&PriceLevel> {
        let price = normalize_price(price, self.config.price_scale);
        match side {
            Side::Bid => self.bids.get(&price),
            Side::Ask => self.asks.get(&price),
        }
    }

    pub fn tracked_levels(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}
