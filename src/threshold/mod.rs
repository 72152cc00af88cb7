//! Adaptive threshold learning
//!
//! A fixed "$10,000 = whale" cutoff does not transfer across instruments.
//! The engine learns the large-trade cutoff from a rolling window of
//! trade notionals and adapts the iceberg intensity threshold to recent
//! volatility so quiet and violent regimes are judged on the same scale.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ThresholdConfig;

/// Point-in-time view of the learned thresholds
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThresholdSnapshot {
    pub whale_threshold: Decimal,
    pub iceberg_intensity: Decimal,
    pub sample_count: usize,
    pub generated_at_ms: u64,
}

/// Two-tier whale cut from the same window
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WhaleTiers {
    /// P95 of the window: active large traders
    pub active_whale: Decimal,
    /// P99 of the window: outsized single prints
    pub mega_whale: Decimal,
}

/// Window statistics for monitoring/export
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdStats {
    pub sample_count: usize,
    pub min: Decimal,
    pub max: Decimal,
    pub median: Decimal,
    pub p95: Decimal,
    pub p99: Decimal,
    pub whale_threshold: Decimal,
    pub baseline_volatility: Option<Decimal>,
    pub short_term_volatility: Option<Decimal>,
}

pub struct AdaptiveThresholdEngine {
    config: ThresholdConfig,
    /// (event time, notional) samples inside the rolling window
    notionals: VecDeque<(u64, Decimal)>,
    /// Absolute relative price changes, newest at the back
    price_changes: VecDeque<Decimal>,
    last_price: Option<Decimal>,
    /// Fixed once enough samples exist; only `reset` clears it
    baseline_volatility: Option<Decimal>,
    cached_whale: Option<(u64, Decimal)>,
}

impl AdaptiveThresholdEngine {
    pub fn new(config: ThresholdConfig) -> Self {
        Self {
            config,
            notionals: VecDeque::new(),
            price_changes: VecDeque::new(),
            last_price: None,
            baseline_volatility: None,
            cached_whale: None,
        }
    }

    /// Record one trade notional, pruning samples older than the window.
    pub fn add_trade(&mut self, notional: Decimal, ts_ms: u64) {
        self.notionals.push_back((ts_ms, notional));
        if self.notionals.len() > self.config.max_samples {
            self.notionals.pop_front();
        }
        let cutoff = ts_ms.saturating_sub(self.config.window_hours * 3_600_000);
        while self.notionals.front().is_some_and(|(t, _)| *t < cutoff) {
            self.notionals.pop_front();
        }
    }

    /// Record a price observation; the absolute relative change against
    /// the previous price feeds the volatility buffers.
    pub fn add_price(&mut self, price: Decimal, _ts_ms: u64) {
        if let Some(last) = self.last_price {
            if last > Decimal::ZERO {
                let change = ((price - last) / last).abs();
                self.price_changes.push_back(change);
                while self.price_changes.len() > self.config.price_buffer {
                    self.price_changes.pop_front();
                }
            }
        }
        self.last_price = Some(price);

        if self.baseline_volatility.is_none()
            && self.price_changes.len() >= self.config.baseline_samples
        {
            self.baseline_volatility = Some(Self::mean(self.price_changes.iter()));
        }
    }

    /// Robust whale threshold, cached per `cache_ttl_secs` of event time.
    ///
    /// The triple-min `min(P99, P95*3, median*50)` keeps one extreme
    /// print from inflating the cutoff until nothing classifies as
    /// large again; the configured floor bounds it from below.
    pub fn whale_threshold(&mut self, now_ms: u64) -> Decimal {
        if let Some((at, value)) = self.cached_whale {
            if now_ms.saturating_sub(at) < self.config.cache_ttl_secs * 1000 {
                return value;
            }
        }

        if self.notionals.len() < self.config.min_samples {
            return self.config.whale_floor;
        }

        let mut sorted: Vec<Decimal> = self.notionals.iter().map(|(_, n)| *n).collect();
        sorted.sort();
        let n = sorted.len();
        let p99 = sorted[(n * 99 / 100).min(n - 1)];
        let p95 = sorted[(n * 95 / 100).min(n - 1)];
        let median = sorted[n / 2];

        let robust = p99.min(p95 * Decimal::from(3)).min(median * Decimal::from(50));
        let threshold = robust.max(self.config.whale_floor);
        self.cached_whale = Some((now_ms, threshold));
        threshold
    }

    /// P95/P99 tiers from the same window, with floor fallbacks when
    /// under-sampled.
    pub fn dual_thresholds(&self) -> WhaleTiers {
        if self.notionals.len() < self.config.min_samples {
            return WhaleTiers {
                active_whale: self.config.whale_floor,
                mega_whale: self.config.whale_floor * Decimal::TWO,
            };
        }
        let mut sorted: Vec<Decimal> = self.notionals.iter().map(|(_, n)| *n).collect();
        sorted.sort();
        let n = sorted.len();
        WhaleTiers {
            active_whale: sorted[(n * 95 / 100).min(n - 1)],
            mega_whale: sorted[(n * 99 / 100).min(n - 1)],
        }
    }

    /// Iceberg intensity threshold scaled by the ratio of short-term
    /// volatility to the fixed baseline. Never below the unscaled base
    /// and never below the configured floor.
    pub fn iceberg_intensity_threshold(&self) -> Decimal {
        let base = self.config.intensity_base;
        let Some(baseline) = self.baseline_volatility else {
            return base;
        };
        if baseline <= Decimal::ZERO || self.price_changes.len() < self.config.short_window {
            return base;
        }

        let start = self.price_changes.len() - self.config.short_window;
        let current = Self::mean(self.price_changes.iter().skip(start));
        let ratio = current / baseline;
        let adjusted = base * ratio.max(Decimal::ONE);
        adjusted.max(self.config.intensity_floor)
    }

    pub fn snapshot(&mut self, now_ms: u64) -> ThresholdSnapshot {
        ThresholdSnapshot {
            whale_threshold: self.whale_threshold(now_ms),
            iceberg_intensity: self.iceberg_intensity_threshold(),
            sample_count: self.notionals.len(),
            generated_at_ms: now_ms,
        }
    }

    pub fn stats(&mut self, now_ms: u64) -> Option<ThresholdStats> {
        if self.notionals.is_empty() {
            return None;
        }
        let mut sorted: Vec<Decimal> = self.notionals.iter().map(|(_, n)| *n).collect();
        sorted.sort();
        let n = sorted.len();
        let short = if self.price_changes.len() >= self.config.short_window {
            let start = self.price_changes.len() - self.config.short_window;
            Some(Self::mean(self.price_changes.iter().skip(start)))
        } else {
            None
        };
        Some(ThresholdStats {
            sample_count: n,
            min: sorted[0],
            max: sorted[n - 1],
            median: sorted[n / 2],
            p95: sorted[(n * 95 / 100).min(n - 1)],
            p99: sorted[(n * 99 / 100).min(n - 1)],
            whale_threshold: self.whale_threshold(now_ms),
            baseline_volatility: self.baseline_volatility,
            short_term_volatility: short,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.notionals.len()
    }

    /// Drop all learned state, including the volatility baseline.
    pub fn reset(&mut self) {
        self.notionals.clear();
        self.price_changes.clear();
        self.last_price = None;
        self.baseline_volatility = None;
        self.cached_whale = None;
    }

    fn mean<'a>(values: impl Iterator<Item = &'a Decimal>) -> Decimal {
        let mut sum = Decimal::ZERO;
        let mut count = 0u32;
        for v in values {
            sum += *v;
            count += 1;
        }
        if count == 0 {
            Decimal::ZERO
        } else {
            sum / Decimal::from(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> AdaptiveThresholdEngine {
        AdaptiveThresholdEngine::new(ThresholdConfig::default())
    }

    #[test]
    fn test_floor_when_under_sampled() {
        let mut e = engine();
        for i in 0..50 {
            e.add_trade(dec!(100), i * 1000);
        }
        assert_eq!(e.whale_threshold(60_000), dec!(5000));
    }

    #[test]
    fn test_outlier_cannot_inflate_threshold() {
        let mut e = engine();
        // 199 ordinary prints with median 100, one million-dollar outlier
        for i in 0..199u64 {
            e.add_trade(dec!(100), i * 1000);
        }
        e.add_trade(dec!(1000000), 199_000);

        // median*50 = 5000 wins over the outlier-driven P99
        let threshold = e.whale_threshold(200_000);
        assert!(threshold <= dec!(5000), "got {threshold}");
    }

    #[test]
    fn test_threshold_caches_for_ttl() {
        let mut e = engine();
        for i in 0..200u64 {
            e.add_trade(Decimal::from(1000 + i), i * 100);
        }
        let first = e.whale_threshold(100_000);
        // A huge burst inside the cache TTL must not move the value
        for i in 0..200u64 {
            e.add_trade(dec!(900000), 100_000 + i);
        }
        assert_eq!(e.whale_threshold(120_000), first);
        // After the TTL the recompute sees the new distribution
        assert!(e.whale_threshold(161_000) > first);
    }

    #[test]
    fn test_window_pruning_is_time_based() {
        let mut e = engine();
        e.add_trade(dec!(100), 0);
        // 25h later the first sample is outside the 24h window
        e.add_trade(dec!(200), 25 * 3_600_000);
        assert_eq!(e.sample_count(), 1);
    }

    #[test]
    fn test_intensity_base_without_baseline() {
        let e = engine();
        assert_eq!(e.iceberg_intensity_threshold(), dec!(2.0));
    }

    #[test]
    fn test_baseline_fixes_once() {
        let mut e = engine();
        let mut price = dec!(100);
        for i in 0..120u64 {
            price += dec!(0.1);
            e.add_price(price, i * 1000);
        }
        let baseline = e.baseline_volatility.unwrap();

        // Later, far wilder prices must not move the baseline
        for i in 120..200u64 {
            price += dec!(5);
            e.add_price(price, i * 1000);
        }
        assert_eq!(e.baseline_volatility.unwrap(), baseline);
    }

    #[test]
    fn test_intensity_rises_with_volatility() {
        let mut e = engine();
        let mut price = dec!(100);
        // Calm period establishes the baseline
        for i in 0..110u64 {
            price += dec!(0.01);
            e.add_price(price, i * 1000);
        }
        let calm = e.iceberg_intensity_threshold();

        // Volatile burst lifts short-term volatility above baseline
        for i in 110..140u64 {
            price += if i % 2 == 0 { dec!(3) } else { dec!(-3) };
            e.add_price(price, i * 1000);
        }
        let hot = e.iceberg_intensity_threshold();
        assert!(hot > calm, "{hot} should exceed {calm}");
        assert!(hot >= dec!(2.0));
    }

    #[test]
    fn test_dual_thresholds_fallback_and_order() {
        let e = engine();
        let tiers = e.dual_thresholds();
        assert_eq!(tiers.active_whale, dec!(5000));
        assert_eq!(tiers.mega_whale, dec!(10000));

        let mut e = engine();
        for i in 0..1000u64 {
            e.add_trade(Decimal::from(i), 1000);
        }
        let tiers = e.dual_thresholds();
        assert!(tiers.mega_whale >= tiers.active_whale);
    }
}
