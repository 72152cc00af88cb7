//! Radar configuration
//!
//! Every detector gets its own config struct with sensible defaults, all
//! grouped under [`RadarConfig`]. Values load from an optional TOML file
//! with `FLOW_RADAR__*` environment overrides on top.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Trade deduplication cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Hard cap on cached identities, evicted oldest-first
    pub max_entries: usize,
    /// Identities older than this (event time) are dropped each call
    pub ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}

/// Adaptive whale/iceberg threshold learning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Rolling notional window length
    pub window_hours: u64,
    /// Samples required before percentiles replace the floor
    pub min_samples: usize,
    /// Hard cap on retained notional samples
    pub max_samples: usize,
    /// Whale threshold lower bound (quote currency)
    pub whale_floor: Decimal,
    /// Iceberg intensity threshold lower bound
    pub intensity_floor: Decimal,
    /// Unscaled iceberg intensity base threshold
    pub intensity_base: Decimal,
    /// Whale threshold recompute cache (event time)
    pub cache_ttl_secs: u64,
    /// Price-change buffer capacity
    pub price_buffer: usize,
    /// Samples required to fix the volatility baseline
    pub baseline_samples: usize,
    /// Price-change samples in the short-term volatility window
    pub short_window: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            min_samples: 100,
            max_samples: 100_000,
            whale_floor: dec!(5000),
            intensity_floor: dec!(1.5),
            intensity_base: dec!(2.0),
            cache_ttl_secs: 60,
            price_buffer: 1000,
            baseline_samples: 100,
            short_window: 20,
        }
    }
}

/// Per-price-level iceberg detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcebergConfig {
    /// Minimum absorbed volume before a level can signal
    pub min_cumulative_volume: Decimal,
    /// Minimum observed refills before a level can signal
    pub min_refill_count: u32,
    /// Levels idle longer than this are evicted unless still qualifying
    pub detection_window_secs: u64,
    /// Fraction of the previous visible quantity that must be consumed
    /// for the single-tick refill branch
    pub depletion_ratio: Decimal,
    /// Fraction of the historical peak the new quantity must recover to
    pub recovery_ratio: Decimal,
    /// Absorption ratio for the Confirmed classification
    pub confirmed_absorption: Decimal,
    /// Refill count for the Confirmed classification
    pub confirmed_refill_count: u32,
    /// Decimal places used to normalize prices into level keys
    pub price_scale: u32,
}

impl Default for IcebergConfig {
    fn default() -> Self {
        Self {
            min_cumulative_volume: dec!(500),
            min_refill_count: 2,
            detection_window_secs: 60,
            depletion_ratio: dec!(0.8),
            recovery_ratio: dec!(0.5),
            // The Confirmed cutoffs are deliberately stricter than the
            // signal cutoffs and configured independently.
            confirmed_absorption: dec!(3.0),
            confirmed_refill_count: 3,
            price_scale: 6,
        }
    }
}

/// Price/CVD divergence detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Ring buffer capacity
    pub window: usize,
    /// Points evaluated per update, from the newest backwards
    pub eval_points: usize,
    /// Relative CVD move required to trigger, e.g. 0.1 = 10%
    pub min_change: Decimal,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            window: 20,
            eval_points: 10,
            min_change: dec!(0.1),
        }
    }
}

/// Hysteresis state machine thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Composite score to enter a surface-bullish reading
    pub long_entry: Decimal,
    /// Score to fall below before the bullish reading is released
    pub long_exit: Decimal,
    /// Score to enter a surface-bearish reading
    pub short_entry: Decimal,
    /// Score to rise above before the bearish reading is released
    pub short_exit: Decimal,
    /// Iceberg buy ratio at or above which hidden flow reads bullish
    pub hidden_bullish: Decimal,
    /// Iceberg buy ratio at or below which hidden flow reads bearish
    pub hidden_bearish: Decimal,
    /// Minimum event time between accepted state transitions
    pub cooldown_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            long_entry: dec!(65),
            long_exit: dec!(55),
            short_entry: dec!(30),
            short_exit: dec!(40),
            hidden_bullish: dec!(0.55),
            hidden_bearish: dec!(0.45),
            cooldown_secs: 30,
        }
    }
}

/// State checkpointing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory holding one snapshot file per symbol
    pub dir: PathBuf,
    /// Minimum event time between scheduled saves
    pub save_interval_secs: u64,
    /// Snapshots older than this are discarded at restore
    pub stale_after_hours: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./storage/state"),
            save_interval_secs: 60,
            stale_after_hours: 24,
        }
    }
}

/// Full radar configuration for one traded symbol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadarConfig {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub iceberg: IcebergConfig,
    #[serde(default)]
    pub divergence: DivergenceConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl RadarConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `FLOW_RADAR__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("FLOW_RADAR").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Defaults for the given symbol
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }
}
