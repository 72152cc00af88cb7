//! Flow Radar — order-flow market state classification
//!
//! A streaming analytics core for a single traded instrument. Each tick
//! it ingests one deduplicated trade batch and one order-book snapshot,
//! then fuses surface and hidden order flow into a market-state call:
//!
//! ```text
//! trades ─ Deduplicator ─ AdaptiveThresholdEngine ─ CVD / whale flow ─┐
//!                                                                     ├─ StateMachine ─ TickReport
//! book ─── LevelTracker ─ iceberg signals ─ buy/sell aggregates ──────┘        ↑
//!                                                  DivergenceDetector ─ confidence adjust
//!                                                        StateStore ─ atomic checkpoints
//! ```
//!
//! Every time-based computation runs on the caller-supplied event
//! timestamp, so replaying a recorded sequence reproduces identical
//! classifications. One [`orchestrator::Radar`] instance owns all state
//! for one symbol; run several instances for several symbols.

pub mod classifier;
pub mod config;
pub mod dedup;
pub mod divergence;
pub mod error;
pub mod levels;
pub mod orchestrator;
pub mod persistence;
pub mod threshold;
pub mod types;

pub use classifier::{Classification, MarketState, StateMachine};
pub use config::RadarConfig;
pub use error::{Error, Result};
pub use orchestrator::{Radar, TickReport, TickSource};
pub use types::{OrderBookSnapshot, TickInput, Trade};
