//! State checkpointing
//!
//! Long-lived aggregates (CVD, whale flow, iceberg totals) must survive
//! a restart — silently resetting them would blind every detector that
//! leans on accumulated history. Snapshots are throttled to one write
//! per interval, written atomically (temp file + rename), and loaded
//! tolerantly: a missing or corrupt file is "no prior state", never a
//! startup failure.

use std::fs;
use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::MarketState;
use crate::config::PersistenceConfig;
use crate::error::Result;

/// Everything worth carrying across a restart, one file per symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarSnapshot {
    /// Event time of the save, not wall time
    pub saved_at_ms: u64,
    pub symbol: String,
    pub cvd_total: Decimal,
    pub whale_flow_total: Decimal,
    pub iceberg_buy_count: u64,
    pub iceberg_sell_count: u64,
    pub iceberg_buy_volume: Decimal,
    pub iceberg_sell_volume: Decimal,
    pub state: MarketState,
    pub last_score: Decimal,
    pub last_price: Decimal,
}

/// Throttled atomic writer/reader for one symbol's snapshot
pub struct StateStore {
    path: PathBuf,
    save_interval_ms: u64,
    last_save_ms: u64,
}

impl StateStore {
    pub fn new(symbol: &str, config: &PersistenceConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let file = format!("{}_state.json", symbol.replace('/', "_"));
        Ok(Self {
            path: config.dir.join(file),
            save_interval_ms: config.save_interval_secs * 1000,
            last_save_ms: 0,
        })
    }

    /// Write the snapshot if the interval has elapsed or `force` is set.
    /// Returns whether a write happened. The temp-then-rename dance
    /// guarantees the file is never observed half-written.
    pub fn save(&mut self, snapshot: &RadarSnapshot, now_ms: u64, force: bool) -> Result<bool> {
        if !force && now_ms.saturating_sub(self.last_save_ms) < self.save_interval_ms {
            return Ok(false);
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;

        self.last_save_ms = now_ms;
        debug!(path = %self.path.display(), at = now_ms, "snapshot saved");
        Ok(true)
    }

    /// Load the last snapshot. Corruption is non-fatal: logged and
    /// treated as absent.
    pub fn load(&self) -> Option<RadarSnapshot> {
        let body = match fs::read(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot unreadable, starting fresh");
                return None;
            }
        };
        match serde_json::from_slice(&body) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot corrupt, starting fresh");
                None
            }
        }
    }

    /// Age of the stored snapshot relative to `now_ms`, if one exists.
    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.load().map(|s| now_ms.saturating_sub(s.saved_at_ms))
    }

    /// True when the snapshot is older than `max_age_hours` — or when
    /// none exists at all.
    pub fn is_stale(&self, max_age_hours: u64, now_ms: u64) -> bool {
        match self.age_ms(now_ms) {
            Some(age) => age > max_age_hours * 3_600_000,
            None => true,
        }
    }

    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}
