//! Trade deduplication
//!
//! Exchange feeds re-deliver trades around REST/WebSocket failover and
//! snapshot overlaps. The deduplicator remembers recently seen trade
//! identities for a TTL window and filters re-deliveries out of each
//! batch before they can double-count into CVD or whale flow.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::config::DedupConfig;
use crate::types::Trade;

/// Cumulative deduplication counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DedupStats {
    pub total: u64,
    pub duplicates: u64,
    pub unique: u64,
    /// Share of examined trades that were duplicates, 0-1
    pub duplicate_rate: f64,
    pub cache_size: usize,
}

/// TTL + capacity bounded seen-cache over trade identities
pub struct TradeDeduplicator {
    config: DedupConfig,
    /// identity -> first-seen event time (duplicates do not refresh it)
    seen: HashMap<String, u64>,
    /// Insertion order for FIFO eviction; event time is non-decreasing,
    /// so the front is always the oldest entry
    order: VecDeque<(String, u64)>,
    total: u64,
    duplicates: u64,
}

impl TradeDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            seen: HashMap::new(),
            order: VecDeque::new(),
            total: 0,
            duplicates: 0,
        }
    }

    /// Return the subset of `trades` not seen within the TTL window and
    /// record the newly seen ones. Expired identities are pruned first.
    pub fn filter(&mut self, trades: &[Trade], now_ms: u64) -> Vec<Trade> {
        self.expire(now_ms);

        let mut fresh = Vec::with_capacity(trades.len());
        for trade in trades {
            self.total += 1;
            let key = Self::identity(trade);
            if self.seen.contains_key(&key) {
                self.duplicates += 1;
                continue;
            }
            self.seen.insert(key.clone(), now_ms);
            self.order.push_back((key, now_ms));
            fresh.push(trade.clone());
        }

        // FIFO cap, independent of the TTL pass
        while self.seen.len() > self.config.max_entries {
            if let Some((key, _)) = self.order.pop_front() {
                self.seen.remove(&key);
            } else {
                break;
            }
        }

        fresh
    }

    /// Identity key: exchange-native id when present, otherwise a
    /// deterministic composite of the identifying fields. No hashing,
    /// so replay runs produce identical cache behavior.
    fn identity(trade: &Trade) -> String {
        match &trade.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!(
                "{}_{}_{}_{}",
                trade.timestamp_ms,
                trade.price.normalize(),
                trade.quantity.normalize(),
                if trade.is_taker_buy { "b" } else { "s" }
            ),
        }
    }

    fn expire(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.config.ttl_secs * 1000);
        while self.order.front().is_some_and(|(_, ts)| *ts < cutoff) {
            if let Some((key, _)) = self.order.pop_front() {
                self.seen.remove(&key);
            }
        }
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            total: self.total,
            duplicates: self.duplicates,
            unique: self.total - self.duplicates,
            duplicate_rate: if self.total > 0 {
                self.duplicates as f64 / self.total as f64
            } else {
                0.0
            },
            cache_size: self.seen.len(),
        }
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.order.clear();
        self.total = 0;
        self.duplicates = 0;
    }
}
