//! Core market-data types
//!
//! One immutable batch of inputs per processing tick: a trade list, an
//! order-book snapshot, and the externally computed composite score.
//! All time values are event timestamps in milliseconds supplied by the
//! feed — the core never reads the wall clock.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// A single trade print as delivered by the exchange feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange-native trade id, when the feed provides one
    pub id: Option<String>,
    pub price: Decimal,
    pub quantity: Decimal,
    /// true when the taker side was the buyer
    pub is_taker_buy: bool,
    pub timestamp_ms: u64,
}

impl Trade {
    /// Quote-currency value of the trade
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    /// Base quantity signed by aggressor direction (buy positive)
    pub fn signed_quantity(&self) -> Decimal {
        if self.is_taker_buy {
            self.quantity
        } else {
            -self.quantity
        }
    }
}

/// Order book level (price + visible quantity)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Top-of-book depth snapshot, both ladders price-ordered best-first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp_ms: u64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    /// Midpoint of the best bid/ask, when both sides are populated
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some((bid + ask) / Decimal::TWO)
    }
}

/// One joined, immutable batch of inputs for a processing tick.
///
/// The composite score and book imbalance are produced by the indicators
/// collaborator from the same raw data; the core treats them as opaque
/// inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickInput {
    /// Event timestamp driving every time-based computation this tick.
    /// Must be monotonically non-decreasing across ticks.
    pub timestamp_ms: u64,
    pub trades: Vec<Trade>,
    pub book: OrderBookSnapshot,
    /// Externally computed composite score, 0-100
    pub composite_score: Decimal,
    /// Externally computed order-book imbalance, -1..1
    pub book_imbalance: Decimal,
}

/// A trade classified as whale-sized against the adaptive threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTrade {
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub is_taker_buy: bool,
    pub timestamp_ms: u64,
}

/// Normalize a price to the fixed key precision used by level maps.
///
/// `normalize()` strips trailing zeros so `1.50` and `1.5000` map to the
/// same key.
pub fn normalize_price(price: Decimal, scale: u32) -> Decimal {
    price.round_dp(scale).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_quantity() {
        let buy = Trade {
            id: None,
            price: dec!(100),
            quantity: dec!(2),
            is_taker_buy: true,
            timestamp_ms: 0,
        };
        assert_eq!(buy.signed_quantity(), dec!(2));
        assert_eq!(buy.notional(), dec!(200));

        let sell = Trade { is_taker_buy: false, ..buy };
        assert_eq!(sell.signed_quantity(), dec!(-2));
    }

    #[test]
    fn test_mid_price() {
        let book = OrderBookSnapshot {
            timestamp_ms: 0,
            bids: vec![BookLevel { price: dec!(100), quantity: dec!(1) }],
            asks: vec![BookLevel { price: dec!(101), quantity: dec!(1) }],
        };
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
        assert_eq!(OrderBookSnapshot::default().mid_price(), None);
    }

    #[test]
    fn test_normalize_price_collapses_representations() {
        assert_eq!(
            normalize_price(dec!(1.5000), 6),
            normalize_price(dec!(1.50), 6)
        );
        assert_eq!(normalize_price(dec!(0.12345678), 6), dec!(0.123457));
    }
}
