//! Price / CVD divergence detection
//!
//! A second-order confirmation signal: price pushing to a new extreme
//! while cumulative volume delta moves the other way means the move is
//! not backed by aggressor flow. A new high on fading CVD marks a
//! bull trap forming; a new low on rising CVD marks absorption under
//! the sell-off.
//!
//! Buffer contents are purely a function of the ordered update calls,
//! so identical input sequences always produce identical signals.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::config::DivergenceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DivergenceType {
    Bearish,
    Bullish,
}

#[derive(Debug, Clone, Serialize)]
pub struct DivergenceSignal {
    pub kind: DivergenceType,
    /// 0-1
    pub confidence: Decimal,
    /// Relative price move over the evaluated points
    pub price_change: Decimal,
    /// Relative CVD move over the evaluated points, signed
    pub cvd_change: Decimal,
    pub description: String,
}

/// Direction summary over the most recent points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RecentTrend {
    pub price: TrendDirection,
    pub cvd: TrendDirection,
    pub diverging: bool,
}

pub struct DivergenceDetector {
    config: DivergenceConfig,
    prices: VecDeque<Decimal>,
    cvd_values: VecDeque<Decimal>,
    highs: VecDeque<Decimal>,
    lows: VecDeque<Decimal>,
}

impl DivergenceDetector {
    pub fn new(config: DivergenceConfig) -> Self {
        let cap = config.window;
        Self {
            config,
            prices: VecDeque::with_capacity(cap),
            cvd_values: VecDeque::with_capacity(cap),
            highs: VecDeque::with_capacity(cap),
            lows: VecDeque::with_capacity(cap),
        }
    }

    /// Append one observation and evaluate. At most one signal type per
    /// call; the bearish check runs first.
    pub fn update(
        &mut self,
        price: Decimal,
        cvd: Decimal,
        high: Decimal,
        low: Decimal,
    ) -> Option<DivergenceSignal> {
        Self::push(&mut self.prices, price, self.config.window);
        Self::push(&mut self.cvd_values, cvd, self.config.window);
        Self::push(&mut self.highs, high, self.config.window);
        Self::push(&mut self.lows, low, self.config.window);

        if self.prices.len() < self.config.eval_points {
            return None;
        }
        self.detect()
    }

    fn push(buffer: &mut VecDeque<Decimal>, value: Decimal, cap: usize) {
        buffer.push_back(value);
        while buffer.len() > cap {
            buffer.pop_front();
        }
    }

    fn detect(&self) -> Option<DivergenceSignal> {
        let n = self.config.eval_points;
        let highs = Self::tail(&self.highs, n);
        let lows = Self::tail(&self.lows, n);
        let cvd = Self::tail(&self.cvd_values, n);
        let prices = Self::tail(&self.prices, n);

        let cvd_start = cvd[0];
        let cvd_end = cvd[n - 1];

        // Bearish: latest high is the window maximum while CVD declined
        let window_high = highs.iter().copied().max()?;
        if highs[n - 1] >= window_high && cvd_start != Decimal::ZERO && cvd_end < cvd_start {
            let decline = (cvd_start - cvd_end) / cvd_start.abs();
            if decline >= self.config.min_change {
                let price_rise = if prices[0] != Decimal::ZERO {
                    (prices[n - 1] - prices[0]) / prices[0]
                } else {
                    Decimal::ZERO
                };
                return Some(DivergenceSignal {
                    kind: DivergenceType::Bearish,
                    confidence: (decline * Decimal::TWO).min(Decimal::ONE),
                    price_change: price_rise,
                    cvd_change: -decline,
                    description: format!(
                        "price at new high while buy flow fades (CVD down {:.1}%)",
                        decline * dec!(100)
                    ),
                });
            }
        }

        // Bullish: latest low is the window minimum while CVD rose
        let window_low = lows.iter().copied().min()?;
        if lows[n - 1] <= window_low && cvd_start != Decimal::ZERO && cvd_end > cvd_start {
            let rise = (cvd_end - cvd_start) / cvd_start.abs();
            if rise >= self.config.min_change {
                let price_drop = if prices[0] != Decimal::ZERO {
                    (prices[0] - prices[n - 1]) / prices[0]
                } else {
                    Decimal::ZERO
                };
                return Some(DivergenceSignal {
                    kind: DivergenceType::Bullish,
                    confidence: (rise * Decimal::TWO).min(Decimal::ONE),
                    price_change: -price_drop,
                    cvd_change: rise,
                    description: format!(
                        "price at new low while sell pressure eases (CVD up {:.1}%)",
                        rise * dec!(100)
                    ),
                });
            }
        }

        None
    }

    /// Direction of the last five points, for display/monitoring.
    pub fn recent_trend(&self) -> Option<RecentTrend> {
        if self.prices.len() < 5 {
            return None;
        }
        let prices = Self::tail(&self.prices, 5);
        let cvd = Self::tail(&self.cvd_values, 5);

        let price_change = if prices[0] != Decimal::ZERO {
            (prices[4] - prices[0]) / prices[0]
        } else {
            Decimal::ZERO
        };
        let cvd_change = cvd[4] - cvd[0];

        let price = if price_change > dec!(0.001) {
            TrendDirection::Up
        } else if price_change < dec!(-0.001) {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        };
        let cvd_dir = if cvd_change > Decimal::ZERO {
            TrendDirection::Up
        } else if cvd_change < Decimal::ZERO {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        };

        Some(RecentTrend {
            price,
            cvd: cvd_dir,
            diverging: (price_change > Decimal::ZERO && cvd_change < Decimal::ZERO)
                || (price_change < Decimal::ZERO && cvd_change > Decimal::ZERO),
        })
    }

    pub fn reset(&mut self) {
        self.prices.clear();
        self.cvd_values.clear();
        self.highs.clear();
        self.lows.clear();
    }

    fn tail(buffer: &VecDeque<Decimal>, n: usize) -> Vec<Decimal> {
        buffer.iter().skip(buffer.len().saturating_sub(n)).copied().collect()
    }
}
