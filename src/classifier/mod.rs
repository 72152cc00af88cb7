//! Market-state classification with hysteresis
//!
//! Fuses the surface read (composite score) with the hidden read
//! (iceberg buy ratio) into one of seven states. Two mechanisms stop
//! the output from thrashing near decision boundaries:
//!
//! - asymmetric entry/exit thresholds on the surface signal, so a
//!   score oscillating around one boundary keeps its current reading
//! - an event-time cooldown gating accepted transitions
//!
//! All timing runs on the injected event timestamp; replaying a
//! recorded sequence reproduces every transition.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ClassifierConfig;

/// The seven classified regimes. No terminal state; the machine runs
/// indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    /// No directional conviction on either read
    Neutral,
    /// Surface neutral, hidden flow buying
    Accumulating,
    /// Surface neutral, hidden flow selling
    Distributing,
    /// Surface and hidden flow both bullish
    TrendUp,
    /// Surface and hidden flow both bearish
    TrendDown,
    /// Surface pressed down while hidden flow absorbs
    WashAccumulate,
    /// Surface pushed up while hidden flow unloads
    TrapDistribution,
}

impl MarketState {
    pub fn label(&self) -> &'static str {
        match self {
            MarketState::Neutral => "contested",
            MarketState::Accumulating => "quiet accumulation",
            MarketState::Distributing => "quiet distribution",
            MarketState::TrendUp => "genuine uptrend",
            MarketState::TrendDown => "genuine downtrend",
            MarketState::WashAccumulate => "wash-trading accumulation",
            MarketState::TrapDistribution => "bull-trap distribution",
        }
    }

    /// Short action hint plus the reading behind it
    pub fn recommendation(&self) -> (&'static str, &'static str) {
        match self {
            MarketState::Neutral => ("stand aside", "wait for direction to resolve"),
            MarketState::Accumulating => ("watch", "large players building quietly"),
            MarketState::Distributing => ("caution", "large players unloading quietly"),
            MarketState::TrendUp => ("long ok", "surface and hidden flow both confirm up"),
            MarketState::TrendDown => ("no knife-catching", "surface and hidden flow both selling"),
            MarketState::WashAccumulate => ("watch", "price pressed down into hidden bids"),
            MarketState::TrapDistribution => ("do not chase", "rally sold into by hidden offers"),
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(
            self,
            MarketState::TrendUp | MarketState::Accumulating | MarketState::WashAccumulate
        )
    }

    pub fn is_bearish(&self) -> bool {
        matches!(
            self,
            MarketState::TrendDown | MarketState::Distributing | MarketState::TrapDistribution
        )
    }
}

/// One classification output per tick
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub state: MarketState,
    /// 0-100
    pub confidence: Decimal,
    pub reason: String,
    pub cooldown_remaining_ms: u64,
    /// true only on the tick an accepted transition happened
    pub state_changed: bool,
    pub previous_state: Option<MarketState>,
}

/// Hysteresis state machine over (composite score, iceberg buy ratio)
pub struct StateMachine {
    config: ClassifierConfig,
    current: MarketState,
    cooldown_ms: u64,
    last_update_ms: Option<u64>,
    surface_bullish: bool,
    surface_bearish: bool,
    last_score: Decimal,
    last_ratio: Decimal,
}

impl StateMachine {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            current: MarketState::Neutral,
            cooldown_ms: 0,
            last_update_ms: None,
            surface_bullish: false,
            surface_bearish: false,
            last_score: dec!(50),
            last_ratio: dec!(0.5),
        }
    }

    /// Advance event time, evaluate the decision matrix and apply the
    /// cooldown gate. A transition rejected by the cooldown keeps the
    /// prior state even though the matrix disagrees.
    pub fn update(
        &mut self,
        score: Decimal,
        iceberg_ratio: Decimal,
        ice_buy_volume: Decimal,
        ice_sell_volume: Decimal,
        event_ms: u64,
    ) -> Classification {
        let elapsed = match self.last_update_ms {
            Some(last) => event_ms.saturating_sub(last),
            None => 0,
        };
        self.last_update_ms = Some(event_ms);
        self.cooldown_ms = self.cooldown_ms.saturating_sub(elapsed);

        let target = self.determine_state(score, iceberg_ratio);

        let mut state_changed = false;
        let mut previous_state = None;
        if target != self.current && self.cooldown_ms == 0 {
            previous_state = Some(self.current);
            info!(
                from = self.current.label(),
                to = target.label(),
                score = %score,
                ratio = %iceberg_ratio,
                "state transition"
            );
            self.current = target;
            self.cooldown_ms = self.config.cooldown_secs * 1000;
            state_changed = true;
        }

        let confidence = Self::confidence(score, iceberg_ratio);
        let reason = Self::reason(score, iceberg_ratio, ice_buy_volume, ice_sell_volume);

        self.last_score = score;
        self.last_ratio = iceberg_ratio;

        Classification {
            state: self.current,
            confidence,
            reason,
            cooldown_remaining_ms: self.cooldown_ms,
            state_changed,
            previous_state,
        }
    }

    /// Decision matrix with surface hysteresis. The surface flags are
    /// persistent: once bullish, the looser exit threshold applies
    /// until the reading is actually released.
    fn determine_state(&mut self, score: Decimal, ratio: Decimal) -> MarketState {
        let cfg = &self.config;

        self.surface_bullish = if self.surface_bullish {
            score >= cfg.long_exit
        } else {
            score >= cfg.long_entry
        };
        self.surface_bearish = if self.surface_bearish {
            score <= cfg.short_exit
        } else {
            score <= cfg.short_entry
        };

        let hidden_bullish = ratio >= cfg.hidden_bullish;
        let hidden_bearish = ratio <= cfg.hidden_bearish;

        // First match wins
        if self.surface_bearish && hidden_bullish {
            return MarketState::WashAccumulate;
        }
        if self.surface_bullish && hidden_bearish {
            return MarketState::TrapDistribution;
        }
        if self.surface_bearish && hidden_bearish {
            return MarketState::TrendDown;
        }
        if self.surface_bullish && hidden_bullish {
            return MarketState::TrendUp;
        }
        if !self.surface_bullish && !self.surface_bearish {
            if hidden_bullish {
                return MarketState::Accumulating;
            }
            if hidden_bearish {
                return MarketState::Distributing;
            }
        }
        MarketState::Neutral
    }

    /// 60% weight on score deviation from 50, 40% on ratio deviation
    /// from 0.5, scaled to 0-100 and clamped.
    fn confidence(score: Decimal, ratio: Decimal) -> Decimal {
        let score_dev = (score - dec!(50)).abs() / dec!(50);
        let ratio_dev = (ratio - dec!(0.5)).abs() * Decimal::TWO;
        let confidence = (score_dev * dec!(0.6) + ratio_dev * dec!(0.4)) * dec!(100);
        confidence.clamp(Decimal::ZERO, dec!(100))
    }

    fn reason(
        score: Decimal,
        ratio: Decimal,
        ice_buy_volume: Decimal,
        ice_sell_volume: Decimal,
    ) -> String {
        let score_band = if score >= dec!(70) {
            "strongly bullish"
        } else if score >= dec!(60) {
            "leaning bullish"
        } else if score <= dec!(25) {
            "strongly bearish"
        } else if score <= dec!(35) {
            "leaning bearish"
        } else {
            "neutral"
        };

        let hidden_band = if ratio >= dec!(0.65) {
            "strong buying"
        } else if ratio >= dec!(0.55) {
            "leaning buy"
        } else if ratio <= dec!(0.35) {
            "strong selling"
        } else if ratio <= dec!(0.45) {
            "leaning sell"
        } else {
            "balanced"
        };

        let mut reason = format!(
            "score {:.0} ({score_band}) | hidden flow {:.2} ({hidden_band})",
            score, ratio
        );

        let net = ice_buy_volume - ice_sell_volume;
        if net.abs() >= dec!(10000) {
            let side = if net > Decimal::ZERO { "buy" } else { "sell" };
            reason.push_str(&format!(" | net iceberg {side} {:.0}", net.abs()));
        }

        reason
    }

    pub fn current_state(&self) -> MarketState {
        self.current
    }

    pub fn cooldown_remaining_ms(&self) -> u64 {
        self.cooldown_ms
    }

    /// Inputs from the most recent update, for display surfaces
    pub fn last_inputs(&self) -> (Decimal, Decimal) {
        (self.last_score, self.last_ratio)
    }

    /// Install a state directly (snapshot restore); clears the cooldown
    /// and the hysteresis flags so the next update re-derives them.
    pub fn force_state(&mut self, state: MarketState) {
        self.current = state;
        self.cooldown_ms = 0;
    }

    pub fn reset(&mut self) {
        self.current = MarketState::Neutral;
        self.cooldown_ms = 0;
        self.last_update_ms = None;
        self.surface_bullish = false;
        self.surface_bearish = false;
        self.last_score = dec!(50);
        self.last_ratio = dec!(0.5);
    }
}
