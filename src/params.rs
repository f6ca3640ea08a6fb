use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, Diagnostics, InputError};
use crate::types::Side;

pub const MIN_RATE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchParameters {
    pub spread_open: f64,
    pub total_open: f64,
    pub spread_current: f64,
    pub total_current: f64,
}

impl MatchParameters {
    pub fn new(
        spread_open: f64,
        total_open: f64,
        spread_current: f64,
        total_current: f64,
    ) -> Result<Self, InputError> {
        let out = Self {
            spread_open,
            total_open,
            spread_current,
            total_current,
        };
        out.validate()?;
        Ok(out)
    }

    pub fn unmoved(spread: f64, total: f64) -> Result<Self, InputError> {
        Self::new(spread, total, spread, total)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        for (field, value) in [
            ("spread_open", self.spread_open),
            ("total_open", self.total_open),
            ("spread_current", self.spread_current),
            ("total_current", self.total_current),
        ] {
            if !value.is_finite() {
                return Err(InputError::NonFinite { field, value });
            }
        }
        Ok(())
    }

    pub fn opening(&self) -> BettingLine {
        BettingLine {
            spread: self.spread_open,
            total: self.total_open,
        }
    }

    pub fn current(&self) -> BettingLine {
        BettingLine {
            spread: self.spread_current,
            total: self.total_current,
        }
    }
}

/// A single spread/total pair. Negative spread favours the home side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BettingLine {
    pub spread: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedGoals {
    pub home: f64,
    pub away: f64,
}

impl ExpectedGoals {
    pub fn new(home: f64, away: f64) -> Self {
        Self { home, away }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            home: self.home * factor,
            away: self.away * factor,
        }
    }
}

pub fn translate(line: BettingLine, diagnostics: &mut Diagnostics) -> ExpectedGoals {
    let raw_home = (line.total - line.spread) / 2.0;
    let raw_away = (line.total + line.spread) / 2.0;
    ExpectedGoals {
        home: clamp_rate(Side::Home, raw_home, diagnostics),
        away: clamp_rate(Side::Away, raw_away, diagnostics),
    }
}

fn clamp_rate(side: Side, raw: f64, diagnostics: &mut Diagnostics) -> f64 {
    if raw >= MIN_RATE {
        return raw;
    }
    // Rates in (0, MIN_RATE) are legal but price identically to zero on the grid.
    diagnostics.record(Diagnostic::RateClamped {
        side,
        raw,
        clamped: MIN_RATE,
    });
    MIN_RATE
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub spread_change: f64,
    pub total_change: f64,
    pub home_rate_change: f64,
    pub away_rate_change: f64,
}

impl Movement {
    pub fn between(params: &MatchParameters, opening: ExpectedGoals, current: ExpectedGoals) -> Self {
        Self {
            spread_change: params.spread_current - params.spread_open,
            total_change: params.total_current - params.total_open,
            home_rate_change: current.home - opening.home,
            away_rate_change: current.away - opening.away,
        }
    }

    /// The spread moved toward the home side.
    pub fn favours_home(&self) -> bool {
        self.spread_change < 0.0
    }
}
