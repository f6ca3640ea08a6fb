use serde::{Deserialize, Serialize};

use crate::params::ExpectedGoals;
use crate::types::Side;

/// Hard ceiling on how far team form may move an expected-goal rate.
pub const MIN_FACTOR: f64 = 0.97;
pub const MAX_FACTOR: f64 = 1.03;

const FORM_WEIGHTS: [f64; 5] = [0.35, 0.25, 0.20, 0.12, 0.08];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExternalAdjustment {
    pub form_factor: f64,
    pub variance: f64,
}

impl ExternalAdjustment {
    /// Out-of-range inputs are pulled back into the valid domain; non-finite ones become neutral.
    pub fn new(form_factor: f64, variance: f64) -> Self {
        let form_factor = if form_factor.is_finite() {
            form_factor.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let variance = if variance.is_finite() {
            variance.max(0.0)
        } else {
            0.0
        };
        Self {
            form_factor,
            variance,
        }
    }

    pub fn neutral() -> Self {
        Self {
            form_factor: 0.5,
            variance: 0.0,
        }
    }

    pub fn confidence(&self) -> f64 {
        if self.variance < 1.0 {
            1.0
        } else if self.variance < 2.0 {
            1.0 - (self.variance - 1.0) * 0.6
        } else {
            0.3
        }
    }

    pub fn factor(&self) -> f64 {
        let base = 0.98 + self.form_factor * 0.04;
        (1.0 + (base - 1.0) * self.confidence()).clamp(MIN_FACTOR, MAX_FACTOR)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamAdjustments {
    #[serde(default)]
    pub home: Option<ExternalAdjustment>,
    #[serde(default)]
    pub away: Option<ExternalAdjustment>,
}

impl TeamAdjustments {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, side: Side) -> Option<&ExternalAdjustment> {
        match side {
            Side::Home => self.home.as_ref(),
            Side::Away => self.away.as_ref(),
        }
    }
}

pub fn apply(rates: ExpectedGoals, adjustments: &TeamAdjustments) -> ExpectedGoals {
    let factor = |side: Side| adjustments.get(side).map_or(1.0, ExternalAdjustment::factor);
    ExpectedGoals {
        home: rates.home * factor(Side::Home),
        away: rates.away * factor(Side::Away),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "D")]
    Draw,
    #[serde(rename = "L")]
    Loss,
}

impl MatchResult {
    fn points(self) -> f64 {
        match self {
            MatchResult::Win => 1.0,
            MatchResult::Draw => 0.5,
            MatchResult::Loss => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentMatch {
    pub result: MatchResult,
    pub goals_for: u32,
    pub goals_against: u32,
}

/// Most recent match first. Only the last five weigh into the form factor.
pub fn derive_adjustment(recent: &[RecentMatch]) -> ExternalAdjustment {
    if recent.is_empty() {
        return ExternalAdjustment::neutral();
    }

    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for (m, w) in recent.iter().zip(FORM_WEIGHTS) {
        weighted += m.result.points() * w;
        weight_sum += w;
    }
    let form = weighted / weight_sum;

    let n = recent.len() as f64;
    let mean = recent.iter().map(|m| m.goals_for as f64).sum::<f64>() / n;
    let variance = recent
        .iter()
        .map(|m| (m.goals_for as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    ExternalAdjustment::new(form, variance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(result: MatchResult, goals_for: u32) -> RecentMatch {
        RecentMatch {
            result,
            goals_for,
            goals_against: 0,
        }
    }

    #[test]
    fn factor_range_follows_form() {
        assert!((ExternalAdjustment::new(1.0, 0.0).factor() - 1.02).abs() < 1e-12);
        assert!((ExternalAdjustment::new(0.0, 0.0).factor() - 0.98).abs() < 1e-12);
        assert!((ExternalAdjustment::neutral().factor() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn variance_damps_toward_neutral() {
        let calm = ExternalAdjustment::new(1.0, 0.5);
        let noisy = ExternalAdjustment::new(1.0, 1.5);
        let wild = ExternalAdjustment::new(1.0, 4.0);
        assert!((noisy.confidence() - 0.7).abs() < 1e-12);
        assert!((wild.confidence() - 0.3).abs() < 1e-12);
        assert!(calm.factor() > noisy.factor());
        assert!(noisy.factor() > wild.factor());
        assert!((wild.factor() - 1.006).abs() < 1e-12);
    }

    #[test]
    fn factor_never_leaves_ceiling() {
        for form in [-5.0, 0.0, 0.3, 1.0, 7.0, f64::NAN] {
            for variance in [-1.0, 0.0, 1.2, 3.0, f64::INFINITY] {
                let f = ExternalAdjustment::new(form, variance).factor();
                assert!((MIN_FACTOR..=MAX_FACTOR).contains(&f));
            }
        }
    }

    #[test]
    fn missing_adjustment_is_identity() {
        let rates = ExpectedGoals::new(1.4, 1.1);
        assert_eq!(apply(rates, &TeamAdjustments::none()), rates);
    }

    #[test]
    fn adjustment_applies_per_side() {
        let rates = ExpectedGoals::new(1.5, 1.0);
        let adj = TeamAdjustments {
            home: Some(ExternalAdjustment::new(1.0, 0.0)),
            away: None,
        };
        let out = apply(rates, &adj);
        assert!((out.home - 1.53).abs() < 1e-12);
        assert_eq!(out.away, 1.0);
    }

    #[test]
    fn form_weights_recent_matches_most() {
        let hot = derive_adjustment(&[
            m(MatchResult::Win, 2),
            m(MatchResult::Win, 2),
            m(MatchResult::Loss, 2),
            m(MatchResult::Loss, 2),
            m(MatchResult::Loss, 2),
        ]);
        assert!((hot.form_factor - 0.60).abs() < 1e-12);
        assert_eq!(hot.variance, 0.0);

        let short = derive_adjustment(&[m(MatchResult::Draw, 0), m(MatchResult::Win, 4)]);
        assert!((short.form_factor - (0.5 * 0.35 + 0.25) / 0.60).abs() < 1e-12);
        assert!((short.variance - 4.0).abs() < 1e-12);
    }

    #[test]
    fn no_history_is_neutral() {
        assert_eq!(derive_adjustment(&[]), ExternalAdjustment::neutral());
    }
}
