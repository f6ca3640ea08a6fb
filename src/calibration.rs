use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adjustment::TeamAdjustments;
use crate::config::{Correction, CorrectionConfig, EngineConfig};
use crate::engine::price_line;
use crate::error::Diagnostics;
use crate::grid::{ScorelineGrid, stable_sum};
use crate::params::{BettingLine, translate};
use crate::types::{Outcome, Period, Prob3, classify_outcome};

/// Largest shift a single correction may cause on any full-time market.
pub const DEFAULT_MAX_SHIFT: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMatch {
    pub spread: f64,
    pub total: f64,
    pub home_goals: u32,
    pub away_goals: u32,
}

impl HistoricalMatch {
    pub fn line(&self) -> BettingLine {
        BettingLine {
            spread: self.spread,
            total: self.total,
        }
    }

    pub fn outcome(&self) -> Outcome {
        classify_outcome(self.home_goals, self.away_goals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    pub fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }
    let scored = || predictions.iter().zip(outcomes);
    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: stable_sum(scored().map(|(p, o)| p.brier(*o))) / n,
        log_loss: stable_sum(scored().map(|(p, o)| p.log_loss(*o))) / n,
        accuracy: scored().filter(|(p, o)| p.argmax() == **o).count() as f64 / n,
    }
}

pub fn calibration_bins(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    class: Outcome,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let width = 1.0 / bins as f64;
    let mut out: Vec<CalibrationBin> = (0..bins)
        .map(|i| CalibrationBin {
            bucket_start: i as f64 * width,
            bucket_end: (i + 1) as f64 * width,
            count: 0,
            avg_pred: 0.0,
            actual_rate: 0.0,
        })
        .collect();

    // running sums first, averaged once every prediction is placed
    for (p, outcome) in predictions.iter().zip(outcomes) {
        let prob = p.get(class).clamp(0.0, 1.0);
        let bin = &mut out[((prob * bins as f64) as usize).min(bins - 1)];
        bin.count += 1;
        bin.avg_pred += prob;
        if *outcome == class {
            bin.actual_rate += 1.0;
        }
    }
    for bin in out.iter_mut().filter(|b| b.count > 0) {
        bin.avg_pred /= bin.count as f64;
        bin.actual_rate /= bin.count as f64;
    }
    out
}

/// Count-weighted gap between predicted and observed rates, averaged over 1, X and 2.
pub fn expected_calibration_error(predictions: &[Prob3], outcomes: &[Outcome], bins: usize) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let n = predictions.len() as f64;
    let per_class: f64 = Outcome::ALL
        .into_iter()
        .map(|class| {
            calibration_bins(predictions, outcomes, class, bins)
                .iter()
                .map(|b| b.count as f64 / n * (b.avg_pred - b.actual_rate).abs())
                .sum::<f64>()
        })
        .sum();
    per_class / 3.0
}

pub fn result_probs(line: BettingLine, config: &EngineConfig) -> Prob3 {
    let mut diag = Diagnostics::new();
    let rates = translate(line, &mut diag);
    let grid = ScorelineGrid::build(
        rates,
        config.full_time.max_goals,
        &config.corrections,
        Period::FullTime,
        &mut diag,
    );
    Prob3 {
        home: grid.sum_where(|i, j| i > j),
        draw: grid.sum_where(|i, j| i == j),
        away: grid.sum_where(|i, j| i < j),
    }
}

pub fn evaluate_config(matches: &[HistoricalMatch], config: &EngineConfig) -> Metrics {
    let predictions: Vec<Prob3> = matches
        .par_iter()
        .map(|m| result_probs(m.line(), config))
        .collect();
    let outcomes: Vec<Outcome> = matches.iter().map(HistoricalMatch::outcome).collect();
    evaluate_probs(&predictions, &outcomes)
}

/// Grid search of the low-score rho over [-0.25, 0.05] by Brier score.
pub fn fit_low_score_rho(matches: &[HistoricalMatch], config: &EngineConfig) -> (f64, Metrics) {
    if matches.is_empty() {
        return (config.corrections.low_score_rho, Metrics::empty());
    }

    let mut best_rho = config.corrections.low_score_rho;
    let mut best = Metrics {
        brier: f64::INFINITY,
        ..Metrics::empty()
    };

    for rho_steps in -25..=5 {
        let rho = rho_steps as f64 / 100.0;
        let trial = config.clone().with_corrections(CorrectionConfig {
            low_score_enabled: true,
            low_score_rho: rho,
            ..config.corrections
        });
        let metrics = evaluate_config(matches, &trial);
        if metrics.brier < best.brier {
            best = metrics;
            best_rho = rho;
        }
    }
    tracing::debug!(rho = best_rho, brier = best.brier, "low-score rho fitted");
    (best_rho, best)
}

/// Largest absolute full-time market move caused by `corrections` on one line.
pub fn correction_drift(
    line: BettingLine,
    corrections: &CorrectionConfig,
    config: &EngineConfig,
) -> f64 {
    let adjustments = TeamAdjustments::none();
    let baseline = price_line(
        line,
        &adjustments,
        &config.clone().with_corrections(CorrectionConfig::none()),
    );
    let corrected = price_line(
        line,
        &adjustments,
        &config.clone().with_corrections(*corrections),
    );
    corrected
        .markets
        .iter()
        .filter(|(key, _)| key.period == Period::FullTime)
        .filter_map(|(key, p)| Some((p - baseline.markets.get(key)?).abs()))
        .fold(0.0, f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrectionCheck {
    pub correction: Correction,
    pub max_drift: f64,
    pub within_limit: bool,
}

/// Runs each correction alone, at the configured coefficient, over `lines`.
pub fn validate_corrections(
    lines: &[BettingLine],
    config: &EngineConfig,
    max_shift: f64,
) -> Vec<CorrectionCheck> {
    Correction::ALL
        .into_iter()
        .map(|correction| {
            let isolated = Correction::ALL
                .into_iter()
                .fold(config.corrections, |cfg, other| {
                    cfg.with(other, other == correction)
                });
            let max_drift = lines
                .par_iter()
                .map(|line| correction_drift(*line, &isolated, config))
                .reduce(|| 0.0, f64::max);
            if max_drift > max_shift {
                tracing::warn!(%correction, max_drift, max_shift, "correction drifts past limit");
            }
            CorrectionCheck {
                correction,
                max_drift,
                within_limit: max_drift <= max_shift,
            }
        })
        .collect()
}
