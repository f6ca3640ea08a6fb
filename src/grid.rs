use serde::Serialize;

use crate::config::{Correction, CorrectionConfig};
use crate::error::{Diagnostic, Diagnostics};
use crate::params::ExpectedGoals;
use crate::types::{Period, Side};

const TRUNCATION_REPORT: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorelineGrid {
    max_goals: usize,
    // row-major, home goals first
    cells: Vec<f64>,
}

impl ScorelineGrid {
    pub fn independent(rates: ExpectedGoals, max_goals: usize) -> Self {
        let mut diag = Diagnostics::new();
        Self::build(
            rates,
            max_goals,
            &CorrectionConfig::none(),
            Period::FullTime,
            &mut diag,
        )
    }

    pub fn build(
        rates: ExpectedGoals,
        max_goals: usize,
        corrections: &CorrectionConfig,
        period: Period,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let overdispersion = corrections
            .overdispersion_enabled
            .then_some(corrections.overdispersion);

        let home = marginal(rates.home, max_goals, overdispersion);
        let away = marginal(rates.away, max_goals, overdispersion);
        for (side, lambda) in [(Side::Home, rates.home), (Side::Away, rates.away)] {
            let missing = tail_mass(lambda, max_goals);
            if missing > TRUNCATION_REPORT {
                diagnostics.record(Diagnostic::TruncatedMass {
                    period,
                    side,
                    missing,
                });
            }
        }

        let n = max_goals + 1;
        let mut cells = Vec::with_capacity(n * n);
        for p_i in &home {
            for p_j in &away {
                cells.push(p_i * p_j);
            }
        }
        let mut grid = Self { max_goals, cells };
        grid.finish_step(period, Correction::Overdispersion, diagnostics);
        let baseline = grid.clone();

        if corrections.low_score_enabled {
            grid.apply_low_score(rates, corrections.low_score_rho);
            grid.finish_step(period, Correction::LowScore, diagnostics);
        }
        if corrections.correlation_enabled {
            grid.apply_correlation(corrections.correlation);
            grid.finish_step(period, Correction::Correlation, diagnostics);
        }

        if grid.is_proper() {
            return grid;
        }
        diagnostics.record(Diagnostic::DegenerateGrid { period });
        if baseline.is_proper() {
            baseline
        } else {
            Self::point_mass(rates, max_goals)
        }
    }

    fn point_mass(rates: ExpectedGoals, max_goals: usize) -> Self {
        let n = max_goals + 1;
        let mut cells = vec![0.0; n * n];
        let (i, j) = (
            nearest_goals(rates.home, max_goals),
            nearest_goals(rates.away, max_goals),
        );
        cells[i * n + j] = 1.0;
        Self { max_goals, cells }
    }

    pub fn max_goals(&self) -> usize {
        self.max_goals
    }

    fn side_len(&self) -> usize {
        self.max_goals + 1
    }

    pub fn get(&self, home: usize, away: usize) -> f64 {
        if home > self.max_goals || away > self.max_goals {
            return 0.0;
        }
        self.cells[home * self.side_len() + away]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let n = self.side_len();
        self.cells
            .iter()
            .enumerate()
            .map(move |(idx, p)| (idx / n, idx % n, *p))
    }

    pub fn total(&self) -> f64 {
        stable_sum(self.cells.iter().copied())
    }

    pub fn expectation(&self, weight: impl Fn(usize, usize) -> f64) -> f64 {
        stable_sum(self.iter().map(|(i, j, p)| p * weight(i, j)))
    }

    pub fn sum_where(&self, pred: impl Fn(usize, usize) -> bool) -> f64 {
        stable_sum(self.iter().filter(|(i, j, _)| pred(*i, *j)).map(|(_, _, p)| p))
    }

    pub fn home_marginal(&self) -> Vec<f64> {
        (0..self.side_len())
            .map(|i| stable_sum((0..self.side_len()).map(|j| self.get(i, j))))
            .collect()
    }

    pub fn away_marginal(&self) -> Vec<f64> {
        (0..self.side_len())
            .map(|j| stable_sum((0..self.side_len()).map(|i| self.get(i, j))))
            .collect()
    }

    pub fn means(&self) -> ExpectedGoals {
        ExpectedGoals {
            home: self.expectation(|i, _| i as f64),
            away: self.expectation(|_, j| j as f64),
        }
    }

    pub fn covariance(&self) -> f64 {
        let m = self.means();
        self.expectation(|i, j| (i as f64 - m.home) * (j as f64 - m.away))
    }

    fn is_proper(&self) -> bool {
        self.cells.iter().all(|p| p.is_finite() && *p >= 0.0)
            && (self.total() - 1.0).abs() < 1e-9
    }

    fn finish_step(&mut self, period: Period, correction: Correction, diagnostics: &mut Diagnostics) {
        let clamped = self.clamp_negative();
        if clamped > 0 {
            diagnostics.record(Diagnostic::NegativeCellsClamped {
                period,
                correction,
                cells: clamped,
            });
        }
        self.renormalize();
    }

    fn clamp_negative(&mut self) -> usize {
        let mut count = 0;
        for p in &mut self.cells {
            if !p.is_finite() || *p < 0.0 {
                *p = 0.0;
                count += 1;
            }
        }
        count
    }

    fn renormalize(&mut self) {
        let sum = self.total();
        if sum <= 0.0 || !sum.is_finite() {
            return;
        }
        for p in &mut self.cells {
            *p /= sum;
        }
    }

    fn apply_low_score(&mut self, rates: ExpectedGoals, rho: f64) {
        let n = self.side_len();
        for i in 0..=1.min(self.max_goals) {
            for j in 0..=1.min(self.max_goals) {
                self.cells[i * n + j] *= low_score_factor(i, j, rates.home, rates.away, rho);
            }
        }
    }

    // theta * r_i * c_j * z_i * w_j keeps both marginals
    fn apply_correlation(&mut self, theta: f64) {
        let rows = self.home_marginal();
        let cols = self.away_marginal();
        let (Some(z), Some(w)) = (standardize(&rows), standardize(&cols)) else {
            return;
        };
        let total = self.total();
        if total <= 0.0 {
            return;
        }
        let n = self.side_len();
        for i in 0..n {
            for j in 0..n {
                self.cells[i * n + j] += theta * rows[i] * cols[j] * z[i] * w[j] / total;
            }
        }
    }
}

/// Dixon-Coles tau.
pub fn low_score_factor(
    home_goals: usize,
    away_goals: usize,
    lambda_home: f64,
    lambda_away: f64,
    rho: f64,
) -> f64 {
    match (home_goals, away_goals) {
        (0, 0) => 1.0 - lambda_home * lambda_away * rho,
        (0, 1) => 1.0 + lambda_home * rho,
        (1, 0) => 1.0 + lambda_away * rho,
        (1, 1) => 1.0 - rho,
        _ => 1.0,
    }
}

pub fn poisson_pmf(goals: usize, lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return if goals == 0 { 1.0 } else { 0.0 };
    }
    log_poisson(goals, lambda).exp()
}

fn log_poisson(goals: usize, lambda: f64) -> f64 {
    goals as f64 * lambda.ln() - lambda - ln_factorial(goals)
}

fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|k| (k as f64).ln()).sum()
}

pub fn tail_mass(lambda: f64, max_goals: usize) -> f64 {
    (1.0 - stable_sum((0..=max_goals).map(|k| poisson_pmf(k, lambda)))).clamp(0.0, 1.0)
}

fn nearest_goals(lambda: f64, max_goals: usize) -> usize {
    if lambda.is_finite() && lambda > 0.0 {
        (lambda.round() as usize).min(max_goals)
    } else {
        0
    }
}

/// Marginal over `0..=max_goals`, conditioned on the truncation. Weights are
/// relative to the largest log-pmf so far rates never underflow to zero.
pub fn marginal(lambda: f64, max_goals: usize, overdispersion: Option<f64>) -> Vec<f64> {
    if !lambda.is_finite() || lambda <= 0.0 {
        return point_marginal(0, max_goals);
    }
    let logs: Vec<f64> = (0..=max_goals).map(|k| log_poisson(k, lambda)).collect();
    let peak = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = logs
        .iter()
        .enumerate()
        .map(|(k, lp)| {
            let p = (lp - peak).exp();
            match overdispersion {
                Some(phi) => {
                    // zero mass, zero mean, adds phi * lambda of variance
                    let d = k as f64 - lambda;
                    (p * (1.0 + phi * (d * d - k as f64) / (2.0 * lambda))).max(0.0)
                }
                None => p,
            }
        })
        .collect();
    let mass = stable_sum(weights.iter().copied());
    if !mass.is_finite() || mass <= 0.0 {
        return point_marginal(nearest_goals(lambda, max_goals), max_goals);
    }
    weights.into_iter().map(|w| w / mass).collect()
}

fn point_marginal(goals: usize, max_goals: usize) -> Vec<f64> {
    (0..=max_goals).map(|k| if k == goals { 1.0 } else { 0.0 }).collect()
}

pub fn stable_sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut sum = 0.0_f64;
    let mut comp = 0.0_f64;
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            comp += (sum - t) + v;
        } else {
            comp += (v - t) + sum;
        }
        sum = t;
    }
    sum + comp
}

fn standardize(weights: &[f64]) -> Option<Vec<f64>> {
    let mass = stable_sum(weights.iter().copied());
    if mass <= 0.0 {
        return None;
    }
    let mean = stable_sum(weights.iter().enumerate().map(|(k, p)| k as f64 * p)) / mass;
    let var = stable_sum(
        weights
            .iter()
            .enumerate()
            .map(|(k, p)| (k as f64 - mean).powi(2) * p),
    ) / mass;
    if var <= 1e-12 {
        return None;
    }
    let sd = var.sqrt();
    Some((0..weights.len()).map(|k| (k as f64 - mean) / sd).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(home: f64, away: f64) -> ExpectedGoals {
        ExpectedGoals::new(home, away)
    }

    fn build(r: ExpectedGoals, cfg: &CorrectionConfig) -> ScorelineGrid {
        let mut diag = Diagnostics::new();
        ScorelineGrid::build(r, 10, cfg, Period::FullTime, &mut diag)
    }

    #[test]
    fn pmf_matches_closed_form() {
        let lambda: f64 = 1.75;
        let direct = lambda.powi(3) * (-lambda).exp() / 6.0;
        assert!((poisson_pmf(3, lambda) - direct).abs() < 1e-14);
        assert!((poisson_pmf(0, lambda) - (-lambda).exp()).abs() < 1e-15);
    }

    #[test]
    fn pmf_is_stable_for_large_inputs() {
        let p = poisson_pmf(170, 150.0);
        assert!(p.is_finite() && p > 0.0);
        assert_eq!(poisson_pmf(3, 0.0), 0.0);
        assert_eq!(poisson_pmf(0, 0.0), 1.0);
    }

    #[test]
    fn stable_sum_recovers_cancelled_terms() {
        let naive: f64 = [1.0, 1e100, 1.0, -1e100].iter().sum();
        assert_eq!(naive, 0.0);
        assert_eq!(stable_sum([1.0, 1e100, 1.0, -1e100]), 2.0);
    }

    #[test]
    fn every_grid_sums_to_one() {
        for cfg in [
            CorrectionConfig::none(),
            CorrectionConfig::default(),
            CorrectionConfig::only(Correction::Correlation),
            CorrectionConfig::none()
                .with(Correction::LowScore, true)
                .with(Correction::Correlation, true)
                .with(Correction::Overdispersion, true),
        ] {
            let g = build(rates(1.75, 1.0), &cfg);
            assert!((g.total() - 1.0).abs() < 1e-9);
            assert!(g.iter().all(|(_, _, p)| p >= 0.0));
        }
    }

    #[test]
    fn low_score_factor_preserves_mass_on_independent_cells() {
        let (lh, la, rho) = (1.4, 1.1, -0.1);
        let base = |i, j| poisson_pmf(i, lh) * poisson_pmf(j, la);
        let shift: f64 = [(0, 0), (0, 1), (1, 0), (1, 1)]
            .into_iter()
            .map(|(i, j)| base(i, j) * (low_score_factor(i, j, lh, la, rho) - 1.0))
            .sum();
        assert!(shift.abs() < 1e-15);
    }

    #[test]
    fn negative_rho_lifts_low_draws() {
        let base = build(rates(1.4, 1.1), &CorrectionConfig::none());
        let dc = build(rates(1.4, 1.1), &CorrectionConfig::only(Correction::LowScore));
        assert!(dc.get(0, 0) > base.get(0, 0));
        assert!(dc.get(1, 1) > base.get(1, 1));
        assert!(dc.get(1, 0) < base.get(1, 0));
        assert!((dc.get(2, 1) - base.get(2, 1)).abs() < 1e-6);
    }

    #[test]
    fn overdispersion_keeps_mean_and_widens_variance() {
        let lambda = 1.6;
        let plain = marginal(lambda, 20, None);
        let wide = marginal(lambda, 20, Some(0.1));
        let mean = |m: &[f64]| stable_sum(m.iter().enumerate().map(|(k, p)| k as f64 * p));
        let var = |m: &[f64]| {
            let mu = mean(m);
            stable_sum(m.iter().enumerate().map(|(k, p)| (k as f64 - mu).powi(2) * p))
        };
        assert!((stable_sum(wide.iter().copied()) - 1.0).abs() < 1e-9);
        assert!((mean(&wide) - mean(&plain)).abs() < 1e-9);
        assert!((var(&wide) - lambda * 1.1).abs() < 1e-6);
    }

    #[test]
    fn correlation_term_keeps_marginals() {
        let base = build(rates(1.75, 1.0), &CorrectionConfig::none());
        let corr = build(rates(1.75, 1.0), &CorrectionConfig::only(Correction::Correlation));
        for (a, b) in base.home_marginal().iter().zip(corr.home_marginal()) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in base.away_marginal().iter().zip(corr.away_marginal()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(base.covariance().abs() < 1e-9);
        let sd = (1.75_f64 * 1.0).sqrt();
        assert!((corr.covariance() - 0.05 * sd).abs() < 1e-3);
    }

    #[test]
    fn extreme_correlation_is_clamped_and_reported() {
        let cfg = CorrectionConfig {
            correlation_enabled: true,
            correlation: 0.5,
            ..CorrectionConfig::none()
        };
        let mut diag = Diagnostics::new();
        let g = ScorelineGrid::build(rates(4.0, 0.3), 10, &cfg, Period::FullTime, &mut diag);
        assert!((g.total() - 1.0).abs() < 1e-9);
        assert!(g.iter().all(|(_, _, p)| p >= 0.0));
        assert!(diag.entries().iter().any(|d| matches!(
            d,
            Diagnostic::NegativeCellsClamped {
                correction: Correction::Correlation,
                ..
            }
        )));
    }

    #[test]
    fn truncated_tail_is_reported() {
        let mut diag = Diagnostics::new();
        let g = ScorelineGrid::build(
            rates(7.0, 1.0),
            10,
            &CorrectionConfig::none(),
            Period::FullTime,
            &mut diag,
        );
        assert!((g.total() - 1.0).abs() < 1e-9);
        assert!(diag.entries().iter().any(|d| matches!(
            d,
            Diagnostic::TruncatedMass {
                side: Side::Home,
                ..
            }
        )));
    }

    #[test]
    fn far_rates_keep_mass_on_the_grid() {
        let m = marginal(500.0, 10, Some(0.05));
        assert!((stable_sum(m.iter().copied()) - 1.0).abs() < 1e-12);
        assert!(m[10] > 0.99);
        assert!((tail_mass(500.0, 10) - 1.0).abs() < 1e-12);

        let mut diag = Diagnostics::new();
        let g = ScorelineGrid::build(
            rates(500.0, 500.0),
            10,
            &CorrectionConfig::default(),
            Period::FullTime,
            &mut diag,
        );
        assert!((g.total() - 1.0).abs() < 1e-9);
        assert!(g.get(10, 10) > 0.99);
        assert!(!diag.entries().iter().any(|d| matches!(d, Diagnostic::DegenerateGrid { .. })));
    }

    #[test]
    fn point_mass_sits_nearest_the_rates() {
        let g = ScorelineGrid::point_mass(rates(2.4, 40.0), 6);
        assert_eq!(g.get(2, 6), 1.0);
        assert!((g.total() - 1.0).abs() < 1e-15);
        assert!(g.is_proper());
    }

    #[test]
    fn out_of_range_lookup_is_zero() {
        let g = ScorelineGrid::independent(rates(1.0, 1.0), 4);
        assert_eq!(g.get(5, 0), 0.0);
        assert_eq!(g.iter().count(), 25);
    }
}
