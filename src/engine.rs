use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adjustment::{self, TeamAdjustments};
use crate::coherence;
use crate::config::{CorrectionConfig, EngineConfig, PeriodConfig};
use crate::error::{Diagnostic, Diagnostics, InputError};
use crate::grid::ScorelineGrid;
use crate::half_time;
use crate::markets::{Market, MarketKey, MarketProbabilityMap, aggregate};
use crate::params::{BettingLine, ExpectedGoals, MatchParameters, Movement, translate};
use crate::types::Period;

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodMarkets {
    pub grid: ScorelineGrid,
    pub markets: MarketProbabilityMap,
}

pub fn price_period(
    rates: ExpectedGoals,
    period: Period,
    period_config: &PeriodConfig,
    corrections: &CorrectionConfig,
    tolerance: f64,
    diagnostics: &mut Diagnostics,
) -> PeriodMarkets {
    let _span = tracing::debug_span!(
        "price_period",
        period = period.short_label(),
        home = rates.home,
        away = rates.away
    )
    .entered();

    let grid = ScorelineGrid::build(
        rates,
        period_config.max_goals,
        corrections,
        period,
        diagnostics,
    );
    let mut markets = aggregate(&grid, period, &period_config.markets, tolerance, diagnostics);
    coherence::enforce(&mut markets, &grid, period, tolerance, diagnostics);
    tracing::debug!(markets = markets.len(), "period priced");
    PeriodMarkets { grid, markets }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineReport {
    pub line: BettingLine,
    /// Rates straight from the line, before team form.
    pub base_rates: ExpectedGoals,
    pub rates: ExpectedGoals,
    pub markets: MarketProbabilityMap,
    #[serde(skip)]
    pub full_time_grid: ScorelineGrid,
    pub diagnostics: Vec<Diagnostic>,
}

impl LineReport {
    pub fn value(&self, period: Period, market: Market) -> Option<f64> {
        self.markets.value(period, market)
    }

    pub fn full_time(&self, market: Market) -> Option<f64> {
        self.value(Period::FullTime, market)
    }

    pub fn half_time(&self, market: Market) -> Option<f64> {
        self.value(Period::HalfTime, market)
    }
}

pub fn price_line(
    line: BettingLine,
    adjustments: &TeamAdjustments,
    config: &EngineConfig,
) -> LineReport {
    let _span =
        tracing::debug_span!("price_line", spread = line.spread, total = line.total).entered();
    let mut diagnostics = Diagnostics::new();

    let base_rates = translate(line, &mut diagnostics);
    let rates = adjustment::apply(base_rates, adjustments);

    let full = price_period(
        rates,
        Period::FullTime,
        &config.full_time,
        &config.corrections,
        config.tolerance,
        &mut diagnostics,
    );
    let half = half_time::project(rates, config, &mut diagnostics);
    let combined = half_time::half_time_full_time(
        &half.grid,
        half_time::second_half_rates(rates, config.half_time.fraction),
        config.full_time.max_goals,
    );

    let mut markets = full.markets;
    markets.extend(half.markets);
    markets.extend(combined);

    LineReport {
        line,
        base_rates,
        rates,
        markets,
        full_time_grid: full.grid,
        diagnostics: diagnostics.into_vec(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketShift {
    pub key: MarketKey,
    pub label: String,
    pub opening: f64,
    pub current: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    pub opening: LineReport,
    pub current: LineReport,
    pub movement: Movement,
}

impl MatchReport {
    pub fn market_shifts(&self) -> Vec<MarketShift> {
        self.current
            .markets
            .iter()
            .filter_map(|(key, current)| {
                let opening = self.opening.markets.get(key)?;
                Some(MarketShift {
                    key: *key,
                    label: key.to_string(),
                    opening,
                    current,
                    change: current - opening,
                })
            })
            .collect()
    }

    pub fn largest_shift(&self) -> Option<MarketShift> {
        self.market_shifts()
            .into_iter()
            .max_by(|a, b| a.change.abs().total_cmp(&b.change.abs()))
    }
}

pub fn compute(
    params: &MatchParameters,
    adjustments: &TeamAdjustments,
    config: &EngineConfig,
) -> Result<MatchReport, InputError> {
    params.validate()?;
    let opening = price_line(params.opening(), adjustments, config);
    let current = price_line(params.current(), adjustments, config);
    let movement = Movement::between(params, opening.rates, current.rates);
    Ok(MatchReport {
        opening,
        current,
        movement,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub params: MatchParameters,
    #[serde(default)]
    pub adjustments: TeamAdjustments,
}

/// Prices independent matches in parallel; output order follows `requests`.
pub fn compute_batch(
    requests: &[MatchRequest],
    config: &EngineConfig,
) -> Vec<Result<MatchReport, InputError>> {
    requests
        .par_iter()
        .map(|req| compute(&req.params, &req.adjustments, config))
        .collect()
}
