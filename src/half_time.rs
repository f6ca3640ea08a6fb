use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::engine::{PeriodMarkets, price_period};
use crate::error::Diagnostics;
use crate::grid::{ScorelineGrid, stable_sum};
use crate::markets::{Market, MarketProbabilityMap};
use crate::params::ExpectedGoals;
use crate::types::{Outcome, Period, classify_outcome};

pub fn first_half_rates(rates: ExpectedGoals, fraction: f64) -> ExpectedGoals {
    rates.scaled(fraction)
}

pub fn second_half_rates(rates: ExpectedGoals, fraction: f64) -> ExpectedGoals {
    rates.scaled(1.0 - fraction)
}

pub fn project(
    rates: ExpectedGoals,
    config: &EngineConfig,
    diagnostics: &mut Diagnostics,
) -> PeriodMarkets {
    let half = first_half_rates(rates, config.half_time.fraction);
    price_period(
        half,
        Period::HalfTime,
        &config.half_time.period,
        &config.corrections,
        config.tolerance,
        diagnostics,
    )
}

/// Joint half-time and full-time result, keyed under the full-time period.
///
/// Second-half goals are independent Poisson draws added to the first-half
/// score, so a half-time lead carries into the full-time result.
pub fn half_time_full_time(
    first_half: &ScorelineGrid,
    second_half: ExpectedGoals,
    max_goals: usize,
) -> MarketProbabilityMap {
    let rest = ScorelineGrid::independent(second_half, max_goals);
    let mut joint: BTreeMap<(Outcome, Outcome), Vec<f64>> = BTreeMap::new();
    for (i, j, p) in first_half.iter().filter(|(_, _, p)| *p > 0.0) {
        let half = classify_outcome(i as u32, j as u32);
        for (k, l, q) in rest.iter() {
            let full = classify_outcome((i + k) as u32, (j + l) as u32);
            joint.entry((half, full)).or_default().push(p * q);
        }
    }

    let cells: Vec<((Outcome, Outcome), f64)> = Outcome::ALL
        .into_iter()
        .flat_map(|half| Outcome::ALL.into_iter().map(move |full| (half, full)))
        .map(|pair| (pair, joint.get(&pair).map_or(0.0, |v| stable_sum(v.iter().copied()))))
        .collect();
    let total = stable_sum(cells.iter().map(|(_, p)| *p));

    let mut map = MarketProbabilityMap::new();
    for ((half, full), p) in cells {
        let p = if total > 0.0 { p / total } else { 1.0 / 9.0 };
        map.set(Period::FullTime, Market::HalfTimeFullTime { half, full }, p);
    }
    map
}
