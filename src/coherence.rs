use serde::Serialize;

use crate::error::{Diagnostic, Diagnostics};
use crate::grid::ScorelineGrid;
use crate::markets::{BttsOutcome, DoubleChance, Line, Market, MarketProbabilityMap, TotalSide};
use crate::types::{Outcome, Period, Side};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    /// Win-to-nil on both sides plus 0-0 exceeds "not both teams score".
    WinToNilExceedsNoGoal { excess: f64 },
    LevelHandicapMismatch {
        side: Side,
        expected: f64,
        actual: f64,
    },
    DoubleChanceMismatch {
        pair: DoubleChance,
        expected: f64,
        actual: f64,
    },
    WinToNilExceedsWin {
        side: Side,
        win_to_nil: f64,
        win: f64,
    },
    TotalLadderInverted { lower: Line, upper: Line },
}

pub fn check(
    map: &MarketProbabilityMap,
    grid: &ScorelineGrid,
    period: Period,
    tolerance: f64,
) -> Vec<Violation> {
    let mut scratch = map.clone();
    apply_rules(&mut scratch, grid, period, tolerance)
}

/// Repairs every violated rule in place and records one diagnostic per repair.
pub fn enforce(
    map: &mut MarketProbabilityMap,
    grid: &ScorelineGrid,
    period: Period,
    tolerance: f64,
    diagnostics: &mut Diagnostics,
) {
    for violation in apply_rules(map, grid, period, tolerance) {
        diagnostics.record(Diagnostic::CoherenceRepaired { period, violation });
    }
}

fn apply_rules(
    map: &mut MarketProbabilityMap,
    grid: &ScorelineGrid,
    period: Period,
    tolerance: f64,
) -> Vec<Violation> {
    let mut found = Vec::new();
    win_to_nil_within_no_goal(map, grid, period, tolerance, &mut found);
    level_handicap_splits_draw(map, period, tolerance, &mut found);
    double_chance_is_union(map, period, tolerance, &mut found);
    win_to_nil_within_win(map, period, tolerance, &mut found);
    total_ladder_descends(map, period, tolerance, &mut found);
    found
}

fn win_to_nil_within_no_goal(
    map: &mut MarketProbabilityMap,
    grid: &ScorelineGrid,
    period: Period,
    tolerance: f64,
    found: &mut Vec<Violation>,
) {
    let no_goal = Market::BothTeamsToScore {
        outcome: BttsOutcome::No,
    };
    let home = Market::WinToNil { side: Side::Home };
    let away = Market::WinToNil { side: Side::Away };
    let (Some(ng), Some(wh), Some(wa)) = (
        map.value(period, no_goal),
        map.value(period, home),
        map.value(period, away),
    ) else {
        return;
    };

    let nil_nil = grid.get(0, 0);
    let excess = wh + wa + nil_nil - ng;
    if excess <= tolerance || wh + wa <= 0.0 {
        return;
    }
    let factor = (ng - nil_nil).max(0.0) / (wh + wa);
    map.set(period, home, wh * factor);
    map.set(period, away, wa * factor);
    found.push(Violation::WinToNilExceedsNoGoal { excess });
}

fn level_handicap_splits_draw(
    map: &mut MarketProbabilityMap,
    period: Period,
    tolerance: f64,
    found: &mut Vec<Violation>,
) {
    let Some(result) = map.result(period) else {
        return;
    };
    for side in Side::BOTH {
        let market = Market::draw_no_bet(side);
        let Some(actual) = map.value(period, market) else {
            continue;
        };
        let expected = result.get(Outcome::win_for(side)) + result.draw / 2.0;
        if (actual - expected).abs() > tolerance {
            map.set(period, market, expected);
            found.push(Violation::LevelHandicapMismatch {
                side,
                expected,
                actual,
            });
        }
    }
}

fn double_chance_is_union(
    map: &mut MarketProbabilityMap,
    period: Period,
    tolerance: f64,
    found: &mut Vec<Violation>,
) {
    let Some(result) = map.result(period) else {
        return;
    };
    for pair in DoubleChance::ALL {
        let market = Market::DoubleChance { pair };
        let Some(actual) = map.value(period, market) else {
            continue;
        };
        let expected = pair.from_result(&result);
        if (actual - expected).abs() > tolerance {
            map.set(period, market, expected);
            found.push(Violation::DoubleChanceMismatch {
                pair,
                expected,
                actual,
            });
        }
    }
}

fn win_to_nil_within_win(
    map: &mut MarketProbabilityMap,
    period: Period,
    tolerance: f64,
    found: &mut Vec<Violation>,
) {
    let Some(result) = map.result(period) else {
        return;
    };
    for side in Side::BOTH {
        let market = Market::WinToNil { side };
        let Some(win_to_nil) = map.value(period, market) else {
            continue;
        };
        let win = result.get(Outcome::win_for(side));
        if win_to_nil > win + tolerance {
            map.set(period, market, win);
            found.push(Violation::WinToNilExceedsWin {
                side,
                win_to_nil,
                win,
            });
        }
    }
}

fn total_ladder_descends(
    map: &mut MarketProbabilityMap,
    period: Period,
    tolerance: f64,
    found: &mut Vec<Violation>,
) {
    // BTreeMap order puts the lines of each side in ascending order.
    let ladder: Vec<(Line, f64)> = map
        .iter()
        .filter_map(|(key, p)| match key.market {
            Market::Total {
                side: TotalSide::Over,
                line,
            } if key.period == period => Some((line, p)),
            _ => None,
        })
        .collect();

    let mut ceiling: Option<(Line, f64)> = None;
    for (line, over) in ladder {
        match ceiling {
            Some((lower, cap)) if over > cap + tolerance => {
                map.set(
                    period,
                    Market::Total {
                        side: TotalSide::Over,
                        line,
                    },
                    cap,
                );
                map.set(
                    period,
                    Market::Total {
                        side: TotalSide::Under,
                        line,
                    },
                    1.0 - cap,
                );
                found.push(Violation::TotalLadderInverted {
                    lower,
                    upper: line,
                });
                ceiling = Some((line, cap));
            }
            _ => ceiling = Some((line, over)),
        }
    }
}
