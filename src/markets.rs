use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::config::MarketSelection;
use crate::error::{ConfigError, Diagnostic, Diagnostics};
use crate::grid::{ScorelineGrid, stable_sum};
use crate::types::{Outcome, Period, Prob3, Side};

/// A goal line in quarter-goal units (`2.5` is stored as `10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Line(i32);

impl Line {
    pub const ZERO: Line = Line(0);

    pub fn from_quarters(quarters: i32) -> Self {
        Self(quarters)
    }

    /// Rounds to the nearest quarter goal. Use `Line::try_from` for untrusted input.
    pub fn from_goals(goals: f64) -> Self {
        Self((goals * 4.0).round() as i32)
    }

    pub fn quarters(self) -> i32 {
        self.0
    }

    pub fn goals(self) -> f64 {
        self.0 as f64 / 4.0
    }

    pub fn is_level(self) -> bool {
        self.0 == 0
    }

    pub fn is_split(self) -> bool {
        self.0 % 2 != 0
    }

    pub fn mirrored(self) -> Self {
        Self(-self.0)
    }

    fn halves(self) -> (Line, Line) {
        (Line(self.0 - 1), Line(self.0 + 1))
    }
}

impl TryFrom<f64> for Line {
    type Error = ConfigError;

    fn try_from(goals: f64) -> Result<Self, Self::Error> {
        let quarters = goals * 4.0;
        if !quarters.is_finite() || (quarters - quarters.round()).abs() > 1e-9 {
            return Err(ConfigError::InvalidLine(goals));
        }
        Ok(Self(quarters.round() as i32))
    }
}

impl From<Line> for f64 {
    fn from(line: Line) -> f64 {
        line.goals()
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.0;
        if q == 0 {
            f.write_str("0")
        } else if q % 4 == 0 {
            write!(f, "{:+}", q / 4)
        } else if q % 2 == 0 {
            write!(f, "{:+.1}", self.goals())
        } else {
            write!(f, "{:+.2}", self.goals())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BttsOutcome {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalSide {
    Over,
    Under,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleChance {
    HomeOrDraw,
    HomeOrAway,
    DrawOrAway,
}

impl DoubleChance {
    pub const ALL: [DoubleChance; 3] = [
        DoubleChance::HomeOrDraw,
        DoubleChance::HomeOrAway,
        DoubleChance::DrawOrAway,
    ];

    pub fn covers(self) -> [Outcome; 2] {
        match self {
            DoubleChance::HomeOrDraw => [Outcome::Home, Outcome::Draw],
            DoubleChance::HomeOrAway => [Outcome::Home, Outcome::Away],
            DoubleChance::DrawOrAway => [Outcome::Draw, Outcome::Away],
        }
    }

    pub fn from_result(self, result: &Prob3) -> f64 {
        let [a, b] = self.covers();
        result.get(a) + result.get(b)
    }

    fn label(self) -> &'static str {
        match self {
            DoubleChance::HomeOrDraw => "1X",
            DoubleChance::HomeOrAway => "12",
            DoubleChance::DrawOrAway => "X2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Market {
    MatchResult { outcome: Outcome },
    BothTeamsToScore { outcome: BttsOutcome },
    Total { side: TotalSide, line: Line },
    DoubleChance { pair: DoubleChance },
    WinToNil { side: Side },
    /// `line` is added to `side`'s score before settling.
    AsianHandicap { side: Side, line: Line },
    CorrectScore { home: u8, away: u8 },
    CorrectScoreOther,
    ExactTotal { goals: u8 },
    ExactTotalOrMore { goals: u8 },
    HalfTimeFullTime { half: Outcome, full: Outcome },
}

impl Market {
    pub fn group(&self) -> Option<MarketGroup> {
        match *self {
            Market::MatchResult { .. } => Some(MarketGroup::Result),
            Market::BothTeamsToScore { .. } => Some(MarketGroup::BothTeamsToScore),
            Market::Total { line, .. } => Some(MarketGroup::Total { line }),
            Market::DoubleChance { .. } => Some(MarketGroup::DoubleChance),
            Market::WinToNil { .. } => None,
            Market::AsianHandicap {
                side: Side::Home,
                line,
            } => Some(MarketGroup::Handicap { home_line: line }),
            Market::AsianHandicap {
                side: Side::Away,
                line,
            } => Some(MarketGroup::Handicap {
                home_line: line.mirrored(),
            }),
            Market::CorrectScore { .. } | Market::CorrectScoreOther => {
                Some(MarketGroup::CorrectScore)
            }
            Market::ExactTotal { .. } | Market::ExactTotalOrMore { .. } => {
                Some(MarketGroup::ExactTotal)
            }
            Market::HalfTimeFullTime { .. } => Some(MarketGroup::HalfTimeFullTime),
        }
    }

    pub fn draw_no_bet(side: Side) -> Self {
        Market::AsianHandicap {
            side,
            line: Line::ZERO,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::MatchResult { outcome } => write!(f, "1X2 {}", outcome.label()),
            Market::BothTeamsToScore {
                outcome: BttsOutcome::Yes,
            } => f.write_str("GG"),
            Market::BothTeamsToScore {
                outcome: BttsOutcome::No,
            } => f.write_str("NG"),
            Market::Total {
                side: TotalSide::Over,
                line,
            } => write!(f, "Over {}", line.goals()),
            Market::Total {
                side: TotalSide::Under,
                line,
            } => write!(f, "Under {}", line.goals()),
            Market::DoubleChance { pair } => f.write_str(pair.label()),
            Market::WinToNil { side } => write!(f, "{side} win to nil"),
            Market::AsianHandicap { side, line } => write!(f, "AH {side} {line}"),
            Market::CorrectScore { home, away } => write!(f, "{home}-{away}"),
            Market::CorrectScoreOther => f.write_str("Any other score"),
            Market::ExactTotal { goals } => write!(f, "Exactly {goals} goals"),
            Market::ExactTotalOrMore { goals } => write!(f, "{goals}+ goals"),
            Market::HalfTimeFullTime { half, full } => {
                write!(f, "HT/FT {}/{}", half.label(), full.label())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "group", rename_all = "snake_case")]
pub enum MarketGroup {
    Result,
    BothTeamsToScore,
    Total { line: Line },
    DoubleChance,
    Handicap { home_line: Line },
    CorrectScore,
    ExactTotal,
    HalfTimeFullTime,
}

impl MarketGroup {
    pub fn expected_sum(self) -> f64 {
        match self {
            MarketGroup::DoubleChance => 2.0,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MarketKey {
    pub period: Period,
    pub market: Market,
}

impl MarketKey {
    pub fn new(period: Period, market: Market) -> Self {
        Self { period, market }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.period.short_label(), self.market)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketRow {
    pub period: Period,
    pub market: Market,
    pub label: String,
    pub probability: f64,
    pub fair_odds: Option<f64>,
}

pub fn fair_odds(probability: f64) -> Option<f64> {
    (probability > 1e-12).then(|| 1.0 / probability)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketProbabilityMap {
    entries: BTreeMap<MarketKey, f64>,
}

impl MarketProbabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: MarketKey, probability: f64) {
        self.entries.insert(key, probability);
    }

    pub fn set(&mut self, period: Period, market: Market, probability: f64) {
        self.insert(MarketKey::new(period, market), probability);
    }

    pub fn get(&self, key: &MarketKey) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn value(&self, period: Period, market: Market) -> Option<f64> {
        self.get(&MarketKey::new(period, market))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarketKey, f64)> + '_ {
        self.entries.iter().map(|(k, v)| (k, *v))
    }

    pub fn extend(&mut self, other: MarketProbabilityMap) {
        self.entries.extend(other.entries);
    }

    pub fn result(&self, period: Period) -> Option<Prob3> {
        let get = |outcome| self.value(period, Market::MatchResult { outcome });
        Some(Prob3 {
            home: get(Outcome::Home)?,
            draw: get(Outcome::Draw)?,
            away: get(Outcome::Away)?,
        })
    }

    pub fn groups(&self, period: Period) -> BTreeSet<MarketGroup> {
        self.entries
            .keys()
            .filter(|k| k.period == period)
            .filter_map(|k| k.market.group())
            .collect()
    }

    pub fn group_members(&self, period: Period, group: MarketGroup) -> Vec<MarketKey> {
        self.entries
            .keys()
            .filter(|k| k.period == period && k.market.group() == Some(group))
            .copied()
            .collect()
    }

    pub fn group_sum(&self, period: Period, group: MarketGroup) -> f64 {
        stable_sum(
            self.group_members(period, group)
                .iter()
                .filter_map(|k| self.get(k)),
        )
    }

    /// Rescales any closed group that drifted from its expected sum.
    pub fn normalize_groups(&mut self, period: Period, tolerance: f64, diagnostics: &mut Diagnostics) {
        for group in self.groups(period) {
            let keys = self.group_members(period, group);
            let expected = group.expected_sum();
            let sum = self.group_sum(period, group);
            let negative = keys.iter().any(|k| self.entries[k] < 0.0);
            if !negative && (sum - expected).abs() <= tolerance {
                continue;
            }

            for k in &keys {
                if let Some(p) = self.entries.get_mut(k) {
                    *p = p.max(0.0);
                }
            }
            let clamped = self.group_sum(period, group);
            for k in &keys {
                if let Some(p) = self.entries.get_mut(k) {
                    *p = if clamped > 0.0 {
                        *p * expected / clamped
                    } else {
                        expected / keys.len() as f64
                    };
                }
            }
            diagnostics.record(Diagnostic::GroupRenormalized { period, group, sum });
        }
    }

    pub fn top_correct_scores(&self, period: Period, n: usize) -> Vec<(u8, u8, f64)> {
        let mut scores: Vec<(u8, u8, f64)> = self
            .iter()
            .filter(|(k, _)| k.period == period)
            .filter_map(|(k, p)| match k.market {
                Market::CorrectScore { home, away } => Some((home, away, p)),
                _ => None,
            })
            .collect();
        scores.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));
        scores.truncate(n);
        scores
    }

    pub fn rows(&self) -> Vec<MarketRow> {
        self.iter()
            .map(|(k, p)| MarketRow {
                period: k.period,
                market: k.market,
                label: k.to_string(),
                probability: p,
                fair_odds: fair_odds(p),
            })
            .collect()
    }
}

impl Serialize for MarketProbabilityMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows())
    }
}

pub fn aggregate(
    grid: &ScorelineGrid,
    period: Period,
    selection: &MarketSelection,
    tolerance: f64,
    diagnostics: &mut Diagnostics,
) -> MarketProbabilityMap {
    let mut map = MarketProbabilityMap::new();

    let result = Prob3 {
        home: grid.sum_where(|i, j| i > j),
        draw: grid.sum_where(|i, j| i == j),
        away: grid.sum_where(|i, j| i < j),
    };
    for outcome in Outcome::ALL {
        map.set(period, Market::MatchResult { outcome }, result.get(outcome));
    }
    for pair in DoubleChance::ALL {
        map.set(period, Market::DoubleChance { pair }, pair.from_result(&result));
    }

    map.set(
        period,
        Market::BothTeamsToScore {
            outcome: BttsOutcome::Yes,
        },
        grid.sum_where(|i, j| i > 0 && j > 0),
    );
    map.set(
        period,
        Market::BothTeamsToScore {
            outcome: BttsOutcome::No,
        },
        grid.sum_where(|i, j| i == 0 || j == 0),
    );

    for &line in &selection.over_under_lines {
        let over = settle(grid, line.mirrored(), |i, j| 4 * (i + j) as i32);
        let under = settle(grid, line, |i, j| -4 * (i + j) as i32);
        map.set(
            period,
            Market::Total {
                side: TotalSide::Over,
                line,
            },
            over,
        );
        map.set(
            period,
            Market::Total {
                side: TotalSide::Under,
                line,
            },
            under,
        );
    }

    map.set(
        period,
        Market::WinToNil { side: Side::Home },
        grid.sum_where(|i, j| i > 0 && j == 0),
    );
    map.set(
        period,
        Market::WinToNil { side: Side::Away },
        grid.sum_where(|i, j| i == 0 && j > 0),
    );

    let mut lines: BTreeSet<Line> = selection.handicap_lines.iter().copied().collect();
    lines.insert(Line::ZERO);
    for line in lines {
        let home = settle(grid, line, |i, j| 4 * (i as i32 - j as i32));
        let away = settle(grid, line.mirrored(), |i, j| 4 * (j as i32 - i as i32));
        map.set(
            period,
            Market::AsianHandicap {
                side: Side::Home,
                line,
            },
            home,
        );
        map.set(
            period,
            Market::AsianHandicap {
                side: Side::Away,
                line: line.mirrored(),
            },
            away,
        );
    }

    let cutoff = (selection.correct_score_cutoff as usize).min(grid.max_goals());
    for home in 0..=cutoff {
        for away in 0..=cutoff {
            map.set(
                period,
                Market::CorrectScore {
                    home: home as u8,
                    away: away as u8,
                },
                grid.get(home, away),
            );
        }
    }
    map.set(
        period,
        Market::CorrectScoreOther,
        grid.sum_where(|i, j| i > cutoff || j > cutoff),
    );

    let cap = selection.exact_total_cap.max(1);
    for goals in 0..cap {
        map.set(
            period,
            Market::ExactTotal { goals },
            grid.sum_where(|i, j| i + j == goals as usize),
        );
    }
    map.set(
        period,
        Market::ExactTotalOrMore { goals: cap },
        grid.sum_where(|i, j| i + j >= cap as usize),
    );

    map.normalize_groups(period, tolerance, diagnostics);
    map
}

// `margin` is in quarter goals; the bet wins when margin + line > 0, pushes count half.
fn settle(grid: &ScorelineGrid, line: Line, margin: impl Fn(usize, usize) -> i32 + Copy) -> f64 {
    if line.is_split() {
        let (lower, upper) = line.halves();
        return 0.5 * (settle(grid, lower, margin) + settle(grid, upper, margin));
    }
    grid.expectation(|i, j| match (margin(i, j) + line.quarters()).cmp(&0) {
        Ordering::Greater => 1.0,
        Ordering::Equal => 0.5,
        Ordering::Less => 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ExpectedGoals;

    fn grid() -> ScorelineGrid {
        ScorelineGrid::independent(ExpectedGoals::new(1.75, 1.0), 10)
    }

    fn ft(map: &MarketProbabilityMap, market: Market) -> f64 {
        map.value(Period::FullTime, market).unwrap()
    }

    fn priced() -> MarketProbabilityMap {
        let mut diag = Diagnostics::new();
        aggregate(
            &grid(),
            Period::FullTime,
            &MarketSelection::full_time(),
            1e-9,
            &mut diag,
        )
    }

    #[test]
    fn signed_zero_is_one_line() {
        assert_eq!(Line::from_goals(-0.0), Line::from_goals(0.0));
        assert_eq!(Line::try_from(-0.0).unwrap(), Line::ZERO);
        assert_eq!(Line::ZERO.to_string(), "0");
        assert_eq!(Line::from_goals(-0.5).to_string(), "-0.5");
        assert_eq!(Line::from_goals(1.0).to_string(), "+1");
        assert_eq!(Line::from_goals(0.75).to_string(), "+0.75");
        assert!(Line::try_from(0.3).is_err());
    }

    #[test]
    fn level_handicap_keys_are_shared() {
        let map = priced();
        let level = MarketKey::new(Period::FullTime, Market::draw_no_bet(Side::Home));
        let negative_zero = MarketKey::new(
            Period::FullTime,
            Market::AsianHandicap {
                side: Side::Home,
                line: Line::from_goals(-0.0),
            },
        );
        assert_eq!(level, negative_zero);
        assert!(map.get(&negative_zero).unwrap() > 0.0);
    }

    #[test]
    fn level_handicap_splits_the_draw() {
        let map = priced();
        let r = map.result(Period::FullTime).unwrap();
        assert!((ft(&map, Market::draw_no_bet(Side::Home)) - (r.home + r.draw / 2.0)).abs() < 1e-12);
        assert!((ft(&map, Market::draw_no_bet(Side::Away)) - (r.away + r.draw / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn half_goal_handicap_matches_result() {
        let map = priced();
        let r = map.result(Period::FullTime).unwrap();
        let home_minus_half = Market::AsianHandicap {
            side: Side::Home,
            line: Line::from_goals(-0.5),
        };
        let home_plus_half = Market::AsianHandicap {
            side: Side::Home,
            line: Line::from_goals(0.5),
        };
        assert!((ft(&map, home_minus_half) - r.home).abs() < 1e-12);
        assert!((ft(&map, home_plus_half) - (r.home + r.draw)).abs() < 1e-12);
    }

    #[test]
    fn quarter_line_averages_neighbours() {
        let map = priced();
        let ah = |q| {
            ft(
                &map,
                Market::AsianHandicap {
                    side: Side::Home,
                    line: Line::from_quarters(q),
                },
            )
        };
        assert!((ah(-1) - 0.5 * (ah(-2) + ah(0))).abs() < 1e-12);
        assert!((ah(-3) - 0.5 * (ah(-4) + ah(-2))).abs() < 1e-12);
    }

    #[test]
    fn groups_close() {
        let map = priced();
        for group in map.groups(Period::FullTime) {
            let sum = map.group_sum(Period::FullTime, group);
            assert!((sum - group.expected_sum()).abs() < 1e-9, "{group:?} = {sum}");
        }
        assert!(map.groups(Period::FullTime).contains(&MarketGroup::DoubleChance));
    }

    #[test]
    fn reference_line_baseline() {
        let map = priced();
        let over = |g| {
            ft(
                &map,
                Market::Total {
                    side: TotalSide::Over,
                    line: Line::from_goals(g),
                },
            )
        };
        let gg = ft(
            &map,
            Market::BothTeamsToScore {
                outcome: BttsOutcome::Yes,
            },
        );
        assert!((gg - 0.522).abs() < 0.002);
        assert!((over(2.5) - 0.519).abs() < 0.002);
        assert!((over(3.5) - 0.297).abs() < 0.002);
    }

    #[test]
    fn integer_total_splits_push() {
        let g = grid();
        let mut diag = Diagnostics::new();
        let selection = MarketSelection {
            over_under_lines: vec![Line::from_goals(2.0)],
            ..MarketSelection::full_time()
        };
        let map = aggregate(&g, Period::FullTime, &selection, 1e-9, &mut diag);
        let over = map
            .value(
                Period::FullTime,
                Market::Total {
                    side: TotalSide::Over,
                    line: Line::from_goals(2.0),
                },
            )
            .unwrap();
        let exact_two = g.sum_where(|i, j| i + j == 2);
        let above = g.sum_where(|i, j| i + j > 2);
        assert!((over - (above + exact_two / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn drifted_group_is_rescaled() {
        let mut map = MarketProbabilityMap::new();
        for (outcome, p) in [(Outcome::Home, 0.5), (Outcome::Draw, 0.3), (Outcome::Away, 0.4)] {
            map.set(Period::FullTime, Market::MatchResult { outcome }, p);
        }
        let mut diag = Diagnostics::new();
        map.normalize_groups(Period::FullTime, 1e-9, &mut diag);
        let r = map.result(Period::FullTime).unwrap();
        assert!((r.home + r.draw + r.away - 1.0).abs() < 1e-12);
        assert!((r.home / r.away - 1.25).abs() < 1e-12);
        assert_eq!(diag.len(), 1);
    }

    #[test]
    fn negative_member_is_clamped() {
        let mut map = MarketProbabilityMap::new();
        let yes = Market::BothTeamsToScore {
            outcome: BttsOutcome::Yes,
        };
        let no = Market::BothTeamsToScore {
            outcome: BttsOutcome::No,
        };
        map.set(Period::HalfTime, yes, -0.1);
        map.set(Period::HalfTime, no, 1.1);
        let mut diag = Diagnostics::new();
        map.normalize_groups(Period::HalfTime, 1e-9, &mut diag);
        assert_eq!(map.value(Period::HalfTime, yes), Some(0.0));
        assert_eq!(map.value(Period::HalfTime, no), Some(1.0));
    }

    #[test]
    fn top_scores_are_sorted() {
        let map = priced();
        let top = map.top_correct_scores(Period::FullTime, 3);
        assert_eq!(top.len(), 3);
        assert!(top[0].2 >= top[1].2 && top[1].2 >= top[2].2);
        // λa = 1 makes 1-0 and 1-1 equally likely.
        assert!(matches!((top[0].0, top[0].1), (1, 0) | (1, 1)));
    }

    #[test]
    fn rows_carry_labels_and_odds() {
        let map = priced();
        let rows = map.rows();
        assert_eq!(rows.len(), map.len());
        let dnb = rows
            .iter()
            .find(|r| r.market == Market::draw_no_bet(Side::Home))
            .unwrap();
        assert_eq!(dnb.label, "FT AH Home 0");
        assert!(dnb.fair_odds.unwrap() > 1.0);
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"kind\":\"asian_handicap\""));
    }
}
