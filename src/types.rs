use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Home, Side::Away];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => f.write_str("Home"),
            Side::Away => f.write_str("Away"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    FullTime,
    HalfTime,
}

impl Period {
    pub fn short_label(self) -> &'static str {
        match self {
            Period::FullTime => "FT",
            Period::HalfTime => "HT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Home => "1",
            Outcome::Draw => "X",
            Outcome::Away => "2",
        }
    }

    pub fn win_for(side: Side) -> Outcome {
        match side {
            Side::Home => Outcome::Home,
            Side::Away => Outcome::Away,
        }
    }
}

pub fn classify_outcome(home_goals: u32, away_goals: u32) -> Outcome {
    if home_goals > away_goals {
        Outcome::Home
    } else if home_goals < away_goals {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }

    pub fn one_hot(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Home => Self {
                home: 1.0,
                draw: 0.0,
                away: 0.0,
            },
            Outcome::Draw => Self {
                home: 0.0,
                draw: 1.0,
                away: 0.0,
            },
            Outcome::Away => Self {
                home: 0.0,
                draw: 0.0,
                away: 1.0,
            },
        }
    }

    /// Squared distance to the one-hot vector of `outcome`.
    pub fn brier(&self, outcome: Outcome) -> f64 {
        let actual = Prob3::one_hot(outcome);
        Outcome::ALL
            .into_iter()
            .map(|o| (self.get(o) - actual.get(o)).powi(2))
            .sum()
    }

    pub fn log_loss(&self, outcome: Outcome) -> f64 {
        -self.get(outcome).clamp(1e-12, 1.0).ln()
    }

    pub fn argmax(&self) -> Outcome {
        if self.home >= self.draw && self.home >= self.away {
            Outcome::Home
        } else if self.draw >= self.away {
            Outcome::Draw
        } else {
            Outcome::Away
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_score_order() {
        assert_eq!(classify_outcome(2, 1), Outcome::Home);
        assert_eq!(classify_outcome(0, 0), Outcome::Draw);
        assert_eq!(classify_outcome(1, 3), Outcome::Away);
    }

    #[test]
    fn argmax_prefers_home_on_ties() {
        let p = Prob3 {
            home: 0.4,
            draw: 0.2,
            away: 0.4,
        };
        assert_eq!(p.argmax(), Outcome::Home);
        assert_eq!(Prob3::one_hot(Outcome::Draw).argmax(), Outcome::Draw);
    }

    #[test]
    fn scores_of_a_sure_hit_and_a_uniform_guess() {
        let sure = Prob3::one_hot(Outcome::Away);
        assert_eq!(sure.brier(Outcome::Away), 0.0);
        assert_eq!(sure.brier(Outcome::Home), 2.0);
        assert!(sure.log_loss(Outcome::Away).abs() < 1e-15);

        let uniform = Prob3::uniform();
        assert!((uniform.brier(Outcome::Draw) - 2.0 / 3.0).abs() < 1e-12);
        assert!((uniform.log_loss(Outcome::Draw) - 3.0_f64.ln()).abs() < 1e-12);
    }
}
