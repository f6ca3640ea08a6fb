use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::markets::Line;

pub const FULL_TIME_MAX_GOALS: usize = 10;
pub const HALF_TIME_MAX_GOALS: usize = 6;
pub const HALF_TIME_FRACTION: f64 = 0.45;
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    LowScore,
    Correlation,
    Overdispersion,
}

impl Correction {
    pub const ALL: [Correction; 3] = [
        Correction::LowScore,
        Correction::Correlation,
        Correction::Overdispersion,
    ];
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Correction::LowScore => f.write_str("low-score"),
            Correction::Correlation => f.write_str("correlation"),
            Correction::Overdispersion => f.write_str("overdispersion"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub low_score_enabled: bool,
    /// Dixon-Coles rho (negative lifts 0-0 and 1-1).
    pub low_score_rho: f64,
    pub correlation_enabled: bool,
    pub correlation: f64,
    pub overdispersion_enabled: bool,
    pub overdispersion: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            low_score_enabled: true,
            low_score_rho: -0.10,
            correlation_enabled: false,
            correlation: 0.05,
            overdispersion_enabled: true,
            overdispersion: 0.05,
        }
    }
}

impl CorrectionConfig {
    /// Independent Poisson: the uncorrected baseline.
    pub fn none() -> Self {
        Self {
            low_score_enabled: false,
            correlation_enabled: false,
            overdispersion_enabled: false,
            ..Self::default()
        }
    }

    pub fn only(correction: Correction) -> Self {
        Self::none().with(correction, true)
    }

    pub fn with(mut self, correction: Correction, enabled: bool) -> Self {
        match correction {
            Correction::LowScore => self.low_score_enabled = enabled,
            Correction::Correlation => self.correlation_enabled = enabled,
            Correction::Overdispersion => self.overdispersion_enabled = enabled,
        }
        self
    }

    pub fn is_enabled(&self, correction: Correction) -> bool {
        match correction {
            Correction::LowScore => self.low_score_enabled,
            Correction::Correlation => self.correlation_enabled,
            Correction::Overdispersion => self.overdispersion_enabled,
        }
    }

    pub fn enabled(&self) -> Vec<Correction> {
        Correction::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("low_score_rho", self.low_score_rho, -0.30, 0.30)?;
        check_range("correlation", self.correlation, 0.0, 0.50)?;
        check_range("overdispersion", self.overdispersion, 0.0, 0.50)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSelection {
    pub over_under_lines: Vec<Line>,
    /// Home-side handicap lines; the away side is priced at the mirrored line.
    pub handicap_lines: Vec<Line>,
    pub correct_score_cutoff: u8,
    /// Exact totals are listed up to `cap - 1`, then one "cap or more" bucket.
    pub exact_total_cap: u8,
}

impl MarketSelection {
    pub fn full_time() -> Self {
        Self {
            over_under_lines: [0.5, 1.5, 2.5, 3.5, 4.5, 5.5]
                .into_iter()
                .map(Line::from_goals)
                .collect(),
            handicap_lines: (-10..=10).map(Line::from_quarters).collect(),
            correct_score_cutoff: 5,
            exact_total_cap: 6,
        }
    }

    pub fn half_time() -> Self {
        Self {
            over_under_lines: [0.5, 1.5, 2.5].into_iter().map(Line::from_goals).collect(),
            handicap_lines: [-0.5, 0.0, 0.5].into_iter().map(Line::from_goals).collect(),
            correct_score_cutoff: 3,
            exact_total_cap: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub max_goals: usize,
    pub markets: MarketSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalfTimeConfig {
    /// Share of full-match expected goals scored before the break.
    pub fraction: f64,
    #[serde(flatten)]
    pub period: PeriodConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub corrections: CorrectionConfig,
    pub full_time: PeriodConfig,
    pub half_time: HalfTimeConfig,
    pub tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            corrections: CorrectionConfig::default(),
            full_time: PeriodConfig {
                max_goals: FULL_TIME_MAX_GOALS,
                markets: MarketSelection::full_time(),
            },
            half_time: HalfTimeConfig {
                fraction: HALF_TIME_FRACTION,
                period: PeriodConfig {
                    max_goals: HALF_TIME_MAX_GOALS,
                    markets: MarketSelection::half_time(),
                },
            },
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl EngineConfig {
    pub fn with_corrections(mut self, corrections: CorrectionConfig) -> Self {
        self.corrections = corrections;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.corrections.validate()?;
        check_grid("full_time.max_goals", self.full_time.max_goals)?;
        check_grid("half_time.max_goals", self.half_time.period.max_goals)?;
        check_range("half_time.fraction", self.half_time.fraction, 0.05, 0.95)?;
        check_range("tolerance", self.tolerance, 1e-15, 1e-3)?;
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(raw).context("parse engine config")?;
        config.validate().context("validate engine config")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read engine config {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("create config dir")?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize engine config")?;
        fs::write(&tmp, json).context("write engine config")?;
        fs::rename(&tmp, path).context("swap engine config")?;
        Ok(())
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

fn check_grid(name: &'static str, value: usize) -> Result<(), ConfigError> {
    const MIN: usize = 2;
    const MAX: usize = 20;
    if (MIN..=MAX).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::GridSize {
            name,
            value,
            min: MIN,
            max: MAX,
        })
    }
}
