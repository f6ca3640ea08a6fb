use serde::Serialize;
use thiserror::Error;

use crate::coherence::Violation;
use crate::config::Correction;
use crate::markets::MarketGroup;
use crate::types::{Period, Side};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("{field} must be a finite number, got {value}")]
    NonFinite { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("line {0} is not a multiple of 0.25 goals")]
    InvalidLine(f64),
    #[error("{name} must be between {min} and {max} goals, got {value}")]
    GridSize {
        name: &'static str,
        value: usize,
        min: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    RateClamped { side: Side, raw: f64, clamped: f64 },
    TruncatedMass { period: Period, side: Side, missing: f64 },
    NegativeCellsClamped {
        period: Period,
        correction: Correction,
        cells: usize,
    },
    // falls back to the uncorrected grid, or a point mass if that is empty too
    DegenerateGrid { period: Period },
    GroupRenormalized {
        period: Period,
        group: MarketGroup,
        sum: f64,
    },
    CoherenceRepaired { period: Period, violation: Violation },
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::RateClamped { .. } | Diagnostic::DegenerateGrid { .. } => {
                tracing::warn!(?diagnostic, "input repaired");
            }
            _ => tracing::debug!(?diagnostic, "computation repaired"),
        }
        self.entries.push(diagnostic);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
