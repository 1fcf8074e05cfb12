//! Emotion weight function — maps the target's dominant expression in a
//! sample to an integer interaction weight.

use crate::types::{Expression, ExpressionScores};

/// Default weight for a positively-expressed interaction.
pub const DEFAULT_HIGH_WEIGHT: u32 = 5;
/// Default weight for any other interaction.
pub const DEFAULT_LOW_WEIGHT: u32 = 1;

/// Weighting policy: which expression counts as "positive" and the two
/// weights it selects between.
#[derive(Debug, Clone)]
pub struct WeightPolicy {
    pub positive: Expression,
    pub high: u32,
    pub low: u32,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self {
            positive: Expression::Happy,
            high: DEFAULT_HIGH_WEIGHT,
            low: DEFAULT_LOW_WEIGHT,
        }
    }
}

impl WeightPolicy {
    /// Weight for a sample: `high` when the dominant expression is the
    /// positive label, `low` otherwise. Never zero or negative;
    /// deterministic given the same score map.
    pub fn weight(&self, scores: &ExpressionScores) -> u32 {
        if scores.dominant() == self.positive {
            self.high
        } else {
            self.low
        }
    }
}
