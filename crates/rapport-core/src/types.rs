use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Face embedding vector (typically 128- or 512-dimensional, depending on
/// the external extractor model). Serializes as a bare float array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Compute Euclidean distance between two embeddings.
    ///
    /// Returns a non-negative dissimilarity; smaller = more similar.
    /// Both embeddings must have the same dimension — probes and
    /// references come from the same extractor model. Mismatched
    /// vectors would compare only over the shared prefix, so the
    /// mismatch is asserted in debug builds.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        debug_assert_eq!(
            self.values.len(),
            other.values.len(),
            "embedding dimensions differ"
        );
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person. Immutable for the lifetime of a run.
///
/// Multiple reference embeddings raise match robustness; the matcher
/// treats them as independent candidates, never an averaged centroid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub reference_embeddings: Vec<Embedding>,
}

/// Fixed expression label set produced by the external detector.
///
/// Declaration order doubles as the tie-break precedence when two labels
/// share the maximum score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Angry,
    Disgusted,
    Fearful,
    Happy,
    Neutral,
    Sad,
    Surprised,
}

impl Expression {
    /// All labels in tie-break precedence order.
    pub const ALL: [Expression; 7] = [
        Expression::Angry,
        Expression::Disgusted,
        Expression::Fearful,
        Expression::Happy,
        Expression::Neutral,
        Expression::Sad,
        Expression::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Angry => "angry",
            Expression::Disgusted => "disgusted",
            Expression::Fearful => "fearful",
            Expression::Happy => "happy",
            Expression::Neutral => "neutral",
            Expression::Sad => "sad",
            Expression::Surprised => "surprised",
        }
    }
}

impl std::str::FromStr for Expression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| format!("unknown expression label: {s}"))
    }
}

/// Per-probe expression scores, each in [0, 1].
///
/// Missing labels are treated as score 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionScores {
    #[serde(flatten)]
    pub scores: std::collections::HashMap<Expression, f32>,
}

impl ExpressionScores {
    pub fn get(&self, label: Expression) -> f32 {
        self.scores.get(&label).copied().unwrap_or(0.0)
    }

    /// The label with the maximum score, ties broken by the fixed
    /// precedence in [`Expression::ALL`].
    pub fn dominant(&self) -> Expression {
        let mut best = Expression::ALL[0];
        let mut best_score = self.get(best);
        for &label in &Expression::ALL[1..] {
            let score = self.get(label);
            if score > best_score {
                best = label;
                best_score = score;
            }
        }
        best
    }
}

/// A detection observed in one sampling tick. Tick-scoped, never stored.
#[derive(Debug, Clone, Deserialize)]
pub struct Probe {
    pub embedding: Embedding,
    #[serde(default)]
    pub expressions: ExpressionScores,
}

/// Result of matching a probe embedding against the enrollment gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Matched identity, or `None` for "unknown".
    pub identity_id: Option<String>,
    /// Distance to the closest reference embedding. Infinite when the
    /// gallery is empty.
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            identity_id: None,
            distance,
        }
    }
}

/// A single qualifying interaction. Immutable once emitted; produced at
/// most once per tick.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionEvent {
    pub id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    /// Positive interaction weight (see the weight policy).
    pub weight: u32,
    pub timestamp: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn new(sender_id: String, receiver_id: String, weight: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            weight,
            timestamp: Utc::now(),
        }
    }
}

/// Running total interaction weight between a sender/receiver pair.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateEdge {
    pub sender_id: String,
    pub receiver_id: String,
    pub cumulative_weight: u64,
}
