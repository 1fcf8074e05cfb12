//! rapport-core — Pairwise interaction tracking primitives.
//!
//! Embedding matching against an enrolled gallery, per-tick interaction
//! classification (owner/target role assignment), and emotion-driven
//! event weighting.

pub mod classifier;
pub mod matcher;
pub mod source;
pub mod types;
pub mod weight;

pub use classifier::{InteractionClassifier, Observation, TickOutcome};
pub use matcher::{build_gallery, EuclideanMatcher, GalleryEntry, Matcher};
pub use source::{EmbeddingExtractor, ProbeSource};
pub use types::{
    AggregateEdge, Embedding, Expression, ExpressionScores, Identity, InteractionEvent,
    MatchResult, Probe,
};
pub use weight::WeightPolicy;
