//! Interaction classifier — maps the recognized identities of one sampling
//! tick to an interaction outcome.
//!
//! A degenerate per-tick state machine: two roles (a selectable "owner"
//! and a fixed "target") are evaluated fresh from each tick's matches,
//! with no cross-tick memory. Repeated qualifying ticks each emit a new
//! event; there is no debounce or cooldown here (an optional cooldown is
//! enforced by the engine, off by default).

use crate::types::{ExpressionScores, InteractionEvent, MatchResult};
use crate::weight::WeightPolicy;

/// One recognized-or-unknown observation within a tick: the match result
/// for a probe plus that probe's expression scores.
#[derive(Debug, Clone)]
pub struct Observation {
    pub result: MatchResult,
    pub expressions: ExpressionScores,
}

/// Outcome of classifying one tick. Mutually exclusive, priority order.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// No owner selected; the classifier is inactive.
    Inactive,
    /// Owner and target both recognized: exactly one event.
    Qualifying(InteractionEvent),
    /// Target visible, nobody to interact with.
    TargetOnly,
    /// Owner visible, target absent.
    OwnerOnly,
    /// Neither role recognized (empty or all-unknown sample included).
    NobodyRecognized,
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::Inactive => "inactive",
            TickOutcome::Qualifying(_) => "qualifying",
            TickOutcome::TargetOnly => "target-only",
            TickOutcome::OwnerOnly => "owner-only",
            TickOutcome::NobodyRecognized => "nobody",
        }
    }
}

/// Per-run classifier configuration: the fixed target identity and the
/// emotion weight policy. The owner is passed per tick since it may be
/// changed at any time and takes effect on the next tick.
#[derive(Debug, Clone)]
pub struct InteractionClassifier {
    pub target_id: String,
    pub policy: WeightPolicy,
}

impl InteractionClassifier {
    pub fn new(target_id: impl Into<String>, policy: WeightPolicy) -> Self {
        Self {
            target_id: target_id.into(),
            policy,
        }
    }

    /// Classify one tick from its observations. Unknown matches are
    /// excluded; only recognized identities participate in role
    /// assignment. When the target is recognized its probe's expression
    /// scores drive the event weight.
    pub fn classify(&self, owner_id: Option<&str>, observations: &[Observation]) -> TickOutcome {
        let Some(owner_id) = owner_id else {
            return TickOutcome::Inactive;
        };

        let mut owner_present = false;
        let mut target_expressions: Option<&ExpressionScores> = None;

        for obs in observations {
            let Some(id) = obs.result.identity_id.as_deref() else {
                continue;
            };
            if id == owner_id {
                owner_present = true;
            }
            // First target probe wins if the target somehow appears twice.
            if id == self.target_id && target_expressions.is_none() {
                target_expressions = Some(&obs.expressions);
            }
        }

        match (owner_present, target_expressions) {
            (true, Some(expressions)) => {
                let weight = self.policy.weight(expressions);
                TickOutcome::Qualifying(InteractionEvent::new(
                    self.target_id.clone(),
                    owner_id.to_string(),
                    weight,
                ))
            }
            (false, Some(_)) => TickOutcome::TargetOnly,
            (true, None) => TickOutcome::OwnerOnly,
            (false, None) => TickOutcome::NobodyRecognized,
        }
    }
}
