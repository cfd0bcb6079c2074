use crate::error::ExpansionError;
use crate::rules::UnrollBehaviour;

/// Emission strategy chosen for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnrollDecision {
    Unroll,
    Loop,
}

/// One rule reference contributing an unroll annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAnnotation {
    pub name: String,
    pub behaviour: UnrollBehaviour,
}

/// Outcome of the policy resolution, with enough context for the
/// agent to notify the diagnostic sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub decision: UnrollDecision,
    /// Structured violation when annotations are irreconcilable or
    /// collide with fast mode; the decision falls back to `Loop`.
    pub violation: Option<ExpansionError>,
    /// True when the chosen decision disagrees with what the size
    /// threshold alone implies, without any explicit annotation
    /// requesting the disagreement.
    pub implicit_override: bool,
}

/// Decide unrolled vs. looped emission for one line.
///
/// `lhs_size` and `rhs_size` are the assignment-set cardinalities of
/// the two sides; `annotations` aggregates every rule reference on
/// either side.
pub fn resolve_unroll(
    lhs_size: usize,
    rhs_size: usize,
    annotations: &[RuleAnnotation],
    threshold: usize,
    fast: bool,
) -> PolicyOutcome {
    let size = lhs_size.saturating_mul(rhs_size);
    let by_policy = size <= threshold;

    let force: Vec<String> = annotations
        .iter()
        .filter(|a| a.behaviour == UnrollBehaviour::Force)
        .map(|a| a.name.clone())
        .collect();
    let prevent: Vec<String> = annotations
        .iter()
        .filter(|a| a.behaviour == UnrollBehaviour::Prevent)
        .map(|a| a.name.clone())
        .collect();

    if size > 1 && !force.is_empty() && !prevent.is_empty() {
        return PolicyOutcome {
            decision: UnrollDecision::Loop,
            violation: Some(ExpansionError::IrreconcilableUnroll {
                force,
                prevent,
            }),
            implicit_override: false,
        };
    }

    if size > 1 && fast && !prevent.is_empty() {
        return PolicyOutcome {
            decision: UnrollDecision::Loop,
            violation: Some(ExpansionError::PreventWithFastMode { prevent }),
            implicit_override: false,
        };
    }

    let unroll = !force.is_empty() || ((by_policy || fast) && prevent.is_empty());
    let decision = if unroll {
        UnrollDecision::Unroll
    } else {
        UnrollDecision::Loop
    };

    // the decision disagrees with the bare threshold, and no explicit
    // annotation asked for the disagreement
    let implicit_override = force.is_empty() && prevent.is_empty() && unroll != by_policy;

    PolicyOutcome {
        decision,
        violation: None,
        implicit_override,
    }
}
