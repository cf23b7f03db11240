//! Identity resolution: classifier output → known identity or nothing.

use crate::identity::IdentityTable;
use crate::types::{ClassificationResult, DetectionEvent, Identity};
use chrono::{DateTime, Local};

/// Probability a prediction must strictly exceed to count as a detection.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.85;

/// A resolved identity, borrowed from the table it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution<'t> {
    pub identity: &'t Identity,
    pub confidence: f32,
}

impl Resolution<'_> {
    /// Stamp this resolution as a detection observed at `observed_at`.
    pub fn into_event(self, observed_at: DateTime<Local>) -> DetectionEvent {
        DetectionEvent {
            identity: self.identity.clone(),
            confidence: self.confidence,
            observed_at,
        }
    }
}

/// Resolve the top prediction against the identity table.
///
/// Picks the maximum-probability pair (earliest wins on ties). Returns it only
/// if its probability is strictly above `threshold` and its label is mapped.
pub fn resolve<'t>(
    result: &ClassificationResult,
    table: &'t IdentityTable,
    threshold: f32,
) -> Option<Resolution<'t>> {
    let best = result.best()?;
    if best.probability() <= threshold {
        return None;
    }
    let identity = table.get(best.label())?;
    Some(Resolution {
        identity,
        confidence: best.probability(),
    })
}
