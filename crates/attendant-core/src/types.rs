use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A known person, addressable by a classifier label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub position: String,
}

/// One (label, probability) pair emitted by the classifier.
///
/// Only constructible through [`Prediction::new`], so the probability is
/// always within [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    label: String,
    probability: f32,
}

impl Prediction {
    /// Build a prediction, clamping the probability into [0, 1].
    /// Non-finite values become 0 so they can never win a resolution.
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability: clamp_probability(probability),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }
}

fn clamp_probability(p: f32) -> f32 {
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Classifier output for a single frame, in classifier label order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationResult {
    predictions: Vec<Prediction>,
}

impl ClassificationResult {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self { predictions }
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    /// Pair raw scores with labels positionally.
    ///
    /// Returns `None` when the lengths differ.
    pub fn from_scores<S: AsRef<str>>(labels: &[S], scores: &[f32]) -> Option<Self> {
        if labels.len() != scores.len() {
            return None;
        }
        Some(Self {
            predictions: labels
                .iter()
                .zip(scores)
                .map(|(label, &score)| Prediction::new(label.as_ref(), score))
                .collect(),
        })
    }

    /// The highest-probability prediction. On exact ties the earliest wins.
    pub fn best(&self) -> Option<&Prediction> {
        let mut best: Option<&Prediction> = None;
        for p in &self.predictions {
            if !p.probability.is_finite() {
                continue;
            }
            match best {
                Some(b) if p.probability <= b.probability => {}
                _ => best = Some(p),
            }
        }
        best
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for ClassificationResult {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        Self {
            predictions: iter
                .into_iter()
                .map(|(label, p)| Prediction::new(label, p))
                .collect(),
        }
    }
}

/// A successful resolution, awaiting user confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub identity: Identity,
    pub confidence: f32,
    pub observed_at: DateTime<Local>,
}

/// An explicitly confirmed attendance entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: Identity,
    pub confidence: f32,
    pub observed_at: DateTime<Local>,
    pub confirmed_at: DateTime<Local>,
}

impl AttendanceRecord {
    pub(crate) fn confirm(event: DetectionEvent, confirmed_at: DateTime<Local>) -> Self {
        Self {
            identity: event.identity,
            confidence: event.confidence,
            observed_at: event.observed_at,
            confirmed_at,
        }
    }
}

/// Current phase of the attendance workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Detected(DetectionEvent),
    Confirmed(AttendanceRecord),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Detected(_) => "detected",
            SessionState::Confirmed(_) => "confirmed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_clamps_probability() {
        assert_eq!(Prediction::new("a", 1.7).probability, 1.0);
        assert_eq!(Prediction::new("a", -0.2).probability, 0.0);
        assert_eq!(Prediction::new("a", f32::NAN).probability, 0.0);
        assert_eq!(Prediction::new("a", f32::INFINITY).probability, 0.0);
    }

    #[test]
    fn test_from_scores_length_mismatch() {
        assert!(ClassificationResult::from_scores(&["a", "b"], &[0.5]).is_none());
    }

    #[test]
    fn test_from_scores_keeps_label_order() {
        let result = ClassificationResult::from_scores(&["a", "b", "c"], &[0.1, 0.7, 0.2]).unwrap();
        let labels: Vec<_> = result.predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["a", "b", "c"]);
    }

    #[test]
    fn test_best_first_seen_wins_ties() {
        let result: ClassificationResult = [("a", 0.4), ("b", 0.6), ("c", 0.6)].into_iter().collect();
        assert_eq!(result.best().unwrap().label, "b");
    }

    #[test]
    fn test_best_empty() {
        assert!(ClassificationResult::default().best().is_none());
    }

    #[test]
    fn test_session_state_serializes_tagged() {
        let json = serde_json::to_value(SessionState::Idle).unwrap();
        assert_eq!(json["state"], "idle");
    }
}
