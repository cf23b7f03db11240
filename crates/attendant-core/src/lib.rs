//! attendant-core: Attendance decisioning engine.
//!
//! Resolves per-frame classifier output against a fixed identity table and
//! drives the Idle → Detected → Confirmed attendance workflow. The image
//! classifier runs via ONNX Runtime behind the [`Classifier`] capability.

pub mod classifier;
pub mod identity;
pub mod resolver;
pub mod session;
pub mod types;

use std::path::PathBuf;

pub use classifier::{Classifier, ClassifierError, ClassifierLoader, ModelLocation, OnnxLoader};
pub use identity::{IdentityError, IdentityTable};
pub use resolver::{resolve, Resolution, DEFAULT_CONFIDENCE_THRESHOLD};
pub use session::{AttendanceSession, Observation, SessionError, SessionPolicy};
pub use types::{
    AttendanceRecord, ClassificationResult, DetectionEvent, Identity, Prediction, SessionState,
};

/// Default directory holding `model.onnx` and `metadata.json`.
///
/// `$XDG_DATA_HOME/attendant/model`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attendant")
        .join("model")
}
