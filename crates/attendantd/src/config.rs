use crate::detection_loop::DEFAULT_CLASSIFY_INTERVAL;
use attendant_core::{ModelLocation, SessionPolicy, DEFAULT_CONFIDENCE_THRESHOLD};
use attendant_hw::CaptureSettings;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path of the user-facing camera (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width; the driver may choose another.
    pub capture_width: u32,
    /// Requested capture height; the driver may choose another.
    pub capture_height: u32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Directory containing `model.onnx` and `metadata.json`.
    pub model_dir: PathBuf,
    /// Optional TOML roster; the built-in roster is used when unset.
    pub identities_path: Option<PathBuf>,
    /// Probability a prediction must strictly exceed to count as a detection.
    pub confidence_threshold: f32,
    /// Minimum spacing between classifier invocations.
    pub classify_interval_ms: u64,
    /// Skip frames that are almost entirely black instead of classifying them.
    pub skip_dark_frames: bool,
    /// Seconds before an unconfirmed detection returns to idle (0 = never).
    pub detection_ttl_secs: u64,
    /// Seconds during which re-confirming the same person is rejected (0 = allowed).
    pub duplicate_window_secs: u64,
}

impl Config {
    /// Load configuration from `ATTENDANT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ATTENDANT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| attendant_core::default_model_dir());

        Self {
            camera_device: std::env::var("ATTENDANT_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_width: env_u32("ATTENDANT_CAPTURE_WIDTH", 1280),
            capture_height: env_u32("ATTENDANT_CAPTURE_HEIGHT", 720),
            warmup_frames: env_usize("ATTENDANT_WARMUP_FRAMES", 4),
            model_dir,
            identities_path: std::env::var("ATTENDANT_IDENTITIES").ok().map(PathBuf::from),
            confidence_threshold: env_f32("ATTENDANT_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD)
                .clamp(0.0, 1.0),
            classify_interval_ms: env_u64(
                "ATTENDANT_CLASSIFY_INTERVAL_MS",
                DEFAULT_CLASSIFY_INTERVAL.as_millis() as u64,
            ),
            skip_dark_frames: env_bool("ATTENDANT_SKIP_DARK_FRAMES", true),
            detection_ttl_secs: env_u64("ATTENDANT_DETECTION_TTL_SECS", 0),
            duplicate_window_secs: env_u64("ATTENDANT_DUPLICATE_WINDOW_SECS", 0),
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            device_path: self.camera_device.clone(),
            width: self.capture_width,
            height: self.capture_height,
            warmup_frames: self.warmup_frames,
        }
    }

    pub fn model_location(&self) -> ModelLocation {
        ModelLocation::in_dir(&self.model_dir)
    }

    pub fn classify_interval(&self) -> Duration {
        Duration::from_millis(self.classify_interval_ms)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            detection_ttl: nonzero_secs(self.detection_ttl_secs),
            duplicate_window: nonzero_secs(self.duplicate_window_secs),
        }
    }
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref().map(str::trim) {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
