use crate::detection_loop::{DetectionLoop, LoopExit};
use crate::engine::InferenceEngine;
use crate::session::SessionHandle;
use attendant_core::{ClassifierLoader, IdentityTable, ModelLocation};
use attendant_hw::CameraSource;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CameraStatus {
    Pending,
    Ready,
    Failed(String),
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed(String),
    /// Never loaded because there is no camera to feed it.
    Disabled,
}

/// Camera and model availability, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub camera: CameraStatus,
    pub model: ModelStatus,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            camera: CameraStatus::Pending,
            model: ModelStatus::Loading,
        }
    }
}

impl Readiness {
    pub fn is_loading(&self) -> bool {
        self.model == ModelStatus::Loading
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineExit {
    CameraFailed,
    ModelFailed,
    Stopped(LoopExit),
}

pub struct PipelineSettings {
    pub identities: Arc<IdentityTable>,
    pub threshold: f32,
    pub classify_interval: Duration,
    pub skip_dark_frames: bool,
    pub model: ModelLocation,
}

/// Camera → classifier → session wiring, with cleanup on every exit path.
pub struct Pipeline {
    settings: PipelineSettings,
    session: SessionHandle,
    readiness: watch::Sender<Readiness>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, session: SessionHandle) -> (Self, watch::Receiver<Readiness>) {
        let (readiness, rx) = watch::channel(Readiness::default());
        (
            Self {
                settings,
                session,
                readiness,
            },
            rx,
        )
    }

    /// Acquire the camera, load the model, and run detection until cancelled.
    ///
    /// Failures degrade rather than abort: a missing camera or model is
    /// reported through [`Readiness`] and the session simply stays idle.
    pub async fn run<S, L>(self, mut camera: S, loader: L, cancel: CancellationToken) -> PipelineExit
    where
        S: CameraSource,
        L: ClassifierLoader,
    {
        let mut frames = match camera.acquire() {
            Ok(frames) => {
                self.set_camera(CameraStatus::Ready);
                frames
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera unavailable; detection disabled");
                camera.release();
                self.readiness.send_modify(|r| {
                    r.camera = CameraStatus::Failed(e.to_string());
                    r.model = ModelStatus::Disabled;
                });
                return PipelineExit::CameraFailed;
            }
        };

        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            loaded = InferenceEngine::load(loader, self.settings.model.clone()) => Some(loaded),
        };
        let engine = match loaded {
            Some(Ok(engine)) => {
                self.set_model(ModelStatus::Ready);
                engine
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "model load failed; classification disabled");
                self.set_model(ModelStatus::Failed(e.to_string()));
                self.release(&mut camera);
                return PipelineExit::ModelFailed;
            }
            None => {
                self.release(&mut camera);
                return PipelineExit::Stopped(LoopExit::Cancelled);
            }
        };

        let detection = DetectionLoop::new(
            Arc::clone(&self.settings.identities),
            self.settings.threshold,
            self.settings.classify_interval,
            self.session.clone(),
        )
        .with_dark_frame_skip(self.settings.skip_dark_frames);
        let (exit, _) = detection.run(&mut frames, &engine, &cancel).await;

        match exit {
            LoopExit::EngineStopped => self.set_model(ModelStatus::Failed("inference thread exited".into())),
            LoopExit::SourceEnded => tracing::warn!("camera stream ended"),
            LoopExit::Cancelled | LoopExit::SessionClosed => {}
        }
        drop(frames);
        self.release(&mut camera);
        PipelineExit::Stopped(exit)
    }

    fn release<S: CameraSource>(&self, camera: &mut S) {
        camera.release();
        self.set_camera(CameraStatus::Released);
    }

    fn set_camera(&self, status: CameraStatus) {
        self.readiness.send_modify(|r| r.camera = status);
    }

    fn set_model(&self, status: ModelStatus) {
        self.readiness.send_modify(|r| r.model = status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeLoader;
    use crate::session::spawn_session;
    use attendant_core::{AttendanceSession, ClassificationResult, SessionState};
    use attendant_hw::{CameraError, Frame, FrameStream};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Publishes a mid-gray frame every 5 ms from a background task.
    struct FakeCamera {
        deny: bool,
        frame_limit: Option<usize>,
        active: bool,
        acquires: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl FakeCamera {
        fn new() -> Self {
            Self {
                deny: false,
                frame_limit: None,
                active: false,
                acquires: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn denied() -> Self {
            Self {
                deny: true,
                ..Self::new()
            }
        }
    }

    impl CameraSource for FakeCamera {
        type Stream = FrameStream;

        fn acquire(&mut self) -> Result<FrameStream, CameraError> {
            self.acquires.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                return Err(CameraError::PermissionDenied("/dev/video0".into()));
            }
            let (publisher, stream) = FrameStream::channel();
            let limit = self.frame_limit.unwrap_or(usize::MAX);
            tokio::spawn(async move {
                for seq in 0..limit {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let frame = Frame {
                        data: vec![128; 8 * 8 * 3],
                        width: 8,
                        height: 8,
                        timestamp: Instant::now(),
                        sequence: seq as u32,
                        is_dark: false,
                    };
                    if !publisher.publish(frame) {
                        break;
                    }
                }
            });
            self.active = true;
            Ok(stream)
        }

        fn release(&mut self) {
            if std::mem::take(&mut self.active) {
                self.releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn pipeline(session: SessionHandle) -> (Pipeline, watch::Receiver<Readiness>) {
        Pipeline::new(
            PipelineSettings {
                identities: Arc::new(IdentityTable::builtin()),
                threshold: 0.85,
                classify_interval: Duration::from_millis(20),
                skip_dark_frames: true,
                model: ModelLocation::in_dir(Path::new("/nonexistent")),
            },
            session,
        )
    }

    async fn wait_for<F: Fn(&SessionState) -> bool>(session: &SessionHandle, pred: F) -> SessionState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = session.snapshot().await.unwrap().state;
            if pred(&state) {
                return state;
            }
            assert!(Instant::now() < deadline, "timed out in state {state:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_camera_denied_stays_idle() {
        let session = spawn_session(AttendanceSession::default());
        let (pipeline, readiness) = pipeline(session.clone());
        let loader = FakeLoader::scripted(Vec::new());
        let loads = Arc::clone(&loader.loads);
        let calls = Arc::clone(&loader.calls);

        let exit = pipeline.run(FakeCamera::denied(), loader, CancellationToken::new()).await;

        assert_eq!(exit, PipelineExit::CameraFailed);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let r = readiness.borrow().clone();
        assert!(matches!(r.camera, CameraStatus::Failed(ref reason) if reason.contains("permission denied")));
        assert_eq!(r.model, ModelStatus::Disabled);
        assert!(!r.is_loading());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.snapshot().await.unwrap().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_model_failure_clears_loading_and_releases_camera() {
        let session = spawn_session(AttendanceSession::default());
        let (pipeline, readiness) = pipeline(session.clone());
        let camera = FakeCamera::new();
        let releases = Arc::clone(&camera.releases);

        let exit = pipeline.run(camera, FakeLoader::failing(), CancellationToken::new()).await;

        assert_eq!(exit, PipelineExit::ModelFailed);
        let r = readiness.borrow().clone();
        assert!(matches!(r.model, ModelStatus::Failed(_)));
        assert!(!r.is_loading());
        assert_eq!(r.camera, CameraStatus::Released);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(session.snapshot().await.unwrap().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_detect_confirm_close_end_to_end() {
        let session = spawn_session(AttendanceSession::default());
        let (pipeline, readiness) = pipeline(session.clone());
        let camera = FakeCamera::new();
        let releases = Arc::clone(&camera.releases);
        let dhavin: ClassificationResult = [("Dhavin", 0.92), ("Nono", 0.05), ("Joko", 0.03)]
            .into_iter()
            .collect();
        let nobody: ClassificationResult = [("Dhavin", 0.3), ("Nono", 0.35), ("Joko", 0.35)]
            .into_iter()
            .collect();
        let loader = FakeLoader::scripted(vec![Ok(dhavin), Ok(nobody)]);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(pipeline.run(camera, loader, cancel.clone()));

        let state = wait_for(&session, |s| matches!(s, SessionState::Detected(_))).await;
        let SessionState::Detected(event) = state else { unreachable!() };
        assert_eq!(event.identity.id, "KT001");
        assert!((event.confidence - 0.92).abs() < 1e-6);
        assert_eq!(readiness.borrow().model, ModelStatus::Ready);

        let record = session.submit().await.unwrap();
        assert_eq!(record.identity.name, "Dhavin Fasya Alviyanto");
        let snap = session.snapshot().await.unwrap();
        assert!(matches!(snap.state, SessionState::Confirmed(_)));
        assert_eq!(snap.history.len(), 1);

        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snap = session.snapshot().await.unwrap();
        assert_eq!(snap.state, SessionState::Idle);
        assert_eq!(snap.history.len(), 1);

        cancel.cancel();
        let exit = task.await.unwrap();
        assert_eq!(exit, PipelineExit::Stopped(LoopExit::Cancelled));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(readiness.borrow().camera, CameraStatus::Released);
    }

    #[tokio::test]
    async fn test_source_end_releases_camera() {
        let session = spawn_session(AttendanceSession::default());
        let (pipeline, readiness) = pipeline(session);
        let mut camera = FakeCamera::new();
        camera.frame_limit = Some(10);
        let releases = Arc::clone(&camera.releases);

        let exit = pipeline
            .run(camera, FakeLoader::scripted(Vec::new()), CancellationToken::new())
            .await;

        assert_eq!(exit, PipelineExit::Stopped(LoopExit::SourceEnded));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(readiness.borrow().camera, CameraStatus::Released);
    }
}
