use crate::detection_loop::FrameClassifier;
use attendant_core::{ClassificationResult, ClassifierError, ClassifierLoader, ModelLocation};
use attendant_hw::Frame;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Load(#[source] ClassifierError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("failed to spawn inference thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("inference thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// Whether the engine can still serve later requests.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Classifier(_))
    }
}

/// A frame waiting for classification, with the caller's reply slot.
struct ClassifyRequest {
    frame: Arc<Frame>,
    reply: oneshot::Sender<Result<ClassificationResult, EngineError>>,
}

/// Clone-safe handle to the inference thread.
#[derive(Clone)]
pub struct InferenceEngine {
    tx: mpsc::Sender<ClassifyRequest>,
}

impl InferenceEngine {
    /// Spawn the inference thread and load the model on it.
    ///
    /// Resolves once the model is ready. A failed load is final: the thread
    /// exits and no classifier is ever available from this engine.
    pub async fn load<L: ClassifierLoader>(
        loader: L,
        location: ModelLocation,
    ) -> Result<Self, EngineError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, mut rx) = mpsc::channel::<ClassifyRequest>(1);

        std::thread::Builder::new()
            .name("attendant-inference".into())
            .spawn(move || {
                let mut classifier = match loader.load(&location) {
                    Ok(classifier) => {
                        tracing::info!(path = %location.model_path.display(), "classifier ready");
                        let _ = ready_tx.send(Ok(()));
                        classifier
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(EngineError::Load(e)));
                        return;
                    }
                };

                while let Some(req) = rx.blocking_recv() {
                    let frame = &req.frame;
                    let result = classifier
                        .predict(&frame.data, frame.width, frame.height)
                        .map_err(EngineError::from);
                    let _ = req.reply.send(result);
                }
                tracing::info!("inference thread exiting");
            })
            .map_err(EngineError::Spawn)?;

        ready_rx.await.map_err(|_| EngineError::ChannelClosed)??;
        Ok(Self { tx })
    }

    /// Classify one frame on the inference thread.
    pub async fn classify(&self, frame: Arc<Frame>) -> Result<ClassificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ClassifyRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

impl FrameClassifier for InferenceEngine {
    fn classify(
        &self,
        frame: Arc<Frame>,
    ) -> impl Future<Output = Result<ClassificationResult, EngineError>> + Send {
        InferenceEngine::classify(self, frame)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic classifier fakes.

    use attendant_core::{
        ClassificationResult, Classifier, ClassifierError, ClassifierLoader, ModelLocation,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays a script of results, repeating the last one forever.
    pub struct ScriptedClassifier {
        script: VecDeque<Result<ClassificationResult, String>>,
        last: Result<ClassificationResult, String>,
        pub calls: Arc<AtomicUsize>,
    }

    impl Classifier for ScriptedClassifier {
        fn predict(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<ClassificationResult, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.script.pop_front() {
                self.last = next;
            }
            self.last.clone().map_err(ClassifierError::InferenceFailed)
        }
    }

    pub struct FakeLoader {
        script: Mutex<Option<Vec<Result<ClassificationResult, String>>>>,
        fail: bool,
        pub loads: Arc<AtomicUsize>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeLoader {
        pub fn scripted(script: Vec<Result<ClassificationResult, String>>) -> Self {
            Self {
                script: Mutex::new(Some(script)),
                fail: false,
                loads: Arc::new(AtomicUsize::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::scripted(Vec::new())
            }
        }
    }

    impl ClassifierLoader for FakeLoader {
        fn load(&self, location: &ModelLocation) -> Result<Box<dyn Classifier>, ClassifierError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ClassifierError::ModelNotFound(
                    location.model_path.display().to_string(),
                ));
            }
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedClassifier {
                script: script.into(),
                last: Ok(ClassificationResult::default()),
                calls: Arc::clone(&self.calls),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeLoader;
    use super::*;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    fn frame() -> Arc<Frame> {
        Arc::new(Frame {
            data: vec![128; 4 * 4 * 3],
            width: 4,
            height: 4,
            timestamp: Instant::now(),
            sequence: 0,
            is_dark: false,
        })
    }

    fn location() -> ModelLocation {
        ModelLocation::in_dir(Path::new("/nonexistent"))
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let loader = FakeLoader::failing();
        let loads = Arc::clone(&loader.loads);
        let err = InferenceEngine::load(loader, location()).await.err().unwrap();
        assert!(matches!(err, EngineError::Load(ClassifierError::ModelNotFound(_))));
        assert!(!err.is_transient());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classify_round_trip() {
        let expected: ClassificationResult = [("Dhavin", 0.92), ("Nono", 0.08)].into_iter().collect();
        let engine = InferenceEngine::load(FakeLoader::scripted(vec![Ok(expected.clone())]), location())
            .await
            .unwrap();
        assert_eq!(engine.classify(frame()).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_classifier_error_is_transient() {
        let ok: ClassificationResult = [("Joko", 0.9)].into_iter().collect();
        let engine = InferenceEngine::load(
            FakeLoader::scripted(vec![Err("bad frame".into()), Ok(ok.clone())]),
            location(),
        )
        .await
        .unwrap();

        let err = engine.classify(frame()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(engine.classify(frame()).await.unwrap(), ok);
    }
}
