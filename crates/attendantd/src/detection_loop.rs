//! Frame-driven detection loop.
//!
//! Wakes on every new camera frame, but only hands a frame to the classifier
//! when the throttle interval has elapsed since the previous dispatch. One
//! classification is in flight at a time; frames arriving meanwhile are
//! overwritten in the frame stream, never queued.

use crate::engine::EngineError;
use crate::session::SessionHandle;
use attendant_core::{resolve, ClassificationResult, IdentityTable};
use attendant_hw::{Frame, FrameProvider};
use chrono::Local;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default minimum spacing between classifier invocations.
pub const DEFAULT_CLASSIFY_INTERVAL: Duration = Duration::from_millis(500);

/// Anything that can classify a frame asynchronously.
pub trait FrameClassifier: Send + Sync {
    fn classify(
        &self,
        frame: Arc<Frame>,
    ) -> impl Future<Output = Result<ClassificationResult, EngineError>> + Send;
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    SourceEnded,
    EngineStopped,
    SessionClosed,
}

/// Time-based gate: at most one pass per `interval`.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true and records `now` if at least `interval` has passed since
    /// the last accepted call (or there was none).
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Counters for one run of the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub throttled: u64,
    pub dark: u64,
    pub classified: u64,
    pub failures: u64,
    pub detections: u64,
}

pub struct DetectionLoop {
    identities: Arc<IdentityTable>,
    threshold: f32,
    interval: Duration,
    skip_dark_frames: bool,
    session: SessionHandle,
}

impl DetectionLoop {
    pub fn new(
        identities: Arc<IdentityTable>,
        threshold: f32,
        interval: Duration,
        session: SessionHandle,
    ) -> Self {
        Self {
            identities,
            threshold,
            interval,
            skip_dark_frames: true,
            session,
        }
    }

    /// Whether frames flagged dark bypass the classifier (default: true).
    pub fn with_dark_frame_skip(mut self, skip: bool) -> Self {
        self.skip_dark_frames = skip;
        self
    }

    /// Run until cancelled or until the frame source, engine, or session goes away.
    pub async fn run<P, C>(
        &self,
        frames: &mut P,
        classifier: &C,
        cancel: &CancellationToken,
    ) -> (LoopExit, LoopStats)
    where
        P: FrameProvider,
        C: FrameClassifier,
    {
        let mut throttle = Throttle::new(self.interval);
        let mut stats = LoopStats::default();

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            threshold = self.threshold,
            identities = self.identities.len(),
            "detection loop started"
        );

        let exit = loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                frame = frames.next_frame() => frame,
            };
            let Some(frame) = frame else {
                break LoopExit::SourceEnded;
            };
            stats.frames += 1;

            if frame.is_dark && self.skip_dark_frames {
                stats.dark += 1;
                tracing::trace!(seq = frame.sequence, "skipping dark frame");
                continue;
            }
            if !throttle.try_acquire(Instant::now()) {
                stats.throttled += 1;
                continue;
            }

            let seq = frame.sequence;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                result = classifier.classify(frame) => result,
            };
            let result = match result {
                Ok(result) => result,
                Err(e) if e.is_transient() => {
                    stats.failures += 1;
                    tracing::warn!(seq, error = %e, "classification failed; skipping frame");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "inference engine stopped");
                    break LoopExit::EngineStopped;
                }
            };
            stats.classified += 1;

            let event = resolve(&result, &self.identities, self.threshold)
                .map(|r| r.into_event(Local::now()));
            match &event {
                Some(e) => {
                    stats.detections += 1;
                    tracing::debug!(seq, id = %e.identity.id, confidence = e.confidence, "identity resolved");
                }
                None => {
                    tracing::trace!(seq, top = ?result.best(), "no identity");
                }
            }
            if self.session.observe(event).await.is_err() {
                break LoopExit::SessionClosed;
            }
        };

        tracing::info!(?exit, ?stats, "detection loop stopped");
        (exit, stats)
    }
}
