//! Session actor: a single task owns the attendance state machine.
//!
//! Detection updates from the loop and user actions from D-Bus arrive as
//! messages on one channel and are applied strictly in order, so the state
//! machine never sees concurrent mutation.

use attendant_core::{
    AttendanceRecord, AttendanceSession, DetectionEvent, Observation, SessionError, SessionState,
};
use chrono::Local;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// How often a configured detection TTL is checked while no frames arrive.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum HandleError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("session task exited")]
    ChannelClosed,
}

/// Point-in-time copy of what the presentation layer shows.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: SessionState,
    /// Oldest first.
    pub history: Vec<AttendanceRecord>,
}

enum SessionRequest {
    Observe {
        event: Option<DetectionEvent>,
    },
    Submit {
        reply: oneshot::Sender<Result<AttendanceRecord, SessionError>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Clone-safe handle to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    /// Feed one resolver outcome (`None` for no identity).
    pub async fn observe(&self, event: Option<DetectionEvent>) -> Result<(), HandleError> {
        self.tx
            .send(SessionRequest::Observe { event })
            .await
            .map_err(|_| HandleError::ChannelClosed)
    }

    /// Confirm the pending detection.
    pub async fn submit(&self) -> Result<AttendanceRecord, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionRequest::Submit { reply }).await?;
        Ok(rx.await.map_err(|_| HandleError::ChannelClosed)??)
    }

    /// Acknowledge the confirmation.
    pub async fn close(&self) -> Result<(), HandleError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionRequest::Close { reply }).await?;
        Ok(rx.await.map_err(|_| HandleError::ChannelClosed)??)
    }

    pub async fn snapshot(&self) -> Result<Snapshot, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionRequest::Snapshot { reply }).await?;
        rx.await.map_err(|_| HandleError::ChannelClosed)
    }

    async fn request(&self, req: SessionRequest) -> Result<(), HandleError> {
        self.tx.send(req).await.map_err(|_| HandleError::ChannelClosed)
    }
}

/// Move `session` onto its own task and return a handle to it.
///
/// The task exits once every handle is dropped.
pub fn spawn_session(session: AttendanceSession) -> SessionHandle {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(run_session(session, rx));
    SessionHandle { tx }
}

async fn run_session(mut session: AttendanceSession, mut rx: mpsc::Receiver<SessionRequest>) {
    let ttl_enabled = session.policy().detection_ttl.is_some();
    let mut expiry = tokio::time::interval(EXPIRY_CHECK_INTERVAL);
    expiry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let req = tokio::select! {
            req = rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
            _ = expiry.tick(), if ttl_enabled => {
                if session.expire(Local::now()) {
                    tracing::info!("pending detection expired");
                }
                continue;
            }
        };

        let now = Local::now();
        match req {
            SessionRequest::Observe { event } => {
                let outcome = session.observe(event, now);
                match outcome {
                    Observation::Detected | Observation::Replaced => {
                        if let SessionState::Detected(e) = session.state() {
                            tracing::info!(
                                id = %e.identity.id,
                                name = %e.identity.name,
                                confidence = e.confidence,
                                ?outcome,
                                "face detected"
                            );
                        }
                    }
                    Observation::Expired => tracing::info!("pending detection expired"),
                    Observation::Ignored | Observation::Unchanged => {}
                }
            }
            SessionRequest::Submit { reply } => {
                session.expire(now);
                let result = session.submit(now);
                if let Err(e) = &result {
                    tracing::info!(error = %e, "submit rejected");
                }
                let _ = reply.send(result);
            }
            SessionRequest::Close { reply } => {
                let result = session.close();
                if let Err(e) = &result {
                    tracing::info!(error = %e, "close rejected");
                }
                let _ = reply.send(result);
            }
            SessionRequest::Snapshot { reply } => {
                session.expire(now);
                let _ = reply.send(Snapshot {
                    state: session.state().clone(),
                    history: session.history().to_vec(),
                });
            }
        }
    }

    tracing::debug!(history = session.history().len(), "session task exiting");
}
