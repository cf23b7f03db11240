//! Attendance session state machine.
//!
//! ```text
//!   Idle ──detection──▶ Detected ──submit──▶ Confirmed ──close──▶ Idle
//!                        │    ▲
//!                        └────┘ newer detection replaces
//! ```
//!
//! Only `submit` and `close` mutate history or leave `Detected`/`Confirmed`.
//! Detection updates never touch history. All operations take an explicit
//! `now` so the machine itself never reads a clock.

use crate::types::{AttendanceRecord, DetectionEvent, SessionState};
use chrono::{DateTime, Local};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no detection to confirm")]
    NothingDetected,
    #[error("previous confirmation has not been acknowledged")]
    AwaitingAcknowledgement,
    #[error("no confirmation to close")]
    NotConfirmed,
    #[error("{id} was already confirmed within the duplicate window")]
    DuplicateConfirmation { id: String },
}

/// Optional behaviors layered on top of the basic workflow.
///
/// Both are off by default: a detection stays pending until the user acts,
/// and the same identity may be confirmed any number of times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Return `Detected` to `Idle` once the pending detection is this old.
    pub detection_ttl: Option<Duration>,
    /// Reject a confirmation of an identity confirmed less than this long ago.
    pub duplicate_window: Option<Duration>,
}

/// What a call to [`AttendanceSession::observe`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Idle → Detected.
    Detected,
    /// Detected → Detected with the newer event.
    Replaced,
    /// A detection arrived while a confirmation is awaiting acknowledgement.
    Ignored,
    /// No detection; state left as it was.
    Unchanged,
    /// No detection and the pending one passed its TTL; back to Idle.
    Expired,
}

/// Owner of the session state and the append-only attendance history.
#[derive(Debug, Default)]
pub struct AttendanceSession {
    state: SessionState,
    history: Vec<AttendanceRecord>,
    policy: SessionPolicy,
}

impl AttendanceSession {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            state: SessionState::Idle,
            history: Vec::new(),
            policy,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Confirmed records, oldest first.
    pub fn history(&self) -> &[AttendanceRecord] {
        &self.history
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Feed one resolver outcome into the machine.
    ///
    /// The latest detection always wins; there is no smoothing across frames.
    pub fn observe(&mut self, detection: Option<DetectionEvent>, now: DateTime<Local>) -> Observation {
        let Some(event) = detection else {
            return if self.expire(now) {
                Observation::Expired
            } else {
                Observation::Unchanged
            };
        };
        match self.state {
            SessionState::Confirmed(_) => Observation::Ignored,
            SessionState::Idle => {
                self.state = SessionState::Detected(event);
                Observation::Detected
            }
            SessionState::Detected(_) => {
                self.state = SessionState::Detected(event);
                Observation::Replaced
            }
        }
    }

    /// Drop a pending detection older than the configured TTL.
    ///
    /// Returns true if the state went back to `Idle`.
    pub fn expire(&mut self, now: DateTime<Local>) -> bool {
        let Some(ttl) = self.policy.detection_ttl else {
            return false;
        };
        let SessionState::Detected(event) = &self.state else {
            return false;
        };
        if age(event.observed_at, now) >= ttl {
            tracing::debug!(id = %event.identity.id, ?ttl, "pending detection expired");
            self.state = SessionState::Idle;
            true
        } else {
            false
        }
    }

    /// Confirm the pending detection and append it to history.
    pub fn submit(&mut self, now: DateTime<Local>) -> Result<AttendanceRecord, SessionError> {
        let event = match std::mem::take(&mut self.state) {
            SessionState::Detected(event) => event,
            other => {
                let err = match other {
                    SessionState::Confirmed(_) => SessionError::AwaitingAcknowledgement,
                    _ => SessionError::NothingDetected,
                };
                self.state = other;
                return Err(err);
            }
        };

        if let Some(window) = self.policy.duplicate_window {
            let id = &event.identity.id;
            let recent = self
                .history
                .iter()
                .rev()
                .any(|r| r.identity.id == *id && age(r.confirmed_at, now) < window);
            if recent {
                let id = id.clone();
                self.state = SessionState::Detected(event);
                return Err(SessionError::DuplicateConfirmation { id });
            }
        }

        let record = AttendanceRecord::confirm(event, now);
        self.history.push(record.clone());
        self.state = SessionState::Confirmed(record.clone());
        tracing::info!(
            id = %record.identity.id,
            name = %record.identity.name,
            confidence = record.confidence,
            total = self.history.len(),
            "attendance confirmed"
        );
        Ok(record)
    }

    /// Acknowledge the confirmation and return to `Idle`.
    ///
    /// The pending detection is discarded so it can never be re-submitted.
    pub fn close(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Confirmed(_) => {
                self.state = SessionState::Idle;
                Ok(())
            }
            _ => Err(SessionError::NotConfirmed),
        }
    }
}

/// Elapsed time from `then` to `now`, zero if the clock went backwards.
fn age(then: DateTime<Local>, now: DateTime<Local>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}
