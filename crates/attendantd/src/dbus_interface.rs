use crate::pipeline::Readiness;
use crate::session::{HandleError, SessionHandle};
use tokio::sync::watch;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.Attendant1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Attendant1";

/// D-Bus interface consumed by the presentation layer.
///
/// Bus name: org.freedesktop.Attendant1
/// Object path: /org/freedesktop/Attendant1
pub struct AttendantService {
    session: SessionHandle,
    readiness: watch::Receiver<Readiness>,
}

impl AttendantService {
    pub fn new(session: SessionHandle, readiness: watch::Receiver<Readiness>) -> Self {
        Self { session, readiness }
    }
}

fn to_fdo(e: HandleError) -> zbus::fdo::Error {
    match e {
        HandleError::Session(e) => zbus::fdo::Error::Failed(e.to_string()),
        HandleError::ChannelClosed => zbus::fdo::Error::Failed("session unavailable".into()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.freedesktop.Attendant1")]
impl AttendantService {
    /// Current session state as JSON.
    async fn state(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.session.snapshot().await.map_err(to_fdo)?;
        to_json(&snapshot.state)
    }

    /// Confirmed attendance records as a JSON array, oldest first.
    async fn history(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.session.snapshot().await.map_err(to_fdo)?;
        to_json(&snapshot.history)
    }

    /// Daemon status: camera and model readiness plus the history size.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let readiness = self.readiness.borrow().clone();
        let snapshot = self.session.snapshot().await.map_err(to_fdo)?;
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": readiness.camera,
            "model": readiness.model,
            "loading": readiness.is_loading(),
            "state": snapshot.state.name(),
            "history_len": snapshot.history.len(),
        }))
    }

    /// Confirm the current detection. Fails unless a face is detected.
    async fn submit_attendance(&self) -> zbus::fdo::Result<String> {
        tracing::info!("submit requested");
        let record = self.session.submit().await.map_err(to_fdo)?;
        to_json(&record)
    }

    /// Acknowledge the confirmation and return to idle.
    async fn close_confirmation(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("close requested");
        self.session.close().await.map_err(to_fdo)?;
        Ok(true)
    }
}
