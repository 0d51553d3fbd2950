//! Save and resume.
//!
//! [`PersistenceManager`] sits between the session and a [`SessionStore`].
//! Per connection it makes exactly one restore attempt, and it refuses to
//! save until that attempt has resolved so a fresh client never overwrites
//! a snapshot it has not read yet. Store failures are logged and swallowed.

pub mod store;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SimlinkError;
use crate::protocol::CameraUpdate;
use crate::scene::ExplosionState;
use crate::state::ScreenState;
use crate::training::{QuizAnswerState, TrainingSnapshot};

pub use store::MemoryStore;

/// Default autosave period.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest autosave period accepted; smaller values are raised to it.
pub const MIN_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(1);

// ── Wire types ───────────────────────────────────────────────────

/// Envelope returned by every store call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Success with no payload.
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<Option<T>, SimlinkError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(SimlinkError::Store(
                self.error.unwrap_or_else(|| "request failed".into()),
            ))
        }
    }
}

/// A stored session as listed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub phase_index: usize,
    pub progress: f64,
    pub updated_at_ms: u64,
}

/// Everything needed to put a learner back where they were.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub session_id: String,
    pub training: TrainingSnapshot,
    pub screen: ScreenState,
    pub explosion: ExplosionState,
    pub camera: CameraUpdate,
    pub active_waypoint: Option<usize>,
    pub cinematic_countdown: Option<u32>,
    pub saved_at_ms: u64,
}

impl PersistedSnapshot {
    /// BLAKE3 over the JSON form, ignoring the save timestamp.
    pub fn fingerprint(&self) -> Result<blake3::Hash, SimlinkError> {
        let mut content = self.clone();
        content.saved_at_ms = 0;
        let bytes = serde_json::to_vec(&content)?;
        Ok(blake3::hash(&bytes))
    }

    pub fn to_json(&self) -> Result<String, SimlinkError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, SimlinkError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── SessionStore ─────────────────────────────────────────────────

/// The backend persistence service.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_active_sessions(&self, user_id: &str) -> ServiceResponse<Vec<SessionSummary>>;

    async fn resume_session(&self, session_id: &str) -> ServiceResponse<SessionSummary>;

    async fn create_new_session(&self, user_id: &str) -> ServiceResponse<SessionSummary>;

    async fn complete_phase(&self, session_id: &str, phase_index: usize) -> ServiceResponse<()>;

    async fn complete_training(
        &self,
        session_id: &str,
        answers: &[QuizAnswerState],
    ) -> ServiceResponse<()>;

    /// `data` is `None` when nothing was saved for the session.
    async fn restore_state(&self, session_id: &str) -> ServiceResponse<PersistedSnapshot>;

    async fn save_state(&self, snapshot: &PersistedSnapshot) -> ServiceResponse<()>;
}

// ── PersistenceManager ───────────────────────────────────────────

pub struct PersistenceManager<S> {
    store: S,
    interval: Duration,
    session_id: Option<String>,
    restore_attempted: bool,
    restore_resolved: bool,
    finished: bool,
    last_saved: Option<blake3::Hash>,
}

impl<S: SessionStore> PersistenceManager<S> {
    pub fn new(store: S, interval: Duration) -> Self {
        if interval < MIN_AUTOSAVE_INTERVAL {
            warn!(?interval, min = ?MIN_AUTOSAVE_INTERVAL, "autosave interval too short, clamped");
        }
        Self {
            store,
            interval: interval.max(MIN_AUTOSAVE_INTERVAL),
            session_id: None,
            restore_attempted: false,
            restore_resolved: false,
            finished: false,
            last_saved: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Persistence is on once a session id is bound.
    pub fn is_enabled(&self) -> bool {
        self.session_id.is_some() && !self.finished
    }

    pub fn restore_attempted(&self) -> bool {
        self.restore_attempted
    }

    /// Saving is allowed only after this connection's restore resolved.
    pub fn can_save(&self) -> bool {
        self.is_enabled() && self.restore_resolved
    }

    // ── Session selection ────────────────────────────────────────

    pub async fn active_sessions(&self, user_id: &str) -> Vec<SessionSummary> {
        match self.store.get_active_sessions(user_id).await.into_result() {
            Ok(list) => list.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "listing active sessions failed");
                Vec::new()
            }
        }
    }

    /// Resume `session_id` and bind to it.
    pub async fn resume(&mut self, session_id: &str) -> Option<SessionSummary> {
        match self.store.resume_session(session_id).await.into_result() {
            Ok(Some(summary)) => {
                self.bind(summary.session_id.clone());
                Some(summary)
            }
            Ok(None) => {
                warn!(session_id, "resume returned no session");
                None
            }
            Err(e) => {
                warn!(session_id, error = %e, "resume failed");
                None
            }
        }
    }

    /// Create a session for `user_id` and bind to it.
    pub async fn create(&mut self, user_id: &str) -> Option<SessionSummary> {
        match self.store.create_new_session(user_id).await.into_result() {
            Ok(Some(summary)) => {
                self.bind(summary.session_id.clone());
                Some(summary)
            }
            Ok(None) => {
                warn!(user_id, "create returned no session");
                None
            }
            Err(e) => {
                warn!(user_id, error = %e, "creating session failed");
                None
            }
        }
    }

    pub fn bind(&mut self, session_id: String) {
        info!(%session_id, "persisting session");
        self.session_id = Some(session_id);
        self.finished = false;
        self.last_saved = None;
    }

    // ── Restore / save ───────────────────────────────────────────

    /// A new connection was established; allow one more restore.
    pub fn on_connected(&mut self) {
        self.restore_attempted = false;
        self.restore_resolved = false;
    }

    /// The single restore attempt for this connection. Later calls return
    /// `None` without touching the store.
    pub async fn restore(&mut self) -> Option<PersistedSnapshot> {
        if self.restore_attempted {
            return None;
        }
        let Some(session_id) = self.session_id.clone().filter(|_| !self.finished) else {
            return None;
        };
        self.restore_attempted = true;

        let result = self.store.restore_state(&session_id).await.into_result();
        self.restore_resolved = true;
        match result {
            Ok(Some(snap)) if snap.session_id == session_id => {
                info!(%session_id, phase = snap.training.progress.current_task_index, "snapshot restored");
                self.last_saved = snap.fingerprint().ok();
                Some(snap)
            }
            Ok(Some(snap)) => {
                warn!(expected = %session_id, got = %snap.session_id, "snapshot for another session ignored");
                None
            }
            Ok(None) => {
                debug!(%session_id, "nothing to restore");
                None
            }
            Err(e) => {
                warn!(%session_id, error = %e, "restore failed");
                None
            }
        }
    }

    /// Save `snapshot` if allowed and changed. Returns whether the store
    /// accepted a write.
    pub async fn save(&mut self, snapshot: &PersistedSnapshot) -> bool {
        if !self.can_save() {
            debug!("save skipped: restore not resolved or persistence off");
            return false;
        }
        let fingerprint = match snapshot.fingerprint() {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "snapshot encoding failed");
                return false;
            }
        };
        if self.last_saved == Some(fingerprint) {
            debug!("snapshot unchanged, save skipped");
            return false;
        }
        match self.store.save_state(snapshot).await.into_result() {
            Ok(_) => {
                debug!(hash = %fingerprint.to_hex(), "snapshot saved");
                self.last_saved = Some(fingerprint);
                true
            }
            Err(e) => {
                warn!(error = %e, "save failed");
                false
            }
        }
    }

    pub async fn complete_phase(&self, phase_index: usize) {
        let Some(session_id) = self.session_id.as_deref().filter(|_| !self.finished) else {
            return;
        };
        if let Err(e) = self
            .store
            .complete_phase(session_id, phase_index)
            .await
            .into_result()
        {
            warn!(session_id, phase_index, error = %e, "recording phase completion failed");
        }
    }

    /// Flush the quiz answers and stop saving.
    pub async fn complete_training(&mut self, answers: &[QuizAnswerState]) {
        let Some(session_id) = self.session_id.clone().filter(|_| !self.finished) else {
            return;
        };
        self.finished = true;
        match self
            .store
            .complete_training(&session_id, answers)
            .await
            .into_result()
        {
            Ok(_) => info!(%session_id, answers = answers.len(), "training recorded"),
            Err(e) => warn!(%session_id, error = %e, "recording completion failed"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
