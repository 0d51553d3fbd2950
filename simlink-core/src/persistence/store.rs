//! In-memory [`SessionStore`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{PersistedSnapshot, ServiceResponse, SessionStore, SessionSummary, now_ms};
use crate::training::QuizAnswerState;

/// Most recent operations kept by [`MemoryStore::calls`].
pub const CALL_LOG_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionSummary>,
    snapshots: HashMap<String, PersistedSnapshot>,
    completed_phases: Vec<(String, usize)>,
    results: HashMap<String, Vec<QuizAnswerState>>,
    calls: VecDeque<&'static str>,
    next_id: u64,
    failing: bool,
}

impl Inner {
    fn call(&mut self, op: &'static str) -> bool {
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(op);
        !self.failing
    }
}

/// Store kept in process memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call answer `success: false`.
    pub async fn set_failing(&self, failing: bool) {
        self.inner.lock().await.failing = failing;
    }

    /// Seed an existing session.
    pub async fn insert_session(&self, summary: SessionSummary) {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(summary.session_id.clone(), summary);
    }

    /// Seed a saved snapshot.
    pub async fn insert_snapshot(&self, snapshot: PersistedSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.snapshots.insert(snapshot.session_id.clone(), snapshot);
    }

    /// The most recent operation names in call order, at most
    /// [`CALL_LOG_CAPACITY`].
    pub async fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().await.calls.iter().copied().collect()
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<PersistedSnapshot> {
        self.inner.lock().await.snapshots.get(session_id).cloned()
    }

    pub async fn completed_phases(&self) -> Vec<(String, usize)> {
        self.inner.lock().await.completed_phases.clone()
    }

    /// Answers flushed by `complete_training`.
    pub async fn results(&self, session_id: &str) -> Option<Vec<QuizAnswerState>> {
        self.inner.lock().await.results.get(session_id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_active_sessions(&self, user_id: &str) -> ServiceResponse<Vec<SessionSummary>> {
        let mut inner = self.inner.lock().await;
        if !inner.call("get_active_sessions") {
            return ServiceResponse::err("store unavailable");
        }
        let mut list: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && !inner.results.contains_key(&s.session_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
        ServiceResponse::ok(list)
    }

    async fn resume_session(&self, session_id: &str) -> ServiceResponse<SessionSummary> {
        let mut inner = self.inner.lock().await;
        if !inner.call("resume_session") {
            return ServiceResponse::err("store unavailable");
        }
        match inner.sessions.get(session_id) {
            Some(s) => ServiceResponse::ok(s.clone()),
            None => ServiceResponse::err(format!("no session {session_id}")),
        }
    }

    async fn create_new_session(&self, user_id: &str) -> ServiceResponse<SessionSummary> {
        let mut inner = self.inner.lock().await;
        if !inner.call("create_new_session") {
            return ServiceResponse::err("store unavailable");
        }
        inner.next_id += 1;
        let summary = SessionSummary {
            session_id: format!("session-{}", inner.next_id),
            user_id: user_id.to_string(),
            phase_index: 0,
            progress: 0.0,
            updated_at_ms: now_ms(),
        };
        inner
            .sessions
            .insert(summary.session_id.clone(), summary.clone());
        ServiceResponse::ok(summary)
    }

    async fn complete_phase(&self, session_id: &str, phase_index: usize) -> ServiceResponse<()> {
        let mut inner = self.inner.lock().await;
        if !inner.call("complete_phase") {
            return ServiceResponse::err("store unavailable");
        }
        inner
            .completed_phases
            .push((session_id.to_string(), phase_index));
        if let Some(s) = inner.sessions.get_mut(session_id) {
            s.phase_index = s.phase_index.max(phase_index + 1);
            s.updated_at_ms = now_ms();
        }
        ServiceResponse::empty()
    }

    async fn complete_training(
        &self,
        session_id: &str,
        answers: &[QuizAnswerState],
    ) -> ServiceResponse<()> {
        let mut inner = self.inner.lock().await;
        if !inner.call("complete_training") {
            return ServiceResponse::err("store unavailable");
        }
        inner.snapshots.remove(session_id);
        inner
            .results
            .insert(session_id.to_string(), answers.to_vec());
        ServiceResponse::empty()
    }

    async fn restore_state(&self, session_id: &str) -> ServiceResponse<PersistedSnapshot> {
        let mut inner = self.inner.lock().await;
        if !inner.call("restore_state") {
            return ServiceResponse::err("store unavailable");
        }
        match inner.snapshots.get(session_id) {
            Some(snap) => ServiceResponse::ok(snap.clone()),
            None => ServiceResponse::empty(),
        }
    }

    async fn save_state(&self, snapshot: &PersistedSnapshot) -> ServiceResponse<()> {
        let mut inner = self.inner.lock().await;
        if !inner.call("save_state") {
            return ServiceResponse::err("store unavailable");
        }
        if let Some(s) = inner.sessions.get_mut(&snapshot.session_id) {
            s.phase_index = snapshot.training.progress.current_task_index;
            s.progress = snapshot.training.progress.progress;
            s.updated_at_ms = snapshot.saved_at_ms;
        }
        inner
            .snapshots
            .insert(snapshot.session_id.clone(), snapshot.clone());
        ServiceResponse::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_listed_per_user_until_completed() {
        let store = MemoryStore::new();
        let a = store.create_new_session("u-1").await.data.unwrap();
        store.create_new_session("u-2").await;

        let listed = store.get_active_sessions("u-1").await.data.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, a.session_id);

        store.complete_training(&a.session_id, &[]).await;
        assert!(store.get_active_sessions("u-1").await.data.unwrap().is_empty());
        assert_eq!(store.results(&a.session_id).await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn resume_unknown_session_fails() {
        let store = MemoryStore::new();
        let resp = store.resume_session("nope").await;
        assert!(!resp.success);
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn failing_store_records_calls() {
        let store = MemoryStore::new();
        store.set_failing(true).await;
        assert!(!store.restore_state("s").await.success);
        assert_eq!(store.calls().await, vec!["restore_state"]);
    }

    #[tokio::test]
    async fn call_log_keeps_the_latest() {
        let store = MemoryStore::new();
        store.restore_state("s").await;
        for _ in 0..CALL_LOG_CAPACITY {
            store.get_active_sessions("u-1").await;
        }
        let calls = store.calls().await;
        assert_eq!(calls.len(), CALL_LOG_CAPACITY);
        assert!(!calls.contains(&"restore_state"));
    }
}
