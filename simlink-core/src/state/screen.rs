//! Screen flow from launch to completion.
//!
//! ```text
//!  Starter ──► SessionSelection ──► Loading{intent} ──► Cinematic ──► Training ──► Complete
//!     │                                  ▲                               │
//!     └──────────────────────────────────┘◄──────── session ended ───────┘
//! ```
//!
//! `Loading` is left only when the connection reports `Connected`; the
//! recorded intent decides whether the cinematic is shown. `quit` reaches
//! `Complete` from anywhere.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::SimlinkError;

// ── Launch context ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Instructor,
    Admin,
    Demo,
}

impl FromStr for Role {
    type Err = SimlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            "demo" => Ok(Role::Demo),
            other => Err(SimlinkError::Other(format!("unknown role: {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
            Role::Demo => "demo",
        };
        f.write_str(s)
    }
}

/// Who launched the client and how.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchContext {
    pub user_id: String,
    pub role: Role,
    /// Launched from a learning platform (LTI).
    pub is_lti: bool,
}

impl LaunchContext {
    /// Only LTI students get session selection and saved progress.
    pub fn is_lti_student(&self) -> bool {
        self.is_lti && self.role == Role::Student
    }
}

// ── ScreenState ──────────────────────────────────────────────────

/// Why `Loading` was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingIntent {
    ForCinematic,
    ForTraining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenState {
    #[default]
    Starter,
    SessionSelection,
    Loading(LoadingIntent),
    Cinematic,
    Training,
    Complete,
}

impl fmt::Display for ScreenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenState::Loading(LoadingIntent::ForCinematic) => write!(f, "Loading(cinematic)"),
            ScreenState::Loading(LoadingIntent::ForTraining) => write!(f, "Loading(training)"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

// ── ScreenFlow ───────────────────────────────────────────────────

/// Owner of [`ScreenState`].
#[derive(Debug)]
pub struct ScreenFlow {
    state: ScreenState,
    /// Phase to resume at once `Training` is entered.
    pending_phase: Option<usize>,
    /// Seconds left on the cinematic countdown.
    countdown: Option<u32>,
    state_tx: watch::Sender<ScreenState>,
}

impl Default for ScreenFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenFlow {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ScreenState::Starter);
        Self {
            state: ScreenState::Starter,
            pending_phase: None,
            countdown: None,
            state_tx,
        }
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<ScreenState> {
        self.state_tx.subscribe()
    }

    pub fn pending_phase(&self) -> Option<usize> {
        self.pending_phase
    }

    pub fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Leave the starter screen.
    ///
    /// Valid from: `Starter`.
    pub fn start(
        &mut self,
        ctx: &LaunchContext,
        has_active_sessions: bool,
    ) -> Result<ScreenState, SimlinkError> {
        if self.state != ScreenState::Starter {
            return Err(SimlinkError::InvalidTransition(
                "cannot start: not on the starter screen",
            ));
        }
        let next = if !ctx.is_lti_student() {
            ScreenState::Loading(LoadingIntent::ForTraining)
        } else if has_active_sessions {
            ScreenState::SessionSelection
        } else {
            ScreenState::Loading(LoadingIntent::ForCinematic)
        };
        self.set(next);
        Ok(next)
    }

    /// Resume an existing session at `resume_phase`, or start a new one.
    ///
    /// Valid from: `SessionSelection`.
    pub fn select_session(&mut self, resume_phase: Option<usize>) -> Result<(), SimlinkError> {
        if self.state != ScreenState::SessionSelection {
            return Err(SimlinkError::InvalidTransition(
                "cannot select session: not on the selection screen",
            ));
        }
        match resume_phase {
            Some(phase) => {
                self.pending_phase = Some(phase);
                self.set(ScreenState::Loading(LoadingIntent::ForTraining));
            }
            None => {
                self.pending_phase = None;
                self.set(ScreenState::Loading(LoadingIntent::ForCinematic));
            }
        }
        Ok(())
    }

    /// The connection reached `Connected`.
    ///
    /// Leaves `Loading` according to its intent. Returns the pending resume
    /// phase when `Training` is entered, so it can be applied before
    /// anything is shown. A reconnect while already past loading is a no-op.
    pub fn on_connected(&mut self) -> Result<Option<usize>, SimlinkError> {
        match self.state {
            ScreenState::Loading(LoadingIntent::ForCinematic) => {
                self.set(ScreenState::Cinematic);
                Ok(None)
            }
            ScreenState::Loading(LoadingIntent::ForTraining) => {
                self.set(ScreenState::Training);
                Ok(self.pending_phase.take())
            }
            ScreenState::Cinematic | ScreenState::Training | ScreenState::Complete => Ok(None),
            ScreenState::Starter | ScreenState::SessionSelection => Err(
                SimlinkError::InvalidTransition("connected before a session was chosen"),
            ),
        }
    }

    /// Start the cinematic countdown.
    ///
    /// Valid from: `Cinematic`.
    pub fn start_countdown(&mut self, secs: u32) -> Result<(), SimlinkError> {
        if self.state != ScreenState::Cinematic {
            return Err(SimlinkError::InvalidTransition(
                "countdown only runs during the cinematic",
            ));
        }
        if secs == 0 {
            return self.begin_training();
        }
        self.countdown = Some(secs);
        Ok(())
    }

    /// Advance the countdown by one second. Returns `true` when it reached
    /// zero and `Training` was entered.
    pub fn tick(&mut self) -> bool {
        let Some(left) = self.countdown else {
            return false;
        };
        let left = left.saturating_sub(1);
        if left == 0 {
            self.countdown = None;
            self.set(ScreenState::Training);
            true
        } else {
            self.countdown = Some(left);
            false
        }
    }

    /// Skip or finish the cinematic.
    ///
    /// Valid from: `Cinematic`.
    pub fn begin_training(&mut self) -> Result<(), SimlinkError> {
        match self.state {
            ScreenState::Cinematic => {
                self.countdown = None;
                self.set(ScreenState::Training);
                Ok(())
            }
            _ => Err(SimlinkError::InvalidTransition(
                "cannot begin training: not in the cinematic",
            )),
        }
    }

    /// Training finished.
    ///
    /// Valid from: `Cinematic`, `Training`; idempotent in `Complete`.
    pub fn on_training_complete(&mut self) -> Result<(), SimlinkError> {
        match self.state {
            ScreenState::Cinematic | ScreenState::Training => {
                self.countdown = None;
                self.set(ScreenState::Complete);
                Ok(())
            }
            ScreenState::Complete => Ok(()),
            _ => Err(SimlinkError::InvalidTransition(
                "cannot complete: training never started",
            )),
        }
    }

    /// Leave from anywhere.
    pub fn quit(&mut self) {
        self.countdown = None;
        self.pending_phase = None;
        self.set(ScreenState::Complete);
    }

    /// The platform ended a live session. Go back to loading with the
    /// current phase held, so the next connect resumes in place.
    pub fn on_session_ended(&mut self, current_phase: usize) {
        if matches!(self.state, ScreenState::Cinematic | ScreenState::Training) {
            self.countdown = None;
            self.pending_phase = Some(current_phase);
            self.set(ScreenState::Loading(LoadingIntent::ForTraining));
        }
    }

    /// Re-apply a restored screen mode. Only moves forward from the
    /// cinematic into training; everything else is left alone.
    pub fn restore_mode(&mut self, mode: ScreenState) -> bool {
        if self.state == ScreenState::Cinematic && mode == ScreenState::Training {
            self.countdown = None;
            self.set(ScreenState::Training);
            true
        } else {
            false
        }
    }

    fn set(&mut self, next: ScreenState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "screen");
        } else {
            debug!(state = %next, "screen unchanged");
        }
        self.state = next;
        self.state_tx.send_replace(next);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> LaunchContext {
        LaunchContext {
            user_id: "u-1".into(),
            role: Role::Student,
            is_lti: true,
        }
    }

    #[test]
    fn new_student_watches_cinematic() {
        let mut flow = ScreenFlow::new();
        assert_eq!(
            flow.start(&student(), false).unwrap(),
            ScreenState::Loading(LoadingIntent::ForCinematic)
        );
        assert_eq!(flow.on_connected().unwrap(), None);
        assert_eq!(flow.state(), ScreenState::Cinematic);

        flow.start_countdown(2).unwrap();
        assert!(!flow.tick());
        assert!(flow.tick());
        assert_eq!(flow.state(), ScreenState::Training);

        flow.on_training_complete().unwrap();
        assert_eq!(flow.state(), ScreenState::Complete);
    }

    #[test]
    fn resume_skips_cinematic_and_hands_back_phase() {
        let mut flow = ScreenFlow::new();
        assert_eq!(
            flow.start(&student(), true).unwrap(),
            ScreenState::SessionSelection
        );
        flow.select_session(Some(3)).unwrap();
        assert_eq!(flow.state(), ScreenState::Loading(LoadingIntent::ForTraining));
        assert_eq!(flow.on_connected().unwrap(), Some(3));
        assert_eq!(flow.state(), ScreenState::Training);
        assert_eq!(flow.pending_phase(), None);
    }

    #[test]
    fn non_students_go_straight_to_training() {
        for ctx in [
            LaunchContext {
                role: Role::Instructor,
                is_lti: true,
                ..Default::default()
            },
            LaunchContext {
                role: Role::Student,
                is_lti: false,
                ..Default::default()
            },
        ] {
            let mut flow = ScreenFlow::new();
            assert_eq!(
                flow.start(&ctx, true).unwrap(),
                ScreenState::Loading(LoadingIntent::ForTraining)
            );
            flow.on_connected().unwrap();
            assert_eq!(flow.state(), ScreenState::Training);
        }
    }

    #[test]
    fn loading_is_only_left_on_connected() {
        let mut flow = ScreenFlow::new();
        flow.start(&student(), false).unwrap();
        assert!(flow.begin_training().is_err());
        assert!(flow.start_countdown(5).is_err());
        assert!(!flow.tick());
        assert_eq!(flow.state(), ScreenState::Loading(LoadingIntent::ForCinematic));
    }

    #[test]
    fn invalid_transitions_are_errors() {
        let mut flow = ScreenFlow::new();
        assert!(flow.select_session(None).is_err());
        assert!(flow.on_connected().is_err());
        assert!(flow.on_training_complete().is_err());
        flow.start(&student(), false).unwrap();
        assert!(flow.start(&student(), false).is_err());
    }

    #[test]
    fn quit_from_anywhere() {
        let mut flow = ScreenFlow::new();
        flow.quit();
        assert_eq!(flow.state(), ScreenState::Complete);

        let mut flow = ScreenFlow::new();
        flow.start(&student(), true).unwrap();
        flow.quit();
        assert_eq!(flow.state(), ScreenState::Complete);
    }

    #[test]
    fn session_end_returns_to_loading_with_phase() {
        let mut flow = ScreenFlow::new();
        flow.start(&student(), false).unwrap();
        flow.on_connected().unwrap();
        flow.begin_training().unwrap();

        flow.on_session_ended(4);
        assert_eq!(flow.state(), ScreenState::Loading(LoadingIntent::ForTraining));
        assert_eq!(flow.on_connected().unwrap(), Some(4));
    }

    #[test]
    fn restore_mode_only_moves_forward() {
        let mut flow = ScreenFlow::new();
        flow.start(&student(), false).unwrap();
        flow.on_connected().unwrap();
        assert!(!flow.restore_mode(ScreenState::Cinematic));
        assert!(flow.restore_mode(ScreenState::Training));
        assert!(!flow.restore_mode(ScreenState::Cinematic));
        assert_eq!(flow.state(), ScreenState::Training);
    }

    #[test]
    fn watch_observes_transitions() {
        let mut flow = ScreenFlow::new();
        let rx = flow.subscribe();
        flow.start(&student(), false).unwrap();
        assert_eq!(*rx.borrow(), ScreenState::Loading(LoadingIntent::ForCinematic));
    }

    #[test]
    fn role_parse() {
        assert_eq!("Instructor".parse::<Role>().unwrap(), Role::Instructor);
        assert!("wizard".parse::<Role>().is_err());
    }
}
