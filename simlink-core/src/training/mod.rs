//! Training progression.
//!
//! [`TrainingMachine`] owns [`TrainingProgress`] and the quiz. It only
//! moves forward: tasks advance on the simulation's completion signal for
//! the *current* task, progress never decreases, and completion fires once.
//! [`TrainingMachine::resume_to_phase`] is the one explicit way back.
//!
//! | Module     | Purpose                               |
//! |------------|---------------------------------------|
//! | `sequence` | Ordered task list and per-task status |
//! | `quiz`     | Question life-cycle and answer log    |

pub mod quiz;
pub mod sequence;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SimlinkError;
use crate::protocol::ProgressUpdate;

pub use quiz::{AnswerOutcome, Quiz, QuizAnswerState, QuizState};
pub use sequence::{TaskSequence, TaskSpec, TaskStatus};

// ── Progress ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub phase: String,
    /// 0-based index into the task sequence.
    pub current_task_index: usize,
    pub total_tasks: usize,
    /// 0..=100, non-decreasing.
    pub progress: f64,
    pub selected_tool: Option<String>,
    pub selected_pipe: Option<String>,
    pub air_plug_selected: bool,
    pub is_active: bool,
    pub training_started: bool,
}

/// Serializable state of a [`TrainingMachine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub progress: TrainingProgress,
    pub task_status: Vec<TaskStatus>,
    pub answers: Vec<QuizAnswerState>,
}

/// Something the UI or the session should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingEvent {
    TaskStarted {
        index: usize,
        task_id: String,
        tool: String,
    },
    /// A task was completed; prompt before moving on.
    PhaseSuccess {
        completed_task_id: String,
        next_task_index: usize,
    },
    QuestionPresented {
        question_id: String,
    },
    AnswerSubmitted {
        question_id: String,
        try_count: u32,
        correct: bool,
    },
    QuestionClosed {
        question_id: String,
    },
    TrainingCompleted,
}

/// How a completed task was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskMatch {
    Id(usize),
    /// Both resolved but disagree; the id wins.
    IdOverIndex { id: usize, index: usize },
    /// The id is unknown; the index was used.
    IndexFallback(usize),
}

// ── TrainingMachine ──────────────────────────────────────────────

#[derive(Debug)]
pub struct TrainingMachine {
    sequence: TaskSequence,
    progress: TrainingProgress,
    status: Vec<TaskStatus>,
    quiz: Quiz,
    /// `training_complete` arrived while a question was open.
    completion_pending: bool,
    completed: bool,
}

impl TrainingMachine {
    pub fn new(sequence: TaskSequence) -> Self {
        let total = sequence.len();
        Self {
            progress: TrainingProgress {
                total_tasks: total,
                ..Default::default()
            },
            status: vec![TaskStatus::NotStarted; total],
            sequence,
            quiz: Quiz::default(),
            completion_pending: false,
            completed: false,
        }
    }

    pub fn progress(&self) -> &TrainingProgress {
        &self.progress
    }

    pub fn sequence(&self) -> &TaskSequence {
        &self.sequence
    }

    pub fn current_task(&self) -> Option<&TaskSpec> {
        self.sequence.get(self.progress.current_task_index)
    }

    pub fn task_status(&self, index: usize) -> Option<TaskStatus> {
        self.status.get(index).copied()
    }

    pub fn quiz(&self) -> &Quiz {
        &self.quiz
    }

    pub fn answers(&self) -> &[QuizAnswerState] {
        self.quiz.answers()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn completion_pending(&self) -> bool {
        self.completion_pending
    }

    // ── Progress ─────────────────────────────────────────────────

    /// Training was started on the simulation.
    pub fn start(&mut self) -> Vec<TrainingEvent> {
        if self.completed || self.progress.training_started {
            return Vec::new();
        }
        self.progress.training_started = true;
        self.progress.is_active = true;
        self.enter_current()
    }

    /// Apply a `training_progress` report.
    pub fn set_progress(&mut self, update: &ProgressUpdate) -> Vec<TrainingEvent> {
        if self.completed {
            debug!("progress after completion ignored");
            return Vec::new();
        }
        let total = self.progress.total_tasks;
        if update.total_tasks != 0 && update.total_tasks != total {
            warn!(
                reported = update.total_tasks,
                expected = total,
                "simulation reports a different task count"
            );
        }

        self.progress.progress = self.progress.progress.max(update.progress);
        if !update.phase.is_empty() {
            self.progress.phase = update.phase.clone();
        }
        self.progress.is_active = update.is_active;
        if update.is_active {
            self.progress.training_started = true;
        }

        let current = self.progress.current_task_index;
        if update.current_task > current && update.current_task < total {
            debug!(from = current, to = update.current_task, "task index synced forward");
            for s in &mut self.status[..update.current_task] {
                *s = TaskStatus::Completed;
            }
            self.progress.current_task_index = update.current_task;
            return self.enter_current();
        }
        Vec::new()
    }

    /// Apply a `task_completed` report.
    ///
    /// The task is resolved by `task_id`, falling back to `next_index - 1`.
    /// Only the current task advances; anything else is a no-op.
    pub fn advance_task(&mut self, task_id: &str, next_index: Option<usize>) -> Vec<TrainingEvent> {
        if self.completed {
            debug!(task_id, "task completion after training complete ignored");
            return Vec::new();
        }

        let resolved = match self.resolve_completed(task_id, next_index) {
            Some(TaskMatch::Id(index)) => index,
            Some(TaskMatch::IdOverIndex { id, index }) => {
                warn!(task_id, id_index = id, index, "task id and index disagree, using id");
                id
            }
            Some(TaskMatch::IndexFallback(index)) => {
                warn!(task_id, next_index = ?next_index, "unknown task id, falling back to index");
                index
            }
            None => {
                warn!(task_id, "completion for unknown task dropped");
                return Vec::new();
            }
        };

        let current = self.progress.current_task_index;
        if resolved < current {
            debug!(task_id, resolved, current, "duplicate task completion");
            return Vec::new();
        }
        if resolved > current {
            warn!(task_id, resolved, current, "out-of-order task completion ignored");
            return Vec::new();
        }
        let Some(spec) = self.sequence.get(current) else {
            return Vec::new();
        };
        let completed_task_id = spec.task_id.clone();

        let total = self.progress.total_tasks;
        self.status[current] = TaskStatus::Completed;
        let next = current + 1;
        self.progress.current_task_index = next;
        let floor = (next * 100) as f64 / total as f64;
        self.progress.progress = self.progress.progress.max(floor).min(100.0);
        self.progress.selected_pipe = None;
        self.progress.air_plug_selected = false;
        info!(task = %completed_task_id, next, total, "task completed");

        if next < total {
            let mut events = vec![TrainingEvent::PhaseSuccess {
                completed_task_id,
                next_task_index: next,
            }];
            events.extend(self.enter_current());
            events
        } else {
            self.request_completion()
        }
    }

    /// The simulation reported the whole exercise finished.
    pub fn on_training_complete(&mut self) -> Vec<TrainingEvent> {
        self.request_completion()
    }

    // ── Tools ────────────────────────────────────────────────────

    /// The learner picked a tool. Any tool is allowed; returns whether it is
    /// the one the current task expects.
    pub fn select_tool(&mut self, tool: &str) -> bool {
        self.progress.selected_tool = Some(tool.to_string());
        let expected = self
            .current_task()
            .is_some_and(|t| t.tool.eq_ignore_ascii_case(tool));
        if !expected {
            debug!(tool, "tool selected outside the current task");
        }
        expected
    }

    pub fn select_pipe(&mut self, pipe: &str) {
        self.progress.selected_pipe = Some(pipe.to_string());
    }

    pub fn select_air_plug(&mut self) {
        self.progress.air_plug_selected = true;
    }

    /// The simulation confirmed the active tool.
    pub fn on_tool_change(&mut self, tool: &str) {
        self.progress.selected_tool = (!tool.is_empty()).then(|| tool.to_string());
    }

    /// The simulation started a task with `tool`.
    pub fn on_task_start(&mut self, tool: &str, pipe: Option<&str>) -> Vec<TrainingEvent> {
        self.on_tool_change(tool);
        if let Some(pipe) = pipe {
            self.progress.selected_pipe = Some(pipe.to_string());
        }
        let index = self.progress.current_task_index;
        match self.current_task() {
            Some(spec) if spec.tool.eq_ignore_ascii_case(tool) => {
                let event = TrainingEvent::TaskStarted {
                    index,
                    task_id: spec.task_id.clone(),
                    tool: spec.tool.clone(),
                };
                self.status[index] = TaskStatus::InProgress;
                vec![event]
            }
            _ => {
                debug!(tool, "task_start for a tool outside the current task");
                Vec::new()
            }
        }
    }

    // ── Quiz ─────────────────────────────────────────────────────

    pub fn present_question(&mut self, question_id: &str) -> Vec<TrainingEvent> {
        if self.completed || question_id.is_empty() {
            return Vec::new();
        }
        if self.quiz.present(question_id) {
            vec![TrainingEvent::QuestionPresented {
                question_id: question_id.to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    pub fn submit_answer(
        &mut self,
        selected_index: usize,
        correct: bool,
    ) -> Result<TrainingEvent, SimlinkError> {
        let outcome = self.quiz.answer(selected_index, correct)?;
        Ok(TrainingEvent::AnswerSubmitted {
            question_id: outcome.question_id,
            try_count: outcome.try_count,
            correct: outcome.correct,
        })
    }

    /// Close the open question, then flush a completion that arrived while
    /// it was open.
    pub fn dismiss_question(&mut self) -> Result<Vec<TrainingEvent>, SimlinkError> {
        let question_id = self.quiz.dismiss()?;
        let mut events = vec![TrainingEvent::QuestionClosed { question_id }];
        if self.completion_pending {
            debug!("flushing deferred completion");
            events.extend(self.request_completion());
        }
        Ok(events)
    }

    // ── Resume ───────────────────────────────────────────────────

    /// Jump to `index`. The only operation that may move backwards.
    pub fn resume_to_phase(&mut self, index: usize) -> Result<Vec<TrainingEvent>, SimlinkError> {
        if self.completed {
            return Err(SimlinkError::InvalidTransition(
                "cannot resume a completed training",
            ));
        }
        let total = self.progress.total_tasks;
        if index >= total {
            return Err(SimlinkError::InvalidTransition("resume phase out of range"));
        }
        for (i, s) in self.status.iter_mut().enumerate() {
            *s = if i < index {
                TaskStatus::Completed
            } else {
                TaskStatus::NotStarted
            };
        }
        self.progress.current_task_index = index;
        self.progress.progress = (index * 100) as f64 / total as f64;
        self.progress.selected_pipe = None;
        self.progress.air_plug_selected = false;
        self.progress.training_started = true;
        self.progress.is_active = true;
        info!(index, "resumed to phase");
        Ok(self.enter_current())
    }

    pub fn snapshot(&self) -> TrainingSnapshot {
        TrainingSnapshot {
            progress: self.progress.clone(),
            task_status: self.status.clone(),
            answers: self.quiz.answers().to_vec(),
        }
    }

    /// Apply a restored snapshot. Skipped if it would rewind live progress
    /// or does not fit the task sequence. Returns whether it was applied.
    pub fn apply_snapshot(&mut self, snap: &TrainingSnapshot) -> bool {
        let index = snap.progress.current_task_index;
        if self.completed {
            return false;
        }
        if index < self.progress.current_task_index {
            debug!(
                restored = index,
                live = self.progress.current_task_index,
                "snapshot behind live progress, skipped"
            );
            return false;
        }
        if index >= self.progress.total_tasks || snap.task_status.len() != self.status.len() {
            warn!(index, "snapshot does not match the task sequence, skipped");
            return false;
        }

        let live_progress = self.progress.progress;
        self.progress = TrainingProgress {
            total_tasks: self.progress.total_tasks,
            progress: live_progress.max(snap.progress.progress).min(100.0),
            ..snap.progress.clone()
        };
        self.status.clone_from(&snap.task_status);
        self.quiz.restore_answers(snap.answers.clone());
        info!(index, "snapshot applied");
        true
    }

    // ── Internals ────────────────────────────────────────────────

    /// Which task a `task_completed` report refers to. The id is
    /// authoritative; `next_index - 1` is only used when the id is unknown
    /// or out of range.
    fn resolve_completed(&self, task_id: &str, next_index: Option<usize>) -> Option<TaskMatch> {
        let by_id = self.sequence.position(task_id);
        let by_index = next_index
            .and_then(|n| n.checked_sub(1))
            .filter(|i| *i < self.sequence.len());
        match (by_id, by_index) {
            (Some(id), Some(index)) if id != index => Some(TaskMatch::IdOverIndex { id, index }),
            (Some(id), _) => Some(TaskMatch::Id(id)),
            (None, Some(index)) => Some(TaskMatch::IndexFallback(index)),
            (None, None) => None,
        }
    }

    fn enter_current(&mut self) -> Vec<TrainingEvent> {
        let index = self.progress.current_task_index;
        let Some(spec) = self.sequence.get(index) else {
            return Vec::new();
        };
        let event = TrainingEvent::TaskStarted {
            index,
            task_id: spec.task_id.clone(),
            tool: spec.tool.clone(),
        };
        self.status[index] = TaskStatus::InProgress;
        vec![event]
    }

    fn request_completion(&mut self) -> Vec<TrainingEvent> {
        if self.completed {
            debug!("duplicate completion ignored");
            return Vec::new();
        }
        if self.quiz.is_open() {
            debug!("completion deferred until the question closes");
            self.completion_pending = true;
            return Vec::new();
        }
        self.completion_pending = false;
        self.completed = true;
        self.progress.is_active = false;
        self.progress.progress = 100.0;
        self.progress.current_task_index = self.progress.total_tasks;
        self.status.fill(TaskStatus::Completed);
        self.quiz.lock();
        info!(answers = self.quiz.answers().len(), "training complete");
        vec![TrainingEvent::TrainingCompleted]
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TrainingMachine {
        TrainingMachine::new(TaskSequence::default())
    }

    fn progress(pct: f64, current: usize) -> ProgressUpdate {
        ProgressUpdate {
            progress: pct,
            task_name: "Shovel".into(),
            phase: "excavation".into(),
            current_task: current,
            total_tasks: 6,
            is_active: true,
        }
    }

    #[test]
    fn progress_then_completion_advances() {
        let mut t = machine();
        t.set_progress(&progress(42.0, 2));
        assert_eq!(t.progress().progress, 42.0);
        assert_eq!(t.progress().current_task_index, 2);
        assert_eq!(t.task_status(1), Some(TaskStatus::Completed));

        let events = t.advance_task("excavation", None);
        assert_eq!(
            events[0],
            TrainingEvent::PhaseSuccess {
                completed_task_id: "excavation".into(),
                next_task_index: 3
            }
        );
        assert_eq!(t.progress().current_task_index, 3);
        assert_eq!(t.progress().progress, 50.0);
    }

    #[test]
    fn duplicate_completion_is_noop() {
        let mut t = machine();
        t.start();
        assert!(!t.advance_task("site_survey", None).is_empty());
        assert!(t.advance_task("site_survey", None).is_empty());
        assert_eq!(t.progress().current_task_index, 1);
    }

    #[test]
    fn out_of_order_completion_is_ignored() {
        let mut t = machine();
        t.start();
        assert!(t.advance_task("pipe_connection", None).is_empty());
        assert_eq!(t.progress().current_task_index, 0);
    }

    #[test]
    fn id_wins_over_mismatched_index() {
        let mut t = machine();
        t.start();
        // Index says task 3, id says task 0 (current): id is used.
        assert!(!t.advance_task("site_survey", Some(4)).is_empty());
        assert_eq!(t.progress().current_task_index, 1);
    }

    #[test]
    fn index_fallback_when_id_unknown() {
        let mut t = machine();
        t.start();
        assert_eq!(
            t.resolve_completed("survey_v2", Some(1)),
            Some(TaskMatch::IndexFallback(0))
        );
        let events = t.advance_task("survey_v2", Some(1));
        assert!(events.contains(&TrainingEvent::PhaseSuccess {
            completed_task_id: "site_survey".into(),
            next_task_index: 1
        }));
        assert_eq!(t.progress().current_task_index, 1);
    }

    #[test]
    fn task_resolution_classifies_anomalies() {
        let t = machine();
        assert_eq!(t.resolve_completed("excavation", None), Some(TaskMatch::Id(2)));
        assert_eq!(t.resolve_completed("excavation", Some(3)), Some(TaskMatch::Id(2)));
        assert_eq!(
            t.resolve_completed("excavation", Some(5)),
            Some(TaskMatch::IdOverIndex { id: 2, index: 4 })
        );
        assert_eq!(t.resolve_completed("unknown", Some(0)), None);
        assert_eq!(t.resolve_completed("unknown", Some(40)), None);
        assert_eq!(t.resolve_completed("unknown", None), None);
    }

    #[test]
    fn progress_never_decreases() {
        let mut t = machine();
        t.set_progress(&progress(60.0, 3));
        t.set_progress(&progress(10.0, 1));
        assert_eq!(t.progress().progress, 60.0);
        assert_eq!(t.progress().current_task_index, 3);
    }

    #[test]
    fn unexpected_tool_is_allowed_but_not_advancing() {
        let mut t = machine();
        t.start();
        assert!(!t.select_tool("Shovel"));
        assert_eq!(t.progress().selected_tool.as_deref(), Some("Shovel"));
        assert!(t.select_tool("tape"));
        assert_eq!(t.progress().current_task_index, 0);
    }

    #[test]
    fn last_task_completes_training_once() {
        let mut t = machine();
        t.resume_to_phase(5).unwrap();
        let events = t.advance_task("pressure_testing", None);
        assert_eq!(events, vec![TrainingEvent::TrainingCompleted]);
        assert!(t.is_complete());
        assert!(t.on_training_complete().is_empty());
        assert_eq!(t.progress().progress, 100.0);
    }

    #[test]
    fn completion_deferred_while_question_open() {
        let mut t = machine();
        t.start();
        t.present_question("Q1");
        assert!(t.on_training_complete().is_empty());
        assert!(t.completion_pending());
        assert!(!t.is_complete());

        t.submit_answer(1, true).unwrap();
        let events = t.dismiss_question().unwrap();
        assert_eq!(
            events,
            vec![
                TrainingEvent::QuestionClosed {
                    question_id: "Q1".into()
                },
                TrainingEvent::TrainingCompleted
            ]
        );
        assert!(t.on_training_complete().is_empty());
        assert!(t.quiz().is_locked());
    }

    #[test]
    fn resume_moves_backward_explicitly() {
        let mut t = machine();
        t.set_progress(&progress(70.0, 4));
        let events = t.resume_to_phase(2).unwrap();
        assert!(matches!(events[0], TrainingEvent::TaskStarted { index: 2, .. }));
        assert_eq!(t.progress().current_task_index, 2);
        assert_eq!(t.task_status(3), Some(TaskStatus::NotStarted));
        assert!(t.resume_to_phase(6).is_err());
    }

    #[test]
    fn snapshot_does_not_rewind() {
        let mut source = machine();
        source.set_progress(&progress(30.0, 1));
        let behind = source.snapshot();

        let mut live = machine();
        live.set_progress(&progress(50.0, 3));
        assert!(!live.apply_snapshot(&behind));
        assert_eq!(live.progress().current_task_index, 3);

        let mut fresh = machine();
        assert!(fresh.apply_snapshot(&behind));
        assert_eq!(fresh.progress().current_task_index, 1);
        assert_eq!(fresh.progress().progress, 30.0);
    }

    #[test]
    fn snapshot_carries_answers() {
        let mut t = machine();
        t.start();
        t.present_question("Q2");
        t.submit_answer(3, true).unwrap();
        t.dismiss_question().unwrap();

        let mut restored = machine();
        assert!(restored.apply_snapshot(&t.snapshot()));
        assert_eq!(restored.answers().len(), 1);
        assert_eq!(restored.answers()[0].selected_answer_index, 3);
    }
}
