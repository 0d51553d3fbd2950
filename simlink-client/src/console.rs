//! Text rendering of session events for the terminal.

use simlink_core::{
    ConnectionEvent, ConnectionState, Direction, MessageLog, ScreenState, SessionEvent,
    TrainingEvent,
};

/// Keeps the console's own view of the session: a traffic log fed from
/// [`SessionEvent::Traffic`] and the last known phase.
#[derive(Debug)]
pub struct Console {
    log: MessageLog,
    phase: Option<usize>,
}

impl Console {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log: MessageLog::with_capacity(log_capacity),
            phase: None,
        }
    }

    /// Record `event` and return the line to print, if any.
    pub fn on_event(&mut self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::Traffic(msg) => {
                self.log.push(msg.clone());
                None
            }
            SessionEvent::Screen(screen) => Some(format!("[screen] {screen}")),
            SessionEvent::Connection(event) => Some(describe_connection(event)),
            SessionEvent::Training(event) => {
                if let TrainingEvent::TaskStarted { index, .. } = event {
                    self.phase = Some(*index);
                }
                Some(describe_training(event))
            }
            SessionEvent::ActiveSessions(sessions) => {
                if sessions.is_empty() {
                    return Some("[sessions] none saved, use /new".into());
                }
                let mut out = String::from("[sessions] /resume <id> or /new");
                for s in sessions {
                    out.push_str(&format!(
                        "\n  {}  phase {}  {:.0}%",
                        s.session_id, s.phase_index, s.progress
                    ));
                }
                Some(out)
            }
            SessionEvent::Restored { phase } => {
                self.phase = Some(*phase);
                Some(format!("[session] restored at phase {phase}"))
            }
            SessionEvent::Saved => None,
            SessionEvent::Countdown { remaining } => Some(format!("[cinematic] {remaining}")),
            SessionEvent::Rejected(reason) => Some(format!("[rejected] {reason}")),
        }
    }

    /// The `count` most recent messages, oldest first.
    pub fn log_lines(&self, count: usize) -> Vec<String> {
        self.log
            .recent(count)
            .map(|m| {
                let arrow = match m.direction {
                    Direction::Sent => ">>",
                    Direction::Received => "<<",
                };
                format!("{arrow} {}", m.to_wire())
            })
            .collect()
    }

    pub fn status(&self, conn: ConnectionState, screen: ScreenState) -> String {
        match self.phase {
            Some(phase) => format!("connection: {conn:?}  screen: {screen}  phase: {phase}"),
            None => format!("connection: {conn:?}  screen: {screen}"),
        }
    }
}

fn describe_connection(event: &ConnectionEvent) -> String {
    match event {
        ConnectionEvent::Connecting { attempt } => format!("[connection] connecting (attempt {attempt})"),
        ConnectionEvent::Connected => "[connection] connected".into(),
        ConnectionEvent::Failed {
            reason,
            attempt,
            will_retry: true,
        } => format!("[connection] attempt {attempt} failed: {reason}; retrying"),
        ConnectionEvent::Failed { reason, .. } => {
            format!("[connection] failed: {reason}; use /retry")
        }
        ConnectionEvent::SessionEnded { reason } => format!("[connection] session {reason}"),
    }
}

fn describe_training(event: &TrainingEvent) -> String {
    match event {
        TrainingEvent::TaskStarted { index, tool, .. } => {
            format!("[training] task {} started, select {tool}", index + 1)
        }
        TrainingEvent::PhaseSuccess {
            completed_task_id, ..
        } => format!("[training] {completed_task_id} complete"),
        TrainingEvent::QuestionPresented { question_id } => {
            format!("[question] {question_id}: /answer <n>")
        }
        TrainingEvent::AnswerSubmitted {
            question_id,
            correct,
            ..
        } => {
            let verdict = if *correct { "correct" } else { "incorrect" };
            format!("[question] {question_id} {verdict}")
        }
        TrainingEvent::QuestionClosed { question_id } => format!("[question] {question_id} closed"),
        TrainingEvent::TrainingCompleted => "[training] complete".into(),
    }
}
