//! Question life-cycle.
//!
//! ```text
//!  Idle ──► Presented ──► Answered(correct) ──► Idle
//!              ▲   │
//!              └───┘ wrong answer, attempt += 1
//! ```

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SimlinkError;

/// Recorded outcome for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswerState {
    pub question_id: String,
    pub selected_answer_index: usize,
    pub is_correct: bool,
    /// Tries taken, at least 1.
    pub attempt_count: u32,
    pub time_to_answer_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QuizState {
    #[default]
    Idle,
    Presented {
        question_id: String,
        /// Wrong answers so far.
        wrong: u32,
        last_selected: Option<usize>,
        since: Instant,
    },
    Answered {
        question_id: String,
    },
}

/// Result of one answer submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub question_id: String,
    /// 1-based try number of this submission.
    pub try_count: u32,
    pub correct: bool,
}

#[derive(Debug, Default)]
pub struct Quiz {
    state: QuizState,
    answers: Vec<QuizAnswerState>,
    locked: bool,
}

impl Quiz {
    pub fn state(&self) -> &QuizState {
        &self.state
    }

    /// A question is on screen (presented or answered but not dismissed).
    pub fn is_open(&self) -> bool {
        !matches!(self.state, QuizState::Idle)
    }

    pub fn answers(&self) -> &[QuizAnswerState] {
        &self.answers
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Freeze the answer list.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Replace the answer list with restored entries.
    pub fn restore_answers(&mut self, answers: Vec<QuizAnswerState>) {
        if self.locked {
            return;
        }
        self.answers = answers;
    }

    /// Show a question. Returns `false` if nothing changed.
    pub fn present(&mut self, question_id: &str) -> bool {
        if self.locked {
            debug!(question_id, "question ignored: quiz locked");
            return false;
        }
        if let QuizState::Presented { question_id: open, .. } = &self.state {
            if open == question_id {
                return false;
            }
            warn!(open = %open, replacing = question_id, "question replaced before it was answered");
        }
        self.state = QuizState::Presented {
            question_id: question_id.to_string(),
            wrong: 0,
            last_selected: None,
            since: Instant::now(),
        };
        true
    }

    /// Submit an answer to the open question.
    ///
    /// Valid from: `Presented`.
    pub fn answer(
        &mut self,
        selected_index: usize,
        correct: bool,
    ) -> Result<AnswerOutcome, SimlinkError> {
        if self.locked {
            return Err(SimlinkError::InvalidTransition("answers are final"));
        }
        let QuizState::Presented {
            question_id,
            wrong,
            last_selected,
            since,
        } = &mut self.state
        else {
            return Err(SimlinkError::InvalidTransition("no question is open"));
        };

        let try_count = *wrong + 1;
        let outcome = AnswerOutcome {
            question_id: question_id.clone(),
            try_count,
            correct,
        };

        if correct {
            let record = QuizAnswerState {
                question_id: question_id.clone(),
                selected_answer_index: selected_index,
                is_correct: true,
                attempt_count: try_count,
                time_to_answer_ms: since.elapsed().as_millis() as u64,
            };
            self.record(record);
            self.state = QuizState::Answered {
                question_id: outcome.question_id.clone(),
            };
        } else {
            *wrong += 1;
            *last_selected = Some(selected_index);
        }
        Ok(outcome)
    }

    /// Close the question. A question closed after wrong answers only is
    /// recorded as incorrect. Returns the closed question's id.
    ///
    /// Valid from: `Presented`, `Answered`.
    pub fn dismiss(&mut self) -> Result<String, SimlinkError> {
        match std::mem::take(&mut self.state) {
            QuizState::Idle => Err(SimlinkError::InvalidTransition("no question to dismiss")),
            QuizState::Answered { question_id } => Ok(question_id),
            QuizState::Presented {
                question_id,
                wrong,
                last_selected,
                since,
            } => {
                if let Some(selected) = last_selected.filter(|_| wrong > 0 && !self.locked) {
                    self.record(QuizAnswerState {
                        question_id: question_id.clone(),
                        selected_answer_index: selected,
                        is_correct: false,
                        attempt_count: wrong,
                        time_to_answer_ms: since.elapsed().as_millis() as u64,
                    });
                }
                Ok(question_id)
            }
        }
    }

    fn record(&mut self, entry: QuizAnswerState) {
        // One entry per question; a re-asked question overwrites.
        match self
            .answers
            .iter_mut()
            .find(|a| a.question_id == entry.question_id)
        {
            Some(existing) => *existing = entry,
            None => self.answers.push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_then_right() {
        let mut quiz = Quiz::default();
        assert!(quiz.present("Q1"));

        let first = quiz.answer(0, false).unwrap();
        assert_eq!(first.try_count, 1);
        assert!(matches!(quiz.state(), QuizState::Presented { wrong: 1, .. }));

        let second = quiz.answer(2, true).unwrap();
        assert_eq!(second.try_count, 2);
        assert!(matches!(quiz.state(), QuizState::Answered { .. }));

        assert_eq!(quiz.dismiss().unwrap(), "Q1");
        assert!(!quiz.is_open());

        let a = &quiz.answers()[0];
        assert_eq!(a.question_id, "Q1");
        assert_eq!(a.selected_answer_index, 2);
        assert!(a.is_correct);
        assert_eq!(a.attempt_count, 2);
    }

    #[test]
    fn answer_without_question_is_error() {
        let mut quiz = Quiz::default();
        assert!(quiz.answer(0, true).is_err());
        assert!(quiz.dismiss().is_err());
    }

    #[test]
    fn dismiss_after_wrong_records_incorrect() {
        let mut quiz = Quiz::default();
        quiz.present("Q6");
        quiz.answer(1, false).unwrap();
        quiz.dismiss().unwrap();
        assert_eq!(quiz.answers().len(), 1);
        assert!(!quiz.answers()[0].is_correct);
        assert_eq!(quiz.answers()[0].attempt_count, 1);
    }

    #[test]
    fn repeated_present_is_noop() {
        let mut quiz = Quiz::default();
        assert!(quiz.present("Q1"));
        quiz.answer(0, false).unwrap();
        assert!(!quiz.present("Q1"));
        assert!(matches!(quiz.state(), QuizState::Presented { wrong: 1, .. }));
    }

    #[test]
    fn locked_quiz_is_immutable() {
        let mut quiz = Quiz::default();
        quiz.present("Q1");
        quiz.answer(0, true).unwrap();
        quiz.dismiss().unwrap();
        quiz.lock();

        assert!(!quiz.present("Q2"));
        quiz.restore_answers(Vec::new());
        assert_eq!(quiz.answers().len(), 1);
    }
}
