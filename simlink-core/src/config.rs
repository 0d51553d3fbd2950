//! Runtime settings for a [`Session`](crate::session::Session).

use std::collections::HashMap;
use std::time::Duration;

use crate::persistence::DEFAULT_AUTOSAVE_INTERVAL;
use crate::router::DEFAULT_LOG_CAPACITY;
use crate::state::RetryPolicy;
use crate::training::TaskSequence;
use crate::transport::LaunchTarget;

/// Default length of the cinematic before training starts on its own.
pub const DEFAULT_CINEMATIC_SECS: u32 = 10;

/// Default quiet time after which a live session is treated as expired.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target: LaunchTarget,
    pub retry: RetryPolicy,
    /// Raised to [`MIN_AUTOSAVE_INTERVAL`](crate::persistence::MIN_AUTOSAVE_INTERVAL).
    pub autosave_interval: Duration,
    /// A connected session with no inbound traffic and no user command for
    /// this long ends as withdrawn. `None` never expires.
    pub idle_timeout: Option<Duration>,
    /// Messages kept for diagnostics.
    pub log_capacity: usize,
    pub tasks: TaskSequence,
    /// Correct answer index per question id.
    pub answers: HashMap<String, usize>,
    /// `0` skips the countdown and enters training immediately.
    pub cinematic_secs: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target: LaunchTarget::default(),
            retry: RetryPolicy::default(),
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            log_capacity: DEFAULT_LOG_CAPACITY,
            tasks: TaskSequence::default(),
            answers: HashMap::new(),
            cinematic_secs: DEFAULT_CINEMATIC_SECS,
        }
    }
}

impl SessionConfig {
    /// Whether `selected` answers `question_id`; `None` if the question is
    /// not in the key.
    pub fn is_correct(&self, question_id: &str, selected: usize) -> Option<bool> {
        self.answers.get(question_id).map(|correct| *correct == selected)
    }
}
