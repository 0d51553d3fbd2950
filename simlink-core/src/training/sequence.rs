//! The ordered list of tasks making up an exercise.

use serde::{Deserialize, Serialize};

/// One step of the exercise: which tool it needs and how the simulation
/// names it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub tool: String,
    pub task_id: String,
    pub name: String,
}

impl TaskSpec {
    pub fn new(tool: &str, task_id: &str, name: &str) -> Self {
        Self {
            tool: tool.to_string(),
            task_id: task_id.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// Fixed, ordered task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSequence {
    tasks: Vec<TaskSpec>,
}

impl Default for TaskSequence {
    /// The six-step trench and pipe exercise.
    fn default() -> Self {
        Self::new(vec![
            TaskSpec::new("Tape", "site_survey", "Site survey"),
            TaskSpec::new("Cones", "safety_setup", "Safety setup"),
            TaskSpec::new("Shovel", "excavation", "Excavation"),
            TaskSpec::new("Wrench", "pipe_connection", "Pipe connection"),
            TaskSpec::new("AirPlug", "test_plug", "Test plug"),
            TaskSpec::new("PressureGauge", "pressure_testing", "Pressure testing"),
        ])
    }
}

impl TaskSequence {
    pub fn new(tasks: Vec<TaskSpec>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TaskSpec> {
        self.tasks.get(index)
    }

    /// Index of the task with `task_id`. Matches case-insensitively.
    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.task_id.eq_ignore_ascii_case(task_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence_order() {
        let seq = TaskSequence::default();
        assert_eq!(seq.len(), 6);
        assert_eq!(seq.position("excavation"), Some(2));
        assert_eq!(seq.position("Pressure_Testing"), Some(5));
        assert_eq!(seq.get(3).map(|t| t.tool.as_str()), Some("Wrench"));
        assert_eq!(seq.position("welding"), None);
    }
}
