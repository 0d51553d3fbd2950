//! Outbound command vocabulary.
//!
//! Commands parse back from the wire with `TryFrom`; unknown topics are an
//! error, never a panic.

use std::fmt;

use super::{DELIMITER, encode, topics};
use crate::error::SimlinkError;

// ── Sub-actions ──────────────────────────────────────────────────

/// `training_control` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingAction {
    Start,
    Pause,
    Reset,
    Test,
}

/// `pressure_test_start` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PressureTestMode {
    /// Standard air pressure test.
    AirTest,
    /// Test run after the learner closed question 6.
    PlayerClosedQ6,
}

/// `explosion_control` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExplosionAction {
    Explode,
    Assemble,
    /// Absolute exploded-view percentage, clamped to `0..=100`.
    Set(u8),
}

/// `waypoint_control` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaypointAction {
    List,
    Activate(usize),
    Deactivate,
}

/// `layer_control` / `hierarchical_control` data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LayerAction {
    List,
    ShowAll,
    HideAll,
    ToggleMain(String),
    ToggleChild { parent: String, index: usize },
}

/// `application_control` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationAction {
    Quit,
}

// ── Command ──────────────────────────────────────────────────────

/// Every message this client can send to the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    TrainingControl(TrainingAction),
    ToolSelect(String),
    TaskStart { tool: String, pipe: Option<String> },
    PipeSelect(String),
    TestPlugSelect,
    PressureTestStart(PressureTestMode),
    QuestionAnswer {
        question_id: String,
        try_count: u32,
        correct: bool,
    },
    CameraControl(String),
    ExplosionControl(ExplosionAction),
    WaypointControl(WaypointAction),
    LayerControl(LayerAction),
    HierarchicalControl(LayerAction),
    ApplicationControl(ApplicationAction),
}

impl Command {
    /// Wire topic for this command.
    pub fn topic(&self) -> &'static str {
        match self {
            Command::TrainingControl(_) => topics::TRAINING_CONTROL,
            Command::ToolSelect(_) => topics::TOOL_SELECT,
            Command::TaskStart { .. } => topics::TASK_START,
            Command::PipeSelect(_) => topics::PIPE_SELECT,
            Command::TestPlugSelect => topics::TEST_PLUG_SELECT,
            Command::PressureTestStart(_) => topics::PRESSURE_TEST_START,
            Command::QuestionAnswer { .. } => topics::QUESTION_ANSWER,
            Command::CameraControl(_) => topics::CAMERA_CONTROL,
            Command::ExplosionControl(_) => topics::EXPLOSION_CONTROL,
            Command::WaypointControl(_) => topics::WAYPOINT_CONTROL,
            Command::LayerControl(_) => topics::LAYER_CONTROL,
            Command::HierarchicalControl(_) => topics::HIERARCHICAL_CONTROL,
            Command::ApplicationControl(_) => topics::APPLICATION_CONTROL,
        }
    }

    /// Data string for this command (may be empty).
    pub fn data(&self) -> String {
        match self {
            Command::TrainingControl(action) => match action {
                TrainingAction::Start => "start".into(),
                TrainingAction::Pause => "pause".into(),
                TrainingAction::Reset => "reset".into(),
                TrainingAction::Test => "test".into(),
            },
            Command::ToolSelect(tool) => tool.clone(),
            Command::TaskStart { tool, pipe } => match pipe {
                Some(pipe) => format!("{tool}{DELIMITER}{pipe}"),
                None => tool.clone(),
            },
            Command::PipeSelect(fitting) => fitting.clone(),
            Command::TestPlugSelect => String::new(),
            Command::PressureTestStart(mode) => match mode {
                PressureTestMode::AirTest => "air_test".into(),
                PressureTestMode::PlayerClosedQ6 => "player_closed_q6".into(),
            },
            Command::QuestionAnswer {
                question_id,
                try_count,
                correct,
            } => format!("{question_id}{DELIMITER}{try_count}{DELIMITER}{correct}"),
            Command::CameraControl(data) => data.clone(),
            Command::ExplosionControl(action) => match action {
                ExplosionAction::Explode => "explode".into(),
                ExplosionAction::Assemble => "assemble".into(),
                ExplosionAction::Set(value) => (*value).min(100).to_string(),
            },
            Command::WaypointControl(action) => match action {
                WaypointAction::List => "list".into(),
                WaypointAction::Activate(n) => format!("activate{DELIMITER}{n}"),
                WaypointAction::Deactivate => "deactivate".into(),
            },
            Command::LayerControl(action) | Command::HierarchicalControl(action) => {
                match action {
                    LayerAction::List => "list".into(),
                    LayerAction::ShowAll => "show_all".into(),
                    LayerAction::HideAll => "hide_all".into(),
                    LayerAction::ToggleMain(name) => format!("toggle_main{DELIMITER}{name}"),
                    LayerAction::ToggleChild { parent, index } => {
                        format!("toggle_child{DELIMITER}{parent}{DELIMITER}{index}")
                    }
                }
            }
            Command::ApplicationControl(ApplicationAction::Quit) => "quit".into(),
        }
    }

    /// Encode to the wire string.
    pub fn to_wire(&self) -> String {
        encode(self.topic(), &self.data())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl TryFrom<&str> for Command {
    type Error = SimlinkError;

    /// Parse a wire string back into a command, as the loopback
    /// simulator does with what the client emits.
    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        let (topic, data) = raw.split_once(DELIMITER).unwrap_or((raw, ""));
        let invalid = || SimlinkError::InvalidMessage(raw.to_string());
        let text = |s: &str| -> Result<String, SimlinkError> {
            if s.is_empty() { Err(invalid()) } else { Ok(s.to_string()) }
        };

        match topic {
            topics::TRAINING_CONTROL => Ok(Command::TrainingControl(match data {
                "start" => TrainingAction::Start,
                "pause" => TrainingAction::Pause,
                "reset" => TrainingAction::Reset,
                "test" => TrainingAction::Test,
                _ => return Err(invalid()),
            })),
            topics::TOOL_SELECT => Ok(Command::ToolSelect(text(data)?)),
            topics::TASK_START => {
                let (tool, pipe) = match data.split_once(DELIMITER) {
                    Some((tool, pipe)) => (tool, Some(text(pipe)?)),
                    None => (data, None),
                };
                Ok(Command::TaskStart {
                    tool: text(tool)?,
                    pipe,
                })
            }
            topics::PIPE_SELECT => Ok(Command::PipeSelect(text(data)?)),
            topics::TEST_PLUG_SELECT => Ok(Command::TestPlugSelect),
            topics::PRESSURE_TEST_START => Ok(Command::PressureTestStart(match data {
                "air_test" => PressureTestMode::AirTest,
                "player_closed_q6" => PressureTestMode::PlayerClosedQ6,
                _ => return Err(invalid()),
            })),
            topics::QUESTION_ANSWER => {
                let mut parts = data.split(DELIMITER);
                let question_id = text(parts.next().unwrap_or_default())?;
                let try_count = parts
                    .next()
                    .and_then(|t| t.parse::<u32>().ok())
                    .ok_or_else(invalid)?;
                let correct = match parts.next() {
                    Some("true") => true,
                    Some("false") => false,
                    _ => return Err(invalid()),
                };
                Ok(Command::QuestionAnswer {
                    question_id,
                    try_count,
                    correct,
                })
            }
            topics::CAMERA_CONTROL => Ok(Command::CameraControl(data.to_string())),
            topics::EXPLOSION_CONTROL => Ok(Command::ExplosionControl(match data {
                "explode" => ExplosionAction::Explode,
                "assemble" => ExplosionAction::Assemble,
                n => ExplosionAction::Set(n.parse::<u8>().ok().filter(|v| *v <= 100).ok_or_else(invalid)?),
            })),
            topics::WAYPOINT_CONTROL => Ok(Command::WaypointControl(match data.split_once(DELIMITER) {
                Some(("activate", n)) => {
                    WaypointAction::Activate(n.parse::<usize>().map_err(|_| invalid())?)
                }
                None if data == "list" => WaypointAction::List,
                None if data == "deactivate" => WaypointAction::Deactivate,
                _ => return Err(invalid()),
            })),
            topics::LAYER_CONTROL => Ok(Command::LayerControl(parse_layer_action(data).ok_or_else(invalid)?)),
            topics::HIERARCHICAL_CONTROL => Ok(Command::HierarchicalControl(
                parse_layer_action(data).ok_or_else(invalid)?,
            )),
            topics::APPLICATION_CONTROL if data == "quit" => {
                Ok(Command::ApplicationControl(ApplicationAction::Quit))
            }
            _ => Err(SimlinkError::UnknownTopic {
                kind: "outbound",
                topic: topic.to_string(),
            }),
        }
    }
}

fn parse_layer_action(data: &str) -> Option<LayerAction> {
    match data.split_once(DELIMITER) {
        None => match data {
            "list" => Some(LayerAction::List),
            "show_all" => Some(LayerAction::ShowAll),
            "hide_all" => Some(LayerAction::HideAll),
            _ => None,
        },
        Some(("toggle_main", name)) if !name.is_empty() => {
            Some(LayerAction::ToggleMain(name.to_string()))
        }
        Some(("toggle_child", rest)) => {
            let (parent, index) = rest.rsplit_once(DELIMITER)?;
            Some(LayerAction::ToggleChild {
                parent: parent.to_string(),
                index: index.parse().ok()?,
            })
        }
        Some(_) => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────
