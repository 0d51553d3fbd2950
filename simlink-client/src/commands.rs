//! Console command parsing.
//!
//! Turns `/command args` lines into [`ConsoleCommand`]s. Session commands
//! wrap a [`UserCommand`]; the rest are handled by the console itself.

use simlink_core::UserCommand;
use simlink_core::protocol::{
    ExplosionAction, LayerAction, PressureTestMode, TrainingAction, WaypointAction,
};
use simlink_core::session::SessionChoice;

/// Entries shown by `/log` without an argument.
pub const DEFAULT_LOG_LINES: usize = 20;

pub const HELP: &str = "\
/start                      launch the simulation
/resume <session_id>        continue a saved session
/new                        start a fresh session
/begin                      skip the cinematic
/tool <name>                select a tool
/pipe <fitting>             select a pipe fitting
/plug                       select the test plug
/pressure [air|q6]          start the pressure test
/answer <n>                 answer the open question
/dismiss                    close the open question
/train start|pause|reset|test
/explode | /assemble | /explosion <0-100>
/camera <data>              raw camera control
/waypoint list|off|<n>
/layer list|show|hide|<name> [index]
/hier list|show|hide|<name> [index]
/retry                      retry after a failed launch
/log [n]                    recent messages
/status                     connection and screen
/quit";

/// Parsed console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Forward to the session.
    Session(UserCommand),

    /// Print recent messages.
    Log { count: usize },

    /// Print connection and screen state.
    Status,

    Help,

    /// Blank line.
    Empty,

    /// Unknown or invalid command.
    Unknown {
        /// The original input.
        input: String,
    },

    /// Command with missing or invalid arguments.
    InvalidArgs {
        /// Command name.
        command: String,
        /// Error message.
        error: String,
    },
}

impl From<UserCommand> for ConsoleCommand {
    fn from(cmd: UserCommand) -> Self {
        ConsoleCommand::Session(cmd)
    }
}

fn invalid(command: &str, error: impl Into<String>) -> ConsoleCommand {
    ConsoleCommand::InvalidArgs {
        command: command.into(),
        error: error.into(),
    }
}

/// Parse one line of user input.
///
/// Commands start with `/`; anything else is unknown.
pub fn parse(input: &str) -> ConsoleCommand {
    let input = input.trim();

    if input.is_empty() {
        return ConsoleCommand::Empty;
    }

    let Some(cmd_str) = input.strip_prefix('/') else {
        return ConsoleCommand::Unknown {
            input: input.to_string(),
        };
    };

    let parts: Vec<&str> = cmd_str.split_whitespace().collect();
    let command = parts.first().copied().unwrap_or("");
    let args = parts.get(1..).unwrap_or_default();

    match command {
        "start" => UserCommand::Start.into(),

        "resume" => match args.first() {
            Some(id) => {
                UserCommand::ChooseSession(SessionChoice::Resume((*id).to_string())).into()
            }
            None => invalid("resume", "Usage: /resume <session_id>"),
        },

        "new" => UserCommand::ChooseSession(SessionChoice::New).into(),

        "begin" | "skip" => UserCommand::BeginTraining.into(),

        "tool" => match args.first() {
            Some(tool) => UserCommand::SelectTool((*tool).to_string()).into(),
            None => invalid("tool", "Usage: /tool <name>"),
        },

        "pipe" => match args.first() {
            Some(pipe) => UserCommand::SelectPipe((*pipe).to_string()).into(),
            None => invalid("pipe", "Usage: /pipe <fitting>"),
        },

        "plug" => UserCommand::SelectTestPlug.into(),

        "pressure" => match args.first().copied() {
            None | Some("air") => UserCommand::StartPressureTest(PressureTestMode::AirTest).into(),
            Some("q6") => UserCommand::StartPressureTest(PressureTestMode::PlayerClosedQ6).into(),
            Some(_) => invalid("pressure", "Usage: /pressure [air|q6]"),
        },

        "answer" => match args.first().map(|s| s.parse::<usize>()) {
            Some(Ok(selected_index)) => UserCommand::AnswerQuestion { selected_index }.into(),
            Some(Err(_)) => invalid("answer", "Invalid answer index"),
            None => invalid("answer", "Usage: /answer <n>"),
        },

        "dismiss" => UserCommand::DismissQuestion.into(),

        "train" => match args.first().copied() {
            Some("start") => UserCommand::TrainingControl(TrainingAction::Start).into(),
            Some("pause") => UserCommand::TrainingControl(TrainingAction::Pause).into(),
            Some("reset") => UserCommand::TrainingControl(TrainingAction::Reset).into(),
            Some("test") => UserCommand::TrainingControl(TrainingAction::Test).into(),
            _ => invalid("train", "Usage: /train start|pause|reset|test"),
        },

        "explode" => UserCommand::Explosion(ExplosionAction::Explode).into(),

        "assemble" => UserCommand::Explosion(ExplosionAction::Assemble).into(),

        "explosion" => match args.first().map(|s| s.parse::<u8>()) {
            Some(Ok(value)) if value <= 100 => {
                UserCommand::Explosion(ExplosionAction::Set(value)).into()
            }
            Some(_) => invalid("explosion", "Value must be 0-100"),
            None => invalid("explosion", "Usage: /explosion <0-100>"),
        },

        "camera" => {
            if args.is_empty() {
                invalid("camera", "Usage: /camera <data>")
            } else {
                UserCommand::Camera(args.join(" ")).into()
            }
        }

        "waypoint" => match args.first().copied() {
            Some("list") => UserCommand::Waypoint(WaypointAction::List).into(),
            Some("off") => UserCommand::Waypoint(WaypointAction::Deactivate).into(),
            Some(n) => match n.parse::<usize>() {
                Ok(index) => UserCommand::Waypoint(WaypointAction::Activate(index)).into(),
                Err(_) => invalid("waypoint", "Invalid waypoint index"),
            },
            None => invalid("waypoint", "Usage: /waypoint list|off|<n>"),
        },

        "layer" => match parse_layer(args) {
            Ok(action) => UserCommand::Layer(action).into(),
            Err(error) => invalid("layer", error),
        },

        "hier" => match parse_layer(args) {
            Ok(action) => UserCommand::Hierarchy(action).into(),
            Err(error) => invalid("hier", error),
        },

        "retry" => UserCommand::Retry.into(),

        "log" => match args.first().map(|s| s.parse::<usize>()) {
            Some(Ok(count)) => ConsoleCommand::Log { count },
            Some(Err(_)) => invalid("log", "Invalid count"),
            None => ConsoleCommand::Log {
                count: DEFAULT_LOG_LINES,
            },
        },

        "status" => ConsoleCommand::Status,

        "help" | "?" => ConsoleCommand::Help,

        "quit" | "q" => UserCommand::Quit.into(),

        _ => ConsoleCommand::Unknown {
            input: input.to_string(),
        },
    }
}

fn parse_layer(args: &[&str]) -> Result<LayerAction, String> {
    match args {
        ["list"] => Ok(LayerAction::List),
        ["show"] => Ok(LayerAction::ShowAll),
        ["hide"] => Ok(LayerAction::HideAll),
        [name] => Ok(LayerAction::ToggleMain((*name).to_string())),
        [parent, index] => index
            .parse::<usize>()
            .map(|index| LayerAction::ToggleChild {
                parent: (*parent).to_string(),
                index,
            })
            .map_err(|_| "Invalid child index".to_string()),
        _ => Err("Usage: list|show|hide|<name> [index]".to_string()),
    }
}
