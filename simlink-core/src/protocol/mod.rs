//! Text protocol spoken with the remote simulation.
//!
//! # Wire format
//!
//! Every delivery is one newline-free string:
//!
//! ```text
//! topic                 (no data)
//! topic:data            (data may itself contain ':')
//! ```
//!
//! The topic/data split happens at the **first** `:` only. Topic-specific
//! parsers then tokenise `data` on the same delimiter and coerce tokens
//! into numbers and booleans. Coercion never fails: an unparseable number
//! becomes `0`, anything other than `true`/`1` is `false`.
//!
//! | Module     | Purpose                                         |
//! |------------|-------------------------------------------------|
//! | `inbound`  | Typed payloads for messages from the simulation |
//! | `outbound` | [`Command`] vocabulary sent to the simulation   |

pub mod inbound;
pub mod outbound;

use std::fmt;
use std::time::Instant;

pub use inbound::{CameraUpdate, LayerEntry, LayerGroup, Payload, ProgressUpdate};
pub use outbound::{
    ApplicationAction, Command, ExplosionAction, LayerAction, PressureTestMode, TrainingAction,
    WaypointAction,
};

/// Separator between topic and data, and between data tokens.
pub const DELIMITER: char = ':';

/// Topic names used on the wire.
pub mod topics {
    // ── Outbound ─────────────────────────────────────────────────
    pub const TRAINING_CONTROL: &str = "training_control";
    pub const TOOL_SELECT: &str = "tool_select";
    pub const TASK_START: &str = "task_start";
    pub const PIPE_SELECT: &str = "pipe_select";
    pub const TEST_PLUG_SELECT: &str = "test_plug_select";
    pub const PRESSURE_TEST_START: &str = "pressure_test_start";
    pub const QUESTION_ANSWER: &str = "question_answer";
    pub const CAMERA_CONTROL: &str = "camera_control";
    pub const EXPLOSION_CONTROL: &str = "explosion_control";
    pub const WAYPOINT_CONTROL: &str = "waypoint_control";
    pub const LAYER_CONTROL: &str = "layer_control";
    pub const HIERARCHICAL_CONTROL: &str = "hierarchical_control";
    pub const APPLICATION_CONTROL: &str = "application_control";

    // ── Inbound ──────────────────────────────────────────────────
    pub const TRAINING_PROGRESS: &str = "training_progress";
    pub const TOOL_CHANGE: &str = "tool_change";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const QUESTION_REQUEST: &str = "question_request";
    pub const TRAINING_COMPLETE: &str = "training_complete";
    pub const WAYPOINT_LIST: &str = "waypoint_list";
    pub const WAYPOINT_UPDATE: &str = "waypoint_update";
    pub const LAYER_LIST: &str = "layer_list";
    pub const HIERARCHICAL_LIST: &str = "hierarchical_list";
    pub const EXPLOSION_UPDATE: &str = "explosion_update";
    pub const CAMERA_UPDATE: &str = "camera_update";
}

// ── Direction ────────────────────────────────────────────────────

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → simulation.
    Sent,
    /// Simulation → client.
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => write!(f, "sent"),
            Direction::Received => write!(f, "received"),
        }
    }
}

// ── Message ──────────────────────────────────────────────────────

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic (everything before the first delimiter).
    pub topic: String,
    /// Raw data string (everything after the first delimiter).
    pub data: String,
    /// Topic-specific parse of `data`.
    pub payload: Payload,
    /// When the message was decoded or built.
    pub timestamp: Instant,
    /// Which way it travelled.
    pub direction: Direction,
}

impl Message {
    /// Build the record for a message this client is about to send.
    pub fn outgoing(topic: &str, data: &str) -> Self {
        Self {
            topic: topic.to_string(),
            data: data.to_string(),
            payload: Payload::parse(topic, data),
            timestamp: Instant::now(),
            direction: Direction::Sent,
        }
    }

    /// Re-encode to the wire form.
    pub fn to_wire(&self) -> String {
        encode(&self.topic, &self.data)
    }
}

// ── Codec ────────────────────────────────────────────────────────

/// Encode a topic and optional data into a wire string.
///
/// An empty `data` yields the bare topic.
pub fn encode(topic: &str, data: &str) -> String {
    if data.is_empty() {
        topic.to_string()
    } else {
        format!("{topic}{DELIMITER}{data}")
    }
}

/// Decode a received wire string.
///
/// Returns `None` for empty or whitespace-only input. Whitespace around the
/// topic is ignored. Unknown topics are still decoded, with a
/// [`Payload::Generic`] body.
pub fn decode(raw: &str) -> Option<Message> {
    if raw.trim().is_empty() {
        return None;
    }
    let raw = raw.trim_end_matches(['\r', '\n']);

    let (topic, data) = match raw.split_once(DELIMITER) {
        Some((topic, data)) => (topic.trim(), data),
        None => (raw.trim(), ""),
    };

    Some(Message {
        topic: topic.to_string(),
        data: data.to_string(),
        payload: Payload::parse(topic, data),
        timestamp: Instant::now(),
        direction: Direction::Received,
    })
}

/// Split a data string into tokens on the secondary delimiter.
pub fn tokens(data: &str) -> Vec<&str> {
    if data.is_empty() {
        Vec::new()
    } else {
        data.split(DELIMITER).collect()
    }
}

// ── Coercion helpers ─────────────────────────────────────────────

/// Parse a float token, accepting a trailing `%`. Falls back to `0.0`.
pub fn coerce_f64(token: Option<&str>) -> f64 {
    token
        .map(|t| t.trim().trim_end_matches('%'))
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parse an unsigned integer token. Accepts float spellings (`"2.0"`) by
/// truncation. Falls back to `0`.
pub fn coerce_usize(token: Option<&str>) -> usize {
    let Some(t) = token.map(str::trim) else {
        return 0;
    };
    if let Ok(v) = t.parse::<usize>() {
        return v;
    }
    match t.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => v as usize,
        _ => 0,
    }
}

/// `true`/`1` (case-insensitive) → `true`; everything else → `false`.
pub fn coerce_bool(token: Option<&str>) -> bool {
    matches!(
        token.map(|t| t.trim().to_ascii_lowercase()).as_deref(),
        Some("true") | Some("1")
    )
}

/// A non-empty string token, or `None`.
pub fn coerce_text(token: Option<&str>) -> Option<String> {
    token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_bare_topic() {
        assert_eq!(encode("test_plug_select", ""), "test_plug_select");
        assert_eq!(encode("tool_select", "Shovel"), "tool_select:Shovel");
    }

    #[test]
    fn decode_blank_is_none() {
        assert!(decode("").is_none());
        assert!(decode(" ").is_none());
        assert!(decode("\t  ").is_none());
    }

    #[test]
    fn decode_splits_on_first_delimiter_only() {
        let msg = decode("question_answer:Q1:2:true").unwrap();
        assert_eq!(msg.topic, "question_answer");
        assert_eq!(msg.data, "Q1:2:true");
        assert_eq!(msg.direction, Direction::Received);
    }

    #[test]
    fn decode_ignores_whitespace_around_topic() {
        let msg = decode(" \ttool_change :Tape\r\n").unwrap();
        assert_eq!(msg.topic, "tool_change");
        assert_eq!(msg.data, "Tape");
        assert!(!matches!(msg.payload, Payload::Generic { .. }));

        let msg = decode("  training_complete ").unwrap();
        assert_eq!(msg.topic, "training_complete");
        assert!(!matches!(msg.payload, Payload::Generic { .. }));
    }

    #[test]
    fn decode_bare_topic_has_empty_data() {
        let msg = decode("training_complete").unwrap();
        assert_eq!(msg.topic, "training_complete");
        assert_eq!(msg.data, "");
        assert_eq!(msg.payload, Payload::TrainingComplete);
    }

    #[test]
    fn roundtrip_recovers_topic_and_data() {
        let cases = [
            ("training_control", "start"),
            ("task_start", "Wrench:P-110"),
            ("waypoint_control", "activate:3"),
            ("layer_control", "toggle_child:Pipes:2"),
            ("application_control", "quit"),
            ("test_plug_select", ""),
        ];
        for (topic, data) in cases {
            let msg = decode(&encode(topic, data)).unwrap();
            assert_eq!(msg.topic, topic);
            assert_eq!(msg.data, data);
            assert_eq!(msg.to_wire(), encode(topic, data));
        }
    }

    #[test]
    fn coercion_never_fails() {
        assert_eq!(coerce_f64(Some("42")), 42.0);
        assert_eq!(coerce_f64(Some("42%")), 42.0);
        assert_eq!(coerce_f64(Some("abc")), 0.0);
        assert_eq!(coerce_f64(Some("NaN")), 0.0);
        assert_eq!(coerce_f64(None), 0.0);

        assert_eq!(coerce_usize(Some("6")), 6);
        assert_eq!(coerce_usize(Some("2.0")), 2);
        assert_eq!(coerce_usize(Some("-3")), 0);
        assert_eq!(coerce_usize(Some("")), 0);

        assert!(coerce_bool(Some("true")));
        assert!(coerce_bool(Some("TRUE")));
        assert!(coerce_bool(Some("1")));
        assert!(!coerce_bool(Some("false")));
        assert!(!coerce_bool(Some("yes")));
        assert!(!coerce_bool(None));
    }

    #[test]
    fn outgoing_message_is_marked_sent() {
        let msg = Message::outgoing("tool_select", "Shovel");
        assert_eq!(msg.direction, Direction::Sent);
        assert_eq!(msg.to_wire(), "tool_select:Shovel");
    }
}
