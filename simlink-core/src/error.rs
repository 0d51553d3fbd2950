//! Domain-specific error types for simlink.
//!
//! Fallible operations return `Result<T, SimlinkError>`. Malformed input
//! from the remote simulation never panics; it is either coerced or
//! reported as a typed error that the caller logs and drops.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the orchestration layer.
#[derive(Debug, Error)]
pub enum SimlinkError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A wire message was empty or otherwise unusable.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A topic string did not map to any known vocabulary entry.
    #[error("unknown {kind} topic: {topic}")]
    UnknownTopic { kind: &'static str, topic: String },

    // ── Framing Errors ───────────────────────────────────────────
    /// A framed line exceeded the codec limit.
    #[error("frame too large: max {max} bytes")]
    FrameTooLarge { max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The remote access request was rejected by the streaming platform.
    #[error("remote access rejected: {0}")]
    AccessRejected(String),

    /// The streaming platform returned no usable endpoints.
    #[error("no streaming endpoints available")]
    NoEndpoints,

    /// Launching the remote simulation failed.
    #[error("launch failed: {0}")]
    LaunchFailed(String),

    /// An outbound emit was attempted without a live emitter.
    #[error("not connected")]
    NotConnected,

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Persistence Errors ───────────────────────────────────────
    /// The persistence service answered with `success: false`.
    #[error("store error: {0}")]
    Store(String),

    /// Encoding or decoding of a snapshot failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    // ── State Machine Errors ─────────────────────────────────────
    /// A state machine was asked to make a transition it does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for SimlinkError {
    fn from(s: String) -> Self {
        SimlinkError::Other(s)
    }
}

impl From<&str> for SimlinkError {
    fn from(s: &str) -> Self {
        SimlinkError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SimlinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SimlinkError::ChannelClosed
    }
}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for SimlinkError {
    fn from(_: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        SimlinkError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = SimlinkError::NoEndpoints;
        assert!(e.to_string().contains("endpoints"));

        let e = SimlinkError::UnknownTopic {
            kind: "outbound",
            topic: "warp_drive".into(),
        };
        assert!(e.to_string().contains("outbound"));
        assert!(e.to_string().contains("warp_drive"));
    }

    #[test]
    fn from_string() {
        let e: SimlinkError = "something broke".into();
        assert!(matches!(e, SimlinkError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: SimlinkError = io_err.into();
        assert!(matches!(e, SimlinkError::Connection(_)));
    }

    #[test]
    fn from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let e: SimlinkError = json_err.into();
        assert!(matches!(e, SimlinkError::Encoding(_)));
    }
}
