//! # simlink-client: terminal front end
//!
//! Launches a streamed training simulation over TCP and drives the
//! session from `/command` lines on stdin, printing session events as
//! they arrive.

pub mod commands;
pub mod config;
pub mod console;
pub mod transport;
