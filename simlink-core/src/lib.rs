//! # simlink-core
//!
//! Session and protocol orchestration for a remotely streamed training
//! simulation.
//!
//! This crate contains:
//! - **Protocol**: `Message`, inbound `Payload`s and outbound `Command`s over a `topic:data` text format
//! - **Codec**: `SimCodec` for newline-framed stream I/O via `tokio_util`
//! - **Transport**: the `StreamingTransport` seam and an in-process `LoopbackTransport`
//! - **State**: `ConnectionManager` (bounded retry) and `ScreenFlow`
//! - **Training**: `TrainingMachine` with task sequencing and quiz life-cycle
//! - **Router**: `MessageRouter` dispatching inbound messages, with a `MessageLog`
//! - **Persistence**: `PersistenceManager` over a `SessionStore`, plus `MemoryStore`
//! - **Session**: `Session`, the single dispatch loop tying it all together
//! - **Error**: `SimlinkError`, a `thiserror`-based error hierarchy

pub mod codec;
pub mod config;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod router;
pub mod scene;
pub mod session;
pub mod state;
pub mod training;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{MAX_LINE_LENGTH, SimCodec};
pub use config::SessionConfig;
pub use error::SimlinkError;
pub use persistence::{
    MemoryStore, PersistedSnapshot, PersistenceManager, ServiceResponse, SessionStore,
    SessionSummary,
};
pub use protocol::{Command, Direction, Message, Payload, decode, encode};
pub use router::{MessageLog, MessageRouter};
pub use scene::SceneState;
pub use session::{Session, SessionChoice, SessionEvent, SessionOutcome, UserCommand};
pub use state::{
    ConnectionEvent, ConnectionManager, ConnectionState, LaunchContext, LoadingIntent,
    RetryPolicy, Role, ScreenFlow, ScreenState, SessionEndReason,
};
pub use training::{QuizAnswerState, TaskSequence, TaskSpec, TrainingEvent, TrainingMachine};
pub use transport::{
    ChannelEmitter, Emitter, LaunchTarget, LoopbackTransport, SimulatorHandle, SimulatorLink,
    StreamHandles, StreamStatus, StreamingTransport, TransportSignal,
};
