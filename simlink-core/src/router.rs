//! Message routing between the wire and the state machines.
//!
//! Inbound: decode, log, then dispatch by payload to the training machine or
//! the scene. Outbound: encode a [`Command`] and hand it to the live
//! emitter. Without an emitter the send fails with `NotConnected`; nothing
//! is queued for later.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::SimlinkError;
use crate::protocol::{self, Command, Direction, Message, Payload};
use crate::scene::SceneState;
use crate::training::{TrainingEvent, TrainingMachine};
use crate::transport::Emitter;

/// Default number of messages kept by [`MessageLog`].
pub const DEFAULT_LOG_CAPACITY: usize = 100;

// ── MessageLog ───────────────────────────────────────────────────

/// Ring buffer of the most recent sent and received messages.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<Message>,
    capacity: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl MessageLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, msg: Message) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(msg);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    /// The `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Message> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }
}

// ── MessageRouter ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MessageRouter {
    log: MessageLog,
    scene: SceneState,
}

impl MessageRouter {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log: MessageLog::with_capacity(log_capacity),
            scene: SceneState::default(),
        }
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn scene(&self) -> &SceneState {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneState {
        &mut self.scene
    }

    /// Decode and dispatch one raw inbound message.
    pub fn route(&mut self, raw: &str, training: &mut TrainingMachine) -> Vec<TrainingEvent> {
        match protocol::decode(raw) {
            Some(msg) => self.route_message(msg, training),
            None => {
                debug!("blank message dropped");
                Vec::new()
            }
        }
    }

    /// Dispatch an already decoded inbound message.
    pub fn route_message(
        &mut self,
        msg: Message,
        training: &mut TrainingMachine,
    ) -> Vec<TrainingEvent> {
        debug!(topic = %msg.topic, data = %msg.data, "received");
        let events = self.dispatch(&msg.payload, &msg.topic, training);
        self.log.push(msg);
        events
    }

    fn dispatch(
        &mut self,
        payload: &Payload,
        topic: &str,
        training: &mut TrainingMachine,
    ) -> Vec<TrainingEvent> {
        match payload {
            Payload::TrainingProgress(update) => training.set_progress(update),
            Payload::ToolChange { tool } => {
                training.on_tool_change(tool);
                Vec::new()
            }
            Payload::TaskCompleted {
                task_id,
                next_index,
            } => training.advance_task(task_id, *next_index),
            Payload::TaskStart { tool, pipe } => training.on_task_start(tool, pipe.as_deref()),
            Payload::QuestionRequest { question_id } => training.present_question(question_id),
            Payload::TrainingComplete => training.on_training_complete(),
            Payload::WaypointList { names } => {
                self.scene.set_waypoints(names.clone());
                Vec::new()
            }
            Payload::WaypointUpdate { index, active } => {
                self.scene.update_waypoint(*index, *active);
                Vec::new()
            }
            Payload::LayerList { layers } => {
                self.scene.set_layers(layers.clone());
                Vec::new()
            }
            Payload::HierarchicalList { groups } => {
                self.scene.set_hierarchy(groups.clone());
                Vec::new()
            }
            Payload::ExplosionUpdate { value, animating } => {
                self.scene.set_explosion(*value, *animating);
                Vec::new()
            }
            Payload::CameraUpdate(camera) => {
                self.scene.set_camera(camera.clone());
                Vec::new()
            }
            Payload::Generic { tokens } => {
                warn!(topic, ?tokens, "unhandled topic dropped");
                Vec::new()
            }
        }
    }

    /// Encode `cmd` and emit it through the live emitter.
    ///
    /// Fails with [`SimlinkError::NotConnected`] when there is no emitter.
    /// Only commands that were actually emitted are logged.
    pub fn send<E: Emitter + ?Sized>(
        &mut self,
        cmd: &Command,
        emitter: Option<&mut E>,
    ) -> Result<(), SimlinkError> {
        let emitter = emitter.ok_or(SimlinkError::NotConnected)?;
        let raw = cmd.to_wire();
        emitter.emit(&raw)?;
        debug!(command = %raw, "sent");
        self.log.push(Message::outgoing(cmd.topic(), &cmd.data()));
        Ok(())
    }

    /// Sent messages in the log, oldest first.
    pub fn sent(&self) -> impl Iterator<Item = &Message> {
        self.log.iter().filter(|m| m.direction == Direction::Sent)
    }
}

// ── Tests ────────────────────────────────────────────────────────
