//! Seam to the streaming platform.
//!
//! The streaming SDK is an external collaborator. This module defines what
//! the orchestration layer needs from it: a three-step launch
//! ([`StreamingTransport`]) that yields a pair of handles, an outbound
//! [`Emitter`] and an inbound stream of [`TransportSignal`]s carrying both
//! status changes and text messages in delivery order.
//!
//! [`LoopbackTransport`] is an in-process implementation where the remote
//! side is driven through a [`SimulatorHandle`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SimlinkError;
use crate::protocol::Command;
use crate::state::SessionEndReason;

/// Capacity of the inbound signal channel.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 100;

// ── Launch inputs ────────────────────────────────────────────────

/// Which remote simulation to launch. Opaque to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchTarget {
    pub project_id: String,
    pub model_id: String,
}

/// Proof that remote access was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub token: String,
}

/// A place the simulation can be streamed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub address: String,
}

// ── Signals ──────────────────────────────────────────────────────

/// Status reported by the streaming platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Connecting,
    Connected,
    /// Transport-level failure; eligible for retry.
    Failed(String),
    Disconnected,
    Closed,
    Completed,
    /// The platform withdrew the session (for example after idling).
    Withdrawn,
}

impl StreamStatus {
    /// Classify a terminal status. `None` for non-terminal statuses.
    pub fn end_reason(&self) -> Option<SessionEndReason> {
        match self {
            StreamStatus::Disconnected => Some(SessionEndReason::Disconnected),
            StreamStatus::Closed => Some(SessionEndReason::Closed),
            StreamStatus::Completed => Some(SessionEndReason::Completed),
            StreamStatus::Withdrawn => Some(SessionEndReason::Withdrawn),
            _ => None,
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Failed(reason) => write!(f, "Failed({reason})"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// One item from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Status(StreamStatus),
    /// A raw wire message from the simulation.
    Message(String),
}

// ── Handles ──────────────────────────────────────────────────────

/// Outbound primitive provided by the streaming SDK.
pub trait Emitter: Send {
    /// Deliver one wire string. Must not block.
    fn emit(&mut self, raw: &str) -> Result<(), SimlinkError>;
}

/// [`Emitter`] backed by an unbounded channel to a writer task.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl Emitter for ChannelEmitter {
    fn emit(&mut self, raw: &str) -> Result<(), SimlinkError> {
        self.tx.send(raw.to_string())?;
        Ok(())
    }
}

/// Handles produced by a successful launch.
pub struct StreamHandles {
    pub emitter: Box<dyn Emitter>,
    pub inbound: mpsc::Receiver<TransportSignal>,
}

impl fmt::Debug for StreamHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandles")
            .field("emitter", &"<dyn Emitter>")
            .field("inbound", &self.inbound)
            .finish()
    }
}

// ── StreamingTransport ───────────────────────────────────────────

/// The streaming platform's launch capability.
#[async_trait]
pub trait StreamingTransport: Send {
    /// Ask the platform for remote access.
    async fn request_access(&mut self, target: &LaunchTarget) -> Result<AccessGrant, SimlinkError>;

    /// List endpoints the simulation can be streamed from.
    async fn fetch_endpoints(&mut self, grant: &AccessGrant) -> Result<Vec<Endpoint>, SimlinkError>;

    /// Start streaming from `endpoint`. The returned inbound stream
    /// reports `Connected` once the session is live.
    async fn launch(
        &mut self,
        endpoint: &Endpoint,
        target: &LaunchTarget,
    ) -> Result<StreamHandles, SimlinkError>;
}

// ── Loopback ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LoopbackScript {
    reject_access: AtomicU32,
    empty_endpoints: AtomicU32,
    fail_launches: AtomicU32,
    manual_connect: AtomicBool,
    launches: AtomicU32,
}

impl LoopbackScript {
    /// Consume one unit of a countdown; `true` if it was non-zero.
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-process [`StreamingTransport`]; the remote side is a [`SimulatorHandle`].
pub struct LoopbackTransport {
    script: Arc<LoopbackScript>,
    links: mpsc::UnboundedSender<SimulatorLink>,
}

impl LoopbackTransport {
    /// Create a transport and the handle that plays the simulation.
    pub fn new() -> (Self, SimulatorHandle) {
        let script = Arc::new(LoopbackScript::default());
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::clone(&script),
                links: links_tx,
            },
            SimulatorHandle {
                script,
                links: links_rx,
            },
        )
    }
}

#[async_trait]
impl StreamingTransport for LoopbackTransport {
    async fn request_access(&mut self, target: &LaunchTarget) -> Result<AccessGrant, SimlinkError> {
        if LoopbackScript::take(&self.script.reject_access) {
            return Err(SimlinkError::AccessRejected("scripted rejection".into()));
        }
        Ok(AccessGrant {
            token: format!("loopback:{}:{}", target.project_id, target.model_id),
        })
    }

    async fn fetch_endpoints(&mut self, _grant: &AccessGrant) -> Result<Vec<Endpoint>, SimlinkError> {
        if LoopbackScript::take(&self.script.empty_endpoints) {
            return Ok(Vec::new());
        }
        Ok(vec![Endpoint {
            id: "loopback-0".into(),
            address: "in-process".into(),
        }])
    }

    async fn launch(
        &mut self,
        _endpoint: &Endpoint,
        _target: &LaunchTarget,
    ) -> Result<StreamHandles, SimlinkError> {
        if LoopbackScript::take(&self.script.fail_launches) {
            return Err(SimlinkError::LaunchFailed("scripted launch failure".into()));
        }
        self.script.launches.fetch_add(1, Ordering::SeqCst);

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let (emit_tx, emit_rx) = mpsc::unbounded_channel();

        if !self.script.manual_connect.load(Ordering::SeqCst) {
            signal_tx
                .try_send(TransportSignal::Status(StreamStatus::Connected))
                .map_err(|_| SimlinkError::ChannelClosed)?;
        }

        // A dropped simulator handle just means nobody is listening.
        let _ = self.links.send(SimulatorLink {
            signals: signal_tx,
            emitted: emit_rx,
        });

        Ok(StreamHandles {
            emitter: Box::new(ChannelEmitter::new(emit_tx)),
            inbound: signal_rx,
        })
    }
}

/// Controls a [`LoopbackTransport`] from the simulation's side.
pub struct SimulatorHandle {
    script: Arc<LoopbackScript>,
    links: mpsc::UnboundedReceiver<SimulatorLink>,
}

impl SimulatorHandle {
    /// Reject the next `n` access requests.
    pub fn reject_access(&self, n: u32) {
        self.script.reject_access.store(n, Ordering::SeqCst);
    }

    /// Return no endpoints for the next `n` fetches.
    pub fn empty_endpoints(&self, n: u32) {
        self.script.empty_endpoints.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` launches.
    pub fn fail_launches(&self, n: u32) {
        self.script.fail_launches.store(n, Ordering::SeqCst);
    }

    /// When set, launches do not report `Connected` on their own; call
    /// [`SimulatorLink::connected`] instead.
    pub fn set_manual_connect(&self, manual: bool) {
        self.script.manual_connect.store(manual, Ordering::SeqCst);
    }

    /// Number of successful launches so far.
    pub fn launch_count(&self) -> u32 {
        self.script.launches.load(Ordering::SeqCst)
    }

    /// Wait for the next launched link.
    pub async fn accept(&mut self) -> Option<SimulatorLink> {
        self.links.recv().await
    }

    /// Take the next launched link if one is already waiting.
    pub fn try_accept(&mut self) -> Option<SimulatorLink> {
        self.links.try_recv().ok()
    }
}

/// The simulation's end of one launched stream.
pub struct SimulatorLink {
    signals: mpsc::Sender<TransportSignal>,
    emitted: mpsc::UnboundedReceiver<String>,
}

impl SimulatorLink {
    /// Report the session as live.
    pub async fn connected(&self) -> Result<(), SimlinkError> {
        self.status(StreamStatus::Connected).await
    }

    /// Report a status change.
    pub async fn status(&self, status: StreamStatus) -> Result<(), SimlinkError> {
        self.signals.send(TransportSignal::Status(status)).await?;
        Ok(())
    }

    /// Deliver a raw wire message to the client.
    pub async fn send(&self, raw: &str) -> Result<(), SimlinkError> {
        self.signals
            .send(TransportSignal::Message(raw.to_string()))
            .await?;
        Ok(())
    }

    /// Everything the client has emitted since the last drain.
    pub fn drain_emitted(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(raw) = self.emitted.try_recv() {
            out.push(raw);
        }
        out
    }

    /// Wait for the next emitted message.
    pub async fn next_emitted(&mut self) -> Option<String> {
        self.emitted.recv().await
    }

    /// Wait for the next emitted message and parse it as a [`Command`].
    pub async fn next_command(&mut self) -> Option<Result<Command, SimlinkError>> {
        let raw = self.emitted.recv().await?;
        Some(Command::try_from(raw.as_str()))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> LaunchTarget {
        LaunchTarget {
            project_id: "proj".into(),
            model_id: "trench".into(),
        }
    }

    #[tokio::test]
    async fn loopback_launch_reports_connected() {
        let (mut transport, mut sim) = LoopbackTransport::new();
        let grant = transport.request_access(&target()).await.unwrap();
        assert!(grant.token.contains("trench"));

        let endpoints = transport.fetch_endpoints(&grant).await.unwrap();
        let mut handles = transport.launch(&endpoints[0], &target()).await.unwrap();
        assert_eq!(
            handles.inbound.recv().await,
            Some(TransportSignal::Status(StreamStatus::Connected))
        );

        let mut link = sim.accept().await.unwrap();
        handles.emitter.emit("tool_select:Shovel").unwrap();
        link.send("tool_change:Shovel").await.unwrap();

        assert_eq!(link.drain_emitted(), vec!["tool_select:Shovel".to_string()]);
        assert_eq!(
            handles.inbound.recv().await,
            Some(TransportSignal::Message("tool_change:Shovel".into()))
        );
        assert_eq!(sim.launch_count(), 1);
    }

    #[tokio::test]
    async fn link_parses_emitted_commands() {
        let (mut transport, mut sim) = LoopbackTransport::new();
        assert!(sim.try_accept().is_none());

        let grant = transport.request_access(&target()).await.unwrap();
        let endpoints = transport.fetch_endpoints(&grant).await.unwrap();
        let mut handles = transport.launch(&endpoints[0], &target()).await.unwrap();
        let mut link = sim.try_accept().unwrap();

        handles.emitter.emit("waypoint_control:activate:2").unwrap();
        handles.emitter.emit("weather:rain").unwrap();
        assert_eq!(
            link.next_command().await.unwrap().unwrap(),
            Command::WaypointControl(crate::protocol::WaypointAction::Activate(2))
        );
        assert!(matches!(
            link.next_command().await,
            Some(Err(SimlinkError::InvalidMessage(_)))
        ));
        assert!(sim.try_accept().is_none());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed() {
        let (mut transport, sim) = LoopbackTransport::new();
        sim.reject_access(1);
        sim.fail_launches(1);

        assert!(matches!(
            transport.request_access(&target()).await,
            Err(SimlinkError::AccessRejected(_))
        ));
        let grant = transport.request_access(&target()).await.unwrap();
        let endpoints = transport.fetch_endpoints(&grant).await.unwrap();
        assert!(transport.launch(&endpoints[0], &target()).await.is_err());
        assert!(transport.launch(&endpoints[0], &target()).await.is_ok());
    }

    #[test]
    fn end_reason_classification() {
        assert_eq!(
            StreamStatus::Withdrawn.end_reason(),
            Some(SessionEndReason::Withdrawn)
        );
        assert_eq!(StreamStatus::Connected.end_reason(), None);
        assert_eq!(StreamStatus::Failed("x".into()).end_reason(), None);
    }
}
