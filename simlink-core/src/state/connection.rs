//! Connection lifecycle with bounded retry.
//!
//! [`ConnectionManager`] owns the streaming handles and is the only writer
//! of [`ConnectionState`]. It does not own a clock: the retry delay is
//! exposed as a deadline that the session loop sleeps on, then reports back
//! through [`ConnectionManager::on_retry_timer`].
//!
//! ```text
//!  Initializing ──► Connecting ──► Connected
//!                     ▲    │           │
//!                     │    ▼           ▼
//!                  Retrying ◄──── Failed (terminal once retries run out)
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SimlinkError;
use crate::transport::{
    Emitter, Endpoint, LaunchTarget, StreamHandles, StreamStatus, StreamingTransport,
    TransportSignal,
};

/// Default number of consecutive failures before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between a failure and the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

// ── ConnectionState ──────────────────────────────────────────────

/// Lifecycle state of the streamed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing launched yet, or torn down after quit.
    #[default]
    Initializing,
    /// Endpoint obtained, launch in flight; waiting for the stream.
    Connecting,
    /// Stream live. Handles are guaranteed present.
    Connected,
    /// Failed with no retry pending; needs a manual retry.
    Failed,
    /// Failed; the next attempt is scheduled.
    Retrying,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `true` when only a manual retry can leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a live session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEndReason {
    Disconnected,
    Closed,
    Completed,
    Withdrawn,
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
            Self::Completed => "completed",
            Self::Withdrawn => "withdrawn",
        };
        f.write_str(s)
    }
}

/// What happened as a result of a lifecycle input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Access and an endpoint were obtained and the launch started.
    /// `attempt` is 1-based within the current run of consecutive failures.
    Connecting { attempt: u32 },
    Connected,
    Failed {
        reason: String,
        attempt: u32,
        will_retry: bool,
    },
    /// A live session ended on the platform's side. Not retried.
    SessionEnded { reason: SessionEndReason },
}

/// Fixed-delay, bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

// ── ConnectionManager ────────────────────────────────────────────

/// Drives launch, retry and reconnect over a [`StreamingTransport`].
pub struct ConnectionManager<T> {
    transport: T,
    target: LaunchTarget,
    policy: RetryPolicy,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// Consecutive failures since the last `Connected` or manual retry.
    attempt: u32,
    has_launched: bool,
    handles: Option<StreamHandles>,
    retry_at: Option<Instant>,
}

impl<T: StreamingTransport> ConnectionManager<T> {
    pub fn new(transport: T, target: LaunchTarget, policy: RetryPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Initializing);
        Self {
            transport,
            target,
            policy,
            state: ConnectionState::Initializing,
            state_tx,
            attempt: 0,
            has_launched: false,
            handles: None,
            retry_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Consecutive failures so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// When the pending retry is due, if one is scheduled.
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// The live emitter. `None` unless connected.
    pub fn emitter_mut(&mut self) -> Option<&mut (dyn Emitter + 'static)> {
        if !self.state.is_connected() {
            return None;
        }
        self.handles.as_mut().map(|h| h.emitter.as_mut())
    }

    // ── Inputs ───────────────────────────────────────────────────

    /// Start the first launch. Re-entrant calls are no-ops until a manual
    /// retry or teardown clears the launch guard.
    pub async fn initialize(&mut self) -> Vec<ConnectionEvent> {
        if self.has_launched {
            debug!(state = %self.state, "initialize ignored: already launched");
            return Vec::new();
        }
        self.has_launched = true;
        self.launch().await
    }

    /// The retry delay elapsed.
    pub async fn on_retry_timer(&mut self) -> Vec<ConnectionEvent> {
        if self.state != ConnectionState::Retrying {
            self.retry_at = None;
            return Vec::new();
        }
        self.retry_at = None;
        self.launch().await
    }

    /// User-requested retry from a failed or ended session.
    pub async fn manual_retry(&mut self) -> Vec<ConnectionEvent> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = %self.state, "manual retry ignored");
                Vec::new()
            }
            _ => {
                info!("manual retry");
                self.attempt = 0;
                self.retry_at = None;
                self.handles = None;
                self.has_launched = false;
                self.initialize().await
            }
        }
    }

    /// Feed one status signal from the inbound stream.
    pub fn on_status(&mut self, status: StreamStatus) -> Vec<ConnectionEvent> {
        match status {
            StreamStatus::Connecting => {
                debug!("stream reports connecting");
                Vec::new()
            }
            StreamStatus::Connected => self.on_connected(),
            StreamStatus::Failed(reason) => match self.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    vec![self.fail(reason)]
                }
                _ => {
                    debug!(%reason, state = %self.state, "stale failure signal ignored");
                    Vec::new()
                }
            },
            other => {
                let Some(reason) = other.end_reason() else {
                    return Vec::new();
                };
                match self.state {
                    ConnectionState::Connected => {
                        info!(%reason, "session ended");
                        self.handles = None;
                        self.retry_at = None;
                        self.set_state(ConnectionState::Failed);
                        vec![ConnectionEvent::SessionEnded { reason }]
                    }
                    ConnectionState::Connecting => {
                        vec![self.fail(format!("stream {reason} before connecting"))]
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    /// The inbound stream closed without a terminal status.
    pub fn on_stream_closed(&mut self) -> Vec<ConnectionEvent> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                vec![self.fail("inbound stream closed".into())]
            }
            _ => {
                self.handles = None;
                Vec::new()
            }
        }
    }

    /// Wait for the next inbound signal. Pends forever without handles, so
    /// it can sit in a `select!` unconditionally. `None` means the stream
    /// closed.
    pub async fn next_signal(&mut self) -> Option<TransportSignal> {
        match self.handles.as_mut() {
            Some(handles) => handles.inbound.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Drop handles and timers and go back to `Initializing`.
    pub fn teardown(&mut self) {
        self.handles = None;
        self.retry_at = None;
        self.has_launched = false;
        self.attempt = 0;
        self.set_state(ConnectionState::Initializing);
    }

    // ── Internals ────────────────────────────────────────────────

    /// Obtain access and an endpoint, then launch. The state only moves to
    /// `Connecting` once an endpoint is in hand; access and endpoint
    /// failures go straight to `Failed`.
    async fn launch(&mut self) -> Vec<ConnectionEvent> {
        let endpoint = match self.resolve_endpoint().await {
            Ok(endpoint) => endpoint,
            Err(e) => return vec![self.fail(e.to_string())],
        };

        let attempt = self.attempt + 1;
        self.set_state(ConnectionState::Connecting);
        let mut events = vec![ConnectionEvent::Connecting { attempt }];
        info!(attempt, endpoint = %endpoint.id, "launching simulation stream");

        match self.transport.launch(&endpoint, &self.target).await {
            Ok(handles) => {
                debug!("stream launched, waiting for connected signal");
                self.handles = Some(handles);
            }
            Err(e) => events.push(self.fail(e.to_string())),
        }
        events
    }

    async fn resolve_endpoint(&mut self) -> Result<Endpoint, SimlinkError> {
        let grant = self.transport.request_access(&self.target).await?;
        let endpoint = self
            .transport
            .fetch_endpoints(&grant)
            .await?
            .into_iter()
            .next()
            .ok_or(SimlinkError::NoEndpoints)?;
        debug!(endpoint = %endpoint.id, address = %endpoint.address, "using endpoint");
        Ok(endpoint)
    }

    fn on_connected(&mut self) -> Vec<ConnectionEvent> {
        match self.state {
            ConnectionState::Connected => Vec::new(),
            ConnectionState::Connecting if self.handles.is_some() => {
                info!("stream connected");
                self.attempt = 0;
                self.retry_at = None;
                self.set_state(ConnectionState::Connected);
                vec![ConnectionEvent::Connected]
            }
            _ => {
                warn!(state = %self.state, "connected signal without a launched stream");
                Vec::new()
            }
        }
    }

    fn fail(&mut self, reason: String) -> ConnectionEvent {
        self.handles = None;
        self.attempt += 1;
        self.set_state(ConnectionState::Failed);

        let will_retry = self.attempt < self.policy.max_retries;
        if will_retry {
            warn!(attempt = self.attempt, %reason, delay = ?self.policy.delay, "connection failed, retrying");
            self.retry_at = Some(Instant::now() + self.policy.delay);
            self.set_state(ConnectionState::Retrying);
        } else {
            warn!(attempt = self.attempt, %reason, "connection failed, giving up");
            self.retry_at = None;
        }

        ConnectionEvent::Failed {
            reason,
            attempt: self.attempt,
            will_retry,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "connection state");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackTransport, SimulatorHandle};

    fn manager() -> (ConnectionManager<LoopbackTransport>, SimulatorHandle) {
        let (transport, sim) = LoopbackTransport::new();
        let policy = RetryPolicy {
            max_retries: 3,
            delay: Duration::from_millis(100),
        };
        (
            ConnectionManager::new(transport, LaunchTarget::default(), policy),
            sim,
        )
    }

    async fn pump_status(conn: &mut ConnectionManager<LoopbackTransport>) -> Vec<ConnectionEvent> {
        match conn.next_signal().await {
            Some(TransportSignal::Status(s)) => conn.on_status(s),
            Some(TransportSignal::Message(m)) => panic!("unexpected message {m}"),
            None => conn.on_stream_closed(),
        }
    }

    #[tokio::test]
    async fn launch_then_connected() {
        let (mut conn, _sim) = manager();
        let events = conn.initialize().await;
        assert_eq!(events, vec![ConnectionEvent::Connecting { attempt: 1 }]);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.emitter_mut().is_none());

        assert_eq!(pump_status(&mut conn).await, vec![ConnectionEvent::Connected]);
        assert!(conn.state().is_connected());
        assert!(conn.emitter_mut().is_some());
    }

    #[tokio::test]
    async fn initialize_is_reentrant_noop() {
        let (mut conn, sim) = manager();
        conn.initialize().await;
        assert!(conn.initialize().await.is_empty());
        assert_eq!(sim.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_bounded() {
        let (mut conn, sim) = manager();
        sim.fail_launches(10);

        let events = conn.initialize().await;
        assert!(matches!(
            events.last(),
            Some(ConnectionEvent::Failed { attempt: 1, will_retry: true, .. })
        ));
        assert_eq!(conn.state(), ConnectionState::Retrying);
        assert!(conn.retry_deadline().is_some());

        let events = conn.on_retry_timer().await;
        assert_eq!(events[0], ConnectionEvent::Connecting { attempt: 2 });
        assert!(matches!(
            events[1],
            ConnectionEvent::Failed { attempt: 2, will_retry: true, .. }
        ));

        let events = conn.on_retry_timer().await;
        assert!(matches!(
            events[1],
            ConnectionEvent::Failed { attempt: 3, will_retry: false, .. }
        ));
        assert!(conn.state().is_terminal());
        assert!(conn.retry_deadline().is_none());

        // No automatic retry once terminal.
        assert!(conn.on_retry_timer().await.is_empty());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn manual_retry_resets_attempts() {
        let (mut conn, sim) = manager();
        sim.fail_launches(1);
        conn.policy.max_retries = 1;

        conn.initialize().await;
        assert!(conn.state().is_terminal());
        assert_eq!(conn.attempt(), 1);

        let events = conn.manual_retry().await;
        assert_eq!(events, vec![ConnectionEvent::Connecting { attempt: 1 }]);
        assert_eq!(pump_status(&mut conn).await, vec![ConnectionEvent::Connected]);
        assert_eq!(conn.attempt(), 0);
    }

    #[tokio::test]
    async fn empty_endpoints_is_a_failure() {
        let (mut conn, sim) = manager();
        sim.empty_endpoints(1);
        let events = conn.initialize().await;
        let [ConnectionEvent::Failed { reason, .. }] = events.as_slice() else {
            panic!("expected a lone failure, got {events:?}");
        };
        assert!(reason.contains("endpoints"));
        assert_eq!(sim.launch_count(), 0);
    }

    #[tokio::test]
    async fn connecting_only_after_access_and_endpoints() {
        let (mut conn, sim) = manager();
        let rx = conn.subscribe();
        sim.reject_access(1);

        let events = conn.initialize().await;
        assert!(matches!(
            events.as_slice(),
            [ConnectionEvent::Failed { attempt: 1, will_retry: true, .. }]
        ));
        assert_eq!(*rx.borrow(), ConnectionState::Retrying);

        let events = conn.on_retry_timer().await;
        assert_eq!(events, vec![ConnectionEvent::Connecting { attempt: 2 }]);
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn failure_while_connected_clears_handles_and_retries() {
        let (mut conn, mut sim) = manager();
        conn.initialize().await;
        pump_status(&mut conn).await;
        let link = sim.accept().await.unwrap();

        link.status(StreamStatus::Failed("ice timeout".into()))
            .await
            .unwrap();
        let events = pump_status(&mut conn).await;
        assert!(matches!(
            events[0],
            ConnectionEvent::Failed { attempt: 1, will_retry: true, .. }
        ));
        assert!(conn.emitter_mut().is_none());
        assert_eq!(conn.state(), ConnectionState::Retrying);
    }

    #[tokio::test]
    async fn session_end_is_not_retried() {
        let (mut conn, mut sim) = manager();
        conn.initialize().await;
        pump_status(&mut conn).await;
        let link = sim.accept().await.unwrap();

        link.status(StreamStatus::Withdrawn).await.unwrap();
        assert_eq!(
            pump_status(&mut conn).await,
            vec![ConnectionEvent::SessionEnded {
                reason: SessionEndReason::Withdrawn
            }]
        );
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(conn.retry_deadline().is_none());
    }

    #[tokio::test]
    async fn end_before_connect_counts_as_failure() {
        let (mut conn, mut sim) = manager();
        sim.set_manual_connect(true);
        conn.initialize().await;
        let link = sim.accept().await.unwrap();

        link.status(StreamStatus::Closed).await.unwrap();
        let events = pump_status(&mut conn).await;
        assert!(matches!(events[0], ConnectionEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn dropped_stream_is_a_failure() {
        let (mut conn, mut sim) = manager();
        sim.set_manual_connect(true);
        conn.initialize().await;
        let link = sim.accept().await.unwrap();
        link.connected().await.unwrap();
        pump_status(&mut conn).await;

        drop(link);
        let events = pump_status(&mut conn).await;
        assert!(matches!(events[0], ConnectionEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn watch_tracks_state() {
        let (mut conn, _sim) = manager();
        let rx = conn.subscribe();
        conn.initialize().await;
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);
        pump_status(&mut conn).await;
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
        conn.teardown();
        assert_eq!(*rx.borrow(), ConnectionState::Initializing);
    }
}
