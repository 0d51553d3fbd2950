//! Session controller.
//!
//! [`Session`] owns every component and runs one dispatch loop over user
//! commands, inbound transport signals and timers. Nothing else holds
//! mutable access to the state machines; observers use
//! [`Session::subscribe`] and the `watch` receivers.
//!
//! Each input can also be fed directly ([`Session::handle_command`],
//! [`Session::handle_signal`], ...) to drive the session step by step.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SimlinkError;
use crate::persistence::{PersistedSnapshot, PersistenceManager, SessionStore, SessionSummary, now_ms};
use crate::protocol::{
    self, ApplicationAction, Command, ExplosionAction, LayerAction, Message, PressureTestMode,
    TrainingAction, WaypointAction,
};
use crate::router::MessageRouter;
use crate::state::{
    ConnectionEvent, ConnectionManager, ConnectionState, LaunchContext, ScreenFlow, ScreenState,
};
use crate::training::{QuizState, TrainingEvent, TrainingMachine};
use crate::transport::{StreamStatus, StreamingTransport, TransportSignal};

/// Capacity of the session event broadcast.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// How often a live session is checked for idle expiry.
pub const EXPIRY_POLL_INTERVAL: Duration = Duration::from_secs(30);

// ── Inputs and outputs ───────────────────────────────────────────

/// Which session to continue from the selection screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChoice {
    Resume(String),
    New,
}

/// Everything a learner can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Start,
    ChooseSession(SessionChoice),
    SelectTool(String),
    SelectPipe(String),
    SelectTestPlug,
    StartPressureTest(PressureTestMode),
    AnswerQuestion { selected_index: usize },
    DismissQuestion,
    /// Skip the rest of the cinematic.
    BeginTraining,
    TrainingControl(TrainingAction),
    Explosion(ExplosionAction),
    Camera(String),
    Waypoint(WaypointAction),
    Layer(LayerAction),
    Hierarchy(LayerAction),
    Retry,
    Quit,
}

/// Broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Screen(ScreenState),
    Connection(ConnectionEvent),
    Training(TrainingEvent),
    ActiveSessions(Vec<SessionSummary>),
    Restored { phase: usize },
    Saved,
    Countdown { remaining: u32 },
    /// A message sent to or received from the simulation.
    Traffic(Message),
    /// A command could not be applied.
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Quit,
    /// The command channel closed.
    Detached,
}

// ── Session ──────────────────────────────────────────────────────

pub struct Session<T, S> {
    config: SessionConfig,
    ctx: LaunchContext,
    conn: ConnectionManager<T>,
    router: MessageRouter,
    training: TrainingMachine,
    screen: ScreenFlow,
    persistence: PersistenceManager<S>,
    events: broadcast::Sender<SessionEvent>,
    next_tick: Option<Instant>,
    /// Last inbound signal or user command.
    last_activity: Instant,
    outcome: Option<SessionOutcome>,
}

impl<T: StreamingTransport, S: SessionStore> Session<T, S> {
    pub fn new(config: SessionConfig, ctx: LaunchContext, transport: T, store: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            conn: ConnectionManager::new(transport, config.target.clone(), config.retry),
            router: MessageRouter::new(config.log_capacity),
            training: TrainingMachine::new(config.tasks.clone()),
            screen: ScreenFlow::new(),
            persistence: PersistenceManager::new(store, config.autosave_interval),
            events,
            next_tick: None,
            last_activity: Instant::now(),
            outcome: None,
            config,
            ctx,
        }
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.subscribe()
    }

    pub fn screen_state(&self) -> watch::Receiver<ScreenState> {
        self.screen.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.conn
    }

    pub fn training(&self) -> &TrainingMachine {
        &self.training
    }

    pub fn screen(&self) -> &ScreenFlow {
        &self.screen
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn persistence(&self) -> &PersistenceManager<S> {
        &self.persistence
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome
    }

    // ── Dispatch loop ────────────────────────────────────────────

    /// Run until the training completes, the learner quits, or `commands`
    /// closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<UserCommand>) -> SessionOutcome {
        let mut autosave = tokio::time::interval(self.persistence.interval());
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut expiry = tokio::time::interval(EXPIRY_POLL_INTERVAL);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let expires = self.config.idle_timeout.is_some();

        loop {
            if let Some(outcome) = self.outcome {
                info!(?outcome, "session finished");
                return outcome;
            }
            let retry_at = self.conn.retry_deadline();
            let tick_at = self.next_tick;

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.dispatch(cmd).await,
                    None => {
                        debug!("command channel closed");
                        self.conn.teardown();
                        return SessionOutcome::Detached;
                    }
                },
                signal = self.conn.next_signal() => self.handle_signal(signal).await,
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.on_retry_timer().await;
                }
                _ = tokio::time::sleep_until(tick_at.unwrap_or_else(Instant::now)), if tick_at.is_some() => {
                    self.on_countdown_tick().await;
                }
                _ = autosave.tick() => self.autosave().await,
                _ = expiry.tick(), if expires => self.on_expiry_poll().await,
            }
        }
    }

    /// [`Session::handle_command`], with rejections logged and broadcast.
    pub async fn dispatch(&mut self, cmd: UserCommand) {
        if let Err(e) = self.handle_command(cmd).await {
            warn!(error = %e, "command rejected");
            self.emit(SessionEvent::Rejected(e.to_string()));
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn handle_command(&mut self, cmd: UserCommand) -> Result<(), SimlinkError> {
        debug!(?cmd, "command");
        self.last_activity = Instant::now();
        match cmd {
            UserCommand::Start => self.start().await,
            UserCommand::ChooseSession(choice) => self.choose_session(choice).await,
            UserCommand::SelectTool(tool) => {
                self.training.select_tool(&tool);
                self.send(Command::ToolSelect(tool));
                Ok(())
            }
            UserCommand::SelectPipe(pipe) => {
                self.training.select_pipe(&pipe);
                self.send(Command::PipeSelect(pipe));
                Ok(())
            }
            UserCommand::SelectTestPlug => {
                self.training.select_air_plug();
                self.send(Command::TestPlugSelect);
                Ok(())
            }
            UserCommand::StartPressureTest(mode) => {
                self.send(Command::PressureTestStart(mode));
                Ok(())
            }
            UserCommand::AnswerQuestion { selected_index } => self.answer(selected_index).await,
            UserCommand::DismissQuestion => {
                let events = self.training.dismiss_question()?;
                self.handle_training_events(events).await;
                Ok(())
            }
            UserCommand::BeginTraining => {
                self.screen.begin_training()?;
                self.next_tick = None;
                self.emit(SessionEvent::Screen(self.screen.state()));
                self.enter_training().await;
                Ok(())
            }
            UserCommand::TrainingControl(action) => {
                self.send(Command::TrainingControl(action));
                Ok(())
            }
            UserCommand::Explosion(action) => {
                self.send(Command::ExplosionControl(action));
                Ok(())
            }
            UserCommand::Camera(data) => {
                self.send(Command::CameraControl(data));
                Ok(())
            }
            UserCommand::Waypoint(action) => {
                self.send(Command::WaypointControl(action));
                Ok(())
            }
            UserCommand::Layer(action) => {
                self.send(Command::LayerControl(action));
                Ok(())
            }
            UserCommand::Hierarchy(action) => {
                self.send(Command::HierarchicalControl(action));
                Ok(())
            }
            UserCommand::Retry => {
                let events = self.conn.manual_retry().await;
                self.handle_connection_events(events).await;
                Ok(())
            }
            UserCommand::Quit => {
                self.quit().await;
                Ok(())
            }
        }
    }

    async fn start(&mut self) -> Result<(), SimlinkError> {
        if self.screen.state() != ScreenState::Starter {
            return Err(SimlinkError::InvalidTransition("session already started"));
        }
        let active = if self.ctx.is_lti_student() {
            self.persistence.active_sessions(&self.ctx.user_id).await
        } else {
            Vec::new()
        };

        let next = self.screen.start(&self.ctx, !active.is_empty())?;
        self.emit(SessionEvent::Screen(next));

        match next {
            ScreenState::SessionSelection => {
                self.emit(SessionEvent::ActiveSessions(active));
                Ok(())
            }
            _ => {
                if self.ctx.is_lti_student() {
                    self.persistence.create(&self.ctx.user_id).await;
                }
                self.connect().await;
                Ok(())
            }
        }
    }

    async fn choose_session(&mut self, choice: SessionChoice) -> Result<(), SimlinkError> {
        if self.screen.state() != ScreenState::SessionSelection {
            return Err(SimlinkError::InvalidTransition(
                "no session selection in progress",
            ));
        }
        let resumed = match choice {
            SessionChoice::Resume(id) => self.persistence.resume(&id).await,
            SessionChoice::New => None,
        };
        let phase = match resumed {
            Some(summary) => {
                let last = self.training.progress().total_tasks.saturating_sub(1);
                Some(summary.phase_index.min(last))
            }
            None => {
                self.persistence.create(&self.ctx.user_id).await;
                None
            }
        };
        self.screen.select_session(phase)?;
        self.emit(SessionEvent::Screen(self.screen.state()));
        self.connect().await;
        Ok(())
    }

    async fn answer(&mut self, selected_index: usize) -> Result<(), SimlinkError> {
        let QuizState::Presented { question_id, .. } = self.training.quiz().state() else {
            return Err(SimlinkError::InvalidTransition("no question is open"));
        };
        let correct = match self.config.is_correct(question_id, selected_index) {
            Some(correct) => correct,
            None => {
                warn!(question_id = %question_id, "question not in answer key, accepting");
                true
            }
        };

        let event = self.training.submit_answer(selected_index, correct)?;
        if let TrainingEvent::AnswerSubmitted {
            question_id,
            try_count,
            correct,
        } = &event
        {
            self.send(Command::QuestionAnswer {
                question_id: question_id.clone(),
                try_count: *try_count,
                correct: *correct,
            });
        }
        self.handle_training_events(vec![event]).await;
        Ok(())
    }

    async fn quit(&mut self) {
        info!("quitting");
        self.send(Command::ApplicationControl(ApplicationAction::Quit));
        if !self.training.is_complete() {
            self.save_now().await;
        }
        self.screen.quit();
        self.next_tick = None;
        self.emit(SessionEvent::Screen(self.screen.state()));
        self.conn.teardown();
        self.outcome = Some(SessionOutcome::Quit);
    }

    // ── Signals and timers ───────────────────────────────────────

    /// Feed one item from the inbound stream; `None` means it closed.
    pub async fn handle_signal(&mut self, signal: Option<TransportSignal>) {
        self.last_activity = Instant::now();
        match signal {
            Some(TransportSignal::Message(raw)) => {
                let Some(msg) = protocol::decode(&raw) else {
                    debug!("blank message dropped");
                    return;
                };
                self.emit(SessionEvent::Traffic(msg.clone()));
                let events = self.router.route_message(msg, &mut self.training);
                self.handle_training_events(events).await;
            }
            Some(TransportSignal::Status(status)) => {
                let events = self.conn.on_status(status);
                self.handle_connection_events(events).await;
            }
            None => {
                let events = self.conn.on_stream_closed();
                self.handle_connection_events(events).await;
            }
        }
    }

    /// Wait for the next inbound signal and handle it.
    pub async fn process_next_signal(&mut self) {
        let signal = self.conn.next_signal().await;
        self.handle_signal(signal).await;
    }

    pub async fn on_retry_timer(&mut self) {
        let events = self.conn.on_retry_timer().await;
        self.handle_connection_events(events).await;
    }

    pub async fn on_countdown_tick(&mut self) {
        if self.screen.tick() {
            self.next_tick = None;
            self.emit(SessionEvent::Screen(self.screen.state()));
            self.enter_training().await;
        } else if let Some(remaining) = self.screen.countdown() {
            self.next_tick = Some(Instant::now() + COUNTDOWN_STEP);
            self.emit(SessionEvent::Countdown { remaining });
        } else {
            self.next_tick = None;
        }
    }

    /// End a connected session that has been quiet for longer than
    /// `idle_timeout`, the same way a withdrawn stream ends.
    pub async fn on_expiry_poll(&mut self) {
        let Some(limit) = self.config.idle_timeout else {
            return;
        };
        if !self.conn.state().is_connected() {
            return;
        }
        let idle = self.last_activity.elapsed();
        if idle < limit {
            return;
        }
        info!(?idle, "session idle past its limit, expiring");
        let events = self.conn.on_status(StreamStatus::Withdrawn);
        self.handle_connection_events(events).await;
    }

    pub async fn autosave(&mut self) {
        if self.conn.state().is_connected() && self.persistence.can_save() {
            self.save_now().await;
        }
    }

    // ── Internals ────────────────────────────────────────────────

    async fn connect(&mut self) {
        let events = self.conn.initialize().await;
        self.handle_connection_events(events).await;
    }

    async fn handle_connection_events(&mut self, events: Vec<ConnectionEvent>) {
        for event in events {
            self.emit(SessionEvent::Connection(event.clone()));
            match event {
                ConnectionEvent::Connected => self.on_connected().await,
                ConnectionEvent::SessionEnded { reason } => {
                    info!(%reason, "stream ended, holding position");
                    self.save_now().await;
                    let phase = self.training.progress().current_task_index;
                    self.screen.on_session_ended(phase);
                    self.next_tick = None;
                    self.emit(SessionEvent::Screen(self.screen.state()));
                }
                ConnectionEvent::Connecting { .. } | ConnectionEvent::Failed { .. } => {}
            }
        }
    }

    async fn on_connected(&mut self) {
        self.persistence.on_connected();

        let pending = match self.screen.on_connected() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "connected in an unexpected screen");
                None
            }
        };
        self.emit(SessionEvent::Screen(self.screen.state()));

        if let Some(phase) = pending
            && phase != self.training.progress().current_task_index
        {
            match self.training.resume_to_phase(phase) {
                Ok(events) => self.handle_training_events(events).await,
                Err(e) => warn!(phase, error = %e, "pending phase not applied"),
            }
        }

        self.restore().await;

        match self.screen.state() {
            ScreenState::Cinematic if self.next_tick.is_none() => {
                if let Err(e) = self.screen.start_countdown(self.config.cinematic_secs) {
                    warn!(error = %e, "countdown not started");
                }
                if self.screen.countdown().is_some() {
                    self.next_tick = Some(Instant::now() + COUNTDOWN_STEP);
                } else {
                    self.emit(SessionEvent::Screen(self.screen.state()));
                    self.enter_training().await;
                }
            }
            ScreenState::Training => self.enter_training().await,
            _ => {}
        }

        // First snapshot for this connection.
        self.save_now().await;
    }

    /// One restore attempt per connection; applied only if it does not
    /// rewind live progress.
    async fn restore(&mut self) {
        let Some(snap) = self.persistence.restore().await else {
            return;
        };
        if !self.training.apply_snapshot(&snap.training) {
            return;
        }

        let scene = self.router.scene_mut();
        scene.explosion = snap.explosion;
        scene.camera = snap.camera.clone();
        if let Some(index) = snap.active_waypoint {
            scene.update_waypoint(index, true);
        }

        if self.screen.restore_mode(snap.screen) {
            self.next_tick = None;
            self.emit(SessionEvent::Screen(self.screen.state()));
        } else if let (ScreenState::Cinematic, Some(left)) =
            (self.screen.state(), snap.cinematic_countdown)
            && self.screen.start_countdown(left).is_ok()
        {
            self.next_tick = self
                .screen
                .countdown()
                .map(|_| Instant::now() + COUNTDOWN_STEP);
        }

        // Put the simulation's scene back where it was.
        if snap.explosion.value > 0.0 {
            let value = snap.explosion.value.round().clamp(0.0, 100.0) as u8;
            self.send(Command::ExplosionControl(ExplosionAction::Set(value)));
        }
        if let Some(index) = snap.active_waypoint {
            self.send(Command::WaypointControl(WaypointAction::Activate(index)));
        }

        let phase = self.training.progress().current_task_index;
        self.emit(SessionEvent::Restored { phase });
    }

    /// Tell the simulation to run, resuming at the current task.
    async fn enter_training(&mut self) {
        self.send(Command::TrainingControl(TrainingAction::Start));
        let events = self.training.start();
        self.handle_training_events(events).await;

        let index = self.training.progress().current_task_index;
        if index > 0
            && let Some(task) = self.training.current_task()
        {
            let cmd = Command::TaskStart {
                tool: task.tool.clone(),
                pipe: self.training.progress().selected_pipe.clone(),
            };
            self.send(cmd);
        }
    }

    async fn handle_training_events(&mut self, events: Vec<TrainingEvent>) {
        for event in events {
            self.emit(SessionEvent::Training(event.clone()));
            match event {
                TrainingEvent::PhaseSuccess {
                    next_task_index, ..
                } => {
                    self.persistence
                        .complete_phase(next_task_index.saturating_sub(1))
                        .await;
                    self.save_now().await;
                }
                TrainingEvent::TrainingCompleted => {
                    if let Err(e) = self.screen.on_training_complete() {
                        warn!(error = %e, "completion outside training");
                    }
                    self.next_tick = None;
                    self.emit(SessionEvent::Screen(self.screen.state()));
                    let answers = self.training.answers().to_vec();
                    self.persistence.complete_training(&answers).await;
                    self.outcome = Some(SessionOutcome::Completed);
                }
                TrainingEvent::TaskStarted { .. }
                | TrainingEvent::QuestionPresented { .. }
                | TrainingEvent::AnswerSubmitted { .. }
                | TrainingEvent::QuestionClosed { .. } => {}
            }
        }
    }

    async fn save_now(&mut self) {
        let Some(session_id) = self.persistence.session_id().map(str::to_string) else {
            return;
        };
        if !self.persistence.is_enabled() {
            return;
        }
        let scene = self.router.scene();
        let snapshot = PersistedSnapshot {
            session_id,
            training: self.training.snapshot(),
            screen: self.screen.state(),
            explosion: scene.explosion,
            camera: scene.camera.clone(),
            active_waypoint: scene.active_waypoint,
            cinematic_countdown: self.screen.countdown(),
            saved_at_ms: now_ms(),
        };
        if self.persistence.save(&snapshot).await {
            self.emit(SessionEvent::Saved);
        }
    }

    fn send(&mut self, cmd: Command) {
        match self.router.send(&cmd, self.conn.emitter_mut()) {
            Ok(()) => self.emit(SessionEvent::Traffic(Message::outgoing(
                cmd.topic(),
                &cmd.data(),
            ))),
            Err(e) => warn!(command = %cmd, error = %e, "command dropped"),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ── Tests ────────────────────────────────────────────────────────
