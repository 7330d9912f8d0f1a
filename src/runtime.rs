//! Tokio runtime layer: session tasks, timers, and control surfaces
//!
//! Every live session runs as one tokio task that exclusively owns its
//! [`Game`]. All commands (host controls, player joins and answers) arrive
//! through a single command queue, so state mutation is serialized by
//! construction while network I/O stays asynchronous at the edges. The task
//! doubles as the timer driver: it emits per-second countdown ticks while a
//! question is open and fires the question's deadline alarm exactly once.
//!
//! The control surfaces ([`HostHandle`], [`PlayerHandle`]) are thin command
//! issuers: they hold the session's command sender, their own participant
//! id, and their ordered event stream, and no game state whatsoever.

use std::{collections::HashMap, time::Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    ServerEvent,
    constants::session::{LOBBY_IDLE_TIMEOUT, TICK_INTERVAL},
    game::{self, AlarmMessage, Game, HostCommand, PhaseKind, SyncMessage, UpdateMessage},
    game_id::GamePin,
    quiz::ChoiceId,
    registry::{RegistryInner, SessionId},
    session::Tunnel,
    watcher::{Id, Role},
};

/// Ordered stream of events delivered to one connected client
pub type EventStream = mpsc::UnboundedReceiver<ServerEvent>;

/// A client's send-side tunnel, backed by an unbounded channel
///
/// Sends never block and never fail loudly; once the receiving handle is
/// dropped the channel reports closed and the participant counts as
/// disconnected.
#[derive(Debug, Clone)]
pub(crate) struct ClientChannel {
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ClientChannel {
    fn new(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { sender }
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Tunnel for ClientChannel {
    fn send_message(&self, message: &UpdateMessage) {
        let _ = self.sender.send(ServerEvent::Update(message.clone()));
    }

    fn send_state(&self, state: &SyncMessage) {
        let _ = self.sender.send(ServerEvent::Sync(state.clone()));
    }

    fn close(self) {}
}

/// Commands accepted by a session task
pub(crate) enum SessionCommand {
    /// A player wants to join the session
    Join {
        name: String,
        reply: oneshot::Sender<Result<(Id, EventStream), game::Error>>,
    },
    /// A previously joined participant reconnects with a fresh stream
    Reconnect {
        watcher_id: Id,
        reply: oneshot::Sender<Result<(Role, EventStream), game::Error>>,
    },
    /// A host control command
    Host {
        command: HostCommand,
        reply: oneshot::Sender<Result<(), game::Error>>,
    },
    /// A player answer submission
    Answer {
        player_id: Id,
        question_index: usize,
        choice: ChoiceId,
        reply: oneshot::Sender<Result<u64, game::Error>>,
    },
}

/// Errors surfaced by control-surface commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The session task is no longer running
    #[error("session is no longer running")]
    SessionClosed,
    /// The session rejected the command; state is unchanged
    #[error(transparent)]
    Rejected(#[from] game::Error),
}

/// The host's control surface for one session
///
/// Holds no game state; every method sends one command into the session's
/// queue and awaits the session's verdict.
#[derive(Debug)]
pub struct HostHandle {
    session_id: SessionId,
    pin: GamePin,
    watcher_id: Id,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: EventStream,
}

impl HostHandle {
    pub(crate) fn new(
        session_id: SessionId,
        pin: GamePin,
        watcher_id: Id,
        commands: mpsc::UnboundedSender<SessionCommand>,
        events: EventStream,
    ) -> Self {
        Self {
            session_id,
            pin,
            watcher_id,
            commands,
            events,
        }
    }

    /// The session this handle controls
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The session's join PIN
    pub fn pin(&self) -> GamePin {
        self.pin
    }

    /// The host's participant id
    pub fn id(&self) -> Id {
        self.watcher_id
    }

    /// Starts the game; requires at least one joined player
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the session is gone or rejected the
    /// command.
    pub async fn start(&self) -> Result<(), CommandError> {
        self.command(HostCommand::Start).await
    }

    /// Advances to the next phase (leaderboard, next question, or game over)
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the session is gone or rejected the
    /// command.
    pub async fn next(&self) -> Result<(), CommandError> {
        self.command(HostCommand::Next).await
    }

    /// Closes the open question early
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the session is gone or rejected the
    /// command.
    pub async fn reveal(&self) -> Result<(), CommandError> {
        self.command(HostCommand::Reveal).await
    }

    /// Terminates the session from any phase
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the session is gone.
    pub async fn end(&self) -> Result<(), CommandError> {
        self.command(HostCommand::End).await
    }

    /// Receives the next event for the host, in state-machine order
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    async fn command(&self, command: HostCommand) -> Result<(), CommandError> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(SessionCommand::Host { command, reply })
            .map_err(|_| CommandError::SessionClosed)?;
        verdict
            .await
            .map_err(|_| CommandError::SessionClosed)?
            .map_err(CommandError::from)
    }
}

/// A player's control surface for one session
#[derive(Debug)]
pub struct PlayerHandle {
    session_id: SessionId,
    pin: GamePin,
    player_id: Id,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: EventStream,
}

impl PlayerHandle {
    pub(crate) fn new(
        session_id: SessionId,
        pin: GamePin,
        player_id: Id,
        commands: mpsc::UnboundedSender<SessionCommand>,
        events: EventStream,
    ) -> Self {
        Self {
            session_id,
            pin,
            player_id,
            commands,
            events,
        }
    }

    /// The session this player belongs to
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The session's join PIN
    pub fn pin(&self) -> GamePin {
        self.pin
    }

    /// The player's id, stable across reconnects
    pub fn id(&self) -> Id {
        self.player_id
    }

    /// Submits an answer to the question at `question_index`
    ///
    /// Returns the points earned. A resubmission for the same question is
    /// answered benignly with the originally awarded points and never
    /// changes the recorded score.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the session is gone or the answer was
    /// rejected (no open question, deadline passed, unknown player).
    pub async fn answer(&self, question_index: usize, choice: ChoiceId) -> Result<u64, CommandError> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(SessionCommand::Answer {
                player_id: self.player_id,
                question_index,
                choice,
                reply,
            })
            .map_err(|_| CommandError::SessionClosed)?;
        verdict
            .await
            .map_err(|_| CommandError::SessionClosed)?
            .map_err(CommandError::from)
    }

    /// Receives the next event for this player, in state-machine order
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }
}

/// Finds the tunnel of a connected participant
///
/// Channels whose receiving handle was dropped count as disconnected, which
/// is what flips roster entries to inactive without touching the roster.
fn finder(
    connections: &HashMap<Id, ClientChannel>,
) -> impl Fn(Id) -> Option<ClientChannel> + '_ {
    |id| {
        connections
            .get(&id)
            .filter(|channel| !channel.is_closed())
            .cloned()
    }
}

/// Runs one session to completion
///
/// The task owns the game exclusively; commands, countdown ticks, and the
/// deadline alarm are serialized through one `select` loop. The task ends
/// when the lobby idles out, or the game is finished and the host is gone,
/// or every command sender is dropped; it then releases the session's
/// registry entries.
pub(crate) async fn run_session(
    session_id: SessionId,
    pin: GamePin,
    host_id: Id,
    mut game: Game,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    host_events: mpsc::UnboundedSender<ServerEvent>,
    registry: std::sync::Weak<RegistryInner>,
) {
    let mut connections: HashMap<Id, ClientChannel> = HashMap::new();
    connections.insert(host_id, ClientChannel::new(host_events));

    let mut pending_alarm: Option<(Instant, AlarmMessage)> = None;
    let mut last_activity = Instant::now();
    let mut retired = false;

    let mut housekeeping = tokio::time::interval(TICK_INTERVAL);
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("session started");
    game.sync(host_id, Instant::now(), finder(&connections));

    loop {
        let alarm_at = pending_alarm.as_ref().map(|(at, _)| *at);

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    info!("all command senders dropped");
                    break;
                };
                last_activity = Instant::now();
                handle_command(&mut game, &mut connections, &mut pending_alarm, host_id, command);
            }
            () = tokio::time::sleep_until(alarm_at.unwrap_or_else(Instant::now).into()),
                if alarm_at.is_some() =>
            {
                let (_, alarm) = pending_alarm.take().expect("guarded by alarm_at");
                debug!(?alarm, "question deadline reached");
                game.receive_alarm(alarm, finder(&connections));
            }
            _ = housekeeping.tick() => {
                let now = Instant::now();
                game.broadcast_tick(now, finder(&connections));

                if game.phase_kind() == PhaseKind::Lobby
                    && now.duration_since(last_activity) >= LOBBY_IDLE_TIMEOUT
                {
                    info!("lobby idled out");
                    break;
                }
                if game.phase_kind() == PhaseKind::Finished
                    && connections.get(&host_id).is_none_or(ClientChannel::is_closed)
                {
                    info!("game finished and host gone");
                    break;
                }
            }
        }

        if !retired && game.phase_kind() == PhaseKind::Finished {
            pending_alarm = None;
            if let Some(registry) = registry.upgrade() {
                registry.retire(session_id, pin);
            }
            retired = true;
        }
    }

    if let Some(registry) = registry.upgrade() {
        registry.remove(session_id, pin);
    }
    info!("session closed");
}

/// Applies one command to the session's game
///
/// Rejections are replied to the issuer and, where a stream exists, echoed
/// as an error notice on it; they are never broadcast. A duplicate answer is
/// acknowledged benignly with the originally recorded points.
fn handle_command(
    game: &mut Game,
    connections: &mut HashMap<Id, ClientChannel>,
    pending_alarm: &mut Option<(Instant, AlarmMessage)>,
    host_id: Id,
    command: SessionCommand,
) {
    let now = Instant::now();

    match command {
        SessionCommand::Join { name, reply } => {
            let player_id = Id::new();
            let (sender, events) = mpsc::unbounded_channel();
            connections.insert(player_id, ClientChannel::new(sender));

            match game.join(player_id, &name, finder(connections)) {
                Ok(()) => {
                    game.sync(player_id, now, finder(connections));
                    debug!(%player_id, %name, "player joined");
                    let _ = reply.send(Ok((player_id, events)));
                }
                Err(error) => {
                    connections.remove(&player_id);
                    warn!(%error, "join rejected");
                    let _ = reply.send(Err(error));
                }
            }
        }
        SessionCommand::Reconnect { watcher_id, reply } => {
            let Some(role) = game.watchers.role(watcher_id) else {
                let _ = reply.send(Err(game::Error::NotFound));
                return;
            };

            let (sender, events) = mpsc::unbounded_channel();
            connections.insert(watcher_id, ClientChannel::new(sender));
            game.sync(watcher_id, now, finder(connections));
            game.announce_roster(finder(connections));
            debug!(%watcher_id, "participant reconnected");
            let _ = reply.send(Ok((role, events)));
        }
        SessionCommand::Host { command, reply } => {
            let result = game.host_command(
                command,
                now,
                |alarm, after| *pending_alarm = Some((now + after, alarm)),
                finder(connections),
            );

            if game.phase_kind() != PhaseKind::Question {
                *pending_alarm = None;
            }
            if let Err(error) = &result {
                warn!(?command, %error, "host command rejected");
                game.watchers.send_message(
                    &UpdateMessage::Error {
                        message: error.to_string(),
                    },
                    host_id,
                    finder(connections),
                );
            }
            let _ = reply.send(result);
        }
        SessionCommand::Answer {
            player_id,
            question_index,
            choice,
            reply,
        } => {
            let result =
                game.submit_answer(player_id, question_index, choice, now, finder(connections));
            let result = match result {
                Err(game::Error::DuplicateAnswer { points }) => {
                    // Benign ack; the recorded answer is untouched.
                    game.watchers.send_message(
                        &UpdateMessage::AnswerAck { points },
                        player_id,
                        finder(connections),
                    );
                    Ok(points)
                }
                Err(error) => {
                    warn!(%player_id, %error, "answer rejected");
                    game.watchers.send_message(
                        &UpdateMessage::Error {
                            message: error.to_string(),
                        },
                        player_id,
                        finder(connections),
                    );
                    Err(error)
                }
                Ok(points) => Ok(points),
            };
            let _ = reply.send(result);
        }
    }
}
