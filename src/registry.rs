//! Session registry: PIN allocation and session lookup
//!
//! The registry maps join PINs to live sessions and spawns one runtime task
//! per session. A PIN is unique among sessions that have not finished; once
//! a session finishes, its PIN is retired and becomes available again while
//! the session stays addressable by id for late leaderboard queries.

use std::{fmt::Display, str::FromStr, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use garde::Validate;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, info};
use uuid::Uuid;

use crate::{
    game::{self, Game},
    game_id::GamePin,
    quiz::{self, QuizRef, QuizSource},
    runtime::{self, HostHandle, PlayerHandle, SessionCommand},
    watcher::{Id, Role},
};

/// A unique identifier for a game session
///
/// Unlike the [`GamePin`], session ids are never reused and remain valid
/// after the session finished and its PIN was retired.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    /// Creates a new random session ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    /// Formats the ID as a UUID string
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Errors from creating a session
#[derive(Debug, Error)]
pub enum CreateError {
    /// Every PIN is held by a live session; no session could be created
    #[error("the PIN space is saturated; no session could be created")]
    RegistryExhausted,
    /// The quiz could not be fetched or fails referential integrity
    #[error(transparent)]
    Quiz(#[from] quiz::Error),
    /// The quiz definition violates the authoring bounds
    #[error("invalid quiz definition: {0}")]
    InvalidQuiz(garde::Report),
}

/// Errors from joining or reconnecting to a session
#[derive(Debug, Error)]
pub enum JoinError {
    /// No live session matches the given PIN or id
    #[error("no joinable session found")]
    NotFound,
    /// The session rejected the request; its state is unchanged
    #[error(transparent)]
    Rejected(#[from] game::Error),
}

/// One registered session
#[derive(Debug)]
struct SessionEntry {
    /// The PIN the session was created under
    pin: GamePin,
    /// Command queue into the session's task
    commands: mpsc::UnboundedSender<SessionCommand>,
}

/// Shared registry state, also reachable from session tasks for cleanup
#[derive(Debug, Default)]
pub(crate) struct RegistryInner {
    /// PIN to session mapping; entries exist only while a session is live
    pins: DashMap<GamePin, SessionId>,
    /// Id to session mapping; entries survive PIN retirement
    sessions: DashMap<SessionId, SessionEntry>,
}

impl RegistryInner {
    /// Releases a finished session's PIN, keeping it addressable by id
    pub(crate) fn retire(&self, session_id: SessionId, pin: GamePin) {
        self.pins.remove_if(&pin, |_, owner| *owner == session_id);
    }

    /// Removes a session entirely once its task ends
    pub(crate) fn remove(&self, session_id: SessionId, pin: GamePin) {
        self.retire(session_id, pin);
        self.sessions.remove(&session_id);
    }
}

/// Maps PINs to live sessions and issues participant handles
///
/// Cloning is cheap; clones share the same underlying registry. Sessions
/// are fully independent of each other: no failure in one session affects
/// another.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new session playing the quiz stored under `reference`
    ///
    /// Fetches and validates the quiz, allocates a PIN not used by any
    /// unfinished session, spawns the session task, and returns the host's
    /// control surface. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CreateError::Quiz`] or [`CreateError::InvalidQuiz`] for a
    /// missing or malformed quiz, and [`CreateError::RegistryExhausted`]
    /// when every PIN is taken.
    pub fn create_session(
        &self,
        source: &dyn QuizSource,
        reference: &QuizRef,
    ) -> Result<HostHandle, CreateError> {
        let quiz = source.quiz(reference)?;
        quiz.validate().map_err(CreateError::InvalidQuiz)?;
        quiz.ensure_answerable()?;

        let session_id = SessionId::new();
        let pin = self.allocate_pin(session_id)?;
        let host_id = Id::new();

        let (commands, command_queue) = mpsc::unbounded_channel();
        let (host_events, host_stream) = mpsc::unbounded_channel();

        self.inner.sessions.insert(
            session_id,
            SessionEntry {
                pin,
                commands: commands.clone(),
            },
        );

        let span = tracing::info_span!("session", %session_id, %pin);
        tokio::spawn(
            runtime::run_session(
                session_id,
                pin,
                host_id,
                Game::new(quiz, host_id),
                command_queue,
                host_events,
                Arc::downgrade(&self.inner),
            )
            .instrument(span),
        );
        info!(%session_id, %pin, quiz = %reference, "session created");

        Ok(HostHandle::new(session_id, pin, host_id, commands, host_stream))
    }

    /// Looks up the live session joinable under a PIN
    pub fn lookup_by_pin(&self, pin: GamePin) -> Option<SessionId> {
        self.inner.pins.get(&pin).map(|entry| *entry.value())
    }

    /// Checks whether a session is still addressable by id
    ///
    /// Finished sessions remain addressable until their host disconnects.
    pub fn contains(&self, session_id: SessionId) -> bool {
        self.inner.sessions.contains_key(&session_id)
    }

    /// Returns the number of addressable sessions
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Joins the session behind `pin` as a new player
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::NotFound`] for an unknown PIN and
    /// [`JoinError::Rejected`] when the session refused the join (game
    /// already started, invalid name, session full).
    pub async fn join(&self, pin: GamePin, name: &str) -> Result<PlayerHandle, JoinError> {
        let session_id = self.lookup_by_pin(pin).ok_or(JoinError::NotFound)?;
        let commands = self.commands_for(session_id).ok_or(JoinError::NotFound)?;

        let (reply, verdict) = oneshot::channel();
        commands
            .send(SessionCommand::Join {
                name: name.to_owned(),
                reply,
            })
            .map_err(|_| JoinError::NotFound)?;
        let (player_id, events) = verdict.await.map_err(|_| JoinError::NotFound)??;

        Ok(PlayerHandle::new(session_id, pin, player_id, commands, events))
    }

    /// Reattaches a disconnected player to their session
    ///
    /// The player's roster entry, answers, and score survived the
    /// disconnect; the fresh handle starts with a full snapshot of the
    /// current phase.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::NotFound`] for an unknown session and
    /// [`JoinError::Rejected`] when the id does not belong to a player of
    /// that session.
    pub async fn reconnect_player(
        &self,
        session_id: SessionId,
        player_id: Id,
    ) -> Result<PlayerHandle, JoinError> {
        let (pin, commands) = self
            .entry_parts(session_id)
            .ok_or(JoinError::NotFound)?;

        let (role, events) = self.reconnect(&commands, player_id).await?;
        if role != Role::Player {
            return Err(JoinError::Rejected(game::Error::NotFound));
        }

        Ok(PlayerHandle::new(session_id, pin, player_id, commands, events))
    }

    /// Reattaches the host to their session
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::NotFound`] for an unknown session and
    /// [`JoinError::Rejected`] when the id is not the session's host.
    pub async fn reconnect_host(
        &self,
        session_id: SessionId,
        host_id: Id,
    ) -> Result<HostHandle, JoinError> {
        let (pin, commands) = self
            .entry_parts(session_id)
            .ok_or(JoinError::NotFound)?;

        let (role, events) = self.reconnect(&commands, host_id).await?;
        if role != Role::Host {
            return Err(JoinError::Rejected(game::Error::NotFound));
        }

        Ok(HostHandle::new(session_id, pin, host_id, commands, events))
    }

    async fn reconnect(
        &self,
        commands: &mpsc::UnboundedSender<SessionCommand>,
        watcher_id: Id,
    ) -> Result<(Role, runtime::EventStream), JoinError> {
        let (reply, verdict) = oneshot::channel();
        commands
            .send(SessionCommand::Reconnect { watcher_id, reply })
            .map_err(|_| JoinError::NotFound)?;
        Ok(verdict.await.map_err(|_| JoinError::NotFound)??)
    }

    fn commands_for(&self, session_id: SessionId) -> Option<mpsc::UnboundedSender<SessionCommand>> {
        self.inner
            .sessions
            .get(&session_id)
            .map(|entry| entry.commands.clone())
    }

    fn entry_parts(
        &self,
        session_id: SessionId,
    ) -> Option<(GamePin, mpsc::UnboundedSender<SessionCommand>)> {
        self.inner
            .sessions
            .get(&session_id)
            .map(|entry| (entry.pin, entry.commands.clone()))
    }

    /// Claims an unused PIN for a new session
    ///
    /// Random drawing handles the common case; once the space gets crowded
    /// enough for repeated collisions, an exhaustive sweep from a random
    /// offset either finds a free PIN or proves saturation.
    fn allocate_pin(&self, session_id: SessionId) -> Result<GamePin, CreateError> {
        const RANDOM_ATTEMPTS: usize = 32;

        for _ in 0..RANDOM_ATTEMPTS {
            let pin = GamePin::random();
            if self.try_claim(pin, session_id) {
                return Ok(pin);
            }
        }

        let offset = fastrand::usize(0..GamePin::SPACE);
        for step in 0..GamePin::SPACE {
            let Some(pin) = GamePin::from_index((offset + step) % GamePin::SPACE) else {
                continue;
            };
            if self.try_claim(pin, session_id) {
                return Ok(pin);
            }
        }

        Err(CreateError::RegistryExhausted)
    }

    fn try_claim(&self, pin: GamePin, session_id: SessionId) -> bool {
        match self.inner.pins.entry(pin) {
            Entry::Vacant(entry) => {
                entry.insert(session_id);
                true
            }
            Entry::Occupied(_) => false,
        }
    }
}
