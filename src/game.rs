//! Core game logic and state management
//!
//! This module contains the session state machine: the authoritative owner
//! of one live game's phase, question cursor, player roster, and answer
//! records. All commands (host controls, player joins and answers, timer
//! expiry) funnel through the [`Game`] methods, which validate guards,
//! mutate state synchronously, and emit events to every connected
//! participant through their tunnels.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use indexmap::IndexMap;
use itertools::Itertools;
use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

use super::{
    TruncatedVec,
    leaderboard::{Leaderboard, ScoreMessage},
    quiz::{Choice, ChoiceId, Quiz},
    scoring,
    session::Tunnel,
    watcher::{self, Id, Role, Watchers},
};

/// Represents the current phase of the game
///
/// A session starts in the lobby, cycles through question, reveal, and
/// leaderboard for every quiz question, and ends in the terminal finished
/// phase.
#[derive(Debug)]
pub enum Phase {
    /// Waiting for players to join before the game starts
    Lobby,
    /// A question is open for answers
    Question(CurrentQuestion),
    /// The correct choice and answer distribution of the question at the
    /// given index are on display
    Reveal(usize),
    /// Standings after the question at the given index are on display
    Leaderboard(usize),
    /// Game has completed
    Finished,
}

/// The discriminant of [`Phase`], without runtime data
///
/// Used in guard-failure errors and for phase checks that do not need the
/// question state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display,
)]
pub enum PhaseKind {
    /// Waiting for players
    #[display("lobby")]
    Lobby,
    /// A question is open
    #[display("question")]
    Question,
    /// Correct answer on display
    #[display("reveal")]
    Reveal,
    /// Standings on display
    #[display("leaderboard")]
    Leaderboard,
    /// Terminal phase
    #[display("finished")]
    Finished,
}

impl Phase {
    /// Returns the kind of this phase without the associated data
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Lobby => PhaseKind::Lobby,
            Phase::Question(_) => PhaseKind::Question,
            Phase::Reveal(_) => PhaseKind::Reveal,
            Phase::Leaderboard(_) => PhaseKind::Leaderboard,
            Phase::Finished => PhaseKind::Finished,
        }
    }
}

/// Runtime state of the currently open question
///
/// Only exists while the phase is `Question`; the deadline and the answer
/// window are therefore structurally tied to the phase, which keeps the
/// "deadline is set iff a question is open" invariant by construction.
#[derive(Debug)]
pub struct CurrentQuestion {
    /// Index of the open question in the quiz
    index: usize,
    /// Monotonic instant at which the question was opened
    started: Instant,
    /// Monotonic instant at which the answer window closes
    deadline: Instant,
    /// Answers accepted so far, at most one per player
    answers: HashMap<Id, AnswerRecord>,
}

/// One player's recorded answer to one question
///
/// Written exactly once per question; an absent choice represents "no answer
/// submitted by the deadline". Points are computed at acceptance time and
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    /// The selected choice, or `None` if the deadline passed unanswered
    pub choice: Option<ChoiceId>,
    /// Time from question start to submission, clamped to the time limit
    pub elapsed: Duration,
    /// Points awarded for this answer
    pub points: u64,
}

/// A player's roster entry
///
/// Roster entries are created on join and never removed mid-session, so the
/// leaderboard stays meaningful across disconnects. Scores live in the
/// [`Leaderboard`]; the entry holds identity and answer history.
#[derive(Debug)]
struct Player {
    /// Host-visible display name, not required to be unique
    name: String,
    /// One record per closed question, in question order
    answers: Vec<AnswerRecord>,
}

/// Commands the game host can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostCommand {
    /// Start the game from the lobby
    Start,
    /// Advance from reveal to leaderboard, or leaderboard to the next
    /// question (or game over)
    Next,
    /// Close the open question early and reveal the correct answer
    Reveal,
    /// Terminate the session from any phase
    End,
}

impl HostCommand {
    /// The command's name as shown in guard-failure errors
    const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Next => "next",
            Self::Reveal => "reveal",
            Self::End => "end",
        }
    }
}

/// Alarm messages for timed events scheduled by the game
///
/// Scheduled when a question opens; delivered back by the timer driver when
/// the deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// The answer window of the question at `index` has closed
    QuestionDeadline {
        /// Index of the question the deadline belongs to
        index: usize,
    },
}

/// Errors produced by rejected commands
///
/// Every rejection is local to the issuing command and leaves the session
/// state unchanged; rejections are reported to the issuer only, never
/// broadcast.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The command referenced a player unknown to this session
    #[error("unknown player")]
    NotFound,
    /// A transition guard failed; the phase remains unchanged
    #[error("{command} is not allowed during {phase}")]
    InvalidTransition {
        /// Phase the session was in when the command arrived
        phase: PhaseKind,
        /// The rejected command
        command: &'static str,
    },
    /// A second answer was submitted for the same question index
    #[error("an answer for this question was already recorded")]
    DuplicateAnswer {
        /// Points originally awarded, unchanged by this rejection
        points: u64,
    },
    /// The join request carried an empty name
    #[error("player name cannot be empty")]
    EmptyName,
    /// The join request carried a name longer than the allowed maximum
    #[error("player name is too long")]
    NameTooLong,
    /// The join request carried an inappropriate name
    #[error("player name is not allowed")]
    InappropriateName,
    /// The session cannot take more participants
    #[error(transparent)]
    Watcher(#[from] watcher::Error),
}

/// A roster entry as sent to clients
#[derive(Debug, Serialize, Clone)]
pub struct RosterEntry {
    /// The player's display name
    pub name: String,
    /// Whether the player currently has an active connection
    pub connected: bool,
}

/// A ranked standings entry as sent to clients
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RankedPlayer {
    /// The player's display name
    pub name: String,
    /// The player's total score
    pub score: u64,
}

/// Submission count for one answer choice, sent in reveal payloads
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ChoiceTally {
    /// The choice being counted
    pub choice: ChoiceId,
    /// Number of players who selected it
    pub count: usize,
}

/// Update messages sent to participants about committed state changes
///
/// The broadcast channel only ever carries successful transitions; guard
/// failures surface as [`Error`] to the issuer (and an [`UpdateMessage::Error`]
/// notice unicast by the runtime).
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// The lobby roster changed
    RosterUpdate(TruncatedVec<RosterEntry>),
    /// A question opened for answers
    QuestionStart {
        /// 1-indexed number of the question
        question_number: usize,
        /// Total number of questions in the quiz
        total_questions: usize,
        /// The question text
        text: String,
        /// The answer choices, in display order
        choices: Vec<Choice>,
        /// Length of the answer window
        #[serde_as(as = "serde_with::DurationSeconds<u64>")]
        #[serde(rename = "time_limit_seconds")]
        time_limit: Duration,
        /// Optional media shown alongside the question
        media_url: Option<String>,
    },
    /// Periodic countdown while a question is open
    TimeTick {
        /// Whole seconds remaining in the answer window
        seconds_left: u64,
    },
    /// (SUBMITTER ONLY) An answer was accepted
    AnswerAck {
        /// Points earned by the submission
        points: u64,
    },
    /// (HOST ONLY) Number of players who have answered so far
    AnswerCount(usize),
    /// The open question closed; correct choice and distribution
    Reveal {
        /// Id of the correct choice
        correct_choice: ChoiceId,
        /// Submission counts per choice, in display order
        counts: Vec<ChoiceTally>,
        /// Number of players who did not answer
        unanswered: usize,
    },
    /// Standings after the just-revealed question
    Leaderboard {
        /// Ranked roster, descending by score, join order on ties
        standings: TruncatedVec<RankedPlayer>,
    },
    /// The game finished
    GameOver {
        /// Final ranked roster
        standings: TruncatedVec<RankedPlayer>,
    },
    /// (ISSUER ONLY) A command was rejected
    Error {
        /// Human-readable description of the rejection
        message: String,
    },
}

/// Sync messages carrying a full snapshot of the current phase
///
/// Sent to participants when they connect or reconnect mid-session; a
/// resynchronized client receives the current phase's payload rather than a
/// replay of historical events.
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// Session is in the lobby
    Lobby {
        /// Current roster
        players: TruncatedVec<RosterEntry>,
    },
    /// A question is open
    Question {
        /// 1-indexed number of the question
        question_number: usize,
        /// Total number of questions in the quiz
        total_questions: usize,
        /// The question text
        text: String,
        /// The answer choices, in display order
        choices: Vec<Choice>,
        /// Time remaining in the answer window
        #[serde_as(as = "serde_with::DurationSeconds<u64>")]
        #[serde(rename = "seconds_left")]
        time_left: Duration,
        /// Optional media shown alongside the question
        media_url: Option<String>,
        /// Number of players who have already answered
        answered_count: usize,
    },
    /// The correct answer is on display
    Reveal {
        /// 1-indexed number of the revealed question
        question_number: usize,
        /// Total number of questions in the quiz
        total_questions: usize,
        /// Id of the correct choice
        correct_choice: ChoiceId,
        /// Submission counts per choice, in display order
        counts: Vec<ChoiceTally>,
        /// Number of players who did not answer
        unanswered: usize,
    },
    /// Standings are on display
    Leaderboard {
        /// 1-indexed number of the last closed question
        question_number: usize,
        /// Total number of questions in the quiz
        total_questions: usize,
        /// Ranked roster
        standings: TruncatedVec<RankedPlayer>,
        /// The recipient's own score and position (players only)
        score: Option<ScoreMessage>,
    },
    /// The game finished
    GameOver {
        /// Final ranked roster
        standings: TruncatedVec<RankedPlayer>,
        /// The recipient's own score and position (players only)
        score: Option<ScoreMessage>,
    },
}

/// The session state machine
///
/// Owns one session's phase, question cursor, roster, and answer records.
/// All methods mutate synchronously and never block; callers are expected to
/// serialize invocations through a single execution context per session (the
/// runtime layer runs one task per session). The monotonic `now` instants
/// are read by the caller at command acceptance time, never parsed from
/// client input.
#[derive(Debug)]
pub struct Game {
    /// The immutable quiz definition being played
    quiz: Quiz,
    /// Participant roles and connection fan-out
    pub watchers: Watchers,
    /// Player roster in join order
    players: IndexMap<Id, Player>,
    /// Cumulative scoring across questions
    pub leaderboard: Leaderboard,
    /// Current phase of the session
    phase: Phase,
}

impl Game {
    /// Creates a new game session in the lobby phase
    pub fn new(quiz: Quiz, host_id: Id) -> Self {
        Self {
            quiz,
            watchers: Watchers::with_host_id(host_id),
            players: IndexMap::new(),
            leaderboard: Leaderboard::default(),
            phase: Phase::Lobby,
        }
    }

    /// Returns the kind of the current phase
    pub fn phase_kind(&self) -> PhaseKind {
        self.phase.kind()
    }

    /// Returns the quiz definition being played
    pub fn quiz(&self) -> &Quiz {
        &self.quiz
    }

    /// Returns the number of players in the roster
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Returns a player's display name
    pub fn player_name(&self, player_id: Id) -> Option<&str> {
        self.players.get(&player_id).map(|p| p.name.as_str())
    }

    /// Returns a player's cumulative score
    ///
    /// Equals the sum of points awarded across the player's recorded
    /// answers; it never decreases over the lifetime of a session.
    pub fn player_score(&self, player_id: Id) -> u64 {
        self.leaderboard.total(player_id)
    }

    /// Returns a player's recorded answers, one per closed question
    pub fn player_answers(&self, player_id: Id) -> Option<&[AnswerRecord]> {
        self.players.get(&player_id).map(|p| p.answers.as_slice())
    }

    /// Returns the deadline of the open question, if one is open
    ///
    /// The timer driver reads this to arm its countdown.
    pub fn question_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Question(current) => Some(current.deadline),
            _ => None,
        }
    }

    /// Adds a player to the session
    ///
    /// Only accepted while the session is in the lobby. The updated roster
    /// is broadcast to every participant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] outside the lobby, a name
    /// validation error for empty, oversized, or inappropriate names, and
    /// [`watcher::Error::MaximumPlayers`] when the session is full.
    pub fn join<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player_id: Id,
        name: &str,
        tunnel_finder: F,
    ) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Lobby) {
            return Err(Error::InvalidTransition {
                phase: self.phase.kind(),
                command: "join",
            });
        }

        let name = validate_name(name)?;
        self.watchers.add_watcher(player_id, Role::Player)?;
        self.players.insert(
            player_id,
            Player {
                name,
                answers: Vec::new(),
            },
        );

        self.announce_roster(&tunnel_finder);
        Ok(())
    }

    /// Processes a host command
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when the command's guard fails;
    /// the phase is left unchanged.
    pub fn host_command<T, F, S>(
        &mut self,
        command: HostCommand,
        now: Instant,
        mut schedule: S,
        tunnel_finder: F,
    ) -> Result<(), Error>
    where
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    {
        match command {
            HostCommand::Start => self.start(now, &mut schedule, &tunnel_finder),
            HostCommand::Next => self.next(now, &mut schedule, &tunnel_finder),
            HostCommand::Reveal => self.reveal(command, &tunnel_finder),
            HostCommand::End => {
                if !matches!(self.phase, Phase::Finished) {
                    self.finish(&tunnel_finder);
                }
                Ok(())
            }
        }
    }

    /// Records a player's answer to the open question
    ///
    /// The answer is scored immediately from the monotonic acceptance time
    /// and acknowledged to the submitter with the points earned; the host is
    /// informed of the updated answer count. Returns the points awarded.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] for a player not in the roster.
    /// * [`Error::InvalidTransition`] when no question is open, the index
    ///   does not match the open question, or the deadline has passed.
    /// * [`Error::DuplicateAnswer`] when the player already answered; the
    ///   originally recorded points are carried in the error and unchanged.
    pub fn submit_answer<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player_id: Id,
        question_index: usize,
        choice: ChoiceId,
        now: Instant,
        tunnel_finder: F,
    ) -> Result<u64, Error> {
        if !self.players.contains_key(&player_id) {
            return Err(Error::NotFound);
        }

        let phase = self.phase.kind();
        let (points, answered_count) = {
            let Phase::Question(current) = &mut self.phase else {
                return Err(Error::InvalidTransition {
                    phase,
                    command: "answer",
                });
            };

            if current.index != question_index || now >= current.deadline {
                return Err(Error::InvalidTransition {
                    phase,
                    command: "answer",
                });
            }

            if let Some(existing) = current.answers.get(&player_id) {
                return Err(Error::DuplicateAnswer {
                    points: existing.points,
                });
            }

            let question = &self.quiz.questions[current.index];
            let elapsed = now
                .saturating_duration_since(current.started)
                .min(question.time_limit);
            let points = scoring::score(question, Some(&choice), elapsed);

            current.answers.insert(
                player_id,
                AnswerRecord {
                    choice: Some(choice),
                    elapsed,
                    points,
                },
            );

            (points, current.answers.len())
        };

        self.watchers.send_message(
            &UpdateMessage::AnswerAck { points },
            player_id,
            &tunnel_finder,
        );
        self.watchers.announce_specific(
            Role::Host,
            &UpdateMessage::AnswerCount(answered_count),
            &tunnel_finder,
        );

        Ok(points)
    }

    /// Handles a scheduled alarm from the timer driver
    ///
    /// The alarm carries the index of the question it was armed for; if the
    /// phase has already moved on (manual reveal won the race, or the game
    /// ended) the alarm is a no-op.
    pub fn receive_alarm<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        message: AlarmMessage,
        tunnel_finder: F,
    ) {
        let AlarmMessage::QuestionDeadline { index } = message;
        if matches!(&self.phase, Phase::Question(current) if current.index == index) {
            self.close_question(&tunnel_finder);
        }
    }

    /// Broadcasts the time remaining on the open question
    ///
    /// A no-op outside the question phase; the driver calls this once per
    /// tick interval.
    pub fn broadcast_tick<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        now: Instant,
        tunnel_finder: F,
    ) {
        if let Phase::Question(current) = &self.phase {
            let seconds_left = current
                .deadline
                .saturating_duration_since(now)
                .as_secs_f64()
                .ceil() as u64;
            self.watchers
                .announce(&UpdateMessage::TimeTick { seconds_left }, &tunnel_finder);
        }
    }

    /// Broadcasts the current roster to every participant
    pub fn announce_roster<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) {
        self.watchers.announce(
            &UpdateMessage::RosterUpdate(self.roster(&tunnel_finder)),
            &tunnel_finder,
        );
    }

    /// Sends a participant the full snapshot of the current phase
    ///
    /// Used to (re)synchronize a client that connected mid-session.
    pub fn sync<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        now: Instant,
        tunnel_finder: F,
    ) {
        let Some(role) = self.watchers.role(watcher_id) else {
            return;
        };
        self.watchers.send_state(
            &self.sync_message(watcher_id, role, now, &tunnel_finder),
            watcher_id,
            &tunnel_finder,
        );
    }

    /// Builds the snapshot of the current phase for one participant
    pub fn sync_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        role: Role,
        now: Instant,
        tunnel_finder: &F,
    ) -> SyncMessage {
        match &self.phase {
            Phase::Lobby => SyncMessage::Lobby {
                players: self.roster(tunnel_finder),
            },
            Phase::Question(current) => {
                let question = &self.quiz.questions[current.index];
                SyncMessage::Question {
                    question_number: current.index + 1,
                    total_questions: self.quiz.len(),
                    text: question.text.clone(),
                    choices: question.choices.clone(),
                    time_left: current.deadline.saturating_duration_since(now),
                    media_url: question.media_url.clone(),
                    answered_count: current.answers.len(),
                }
            }
            Phase::Reveal(index) => {
                let (counts, unanswered) = self.recorded_tally(*index);
                SyncMessage::Reveal {
                    question_number: *index + 1,
                    total_questions: self.quiz.len(),
                    correct_choice: self.quiz.questions[*index].correct_choice.clone(),
                    counts,
                    unanswered,
                }
            }
            Phase::Leaderboard(index) => SyncMessage::Leaderboard {
                question_number: *index + 1,
                total_questions: self.quiz.len(),
                standings: self.standings(),
                score: self.own_score(watcher_id, role),
            },
            Phase::Finished => SyncMessage::GameOver {
                standings: self.standings(),
                score: self.own_score(watcher_id, role),
            },
        }
    }

    /// Starts the game from the lobby
    fn start<T, F, S>(&mut self, now: Instant, schedule: &mut S, tunnel_finder: &F) -> Result<(), Error>
    where
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    {
        if !matches!(self.phase, Phase::Lobby) || self.players.is_empty() {
            return Err(Error::InvalidTransition {
                phase: self.phase.kind(),
                command: HostCommand::Start.name(),
            });
        }

        self.begin_question(0, now, schedule, tunnel_finder);
        Ok(())
    }

    /// Closes the open question early on the host's request
    fn reveal<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        command: HostCommand,
        tunnel_finder: &F,
    ) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Question(_)) {
            return Err(Error::InvalidTransition {
                phase: self.phase.kind(),
                command: command.name(),
            });
        }

        self.close_question(tunnel_finder);
        Ok(())
    }

    /// Advances from reveal to leaderboard, or leaderboard onwards
    fn next<T, F, S>(&mut self, now: Instant, schedule: &mut S, tunnel_finder: &F) -> Result<(), Error>
    where
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    {
        match &self.phase {
            Phase::Reveal(index) => {
                let index = *index;
                self.phase = Phase::Leaderboard(index);
                self.watchers.announce(
                    &UpdateMessage::Leaderboard {
                        standings: self.standings(),
                    },
                    tunnel_finder,
                );
                Ok(())
            }
            Phase::Leaderboard(index) => {
                let next_index = *index + 1;
                if next_index < self.quiz.len() {
                    self.begin_question(next_index, now, schedule, tunnel_finder);
                } else {
                    self.finish(tunnel_finder);
                }
                Ok(())
            }
            _ => Err(Error::InvalidTransition {
                phase: self.phase.kind(),
                command: HostCommand::Next.name(),
            }),
        }
    }

    /// Opens the question at `index` and schedules its deadline alarm
    fn begin_question<T, F, S>(
        &mut self,
        index: usize,
        now: Instant,
        schedule: &mut S,
        tunnel_finder: &F,
    ) where
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(AlarmMessage, Duration),
    {
        let question = &self.quiz.questions[index];

        self.phase = Phase::Question(CurrentQuestion {
            index,
            started: now,
            deadline: now + question.time_limit,
            answers: HashMap::new(),
        });

        self.watchers.announce(
            &UpdateMessage::QuestionStart {
                question_number: index + 1,
                total_questions: self.quiz.len(),
                text: question.text.clone(),
                choices: question.choices.clone(),
                time_limit: question.time_limit,
                media_url: question.media_url.clone(),
            },
            tunnel_finder,
        );

        schedule(AlarmMessage::QuestionDeadline { index }, question.time_limit);
    }

    /// Closes the open question: freezes unanswered slots, folds scores into
    /// the leaderboard, and broadcasts the reveal payload
    fn close_question<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: &F) {
        let (index, mut answers) = match &mut self.phase {
            Phase::Question(current) => (current.index, std::mem::take(&mut current.answers)),
            _ => return,
        };

        let question = &self.quiz.questions[index];

        let answer_counts = answers
            .values()
            .filter_map(|record| record.choice.as_ref())
            .counts();
        let counts = question
            .choices
            .iter()
            .map(|choice| ChoiceTally {
                choice: choice.id.clone(),
                count: *answer_counts.get(&choice.id).unwrap_or(&0),
            })
            .collect_vec();
        let unanswered = self.players.len() - answers.len();

        let mut scores = Vec::with_capacity(self.players.len());
        for (id, player) in &mut self.players {
            let record = answers.remove(id).unwrap_or(AnswerRecord {
                choice: None,
                elapsed: question.time_limit,
                points: 0,
            });
            scores.push((*id, record.points));
            player.answers.push(record);
        }
        self.leaderboard.record_question(scores);

        self.phase = Phase::Reveal(index);
        self.watchers.announce(
            &UpdateMessage::Reveal {
                correct_choice: question.correct_choice.clone(),
                counts,
                unanswered,
            },
            tunnel_finder,
        );
    }

    /// Moves to the terminal phase and broadcasts the final standings
    fn finish<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: &F) {
        self.phase = Phase::Finished;
        self.watchers.announce(
            &UpdateMessage::GameOver {
                standings: self.standings(),
            },
            tunnel_finder,
        );
    }

    /// Builds the current roster payload
    fn roster<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        tunnel_finder: &F,
    ) -> TruncatedVec<RosterEntry> {
        TruncatedVec::new(
            self.players.iter().map(|(id, player)| RosterEntry {
                name: player.name.clone(),
                connected: Watchers::is_alive(*id, tunnel_finder),
            }),
            crate::constants::session::DISPLAY_LIMIT,
            self.players.len(),
        )
    }

    /// Builds the ranked standings payload
    ///
    /// Descending by score; players with equal scores keep their join order.
    fn standings(&self) -> TruncatedVec<RankedPlayer> {
        let ranked = self.leaderboard.ranked(self.players.keys().copied());
        let total = ranked.len();
        TruncatedVec::new(
            ranked.into_iter().map(|(id, score)| RankedPlayer {
                name: self
                    .players
                    .get(&id)
                    .map_or_else(|| "Unknown".to_owned(), |p| p.name.clone()),
                score,
            }),
            crate::constants::session::DISPLAY_LIMIT,
            total,
        )
    }

    /// Recomputes the tally of a closed question from recorded answers
    ///
    /// Used for reveal-phase resyncs, where the live tally computed at close
    /// time is no longer at hand.
    fn recorded_tally(&self, index: usize) -> (Vec<ChoiceTally>, usize) {
        let question = &self.quiz.questions[index];
        let answer_counts = self
            .players
            .values()
            .filter_map(|player| player.answers.get(index))
            .filter_map(|record| record.choice.as_ref())
            .counts();
        let counts = question
            .choices
            .iter()
            .map(|choice| ChoiceTally {
                choice: choice.id.clone(),
                count: *answer_counts.get(&choice.id).unwrap_or(&0),
            })
            .collect_vec();
        let unanswered = self
            .players
            .values()
            .filter(|player| {
                player
                    .answers
                    .get(index)
                    .is_none_or(|record| record.choice.is_none())
            })
            .count();
        (counts, unanswered)
    }

    /// A player's own score and position, `None` for the host
    fn own_score(&self, watcher_id: Id, role: Role) -> Option<ScoreMessage> {
        match role {
            Role::Player => self
                .leaderboard
                .score(watcher_id, self.players.keys().copied()),
            Role::Host => None,
        }
    }
}

/// Validates a player's requested display name
fn validate_name(name: &str) -> Result<String, Error> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    if name.chars().count() > crate::constants::session::MAX_NAME_LENGTH {
        return Err(Error::NameTooLong);
    }
    if name.is_inappropriate() {
        return Err(Error::InappropriateName);
    }
    Ok(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::Question;
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    #[derive(Debug, Clone, Default)]
    struct MockTunnel {
        messages: Arc<Mutex<Vec<UpdateMessage>>>,
        states: Arc<Mutex<Vec<SyncMessage>>>,
    }

    impl MockTunnel {
        fn updates(&self) -> Vec<UpdateMessage> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &UpdateMessage) {
            self.messages.lock().unwrap().push(message.clone());
        }

        fn send_state(&self, state: &SyncMessage) {
            self.states.lock().unwrap().push(state.clone());
        }

        fn close(self) {}
    }

    fn question(text: &str, correct: &str) -> Question {
        Question {
            text: text.to_string(),
            choices: vec![
                Choice {
                    id: ChoiceId::new("a"),
                    text: "Option A".to_string(),
                },
                Choice {
                    id: ChoiceId::new("b"),
                    text: "Option B".to_string(),
                },
            ],
            correct_choice: ChoiceId::new(correct),
            time_limit: Duration::from_secs(30),
            base_points: 1000,
            media_url: None,
        }
    }

    fn two_question_quiz() -> Quiz {
        Quiz {
            title: "Capitals".to_string(),
            questions: vec![question("First?", "a"), question("Second?", "b")],
        }
    }

    struct Harness {
        game: Game,
        host_id: Id,
        tunnels: HashMap<Id, MockTunnel>,
        alarms: Vec<(AlarmMessage, Duration)>,
    }

    impl Harness {
        fn new() -> Self {
            let host_id = Id::new();
            let mut tunnels = HashMap::new();
            tunnels.insert(host_id, MockTunnel::default());
            Self {
                game: Game::new(two_question_quiz(), host_id),
                host_id,
                tunnels,
                alarms: Vec::new(),
            }
        }

        fn finder(&self) -> impl Fn(Id) -> Option<MockTunnel> + 'static {
            let tunnels = self.tunnels.clone();
            move |id| tunnels.get(&id).cloned()
        }

        fn join(&mut self, name: &str) -> Id {
            let id = Id::new();
            self.tunnels.insert(id, MockTunnel::default());
            let finder = self.finder();
            self.game.join(id, name, finder).unwrap();
            id
        }

        fn host(&mut self, command: HostCommand, now: Instant) -> Result<(), Error> {
            let finder = self.finder();
            let alarms = &mut self.alarms;
            self.game
                .host_command(command, now, |alarm, after| alarms.push((alarm, after)), finder)
        }

        fn answer(&mut self, player: Id, index: usize, choice: &str, now: Instant) -> Result<u64, Error> {
            let finder = self.finder();
            self.game
                .submit_answer(player, index, ChoiceId::new(choice), now, finder)
        }

        fn fire_deadline(&mut self, index: usize) {
            let finder = self.finder();
            self.game
                .receive_alarm(AlarmMessage::QuestionDeadline { index }, finder);
        }

        fn tunnel(&self, id: Id) -> &MockTunnel {
            &self.tunnels[&id]
        }
    }

    #[test]
    fn test_join_adds_to_roster_and_broadcasts() {
        let mut harness = Harness::new();
        let player = harness.join("Ada");

        assert_eq!(harness.game.player_count(), 1);
        assert_eq!(harness.game.player_name(player), Some("Ada"));
        assert!(harness
            .tunnel(harness.host_id)
            .updates()
            .iter()
            .any(|m| matches!(m, UpdateMessage::RosterUpdate(_))));
    }

    #[test]
    fn test_join_rejected_outside_lobby() {
        let mut harness = Harness::new();
        harness.join("Ada");
        harness.host(HostCommand::Start, Instant::now()).unwrap();

        let late = Id::new();
        let finder = harness.finder();
        let result = harness.game.join(late, "Late", finder);
        assert_eq!(
            result,
            Err(Error::InvalidTransition {
                phase: PhaseKind::Question,
                command: "join",
            })
        );
        assert_eq!(harness.game.player_count(), 1);
    }

    #[test]
    fn test_join_rejects_blank_names() {
        let mut harness = Harness::new();
        let finder = harness.finder();
        assert_eq!(
            harness.game.join(Id::new(), "   ", finder),
            Err(Error::EmptyName)
        );
    }

    #[test]
    fn test_start_requires_a_player() {
        let mut harness = Harness::new();
        let result = harness.host(HostCommand::Start, Instant::now());

        assert_eq!(
            result,
            Err(Error::InvalidTransition {
                phase: PhaseKind::Lobby,
                command: "start",
            })
        );
        assert_eq!(harness.game.phase_kind(), PhaseKind::Lobby);
    }

    #[test]
    fn test_start_opens_first_question_and_schedules_deadline() {
        let mut harness = Harness::new();
        let player = harness.join("Ada");
        harness.host(HostCommand::Start, Instant::now()).unwrap();

        assert_eq!(harness.game.phase_kind(), PhaseKind::Question);
        assert_eq!(
            harness.alarms,
            vec![(
                AlarmMessage::QuestionDeadline { index: 0 },
                Duration::from_secs(30)
            )]
        );
        assert!(harness
            .tunnel(player)
            .updates()
            .iter()
            .any(|m| matches!(
                m,
                UpdateMessage::QuestionStart {
                    question_number: 1,
                    total_questions: 2,
                    ..
                }
            )));
    }

    #[test]
    fn test_scoring_scenario_ranks_by_latency() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let brian = harness.join("Brian");
        let casey = harness.join("Casey");

        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        assert_eq!(harness.answer(ada, 0, "a", start), Ok(1000));
        assert_eq!(
            harness.answer(brian, 0, "a", start + Duration::from_secs(15)),
            Ok(500)
        );

        harness.fire_deadline(0);
        assert_eq!(harness.game.phase_kind(), PhaseKind::Reveal);

        harness.host(HostCommand::Next, start).unwrap();
        assert_eq!(harness.game.phase_kind(), PhaseKind::Leaderboard);

        let leaderboard = harness
            .tunnel(casey)
            .updates()
            .into_iter()
            .find_map(|m| match m {
                UpdateMessage::Leaderboard { standings } => Some(standings),
                _ => None,
            })
            .expect("leaderboard broadcast");
        let names: Vec<_> = leaderboard.items().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["Ada", "Brian", "Casey"]);
        assert_eq!(
            leaderboard.items().iter().map(|p| p.score).collect::<Vec<_>>(),
            vec![1000, 500, 0]
        );
    }

    #[test]
    fn test_answer_after_expiry_is_rejected() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        harness.fire_deadline(0);

        let result = harness.answer(ada, 0, "a", start + Duration::from_secs(31));
        assert_eq!(
            result,
            Err(Error::InvalidTransition {
                phase: PhaseKind::Reveal,
                command: "answer",
            })
        );
        assert_eq!(harness.game.player_score(ada), 0);
    }

    #[test]
    fn test_answer_past_deadline_in_question_phase_is_rejected() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        // Deadline reached but the alarm has not fired yet.
        let result = harness.answer(ada, 0, "a", start + Duration::from_secs(30));
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(harness.game.phase_kind(), PhaseKind::Question);
    }

    #[test]
    fn test_duplicate_answer_keeps_original_points() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        assert_eq!(harness.answer(ada, 0, "a", start), Ok(1000));
        assert_eq!(
            harness.answer(ada, 0, "b", start + Duration::from_secs(5)),
            Err(Error::DuplicateAnswer { points: 1000 })
        );

        harness.fire_deadline(0);
        assert_eq!(harness.game.player_score(ada), 1000);
        assert_eq!(
            harness.game.player_answers(ada).unwrap()[0].choice,
            Some(ChoiceId::new("a"))
        );
    }

    #[test]
    fn test_answer_for_wrong_index_is_rejected() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        assert!(matches!(
            harness.answer(ada, 1, "a", start),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_answer_from_unknown_player_is_rejected() {
        let mut harness = Harness::new();
        harness.join("Ada");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        assert_eq!(
            harness.answer(Id::new(), 0, "a", start),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_reveal_closes_question_with_tally() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        harness.join("Brian");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();
        harness.answer(ada, 0, "b", start).unwrap();

        harness.host(HostCommand::Reveal, start).unwrap();

        let reveal = harness
            .tunnel(harness.host_id)
            .updates()
            .into_iter()
            .find_map(|m| match m {
                UpdateMessage::Reveal {
                    correct_choice,
                    counts,
                    unanswered,
                } => Some((correct_choice, counts, unanswered)),
                _ => None,
            })
            .expect("reveal broadcast");

        assert_eq!(reveal.0, ChoiceId::new("a"));
        assert_eq!(
            reveal.1,
            vec![
                ChoiceTally {
                    choice: ChoiceId::new("a"),
                    count: 0
                },
                ChoiceTally {
                    choice: ChoiceId::new("b"),
                    count: 1
                },
            ]
        );
        assert_eq!(reveal.2, 1);
    }

    #[test]
    fn test_expire_then_manual_reveal_race_is_rejected_quietly() {
        let mut harness = Harness::new();
        harness.join("Ada");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        harness.fire_deadline(0);
        assert_eq!(harness.game.phase_kind(), PhaseKind::Reveal);

        // The losing side of the race has no effect on state.
        let result = harness.host(HostCommand::Reveal, start);
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(harness.game.phase_kind(), PhaseKind::Reveal);

        // A stale alarm for the same question is silently ignored.
        harness.fire_deadline(0);
        assert_eq!(harness.game.phase_kind(), PhaseKind::Reveal);
    }

    #[test]
    fn test_full_path_through_two_questions() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();

        harness.host(HostCommand::Start, start).unwrap();
        harness.answer(ada, 0, "a", start).unwrap();
        harness.fire_deadline(0);
        harness.host(HostCommand::Next, start).unwrap();
        assert_eq!(harness.game.phase_kind(), PhaseKind::Leaderboard);

        harness.host(HostCommand::Next, start).unwrap();
        assert_eq!(harness.game.phase_kind(), PhaseKind::Question);

        harness.answer(ada, 1, "b", start + Duration::from_secs(40)).unwrap_err();
        harness.fire_deadline(1);
        harness.host(HostCommand::Next, start).unwrap();
        harness.host(HostCommand::Next, start).unwrap();
        assert_eq!(harness.game.phase_kind(), PhaseKind::Finished);

        assert!(harness
            .tunnel(ada)
            .updates()
            .iter()
            .any(|m| matches!(m, UpdateMessage::GameOver { .. })));

        // Score survives to the end and equals the sum of recorded answers.
        assert_eq!(harness.game.player_score(ada), 1000);
        let answers = harness.game.player_answers(ada).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers.iter().map(|a| a.points).sum::<u64>(), 1000);
    }

    #[test]
    fn test_deadline_exists_exactly_while_question_is_open() {
        let mut harness = Harness::new();
        harness.join("Ada");
        let start = Instant::now();

        assert_eq!(harness.game.question_deadline(), None);

        harness.host(HostCommand::Start, start).unwrap();
        let limit = harness.game.quiz().questions[0].time_limit;
        assert_eq!(harness.game.question_deadline(), Some(start + limit));

        harness.fire_deadline(0);
        assert_eq!(harness.game.question_deadline(), None);
    }

    #[test]
    fn test_host_end_terminates_from_any_phase() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();

        harness.host(HostCommand::End, start).unwrap();
        assert_eq!(harness.game.phase_kind(), PhaseKind::Finished);
        assert!(harness
            .tunnel(ada)
            .updates()
            .iter()
            .any(|m| matches!(m, UpdateMessage::GameOver { .. })));

        // Ending an already finished game is a harmless no-op.
        harness.host(HostCommand::End, start).unwrap();
    }

    #[test]
    fn test_tick_broadcast_only_during_question() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();

        let finder = harness.finder();
        harness.game.broadcast_tick(start, &finder);
        assert!(!harness
            .tunnel(ada)
            .updates()
            .iter()
            .any(|m| matches!(m, UpdateMessage::TimeTick { .. })));

        harness.host(HostCommand::Start, start).unwrap();
        harness
            .game
            .broadcast_tick(start + Duration::from_secs(10), &finder);

        assert!(harness.tunnel(ada).updates().iter().any(
            |m| matches!(m, UpdateMessage::TimeTick { seconds_left: 20 })
        ));
    }

    #[test]
    fn test_sync_reflects_each_phase() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        let start = Instant::now();
        let finder = harness.finder();

        assert!(matches!(
            harness.game.sync_message(ada, Role::Player, start, &finder),
            SyncMessage::Lobby { .. }
        ));

        harness.host(HostCommand::Start, start).unwrap();
        let sync = harness
            .game
            .sync_message(ada, Role::Player, start + Duration::from_secs(12), &finder);
        match sync {
            SyncMessage::Question {
                question_number,
                time_left,
                answered_count,
                ..
            } => {
                assert_eq!(question_number, 1);
                assert_eq!(time_left, Duration::from_secs(18));
                assert_eq!(answered_count, 0);
            }
            other => panic!("expected question sync, got {other:?}"),
        }

        harness.answer(ada, 0, "a", start).unwrap();
        harness.fire_deadline(0);
        assert!(matches!(
            harness.game.sync_message(ada, Role::Player, start, &finder),
            SyncMessage::Reveal {
                question_number: 1,
                unanswered: 0,
                ..
            }
        ));

        harness.host(HostCommand::Next, start).unwrap();
        match harness.game.sync_message(ada, Role::Player, start, &finder) {
            SyncMessage::Leaderboard { score, .. } => {
                assert_eq!(
                    score,
                    Some(ScoreMessage {
                        points: 1000,
                        position: 1
                    })
                );
            }
            other => panic!("expected leaderboard sync, got {other:?}"),
        }

        // The host sees standings without a personal score.
        match harness
            .game
            .sync_message(harness.host_id, Role::Host, start, &finder)
        {
            SyncMessage::Leaderboard { score, .. } => assert_eq!(score, None),
            other => panic!("expected leaderboard sync, got {other:?}"),
        }
    }

    #[test]
    fn test_recorded_tally_backs_reveal_sync() {
        let mut harness = Harness::new();
        let ada = harness.join("Ada");
        harness.join("Brian");
        let start = Instant::now();
        harness.host(HostCommand::Start, start).unwrap();
        harness.answer(ada, 0, "a", start).unwrap();
        harness.fire_deadline(0);

        let finder = harness.finder();
        match harness.game.sync_message(ada, Role::Player, start, &finder) {
            SyncMessage::Reveal {
                counts, unanswered, ..
            } => {
                assert_eq!(counts[0].count, 1);
                assert_eq!(counts[1].count, 0);
                assert_eq!(unanswered, 1);
            }
            other => panic!("expected reveal sync, got {other:?}"),
        }
    }
}
