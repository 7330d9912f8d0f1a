//! Configuration constants for the QuizWhiz game system
//!
//! This module contains all the configuration limits and constraints
//! used throughout the live game engine to ensure data integrity and
//! provide consistent boundaries for different components.

/// Quiz definition constants
pub mod quiz {
    /// Maximum number of questions allowed in a single quiz
    pub const MAX_QUESTION_COUNT: usize = 100;
    /// Maximum length of a quiz title in characters
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum length of a question text in characters
    pub const MAX_QUESTION_LENGTH: usize = 200;
    /// Minimum number of choices for a question
    pub const MIN_CHOICE_COUNT: usize = 2;
    /// Maximum number of choices for a question
    pub const MAX_CHOICE_COUNT: usize = 8;
    /// Maximum length of a choice text in characters
    pub const MAX_CHOICE_LENGTH: usize = 200;
    /// Minimum time limit in seconds for answering a question
    pub const MIN_TIME_LIMIT: u64 = 5;
    /// Maximum time limit in seconds for answering a question
    pub const MAX_TIME_LIMIT: u64 = 240;
}

/// Live session constants
pub mod session {
    use std::time::Duration;

    /// Maximum number of players allowed in a single game session
    pub const MAX_PLAYER_COUNT: usize = 1000;
    /// Maximum length of a player name in characters
    pub const MAX_NAME_LENGTH: usize = 30;
    /// Maximum number of entries sent in roster and leaderboard payloads
    pub const DISPLAY_LIMIT: usize = 50;
    /// Interval between time-remaining ticks while a question is open
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
    /// How long a session may sit in the lobby without activity before it
    /// is shut down and its PIN released
    pub const LOBBY_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
}
