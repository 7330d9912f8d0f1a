//! Quiz definitions and the authoring-side collaborator
//!
//! This module defines the immutable quiz structures played by a game
//! session: the quiz itself, its ordered questions, and their answer
//! choices. Quizzes are produced by the authoring/storage side of QuizWhiz
//! and consumed read-only here; the [`QuizSource`] trait is the seam through
//! which the live engine obtains them.

use std::{collections::HashMap, fmt::Display, time::Duration};

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

type ValidationResult = garde::Result;

/// Validates that a duration falls within specified bounds
///
/// This helper function ensures that timing parameters for questions
/// fall within acceptable ranges as defined by the game constants.
fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    field: &'static str,
    val: &Duration,
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "{field} is outside of the bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

/// Validates the time limit for answering a question
fn validate_time_limit(val: &Duration) -> ValidationResult {
    validate_duration::<
        { crate::constants::quiz::MIN_TIME_LIMIT },
        { crate::constants::quiz::MAX_TIME_LIMIT },
    >("time_limit", val)
}

/// Stable identifier of an answer choice within its question
///
/// Choice ids are assigned by the authoring side and never reinterpreted by
/// the live engine; answer submissions and reveal payloads refer to choices
/// by this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceId(String);

impl ChoiceId {
    /// Wraps a raw authoring-side id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl Display for ChoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single answer choice presented to players
///
/// Choices carry no correctness information; which choice is correct is
/// recorded separately on the [`Question`] so that choice lists can be sent
/// to players verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Choice {
    /// Stable identifier of this choice
    #[garde(skip)]
    pub id: ChoiceId,
    /// The text displayed for this choice
    #[garde(length(max = crate::constants::quiz::MAX_CHOICE_LENGTH))]
    pub text: String,
}

/// A multiple-choice question as authored
///
/// True/false questions are ordinary questions with two choices.
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The question text displayed to all participants
    #[garde(length(max = crate::constants::quiz::MAX_QUESTION_LENGTH))]
    pub text: String,
    /// The available answer choices, in display order
    #[garde(
        length(
            min = crate::constants::quiz::MIN_CHOICE_COUNT,
            max = crate::constants::quiz::MAX_CHOICE_COUNT
        ),
        dive
    )]
    pub choices: Vec<Choice>,
    /// Id of the correct choice; must refer to an entry of `choices`
    #[garde(skip)]
    pub correct_choice: ChoiceId,
    /// Time players have to answer once the question is shown
    #[garde(custom(|v, _| validate_time_limit(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(rename = "time_limit_seconds")]
    pub time_limit: Duration,
    /// Maximum points awarded for a correct answer (decays with latency)
    #[garde(skip)]
    pub base_points: u64,
    /// Optional media shown alongside the question; passed through untouched
    #[garde(skip)]
    pub media_url: Option<String>,
}

impl Question {
    /// Looks up a choice of this question by id
    pub fn choice(&self, id: &ChoiceId) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.id == *id)
    }
}

/// A complete quiz definition: title plus ordered questions
///
/// Immutable for the lifetime of any session playing it.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Quiz {
    /// The quiz title shown in lobbies
    #[garde(length(max = crate::constants::quiz::MAX_TITLE_LENGTH))]
    pub title: String,
    /// The questions in play order
    #[garde(
        length(min = 1, max = crate::constants::quiz::MAX_QUESTION_COUNT),
        dive
    )]
    pub questions: Vec<Question>,
}

impl Quiz {
    /// Returns the number of questions in this quiz
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Checks whether this quiz contains any questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Checks referential integrity beyond what field-level validation covers
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCorrectChoice`] if any question's
    /// `correct_choice` does not name one of its own choices.
    pub fn ensure_answerable(&self) -> Result<(), Error> {
        for (index, question) in self.questions.iter().enumerate() {
            if question.choice(&question.correct_choice).is_none() {
                return Err(Error::UnknownCorrectChoice { index });
            }
        }
        Ok(())
    }
}

/// Opaque reference to a stored quiz definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuizRef(String);

impl QuizRef {
    /// Wraps a raw storage-side quiz id
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }
}

impl Display for QuizRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors surfaced when obtaining or checking a quiz definition
#[derive(Debug, Error)]
pub enum Error {
    /// No quiz is stored under the given reference
    #[error("no quiz found for reference {0}")]
    NotFound(QuizRef),
    /// A question names a correct choice that is not among its choices
    #[error("question {index} names a correct choice that does not exist")]
    UnknownCorrectChoice {
        /// Index of the offending question
        index: usize,
    },
}

/// The quiz-authoring/storage collaborator as seen by the live engine
///
/// Implementations return quiz definitions that remain immutable for the
/// lifetime of any session playing them.
pub trait QuizSource {
    /// Fetches the quiz stored under `reference`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no quiz exists under that reference.
    fn quiz(&self, reference: &QuizRef) -> Result<Quiz, Error>;
}

/// A [`QuizSource`] backed by an in-memory map
///
/// Useful for tests and for embedding the engine without a storage backend.
#[derive(Debug, Default, Clone)]
pub struct InMemoryQuizzes {
    mapping: HashMap<QuizRef, Quiz>,
}

impl InMemoryQuizzes {
    /// Stores a quiz under the given reference, replacing any previous entry
    pub fn insert(&mut self, reference: QuizRef, quiz: Quiz) {
        self.mapping.insert(reference, quiz);
    }
}

impl QuizSource for InMemoryQuizzes {
    fn quiz(&self, reference: &QuizRef) -> Result<Quiz, Error> {
        self.mapping
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::NotFound(reference.clone()))
    }
}
