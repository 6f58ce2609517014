//! Quiz documents and their validation
//!
//! This module defines the quiz document model: the self-describing JSON
//! record uploaded through the chat transport, its settings, and its
//! questions. Parsing and validation happen together in [`Quiz::parse`];
//! a quiz that exists is always structurally valid and never mutated
//! afterwards.

use std::time::{Duration, SystemTime};

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::DurationSeconds;

use crate::constants::{answers, quiz::*};
use crate::error::Error;
use crate::ids::QuizId;

/// A loaded quiz, immutable for its whole lifetime
///
/// The identity fields (`id`, `owner_id`, `created_at`) are not part of the
/// uploaded document; the engine assigns them on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Quiz {
    /// Engine-assigned identifier
    #[serde(skip)]
    #[garde(skip)]
    pub id: QuizId,
    /// Telegram id of the uploader
    #[serde(skip)]
    #[garde(skip)]
    pub owner_id: i64,
    /// When the quiz was loaded
    #[serde(skip, default = "SystemTime::now")]
    #[garde(skip)]
    pub created_at: SystemTime,
    /// Display title
    #[garde(length(min = 1, max = MAX_TITLE_LENGTH))]
    pub title: String,
    /// Run-wide settings
    #[serde(default)]
    #[garde(dive)]
    pub settings: Settings,
    /// The questions, in play order
    #[garde(length(min = 1, max = MAX_QUESTIONS_COUNT), dive)]
    pub questions: Vec<Question>,
}

/// Run-wide settings of a quiz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Settings {
    /// Default time window per question
    #[serde(with = "serde_with::As::<DurationSeconds<u64>>")]
    #[garde(custom(validate_nonzero_duration))]
    pub time_per_question: Duration,
    /// Presentation hint: present questions in random order
    #[garde(skip)]
    pub shuffle_questions: bool,
    /// Presentation hint: present options in random order
    #[garde(skip)]
    pub shuffle_answers: bool,
    /// Lobby capacity; 0 means unlimited
    #[garde(skip)]
    pub max_participants: usize,
    /// Extra registration fields the transport collects, opaque to the engine
    #[garde(skip)]
    pub registration: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_per_question: Duration::ZERO,
            shuffle_questions: false,
            shuffle_answers: false,
            max_participants: 0,
            registration: Vec::new(),
        }
    }
}

/// A single question of a quiz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The prompt shown to participants
    #[garde(length(min = 1, max = MAX_QUESTION_LENGTH))]
    pub text: String,
    /// Answer choices, in document order
    #[garde(length(min = MIN_OPTIONS_COUNT))]
    pub options: Vec<String>,
    /// 0-based index of the correct option
    #[garde(skip)]
    pub correct: usize,
    /// Optional explanation shown after the answer window closes
    #[serde(default)]
    #[garde(skip)]
    pub explanation: Option<String>,
    /// Points credited for a correct answer
    #[serde(default = "default_points")]
    #[garde(skip)]
    pub points: u32,
    /// Per-question time override; zero inherits the quiz default
    #[serde(default, with = "serde_with::As::<DurationSeconds<u64>>")]
    #[garde(skip)]
    pub time: Duration,
    /// Whether this question's options may be presented shuffled
    #[serde(default)]
    #[garde(skip)]
    pub shuffle: bool,
}

fn default_points() -> u32 {
    1
}

fn validate_nonzero_duration(value: &Duration, _ctx: &()) -> garde::Result {
    if value.is_zero() {
        Err(garde::Error::new("must be greater than zero"))
    } else {
        Ok(())
    }
}

impl Question {
    /// The time window for this question, falling back to the quiz default
    pub fn effective_time(&self, default: Duration) -> Duration {
        if self.time.is_zero() {
            default
        } else {
            self.time
        }
    }
}

impl Quiz {
    /// Parses and validates a quiz document
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the bytes are not valid JSON for
    /// the document schema, [`Error::Invalid`] when a declarative rule is
    /// violated (empty title, zero `time_per_question`, no questions, empty
    /// prompt, fewer than two options), and [`Error::InvalidQuestion`] when
    /// a `correct` index points outside its options.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let quiz: Quiz = serde_json::from_slice(data)?;
        quiz.validate()?;

        for (index, question) in quiz.questions.iter().enumerate() {
            if question.correct >= question.options.len() {
                return Err(Error::InvalidQuestion {
                    index,
                    reason: "correct answer index is out of range",
                });
            }
        }

        Ok(quiz)
    }
}

/// Maps an uppercase answer letter (`A`..`F`) to an option index
pub fn letter_to_index(letter: &str) -> Option<usize> {
    answers::LETTERS.iter().position(|known| *known == letter)
}

/// Maps an option index to its answer letter (`0` ⇒ `A`)
pub fn index_to_letter(index: usize) -> Option<&'static str> {
    answers::LETTERS.get(index).copied()
}
