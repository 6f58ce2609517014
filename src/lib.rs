//! # Quizrun
//!
//! This library provides the execution engine for live, multi-participant
//! quiz sessions driven by an external chat transport. It loads and
//! validates quiz documents, manages a joinable lobby per run, drives the
//! timed question-by-question protocol, collects answers with
//! once-per-question semantics, and computes a ranked leaderboard with a
//! CSV export.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::wildcard_imports)]

use std::time::Duration;

use serde::Serialize;
use serde_with::DurationSeconds;

pub mod constants;

pub mod engine;
pub mod error;
pub mod ids;
pub mod leaderboard;
pub mod quiz;
pub mod run;

pub use engine::Engine;
pub use error::{Error, ErrorKind};

use crate::quiz::Question;

/// Lifecycle events emitted by a run's scheduler
///
/// The transport consumes these from the channel returned by
/// [`Engine::start_quiz`]. For a completed run the sequence is one
/// `Question` per index (with an optional `TimeUp` after each), followed
/// by a single terminal `Finished`.
#[derive(Debug, Clone, Serialize)]
pub enum QuizEvent {
    /// A question is now open for answers
    Question {
        /// Index of the question within the quiz (0-based)
        question_idx: usize,
        /// The question as this run presents it (shuffled view if any)
        question: Question,
        /// How long participants have to answer
        #[serde(with = "serde_with::As::<DurationSeconds<u64>>")]
        time_left: Duration,
    },
    /// The question's timer expired before every participant answered
    TimeUp {
        /// Index of the question that timed out
        question_idx: usize,
        /// The question as this run presents it
        question: Question,
    },
    /// All questions have been played; results are available
    Finished,
}

impl QuizEvent {
    /// Converts the event to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// Panics if serialization fails, which cannot happen with the default
    /// JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }

    /// The question index this event refers to, if any
    pub fn question_idx(&self) -> Option<usize> {
        match self {
            Self::Question { question_idx, .. } | Self::TimeUp { question_idx, .. } => {
                Some(*question_idx)
            }
            Self::Finished => None,
        }
    }

    /// Whether this is a `Question` event
    pub fn is_question(&self) -> bool {
        matches!(self, Self::Question { .. })
    }
}
