//! Engine error type
//!
//! All engine operations surface this error. Each variant maps to one of a
//! small set of [`ErrorKind`]s so the transport can pick a localised chat
//! message without matching on individual variants.

use thiserror::Error;

use crate::ids::{QuizId, RunId};

/// Errors surfaced by engine operations
///
/// None of these indicate a broken engine; they are all answers to invalid
/// or ill-timed requests and leave the run state unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// The quiz document is not well-formed JSON
    #[error("quiz document is not valid json: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The quiz document violates a structural rule
    #[error("quiz document rejected: {0}")]
    Invalid(#[from] garde::Report),
    /// A question inside the document violates a cross-field rule
    #[error("question {index} rejected: {reason}")]
    InvalidQuestion {
        /// Index of the offending question
        index: usize,
        /// What is wrong with it
        reason: &'static str,
    },
    /// No quiz is registered under this id
    #[error("quiz {0} is not found")]
    QuizNotFound(QuizId),
    /// No run is registered under this id
    #[error("run {0} is not found")]
    RunNotFound(RunId),
    /// The participant never joined this run
    #[error("participant {0} has not joined this run")]
    UnknownParticipant(i64),
    /// The run has left the lobby and no longer accepts participants
    #[error("run is no longer accepting participants")]
    LobbyClosed,
    /// The lobby reached its participant limit
    #[error("lobby is full")]
    LobbyFull,
    /// The participant already joined this run
    #[error("participant already joined")]
    AlreadyJoined,
    /// The run is not in the lobby, so it cannot be started
    #[error("run can only be started from the lobby")]
    NotInLobby,
    /// The run is not currently running
    #[error("run is not running")]
    NotRunning,
    /// The run has not finished yet, so results are unavailable
    #[error("run is not finished")]
    NotFinished,
    /// The question index is outside the quiz
    #[error("question index {0} is out of range")]
    InvalidQuestionIndex(usize),
    /// The answer index is outside the question's options
    #[error("answer index {0} is out of range")]
    InvalidAnswerIndex(usize),
    /// The answer letter is not one of the accepted uppercase letters
    #[error("answer letter {0:?} is not one of A-F")]
    InvalidLetter(String),
    /// The operation expected a `Question` event
    #[error("expected a question event")]
    NotAQuestionEvent,
    /// The caller's cancellation token fired before the operation ran
    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or rule-violating input
    Validation,
    /// A referenced quiz, run or participant does not exist
    NotFound,
    /// The run is in the wrong lifecycle phase for the operation
    StateConflict,
    /// A question or answer index is out of range
    InvalidIndex,
    /// The operation was cancelled before it ran
    Cancelled,
}

impl Error {
    /// The kind this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed(_)
            | Self::Invalid(_)
            | Self::InvalidQuestion { .. }
            | Self::InvalidLetter(_)
            | Self::NotAQuestionEvent => ErrorKind::Validation,
            Self::QuizNotFound(_) | Self::RunNotFound(_) | Self::UnknownParticipant(_) => {
                ErrorKind::NotFound
            }
            Self::LobbyClosed
            | Self::LobbyFull
            | Self::AlreadyJoined
            | Self::NotInLobby
            | Self::NotRunning
            | Self::NotFinished => ErrorKind::StateConflict,
            Self::InvalidQuestionIndex(_) | Self::InvalidAnswerIndex(_) => ErrorKind::InvalidIndex,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
