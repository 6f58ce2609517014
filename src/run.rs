//! Per-run state
//!
//! A [`QuizRun`] is one concrete execution of a quiz: its lifecycle status,
//! the participants who joined during the lobby, their answer logs, and the
//! per-question bookkeeping the scheduler and the scorer share. The quiz
//! itself stays immutable; anything run-specific (including shuffled option
//! orders) lives here.

use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::ids::{QuizId, RunId};
use crate::quiz::{Question, Quiz};

/// Lifecycle status of a run
///
/// Advances strictly `Lobby → Running → Finished`; there are no reverse
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Accepting participants, no questions active
    Lobby,
    /// The scheduler is driving questions
    Running,
    /// All questions played (or the run was aborted); state is frozen
    Finished,
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Lobby => "lobby",
            Self::Running => "running",
            Self::Finished => "finished",
        })
    }
}

/// A quiz participant as the chat transport identifies them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Telegram user id, the natural key within a run
    pub telegram_id: i64,
    /// Telegram username (may be empty)
    pub username: String,
    /// First name as reported by the transport
    pub first_name: String,
    /// Last name as reported by the transport
    pub last_name: String,
    /// Extra registration fields collected by the transport, opaque here
    #[serde(default)]
    pub registration: HashMap<String, String>,
    /// When the participant joined the lobby; stamped by the engine
    #[serde(skip, default = "SystemTime::now")]
    pub joined_at: SystemTime,
}

impl Participant {
    /// Creates a participant with no registration data
    pub fn new(
        telegram_id: i64,
        username: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            telegram_id,
            username: username.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            registration: HashMap::new(),
            joined_at: SystemTime::now(),
        }
    }
}

/// One accepted answer in a participant's log
#[derive(Debug, Clone, Copy)]
pub struct Answer {
    /// Which question this answers
    pub question_idx: usize,
    /// The chosen option, in the run's presented order
    pub answer_idx: usize,
    /// Whether the chosen option was the correct one
    pub is_correct: bool,
    /// Points credited if correct (zero otherwise)
    pub points: u32,
    /// When the answer was accepted
    pub answered_at: Instant,
}

/// One concrete execution of a quiz
#[derive(Debug, Clone)]
pub struct QuizRun {
    /// Identifier of this run
    pub id: RunId,
    /// The quiz being played
    pub quiz_id: QuizId,
    /// Current lifecycle status
    pub status: RunStatus,
    /// Participants keyed by telegram id; frozen once running
    pub participants: HashMap<i64, Participant>,
    /// Per-participant answer logs; an entry exists for every participant
    pub answers: HashMap<i64, Vec<Answer>>,
    /// When the run was created
    pub started_at: Instant,
    /// When the scheduler finalised the run
    pub finished_at: Option<Instant>,
    pub(crate) current_question: Option<usize>,
    pub(crate) question_started: Vec<Option<Instant>>,
    pub(crate) option_order: HashMap<usize, Vec<usize>>,
}

impl QuizRun {
    pub(crate) fn new(id: RunId, quiz_id: QuizId, question_count: usize) -> Self {
        Self {
            id,
            quiz_id,
            status: RunStatus::Lobby,
            participants: HashMap::new(),
            answers: HashMap::new(),
            started_at: Instant::now(),
            finished_at: None,
            current_question: None,
            question_started: vec![None; question_count],
            option_order: HashMap::new(),
        }
    }

    /// The index of the question currently open, or `None` outside `Running`
    pub fn current_question(&self) -> Option<usize> {
        match self.status {
            RunStatus::Running => self.current_question,
            _ => None,
        }
    }

    /// Whether the participant already has an answer logged for a question
    pub fn has_answered(&self, participant_id: i64, question_idx: usize) -> bool {
        self.answers
            .get(&participant_id)
            .is_some_and(|log| log.iter().any(|answer| answer.question_idx == question_idx))
    }

    /// Whether every participant has answered a question
    ///
    /// Vacuously true for a run with no participants: there is no one left
    /// to wait for.
    pub fn all_answered(&self, question_idx: usize) -> bool {
        self.participants
            .keys()
            .all(|id| self.has_answered(*id, question_idx))
    }

    pub(crate) fn record_answer(&mut self, participant_id: i64, answer: Answer) {
        self.answers.entry(participant_id).or_default().push(answer);
    }

    /// The question as this run presents it
    ///
    /// Applies the run's shuffled option order when one exists; otherwise
    /// the base question is returned unchanged. `None` when the index is
    /// out of range.
    pub fn question_view(&self, quiz: &Quiz, index: usize) -> Option<Question> {
        let base = quiz.questions.get(index)?;
        let Some(order) = self.option_order.get(&index) else {
            return Some(base.clone());
        };

        let mut view = base.clone();
        view.options = order.iter().map(|&o| base.options[o].clone()).collect();
        view.correct = order
            .iter()
            .position(|&o| o == base.correct)
            .unwrap_or(base.correct);
        Some(view)
    }

    /// The presented index of the correct option for a question
    pub(crate) fn correct_option(&self, base: &Question, index: usize) -> usize {
        match self.option_order.get(&index) {
            Some(order) => order
                .iter()
                .position(|&o| o == base.correct)
                .unwrap_or(base.correct),
            None => base.correct,
        }
    }

    /// Fixes a shuffled option order for a flagged question, at most once
    pub(crate) fn ensure_option_order(&mut self, quiz: &Quiz, index: usize) {
        let Some(question) = quiz.questions.get(index) else {
            return;
        };
        if !question.shuffle {
            return;
        }
        self.option_order.entry(index).or_insert_with(|| {
            let mut order: Vec<usize> = (0..question.options.len()).collect();
            fastrand::shuffle(&mut order);
            order
        });
    }
}
