//! Configuration constants for the quiz engine
//!
//! This module contains the validation limits and tuning constants used
//! throughout the engine to bound quiz documents and drive the scheduler.

use std::time::Duration;

/// Quiz document limits
pub mod quiz {
    /// Maximum length of a quiz title in characters
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum number of questions allowed in a single quiz
    pub const MAX_QUESTIONS_COUNT: usize = 100;
    /// Maximum length of a question prompt in characters
    pub const MAX_QUESTION_LENGTH: usize = 500;
    /// Minimum number of answer options per question
    pub const MIN_OPTIONS_COUNT: usize = 2;
}

/// Scheduler tuning
pub mod engine {
    use super::Duration;

    /// Capacity of a run's event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 1000;
    /// How often the scheduler checks whether every participant has answered
    pub const ANSWER_POLL_INTERVAL: Duration = Duration::from_millis(100);
}

/// Answer letters accepted by the chat transport
pub mod answers {
    /// Letters mapped to option indices 0..6, in order
    pub const LETTERS: [&str; 6] = ["A", "B", "C", "D", "E", "F"];
}
