//! Leaderboard computation and CSV export
//!
//! This module turns a finished run into its final results: per-participant
//! scores, correct-answer counts, cumulative answer times, and the ranked
//! leaderboard ordered by descending score with ties broken by ascending
//! total time. It also serialises the leaderboard as a CSV table for the
//! transport to upload.

use std::time::Duration;

use itertools::Itertools;
use serde::Serialize;
use serde_with::DurationMilliSeconds;

use crate::ids::RunId;
use crate::quiz::Quiz;
use crate::run::{Participant, QuizRun};

/// Header row of the CSV export
const CSV_HEADER: [&str; 8] = [
    "Rank",
    "TelegramID",
    "Username",
    "FirstName",
    "LastName",
    "Score",
    "CorrectCount",
    "TotalTime",
];

/// One row of the final leaderboard
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    /// Who this row belongs to
    pub participant: Participant,
    /// Total points across correct answers
    pub score: u64,
    /// How many answers were correct
    pub correct_count: usize,
    /// Cumulative time from question open to answer, across answered questions
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    pub total_time: Duration,
    /// Position in the leaderboard, 1-based
    pub rank: usize,
}

/// Final results of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct QuizResults {
    /// The run these results belong to
    pub run_id: RunId,
    /// Title of the quiz that was played
    pub quiz_title: String,
    /// Ranked entries, best first
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Wall-clock duration of the whole run
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    pub total_time: Duration,
}

/// Computes the results of a finished run
///
/// Scoring: each correct answer credits its stored points, with a stored
/// zero counting as one (documents predating per-question points spelled
/// `"points": 0`). Every answered question, correct or not, contributes its
/// answer latency to the participant's total time.
pub(crate) fn compute(run: &QuizRun, quiz: &Quiz) -> QuizResults {
    let mut leaderboard = run
        .participants
        .values()
        .map(|participant| {
            let mut score = 0u64;
            let mut correct_count = 0usize;
            let mut total_time = Duration::ZERO;

            let answers = run
                .answers
                .get(&participant.telegram_id)
                .map_or(&[][..], Vec::as_slice);
            for answer in answers {
                if answer.is_correct {
                    score += if answer.points == 0 {
                        1
                    } else {
                        u64::from(answer.points)
                    };
                    correct_count += 1;
                }

                if let Some(started) = run
                    .question_started
                    .get(answer.question_idx)
                    .copied()
                    .flatten()
                {
                    total_time += answer.answered_at.saturating_duration_since(started);
                }
            }

            LeaderboardEntry {
                participant: participant.clone(),
                score,
                correct_count,
                total_time,
                rank: 0,
            }
        })
        .collect_vec();

    leaderboard.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.total_time.cmp(&b.total_time))
    });
    for (position, entry) in leaderboard.iter_mut().enumerate() {
        entry.rank = position + 1;
    }

    QuizResults {
        run_id: run.id,
        quiz_title: quiz.title.clone(),
        leaderboard,
        total_time: run.finished_at.map_or(Duration::ZERO, |finished| {
            finished.saturating_duration_since(run.started_at)
        }),
    }
}

impl QuizResults {
    /// Serialises the leaderboard as a CSV table
    ///
    /// One header row, then one row per entry in rank order. Fields
    /// containing separators or quotes are quoted per RFC 4180; UTF-8 text
    /// is preserved verbatim. Durations render human-readable (`2.5s`).
    pub fn to_csv(&self) -> Vec<u8> {
        let mut out = String::new();
        write_row(&mut out, CSV_HEADER.iter().copied());

        for entry in &self.leaderboard {
            let fields = [
                entry.rank.to_string(),
                entry.participant.telegram_id.to_string(),
                entry.participant.username.clone(),
                entry.participant.first_name.clone(),
                entry.participant.last_name.clone(),
                entry.score.to_string(),
                entry.correct_count.to_string(),
                format_duration(entry.total_time),
            ];
            write_row(&mut out, fields.iter().map(String::as_str));
        }

        out.into_bytes()
    }
}

fn write_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let row = fields.map(escape_field).join(",");
    out.push_str(&row);
    out.push('\n');
}

/// Quotes a field when it contains a separator, quote or line break
fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// Renders a duration the way chat users read it: `2.5s`, `1m30s`
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        let minutes = secs / 60;
        let rest = duration - Duration::from_secs(minutes * 60);
        format!("{minutes}m{}", format_seconds(rest))
    } else {
        format_seconds(duration)
    }
}

fn format_seconds(duration: Duration) -> String {
    let mut text = format!("{:.3}", duration.as_secs_f64());
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    format!("{text}s")
}
