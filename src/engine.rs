//! The quiz execution engine
//!
//! This module owns the registry of loaded quizzes and live runs and drives
//! the question protocol. Every structural mutation (create, join, start,
//! answer, finish) serialises through one registry lock; the lock is only
//! ever held for short critical sections and never across an await point.
//!
//! Each running quiz is driven by one spawned scheduler task. The task
//! emits lifecycle events into a bounded channel, waits per question for
//! the timer, for every participant to answer, or for a cancellation or
//! abort signal, and finalises the run when the questions are exhausted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants;
use crate::error::Error;
use crate::ids::{QuizId, RunId};
use crate::leaderboard::{self, QuizResults};
use crate::quiz::{letter_to_index, Question, Quiz};
use crate::run::{Answer, Participant, QuizRun, RunStatus};
use crate::QuizEvent;

/// How a question's answer window ended
enum QuestionWait {
    /// The timer expired first
    TimedOut,
    /// Every participant answered before the timer
    AllAnswered,
    /// The run was cancelled or aborted
    Interrupted,
}

/// Everything the engine owns, behind one lock
#[derive(Debug, Default)]
struct Registry {
    quizzes: HashMap<QuizId, Arc<Quiz>>,
    runs: HashMap<RunId, RunSlot>,
}

/// A live run plus its scheduler-facing control handle
#[derive(Debug)]
struct RunSlot {
    run: QuizRun,
    /// Present while the scheduler task is alive
    abort: Option<CancellationToken>,
}

impl Registry {
    /// Validates and appends one answer; the caller holds the lock
    fn submit(
        &mut self,
        run_id: RunId,
        participant_id: i64,
        question_idx: usize,
        answer_idx: usize,
    ) -> Result<(), Error> {
        let Registry { quizzes, runs } = self;
        let slot = runs.get_mut(&run_id).ok_or(Error::RunNotFound(run_id))?;
        let run = &mut slot.run;
        if run.status != RunStatus::Running {
            return Err(Error::NotRunning);
        }

        let quiz = quizzes
            .get(&run.quiz_id)
            .expect("quiz registered for every run");
        let Some(question) = quiz.questions.get(question_idx) else {
            return Err(Error::InvalidQuestionIndex(question_idx));
        };
        if answer_idx >= question.options.len() {
            return Err(Error::InvalidAnswerIndex(answer_idx));
        }
        if !run.participants.contains_key(&participant_id) {
            return Err(Error::UnknownParticipant(participant_id));
        }

        // The first accepted answer is authoritative; repeats are a no-op.
        if run.has_answered(participant_id, question_idx) {
            return Ok(());
        }

        let is_correct = run.correct_option(question, question_idx) == answer_idx;
        run.record_answer(
            participant_id,
            Answer {
                question_idx,
                answer_idx,
                is_correct,
                points: if is_correct { question.points } else { 0 },
                answered_at: Instant::now(),
            },
        );
        debug!(%run_id, participant_id, question_idx, is_correct, "answer accepted");

        Ok(())
    }
}

/// The quiz execution engine
///
/// Cheap to clone; all clones share the same registry. External callers
/// (transport handlers) may invoke operations from any task.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    inner: Arc<Mutex<Registry>>,
}

impl Engine {
    /// Creates an engine with no quizzes and no runs
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses, validates and registers a quiz document
    ///
    /// On success the quiz receives a fresh id and is retained for the
    /// lifetime of the engine. Nothing else changes on failure.
    ///
    /// # Errors
    ///
    /// See [`Quiz::parse`].
    pub fn load_quiz(&self, owner_id: i64, data: &[u8]) -> Result<Arc<Quiz>, Error> {
        let mut quiz = Quiz::parse(data)?;
        quiz.id = QuizId::new();
        quiz.owner_id = owner_id;
        quiz.created_at = SystemTime::now();

        let quiz = Arc::new(quiz);
        self.inner
            .lock()
            .quizzes
            .insert(quiz.id, Arc::clone(&quiz));
        debug!(quiz_id = %quiz.id, title = %quiz.title, "quiz loaded");

        Ok(quiz)
    }

    /// Creates a fresh run of a loaded quiz, in lobby status
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when the token already fired (nothing is
    /// allocated), [`Error::QuizNotFound`] for an unknown quiz.
    pub fn start_run(&self, cancel: &CancellationToken, quiz_id: QuizId) -> Result<QuizRun, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut guard = self.inner.lock();
        let Registry { quizzes, runs } = &mut *guard;
        let quiz = quizzes.get(&quiz_id).ok_or(Error::QuizNotFound(quiz_id))?;

        let run = QuizRun::new(RunId::new(), quiz_id, quiz.questions.len());
        debug!(run_id = %run.id, %quiz_id, "run created");
        runs.insert(
            run.id,
            RunSlot {
                run: run.clone(),
                abort: None,
            },
        );

        Ok(run)
    }

    /// Adds a participant to a run's lobby
    ///
    /// Stamps `joined_at` and pre-allocates the participant's answer log.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], [`Error::RunNotFound`], [`Error::LobbyClosed`]
    /// when the run already left the lobby, [`Error::LobbyFull`] when
    /// `max_participants` is reached, [`Error::AlreadyJoined`] on a repeat
    /// join. A failed join changes nothing.
    pub fn join_run(
        &self,
        cancel: &CancellationToken,
        run_id: RunId,
        mut participant: Participant,
    ) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut guard = self.inner.lock();
        let Registry { quizzes, runs } = &mut *guard;
        let slot = runs.get_mut(&run_id).ok_or(Error::RunNotFound(run_id))?;
        let run = &mut slot.run;
        if run.status != RunStatus::Lobby {
            return Err(Error::LobbyClosed);
        }

        let quiz = quizzes
            .get(&run.quiz_id)
            .expect("quiz registered for every run");
        let capacity = quiz.settings.max_participants;
        if capacity != 0 && run.participants.len() >= capacity {
            return Err(Error::LobbyFull);
        }
        if run.participants.contains_key(&participant.telegram_id) {
            return Err(Error::AlreadyJoined);
        }

        participant.joined_at = SystemTime::now();
        debug!(%run_id, participant_id = participant.telegram_id, "participant joined");
        run.answers.insert(
            participant.telegram_id,
            Vec::with_capacity(quiz.questions.len()),
        );
        run.participants.insert(participant.telegram_id, participant);

        Ok(())
    }

    /// How many participants a run currently has; `None` for an unknown run
    pub fn participant_count(&self, run_id: RunId) -> Option<usize> {
        self.inner
            .lock()
            .runs
            .get(&run_id)
            .map(|slot| slot.run.participants.len())
    }

    /// A snapshot of a run's state
    pub fn get_run(&self, run_id: RunId) -> Result<QuizRun, Error> {
        self.inner
            .lock()
            .runs
            .get(&run_id)
            .map(|slot| slot.run.clone())
            .ok_or(Error::RunNotFound(run_id))
    }

    /// The index of the question currently open, or `None` when the run is
    /// unknown or not running
    pub fn current_question(&self, run_id: RunId) -> Option<usize> {
        self.inner
            .lock()
            .runs
            .get(&run_id)
            .and_then(|slot| slot.run.current_question())
    }

    /// Moves a lobby run to running and spawns its scheduler task
    ///
    /// Returns the run's event channel. The channel is bounded and closes
    /// exactly once, when the scheduler exits: after the terminal
    /// `Finished` event on normal completion, or without further events
    /// when `cancel` fires or [`Engine::abort_run`] is called.
    ///
    /// # Errors
    ///
    /// [`Error::RunNotFound`], or [`Error::NotInLobby`] when the run
    /// already started or finished.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_quiz(
        &self,
        cancel: CancellationToken,
        run_id: RunId,
    ) -> Result<mpsc::Receiver<QuizEvent>, Error> {
        let (quiz, abort, sender, receiver) = {
            let mut guard = self.inner.lock();
            let Registry { quizzes, runs } = &mut *guard;
            let slot = runs.get_mut(&run_id).ok_or(Error::RunNotFound(run_id))?;
            if slot.run.status != RunStatus::Lobby {
                return Err(Error::NotInLobby);
            }
            slot.run.status = RunStatus::Running;

            let quiz = Arc::clone(
                quizzes
                    .get(&slot.run.quiz_id)
                    .expect("quiz registered for every run"),
            );
            let (sender, receiver) =
                mpsc::channel(constants::engine::EVENT_CHANNEL_CAPACITY);
            let abort = CancellationToken::new();
            slot.abort = Some(abort.clone());
            (quiz, abort, sender, receiver)
        };

        debug!(%run_id, participants = self.participant_count(run_id).unwrap_or(0), "quiz started");
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_schedule(cancel, abort, run_id, quiz, sender).await;
        });

        Ok(receiver)
    }

    /// Stops a running quiz without further events
    ///
    /// The scheduler exits promptly and finalises the run so results stay
    /// queryable.
    ///
    /// # Errors
    ///
    /// [`Error::RunNotFound`], or [`Error::NotRunning`] when no scheduler
    /// is alive for the run.
    pub fn abort_run(&self, run_id: RunId) -> Result<(), Error> {
        let guard = self.inner.lock();
        let slot = guard.runs.get(&run_id).ok_or(Error::RunNotFound(run_id))?;
        let abort = slot.abort.as_ref().ok_or(Error::NotRunning)?;
        abort.cancel();
        Ok(())
    }

    /// Fixes shuffled option orders for the run and rewrites a question event
    ///
    /// Every question whose `shuffle` flag is set receives a random option
    /// permutation, at most once per question, held by the run; the quiz
    /// itself is never mutated and other runs are unaffected. The given
    /// `Question` event comes back rewritten through the run's view, with
    /// `correct` following the moved option.
    ///
    /// # Errors
    ///
    /// [`Error::NotAQuestionEvent`] for any other event variant,
    /// [`Error::RunNotFound`] for an unknown run.
    pub fn shuffle_answers(&self, run_id: RunId, event: QuizEvent) -> Result<QuizEvent, Error> {
        let QuizEvent::Question {
            question_idx,
            time_left,
            ..
        } = event
        else {
            return Err(Error::NotAQuestionEvent);
        };

        let mut guard = self.inner.lock();
        let Registry { quizzes, runs } = &mut *guard;
        let slot = runs.get_mut(&run_id).ok_or(Error::RunNotFound(run_id))?;
        let quiz = quizzes
            .get(&slot.run.quiz_id)
            .expect("quiz registered for every run");

        for index in 0..quiz.questions.len() {
            slot.run.ensure_option_order(quiz, index);
        }

        let question = slot
            .run
            .question_view(quiz, question_idx)
            .ok_or(Error::InvalidQuestionIndex(question_idx))?;
        Ok(QuizEvent::Question {
            question_idx,
            question,
            time_left,
        })
    }

    /// Registers a participant's answer to a question
    ///
    /// Validates that the run is running, both indices are in range and the
    /// participant joined the lobby; then logs the answer with its
    /// correctness and credited points. At most one answer counts per
    /// (participant, question): repeats are silently ignored. A validation
    /// failure is local to this call and never disturbs the scheduler.
    ///
    /// # Errors
    ///
    /// [`Error::RunNotFound`], [`Error::NotRunning`],
    /// [`Error::InvalidQuestionIndex`], [`Error::InvalidAnswerIndex`],
    /// [`Error::UnknownParticipant`].
    pub fn submit_answer(
        &self,
        run_id: RunId,
        participant_id: i64,
        question_idx: usize,
        answer_idx: usize,
    ) -> Result<(), Error> {
        self.inner
            .lock()
            .submit(run_id, participant_id, question_idx, answer_idx)
    }

    /// Registers an answer given as a chat letter (`A`..`F`)
    ///
    /// Resolves the run's current question and delegates to
    /// [`Engine::submit_answer`]. The letter must be uppercase.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLetter`] for anything outside `A`..`F`, plus
    /// everything [`Engine::submit_answer`] returns.
    pub fn submit_answer_by_letter(
        &self,
        run_id: RunId,
        participant_id: i64,
        letter: &str,
    ) -> Result<(), Error> {
        let answer_idx =
            letter_to_index(letter).ok_or_else(|| Error::InvalidLetter(letter.to_owned()))?;

        let mut guard = self.inner.lock();
        let current = guard
            .runs
            .get(&run_id)
            .ok_or(Error::RunNotFound(run_id))?
            .run
            .current_question()
            .ok_or(Error::NotRunning)?;
        guard.submit(run_id, participant_id, current, answer_idx)
    }

    /// The final results of a finished run
    ///
    /// # Errors
    ///
    /// [`Error::RunNotFound`], or [`Error::NotFinished`] while the run is
    /// still in the lobby or running.
    pub fn get_results(&self, run_id: RunId) -> Result<QuizResults, Error> {
        let guard = self.inner.lock();
        let slot = guard.runs.get(&run_id).ok_or(Error::RunNotFound(run_id))?;
        if slot.run.status != RunStatus::Finished {
            return Err(Error::NotFinished);
        }
        let quiz = guard
            .quizzes
            .get(&slot.run.quiz_id)
            .expect("quiz registered for every run");
        Ok(leaderboard::compute(&slot.run, quiz))
    }

    /// The final results serialised as a CSV table
    ///
    /// # Errors
    ///
    /// See [`Engine::get_results`].
    pub fn export_csv(&self, run_id: RunId) -> Result<Vec<u8>, Error> {
        Ok(self.get_results(run_id)?.to_csv())
    }

    /// Drives one run's question sequence to completion
    async fn run_schedule(
        self,
        cancel: CancellationToken,
        abort: CancellationToken,
        run_id: RunId,
        quiz: Arc<Quiz>,
        events: mpsc::Sender<QuizEvent>,
    ) {
        for index in 0..quiz.questions.len() {
            let Some((view, time_limit)) = self.open_question(run_id, &quiz, index) else {
                // The run vanished from the registry; nothing left to drive.
                return;
            };

            let event = QuizEvent::Question {
                question_idx: index,
                question: view,
                time_left: time_limit,
            };
            if events.send(event).await.is_err() {
                debug!(%run_id, "event receiver dropped, stopping the run");
                self.finalize(run_id);
                return;
            }

            match self
                .wait_for_question(&cancel, &abort, run_id, index, time_limit)
                .await
            {
                QuestionWait::AllAnswered => {}
                QuestionWait::TimedOut => {
                    // Re-read the view: a shuffle may have landed during the window.
                    let view = {
                        let guard = self.inner.lock();
                        guard
                            .runs
                            .get(&run_id)
                            .and_then(|slot| slot.run.question_view(&quiz, index))
                    };
                    let Some(question) = view else {
                        return;
                    };
                    let event = QuizEvent::TimeUp {
                        question_idx: index,
                        question,
                    };
                    if events.send(event).await.is_err() {
                        debug!(%run_id, "event receiver dropped, stopping the run");
                        self.finalize(run_id);
                        return;
                    }
                }
                QuestionWait::Interrupted => {
                    debug!(%run_id, question_idx = index, "run interrupted");
                    self.finalize(run_id);
                    return;
                }
            }
        }

        self.finalize(run_id);
        let _ = events.send(QuizEvent::Finished).await;
    }

    /// Marks a question as current and returns its presented view and window
    fn open_question(
        &self,
        run_id: RunId,
        quiz: &Quiz,
        index: usize,
    ) -> Option<(Question, Duration)> {
        let mut guard = self.inner.lock();
        let slot = guard.runs.get_mut(&run_id)?;
        slot.run.current_question = Some(index);
        if let Some(started) = slot.run.question_started.get_mut(index) {
            *started = Some(Instant::now());
        }

        let view = slot.run.question_view(quiz, index)?;
        let question = quiz.questions.get(index)?;
        Some((
            view,
            question.effective_time(quiz.settings.time_per_question),
        ))
    }

    /// Waits for the question window to end
    ///
    /// Ends on the first of: caller cancellation, run abort, timer expiry,
    /// or the periodic poll observing that every participant has answered.
    /// A same-instant race between the timer and the last answer resolves
    /// in favour of the timer.
    async fn wait_for_question(
        &self,
        cancel: &CancellationToken,
        abort: &CancellationToken,
        run_id: RunId,
        index: usize,
        time_limit: Duration,
    ) -> QuestionWait {
        let deadline = tokio::time::sleep(time_limit);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(constants::engine::ANSWER_POLL_INTERVAL);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return QuestionWait::Interrupted,
                () = abort.cancelled() => return QuestionWait::Interrupted,
                () = &mut deadline => return QuestionWait::TimedOut,
                _ = poll.tick() => {
                    if self.all_answered(run_id, index) {
                        return QuestionWait::AllAnswered;
                    }
                }
            }
        }
    }

    fn all_answered(&self, run_id: RunId, index: usize) -> bool {
        self.inner
            .lock()
            .runs
            .get(&run_id)
            .is_some_and(|slot| slot.run.all_answered(index))
    }

    /// Freezes a run: no further mutation, results become available
    fn finalize(&self, run_id: RunId) {
        let mut guard = self.inner.lock();
        if let Some(slot) = guard.runs.get_mut(&run_id) {
            slot.run.status = RunStatus::Finished;
            slot.run.finished_at = Some(Instant::now());
            slot.run.current_question = None;
            slot.abort = None;
            debug!(%run_id, "run finished");
        }
    }
}
