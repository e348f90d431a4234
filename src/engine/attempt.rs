// src/engine/attempt.rs

//! Attempt State Machine: `IN_PROGRESS -> SUBMITTED | AUTO_SUBMITTED`.

use chrono::{DateTime, Duration, Utc};

use crate::config::AUTO_SUBMIT_REASON;
use crate::models::{
    attempt::{
        AnswerRecord, Attempt, AttemptStatus, AttemptSummary, AttemptView, DeepDive,
        QuestionReview, ScoreSummary, SectionRecord, SectionSubmitResult, TimerStatus,
        TimingSnapshot,
    },
    question::PublicQuestion,
};

use crate::store::NewAttempt;

use super::{
    EngineError, ExamEngine, ensure_in_progress, scoring, timing, validate_increment,
};

/// Time spent on the question on screen when a section or the test is left.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingTime {
    pub question_id: Option<i64>,
    pub increment: Option<i64>,
}

impl TrailingTime {
    pub fn new(question_id: Option<i64>, increment: Option<i64>) -> Self {
        Self {
            question_id,
            increment,
        }
    }
}

/// Adds client-reported time to a question and, when a section is running,
/// to that section as well. Returns the index of the answer record.
fn record_time(attempt: &mut Attempt, question_id: i64, increment: i64) -> Result<usize, EngineError> {
    let index = attempt
        .answers
        .iter()
        .position(|a| a.question_id == question_id)
        .ok_or(EngineError::NotFound("question"))?;

    let record = &mut attempt.answers[index];
    record.time_spent_seconds = record.time_spent_seconds.saturating_add(increment);
    if let Some(section) = attempt.current_section_mut().filter(|s| s.is_in_progress()) {
        section.time_spent_seconds = section.time_spent_seconds.saturating_add(increment);
    }
    Ok(index)
}

fn apply_trailing(attempt: &mut Attempt, trailing: TrailingTime) -> Result<(), EngineError> {
    if let Some(question_id) = trailing.question_id {
        let increment = validate_increment(trailing.increment.unwrap_or(0))?;
        record_time(attempt, question_id, increment)?;
    } else if let Some(increment) = trailing.increment {
        validate_increment(increment)?;
    }
    Ok(())
}

impl ExamEngine {
    /// Starts a new attempt, or returns the caller's open one unless `force_new`.
    pub async fn start_attempt(
        &self,
        user_id: i64,
        test_id: i64,
        force_new: bool,
    ) -> Result<AttemptSummary, EngineError> {
        let test = self
            .storage
            .tests
            .get_test(test_id)
            .await?
            .filter(|t| t.active)
            .ok_or(EngineError::NotFound("test"))?;

        if !test.is_free {
            let subscription = self
                .storage
                .subscriptions
                .get_subscription(user_id, test.category_id)
                .await?;
            if !subscription.is_some_and(|s| s.is_approved()) {
                return Err(EngineError::Entitlement);
            }
        }

        let _start = self.start_locks.lock((user_id, test_id)).await;

        if !force_new {
            if let Some(existing) = self.storage.attempts.find_in_progress(user_id, test_id).await? {
                tracing::info!("Resuming attempt {} for user {}", existing.id, user_id);
                let questions = self.public_questions(&existing).await?;
                return Ok(AttemptSummary {
                    attempt: existing,
                    resumed: true,
                    duration_minutes: test.duration_minutes,
                    questions,
                });
            }
        }

        let questions = self.storage.questions.list_active_questions(test_id).await?;
        let now = self.clock.now();

        let mut sections: Vec<SectionRecord> = Vec::new();
        let mut current_section_id = None;
        if test.uses_section_timing() {
            sections = test
                .ordered_sections()
                .iter()
                .map(|s| SectionRecord::not_started(s.id))
                .collect();
            if let Some(first) = sections.first_mut() {
                timing::start_section(first, now);
                current_section_id = Some(first.section_id);
            }
        }

        let draft = Attempt {
            id: 0,
            user_id,
            category_id: test.category_id,
            test_id,
            status: AttemptStatus::InProgress,
            started_at: now,
            ended_at: None,
            last_active_at: Some(now),
            paused_at: None,
            total_paused_seconds: 0,
            current_section_id,
            sections,
            answers: questions.iter().map(|q| AnswerRecord::new(q.id)).collect(),
            result: None,
            version: 0,
        };
        let attempt = match self.storage.attempts.insert_attempt(&draft, force_new).await? {
            NewAttempt::Created(attempt) => attempt,
            NewAttempt::Existing(existing) => {
                // Another process opened one between our check and the insert.
                tracing::info!("Resuming attempt {} for user {}", existing.id, user_id);
                let questions = self.public_questions(&existing).await?;
                return Ok(AttemptSummary {
                    attempt: existing,
                    resumed: true,
                    duration_minutes: test.duration_minutes,
                    questions,
                });
            }
        };

        tracing::info!(
            "Started attempt {} for user {} on test {} ({} questions)",
            attempt.id,
            user_id,
            test_id,
            attempt.answers.len()
        );

        Ok(AttemptSummary {
            attempt,
            resumed: false,
            duration_minutes: test.duration_minutes,
            questions: questions.iter().map(PublicQuestion::from).collect(),
        })
    }

    /// Full view of an attempt.
    ///
    /// For an in-progress attempt this first runs activity reconciliation, so
    /// a read after a long silence registers that silence as paused time.
    pub async fn get_attempt(&self, attempt_id: i64, user_id: i64) -> Result<AttemptView, EngineError> {
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        let now = self.clock.now();

        self.reconcile_activity(&mut attempt, now).await?;

        let test = self.require_test(attempt.test_id).await?;
        let questions = self.public_questions(&attempt).await?;
        let timing = timing::snapshot(&attempt, test.duration_minutes, now);

        Ok(AttemptView {
            attempt,
            duration_minutes: test.duration_minutes,
            timing,
            questions,
        })
    }

    /// Folds away time into the attempt and persists it. Shared by the read
    /// path and anything else that wants idle time accounted.
    pub(crate) async fn reconcile_activity(
        &self,
        attempt: &mut Attempt,
        now: DateTime<Utc>,
    ) -> Result<i64, EngineError> {
        if attempt.status.is_terminal() || attempt.is_paused() {
            return Ok(0);
        }
        let folded = timing::reconcile_activity(attempt, now, self.settings.idle_threshold_seconds);
        if folded > 0 {
            tracing::info!("Attempt {}: {}s away registered as paused", attempt.id, folded);
        }
        self.save(attempt).await?;
        Ok(folded)
    }

    pub async fn list_attempts(&self, user_id: i64, test_id: Option<i64>) -> Result<Vec<Attempt>, EngineError> {
        Ok(self.storage.attempts.list_attempts(user_id, test_id).await?)
    }

    /// Records a selection (or clears it with `None`) plus time spent on the question.
    /// Correctness is not evaluated until submission.
    pub async fn update_answer(
        &self,
        attempt_id: i64,
        user_id: i64,
        question_id: i64,
        selected_option_id: Option<i64>,
        marked_for_review: bool,
        time_increment: i64,
    ) -> Result<AnswerRecord, EngineError> {
        let increment = validate_increment(time_increment)?;
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        ensure_in_progress(&attempt)?;

        let index = record_time(&mut attempt, question_id, increment)?;
        let record = &mut attempt.answers[index];
        record.selected_option_id = selected_option_id;
        record.marked_for_review = marked_for_review;

        timing::mark_active(&mut attempt, self.clock.now());
        self.save(&mut attempt).await?;
        Ok(attempt.answers[index].clone())
    }

    /// Like `update_answer` but only touches the review flag.
    pub async fn update_review_flag(
        &self,
        attempt_id: i64,
        user_id: i64,
        question_id: i64,
        marked_for_review: bool,
        time_increment: i64,
    ) -> Result<AnswerRecord, EngineError> {
        let increment = validate_increment(time_increment)?;
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        ensure_in_progress(&attempt)?;

        let index = record_time(&mut attempt, question_id, increment)?;
        attempt.answers[index].marked_for_review = marked_for_review;

        timing::mark_active(&mut attempt, self.clock.now());
        self.save(&mut attempt).await?;
        Ok(attempt.answers[index].clone())
    }

    /// Closes the running section and opens the next one. Closing the last
    /// section submits the whole attempt as `AUTO_SUBMITTED`.
    pub async fn submit_section(
        &self,
        attempt_id: i64,
        user_id: i64,
        section_id: i64,
        trailing: TrailingTime,
    ) -> Result<SectionSubmitResult, EngineError> {
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        ensure_in_progress(&attempt)?;

        let now = self.clock.now();
        apply_trailing(&mut attempt, trailing)?;
        timing::mark_active(&mut attempt, now);
        self.close_section(&mut attempt, section_id, now).await
    }

    /// Polls the running section's countdown.
    ///
    /// This is where section limits are enforced: a poll that finds the
    /// section out of time closes it on the spot.
    pub async fn check_section_timer(&self, attempt_id: i64, user_id: i64) -> Result<TimerStatus, EngineError> {
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        let test = self.require_test(attempt.test_id).await?;
        let now = self.clock.now();

        let running = attempt
            .current_section_id
            .filter(|_| !attempt.status.is_terminal())
            .and_then(|id| attempt.sections.iter().find(|s| s.section_id == id && s.is_in_progress()));

        let Some(section) = running else {
            return Ok(TimerStatus {
                status: attempt.status,
                section_id: None,
                section_elapsed_seconds: 0,
                section_remaining_seconds: None,
                time_expired: false,
                section_result: None,
                attempt_timing: timing::snapshot(&attempt, test.duration_minutes, now),
            });
        };

        let section_id = section.section_id;
        let elapsed = timing::section_elapsed(section, now);
        let limit = test
            .section(section_id)
            .and_then(|s| s.duration_minutes)
            .map(|m| i64::from(m) * 60);
        let remaining = limit.map(|limit| (limit - elapsed).max(0));

        let mut section_result = None;
        if remaining == Some(0) {
            tracing::warn!(
                "Attempt {}: section {} ran out of time, closing on poll",
                attempt.id,
                section_id
            );
            section_result = Some(self.close_section(&mut attempt, section_id, now).await?);
        }

        Ok(TimerStatus {
            status: attempt.status,
            section_id: Some(section_id),
            section_elapsed_seconds: elapsed,
            section_remaining_seconds: remaining,
            time_expired: section_result.is_some(),
            section_result,
            attempt_timing: timing::snapshot(&attempt, test.duration_minutes, now),
        })
    }

    /// Grades and closes the attempt, then updates the leaderboard.
    ///
    /// `reason == "AUTO_SUBMIT"` marks it `AUTO_SUBMITTED`. Submitting a closed
    /// attempt fails and leaves the stored result untouched.
    pub async fn submit(
        &self,
        attempt_id: i64,
        user_id: i64,
        reason: Option<&str>,
        trailing: TrailingTime,
    ) -> Result<ScoreSummary, EngineError> {
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        ensure_in_progress(&attempt)?;

        let now = self.clock.now();
        apply_trailing(&mut attempt, trailing)?;
        timing::mark_active(&mut attempt, now);
        self.finish(&mut attempt, reason, now).await
    }

    pub async fn pause(&self, attempt_id: i64, user_id: i64) -> Result<TimingSnapshot, EngineError> {
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        ensure_in_progress(&attempt)?;
        let test = self.require_test(attempt.test_id).await?;
        let now = self.clock.now();

        if timing::pause(&mut attempt, now) {
            self.save(&mut attempt).await?;
            tracing::info!("Attempt {} paused", attempt.id);
        }
        Ok(timing::snapshot(&attempt, test.duration_minutes, now))
    }

    pub async fn resume(&self, attempt_id: i64, user_id: i64) -> Result<TimingSnapshot, EngineError> {
        let _guard = self.attempt_locks.lock(attempt_id).await;
        let mut attempt = self.load_owned(attempt_id, user_id).await?;
        ensure_in_progress(&attempt)?;
        let test = self.require_test(attempt.test_id).await?;
        let now = self.clock.now();

        let folded = timing::resume(&mut attempt, now);
        self.save(&mut attempt).await?;
        tracing::info!("Attempt {} resumed after {}s", attempt.id, folded);
        Ok(timing::snapshot(&attempt, test.duration_minutes, now))
    }

    /// Per-question review with correct answers and explanations.
    /// Only available once the attempt is closed.
    pub async fn deep_dive(&self, attempt_id: i64, user_id: i64) -> Result<DeepDive, EngineError> {
        let attempt = self.load_owned(attempt_id, user_id).await?;
        if !attempt.status.is_terminal() {
            return Err(EngineError::InvalidState(
                "review is available after submission".to_string(),
            ));
        }

        let bank = self
            .storage
            .questions
            .get_questions_by_ids(&attempt.question_ids())
            .await?;

        let questions = attempt
            .answers
            .iter()
            .map(|record| {
                let question = bank.get(&record.question_id);
                QuestionReview {
                    question_id: record.question_id,
                    section_id: question.and_then(|q| q.section_id),
                    content: question.map(|q| q.content.clone()).unwrap_or_default(),
                    options: question.map(|q| q.options.clone()).unwrap_or_default(),
                    selected_option_id: record.selected_option_id,
                    correct_option_id: question.map(|q| q.correct_option_id),
                    is_correct: record.is_correct,
                    marks: question.map_or(0.0, |q| q.marks),
                    time_spent_seconds: record.time_spent_seconds,
                    marked_for_review: record.marked_for_review,
                    explanation: question.and_then(|q| q.explanation.clone()),
                }
            })
            .collect();

        Ok(DeepDive {
            attempt_id: attempt.id,
            status: attempt.status,
            summary: attempt.result,
            questions,
        })
    }

    /// Auto-submits every open attempt past `started_at + duration + grace`.
    ///
    /// Not part of the default poll-driven model; only runs when an operator
    /// enables the background sweep or calls it explicitly.
    pub async fn sweep_stale_attempts(&self) -> Result<usize, EngineError> {
        let open = self.storage.attempts.list_in_progress().await?;
        let mut submitted = 0;

        for candidate in open {
            let Some(test) = self.storage.tests.get_test(candidate.test_id).await? else {
                continue;
            };
            let deadline = candidate.started_at
                + Duration::minutes(i64::from(test.duration_minutes))
                + Duration::seconds(self.settings.sweep_grace_seconds);
            let now = self.clock.now();
            if now <= deadline {
                continue;
            }

            let _guard = self.attempt_locks.lock(candidate.id).await;
            let Some(mut attempt) = self.storage.attempts.get_attempt(candidate.id).await? else {
                continue;
            };
            if attempt.status.is_terminal() {
                continue;
            }
            match self.finish(&mut attempt, Some(AUTO_SUBMIT_REASON), now).await {
                Ok(_) => submitted += 1,
                Err(e) => tracing::error!("Sweep failed to submit attempt {}: {}", attempt.id, e),
            }
        }

        if submitted > 0 {
            tracing::info!("Sweep auto-submitted {} stale attempts", submitted);
        }
        Ok(submitted)
    }

    /// Caller holds the attempt lock and has checked the attempt is open.
    async fn close_section(
        &self,
        attempt: &mut Attempt,
        section_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SectionSubmitResult, EngineError> {
        if attempt.sections.is_empty() {
            return Err(EngineError::InvalidState(
                "section-wise timing is not enabled for this attempt".to_string(),
            ));
        }
        let index = attempt
            .sections
            .iter()
            .position(|s| s.section_id == section_id)
            .ok_or(EngineError::NotFound("section"))?;
        if !attempt.sections[index].is_in_progress() {
            return Err(EngineError::InvalidState(format!(
                "section {section_id} is not in progress"
            )));
        }

        let spent = timing::complete_section(&mut attempt.sections[index], now);
        tracing::info!(
            "Attempt {}: section {} completed in {}s",
            attempt.id,
            section_id,
            spent
        );

        let paused = attempt.is_paused();
        if let Some(next) = attempt.sections.get_mut(index + 1) {
            timing::start_section(next, now);
            if paused {
                timing::freeze_section(next, now);
            }
            let next_section_id = next.section_id;
            attempt.current_section_id = Some(next_section_id);
            self.save(attempt).await?;
            return Ok(SectionSubmitResult::SectionSubmitted {
                completed_section_id: section_id,
                time_spent_seconds: spent,
                next_section_id,
            });
        }

        attempt.current_section_id = None;
        let summary = self.finish(attempt, Some(AUTO_SUBMIT_REASON), now).await?;
        Ok(SectionSubmitResult::TestCompleted {
            completed_section_id: section_id,
            test_completed: true,
            summary,
        })
    }

    /// Caller holds the attempt lock and has checked the attempt is open.
    async fn finish(
        &self,
        attempt: &mut Attempt,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ScoreSummary, EngineError> {
        let test = self.require_test(attempt.test_id).await?;

        if let Some(section) = attempt.current_section_mut().filter(|s| s.is_in_progress()) {
            timing::complete_section(section, now);
        }
        attempt.current_section_id = None;

        let bank = self
            .storage
            .questions
            .get_questions_by_ids(&attempt.question_ids())
            .await?;
        let grade = scoring::grade(&attempt.answers, &bank, test.negative_marking);
        scoring::apply(&mut attempt.answers, &grade);

        attempt.status = if reason == Some(AUTO_SUBMIT_REASON) {
            AttemptStatus::AutoSubmitted
        } else {
            AttemptStatus::Submitted
        };
        attempt.ended_at = Some(now);
        attempt.result = Some(grade.summary.clone());
        self.save(attempt).await?;

        tracing::info!(
            "Attempt {} {} with score {} ({} correct, {} wrong, {} unanswered)",
            attempt.id,
            attempt.status.as_str(),
            grade.summary.total_score,
            grade.summary.total_correct,
            grade.summary.total_wrong,
            grade.summary.total_unanswered
        );

        self.ranker
            .record_result(
                attempt.category_id,
                attempt.test_id,
                attempt.user_id,
                grade.summary.total_score,
                attempt.id,
                grade.summary.total_time_seconds,
            )
            .await?;

        Ok(grade.summary)
    }

    /// Client-safe questions in the order the attempt presents them.
    async fn public_questions(&self, attempt: &Attempt) -> Result<Vec<PublicQuestion>, EngineError> {
        let bank = self
            .storage
            .questions
            .get_questions_by_ids(&attempt.question_ids())
            .await?;
        Ok(attempt
            .answers
            .iter()
            .filter_map(|a| bank.get(&a.question_id))
            .map(PublicQuestion::from)
            .collect())
    }
}
