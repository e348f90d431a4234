// tests/attempt_flow_tests.rs

use std::sync::Arc;

use tokio::task::JoinSet;

use mocktest::{
    clock::{Clock, ManualClock},
    config::{AUTO_SUBMIT_REASON, MAX_TIME_INCREMENT_SECONDS},
    engine::{EngineError, EngineSettings, ExamEngine, TrailingTime},
    models::{
        attempt::{AttemptStatus, SectionSubmitResult, SectionTiming},
        question::{Question, QuestionOption},
        subscription::{Subscription, SubscriptionStatus},
        test::{Section, TestDefinition},
    },
    store::{InMemoryStore, Storage},
};

const PAID_TEST: i64 = 1;
const SECTIONED_TEST: i64 = 2;
const SHORT_TEST: i64 = 3;

const STUDENT: i64 = 1;
const PENDING_STUDENT: i64 = 2;

struct Fixture {
    store: InMemoryStore,
    clock: ManualClock,
    engine: ExamEngine,
}

fn question(id: i64, test_id: i64, section_id: Option<i64>, correct: i64) -> Question {
    Question {
        id,
        test_id,
        section_id,
        position: id as i32,
        content: format!("Question {id}"),
        options: (1..=4)
            .map(|o| QuestionOption {
                id: o,
                content: format!("Option {o}"),
            })
            .collect(),
        correct_option_id: correct,
        marks: 1.0,
        expected_time_seconds: Some(60),
        explanation: Some(format!("Option {correct} is right")),
        active: true,
    }
}

fn test_definition(id: i64, category_id: i64, duration_minutes: i32) -> TestDefinition {
    TestDefinition {
        id,
        category_id,
        name: format!("Mock {id}"),
        duration_minutes,
        total_marks: 2.0,
        negative_marking: 0.0,
        sections: vec![],
        section_wise_timing: false,
        is_free: true,
        active: true,
    }
}

/// Seeds three tests:
/// * a paid one in category 1 with negative marking,
/// * a free one with two five-minute sections,
/// * a free one-minute test.
fn setup() -> Fixture {
    let store = InMemoryStore::new();

    store
        .put_test(TestDefinition {
            negative_marking: 0.25,
            is_free: false,
            ..test_definition(PAID_TEST, 1, 30)
        })
        .unwrap();
    store.put_question(question(1, PAID_TEST, None, 1)).unwrap();
    store.put_question(question(2, PAID_TEST, None, 2)).unwrap();

    store
        .put_test(TestDefinition {
            sections: vec![
                Section {
                    id: 20,
                    name: "B".to_string(),
                    position: 2,
                    duration_minutes: Some(5),
                },
                Section {
                    id: 10,
                    name: "A".to_string(),
                    position: 1,
                    duration_minutes: Some(5),
                },
            ],
            section_wise_timing: true,
            ..test_definition(SECTIONED_TEST, 2, 10)
        })
        .unwrap();
    store.put_question(question(3, SECTIONED_TEST, Some(10), 1)).unwrap();
    store.put_question(question(4, SECTIONED_TEST, Some(20), 1)).unwrap();

    store.put_test(test_definition(SHORT_TEST, 3, 1)).unwrap();
    store.put_question(question(5, SHORT_TEST, None, 3)).unwrap();
    store.put_question(question(6, SHORT_TEST, None, 4)).unwrap();

    store
        .put_subscription(Subscription {
            user_id: STUDENT,
            category_id: 1,
            status: SubscriptionStatus::Approved,
        })
        .unwrap();
    store
        .put_subscription(Subscription {
            user_id: PENDING_STUDENT,
            category_id: 1,
            status: SubscriptionStatus::Pending,
        })
        .unwrap();

    let clock = ManualClock::default();
    let engine = ExamEngine::new(
        Storage::in_memory(&store),
        Arc::new(clock.clone()),
        EngineSettings::default(),
    );

    Fixture {
        store,
        clock,
        engine,
    }
}

#[tokio::test]
async fn one_right_one_wrong_scores_with_negative_marking() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    fx.engine.update_answer(id, STUDENT, 1, Some(1), false, 10).await.unwrap();
    fx.engine.update_answer(id, STUDENT, 2, Some(3), false, 20).await.unwrap();

    let summary = fx
        .engine
        .submit(id, STUDENT, None, TrailingTime::default())
        .await
        .unwrap();

    assert_eq!(summary.total_score, 0.75);
    assert_eq!(summary.total_correct, 1);
    assert_eq!(summary.total_wrong, 1);
    assert_eq!(summary.total_unanswered, 0);
    assert_eq!(summary.total_time_seconds, 30);
}

#[tokio::test]
async fn score_never_goes_negative() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    fx.engine.update_answer(id, STUDENT, 2, Some(4), false, 0).await.unwrap();

    let summary = fx
        .engine
        .submit(id, STUDENT, None, TrailingTime::default())
        .await
        .unwrap();

    assert_eq!(summary.total_score, 0.0);
    assert_eq!(summary.total_wrong, 1);
    assert_eq!(summary.total_unanswered, 1);
}

#[tokio::test]
async fn second_submit_is_rejected_and_result_kept() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;
    fx.engine.update_answer(id, STUDENT, 1, Some(1), false, 5).await.unwrap();

    let first = fx
        .engine
        .submit(id, STUDENT, None, TrailingTime::default())
        .await
        .unwrap();

    // A later edit of the bank must not leak into the stored result.
    fx.store.put_question(question(1, PAID_TEST, None, 4)).unwrap();
    let err = fx
        .engine
        .submit(id, STUDENT, None, TrailingTime::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    let view = fx.engine.get_attempt(id, STUDENT).await.unwrap();
    assert_eq!(view.attempt.status, AttemptStatus::Submitted);
    assert_eq!(view.attempt.result, Some(first));
}

#[tokio::test]
async fn answers_are_graded_against_current_bank() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;
    fx.engine.update_answer(id, STUDENT, 1, Some(4), false, 0).await.unwrap();

    // Admin fixes the answer key mid-attempt.
    fx.store.put_question(question(1, PAID_TEST, None, 4)).unwrap();

    let summary = fx
        .engine
        .submit(id, STUDENT, None, TrailingTime::default())
        .await
        .unwrap();
    assert_eq!(summary.total_correct, 1);
}

#[tokio::test]
async fn start_resumes_open_attempt_unless_forced() {
    let fx = setup();

    let first = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap();
    assert!(!first.resumed);
    assert_eq!(first.attempt.answers.len(), 2);
    assert_eq!(first.questions.len(), 2);

    let again = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap();
    assert!(again.resumed);
    assert_eq!(again.attempt.id, first.attempt.id);

    let forced = fx.engine.start_attempt(STUDENT, PAID_TEST, true).await.unwrap();
    assert!(!forced.resumed);
    assert_ne!(forced.attempt.id, first.attempt.id);

    let listed = fx.engine.list_attempts(STUDENT, Some(PAID_TEST)).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, forced.attempt.id);
    assert!(listed.iter().all(|a| a.status == AttemptStatus::InProgress));

    // The older attempt stays open and is graded on its own answers.
    let older = first.attempt.id;
    fx.engine.update_answer(older, STUDENT, 1, Some(1), false, 4).await.unwrap();
    fx.engine.update_answer(forced.attempt.id, STUDENT, 2, Some(2), false, 9).await.unwrap();
    let summary = fx
        .engine
        .submit(older, STUDENT, None, TrailingTime::default())
        .await
        .unwrap();
    assert_eq!(summary.total_score, 1.0);
    assert_eq!(summary.total_correct, 1);
    assert_eq!(summary.total_unanswered, 1);
    assert_eq!(summary.total_time_seconds, 4);

    let view = fx.engine.get_attempt(forced.attempt.id, STUDENT).await.unwrap();
    assert_eq!(view.attempt.status, AttemptStatus::InProgress);
    assert_eq!(view.attempt.result, None);
    assert_eq!(view.attempt.answer(2).unwrap().selected_option_id, Some(2));
}

#[tokio::test]
async fn paid_test_requires_approved_subscription() {
    let fx = setup();

    let err = fx
        .engine
        .start_attempt(PENDING_STUDENT, PAID_TEST, false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Entitlement));

    let err = fx.engine.start_attempt(99, PAID_TEST, false).await.unwrap_err();
    assert!(matches!(err, EngineError::Entitlement));

    // Free tests need no subscription.
    assert!(fx.engine.start_attempt(PENDING_STUDENT, SHORT_TEST, false).await.is_ok());

    let err = fx.engine.start_attempt(STUDENT, 404, false).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn sections_follow_position_order() {
    let fx = setup();
    let summary = fx.engine.start_attempt(STUDENT, SECTIONED_TEST, false).await.unwrap();

    let attempt = summary.attempt;
    assert_eq!(attempt.current_section_id, Some(10));
    assert_eq!(attempt.sections.len(), 2);
    assert!(attempt.sections[0].is_in_progress());
    assert_eq!(attempt.sections[1].timing, SectionTiming::NotStarted);
}

#[tokio::test]
async fn expired_section_closes_on_timer_poll() {
    let fx = setup();
    let id = fx
        .engine
        .start_attempt(STUDENT, SECTIONED_TEST, false)
        .await
        .unwrap()
        .attempt
        .id;

    fx.clock.advance_secs(120);
    let status = fx.engine.check_section_timer(id, STUDENT).await.unwrap();
    assert!(!status.time_expired);
    assert_eq!(status.section_id, Some(10));
    assert_eq!(status.section_remaining_seconds, Some(180));

    fx.clock.advance_secs(181);
    let status = fx.engine.check_section_timer(id, STUDENT).await.unwrap();
    assert!(status.time_expired);
    assert_eq!(
        status.section_result,
        Some(SectionSubmitResult::SectionSubmitted {
            completed_section_id: 10,
            time_spent_seconds: 301,
            next_section_id: 20,
        })
    );

    let view = fx.engine.get_attempt(id, STUDENT).await.unwrap();
    assert_eq!(view.attempt.current_section_id, Some(20));
    assert_eq!(view.attempt.status, AttemptStatus::InProgress);
}

#[tokio::test]
async fn submitting_last_section_completes_test() {
    let fx = setup();
    let id = fx
        .engine
        .start_attempt(STUDENT, SECTIONED_TEST, false)
        .await
        .unwrap()
        .attempt
        .id;

    fx.engine.update_answer(id, STUDENT, 3, Some(1), false, 15).await.unwrap();
    fx.clock.advance_secs(60);
    let first = fx
        .engine
        .submit_section(id, STUDENT, 10, TrailingTime::new(Some(3), Some(5)))
        .await
        .unwrap();
    assert!(matches!(
        first,
        SectionSubmitResult::SectionSubmitted { next_section_id: 20, .. }
    ));

    // Only the running section can be submitted.
    let err = fx
        .engine
        .submit_section(id, STUDENT, 10, TrailingTime::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    fx.clock.advance_secs(30);
    let last = fx
        .engine
        .submit_section(id, STUDENT, 20, TrailingTime::new(Some(4), Some(30)))
        .await
        .unwrap();
    match last {
        SectionSubmitResult::TestCompleted {
            completed_section_id,
            test_completed,
            summary,
        } => {
            assert_eq!(completed_section_id, 20);
            assert!(test_completed);
            assert_eq!(summary.total_correct, 1);
            assert_eq!(summary.total_time_seconds, 50);
        }
        other => panic!("unexpected result {other:?}"),
    }

    let view = fx.engine.get_attempt(id, STUDENT).await.unwrap();
    assert_eq!(view.attempt.status, AttemptStatus::AutoSubmitted);
    assert_eq!(view.attempt.current_section_id, None);
    assert_eq!(view.attempt.sections[0].time_spent_seconds, 60);
    assert_eq!(view.attempt.sections[1].time_spent_seconds, 30);
}

#[tokio::test]
async fn long_silence_before_read_counts_as_paused() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    fx.clock.advance_secs(2);
    let view = fx.engine.get_attempt(id, STUDENT).await.unwrap();
    assert_eq!(view.attempt.total_paused_seconds, 0);

    fx.clock.advance_secs(30);
    let view = fx.engine.get_attempt(id, STUDENT).await.unwrap();
    assert_eq!(view.attempt.total_paused_seconds, 30);
    assert_eq!(view.timing.elapsed_seconds, 2);
}

#[tokio::test]
async fn answering_resumes_paused_attempt() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    let snapshot = fx.engine.pause(id, STUDENT).await.unwrap();
    assert!(snapshot.is_paused);

    fx.clock.advance_secs(100);
    fx.engine.update_answer(id, STUDENT, 1, Some(1), true, 0).await.unwrap();

    let view = fx.engine.get_attempt(id, STUDENT).await.unwrap();
    assert!(!view.timing.is_paused);
    assert_eq!(view.attempt.total_paused_seconds, 100);
    assert!(view.attempt.answer(1).unwrap().marked_for_review);
}

#[tokio::test]
async fn explicit_resume_folds_pause_window() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    fx.engine.pause(id, STUDENT).await.unwrap();
    fx.clock.advance_secs(45);
    let snapshot = fx.engine.resume(id, STUDENT).await.unwrap();

    assert!(!snapshot.is_paused);
    assert_eq!(snapshot.total_paused_seconds, 45);
    assert_eq!(snapshot.remaining_seconds, 30 * 60);
}

#[tokio::test]
async fn short_gap_before_pause_is_paused_time() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    fx.clock.advance_secs(3);
    let snapshot = fx.engine.pause(id, STUDENT).await.unwrap();

    assert!(snapshot.is_paused);
    assert_eq!(snapshot.total_paused_seconds, 3);
}

#[tokio::test]
async fn resume_without_pause_folds_gap_since_last_update() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    fx.clock.advance_secs(4);
    let snapshot = fx.engine.resume(id, STUDENT).await.unwrap();

    assert!(!snapshot.is_paused);
    assert_eq!(snapshot.total_paused_seconds, 4);
}

#[tokio::test]
async fn oversized_time_increments_are_rejected() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    let err = fx
        .engine
        .update_answer(id, STUDENT, 1, Some(1), false, i64::MAX)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = fx
        .engine
        .submit(
            id,
            STUDENT,
            None,
            TrailingTime::new(Some(1), Some(MAX_TIME_INCREMENT_SECONDS + 1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // The bound itself is accepted and accumulates normally.
    for _ in 0..2 {
        fx.engine
            .update_answer(id, STUDENT, 1, Some(1), false, MAX_TIME_INCREMENT_SECONDS)
            .await
            .unwrap();
    }
    let summary = fx
        .engine
        .submit(id, STUDENT, None, TrailingTime::default())
        .await
        .unwrap();
    assert_eq!(summary.total_time_seconds, 2 * MAX_TIME_INCREMENT_SECONDS);
}

#[tokio::test]
async fn bad_answer_updates_are_rejected() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    let err = fx
        .engine
        .update_answer(id, STUDENT, 1, Some(1), false, -5)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = fx
        .engine
        .update_answer(id, STUDENT, 6, Some(1), false, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    // Someone else's attempt looks missing.
    let err = fx
        .engine
        .update_review_flag(id, PENDING_STUDENT, 1, true, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    // Nothing was recorded by the rejected calls.
    let view = fx.engine.get_attempt(id, STUDENT).await.unwrap();
    assert_eq!(view.attempt.answer(1).unwrap().time_spent_seconds, 0);
}

#[tokio::test]
async fn clearing_a_selection_leaves_question_unanswered() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    fx.engine.update_answer(id, STUDENT, 1, Some(2), false, 3).await.unwrap();
    let record = fx.engine.update_answer(id, STUDENT, 1, None, false, 4).await.unwrap();
    assert_eq!(record.selected_option_id, None);
    assert_eq!(record.time_spent_seconds, 7);

    let summary = fx
        .engine
        .submit(id, STUDENT, None, TrailingTime::default())
        .await
        .unwrap();
    assert_eq!(summary.total_unanswered, 2);
    assert_eq!(summary.total_score, 0.0);
}

#[tokio::test]
async fn deep_dive_only_after_submission() {
    let fx = setup();
    let id = fx.engine.start_attempt(STUDENT, PAID_TEST, false).await.unwrap().attempt.id;

    let err = fx.engine.deep_dive(id, STUDENT).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    fx.engine.update_answer(id, STUDENT, 1, Some(1), false, 8).await.unwrap();
    fx.engine
        .submit(id, STUDENT, Some(AUTO_SUBMIT_REASON), TrailingTime::default())
        .await
        .unwrap();

    let review = fx.engine.deep_dive(id, STUDENT).await.unwrap();
    assert_eq!(review.status, AttemptStatus::AutoSubmitted);
    assert_eq!(review.questions.len(), 2);
    assert!(review.questions[0].is_correct);
    assert_eq!(review.questions[0].correct_option_id, Some(1));
    assert!(review.questions[0].explanation.is_some());
}

#[tokio::test]
async fn leaderboard_ranks_are_dense() {
    let fx = setup();

    for (user, selected, time) in [(11, Some(3), 20), (12, Some(3), 10), (13, None, 5)] {
        let id = fx.engine.start_attempt(user, SHORT_TEST, false).await.unwrap().attempt.id;
        fx.engine.update_answer(id, user, 5, selected, false, time).await.unwrap();
        fx.engine
            .submit(id, user, None, TrailingTime::default())
            .await
            .unwrap();
    }

    let board = fx.engine.ranker().leaderboard(3, SHORT_TEST, 10).await.unwrap();
    let order: Vec<(i64, i64)> = board.iter().map(|e| (e.user_id, e.rank)).collect();
    assert_eq!(order, vec![(12, 1), (11, 2), (13, 3)]);

    // A worse retake keeps the best entry.
    let retake = fx.engine.start_attempt(12, SHORT_TEST, false).await.unwrap().attempt.id;
    fx.engine
        .submit(retake, 12, None, TrailingTime::default())
        .await
        .unwrap();
    let board = fx.engine.ranker().leaderboard(3, SHORT_TEST, 1).await.unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].user_id, 12);
    assert_eq!(board[0].best_score, 1.0);
}

#[tokio::test]
async fn sweep_submits_attempts_past_deadline() {
    let fx = setup();
    let stale = fx.engine.start_attempt(STUDENT, SHORT_TEST, false).await.unwrap().attempt.id;

    fx.clock.advance_secs(100);
    assert_eq!(fx.engine.sweep_stale_attempts().await.unwrap(), 0);

    let fresh = fx.engine.start_attempt(PENDING_STUDENT, SHORT_TEST, false).await.unwrap().attempt.id;

    // One minute of test time plus a minute of grace.
    fx.clock.advance_secs(30);
    assert_eq!(fx.engine.sweep_stale_attempts().await.unwrap(), 1);

    let view = fx.engine.get_attempt(stale, STUDENT).await.unwrap();
    assert_eq!(view.attempt.status, AttemptStatus::AutoSubmitted);
    assert_eq!(view.attempt.ended_at, Some(fx.clock.now()));

    let view = fx.engine.get_attempt(fresh, PENDING_STUDENT).await.unwrap();
    assert_eq!(view.attempt.status, AttemptStatus::InProgress);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_answers_to_one_attempt_are_all_kept() {
    let fx = setup();
    let questions: Vec<i64> = (100..120).collect();
    for &id in &questions {
        fx.store.put_question(question(id, SHORT_TEST, None, 1)).unwrap();
    }
    let attempt_id = fx
        .engine
        .start_attempt(STUDENT, SHORT_TEST, false)
        .await
        .unwrap()
        .attempt
        .id;

    let engine = Arc::new(fx.engine);
    let mut tasks = JoinSet::new();
    for &question_id in &questions {
        let engine = engine.clone();
        tasks.spawn(async move {
            // Option and time both derive from the question so each write is checkable.
            let selected = question_id % 4 + 1;
            engine
                .update_answer(attempt_id, STUDENT, question_id, Some(selected), false, question_id)
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let view = engine.get_attempt(attempt_id, STUDENT).await.unwrap();
    for &question_id in &questions {
        let record = view.attempt.answer(question_id).unwrap();
        assert_eq!(record.selected_option_id, Some(question_id % 4 + 1));
        assert_eq!(record.time_spent_seconds, question_id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_keep_group_ranks_dense() {
    let fx = setup();
    let users: Vec<i64> = (200..216).collect();

    let mut attempts = Vec::new();
    for &user in &users {
        let id = fx.engine.start_attempt(user, SHORT_TEST, false).await.unwrap().attempt.id;
        // Half answer correctly; time differs per user so every rank is distinct.
        let selected = if user % 2 == 0 { Some(3) } else { Some(1) };
        fx.engine
            .update_answer(id, user, 5, selected, false, user - 190)
            .await
            .unwrap();
        attempts.push((user, id));
    }

    let engine = Arc::new(fx.engine);
    let mut tasks = JoinSet::new();
    for (user, id) in attempts {
        let engine = engine.clone();
        tasks.spawn(async move { engine.submit(id, user, None, TrailingTime::default()).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let board = engine.ranker().leaderboard(3, SHORT_TEST, 100).await.unwrap();
    assert_eq!(board.len(), users.len());
    let ranks: Vec<i64> = board.iter().map(|e| e.rank).collect();
    assert_eq!(ranks, (1..=users.len() as i64).collect::<Vec<_>>());
    for pair in board.windows(2) {
        assert!(pair[0].best_score >= pair[1].best_score);
        if pair[0].best_score == pair[1].best_score {
            assert!(pair[0].attempt_time_seconds < pair[1].attempt_time_seconds);
        }
    }
    assert_eq!(board[0].user_id, 200);
}
