//! Literal end-to-end scenarios from spec §8, run against the full
//! in-memory component stack.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use learnkernel::config::CoreConfig;
use learnkernel::error::ErrorKind;
use learnkernel::types::{AttemptStatus, UserId};

/// Scenario 1: completion by time threshold. `min_time_seconds=30`, then
/// four heartbeats 8s apart; after the 4th, `time_spent_seconds=32`,
/// `is_completed=true`, `completion_percentage=100`, and the section
/// recomputes. Real-time: there is no injectable clock in the tracker, so
/// this sleeps for real between heartbeats.
#[tokio::test]
async fn completion_by_time_threshold() {
    let harness = Harness::default();
    let topic = common::insert_topic(&harness.persistence, 1).await;
    let section = common::insert_section(&harness.persistence, topic, 0).await;
    let subsection = common::insert_subsection(&harness.persistence, section, 0, Some(30)).await;
    let user = UserId::new(1);

    harness.tracking.start_session(user, subsection).await.unwrap();
    let mut last = None;
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(8)).await;
        last = Some(harness.tracking.heartbeat(user, subsection, None).await.unwrap());
    }
    let outcome = last.unwrap();
    assert_eq!(outcome.time_spent_seconds, 32);
    assert!(outcome.is_completed);
    assert_eq!(outcome.completion_percentage, 100.0);

    let section_progress = harness.progress.get_section_progress(user, section).await.unwrap();
    assert_eq!(section_progress.breakdown.subsections.completed, 1);
}

/// Scenario 2: rejected too-frequent heartbeat. Two heartbeats 2s apart
/// (below `MIN_INTERVAL=5`): the second is `TooFrequent` and credits no time.
#[tokio::test]
async fn rejected_too_frequent_heartbeat() {
    let harness = Harness::default();
    let topic = common::insert_topic(&harness.persistence, 1).await;
    let section = common::insert_section(&harness.persistence, topic, 0).await;
    let subsection = common::insert_subsection(&harness.persistence, section, 0, Some(30)).await;
    let user = UserId::new(1);

    harness.tracking.start_session(user, subsection).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let err = harness.tracking.heartbeat(user, subsection, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooFrequent);

    let status = harness.tracking.get_status(user, subsection).await.unwrap();
    assert_eq!(status.time_spent_seconds, 0);
}

/// Scenario 3: sequential unlock. Topic with sections [A, B]; before A is
/// completed, B is unavailable. After completing every subsection of A and
/// passing A's section-final test, A is completed and available, and B
/// becomes available (but not completed).
#[tokio::test]
async fn sequential_unlock() {
    let harness = Harness::default();
    let user = UserId::new(1);
    let topic = common::insert_topic(&harness.persistence, 1).await;
    let section_a = common::insert_section(&harness.persistence, topic, 0).await;
    let section_b = common::insert_section(&harness.persistence, topic, 1).await;
    let sub_a = common::insert_subsection(&harness.persistence, section_a, 0, Some(10)).await;
    let final_a = common::insert_section_final_test(&harness.persistence, section_a, &[]).await;

    let before = harness.availability.section_availability(user, section_b).await.unwrap();
    assert!(!before.available);

    common::complete_section(&harness.persistence, &harness.progress, user, topic, section_a, &[sub_a], Some(final_a)).await;
    // The fixture above writes straight through persistence/progress, bypassing
    // `TestEngine::submit`'s own invalidation — replicate just the cache
    // invalidation a real section-final submission would have triggered.
    harness.availability.invalidate_section(user, section_a);
    harness.availability.invalidate_section(user, section_b);

    let a_availability = harness.availability.section_availability(user, section_a).await.unwrap();
    let a_progress = harness.progress.get_section_progress(user, section_a).await.unwrap();
    assert!(a_availability.available);
    assert_eq!(a_progress.status, learnkernel::types::ProgressStatus::Completed);

    let b_availability = harness.availability.section_availability(user, section_b).await.unwrap();
    let b_progress = harness.progress.get_section_progress(user, section_b).await.unwrap();
    assert!(b_availability.available);
    assert_ne!(b_progress.status, learnkernel::types::ProgressStatus::Completed);
}

/// Scenario 4: parallel Start loses. Two concurrent `StartTest(user=7,
/// test=42)` calls: exactly one succeeds with `attempt_number=1,
/// status=in_progress`; the other returns `AlreadyInProgress`.
#[tokio::test]
async fn parallel_start_loses() {
    let harness = Arc::new(Harness::default());
    let topic = common::insert_topic(&harness.persistence, 1).await;
    let section = common::insert_section(&harness.persistence, topic, 0).await;
    let test = common::insert_section_final_test(&harness.persistence, section, &[]).await;
    let user = UserId::new(7);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move { harness.testengine.start(user, test).await }));
    }
    let results: Vec<_> = futures_join_all(handles).await;

    let successes: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].attempt_number, 1);
    assert_eq!(successes[0].status, AttemptStatus::InProgress);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind(), ErrorKind::AlreadyInProgress);
}

/// Minimal join-all without pulling in the `futures` crate for one call site.
async fn futures_join_all<T>(handles: Vec<tokio::task::JoinHandle<T>>) -> Vec<T> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.expect("task should not panic"));
    }
    out
}

/// Scenario 5: teacher reset. User has attempts {1 completed score 40, 2
/// completed score 55, 3 in_progress}. `ResetLastAttempt` deletes attempt 3;
/// `ListUserAttempts` then returns {1, 2}; the next Start creates
/// `attempt_number=3`.
#[tokio::test]
async fn teacher_reset_deletes_only_the_last_attempt() {
    let harness = Harness::default();
    let topic = common::insert_topic(&harness.persistence, 1).await;
    let section = common::insert_section(&harness.persistence, topic, 0).await;
    let test = common::insert_section_final_test(&harness.persistence, section, &[]).await;
    let student = UserId::new(7);
    let teacher = UserId::new(1);

    common::insert_completed_attempt(&harness.persistence, student, test, 1, 40.0).await;
    common::insert_completed_attempt(&harness.persistence, student, test, 2, 55.0).await;
    let in_progress = harness.testengine.start(student, test).await.unwrap();
    assert_eq!(in_progress.attempt_number, 3);

    harness.testengine.reset_last(teacher, test, student).await.unwrap();
    let remaining = harness.testengine.list_user_attempts(student, test).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|a| a.status == AttemptStatus::Completed));

    let next = harness.testengine.start(student, test).await.unwrap();
    assert_eq!(next.attempt_number, 3);
}

/// Scenario 6: final test composition. A topic with 10 bank questions, 4
/// flagged `is_final`. `StartTest` on a global-final with
/// `target_questions=6` returns an attempt whose `randomized_config` lists
/// exactly 6 question ids: all 4 finals plus 2 sampled from the other 6;
/// reading the attempt twice yields the same ids in the same order.
#[tokio::test]
async fn final_test_composition_is_frozen_and_deterministic() {
    let harness = Harness::default();
    let user = UserId::new(1);
    let topic = common::insert_topic(&harness.persistence, 1).await;
    let section = common::insert_section(&harness.persistence, topic, 0).await;
    let sub = common::insert_subsection(&harness.persistence, section, 0, Some(1)).await;

    let mut final_ids = Vec::new();
    for _ in 0..4 {
        final_ids.push(common::insert_question(&harness.persistence, topic, true).await);
    }
    let mut other_ids = Vec::new();
    for _ in 0..6 {
        other_ids.push(common::insert_question(&harness.persistence, topic, false).await);
    }

    // The topic must be fully completed before a global-final test is available.
    common::complete_section(&harness.persistence, &harness.progress, user, topic, section, &[sub], None).await;

    let test = common::insert_global_final_test(&harness.persistence, topic, Some(6)).await;
    let attempt = harness.testengine.start(user, test).await.unwrap();
    assert_eq!(attempt.randomized_config.question_ids.len(), 6);
    for id in &final_ids {
        assert!(attempt.randomized_config.question_ids.contains(id));
    }
    let sampled_others = attempt.randomized_config.question_ids.iter().filter(|id| other_ids.contains(id)).count();
    assert_eq!(sampled_others, 2);

    let reread = harness.testengine.get_attempt_status(attempt.id).await.unwrap();
    assert_eq!(reread.randomized_config.question_ids, attempt.randomized_config.question_ids);
}

/// Sanity check that a custom `CoreConfig` threshold is honored at the
/// topic level: one of two sections fully done (100% display) and the
/// other untouched (0%) averages to 50%, which only crosses a lowered
/// 50-point threshold, not the 80-point default.
#[tokio::test]
async fn custom_config_changes_topic_completion_threshold() {
    let mut config = CoreConfig::default();
    config.section_completion_threshold = 50.0;
    let harness = Harness::new(config);
    let user = UserId::new(1);
    let topic = common::insert_topic(&harness.persistence, 1).await;
    let section_a = common::insert_section(&harness.persistence, topic, 0).await;
    let section_b = common::insert_section(&harness.persistence, topic, 1).await;
    let sub_a = common::insert_subsection(&harness.persistence, section_a, 0, Some(1)).await;
    let _sub_b = common::insert_subsection(&harness.persistence, section_b, 0, Some(1)).await;

    common::mark_subsection_completed(&harness.persistence, user, sub_a).await;
    let topic_progress = harness.progress.recompute_topic(user, topic).await.unwrap();
    assert_eq!(topic_progress.percentage, 50.0);
    assert_eq!(topic_progress.status, learnkernel::types::ProgressStatus::Completed);
}
