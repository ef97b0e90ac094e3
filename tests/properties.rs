//! Property tests for the invariants spec §8 names P1-P8, run against the
//! full in-memory component stack. Each property owns a small, bounded
//! input space rather than a mechanical round-trip grid.

mod common;

use std::time::Duration;

use common::Harness;
use learnkernel::error::ErrorKind;
use learnkernel::types::{AttemptStatus, CorrectAnswer, ProgressStatus, UserId};
use proptest::prelude::*;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// P1: `time_spent_seconds` never decreases and `is_completed` never
    /// flips back to `false` across a run of heartbeats.
    #[test]
    fn p1_monotonic_time_and_completion(gaps_ms in prop::collection::vec(900u64..1100, 1..4)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = Harness::default();
            let topic = common::insert_topic(&harness.persistence, 1).await;
            let section = common::insert_section(&harness.persistence, topic, 0).await;
            let subsection = common::insert_subsection(&harness.persistence, section, 0, Some(2)).await;
            let user = UserId::new(1);

            harness.tracking.start_session(user, subsection).await.unwrap();
            let mut prev_time = 0u64;
            let mut prev_completed = false;
            for gap in gaps_ms {
                tokio::time::sleep(Duration::from_millis(gap)).await;
                if let Ok(outcome) = harness.tracking.heartbeat(user, subsection, None).await {
                    prop_assert!(outcome.time_spent_seconds >= prev_time);
                    prop_assert!(prev_completed <= outcome.is_completed);
                    prev_time = outcome.time_spent_seconds;
                    prev_completed = outcome.is_completed;
                }
            }
            Ok(())
        })?;
    }
}

/// Action alphabet for the P2/P3 attempt-lifecycle property.
#[derive(Debug, Clone, Copy)]
enum Action {
    /// Start an attempt and immediately submit it.
    StartThenSubmit,
    /// Start an attempt and leave it in progress.
    StartOnly,
    /// Reset the single last attempt, a no-op if none exist.
    Reset,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![Just(Action::StartThenSubmit), Just(Action::StartOnly), Just(Action::Reset)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// P2 (attempt numbering) + P3 (exclusivity): after any sequence of
    /// Start/Submit/Reset, `attempt_number` values for (user, test) form
    /// exactly `{1, ..., N}`, and at most one attempt is ever in progress.
    #[test]
    fn p2_p3_attempt_numbering_and_exclusivity(actions in prop::collection::vec(action_strategy(), 1..8)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = Harness::default();
            let topic = common::insert_topic(&harness.persistence, 1).await;
            let section = common::insert_section(&harness.persistence, topic, 0).await;
            let question = common::insert_question(&harness.persistence, topic, false).await;
            let test = common::insert_hinted_test(&harness.persistence, section, &[question]).await;
            let student = UserId::new(7);
            let teacher = UserId::new(1);

            for action in actions {
                match action {
                    Action::StartThenSubmit => {
                        if let Ok(attempt) = harness.testengine.start(student, test).await {
                            let mut answers = learnkernel::types::Answers::new();
                            answers.insert(question, CorrectAnswer::Single(1));
                            harness.testengine.submit(attempt.id, answers, 1).await.unwrap();
                        }
                    }
                    Action::StartOnly => {
                        let _ = harness.testengine.start(student, test).await;
                    }
                    Action::Reset => {
                        harness.testengine.reset_last(teacher, test, student).await.unwrap();
                    }
                }

                let in_progress = harness
                    .persistence
                    .list_in_progress_attempts_for_user(student)
                    .await
                    .unwrap();
                prop_assert!(in_progress.iter().filter(|a| a.test_id == test).count() <= 1);
            }

            let mut numbers: Vec<u32> = harness
                .testengine
                .list_user_attempts(student, test)
                .await
                .unwrap()
                .iter()
                .map(|a| a.attempt_number)
                .collect();
            numbers.sort_unstable();
            let expected: Vec<u32> = (1..=numbers.len() as u32).collect();
            prop_assert_eq!(numbers, expected);
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// P4 (aggregation correctness): the stored display percentage is
    /// exactly the weighted ratio spec §4.4 defines, for a section with
    /// uniformly-weighted subsections and no tests.
    #[test]
    fn p4_section_percentage_matches_completed_ratio(completed in prop::collection::vec(any::<bool>(), 1..6)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = Harness::default();
            let topic = common::insert_topic(&harness.persistence, 1).await;
            let section = common::insert_section(&harness.persistence, topic, 0).await;
            let user = UserId::new(1);

            let mut done = 0u32;
            for (i, is_done) in completed.iter().enumerate() {
                let sub = common::insert_subsection(&harness.persistence, section, i as i32, Some(1)).await;
                if *is_done {
                    common::mark_subsection_completed(&harness.persistence, user, sub).await;
                    done += 1;
                }
            }

            let total = completed.len() as u32;
            let aggregate = harness.progress.recompute_section(user, section).await.unwrap();
            let expected = round2(f64::from(done) / f64::from(total) * 100.0);
            prop_assert_eq!(aggregate.percentage, expected);

            // Idempotent: recomputing again with no state change is a no-op.
            let again = harness.progress.recompute_section(user, section).await.unwrap();
            prop_assert_eq!(aggregate, again);
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// P5 (gating): a section at index 1 is available only if the section
    /// at index 0 is `Completed`.
    #[test]
    fn p5_second_section_gating(complete_first in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = Harness::default();
            let user = UserId::new(1);
            let topic = common::insert_topic(&harness.persistence, 1).await;
            let section_a = common::insert_section(&harness.persistence, topic, 0).await;
            let section_b = common::insert_section(&harness.persistence, topic, 1).await;
            let sub_a = common::insert_subsection(&harness.persistence, section_a, 0, Some(1)).await;

            if complete_first {
                common::complete_section(&harness.persistence, &harness.progress, user, topic, section_a, &[sub_a], None).await;
            } else {
                // Still force a progress row to exist without completing it.
                harness.progress.recompute_section(user, section_a).await.unwrap();
            }
            harness.availability.invalidate_section(user, section_b);

            let a_progress = harness.progress.get_section_progress(user, section_a).await.unwrap();
            let b_availability = harness.availability.section_availability(user, section_b).await.unwrap();
            prop_assert!(!b_availability.available || a_progress.status == ProgressStatus::Completed);
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// P6 (material lock): a section read through the real tracking service
    /// is locked if and only if the user has an in-progress attempt scoped
    /// to it.
    #[test]
    fn p6_material_lock_tracks_in_progress_attempt(has_attempt in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = Harness::default();
            let user = UserId::new(1);
            let topic = common::insert_topic(&harness.persistence, 1).await;
            let section = common::insert_section(&harness.persistence, topic, 0).await;
            let subsection = common::insert_subsection(&harness.persistence, section, 0, Some(1)).await;
            let test = common::insert_section_final_test(&harness.persistence, section, &[]).await;

            if has_attempt {
                harness.testengine.start(user, test).await.unwrap();
            }

            let result = harness.tracking.get_status(user, subsection).await;
            if has_attempt {
                prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::MaterialLocked);
            } else {
                prop_assert!(result.is_ok());
            }
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// P7 (submission finality): `score` matches the fraction of correctly
    /// answered questions, and `score`/`answers`/`completed_at` never
    /// change after a second read; a second `Submit` is rejected.
    #[test]
    fn p7_submission_finality_and_score(correctness in prop::collection::vec(any::<bool>(), 1..5)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = Harness::default();
            let user = UserId::new(1);
            let topic = common::insert_topic(&harness.persistence, 1).await;
            let section = common::insert_section(&harness.persistence, topic, 0).await;

            let mut question_ids = Vec::new();
            for _ in &correctness {
                question_ids.push(common::insert_question(&harness.persistence, topic, false).await);
            }
            let test = common::insert_hinted_test(&harness.persistence, section, &question_ids).await;

            let attempt = harness.testengine.start(user, test).await.unwrap();
            let mut answers = learnkernel::types::Answers::new();
            let mut correct_count = 0u32;
            for (question_id, is_correct) in question_ids.iter().zip(correctness.iter()) {
                let option = if *is_correct { 1 } else { 2 };
                answers.insert(*question_id, CorrectAnswer::Single(option));
                if *is_correct {
                    correct_count += 1;
                }
            }

            let submitted = harness.testengine.submit(attempt.id, answers, 1).await.unwrap();
            let expected_score = 100.0 * f64::from(correct_count) / f64::from(correctness.len() as u32);
            prop_assert!((submitted.score.unwrap() - expected_score).abs() < 1e-9);
            prop_assert_eq!(submitted.status, AttemptStatus::Completed);

            let reread = harness.testengine.get_attempt_status(attempt.id).await.unwrap();
            prop_assert_eq!(reread.score, submitted.score);
            prop_assert_eq!(reread.answers, submitted.answers);
            prop_assert_eq!(reread.completed_at, submitted.completed_at);

            let mut second_answers = learnkernel::types::Answers::new();
            for question_id in &question_ids {
                second_answers.insert(*question_id, CorrectAnswer::Single(1));
            }
            let second = harness.testengine.submit(attempt.id, second_answers, 1).await;
            prop_assert_eq!(second.unwrap_err().kind(), ErrorKind::AlreadySubmitted);
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// P8 (frozen composition): for any `target_questions`, the composed
    /// set is frozen at Start and re-reads identically afterward.
    #[test]
    fn p8_frozen_composition_is_stable_on_reread(target in 1u32..7) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = Harness::default();
            let user = UserId::new(1);
            let topic = common::insert_topic(&harness.persistence, 1).await;
            let section = common::insert_section(&harness.persistence, topic, 0).await;
            let sub = common::insert_subsection(&harness.persistence, section, 0, Some(1)).await;
            for _ in 0..4 {
                common::insert_question(&harness.persistence, topic, true).await;
            }
            for _ in 0..6 {
                common::insert_question(&harness.persistence, topic, false).await;
            }
            common::complete_section(&harness.persistence, &harness.progress, user, topic, section, &[sub], None).await;
            let test = common::insert_global_final_test(&harness.persistence, topic, Some(target)).await;

            let attempt = harness.testengine.start(user, test).await.unwrap();
            prop_assert_eq!(attempt.randomized_config.question_ids.len() as u32, target.min(10));

            let reread_once = harness.testengine.get_attempt_status(attempt.id).await.unwrap();
            let reread_twice = harness.testengine.get_attempt_status(attempt.id).await.unwrap();
            prop_assert_eq!(&reread_once.randomized_config, &attempt.randomized_config);
            prop_assert_eq!(&reread_twice.randomized_config, &attempt.randomized_config);
            Ok(())
        })?;
    }
}
