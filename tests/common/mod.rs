//! Shared fixture-building helpers for the end-to-end scenario tests.
//!
//! Wires a full in-memory stack the way a real host process would: one
//! `InMemoryGateway`, one `Cache`, one `CoreConfig`, and every component
//! built on top of them, sharing the same `Arc`s.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use learnkernel::availability::AvailabilityResolver;
use learnkernel::config::CoreConfig;
use learnkernel::oracles::{BoxFuture, Role, TopicAuthorOracle};
use learnkernel::persistence::InMemoryGateway;
use learnkernel::progress::ProgressAggregator;
use learnkernel::question_bank::QuestionBank;
use learnkernel::testengine::TestEngine;
use learnkernel::tracking::TrackingService;
use learnkernel::types::{
    Answers, Audit, AttemptId, AttemptStatus, CorrectAnswer, Option_, Question, QuestionId,
    QuestionType, RandomizedConfig, Section, SectionId, Subsection, SubsectionId,
    SubsectionProgress, SubsectionType, Test, TestAttempt, TestId, TestQuestion, TestScope,
    TestType, Topic, TopicId, UserId,
};
use learnkernel::{Cache, PersistenceGateway};

/// Grants every access check; the scenarios in spec §8 exercise sequencing
/// and attempt-state rules, not identity/authorship policy.
pub struct AllowAll;

impl learnkernel::oracles::IdentityOracle for AllowAll {
    fn role_of(&self, _user: UserId) -> BoxFuture<'_, learnkernel::Result<Role>> {
        Box::pin(async { Ok(Role::Student) })
    }

    fn group_topic_access(&self, _user: UserId, _topic: TopicId) -> BoxFuture<'_, learnkernel::Result<bool>> {
        Box::pin(async { Ok(true) })
    }
}

impl TopicAuthorOracle for AllowAll {
    fn can_manage_topic(&self, _user: UserId, _topic: TopicId) -> BoxFuture<'_, learnkernel::Result<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn can_access_topic_as_author(&self, _user: UserId, _topic: TopicId) -> BoxFuture<'_, learnkernel::Result<bool>> {
        Box::pin(async { Ok(true) })
    }
}

/// The full component stack, wired over one shared in-memory backend.
pub struct Harness {
    pub persistence: Arc<dyn PersistenceGateway>,
    pub config: Arc<CoreConfig>,
    pub progress: Arc<ProgressAggregator>,
    pub availability: Arc<AvailabilityResolver>,
    pub tracking: TrackingService,
    pub testengine: TestEngine,
}

impl Harness {
    pub fn new(config: CoreConfig) -> Self {
        let persistence: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let cache = Arc::new(Cache::new());
        let config = Arc::new(config);
        let progress = Arc::new(ProgressAggregator::new(persistence.clone(), cache.clone(), config.clone()));
        let allow_all = Arc::new(AllowAll);
        let availability = Arc::new(AvailabilityResolver::new(
            persistence.clone(),
            cache,
            progress.clone(),
            allow_all.clone(),
            config.clone(),
        ));
        let question_bank = Arc::new(QuestionBank::new(persistence.clone()));
        let tracking = TrackingService::new(persistence.clone(), progress.clone(), config.clone());
        let testengine = TestEngine::new(
            persistence.clone(),
            progress.clone(),
            availability.clone(),
            question_bank,
            allow_all,
            config.clone(),
        );
        Self { persistence, config, progress, availability, tracking, testengine }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

pub async fn insert_topic(persistence: &Arc<dyn PersistenceGateway>, id: i64) -> TopicId {
    let topic = persistence
        .insert_topic(Topic {
            id: TopicId::new(id),
            title: format!("topic {id}"),
            description: None,
            category: None,
            image_path: None,
            creator_id: UserId::new(900),
            audit: Audit::new(Utc::now()),
        })
        .await
        .unwrap();
    topic.id
}

pub async fn insert_section(persistence: &Arc<dyn PersistenceGateway>, topic: TopicId, order: i32) -> SectionId {
    let section = persistence
        .insert_section(Section {
            id: SectionId::new(0),
            topic_id: topic,
            title: format!("section {order}"),
            order,
            content: None,
            description: None,
            audit: Audit::new(Utc::now()),
        })
        .await
        .unwrap();
    section.id
}

pub async fn insert_subsection(
    persistence: &Arc<dyn PersistenceGateway>,
    section: SectionId,
    order: i32,
    min_time_seconds: Option<u64>,
) -> SubsectionId {
    let subsection = persistence
        .insert_subsection(Subsection {
            id: SubsectionId::new(0),
            section_id: section,
            title: format!("subsection {order}"),
            order,
            kind: SubsectionType::Text,
            weight: 1.0,
            required_time_minutes: None,
            min_time_seconds,
            audit: Audit::new(Utc::now()),
        })
        .await
        .unwrap();
    subsection.id
}

/// Inserts a single-choice question with option 1 correct, optionally
/// flagged `is_final`.
pub async fn insert_question(persistence: &Arc<dyn PersistenceGateway>, topic: TopicId, is_final: bool) -> QuestionId {
    let question = persistence
        .insert_question(Question {
            id: QuestionId::new(0),
            topic_id: topic,
            section_id: None,
            question_type: QuestionType::SingleChoice,
            prompt: "2 + 2?".into(),
            options: vec![Option_ { id: 1, text: "4".into() }, Option_ { id: 2, text: "5".into() }],
            correct_answer: CorrectAnswer::Single(1),
            hint: None,
            is_final,
            created_by: UserId::new(900),
            audit: Audit::new(Utc::now()),
        })
        .await
        .unwrap();
    question.id
}

pub async fn insert_section_final_test(
    persistence: &Arc<dyn PersistenceGateway>,
    section: SectionId,
    questions: &[QuestionId],
) -> TestId {
    insert_test(persistence, TestScope::Section(section), TestType::SectionFinal, None, questions).await
}

pub async fn insert_hinted_test(
    persistence: &Arc<dyn PersistenceGateway>,
    section: SectionId,
    questions: &[QuestionId],
) -> TestId {
    insert_test(persistence, TestScope::Section(section), TestType::Hinted, None, questions).await
}

pub async fn insert_global_final_test(
    persistence: &Arc<dyn PersistenceGateway>,
    topic: TopicId,
    target_questions: Option<u32>,
) -> TestId {
    insert_test(persistence, TestScope::Topic(topic), TestType::GlobalFinal, target_questions, &[]).await
}

async fn insert_test(
    persistence: &Arc<dyn PersistenceGateway>,
    scope: TestScope,
    test_type: TestType,
    target_questions: Option<u32>,
    questions: &[QuestionId],
) -> TestId {
    let test = persistence
        .insert_test(Test {
            id: TestId::new(0),
            title: "test".into(),
            test_type,
            scope,
            duration_seconds: None,
            max_attempts: 100,
            completion_percentage: 50.0,
            target_questions,
            audit: Audit::new(Utc::now()),
        })
        .await
        .unwrap();
    for question_id in questions {
        persistence
            .add_test_question(TestQuestion {
                test_id: test.id,
                question_id: *question_id,
                added_by: UserId::new(900),
                added_at: Utc::now(),
            })
            .await
            .unwrap();
    }
    test.id
}

/// Marks `subsection` fully viewed and completed for `user`, bypassing the
/// tracker's own time-accrual so fixtures don't need real sleeps.
pub async fn mark_subsection_completed(persistence: &Arc<dyn PersistenceGateway>, user: UserId, subsection: SubsectionId) {
    let now = Utc::now();
    persistence
        .upsert_subsection_progress(SubsectionProgress {
            user_id: user,
            subsection_id: subsection,
            is_viewed: true,
            is_completed: true,
            time_spent_seconds: 999,
            completion_percentage: 100.0,
            session_start_at: None,
            last_activity_at: Some(now),
            viewed_at: Some(now),
            activity_sessions: vec![],
        })
        .await
        .unwrap();
}

/// Inserts a `Completed` attempt at `score` for (user, test) directly,
/// bypassing `TestEngine::start`/`submit` so fixtures can fake "already
/// passed" history without composing real questions.
pub async fn insert_completed_attempt(
    persistence: &Arc<dyn PersistenceGateway>,
    user: UserId,
    test: TestId,
    attempt_number: u32,
    score: f64,
) {
    let now = Utc::now();
    let attempt = TestAttempt {
        id: AttemptId::new(0),
        user_id: user,
        test_id: test,
        attempt_number,
        status: AttemptStatus::Completed,
        started_at: now,
        expires_at: None,
        last_activity_at: now,
        last_save_at: None,
        completed_at: Some(now),
        score: Some(score),
        answers: Some(Answers::new()),
        draft_answers: Answers::new(),
        auto_extend_count: 0,
        randomized_config: RandomizedConfig { question_ids: vec![], option_order: Default::default() },
    };
    persistence.insert_attempt_if_none_in_progress(attempt).await.unwrap();
}

/// Marks every subsection of `section` completed, fakes a passing attempt
/// on `section_final` (if any), and recomputes the section/topic so
/// downstream availability checks see a `Completed` section.
pub async fn complete_section(
    persistence: &Arc<dyn PersistenceGateway>,
    progress: &Arc<ProgressAggregator>,
    user: UserId,
    topic: TopicId,
    section: SectionId,
    subsections: &[SubsectionId],
    section_final: Option<TestId>,
) {
    for subsection in subsections {
        mark_subsection_completed(persistence, user, *subsection).await;
    }
    if let Some(test) = section_final {
        insert_completed_attempt(persistence, user, test, 1, 100.0).await;
    }
    progress.recompute_section(user, section).await.unwrap();
    progress.recompute_topic(user, topic).await.unwrap();
}
