//! Test attempt engine (C7): the `Start`/`Heartbeat`/`Submit`/`ResetLast`
//! state machine for [`crate::types::TestAttempt`] (spec §4.7).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, instrument, warn};

use crate::availability::AvailabilityResolver;
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::keyed_lock::KeyedLocks;
use crate::oracles::{ensure_can_manage_topic, CompletionEvent, NotificationSink, NullNotificationSink, TopicAuthorOracle};
use crate::persistence::PersistenceGateway;
use crate::progress::ProgressAggregator;
use crate::question_bank::QuestionBank;
use crate::types::{
    Answers, AttemptId, AttemptStatus, CorrectAnswer, Question, RandomizedConfig, Test, TestAttempt,
    TestId, TestScope, TestType, TopicId, UserId,
};

/// Result of a successful `Heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatResult {
    /// Seconds until `expires_at`; `None` for an untimed test.
    pub remaining_seconds: Option<u64>,
    pub auto_extend_count: u32,
}

/// The test attempt engine (C7).
pub struct TestEngine {
    persistence: Arc<dyn PersistenceGateway>,
    progress: Arc<ProgressAggregator>,
    availability: Arc<AvailabilityResolver>,
    question_bank: Arc<QuestionBank>,
    topic_author: Arc<dyn TopicAuthorOracle>,
    notifications: Arc<dyn NotificationSink>,
    config: Arc<CoreConfig>,
    /// Serializes `Start`/`Submit` per (user, test) — spec §5's "at most one
    /// `in_progress` survives" ordering guarantee.
    attempt_locks: KeyedLocks<(UserId, TestId)>,
    /// Serializes `Heartbeat` per attempt, so a cancelled update can never
    /// partially credit time (spec §5).
    heartbeat_locks: KeyedLocks<AttemptId>,
}

impl TestEngine {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        progress: Arc<ProgressAggregator>,
        availability: Arc<AvailabilityResolver>,
        question_bank: Arc<QuestionBank>,
        topic_author: Arc<dyn TopicAuthorOracle>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            persistence,
            progress,
            availability,
            question_bank,
            topic_author,
            notifications: Arc::new(NullNotificationSink),
            config,
            attempt_locks: KeyedLocks::new(),
            heartbeat_locks: KeyedLocks::new(),
        }
    }

    /// Wires a non-default notification sink (spec §6's optional collaborator).
    #[must_use]
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    /// `Start(user, test)` — spec §4.7.
    #[instrument(skip(self))]
    pub async fn start(&self, user: UserId, test: TestId) -> Result<TestAttempt> {
        let _span = crate::observability::span_for("start_attempt", user.get(), test.get()).entered();
        let _guard = self.attempt_locks.lock((user, test)).await;

        let availability = self.availability.test_availability(user, test).await?;
        if !availability.available {
            return Err(Error::not_available().with_context(availability.reason));
        }

        let test_row = self.persistence.get_test(test).await?;
        let non_expired = self.persistence.count_non_expired_attempts(user, test).await?;
        if non_expired >= test_row.max_attempts {
            return Err(Error::no_attempts_left());
        }

        let prior_count = self.persistence.list_attempts_for_user_test(user, test).await?.len() as u32;
        let now = Utc::now();
        let expires_at = test_row.duration_seconds.map(|d| now + chrono::Duration::seconds(d as i64));

        let placeholder = TestAttempt {
            id: AttemptId::new(0),
            user_id: user,
            test_id: test,
            attempt_number: prior_count + 1,
            status: AttemptStatus::InProgress,
            started_at: now,
            expires_at,
            last_activity_at: now,
            last_save_at: None,
            completed_at: None,
            score: None,
            answers: None,
            draft_answers: Answers::new(),
            auto_extend_count: 0,
            randomized_config: RandomizedConfig { question_ids: vec![], option_order: Default::default() },
        };
        let inserted = self.persistence.insert_attempt_if_none_in_progress(placeholder).await?;

        let questions = self.select_questions(&test_row, inserted.id).await?;
        let mut finalized = inserted;
        finalized.randomized_config = build_randomized_config(finalized.id, &questions);
        let finalized = self.persistence.update_attempt(finalized).await?;

        info!(user = %user, test = %test, attempt = %finalized.id, "test attempt started");
        Ok(finalized)
    }

    async fn select_questions(&self, test: &Test, attempt: AttemptId) -> Result<Vec<Question>> {
        match test.test_type {
            TestType::Hinted | TestType::SectionFinal => {
                let links = self.persistence.list_test_questions(test.id).await?;
                let mut out = Vec::with_capacity(links.len());
                for link in links {
                    if let Ok(question) = self.persistence.get_question(link.question_id).await {
                        if !question.audit.is_archived {
                            out.push(question);
                        }
                    }
                }
                if out.is_empty() {
                    return Err(Error::no_questions());
                }
                Ok(out)
            }
            TestType::GlobalFinal => {
                let topic = test
                    .topic_scope()
                    .ok_or_else(|| Error::internal().with_context("global-final test missing a topic scope"))?;
                self.question_bank.compose(topic, test.target_questions, attempt).await
            }
        }
    }

    /// `Heartbeat(attempt, draft_answers?)` — spec §4.7.
    #[instrument(skip(self, draft_answers))]
    pub async fn heartbeat(&self, attempt_id: AttemptId, draft_answers: Option<Answers>) -> Result<HeartbeatResult> {
        let _guard = self.heartbeat_locks.lock(attempt_id).await;
        let mut attempt = self.persistence.get_attempt(attempt_id).await?;

        match attempt.status {
            AttemptStatus::Completed => return Err(Error::already_submitted()),
            AttemptStatus::Expired => return Err(Error::expired()),
            AttemptStatus::InProgress => {}
        }

        let now = Utc::now();
        if attempt.expires_at.is_some_and(|exp| now > exp) {
            attempt.status = AttemptStatus::Expired;
            self.persistence.update_attempt(attempt).await?;
            warn!(attempt = %attempt_id, "heartbeat on an attempt past its deadline; expiring it");
            return Err(Error::expired());
        }

        attempt.last_activity_at = now;
        attempt.last_save_at = Some(now);
        if let Some(draft) = draft_answers {
            attempt.draft_answers = draft;
        }

        if let Some(expires_at) = attempt.expires_at {
            let margin = chrono::Duration::from_std(self.config.extend_margin).unwrap_or(chrono::Duration::zero());
            if now > expires_at - margin && attempt.auto_extend_count < self.config.max_auto_extends {
                let step = chrono::Duration::from_std(self.config.extend_step).unwrap_or(chrono::Duration::zero());
                attempt.expires_at = Some(expires_at + step);
                attempt.auto_extend_count += 1;
            }
        }

        let remaining = attempt.expires_at.map(|exp| (exp - now).num_seconds().max(0) as u64);
        let auto_extend_count = attempt.auto_extend_count;
        self.persistence.update_attempt(attempt).await?;
        Ok(HeartbeatResult { remaining_seconds: remaining, auto_extend_count })
    }

    /// `Submit(attempt, answers, time_spent)` — spec §4.7.
    #[instrument(skip(self, answers))]
    pub async fn submit(&self, attempt_id: AttemptId, answers: Answers, _time_spent_seconds: u64) -> Result<TestAttempt> {
        let lookup = self.persistence.get_attempt(attempt_id).await?;
        let _guard = self.attempt_locks.lock((lookup.user_id, lookup.test_id)).await;
        let mut attempt = self.persistence.get_attempt(attempt_id).await?;

        match attempt.status {
            AttemptStatus::Completed => return Err(Error::already_submitted()),
            AttemptStatus::Expired => return Err(Error::expired()),
            AttemptStatus::InProgress => {}
        }

        let now = Utc::now();
        if attempt.expires_at.is_some_and(|exp| now > exp) {
            attempt.status = AttemptStatus::Expired;
            self.persistence.update_attempt(attempt).await?;
            return Err(Error::expired());
        }

        let test = self.persistence.get_test(attempt.test_id).await?;
        let mut correct = 0u32;
        let total = attempt.randomized_config.question_ids.len() as u32;
        for question_id in &attempt.randomized_config.question_ids {
            let question = self.persistence.get_question(*question_id).await?;
            if let Some(given) = answers.get(question_id) {
                if answers_match(&question.correct_answer, given) {
                    correct += 1;
                }
            }
        }
        let score = if total > 0 { 100.0 * f64::from(correct) / f64::from(total) } else { 0.0 };

        attempt.status = AttemptStatus::Completed;
        attempt.score = Some(score);
        attempt.answers = Some(answers);
        attempt.completed_at = Some(now);
        attempt.last_activity_at = now;
        let updated = self.persistence.update_attempt(attempt).await?;

        self.invalidate_after_submit(&test, updated.user_id).await?;

        if score >= test.completion_percentage {
            self.notifications
                .notify_completion(
                    updated.user_id,
                    CompletionEvent::TestPassed { test_id: test.id, score: score.round() as u32 },
                )
                .await;
        }

        info!(attempt = %attempt_id, score, "test attempt submitted");
        Ok(updated)
    }

    async fn invalidate_after_submit(&self, test: &Test, user: UserId) -> Result<()> {
        match test.scope {
            TestScope::Section(section) => {
                let section_row = self.persistence.get_section(section).await?;
                self.progress.recompute_section(user, section).await?;
                self.progress.recompute_topic(user, section_row.topic_id).await?;

                let siblings = self.persistence.list_sections_by_topic(section_row.topic_id).await?;
                if let Some(index) = siblings.iter().position(|s| s.id == section) {
                    if let Some(next) = siblings.get(index + 1) {
                        self.availability.invalidate_section(user, next.id);
                    }
                }
                self.availability.invalidate_topic_finals(user, section_row.topic_id).await?;
            }
            TestScope::Topic(topic) => {
                self.availability.invalidate_topic_finals(user, topic).await?;
            }
        }
        self.availability.invalidate_test(user, test.id);
        Ok(())
    }

    /// `ResetLast(teacher, test, user)` — spec §4.7.
    #[instrument(skip(self))]
    pub async fn reset_last(&self, teacher: UserId, test: TestId, student: UserId) -> Result<()> {
        let test_row = self.persistence.get_test(test).await?;
        let topic = self.enclosing_topic(&test_row).await?;
        ensure_can_manage_topic(self.topic_author.as_ref(), teacher, topic).await?;

        let mut attempts = self.persistence.list_attempts_for_user_test(student, test).await?;
        let Some(last) = attempts.iter().max_by_key(|a| (a.attempt_number, a.started_at)).cloned() else {
            return Ok(());
        };
        attempts.clear();
        self.persistence.delete_attempt(last.id).await?;
        info!(teacher = %teacher, test = %test, student = %student, attempt = %last.id, "last attempt reset");
        Ok(())
    }

    async fn enclosing_topic(&self, test: &Test) -> Result<TopicId> {
        match test.scope {
            TestScope::Topic(topic) => Ok(topic),
            TestScope::Section(section) => Ok(self.persistence.get_section(section).await?.topic_id),
        }
    }

    pub async fn get_attempt_status(&self, attempt: AttemptId) -> Result<TestAttempt> {
        self.persistence.get_attempt(attempt).await
    }

    pub async fn list_user_attempts(&self, user: UserId, test: TestId) -> Result<Vec<TestAttempt>> {
        self.persistence.list_attempts_for_user_test(user, test).await
    }
}

fn answers_match(correct: &CorrectAnswer, given: &CorrectAnswer) -> bool {
    match (correct, given) {
        (CorrectAnswer::Single(a), CorrectAnswer::Single(b)) => a == b,
        (CorrectAnswer::Multiple(a), CorrectAnswer::Multiple(b)) => {
            let a: BTreeSet<_> = a.iter().collect();
            let b: BTreeSet<_> = b.iter().collect();
            a == b
        }
        _ => false,
    }
}

/// Freezes question order and per-question option order, seeded from the
/// attempt id (spec I6, spec §4.7's "frozen (ordered) question ids").
fn build_randomized_config(attempt: AttemptId, questions: &[Question]) -> RandomizedConfig {
    let mut rng = ChaCha8Rng::seed_from_u64(attempt.get() as u64);
    let mut question_ids: Vec<_> = questions.iter().map(|q| q.id).collect();
    question_ids.shuffle(&mut rng);

    let mut option_order = std::collections::BTreeMap::new();
    for question in questions {
        let mut option_ids: Vec<u32> = question.options.iter().map(|o| o.id).collect();
        option_ids.shuffle(&mut rng);
        option_order.insert(question.id, option_ids);
    }

    RandomizedConfig { question_ids, option_order }
}
