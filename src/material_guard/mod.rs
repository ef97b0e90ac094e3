//! Material-access guard (C6): a pure function of (user, entity, open
//! attempts) that blocks reads of material currently locked behind an
//! active test attempt (spec §4.6).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::persistence::PersistenceGateway;
use crate::types::{SectionId, TestScope, TopicId, UserId};

/// The guard holds no state of its own; every check re-reads the user's
/// currently open attempts, since "open" is defined entirely by the
/// [`crate::types::TestAttempt`] rows, not by anything this guard owns.
/// It consults no oracle (spec §4.6).
pub struct MaterialGuard {
    persistence: Arc<dyn PersistenceGateway>,
}

impl MaterialGuard {
    #[must_use]
    pub fn new(persistence: Arc<dyn PersistenceGateway>) -> Self {
        Self { persistence }
    }

    /// Denies reading `section` (and by extension its subsections) while
    /// any of the user's `in_progress` attempts is scoped to it.
    pub async fn check_section(&self, user: UserId, section: SectionId) -> Result<()> {
        for attempt in self.persistence.list_in_progress_attempts_for_user(user).await? {
            let test = self.persistence.get_test(attempt.test_id).await?;
            if test.scope == TestScope::Section(section) {
                return Err(Error::material_locked()
                    .with_context(format!("attempt {} has section {section} locked", attempt.id)));
            }
        }
        Ok(())
    }

    /// Denies reading `topic`'s top-level material while any of the
    /// user's `in_progress` attempts is a GLOBAL_FINAL test scoped to it.
    pub async fn check_topic(&self, user: UserId, topic: TopicId) -> Result<()> {
        for attempt in self.persistence.list_in_progress_attempts_for_user(user).await? {
            let test = self.persistence.get_test(attempt.test_id).await?;
            if test.scope == TestScope::Topic(topic) {
                return Err(Error::material_locked()
                    .with_context(format!("attempt {} has topic {topic} locked", attempt.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryGateway;
    use crate::types::{
        Answers, Audit, AttemptId, AttemptStatus, RandomizedConfig, Test, TestAttempt, TestId,
        TestType,
    };
    use chrono::Utc;

    fn make_test(id: i64, scope: TestScope) -> Test {
        Test {
            id: TestId::new(id),
            title: "t".into(),
            test_type: TestType::SectionFinal,
            scope,
            duration_seconds: None,
            max_attempts: 3,
            completion_percentage: 80.0,
            target_questions: None,
            audit: Audit::new(Utc::now()),
        }
    }

    fn make_attempt(id: i64, user: UserId, test: TestId) -> TestAttempt {
        let now = Utc::now();
        TestAttempt {
            id: AttemptId::new(id),
            user_id: user,
            test_id: test,
            attempt_number: 1,
            status: AttemptStatus::InProgress,
            started_at: now,
            expires_at: None,
            last_activity_at: now,
            last_save_at: None,
            completed_at: None,
            score: None,
            answers: None::<Answers>,
            draft_answers: Default::default(),
            auto_extend_count: 0,
            randomized_config: RandomizedConfig { question_ids: vec![], option_order: Default::default() },
        }
    }

    #[tokio::test]
    async fn guard_allows_access_with_no_open_attempts() {
        let persistence: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let guard = MaterialGuard::new(persistence);
        assert!(guard.check_section(UserId::new(1), SectionId::new(1)).await.is_ok());
    }

    #[tokio::test]
    async fn guard_locks_section_with_an_open_scoped_attempt() {
        let persistence: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let user = UserId::new(1);
        let section = SectionId::new(7);
        let test = persistence.insert_test(make_test(0, TestScope::Section(section))).await.unwrap();
        persistence.insert_attempt_if_none_in_progress(make_attempt(0, user, test.id)).await.unwrap();

        let guard = MaterialGuard::new(persistence);
        let err = guard.check_section(user, section).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MaterialLocked);
    }

    #[tokio::test]
    async fn guard_does_not_lock_an_unrelated_section() {
        let persistence: Arc<dyn PersistenceGateway> = Arc::new(InMemoryGateway::new());
        let user = UserId::new(1);
        let test = persistence
            .insert_test(make_test(0, TestScope::Section(SectionId::new(7))))
            .await
            .unwrap();
        persistence.insert_attempt_if_none_in_progress(make_attempt(0, user, test.id)).await.unwrap();

        let guard = MaterialGuard::new(persistence);
        assert!(guard.check_section(user, SectionId::new(99)).await.is_ok());
    }
}
