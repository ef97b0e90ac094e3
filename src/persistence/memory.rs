//! In-memory [`PersistenceGateway`], always compiled.
//!
//! Doubles as the crate's test fixture (spec tests build a `CoreConfig` +
//! `Cache` + `InMemoryGateway` triple and exercise the services directly),
//! and as a ready-to-use backend for embedders that don't need SQLite.
//! Every operation takes the single store lock for its duration, which is
//! this backend's stand-in for "runs in a transaction."

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{BoxFuture, PersistenceGateway};
use crate::error::{Error, Result};
use crate::types::{
    AttemptId, AttemptStatus, Question, QuestionId, Section, SectionId, SectionProgress,
    Subsection, SubsectionId, SubsectionProgress, Test, TestAttempt, TestId, TestQuestion,
    Topic, TopicId, TopicProgress, UserId,
};

#[derive(Default)]
struct Store {
    topics: HashMap<TopicId, Topic>,
    sections: HashMap<SectionId, Section>,
    subsections: HashMap<SubsectionId, Subsection>,
    questions: HashMap<QuestionId, Question>,
    tests: HashMap<TestId, Test>,
    test_questions: Vec<TestQuestion>,
    subsection_progress: HashMap<(UserId, SubsectionId), SubsectionProgress>,
    section_progress: HashMap<(UserId, SectionId), SectionProgress>,
    topic_progress: HashMap<(UserId, TopicId), TopicProgress>,
    attempts: HashMap<AttemptId, TestAttempt>,
}

/// An in-process, lock-guarded [`PersistenceGateway`].
pub struct InMemoryGateway {
    store: Mutex<Store>,
    next_id: AtomicI64,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            next_id: AtomicI64::new(1),
        }
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

macro_rules! get_or_not_found {
    ($map:expr, $id:expr) => {
        $map.get(&$id).cloned().ok_or_else(Error::not_found)
    };
}

impl PersistenceGateway for InMemoryGateway {
    fn get_topic(&self, id: TopicId) -> BoxFuture<'_, Result<Topic>> {
        Box::pin(async move {
            let store = self.store.lock();
            get_or_not_found!(store.topics, id)
        })
    }

    fn insert_topic(&self, mut topic: Topic) -> BoxFuture<'_, Result<Topic>> {
        Box::pin(async move {
            if topic.id.get() == 0 {
                topic.id = TopicId::new(self.next());
            }
            let mut store = self.store.lock();
            if store.topics.contains_key(&topic.id) {
                return Err(Error::duplicate());
            }
            store.topics.insert(topic.id, topic.clone());
            Ok(topic)
        })
    }

    fn update_topic(&self, topic: Topic) -> BoxFuture<'_, Result<Topic>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            if !store.topics.contains_key(&topic.id) {
                return Err(Error::not_found());
            }
            store.topics.insert(topic.id, topic.clone());
            Ok(topic)
        })
    }

    fn archive_topic(&self, id: TopicId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let topic = store.topics.get_mut(&id).ok_or_else(Error::not_found)?;
            topic.audit.is_archived = true;
            topic.audit.updated_at = Utc::now();
            Ok(())
        })
    }

    fn delete_topic(&self, id: TopicId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let topic = store.topics.get(&id).ok_or_else(Error::not_found)?;
            if !topic.audit.is_archived {
                return Err(Error::archive_first());
            }
            store.topics.remove(&id);
            Ok(())
        })
    }

    fn get_section(&self, id: SectionId) -> BoxFuture<'_, Result<Section>> {
        Box::pin(async move {
            let store = self.store.lock();
            get_or_not_found!(store.sections, id)
        })
    }

    fn list_sections_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Section>>> {
        Box::pin(async move {
            let store = self.store.lock();
            let mut sections: Vec<Section> = store
                .sections
                .values()
                .filter(|s| s.topic_id == topic && !s.audit.is_archived)
                .cloned()
                .collect();
            sections.sort_by_key(|s| (s.order, s.id));
            Ok(sections)
        })
    }

    fn insert_section(&self, mut section: Section) -> BoxFuture<'_, Result<Section>> {
        Box::pin(async move {
            if section.id.get() == 0 {
                section.id = SectionId::new(self.next());
            }
            let mut store = self.store.lock();
            if store.sections.contains_key(&section.id) {
                return Err(Error::duplicate());
            }
            store.sections.insert(section.id, section.clone());
            Ok(section)
        })
    }

    fn update_section(&self, section: Section) -> BoxFuture<'_, Result<Section>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            if !store.sections.contains_key(&section.id) {
                return Err(Error::not_found());
            }
            store.sections.insert(section.id, section.clone());
            Ok(section)
        })
    }

    fn archive_section(&self, id: SectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let section = store.sections.get_mut(&id).ok_or_else(Error::not_found)?;
            section.audit.is_archived = true;
            section.audit.updated_at = Utc::now();
            Ok(())
        })
    }

    fn delete_section(&self, id: SectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let section = store.sections.get(&id).ok_or_else(Error::not_found)?;
            if !section.audit.is_archived {
                return Err(Error::archive_first());
            }
            store.sections.remove(&id);
            Ok(())
        })
    }

    fn get_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<Subsection>> {
        Box::pin(async move {
            let store = self.store.lock();
            get_or_not_found!(store.subsections, id)
        })
    }

    fn list_subsections_by_section(
        &self,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Vec<Subsection>>> {
        Box::pin(async move {
            let store = self.store.lock();
            let mut subs: Vec<Subsection> = store
                .subsections
                .values()
                .filter(|s| s.section_id == section && !s.audit.is_archived)
                .cloned()
                .collect();
            subs.sort_by_key(|s| (s.order, s.id));
            Ok(subs)
        })
    }

    fn insert_subsection(&self, mut subsection: Subsection) -> BoxFuture<'_, Result<Subsection>> {
        Box::pin(async move {
            if subsection.id.get() == 0 {
                subsection.id = SubsectionId::new(self.next());
            }
            let mut store = self.store.lock();
            if store.subsections.contains_key(&subsection.id) {
                return Err(Error::duplicate());
            }
            store.subsections.insert(subsection.id, subsection.clone());
            Ok(subsection)
        })
    }

    fn update_subsection(&self, subsection: Subsection) -> BoxFuture<'_, Result<Subsection>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            if !store.subsections.contains_key(&subsection.id) {
                return Err(Error::not_found());
            }
            store.subsections.insert(subsection.id, subsection.clone());
            Ok(subsection)
        })
    }

    fn archive_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let sub = store.subsections.get_mut(&id).ok_or_else(Error::not_found)?;
            sub.audit.is_archived = true;
            sub.audit.updated_at = Utc::now();
            Ok(())
        })
    }

    fn delete_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let sub = store.subsections.get(&id).ok_or_else(Error::not_found)?;
            if !sub.audit.is_archived {
                return Err(Error::archive_first());
            }
            store.subsections.remove(&id);
            Ok(())
        })
    }

    fn get_question(&self, id: QuestionId) -> BoxFuture<'_, Result<Question>> {
        Box::pin(async move {
            let store = self.store.lock();
            get_or_not_found!(store.questions, id)
        })
    }

    fn list_questions_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Question>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .questions
                .values()
                .filter(|q| q.topic_id == topic && !q.audit.is_archived)
                .cloned()
                .collect())
        })
    }

    fn insert_question(&self, mut question: Question) -> BoxFuture<'_, Result<Question>> {
        Box::pin(async move {
            if question.id.get() == 0 {
                question.id = QuestionId::new(self.next());
            }
            let mut store = self.store.lock();
            if store.questions.contains_key(&question.id) {
                return Err(Error::duplicate());
            }
            store.questions.insert(question.id, question.clone());
            Ok(question)
        })
    }

    fn update_question(&self, question: Question) -> BoxFuture<'_, Result<Question>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            if !store.questions.contains_key(&question.id) {
                return Err(Error::not_found());
            }
            store.questions.insert(question.id, question.clone());
            Ok(question)
        })
    }

    fn archive_question(&self, id: QuestionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let q = store.questions.get_mut(&id).ok_or_else(Error::not_found)?;
            q.audit.is_archived = true;
            q.audit.updated_at = Utc::now();
            Ok(())
        })
    }

    fn delete_question(&self, id: QuestionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let q = store.questions.get(&id).ok_or_else(Error::not_found)?;
            if !q.audit.is_archived {
                return Err(Error::archive_first());
            }
            store.questions.remove(&id);
            Ok(())
        })
    }

    fn get_test(&self, id: TestId) -> BoxFuture<'_, Result<Test>> {
        Box::pin(async move {
            let store = self.store.lock();
            get_or_not_found!(store.tests, id)
        })
    }

    fn list_tests_by_section(&self, section: SectionId) -> BoxFuture<'_, Result<Vec<Test>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .tests
                .values()
                .filter(|t| t.section_scope() == Some(section) && !t.audit.is_archived)
                .cloned()
                .collect())
        })
    }

    fn list_tests_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Test>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .tests
                .values()
                .filter(|t| t.topic_scope() == Some(topic) && !t.audit.is_archived)
                .cloned()
                .collect())
        })
    }

    fn insert_test(&self, mut test: Test) -> BoxFuture<'_, Result<Test>> {
        Box::pin(async move {
            if test.id.get() == 0 {
                test.id = TestId::new(self.next());
            }
            let mut store = self.store.lock();
            if store.tests.contains_key(&test.id) {
                return Err(Error::duplicate());
            }
            store.tests.insert(test.id, test.clone());
            Ok(test)
        })
    }

    fn update_test(&self, test: Test) -> BoxFuture<'_, Result<Test>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            if !store.tests.contains_key(&test.id) {
                return Err(Error::not_found());
            }
            store.tests.insert(test.id, test.clone());
            Ok(test)
        })
    }

    fn archive_test(&self, id: TestId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            {
                let test = store.tests.get_mut(&id).ok_or_else(Error::not_found)?;
                test.audit.is_archived = true;
                test.audit.updated_at = Utc::now();
            }
            let linked: Vec<QuestionId> = store
                .test_questions
                .iter()
                .filter(|tq| tq.test_id == id)
                .map(|tq| tq.question_id)
                .collect();
            let now = Utc::now();
            for qid in linked {
                if let Some(q) = store.questions.get_mut(&qid) {
                    q.audit.is_archived = true;
                    q.audit.updated_at = now;
                }
            }
            Ok(())
        })
    }

    fn delete_test(&self, id: TestId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let test = store.tests.get(&id).ok_or_else(Error::not_found)?;
            if !test.audit.is_archived {
                return Err(Error::archive_first());
            }
            store.tests.remove(&id);
            store.test_questions.retain(|tq| tq.test_id != id);
            Ok(())
        })
    }

    fn list_test_questions(&self, test: TestId) -> BoxFuture<'_, Result<Vec<TestQuestion>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .test_questions
                .iter()
                .filter(|tq| tq.test_id == test)
                .cloned()
                .collect())
        })
    }

    fn add_test_question(&self, link: TestQuestion) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            if store
                .test_questions
                .iter()
                .any(|tq| tq.test_id == link.test_id && tq.question_id == link.question_id)
            {
                return Err(Error::duplicate());
            }
            store.test_questions.push(link);
            Ok(())
        })
    }

    fn remove_test_question(
        &self,
        test: TestId,
        question: QuestionId,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let before = store.test_questions.len();
            store
                .test_questions
                .retain(|tq| !(tq.test_id == test && tq.question_id == question));
            if store.test_questions.len() == before {
                return Err(Error::not_found());
            }
            Ok(())
        })
    }

    fn get_subsection_progress(
        &self,
        user: UserId,
        subsection: SubsectionId,
    ) -> BoxFuture<'_, Result<Option<SubsectionProgress>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store.subsection_progress.get(&(user, subsection)).cloned())
        })
    }

    fn list_subsection_progress_for_section(
        &self,
        user: UserId,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Vec<SubsectionProgress>>> {
        Box::pin(async move {
            let store = self.store.lock();
            let sub_ids: Vec<SubsectionId> = store
                .subsections
                .values()
                .filter(|s| s.section_id == section && !s.audit.is_archived)
                .map(|s| s.id)
                .collect();
            Ok(sub_ids
                .into_iter()
                .filter_map(|sid| store.subsection_progress.get(&(user, sid)).cloned())
                .collect())
        })
    }

    fn list_subsection_progress_for_user(
        &self,
        user: UserId,
    ) -> BoxFuture<'_, Result<Vec<SubsectionProgress>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .subsection_progress
                .iter()
                .filter(|((u, _), _)| *u == user)
                .map(|(_, p)| p.clone())
                .collect())
        })
    }

    fn upsert_subsection_progress(
        &self,
        progress: SubsectionProgress,
    ) -> BoxFuture<'_, Result<SubsectionProgress>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            store
                .subsection_progress
                .insert((progress.user_id, progress.subsection_id), progress.clone());
            Ok(progress)
        })
    }

    fn get_section_progress(
        &self,
        user: UserId,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Option<SectionProgress>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store.section_progress.get(&(user, section)).cloned())
        })
    }

    fn list_section_progress_for_topic(
        &self,
        user: UserId,
        topic: TopicId,
    ) -> BoxFuture<'_, Result<Vec<SectionProgress>>> {
        Box::pin(async move {
            let store = self.store.lock();
            let section_ids: Vec<SectionId> = store
                .sections
                .values()
                .filter(|s| s.topic_id == topic && !s.audit.is_archived)
                .map(|s| s.id)
                .collect();
            Ok(section_ids
                .into_iter()
                .filter_map(|sid| store.section_progress.get(&(user, sid)).cloned())
                .collect())
        })
    }

    fn upsert_section_progress(
        &self,
        progress: SectionProgress,
    ) -> BoxFuture<'_, Result<SectionProgress>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            store
                .section_progress
                .insert((progress.user_id, progress.section_id), progress.clone());
            Ok(progress)
        })
    }

    fn get_topic_progress(
        &self,
        user: UserId,
        topic: TopicId,
    ) -> BoxFuture<'_, Result<Option<TopicProgress>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store.topic_progress.get(&(user, topic)).cloned())
        })
    }

    fn upsert_topic_progress(
        &self,
        progress: TopicProgress,
    ) -> BoxFuture<'_, Result<TopicProgress>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            store
                .topic_progress
                .insert((progress.user_id, progress.topic_id), progress.clone());
            Ok(progress)
        })
    }

    fn get_attempt(&self, id: AttemptId) -> BoxFuture<'_, Result<TestAttempt>> {
        Box::pin(async move {
            let store = self.store.lock();
            get_or_not_found!(store.attempts, id)
        })
    }

    fn get_in_progress_attempt(
        &self,
        user: UserId,
        test: TestId,
    ) -> BoxFuture<'_, Result<Option<TestAttempt>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .attempts
                .values()
                .find(|a| {
                    a.user_id == user && a.test_id == test && a.status == AttemptStatus::InProgress
                })
                .cloned())
        })
    }

    fn list_in_progress_attempts_for_user(&self, user: UserId) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .attempts
                .values()
                .filter(|a| a.user_id == user && a.status == AttemptStatus::InProgress)
                .cloned()
                .collect())
        })
    }

    fn count_non_expired_attempts(&self, user: UserId, test: TestId) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .attempts
                .values()
                .filter(|a| {
                    a.user_id == user && a.test_id == test && a.status != AttemptStatus::Expired
                })
                .count() as u32)
        })
    }

    fn list_attempts_for_user_test(
        &self,
        user: UserId,
        test: TestId,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let store = self.store.lock();
            let mut attempts: Vec<TestAttempt> = store
                .attempts
                .values()
                .filter(|a| a.user_id == user && a.test_id == test)
                .cloned()
                .collect();
            attempts.sort_by_key(|a| a.attempt_number);
            Ok(attempts)
        })
    }

    fn best_completed_score(&self, user: UserId, test: TestId) -> BoxFuture<'_, Result<Option<f64>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .attempts
                .values()
                .filter(|a| {
                    a.user_id == user && a.test_id == test && a.status == AttemptStatus::Completed
                })
                .filter_map(|a| a.score)
                .fold(None, |best: Option<f64>, score| {
                    Some(best.map_or(score, |b| b.max(score)))
                }))
        })
    }

    fn insert_attempt_if_none_in_progress(
        &self,
        mut attempt: TestAttempt,
    ) -> BoxFuture<'_, Result<TestAttempt>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            let already_in_progress = store.attempts.values().any(|a| {
                a.user_id == attempt.user_id
                    && a.test_id == attempt.test_id
                    && a.status == AttemptStatus::InProgress
            });
            if already_in_progress {
                return Err(Error::already_in_progress());
            }
            if attempt.id.get() == 0 {
                attempt.id = AttemptId::new(self.next());
            }
            store.attempts.insert(attempt.id, attempt.clone());
            Ok(attempt)
        })
    }

    fn update_attempt(&self, attempt: TestAttempt) -> BoxFuture<'_, Result<TestAttempt>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            if !store.attempts.contains_key(&attempt.id) {
                return Err(Error::not_found());
            }
            store.attempts.insert(attempt.id, attempt.clone());
            Ok(attempt)
        })
    }

    fn delete_attempt(&self, id: AttemptId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut store = self.store.lock();
            store.attempts.remove(&id).ok_or_else(Error::not_found)?;
            Ok(())
        })
    }

    fn list_overdue_in_progress(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .attempts
                .values()
                .filter(|a| {
                    a.status == AttemptStatus::InProgress
                        && a.expires_at.is_some_and(|exp| exp < now)
                })
                .cloned()
                .collect())
        })
    }

    fn list_near_deadline(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
        max_extends: u32,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let store = self.store.lock();
            let deadline = now + window;
            Ok(store
                .attempts
                .values()
                .filter(|a| {
                    a.status == AttemptStatus::InProgress
                        && a.auto_extend_count < max_extends
                        && a.expires_at.is_some_and(|exp| exp >= now && exp <= deadline)
                })
                .cloned()
                .collect())
        })
    }

    fn list_stale_unstarted(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .attempts
                .values()
                .filter(|a| {
                    a.status == AttemptStatus::InProgress
                        && a.last_activity_at == a.started_at
                        && a.started_at < cutoff
                })
                .cloned()
                .collect())
        })
    }

    fn list_inactive_in_progress(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let store = self.store.lock();
            Ok(store
                .attempts
                .values()
                .filter(|a| {
                    a.status == AttemptStatus::InProgress
                        && a.last_activity_at != a.started_at
                        && a.last_activity_at < cutoff
                })
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Audit, Test, TestScope, TestType};

    fn sample_test(id: i64, scope: TestScope) -> Test {
        Test {
            id: TestId::new(id),
            title: "t".into(),
            test_type: TestType::Hinted,
            scope,
            duration_seconds: None,
            max_attempts: 3,
            completion_percentage: 80.0,
            target_questions: None,
            audit: Audit::new(Utc::now()),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let gw = InMemoryGateway::new();
        let topic = Topic {
            id: TopicId::new(0),
            title: "algebra".into(),
            description: None,
            category: None,
            image_path: None,
            creator_id: UserId::new(1),
            audit: Audit::new(Utc::now()),
        };
        let inserted = gw.insert_topic(topic).await.unwrap();
        assert_ne!(inserted.id.get(), 0);
        let fetched = gw.get_topic(inserted.id).await.unwrap();
        assert_eq!(fetched.title, "algebra");
    }

    #[tokio::test]
    async fn delete_requires_archive_first() {
        let gw = InMemoryGateway::new();
        let test = gw
            .insert_test(sample_test(0, TestScope::Topic(TopicId::new(1))))
            .await
            .unwrap();
        let err = gw.delete_test(test.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ArchiveFirst);
        gw.archive_test(test.id).await.unwrap();
        assert!(gw.delete_test(test.id).await.is_ok());
    }

    #[tokio::test]
    async fn archiving_test_cascades_to_linked_questions() {
        let gw = InMemoryGateway::new();
        let test = gw
            .insert_test(sample_test(0, TestScope::Topic(TopicId::new(1))))
            .await
            .unwrap();
        let question = gw
            .insert_question(Question {
                id: QuestionId::new(0),
                topic_id: TopicId::new(1),
                section_id: None,
                question_type: crate::types::QuestionType::SingleChoice,
                prompt: "2+2?".into(),
                options: vec![],
                correct_answer: crate::types::CorrectAnswer::Single(1),
                hint: None,
                is_final: false,
                created_by: UserId::new(1),
                audit: Audit::new(Utc::now()),
            })
            .await
            .unwrap();
        gw.add_test_question(TestQuestion {
            test_id: test.id,
            question_id: question.id,
            added_by: UserId::new(1),
            added_at: Utc::now(),
        })
        .await
        .unwrap();

        gw.archive_test(test.id).await.unwrap();
        let archived_question = gw.get_question(question.id).await.unwrap();
        assert!(archived_question.audit.is_archived);
    }

    #[tokio::test]
    async fn concurrent_start_is_serialized_by_the_store_lock() {
        let gw = std::sync::Arc::new(InMemoryGateway::new());
        let user = UserId::new(1);
        let test = TestId::new(1);
        let mut handles = Vec::new();
        for i in 0..4 {
            let gw = std::sync::Arc::clone(&gw);
            handles.push(tokio::spawn(async move {
                let now = Utc::now();
                gw.insert_attempt_if_none_in_progress(TestAttempt {
                    id: AttemptId::new(0),
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
                    answers: None,
                    draft_answers: Default::default(),
                    auto_extend_count: 0,
                    randomized_config: crate::types::RandomizedConfig {
                        question_ids: vec![],
                        option_order: Default::default(),
                    },
                })
                .await
                .map(|_| i)
            }));
        }
        let mut ok_count = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok_count += 1;
            }
        }
        assert_eq!(ok_count, 1);
    }
}
