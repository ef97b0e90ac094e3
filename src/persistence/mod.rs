//! Persistence gateway (C1): entity CRUD plus the domain queries the other
//! components need, behind a single trait so the in-memory test fixture and
//! the optional `sqlite` backend are interchangeable.
//!
//! Every mutation here is expected to run in a transaction at the
//! implementation's discretion; failure semantics are fixed regardless of
//! backend: missing rows surface [`crate::error::ErrorKind::NotFound`],
//! uniqueness violations [`crate::error::ErrorKind::Duplicate`], optimistic
//! conflicts [`crate::error::ErrorKind::Conflict`]. Archive cascades
//! (archiving a [`Test`] archives its linked [`Question`]s; archiving a
//! [`Topic`] does not touch its [`Section`]s) are the implementation's
//! responsibility, not the caller's.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AttemptId, Question, QuestionId, Section, SectionId, SectionProgress, Subsection,
    SubsectionId, SubsectionProgress, Test, TestAttempt, TestId, TestQuestion, Topic,
    TopicId, TopicProgress, UserId,
};

pub use memory::InMemoryGateway;

/// A future boxed for storage behind a trait object; see `oracles::BoxFuture`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The persistence gateway (C1). Implementors own transactional semantics;
/// callers only see the fixed error codes above.
pub trait PersistenceGateway: Send + Sync {
    // -- Topic --------------------------------------------------------
    fn get_topic(&self, id: TopicId) -> BoxFuture<'_, Result<Topic>>;
    fn insert_topic(&self, topic: Topic) -> BoxFuture<'_, Result<Topic>>;
    fn update_topic(&self, topic: Topic) -> BoxFuture<'_, Result<Topic>>;
    /// Sets `is_archived = true`. Does not cascade to sections (spec §4.1).
    fn archive_topic(&self, id: TopicId) -> BoxFuture<'_, Result<()>>;
    /// Permanently removes an already-archived topic. `ErrArchiveFirst` if not archived.
    fn delete_topic(&self, id: TopicId) -> BoxFuture<'_, Result<()>>;

    // -- Section --------------------------------------------------------
    fn get_section(&self, id: SectionId) -> BoxFuture<'_, Result<Section>>;
    /// Non-archived sections of `topic`, ordered by `(order, id)` ascending.
    fn list_sections_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Section>>>;
    fn insert_section(&self, section: Section) -> BoxFuture<'_, Result<Section>>;
    fn update_section(&self, section: Section) -> BoxFuture<'_, Result<Section>>;
    fn archive_section(&self, id: SectionId) -> BoxFuture<'_, Result<()>>;
    fn delete_section(&self, id: SectionId) -> BoxFuture<'_, Result<()>>;

    // -- Subsection -------------------------------------------------------
    fn get_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<Subsection>>;
    /// Non-archived subsections of `section`, ordered by `(order, id)`.
    fn list_subsections_by_section(
        &self,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Vec<Subsection>>>;
    fn insert_subsection(&self, subsection: Subsection) -> BoxFuture<'_, Result<Subsection>>;
    fn update_subsection(&self, subsection: Subsection) -> BoxFuture<'_, Result<Subsection>>;
    fn archive_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<()>>;
    fn delete_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<()>>;

    // -- Question -----------------------------------------------------------
    fn get_question(&self, id: QuestionId) -> BoxFuture<'_, Result<Question>>;
    /// Non-archived questions owned by `topic`.
    fn list_questions_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Question>>>;
    fn insert_question(&self, question: Question) -> BoxFuture<'_, Result<Question>>;
    fn update_question(&self, question: Question) -> BoxFuture<'_, Result<Question>>;
    fn archive_question(&self, id: QuestionId) -> BoxFuture<'_, Result<()>>;
    fn delete_question(&self, id: QuestionId) -> BoxFuture<'_, Result<()>>;

    // -- Test -----------------------------------------------------------
    fn get_test(&self, id: TestId) -> BoxFuture<'_, Result<Test>>;
    /// Non-archived tests scoped to `section` (hinted or section_final).
    fn list_tests_by_section(&self, section: SectionId) -> BoxFuture<'_, Result<Vec<Test>>>;
    /// Non-archived tests scoped to `topic` (global_final).
    fn list_tests_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Test>>>;
    fn insert_test(&self, test: Test) -> BoxFuture<'_, Result<Test>>;
    fn update_test(&self, test: Test) -> BoxFuture<'_, Result<Test>>;
    /// Archives the test and cascades to every [`Question`] linked to it
    /// via [`TestQuestion`] (spec §4.1).
    fn archive_test(&self, id: TestId) -> BoxFuture<'_, Result<()>>;
    fn delete_test(&self, id: TestId) -> BoxFuture<'_, Result<()>>;

    // -- TestQuestion (composite key) -----------------------------------
    fn list_test_questions(&self, test: TestId) -> BoxFuture<'_, Result<Vec<TestQuestion>>>;
    fn add_test_question(&self, link: TestQuestion) -> BoxFuture<'_, Result<()>>;
    fn remove_test_question(
        &self,
        test: TestId,
        question: QuestionId,
    ) -> BoxFuture<'_, Result<()>>;

    // -- SubsectionProgress -----------------------------------------------
    fn get_subsection_progress(
        &self,
        user: UserId,
        subsection: SubsectionId,
    ) -> BoxFuture<'_, Result<Option<SubsectionProgress>>>;
    /// Progress rows for every subsection of `section`, for the aggregator.
    fn list_subsection_progress_for_section(
        &self,
        user: UserId,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Vec<SubsectionProgress>>>;
    /// Every subsection-progress row for `user`, across all subsections.
    /// Backs the activity tracker's cross-subsection parallelism check
    /// (spec §4.3); not used by the aggregator, which scopes by section.
    fn list_subsection_progress_for_user(
        &self,
        user: UserId,
    ) -> BoxFuture<'_, Result<Vec<SubsectionProgress>>>;
    /// Full replace (insert-or-update); unique on `(user_id, subsection_id)`.
    fn upsert_subsection_progress(
        &self,
        progress: SubsectionProgress,
    ) -> BoxFuture<'_, Result<SubsectionProgress>>;

    // -- SectionProgress / TopicProgress (C4-owned) -----------------------
    fn get_section_progress(
        &self,
        user: UserId,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Option<SectionProgress>>>;
    fn list_section_progress_for_topic(
        &self,
        user: UserId,
        topic: TopicId,
    ) -> BoxFuture<'_, Result<Vec<SectionProgress>>>;
    fn upsert_section_progress(
        &self,
        progress: SectionProgress,
    ) -> BoxFuture<'_, Result<SectionProgress>>;
    fn get_topic_progress(
        &self,
        user: UserId,
        topic: TopicId,
    ) -> BoxFuture<'_, Result<Option<TopicProgress>>>;
    fn upsert_topic_progress(
        &self,
        progress: TopicProgress,
    ) -> BoxFuture<'_, Result<TopicProgress>>;

    // -- TestAttempt ------------------------------------------------------
    fn get_attempt(&self, id: AttemptId) -> BoxFuture<'_, Result<TestAttempt>>;
    /// The single `in_progress` attempt for (user, test), if any (spec I4).
    fn get_in_progress_attempt(
        &self,
        user: UserId,
        test: TestId,
    ) -> BoxFuture<'_, Result<Option<TestAttempt>>>;
    /// Every `in_progress` attempt across all of `user`'s tests. Backs the
    /// material-access guard (C6), which has no narrower scope to check
    /// against until it has read the attempt's test to learn its scope.
    fn list_in_progress_attempts_for_user(
        &self,
        user: UserId,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>>;
    /// Count of attempts whose status is not `expired` (spec §4.7's `max_attempts` check).
    fn count_non_expired_attempts(
        &self,
        user: UserId,
        test: TestId,
    ) -> BoxFuture<'_, Result<u32>>;
    /// All attempts for (user, test), ordered by `attempt_number` ascending.
    fn list_attempts_for_user_test(
        &self,
        user: UserId,
        test: TestId,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>>;
    /// Best `score` across the user's `completed` attempts at `test`, if any.
    fn best_completed_score(
        &self,
        user: UserId,
        test: TestId,
    ) -> BoxFuture<'_, Result<Option<f64>>>;
    /// Atomically inserts `attempt`, enforcing I4: fails with
    /// `ErrAlreadyInProgress` if another `in_progress` attempt already
    /// exists for (user, test).
    fn insert_attempt_if_none_in_progress(
        &self,
        attempt: TestAttempt,
    ) -> BoxFuture<'_, Result<TestAttempt>>;
    /// Full replace of an existing attempt row (heartbeat/submit/expire/extend).
    fn update_attempt(&self, attempt: TestAttempt) -> BoxFuture<'_, Result<TestAttempt>>;
    fn delete_attempt(&self, id: AttemptId) -> BoxFuture<'_, Result<()>>;
    /// `in_progress` attempts whose `expires_at` is before `now` (C9 step 1).
    fn list_overdue_in_progress(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>>;
    /// `in_progress` attempts whose `expires_at` falls within `window` of
    /// `now` and whose `auto_extend_count` is below `max_extends` (C9 step 2).
    fn list_near_deadline(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
        max_extends: u32,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>>;
    /// `in_progress` attempts that never received a heartbeat
    /// (`last_activity_at == started_at`) and were started before `cutoff`
    /// (C9 step 3, "stale started").
    fn list_stale_unstarted(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>>;
    /// `in_progress` attempts that did receive at least one heartbeat but
    /// whose `last_activity_at` is before `cutoff` (C9 step 4).
    fn list_inactive_in_progress(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>>;
}
