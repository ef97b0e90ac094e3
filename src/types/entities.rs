//! Domain entities from spec §3.
//!
//! Every entity carries `created_at`, `updated_at`, and `is_archived`
//! (soft-delete; archived rows remain reachable only by explicit queries,
//! spec I7). Percentages are stored as `f64` with two-decimal precision on
//! write (spec §4.4's rounding rule); wire rounding to the nearest integer
//! happens at the service boundary, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::id::{AttemptId, QuestionId, SectionId, SubsectionId, TestId, TopicId, UserId};

/// Fields common to every soft-deletable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_archived: bool,
}

impl Audit {
    /// Creates a fresh, non-archived audit record stamped `at`.
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            updated_at: at,
            is_archived: false,
        }
    }
}

/// A course topic, owning an ordered list of [`Section`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image_path: Option<String>,
    pub creator_id: UserId,
    pub audit: Audit,
}

/// An ordered subdivision of a [`Topic`], owning [`Subsection`]s and
/// optionally section-final [`Test`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub topic_id: TopicId,
    pub title: String,
    /// Sort key; ties broken by `id` ascending (spec §3).
    pub order: i32,
    pub content: Option<String>,
    pub description: Option<String>,
    pub audit: Audit,
}

/// The kind of learning material a [`Subsection`] presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsectionType {
    Text,
    Pdf,
    Video,
    Presentation,
}

impl SubsectionType {
    /// The per-type default weight used by the progress aggregator (§4.4)
    /// when a subsection doesn't override it.
    #[must_use]
    pub const fn default_weight(self) -> f64 {
        match self {
            Self::Text => 1.0,
            Self::Pdf => 1.0,
            Self::Video => 1.5,
            Self::Presentation => 1.5,
        }
    }
}

/// A single piece of learning material inside a [`Section`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subsection {
    pub id: SubsectionId,
    pub section_id: SectionId,
    pub title: String,
    pub order: i32,
    pub kind: SubsectionType,
    pub weight: f64,
    /// Display-only estimate shown to the learner; never used in math.
    pub required_time_minutes: Option<u32>,
    /// Credit threshold; falls back to `CoreConfig::default_min_time` when `None`.
    pub min_time_seconds: Option<u64>,
    pub audit: Audit,
}

impl Subsection {
    /// Resolves the effective completion threshold, applying the
    /// configured default when the row doesn't override it.
    #[must_use]
    pub fn effective_min_time_seconds(&self, default_min_time_seconds: u64) -> u64 {
        self.min_time_seconds.unwrap_or(default_min_time_seconds)
    }
}

/// The shape of a bank question's answer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
}

/// An ordered answer option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Option_ {
    pub id: u32,
    pub text: String,
}

/// The correct answer, shaped per [`QuestionType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectAnswer {
    /// `single_choice`: the correct option id.
    Single(u32),
    /// `multiple_choice`: the set of correct option ids.
    Multiple(Vec<u32>),
}

/// A question bank entry, owned by a [`Topic`] (optionally scoped to a
/// [`Section`]) and shared across zero or more [`Test`]s via
/// [`TestQuestion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub topic_id: TopicId,
    pub section_id: Option<SectionId>,
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: Vec<Option_>,
    pub correct_answer: CorrectAnswer,
    pub hint: Option<String>,
    /// Eligible for automatic final-test composition (spec §4.8).
    pub is_final: bool,
    pub created_by: UserId,
    pub audit: Audit,
}

/// The scope and gating behavior of a [`Test`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    /// Practice test; always available, never gates progression.
    Hinted,
    /// Scoped to a section; gates the next section.
    SectionFinal,
    /// Scoped to a topic; requires the whole topic completed to start.
    GlobalFinal,
}

/// A single place either a section or a topic owns a gradeable test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestScope {
    Section(SectionId),
    Topic(TopicId),
}

/// A gradeable test, composed of a subset of a topic's [`Question`] bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub id: TestId,
    pub title: String,
    pub test_type: TestType,
    pub scope: TestScope,
    /// 0 or `None` means untimed.
    pub duration_seconds: Option<u64>,
    pub max_attempts: u32,
    /// Pass threshold, 0-100.
    pub completion_percentage: f64,
    /// Desired question count; `None` means "use all eligible questions".
    pub target_questions: Option<u32>,
    pub audit: Audit,
}

impl Test {
    /// Returns the [`TopicId`] this test's completion ultimately gates,
    /// resolving through a section scope when needed. Callers that already
    /// have the owning [`Section`] should prefer reading `section.topic_id`
    /// directly; this is for call sites that only have the [`Test`].
    #[must_use]
    pub const fn section_scope(&self) -> Option<SectionId> {
        match self.scope {
            TestScope::Section(id) => Some(id),
            TestScope::Topic(_) => None,
        }
    }

    #[must_use]
    pub const fn topic_scope(&self) -> Option<TopicId> {
        match self.scope {
            TestScope::Topic(id) => Some(id),
            TestScope::Section(_) => None,
        }
    }
}

/// A many-to-many link between a [`Test`] and a [`Question`] (composite PK).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestQuestion {
    pub test_id: TestId,
    pub question_id: QuestionId,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

/// Lifecycle state of a [`TestAttempt`] (spec §4.7's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Expired,
}

/// The frozen question/option ordering chosen at `Start` (spec I6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomizedConfig {
    /// Ordered question ids, frozen at `Start`.
    pub question_ids: Vec<QuestionId>,
    /// Per-question option permutation (question id -> ordered option ids).
    pub option_order: BTreeMap<QuestionId, Vec<u32>>,
}

/// A submitted or in-progress set of answers, keyed by question id.
pub type Answers = BTreeMap<QuestionId, CorrectAnswer>;

/// A single attempt at a [`Test`] by a [`UserId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAttempt {
    pub id: AttemptId,
    pub user_id: UserId,
    pub test_id: TestId,
    /// Monotone per (user, test), starting at 1 (spec I3).
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    /// `None` when the test is untimed.
    pub expires_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub last_save_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100; set only once `status == Completed` (spec I5).
    pub score: Option<f64>,
    pub answers: Option<Answers>,
    pub draft_answers: Answers,
    pub auto_extend_count: u32,
    /// Frozen at `Start`; never rewritten afterward (spec I6).
    pub randomized_config: RandomizedConfig,
}

/// One completed viewing interval, appended to `activity_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySession {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_seconds: u64,
}

/// Per-(user, subsection) tracked activity and completion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsectionProgress {
    pub user_id: UserId,
    pub subsection_id: SubsectionId,
    pub is_viewed: bool,
    /// Monotonic once true: never reverts to `false` (spec I2).
    pub is_completed: bool,
    pub time_spent_seconds: u64,
    pub completion_percentage: f64,
    pub session_start_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub activity_sessions: Vec<ActivitySession>,
}

impl SubsectionProgress {
    /// Creates a fresh, zeroed progress row for `user`/`subsection`.
    #[must_use]
    pub const fn new(user_id: UserId, subsection_id: SubsectionId) -> Self {
        Self {
            user_id,
            subsection_id,
            is_viewed: false,
            is_completed: false,
            time_spent_seconds: 0,
            completion_percentage: 0.0,
            session_start_at: None,
            last_activity_at: None,
            viewed_at: None,
            activity_sessions: Vec::new(),
        }
    }
}

/// Coarse status shown for a section or topic (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Started,
    InProgress,
    Completed,
}

/// Aggregated progress for a (user, section) pair. Written only by the
/// progress aggregator (C4); spec I1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionProgress {
    pub user_id: UserId,
    pub section_id: SectionId,
    pub completion_percentage: f64,
    pub status: ProgressStatus,
    pub last_accessed: DateTime<Utc>,
}

/// Aggregated progress for a (user, topic) pair. Written only by C4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicProgress {
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub completion_percentage: f64,
    pub status: ProgressStatus,
    pub last_accessed: DateTime<Utc>,
}
