//! Domain types shared by every component: identifiers (§3's surrogate
//! keys) and entities (topics, sections, subsections, questions, tests,
//! attempts, progress rows).

pub mod entities;
pub mod id;

pub use entities::{
    ActivitySession, Answers, Audit, AttemptStatus, CorrectAnswer, Option_, ProgressStatus,
    Question, QuestionType, RandomizedConfig, Section, SectionProgress, Subsection,
    SubsectionProgress, SubsectionType, Test, TestAttempt, TestQuestion, TestScope, TestType,
    Topic, TopicProgress,
};
pub use id::{AttemptId, GroupId, QuestionId, SectionId, SubsectionId, TestId, TopicId, UserId};
