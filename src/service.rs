//! The stable, transport-agnostic operations spec §6 names as "exposed
//! operations". These are thin facades over the components (C4/C5/C7); the
//! components themselves hold the actual logic and locking.
//!
//! [`crate::tracking::TrackingService`] already exposes `StartSubsectionSession`
//! / `Heartbeat` / `EndSubsectionSession` / `GetSubsectionStatus` directly
//! under its own name, so it is re-exported as-is rather than wrapped again.

use std::sync::Arc;
use std::time::Duration;

use crate::availability::{Availability, AvailabilityResolver};
use crate::cache::{keys, Cache};
use crate::error::Result;
use crate::material_guard::MaterialGuard;
use crate::oracles::{IdentityOracle, MediaUrlService};
use crate::persistence::PersistenceGateway;
use crate::progress::{Aggregate, ProgressAggregator};
use crate::testengine::{HeartbeatResult, TestEngine};
use crate::types::{Answers, AttemptId, Section, SectionId, TestAttempt, TestId, TopicId, UserId};

/// Bucket topic cover images are presigned under (spec §4.2's
/// `file:url:{bucket}:{object}` family; this crate has exactly one media
/// field — `Topic::image_path` — so one fixed bucket name suffices).
const TOPIC_IMAGE_BUCKET: &str = "topic-images";

/// `ProgressService`: `GetSectionProgress`, `GetTopicProgress`,
/// `ListSectionsWithAvailability`.
pub struct ProgressService {
    persistence: Arc<dyn PersistenceGateway>,
    progress: Arc<ProgressAggregator>,
    availability: Arc<AvailabilityResolver>,
    material_guard: Arc<MaterialGuard>,
    media: Arc<dyn MediaUrlService>,
    cache: Arc<Cache>,
}

/// One row of `ListSectionsWithAvailability`'s output.
#[derive(Debug, Clone)]
pub struct SectionSummary {
    pub section: Section,
    pub progress: Aggregate,
    pub availability: Availability,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        progress: Arc<ProgressAggregator>,
        availability: Arc<AvailabilityResolver>,
        media: Arc<dyn MediaUrlService>,
        cache: Arc<Cache>,
    ) -> Self {
        let material_guard = Arc::new(MaterialGuard::new(persistence.clone()));
        Self { persistence, progress, availability, material_guard, media, cache }
    }

    /// Denies the read with `MaterialLocked` while `user` has an
    /// `in_progress` attempt scoped to `section` (spec §4.6).
    pub async fn get_section_progress(&self, user: UserId, section: SectionId) -> Result<Aggregate> {
        self.material_guard.check_section(user, section).await?;
        self.progress.get_section_progress(user, section).await
    }

    /// Denies the read with `MaterialLocked` while `user` has an
    /// `in_progress` GLOBAL_FINAL attempt scoped to `topic` (spec §4.6).
    pub async fn get_topic_progress(&self, user: UserId, topic: TopicId) -> Result<Aggregate> {
        self.material_guard.check_topic(user, topic).await?;
        self.progress.get_topic_progress(user, topic).await
    }

    /// Every non-archived section of `topic`, each with its progress
    /// aggregate and whether `user` may currently enter it. Sections
    /// currently locked behind an in-progress attempt (spec §4.6) are
    /// omitted from the list rather than failing the whole read.
    pub async fn list_sections_with_availability(&self, user: UserId, topic: TopicId) -> Result<Vec<SectionSummary>> {
        self.material_guard.check_topic(user, topic).await?;
        let sections = self.persistence.list_sections_by_topic(topic).await?;
        let mut out = Vec::with_capacity(sections.len());
        for section in sections {
            if self.material_guard.check_section(user, section.id).await.is_err() {
                continue;
            }
            let progress = self.progress.get_section_progress(user, section.id).await?;
            let availability = self.availability.section_availability(user, section.id).await?;
            out.push(SectionSummary { section, progress, availability });
        }
        Ok(out)
    }

    /// Resolves `topic`'s cover image to a time-bounded URL, caching it
    /// under `file:url:{bucket}:{object}` at 0.9x the presigned URL's own
    /// expiry (spec §4.2). Returns `None` if the topic has no image.
    pub async fn get_topic_image_url(&self, user: UserId, topic: TopicId) -> Result<Option<String>> {
        self.material_guard.check_topic(user, topic).await?;
        let topic_row = self.persistence.get_topic(topic).await?;
        let Some(path) = topic_row.image_path else {
            return Ok(None);
        };

        let key = keys::file_url(TOPIC_IMAGE_BUCKET, &path);
        if let Some(cached) = self.cache.get(&key).await {
            if let Some(url) = cached.as_str() {
                return Ok(Some(url.to_string()));
            }
        }

        let (url, expires_in_seconds) = self.media.presign(TOPIC_IMAGE_BUCKET, &path).await?;
        let ttl = Duration::from_secs((expires_in_seconds as f64 * 0.9) as u64);
        self.cache.set(key, serde_json::Value::String(url.clone()), ttl);
        Ok(Some(url))
    }
}

/// `AvailabilityService`: `CanAccessSection`, `CanAccessTopic`, `CanStartTest`.
pub struct AvailabilityService {
    availability: Arc<AvailabilityResolver>,
    identity: Arc<dyn IdentityOracle>,
    material_guard: Arc<MaterialGuard>,
}

impl AvailabilityService {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        availability: Arc<AvailabilityResolver>,
        identity: Arc<dyn IdentityOracle>,
    ) -> Self {
        let material_guard = Arc::new(MaterialGuard::new(persistence));
        Self { availability, identity, material_guard }
    }

    pub async fn can_access_section(&self, user: UserId, section: SectionId) -> Result<Availability> {
        self.availability.section_availability(user, section).await
    }

    /// Topic-level access is governed directly by the identity oracle's
    /// group assignment, independent of any section/test sequencing rule
    /// (spec §4.5 only gates sections and tests, not the topic itself) —
    /// but a GLOBAL_FINAL attempt in progress still locks the topic's own
    /// material (spec §4.6), checked first.
    pub async fn can_access_topic(&self, user: UserId, topic: TopicId) -> Result<bool> {
        self.material_guard.check_topic(user, topic).await?;
        self.identity.group_topic_access(user, topic).await
    }

    pub async fn can_start_test(&self, user: UserId, test: TestId) -> Result<Availability> {
        self.availability.test_availability(user, test).await
    }
}

/// `TestService`: `StartTest`, `HeartbeatTest`, `SubmitTest`,
/// `GetAttemptStatus`, `ListUserAttempts`, `ResetLastAttempt`.
pub struct TestService {
    engine: Arc<TestEngine>,
}

impl TestService {
    #[must_use]
    pub fn new(engine: Arc<TestEngine>) -> Self {
        Self { engine }
    }

    pub async fn start_test(&self, user: UserId, test: TestId) -> Result<TestAttempt> {
        self.engine.start(user, test).await
    }

    pub async fn heartbeat_test(&self, attempt: AttemptId, draft: Option<Answers>) -> Result<HeartbeatResult> {
        self.engine.heartbeat(attempt, draft).await
    }

    pub async fn submit_test(&self, attempt: AttemptId, answers: Answers, time_spent_seconds: u64) -> Result<TestAttempt> {
        self.engine.submit(attempt, answers, time_spent_seconds).await
    }

    pub async fn get_attempt_status(&self, attempt: AttemptId) -> Result<TestAttempt> {
        self.engine.get_attempt_status(attempt).await
    }

    pub async fn list_user_attempts(&self, user: UserId, test: TestId) -> Result<Vec<TestAttempt>> {
        self.engine.list_user_attempts(user, test).await
    }

    pub async fn reset_last_attempt(&self, teacher: UserId, test: TestId, student: UserId) -> Result<()> {
        self.engine.reset_last(teacher, test, student).await
    }
}
