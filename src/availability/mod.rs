//! Availability resolver (C5): given (user, entity), answers whether the
//! entity may be entered right now and why not when it can't (spec §4.5).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cache::{keys, Cache};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::oracles::IdentityOracle;
use crate::persistence::PersistenceGateway;
use crate::progress::ProgressAggregator;
use crate::types::{ProgressStatus, SectionId, SectionProgress, TestId, TestType, TopicId, UserId};

/// The `(available, reason)` pair spec §4.5 asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub reason: String,
}

impl Availability {
    fn yes() -> Self {
        Self { available: true, reason: String::new() }
    }

    fn no(reason: impl Into<String>) -> Self {
        Self { available: false, reason: reason.into() }
    }
}

/// The availability resolver (C5).
pub struct AvailabilityResolver {
    persistence: Arc<dyn PersistenceGateway>,
    cache: Arc<Cache>,
    progress: Arc<ProgressAggregator>,
    identity: Arc<dyn IdentityOracle>,
    config: Arc<CoreConfig>,
}

impl AvailabilityResolver {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        cache: Arc<Cache>,
        progress: Arc<ProgressAggregator>,
        identity: Arc<dyn IdentityOracle>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self { persistence, cache, progress, identity, config }
    }

    /// Section availability (spec §4.5's first rule).
    #[instrument(skip(self))]
    pub async fn section_availability(&self, user: UserId, section: SectionId) -> Result<Availability> {
        let key = keys::access_section(user, section);
        let ttl = Duration::from_secs(self.config.cache_ttls.access_secs);
        let value = self
            .cache
            .get_or_compute(key, ttl, || async { self.compute_section(user, section).await.map(to_json) })
            .await?;
        from_json(&value)
    }

    /// Test availability, dispatching on the test's type and scope (spec §4.5's remaining rules).
    #[instrument(skip(self))]
    pub async fn test_availability(&self, user: UserId, test: TestId) -> Result<Availability> {
        let key = keys::access_test(user, test);
        let ttl = Duration::from_secs(self.config.cache_ttls.access_secs);
        let value = self
            .cache
            .get_or_compute(key, ttl, || async { self.compute_test(user, test).await.map(to_json) })
            .await?;
        from_json(&value)
    }

    async fn compute_section(&self, user: UserId, section: SectionId) -> Result<Availability> {
        let section_row = self.persistence.get_section(section).await?;
        let siblings = self.persistence.list_sections_by_topic(section_row.topic_id).await?;
        let index = siblings.iter().position(|s| s.id == section);

        let Some(index) = index else {
            return Ok(Availability::no("section is archived or not found in its topic"));
        };

        if index == 0 {
            let has_access = self.identity.group_topic_access(user, section_row.topic_id).await?;
            let existing = self.persistence.get_section_progress(user, section).await?;
            if has_access {
                if existing.is_none() {
                    self.persistence
                        .upsert_section_progress(SectionProgress {
                            user_id: user,
                            section_id: section,
                            completion_percentage: 0.0,
                            status: ProgressStatus::Started,
                            last_accessed: chrono::Utc::now(),
                        })
                        .await?;
                }
                return Ok(Availability::yes());
            }
            if existing.is_some() {
                return Ok(Availability::yes());
            }
            return Ok(Availability::no("user has no access to this topic"));
        }

        let previous = &siblings[index - 1];
        let previous_progress = self.progress.get_section_progress(user, previous.id).await?;
        if previous_progress.status != ProgressStatus::Completed {
            return Ok(Availability::no(format!("preceding section {} is not completed", previous.id)));
        }
        if let Some(reason) = self.first_unpassed_section_final(user, previous.id).await? {
            return Ok(Availability::no(reason));
        }
        Ok(Availability::yes())
    }

    async fn compute_test(&self, user: UserId, test: TestId) -> Result<Availability> {
        let test_row = self.persistence.get_test(test).await?;
        match test_row.test_type {
            TestType::Hinted => Ok(Availability::yes()),
            TestType::SectionFinal => {
                let Some(section) = test_row.section_scope() else {
                    return Ok(Availability::no("section-final test has no section scope"));
                };
                let subsections = self.persistence.list_subsections_by_section(section).await?;
                let viewed = self.persistence.list_subsection_progress_for_section(user, section).await?;
                let all_viewed = subsections
                    .iter()
                    .all(|sub| viewed.iter().any(|p| p.subsection_id == sub.id && p.is_viewed));
                if all_viewed {
                    Ok(Availability::yes())
                } else {
                    Ok(Availability::no("not every subsection of this section has been viewed"))
                }
            }
            TestType::GlobalFinal => {
                let Some(topic) = test_row.topic_scope() else {
                    return Ok(Availability::no("global-final test has no topic scope"));
                };
                let sections = self.persistence.list_sections_by_topic(topic).await?;
                for section in &sections {
                    let agg = self.progress.get_section_progress(user, section.id).await?;
                    if agg.status != ProgressStatus::Completed {
                        return Ok(Availability::no(format!("section {} is not completed", section.id)));
                    }
                    if let Some(reason) = self.first_unpassed_section_final(user, section.id).await? {
                        return Ok(Availability::no(reason));
                    }
                }
                let topic_tests = self.persistence.list_tests_by_topic(topic).await?;
                for other in topic_tests.iter().filter(|t| t.test_type == TestType::GlobalFinal && t.id != test) {
                    let best = self.persistence.best_completed_score(user, other.id).await?;
                    if !best.is_some_and(|score| score >= other.completion_percentage) {
                        return Ok(Availability::no(format!("global-final test {} is not yet passed", other.id)));
                    }
                }
                Ok(Availability::yes())
            }
        }
    }

    /// Returns a human reason if `section`'s SECTION_FINAL tests aren't all passed, else `None`.
    async fn first_unpassed_section_final(&self, user: UserId, section: SectionId) -> Result<Option<String>> {
        let tests = self.persistence.list_tests_by_section(section).await?;
        for test in tests.iter().filter(|t| t.test_type == TestType::SectionFinal) {
            let best = self.persistence.best_completed_score(user, test.id).await?;
            if !best.is_some_and(|score| score >= test.completion_percentage) {
                return Ok(Some(format!("section-final test {} is not yet passed", test.id)));
            }
        }
        Ok(None)
    }

    /// Invalidates the cached section-availability entry; callers should
    /// also invalidate the following sibling section, since its
    /// availability depends on this one's completion state.
    pub fn invalidate_section(&self, user: UserId, section: SectionId) {
        self.cache.del(&keys::access_section(user, section));
    }

    pub fn invalidate_test(&self, user: UserId, test: TestId) {
        self.cache.del(&keys::access_test(user, test));
    }

    /// Invalidates every cached global-final-test entry scoped to `topic`
    /// for `user`, since topic-wide completion state just changed.
    pub async fn invalidate_topic_finals(&self, user: UserId, topic: TopicId) -> Result<()> {
        for test in self.persistence.list_tests_by_topic(topic).await? {
            if test.test_type == TestType::GlobalFinal {
                self.invalidate_test(user, test.id);
            }
        }
        Ok(())
    }
}

fn to_json(availability: Availability) -> serde_json::Value {
    serde_json::to_value(availability).expect("Availability always serializes")
}

fn from_json(value: &serde_json::Value) -> Result<Availability> {
    serde_json::from_value(value.clone())
        .map_err(|e| crate::error::Error::internal().with_context("decoding cached availability").with_source(e))
}
