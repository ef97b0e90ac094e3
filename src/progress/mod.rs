//! Progress aggregator (C4): the only writer of [`SectionProgress`] and
//! [`TopicProgress`] (spec I1), invoked by C3 on subsection completion, by
//! C7 on attempt completion, or lazily on read through the cache.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cache::{keys, Cache};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::persistence::PersistenceGateway;
use crate::types::{
    ProgressStatus, SectionId, SectionProgress, TestType, TopicId, TopicProgress, UserId,
};

/// Fixed contribution weight for a hinted test; never gates anything but
/// still carries display weight if it's somehow linked to a section.
pub const HINTED_TEST_WEIGHT: f64 = 1.0;
/// Fixed contribution weight for a section-final or global-final test.
pub const FINAL_TEST_WEIGHT: f64 = 2.0;

/// A completed/total pair shown in [`Breakdown`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ratio {
    pub completed: u32,
    pub total: u32,
}

/// The `breakdown` substructure of spec §4.4's output shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub subsections: Ratio,
    pub tests_hinted: Ratio,
    pub tests_final: Ratio,
}

/// The full aggregate shape returned for a (user, section) or (user, topic) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub completed: u32,
    pub total: u32,
    /// Display percentage, two-decimal precision (spec §4.4's rounding rule).
    pub percentage: f64,
    pub breakdown: Breakdown,
    pub time_spent_seconds: u64,
    pub status: ProgressStatus,
}

/// Rounds to two decimal places, spec §4.4's internal storage precision.
fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The progress aggregator.
pub struct ProgressAggregator {
    persistence: Arc<dyn PersistenceGateway>,
    cache: Arc<Cache>,
    config: Arc<CoreConfig>,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        cache: Arc<Cache>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self { persistence, cache, config }
    }

    /// Returns the cached aggregate for (user, section), computing and
    /// caching it on a miss.
    #[instrument(skip(self))]
    pub async fn get_section_progress(&self, user: UserId, section: SectionId) -> Result<Aggregate> {
        let key = keys::progress_section(user, section);
        let ttl = std::time::Duration::from_secs(self.config.cache_ttls.progress_secs);
        let value = self
            .cache
            .get_or_compute(key, ttl, || async { self.recompute_section(user, section).await.map(to_json) })
            .await?;
        from_json(&value)
    }

    /// Returns the cached aggregate for (user, topic), computing and
    /// caching it on a miss.
    #[instrument(skip(self))]
    pub async fn get_topic_progress(&self, user: UserId, topic: TopicId) -> Result<Aggregate> {
        let key = keys::progress_topic(user, topic);
        let ttl = std::time::Duration::from_secs(self.config.cache_ttls.progress_secs);
        let value = self
            .cache
            .get_or_compute(key, ttl, || async { self.recompute_topic(user, topic).await.map(to_json) })
            .await?;
        from_json(&value)
    }

    /// Recomputes (spec §4.4's section algorithm), persists the
    /// [`SectionProgress`] row, refreshes the cache entry, and returns the
    /// full read-shape [`Aggregate`]. Call this after anything that can
    /// change a section's completion state.
    #[instrument(skip(self))]
    pub async fn recompute_section(&self, user: UserId, section: SectionId) -> Result<Aggregate> {
        let subsections = self.persistence.list_subsections_by_section(section).await?;
        let sub_progress = self
            .persistence
            .list_subsection_progress_for_section(user, section)
            .await?;
        let tests = self.persistence.list_tests_by_section(section).await?;

        let mut total_weight = 0.0;
        let mut display_weight = 0.0;
        let mut status_weight_total = 0.0;
        let mut status_weight_done = 0.0;
        let mut subsections_completed = 0u32;
        let mut time_spent = 0u64;

        for sub in &subsections {
            let progress = sub_progress.iter().find(|p| p.subsection_id == sub.id);
            let is_completed = progress.is_some_and(|p| p.is_completed);
            time_spent += progress.map_or(0, |p| p.time_spent_seconds);
            total_weight += sub.weight;
            status_weight_total += sub.weight;
            if is_completed {
                subsections_completed += 1;
                display_weight += sub.weight;
                status_weight_done += sub.weight;
            }
        }

        let mut hinted_total = 0u32;
        let mut final_total = 0u32;
        let mut final_passed = 0u32;
        let mut all_section_final_passed = true;

        for test in &tests {
            let weight = match test.test_type {
                TestType::Hinted => HINTED_TEST_WEIGHT,
                TestType::SectionFinal | TestType::GlobalFinal => FINAL_TEST_WEIGHT,
            };
            let best = self.persistence.best_completed_score(user, test.id).await?;
            let passed = best.is_some_and(|score| score >= test.completion_percentage);

            total_weight += weight;
            if passed {
                display_weight += weight;
            }

            match test.test_type {
                TestType::Hinted => {
                    hinted_total += 1;
                }
                TestType::SectionFinal => {
                    final_total += 1;
                    status_weight_total += weight;
                    if passed {
                        final_passed += 1;
                        status_weight_done += weight;
                    } else {
                        all_section_final_passed = false;
                    }
                }
                TestType::GlobalFinal => {
                    // A global-final test is topic-scoped; it cannot appear
                    // in a section's own test list under a correct schema.
                }
            }
        }

        let percentage = if total_weight > 0.0 { display_weight / total_weight * 100.0 } else { 0.0 };
        let status_percentage = if status_weight_total > 0.0 {
            status_weight_done / status_weight_total * 100.0
        } else {
            0.0
        };

        let all_subsections_completed = !subsections.is_empty() && subsections_completed == subsections.len() as u32;
        let status = if status_percentage >= self.config.section_completion_threshold
            && all_subsections_completed
            && all_section_final_passed
        {
            ProgressStatus::Completed
        } else if status_percentage > 0.0 || subsections_completed > 0 {
            ProgressStatus::InProgress
        } else {
            ProgressStatus::Started
        };

        let row = SectionProgress {
            user_id: user,
            section_id: section,
            completion_percentage: round2(percentage),
            status,
            last_accessed: Utc::now(),
        };
        let row = self.persistence.upsert_section_progress(row).await?;

        let aggregate = Aggregate {
            completed: subsections_completed,
            total: subsections.len() as u32,
            percentage: row.completion_percentage,
            breakdown: Breakdown {
                subsections: Ratio { completed: subsections_completed, total: subsections.len() as u32 },
                tests_hinted: Ratio { completed: 0, total: hinted_total },
                tests_final: Ratio { completed: final_passed, total: final_total },
            },
            time_spent_seconds: time_spent,
            status: row.status,
        };

        let ttl = std::time::Duration::from_secs(self.config.cache_ttls.progress_secs);
        self.cache.set(keys::progress_section(user, section), to_json(aggregate), ttl);
        Ok(aggregate)
    }

    /// Recomputes the topic aggregate (spec §4.4's topic algorithm) from
    /// its non-archived sections' already-computed display percentages.
    #[instrument(skip(self))]
    pub async fn recompute_topic(&self, user: UserId, topic: TopicId) -> Result<Aggregate> {
        let sections = self.persistence.list_sections_by_topic(topic).await?;

        let mut percentages = Vec::with_capacity(sections.len());
        let mut completed_sections = 0u32;
        let mut time_spent = 0u64;

        for section in &sections {
            let section_aggregate = self.recompute_section(user, section.id).await?;
            percentages.push(section_aggregate.percentage);
            if section_aggregate.percentage >= self.config.section_completion_threshold {
                completed_sections += 1;
            }
            time_spent += section_aggregate.time_spent_seconds;
        }

        let mean_percentage = if percentages.is_empty() {
            0.0
        } else {
            percentages.iter().sum::<f64>() / percentages.len() as f64
        };

        let status = if mean_percentage >= self.config.section_completion_threshold {
            ProgressStatus::Completed
        } else if mean_percentage > 0.0 {
            ProgressStatus::InProgress
        } else {
            ProgressStatus::Started
        };

        let row = TopicProgress {
            user_id: user,
            topic_id: topic,
            completion_percentage: round2(mean_percentage),
            status,
            last_accessed: Utc::now(),
        };
        let row = self.persistence.upsert_topic_progress(row).await?;

        let aggregate = Aggregate {
            completed: completed_sections,
            total: sections.len() as u32,
            percentage: row.completion_percentage,
            breakdown: Breakdown {
                subsections: Ratio { completed: completed_sections, total: sections.len() as u32 },
                tests_hinted: Ratio { completed: 0, total: 0 },
                tests_final: Ratio { completed: 0, total: 0 },
            },
            time_spent_seconds: time_spent,
            status: row.status,
        };

        let ttl = std::time::Duration::from_secs(self.config.cache_ttls.progress_secs);
        self.cache.set(keys::progress_topic(user, topic), to_json(aggregate), ttl);
        Ok(aggregate)
    }

    /// Invalidates the cached aggregates for (user, section) and its
    /// enclosing topic, per spec §4.2's invalidation rules. Does not
    /// recompute; callers that need fresh numbers should call
    /// `recompute_section`/`recompute_topic` instead.
    pub fn invalidate(&self, user: UserId, section: SectionId, topic: TopicId) {
        self.cache.del(&keys::progress_section(user, section));
        self.cache.del(&keys::progress_topic(user, topic));
    }
}

fn to_json(aggregate: Aggregate) -> serde_json::Value {
    serde_json::to_value(aggregate).expect("Aggregate always serializes")
}

fn from_json(value: &serde_json::Value) -> Result<Aggregate> {
    serde_json::from_value(value.clone())
        .map_err(|e| crate::error::Error::internal().with_context("decoding cached aggregate").with_source(e))
}
