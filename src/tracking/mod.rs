//! Activity tracker (C3): `StartSession`, `Heartbeat`, `EndSession` for a
//! (user, subsection) pair (spec §4.3).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::keyed_lock::KeyedLocks;
use crate::material_guard::MaterialGuard;
use crate::persistence::PersistenceGateway;
use crate::progress::ProgressAggregator;
use crate::types::{ActivitySession, SubsectionId, SubsectionProgress, UserId};

/// Window over which concurrent-session activity is counted (spec §4.3; not
/// one of the named tunables in spec §6, so it is fixed rather than
/// configurable).
const PARALLEL_ACTIVITY_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

/// Result of `StartSession`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartOutcome {
    pub time_spent_seconds: u64,
    pub completion_percentage: f64,
}

/// Result of `Heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatOutcome {
    pub time_spent_seconds: u64,
    pub completion_percentage: f64,
    pub is_completed: bool,
    pub next_interval_seconds: u64,
    /// Non-blocking: heartbeat timing looked too regular to be a human (spec §4.3).
    pub suspicious: bool,
}

/// The activity tracker (C3).
pub struct TrackingService {
    persistence: Arc<dyn PersistenceGateway>,
    progress: Arc<ProgressAggregator>,
    config: Arc<CoreConfig>,
    material_guard: Arc<MaterialGuard>,
    subsection_locks: KeyedLocks<(UserId, SubsectionId)>,
    /// Ephemeral per-(user, subsection) heartbeat interval history, used
    /// only for the suspicious-regularity check; not persisted (spec §4.3
    /// never asks for it to be durable, only surfaced as a flag).
    intervals: Mutex<HashMap<(UserId, SubsectionId), VecDeque<f64>>>,
}

impl TrackingService {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        progress: Arc<ProgressAggregator>,
        config: Arc<CoreConfig>,
    ) -> Self {
        let material_guard = Arc::new(MaterialGuard::new(persistence.clone()));
        Self {
            persistence,
            progress,
            config,
            material_guard,
            subsection_locks: KeyedLocks::new(),
            intervals: Mutex::new(HashMap::new()),
        }
    }

    async fn load_or_create(&self, user: UserId, subsection: SubsectionId) -> Result<SubsectionProgress> {
        if let Some(row) = self.persistence.get_subsection_progress(user, subsection).await? {
            return Ok(row);
        }
        Ok(SubsectionProgress::new(user, subsection))
    }

    /// `StartSession(user, subsection)` — spec §4.3.
    #[instrument(skip(self))]
    pub async fn start_session(&self, user: UserId, subsection: SubsectionId) -> Result<StartOutcome> {
        let _guard = self.subsection_locks.lock((user, subsection)).await;
        let subsection_entity = self.persistence.get_subsection(subsection).await?;
        self.material_guard.check_section(user, subsection_entity.section_id).await?;
        let now = Utc::now();
        let mut row = self.load_or_create(user, subsection).await?;
        row.session_start_at = Some(now);
        row.last_activity_at = Some(now);
        let row = self.persistence.upsert_subsection_progress(row).await?;
        info!(user = %user, subsection = %subsection, "subsection session started");
        Ok(StartOutcome {
            time_spent_seconds: row.time_spent_seconds,
            completion_percentage: row.completion_percentage,
        })
    }

    /// `Heartbeat(user, subsection, payload?)` — spec §4.3.
    #[instrument(skip(self, _payload))]
    pub async fn heartbeat(
        &self,
        user: UserId,
        subsection: SubsectionId,
        _payload: Option<serde_json::Value>,
    ) -> Result<HeartbeatOutcome> {
        let _guard = self.subsection_locks.lock((user, subsection)).await;
        let subsection_entity = self.persistence.get_subsection(subsection).await?;
        self.material_guard.check_section(user, subsection_entity.section_id).await?;
        let now = Utc::now();
        let mut row = self.load_or_create(user, subsection).await?;

        let session_start = row.session_start_at.unwrap_or(now);
        let last_activity = row.last_activity_at.unwrap_or(session_start);

        let since_last = now.signed_duration_since(last_activity);
        if since_last < self.config.min_interval_chrono() {
            debug!(
                user = %user, subsection = %subsection,
                "rejected heartbeat: {:.1}s since last, minimum is {}s",
                since_last.num_milliseconds() as f64 / 1000.0,
                self.config.min_interval.as_secs(),
            );
            return Err(Error::too_frequent().with_context(format!(
                "{:.1}s since last heartbeat, minimum is {}s",
                since_last.num_milliseconds() as f64 / 1000.0,
                self.config.min_interval.as_secs()
            )));
        }

        let max_session = self.config.max_session_chrono();
        let soft_reset = now.signed_duration_since(session_start) > max_session;
        if soft_reset {
            let duration_seconds = session_start
                .signed_duration_since(last_activity)
                .num_seconds()
                .unsigned_abs()
                .max(0);
            row.activity_sessions.push(ActivitySession {
                start: session_start,
                end: now,
                duration_seconds,
            });
            row.session_start_at = Some(now);
            row.last_activity_at = Some(now);
            let row = self.persistence.upsert_subsection_progress(row).await?;
            warn!(user = %user, subsection = %subsection, "session exceeded max duration, soft reset applied");
            return Ok(HeartbeatOutcome {
                time_spent_seconds: row.time_spent_seconds,
                completion_percentage: row.completion_percentage,
                is_completed: row.is_completed,
                next_interval_seconds: self.config.heartbeat_interval.as_secs(),
                suspicious: false,
            });
        }

        self.check_parallelism(user, subsection, now).await?;

        let raw_elapsed = since_last.num_seconds().max(0) as u64;
        let credited = raw_elapsed.min(self.config.max_interval.as_secs());
        let suspicious = self.record_interval_and_check_suspicious(user, subsection, raw_elapsed as f64);

        let min_time = subsection_entity.effective_min_time_seconds(self.config.default_min_time.as_secs());

        row.time_spent_seconds += credited;
        row.completion_percentage = (row.time_spent_seconds as f64 / min_time as f64).min(1.0) * 100.0;
        row.last_activity_at = Some(now);

        let crossed = !row.is_completed && row.completion_percentage >= 100.0;
        if crossed {
            row.is_completed = true;
            row.is_viewed = true;
            row.viewed_at = Some(now);
        }

        let row = self.persistence.upsert_subsection_progress(row).await?;

        if crossed {
            info!(user = %user, subsection = %subsection, "subsection completed");
            let section = self.persistence.get_section(subsection_entity.section_id).await?;
            self.progress.recompute_section(user, section.id).await?;
            self.progress.recompute_topic(user, section.topic_id).await?;
        }

        Ok(HeartbeatOutcome {
            time_spent_seconds: row.time_spent_seconds,
            completion_percentage: row.completion_percentage,
            is_completed: row.is_completed,
            next_interval_seconds: self.config.heartbeat_interval.as_secs(),
            suspicious,
        })
    }

    /// `GetSubsectionStatus(user, subsection)` — spec §6's read-only accessor.
    pub async fn get_status(&self, user: UserId, subsection: SubsectionId) -> Result<SubsectionProgress> {
        let subsection_entity = self.persistence.get_subsection(subsection).await?;
        self.material_guard.check_section(user, subsection_entity.section_id).await?;
        self.load_or_create(user, subsection).await
    }

    /// `EndSession(user, subsection)` — idempotent (spec §4.3).
    #[instrument(skip(self))]
    pub async fn end_session(&self, user: UserId, subsection: SubsectionId) -> Result<()> {
        let _guard = self.subsection_locks.lock((user, subsection)).await;
        let Some(mut row) = self.persistence.get_subsection_progress(user, subsection).await? else {
            return Ok(());
        };
        let Some(start) = row.session_start_at else {
            return Ok(()); // already ended; no-op
        };
        let now = Utc::now();
        let end_activity = row.last_activity_at.unwrap_or(now);
        row.activity_sessions.push(ActivitySession {
            start,
            end: end_activity,
            duration_seconds: end_activity.signed_duration_since(start).num_seconds().max(0) as u64,
        });
        row.session_start_at = None;
        self.persistence.upsert_subsection_progress(row).await?;
        Ok(())
    }

    async fn check_parallelism(&self, user: UserId, subsection: SubsectionId, now: DateTime<Utc>) -> Result<()> {
        let all = self.persistence.list_subsection_progress_for_user(user).await?;
        let active = all
            .iter()
            .filter(|p| p.subsection_id != subsection)
            .filter(|p| p.last_activity_at.is_some_and(|t| now.signed_duration_since(t) <= PARALLEL_ACTIVITY_WINDOW))
            .count() as u32;
        if active + 1 > self.config.max_parallel_sessions {
            return Err(Error::too_many_parallel().with_context(format!(
                "{} concurrent sessions active, maximum is {}",
                active + 1,
                self.config.max_parallel_sessions
            )));
        }
        Ok(())
    }

    /// Pushes `interval` into the ring buffer for (user, subsection) and
    /// returns whether the stdev of the recorded window is below the
    /// suspicious-regularity threshold.
    fn record_interval_and_check_suspicious(&self, user: UserId, subsection: SubsectionId, interval: f64) -> bool {
        let mut intervals = self.intervals.lock();
        let window = intervals.entry((user, subsection)).or_default();
        window.push_back(interval);
        while window.len() > self.config.suspicious_regularity_window {
            window.pop_front();
        }
        if window.len() < self.config.suspicious_regularity_window {
            return false;
        }
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window.len() as f64;
        variance.sqrt() < self.config.suspicious_regularity_stdev
    }
}

impl CoreConfig {
    fn min_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.min_interval).unwrap_or(chrono::Duration::zero())
    }

    fn max_session_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_session).unwrap_or(chrono::Duration::zero())
    }
}
