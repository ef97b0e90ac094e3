//! Cleanup scheduler (C9): a background loop that expires overdue attempts,
//! auto-extends near-deadline ones, and reaps stale/inactive rows (spec
//! §4.7's `Cleanup` operation).

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::persistence::PersistenceGateway;
use crate::types::AttemptStatus;

/// Counts of rows touched by one [`CleanupScheduler::run_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_overdue: usize,
    pub auto_extended: usize,
    pub deleted_stale_unstarted: usize,
    pub expired_inactive: usize,
}

/// Runs the four cleanup steps on a fixed period, in the order spec §4.7
/// lists them: expire overdue, auto-extend near-deadline, delete stale
/// unstarted attempts, then expire inactive ones.
pub struct CleanupScheduler {
    persistence: Arc<dyn PersistenceGateway>,
    config: Arc<CoreConfig>,
}

impl CleanupScheduler {
    #[must_use]
    pub fn new(persistence: Arc<dyn PersistenceGateway>, config: Arc<CoreConfig>) -> Self {
        Self { persistence, config }
    }

    /// Runs one pass of all four steps and returns what it touched.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<CleanupReport> {
        let now = Utc::now();
        let mut report = CleanupReport::default();

        for mut attempt in self.persistence.list_overdue_in_progress(now).await? {
            attempt.status = AttemptStatus::Expired;
            self.persistence.update_attempt(attempt).await?;
            report.expired_overdue += 1;
        }

        let margin = chrono::Duration::from_std(self.config.extend_margin).unwrap_or(chrono::Duration::zero());
        let step = chrono::Duration::from_std(self.config.extend_step).unwrap_or(chrono::Duration::zero());
        for mut attempt in self
            .persistence
            .list_near_deadline(now, margin, self.config.max_auto_extends)
            .await?
        {
            attempt.expires_at = attempt.expires_at.map(|exp| exp + step);
            attempt.auto_extend_count += 1;
            self.persistence.update_attempt(attempt).await?;
            report.auto_extended += 1;
        }

        let stale_cutoff = now - chrono::Duration::from_std(self.config.stale_max_age).unwrap_or(chrono::Duration::zero());
        for attempt in self.persistence.list_stale_unstarted(stale_cutoff).await? {
            self.persistence.delete_attempt(attempt.id).await?;
            report.deleted_stale_unstarted += 1;
        }

        for mut attempt in self.persistence.list_inactive_in_progress(stale_cutoff).await? {
            attempt.status = AttemptStatus::Expired;
            self.persistence.update_attempt(attempt).await?;
            report.expired_inactive += 1;
        }

        if report != CleanupReport::default() {
            info!(?report, "cleanup pass touched attempts");
        }
        Ok(report)
    }

    /// Spawns a loop ticking every `cleanup_period`, logging and continuing
    /// past any single pass's error rather than exiting the task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleanup_period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "cleanup pass failed; will retry next tick");
                }
            }
        })
    }
}
