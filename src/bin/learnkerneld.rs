//! Standalone host for the cleanup scheduler (C9).
//!
//! Runs the four-step cleanup pass on a fixed period against whichever
//! persistence backend is configured, with no HTTP surface of its own —
//! it exists purely so the scheduler can run as its own process rather than
//! piggybacking on a transport binary's event loop.

use std::sync::Arc;

use learnkernel::config::CoreConfig;
use learnkernel::persistence::PersistenceGateway;
use learnkernel::scheduler::CleanupScheduler;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(CoreConfig::from_env());
    let persistence = build_persistence();

    info!(period_secs = config.cleanup_period.as_secs(), "starting cleanup scheduler");
    let scheduler = Arc::new(CleanupScheduler::new(persistence, config));
    scheduler
        .spawn()
        .await
        .expect("cleanup loop task should not panic");
}

#[cfg(feature = "sqlite")]
fn build_persistence() -> Arc<dyn PersistenceGateway> {
    let path = std::env::var("LEARNKERNEL_SQLITE_PATH").unwrap_or_else(|_| "learnkernel.sqlite3".to_string());
    Arc::new(
        learnkernel::persistence::sqlite::SqliteGateway::open(&path)
            .unwrap_or_else(|e| panic!("failed to open sqlite database at {path}: {e}")),
    )
}

#[cfg(not(feature = "sqlite"))]
fn build_persistence() -> Arc<dyn PersistenceGateway> {
    tracing::warn!("built without the `sqlite` feature; cleanup will run against a process-local, empty in-memory store");
    Arc::new(learnkernel::persistence::InMemoryGateway::new())
}
