//! Explicit runtime configuration.
//!
//! The source this crate is modeled on kept settings and a cache client as
//! process-wide singletons. Per the redesign in spec §9, every tunable lives
//! in one plain value, [`CoreConfig`], constructed once and passed by
//! reference (or `Arc`) into each component. Nothing here is a `static`.

use std::time::Duration;

/// Cache TTLs, one per key family from spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheTtls {
    /// `progress:section:{user}:{section}` / `progress:topic:{user}:{topic}`.
    pub progress_secs: u64,
    /// `access:topic:{user}:{topic}` / `access:section:{user}:{section}`.
    pub access_secs: u64,
    /// `static:topic:{id}` / `static:group:{id}:topics`.
    pub static_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            progress_secs: 5 * 60,
            access_secs: 10 * 60,
            static_secs: 30 * 60,
        }
    }
}

/// All tunables recognized by the core, per spec §6.
///
/// `Default` reproduces the defaults named in spec.md exactly. Transport
/// layers own `.env`/file loading and hand the core a fully-populated
/// `CoreConfig`; the core never reads the environment itself except via
/// [`CoreConfig::from_env`], which is a convenience for standalone binaries
/// (see `src/bin/learnkerneld.rs`), not something the core depends on.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoreConfig {
    /// Heartbeat throttle lower bound (`MIN_INTERVAL_SECONDS`, default 5s).
    pub min_interval: Duration,
    /// Maximum credited gap between two heartbeats (`MAX_INTERVAL_SECONDS`, default 30s).
    pub max_interval: Duration,
    /// Session duration past which a soft reset is triggered (`MAX_SESSION_HOURS`, default 2h).
    pub max_session: Duration,
    /// Hard reject above this many concurrent sessions (`MAX_PARALLEL_SESSIONS`, default 3).
    pub max_parallel_sessions: u32,
    /// Client-facing heartbeat hint (`HEARTBEAT_INTERVAL_SECONDS`, default 10s).
    pub heartbeat_interval: Duration,
    /// Completion threshold per subsection when not set on the row (`DEFAULT_MIN_TIME_SECONDS`, default 30s).
    pub default_min_time: Duration,
    /// Section unlock/completion threshold, 0-100 (`SECTION_COMPLETION_THRESHOLD`, default 80).
    pub section_completion_threshold: f64,
    /// Cap on automatic deadline extensions per attempt (`MAX_AUTO_EXTENDS`, default 3).
    pub max_auto_extends: u32,
    /// Length of each automatic extension (`EXTEND_STEP_MINUTES`, default 5m).
    pub extend_step: Duration,
    /// Window before `expires_at` in which auto-extend fires (`EXTEND_MARGIN_SECONDS`, default 120s).
    pub extend_margin: Duration,
    /// Cleanup scheduler tick period (`CLEANUP_PERIOD_SECONDS`, default 60s).
    pub cleanup_period: Duration,
    /// Age past which `started`/stale `in_progress` attempts are reaped (`STALE_MAX_AGE_HOURS`, default 24h).
    pub stale_max_age: Duration,
    /// Minimum samples before the suspicious-regularity stdev check engages (default 10).
    pub suspicious_regularity_window: usize,
    /// Stdev (seconds) below which heartbeat timing is flagged suspicious (default 0.5s).
    pub suspicious_regularity_stdev: f64,
    /// Cache TTLs per key family.
    pub cache_ttls: CacheTtls,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            max_session: Duration::from_secs(2 * 60 * 60),
            max_parallel_sessions: 3,
            heartbeat_interval: Duration::from_secs(10),
            default_min_time: Duration::from_secs(30),
            section_completion_threshold: 80.0,
            max_auto_extends: 3,
            extend_step: Duration::from_secs(5 * 60),
            extend_margin: Duration::from_secs(120),
            cleanup_period: Duration::from_secs(60),
            stale_max_age: Duration::from_secs(24 * 60 * 60),
            suspicious_regularity_window: 10,
            suspicious_regularity_stdev: 0.5,
            cache_ttls: CacheTtls::default(),
        }
    }
}

impl CoreConfig {
    /// Builds a config from environment variables, falling back to
    /// [`CoreConfig::default`] for anything unset or unparsable.
    ///
    /// Recognized variables mirror the field names in `SCREAMING_SNAKE_CASE`
    /// (e.g. `MIN_INTERVAL_SECONDS`, `SECTION_COMPLETION_THRESHOLD`). This is
    /// a convenience for the standalone cleanup-scheduler binary; library
    /// consumers are expected to build a `CoreConfig` themselves.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_u64("MIN_INTERVAL_SECONDS") {
            cfg.min_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("MAX_INTERVAL_SECONDS") {
            cfg.max_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("MAX_SESSION_HOURS") {
            cfg.max_session = Duration::from_secs(v * 60 * 60);
        }
        if let Some(v) = env_u64("MAX_PARALLEL_SESSIONS") {
            cfg.max_parallel_sessions = v as u32;
        }
        if let Some(v) = env_u64("HEARTBEAT_INTERVAL_SECONDS") {
            cfg.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("DEFAULT_MIN_TIME_SECONDS") {
            cfg.default_min_time = Duration::from_secs(v);
        }
        if let Some(v) = env_f64("SECTION_COMPLETION_THRESHOLD") {
            cfg.section_completion_threshold = v;
        }
        if let Some(v) = env_u64("MAX_AUTO_EXTENDS") {
            cfg.max_auto_extends = v as u32;
        }
        if let Some(v) = env_u64("EXTEND_STEP_MINUTES") {
            cfg.extend_step = Duration::from_secs(v * 60);
        }
        if let Some(v) = env_u64("EXTEND_MARGIN_SECONDS") {
            cfg.extend_margin = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("CLEANUP_PERIOD_SECONDS") {
            cfg.cleanup_period = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("STALE_MAX_AGE_HOURS") {
            cfg.stale_max_age = Duration::from_secs(v * 60 * 60);
        }
        cfg
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.min_interval, Duration::from_secs(5));
        assert_eq!(cfg.max_interval, Duration::from_secs(30));
        assert_eq!(cfg.max_parallel_sessions, 3);
        assert_eq!(cfg.section_completion_threshold, 80.0);
        assert_eq!(cfg.max_auto_extends, 3);
        assert_eq!(cfg.cleanup_period, Duration::from_secs(60));
        assert_eq!(cfg.stale_max_age, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    #[allow(unsafe_code)]
    fn from_env_overrides_only_set_vars() {
        // SAFETY: no other thread in this test binary reads/writes this var.
        unsafe {
            std::env::set_var("MIN_INTERVAL_SECONDS", "9");
        }
        let cfg = CoreConfig::from_env();
        assert_eq!(cfg.min_interval, Duration::from_secs(9));
        assert_eq!(cfg.max_interval, Duration::from_secs(30));
        unsafe {
            std::env::remove_var("MIN_INTERVAL_SECONDS");
        }
    }
}
