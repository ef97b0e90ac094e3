//! learnkernel-core: the storage-agnostic domain core of an e-learning
//! platform's topic/section/subsection tracking, progress aggregation, and
//! gated testing engine.
//!
//! # Overview
//!
//! The crate is organized as a small set of single-responsibility
//! components, each owning one piece of state and consulted by the others
//! through plain `Arc<dyn Trait>` or `Arc<Struct>` references — there is no
//! shared mutable singleton and no process-wide lock.
//!
//! # Module Structure
//!
//! - [`types`]: domain entities and surrogate-key identifiers
//! - [`error`](mod@error): the crate's error kinds and `Result` alias
//! - [`config`]: [`config::CoreConfig`], the single source of tunables
//! - [`oracles`]: traits for collaborators this crate consumes but never implements
//! - [`persistence`]: the storage gateway (C1) and its in-memory/SQLite backends
//! - [`cache`]: the TTL'd, single-flight cache layer (C2)
//! - [`keyed_lock`]: per-key async mutual exclusion, used throughout C3/C7
//! - [`tracking`]: the subsection activity tracker (C3)
//! - [`progress`]: the section/topic progress aggregator (C4)
//! - [`availability`]: the section/test availability resolver (C5)
//! - [`material_guard`]: the material-access guard (C6)
//! - [`testengine`]: the test attempt state machine (C7)
//! - [`question_bank`]: topic-final question composition (C8)
//! - [`scheduler`]: the background cleanup loop (C9)
//! - [`service`]: the stable, transport-agnostic operations exposed to callers
//! - [`observability`]: shared `tracing` span helper
//!
//! # API Stability
//!
//! This crate has no external consumers yet; public items should be treated
//! as unstable until a transport crate depends on them.

#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod availability;
pub mod cache;
pub mod config;
pub mod error;
pub mod keyed_lock;
pub mod material_guard;
pub mod observability;
pub mod oracles;
pub mod persistence;
pub mod progress;
pub mod question_bank;
pub mod scheduler;
pub mod service;
pub mod testengine;
pub mod tracking;
pub mod types;

pub use availability::{Availability, AvailabilityResolver};
pub use cache::Cache;
pub use config::CoreConfig;
pub use error::{Error, ErrorKind, Result};
pub use material_guard::MaterialGuard;
pub use persistence::{InMemoryGateway, PersistenceGateway};
pub use progress::{Aggregate, ProgressAggregator};
pub use question_bank::QuestionBank;
pub use scheduler::{CleanupReport, CleanupScheduler};
pub use service::{AvailabilityService, ProgressService, SectionSummary, TestService};
pub use testengine::{HeartbeatResult, TestEngine};
pub use tracking::TrackingService;
