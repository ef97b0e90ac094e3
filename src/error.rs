//! Core error kinds and the crate-wide [`Error`] type.
//!
//! Every fallible operation in this crate returns [`Result<T>`], whose error
//! carries a stable [`ErrorKind`] (the codes of spec §7) plus optional
//! human-readable context. Transport layers translate `code()` to whatever
//! status scheme they use; the code itself must never change shape.

use core::fmt;
use std::sync::Arc;

/// Stable error codes surfaced to callers across the crate boundary.
///
/// Variants match the table in spec §7 one-for-one. Wire code strings are
/// snake_case and returned by [`ErrorKind::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Entity missing.
    NotFound,
    /// Optimistic/uniqueness conflict at the persistence layer.
    Conflict,
    /// Row already exists.
    Duplicate,
    /// An oracle (identity, authorship) denied the operation.
    Forbidden,
    /// An active test attempt blocks access to material.
    MaterialLocked,
    /// Sequencing rules (availability) deny the operation.
    NotAvailable,
    /// A concurrent `Start` lost the race for the single `in_progress` slot.
    AlreadyInProgress,
    /// `Submit` called on a terminal attempt.
    AlreadySubmitted,
    /// The attempt's deadline has passed.
    Expired,
    /// `max_attempts` has been reached for this (user, test).
    NoAttemptsLeft,
    /// Heartbeat arrived before `MIN_INTERVAL_SECONDS` elapsed.
    TooFrequent,
    /// More than `MAX_PARALLEL_SESSIONS` concurrent sessions were detected.
    TooManyParallel,
    /// Permanent delete attempted on a row that isn't archived yet.
    ArchiveFirst,
    /// The question pool for a test was empty at composition time.
    NoQuestions,
    /// Unclassified failure; logged with context, surfaced generically.
    Internal,
}

impl ErrorKind {
    /// Returns the stable snake_case wire code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Duplicate => "duplicate",
            Self::Forbidden => "forbidden",
            Self::MaterialLocked => "material_locked",
            Self::NotAvailable => "not_available",
            Self::AlreadyInProgress => "already_in_progress",
            Self::AlreadySubmitted => "already_submitted",
            Self::Expired => "expired",
            Self::NoAttemptsLeft => "no_attempts_left",
            Self::TooFrequent => "too_frequent",
            Self::TooManyParallel => "too_many_parallel",
            Self::ArchiveFirst => "archive_first",
            Self::NoQuestions => "no_questions",
            Self::Internal => "internal",
        }
    }

    /// Returns `true` when a caller may reasonably retry the operation
    /// unmodified (currently only optimistic conflicts).
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The crate-wide error type.
///
/// Carries an [`ErrorKind`], an optional human-readable context string, and
/// an optional chained source error. Cheaply `Clone`-able so the same error
/// can be logged and returned to a caller without re-allocating its source.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error of the given kind with no context.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Attaches human-readable context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Attaches a source error, preserving the chain for logs.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the stable wire code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Returns the context string, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Shorthand constructors, one per [`ErrorKind`] variant.
    #[must_use]
    pub const fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }
    #[must_use]
    pub const fn conflict() -> Self {
        Self::new(ErrorKind::Conflict)
    }
    #[must_use]
    pub const fn duplicate() -> Self {
        Self::new(ErrorKind::Duplicate)
    }
    #[must_use]
    pub const fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden)
    }
    #[must_use]
    pub const fn material_locked() -> Self {
        Self::new(ErrorKind::MaterialLocked)
    }
    #[must_use]
    pub const fn not_available() -> Self {
        Self::new(ErrorKind::NotAvailable)
    }
    #[must_use]
    pub const fn already_in_progress() -> Self {
        Self::new(ErrorKind::AlreadyInProgress)
    }
    #[must_use]
    pub const fn already_submitted() -> Self {
        Self::new(ErrorKind::AlreadySubmitted)
    }
    #[must_use]
    pub const fn expired() -> Self {
        Self::new(ErrorKind::Expired)
    }
    #[must_use]
    pub const fn no_attempts_left() -> Self {
        Self::new(ErrorKind::NoAttemptsLeft)
    }
    #[must_use]
    pub const fn too_frequent() -> Self {
        Self::new(ErrorKind::TooFrequent)
    }
    #[must_use]
    pub const fn too_many_parallel() -> Self {
        Self::new(ErrorKind::TooManyParallel)
    }
    #[must_use]
    pub const fn archive_first() -> Self {
        Self::new(ErrorKind::ArchiveFirst)
    }
    #[must_use]
    pub const fn no_questions() -> Self {
        Self::new(ErrorKind::NoQuestions)
    }
    #[must_use]
    pub const fn internal() -> Self {
        Self::new(ErrorKind::Internal)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
