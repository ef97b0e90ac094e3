//! Traits for the collaborators this crate consumes but never implements
//! (spec §6). The transport layer and its sibling services (identity,
//! authoring, media, notifications) satisfy these; the core only ever holds
//! a `dyn` reference to them.
//!
//! Treating group access, authorship, and media URLs as interfaces rather
//! than imports is the structural fix for the cyclic-dependency problem
//! noted in spec §9: the core depends on these traits, nothing here depends
//! back on the core's own services.
//!
//! Each trait returns a boxed future rather than using `async fn` directly
//! so that `dyn IdentityOracle` etc. stay object-safe; services hold these
//! as `Arc<dyn ...>`, not as generic parameters, since the concrete
//! implementation is chosen once at process start.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::types::{QuestionId, SectionId, SubsectionId, TestId, TopicId, UserId};

/// A future boxed for storage behind a trait object.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A user's platform-wide role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

/// Resolves roles and group-based topic access. Backed by the identity
/// subsystem; the core never reads group/user tables directly.
pub trait IdentityOracle: Send + Sync {
    /// Returns `user`'s platform role.
    fn role_of(&self, user: UserId) -> BoxFuture<'_, Result<Role>>;

    /// Returns whether `user`'s active group assignments grant access to `topic`.
    fn group_topic_access(&self, user: UserId, topic: TopicId) -> BoxFuture<'_, Result<bool>>;
}

/// Authorizes management/authorship actions on a topic. Backed by the
/// authoring subsystem.
pub trait TopicAuthorOracle: Send + Sync {
    /// Returns whether `user` may manage (edit, archive, reset attempts on) `topic`.
    fn can_manage_topic(&self, user: UserId, topic: TopicId) -> BoxFuture<'_, Result<bool>>;

    /// Returns whether `user` may access `topic`'s material as its author/co-author.
    fn can_access_topic_as_author(
        &self,
        user: UserId,
        topic: TopicId,
    ) -> BoxFuture<'_, Result<bool>>;
}

/// Resolves a storage path to a time-bounded URL. The core stores paths,
/// never URLs, and asks this service at read time (spec §6.3).
pub trait MediaUrlService: Send + Sync {
    /// Returns a time-bounded URL for `storage_path` in `bucket`, and the
    /// number of seconds until it expires (used to size the cache TTL at
    /// 0.9x, per spec §4.2's `file:url:{bucket}:{object}` key family).
    fn presign<'a>(&'a self, bucket: &'a str, storage_path: &'a str) -> BoxFuture<'a, Result<(String, u64)>>;
}

/// The kinds of completion transitions worth notifying on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    SubsectionCompleted { subsection_id: SubsectionId },
    SectionCompleted { section_id: SectionId },
    TopicCompleted { topic_id: TopicId },
    TestPassed { test_id: TestId, score: u32 },
    /// The question belongs to this (and only this) completion variant's
    /// owning test id's topic; carried so notification payloads can name
    /// the exact question asked, if the sink wants it.
    QuestionAnswered { question_id: QuestionId, correct: bool },
}

/// Best-effort sink for completion-transition events. Failures here must
/// never surface to the caller (spec §7's recovery policy) — callers should
/// not even bother checking a result, so this returns nothing.
pub trait NotificationSink: Send + Sync {
    /// Notifies on a subsection/section/topic/test completion transition.
    fn notify_completion(&self, user: UserId, event: CompletionEvent) -> BoxFuture<'_, ()>;
}

/// A [`NotificationSink`] that does nothing, for callers with no sink wired up.
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn notify_completion(&self, _user: UserId, _event: CompletionEvent) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Ensures `user` may manage `topic`, surfacing `ErrorKind::Forbidden`
/// otherwise. Every mutating question-bank and attempt-reset operation
/// calls this before touching storage, mirroring the `ensure_can_access_topic`
/// guard used throughout the original service layer.
pub async fn ensure_can_manage_topic(
    oracle: &dyn TopicAuthorOracle,
    user: UserId,
    topic: TopicId,
) -> Result<()> {
    if oracle.can_manage_topic(user, topic).await? {
        Ok(())
    } else {
        Err(crate::error::Error::forbidden()
            .with_context(format!("user {user} may not manage topic {topic}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAllow;
    impl TopicAuthorOracle for AlwaysAllow {
        fn can_manage_topic(&self, _user: UserId, _topic: TopicId) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async { Ok(true) })
        }
        fn can_access_topic_as_author(
            &self,
            _user: UserId,
            _topic: TopicId,
        ) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async { Ok(true) })
        }
    }

    struct AlwaysDeny;
    impl TopicAuthorOracle for AlwaysDeny {
        fn can_manage_topic(&self, _user: UserId, _topic: TopicId) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async { Ok(false) })
        }
        fn can_access_topic_as_author(
            &self,
            _user: UserId,
            _topic: TopicId,
        ) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async { Ok(false) })
        }
    }

    #[tokio::test]
    async fn manage_topic_guard_passes_when_allowed() {
        let oracle = AlwaysAllow;
        let result = ensure_can_manage_topic(&oracle, UserId::new(1), TopicId::new(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn manage_topic_guard_rejects_when_denied() {
        let oracle = AlwaysDeny;
        let result = ensure_can_manage_topic(&oracle, UserId::new(1), TopicId::new(1)).await;
        assert_eq!(result.unwrap_err().kind(), crate::error::ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn null_sink_does_not_panic() {
        NullNotificationSink
            .notify_completion(
                UserId::new(1),
                CompletionEvent::TopicCompleted { topic_id: TopicId::new(1) },
            )
            .await;
    }
}
