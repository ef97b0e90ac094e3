//! A thin span-building helper shared by every component, so each one
//! threads the same `user`/entity fields into its `tracing` spans instead of
//! reinventing the field names.

use tracing::Span;

/// Builds an `info`-level span named `op`, carrying `user` and the numeric
/// id of whatever entity the operation concerns (subsection, test, attempt).
///
/// Grounded on the teacher's `DiagnosticContext` span-per-operation idiom,
/// minus the cross-task context stack: this crate's spans are process-local
/// and live only for the duration of one `async fn`, so there is nothing to
/// carry across an await boundary by hand.
pub fn span_for(op: &'static str, user: i64, entity: i64) -> Span {
    tracing::info_span!("learnkernel", op, user, entity)
}
