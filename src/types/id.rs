//! Type-safe integer surrogate-key identifiers.
//!
//! Every entity in spec §3 is referenced by an integer surrogate key. Each
//! gets its own newtype so a `SectionId` can never be passed where a
//! `TopicId` is expected, while staying a cheap `Copy` wrapper around `i64`.

use core::fmt;
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wraps a raw surrogate key.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw surrogate key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

entity_id!(UserId, "A user (student, teacher, or admin) surrogate key.");
entity_id!(TopicId, "A [`crate::types::Topic`] surrogate key.");
entity_id!(SectionId, "A [`crate::types::Section`] surrogate key.");
entity_id!(SubsectionId, "A [`crate::types::Subsection`] surrogate key.");
entity_id!(QuestionId, "A [`crate::types::Question`] bank-entry surrogate key.");
entity_id!(TestId, "A [`crate::types::Test`] surrogate key.");
entity_id!(AttemptId, "A [`crate::types::TestAttempt`] surrogate key.");
entity_id!(GroupId, "A group surrogate key (used only at the access-control boundary).");
