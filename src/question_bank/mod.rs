//! Question bank (C8): composes the question set for a topic-final test at
//! `Start` time (spec §4.8).

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::persistence::PersistenceGateway;
use crate::types::{AttemptId, Question, TopicId};

/// Composes question sets for topic-final tests.
pub struct QuestionBank {
    persistence: Arc<dyn PersistenceGateway>,
}

impl QuestionBank {
    #[must_use]
    pub fn new(persistence: Arc<dyn PersistenceGateway>) -> Self {
        Self { persistence }
    }

    /// Returns the question set for a topic-final test with target count
    /// `target` (`None` means "all eligible"), seeded deterministically
    /// from `attempt` (spec §4.8).
    pub async fn compose(
        &self,
        topic: TopicId,
        target: Option<u32>,
        attempt: AttemptId,
    ) -> Result<Vec<Question>> {
        let all = self.persistence.list_questions_by_topic(topic).await?;
        if all.is_empty() {
            return Err(Error::no_questions());
        }

        let (mut final_pool, mut other_pool): (Vec<Question>, Vec<Question>) =
            all.into_iter().partition(|q| q.is_final);

        let Some(k) = target else {
            let mut combined = final_pool;
            combined.append(&mut other_pool);
            return Ok(combined);
        };

        let mut rng = ChaCha8Rng::seed_from_u64(attempt_seed(attempt));
        final_pool.shuffle(&mut rng);
        other_pool.shuffle(&mut rng);

        let k = k as usize;
        let mut selected: Vec<Question> = final_pool.into_iter().take(k).collect();
        if selected.len() < k {
            let remaining = k - selected.len();
            selected.extend(other_pool.into_iter().take(remaining));
        }

        if selected.is_empty() {
            return Err(Error::no_questions());
        }
        Ok(selected)
    }
}

/// Derives a deterministic RNG seed from the attempt id (spec §4.8's "seed
/// is derived from `attempt_id`" requirement; any stable bijection works,
/// a plain cast suffices since the seed need not be cryptographic).
fn attempt_seed(attempt: AttemptId) -> u64 {
    attempt.get() as u64
}
