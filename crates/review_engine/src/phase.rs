use std::{future::Future, sync::Arc};

use shared::{domain::VotePhase, error::ApiError};
use storage::Storage;
use tokio::sync::RwLock;
use tracing::info;

/// Process-wide vote phase.
///
/// The stored row is the only copy of the phase; every check reads it. The
/// lock orders gated writes against transitions: a write that passed its
/// phase check holds the read side until it has committed, and
/// [`VotePhaseGate::transition`] takes the write side, so a new phase is
/// never published while a write admitted under the old one is in flight.
#[derive(Clone)]
pub struct VotePhaseGate {
    storage: Storage,
    order: Arc<RwLock<()>>,
}

impl VotePhaseGate {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            order: Arc::new(RwLock::new(())),
        }
    }

    pub async fn current_phase(&self) -> anyhow::Result<VotePhase> {
        self.storage.load_vote_phase().await
    }

    /// Persists `next`. Returns the phase that was replaced.
    pub async fn transition(&self, next: VotePhase) -> anyhow::Result<VotePhase> {
        let _exclusive = self.order.write().await;
        let previous = self.current_phase().await?;
        if previous == next {
            return Ok(previous);
        }
        self.storage.store_vote_phase(next).await?;
        info!(%previous, %next, "vote phase changed");
        Ok(previous)
    }

    /// Fails with a phase violation unless the stored phase is `required`.
    pub async fn ensure(&self, required: VotePhase, action: &str) -> Result<(), ApiError> {
        let current = self.current_phase().await.map_err(crate::internal)?;
        if current == required {
            Ok(())
        } else {
            Err(ApiError::phase_violation(format!(
                "{action} requires vote phase {required}, current phase is {current}"
            )))
        }
    }

    /// Runs `write` only in `required`, and keeps transitions out until it
    /// has finished.
    pub async fn with_phase<T, F, Fut>(
        &self,
        required: VotePhase,
        action: &str,
        write: F,
    ) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let _shared = self.order.read().await;
        self.ensure(required, action).await?;
        write().await
    }
}
