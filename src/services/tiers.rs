//! Ordered persistence tiers a mutation is resolved through.
//!
//! The chain tries the remote atomic increment first, then the remote
//! read-modify-write path, then the device-local cache. The first tier that
//! succeeds wins. A tier that cannot be reached hands over to the next one, while
//! a write conflict or a local persistence failure ends the chain.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::dao::{
    local_cache::{CacheError, ScoreCache},
    score_store::ScoreStore,
    storage::StorageError,
};

/// Which tier committed a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AppliedVia {
    /// Remote atomic increment; linearized with every other atomic writer.
    Atomic,
    /// Remote read then unconditional write. Two writers racing between their
    /// read and their write can drop one delta.
    ReadModifyWrite,
    /// Local cache only; not visible to other devices.
    Local,
}

/// Committed result of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierOutcome {
    pub new_score: i64,
    pub via: AppliedVia,
}

/// Why a tier did not commit.
#[derive(Debug, Error)]
pub enum TierError {
    /// The tier cannot serve the request; the next tier should try.
    #[error("tier unavailable")]
    Unavailable(#[source] StorageError),
    /// The unconditional write kept conflicting after its retry.
    #[error("write conflict")]
    Conflict(#[source] StorageError),
    /// The local cache refused the write.
    #[error("local persistence failed")]
    Persistence(#[source] CacheError),
}

/// One way of committing `score := score + delta`.
pub trait MutationTier: Send + Sync {
    /// Tag reported when this tier commits.
    fn via(&self) -> AppliedVia;
    /// Apply `delta` and return the post-mutation score.
    fn apply(&self, delta: i64) -> BoxFuture<'_, Result<TierOutcome, TierError>>;
}

/// Remote `increment_score`, a single round trip with no lost updates.
pub struct AtomicTier {
    store: Arc<dyn ScoreStore>,
}

impl AtomicTier {
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self { store }
    }
}

impl MutationTier for AtomicTier {
    fn via(&self) -> AppliedVia {
        AppliedVia::Atomic
    }

    fn apply(&self, delta: i64) -> BoxFuture<'_, Result<TierOutcome, TierError>> {
        Box::pin(async move {
            let new_score = self
                .store
                .increment_score(delta)
                .await
                .map_err(TierError::Unavailable)?;
            Ok(TierOutcome {
                new_score,
                via: self.via(),
            })
        })
    }
}

/// Remote read followed by an unconditional write of `current + delta`.
pub struct ReadModifyWriteTier {
    store: Arc<dyn ScoreStore>,
}

impl ReadModifyWriteTier {
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self { store }
    }
}

impl MutationTier for ReadModifyWriteTier {
    fn via(&self) -> AppliedVia {
        AppliedVia::ReadModifyWrite
    }

    fn apply(&self, delta: i64) -> BoxFuture<'_, Result<TierOutcome, TierError>> {
        Box::pin(async move {
            let current = self
                .store
                .get_score()
                .await
                .map_err(TierError::Unavailable)?;
            let next = current.saturating_add(delta);

            let mut retried = false;
            loop {
                match self.store.update_score(next).await {
                    Ok(()) => break,
                    Err(err) if err.is_conflict() && !retried => {
                        debug!(error = %err, score = next, "fallback write conflicted; retrying once");
                        retried = true;
                    }
                    Err(err) if err.is_conflict() => return Err(TierError::Conflict(err)),
                    Err(err) => return Err(TierError::Unavailable(err)),
                }
            }

            Ok(TierOutcome {
                new_score: next,
                via: self.via(),
            })
        })
    }
}

/// Device-local cache, always last in the chain.
pub struct LocalTier {
    cache: ScoreCache,
}

impl LocalTier {
    pub fn new(cache: ScoreCache) -> Self {
        Self { cache }
    }
}

impl MutationTier for LocalTier {
    fn via(&self) -> AppliedVia {
        AppliedVia::Local
    }

    fn apply(&self, delta: i64) -> BoxFuture<'_, Result<TierOutcome, TierError>> {
        Box::pin(async move {
            let next = self.cache.score().unwrap_or(0).saturating_add(delta);
            self.cache
                .set_score(next)
                .map_err(TierError::Persistence)?;
            Ok(TierOutcome {
                new_score: next,
                via: self.via(),
            })
        })
    }
}

/// Ordered list of tiers, first success wins.
pub struct TierChain {
    tiers: Vec<Box<dyn MutationTier>>,
}

impl TierChain {
    pub fn new(tiers: Vec<Box<dyn MutationTier>>) -> Self {
        Self { tiers }
    }

    /// Standard chain: atomic, then read-modify-write when a store is
    /// installed, always ending with the local cache.
    pub fn for_store(store: Option<Arc<dyn ScoreStore>>, cache: ScoreCache) -> Self {
        let mut tiers: Vec<Box<dyn MutationTier>> = Vec::with_capacity(3);
        if let Some(store) = store {
            tiers.push(Box::new(AtomicTier::new(store.clone())));
            tiers.push(Box::new(ReadModifyWriteTier::new(store)));
        }
        tiers.push(Box::new(LocalTier::new(cache)));
        Self::new(tiers)
    }

    /// Tags of the tiers, in resolution order.
    pub fn order(&self) -> Vec<AppliedVia> {
        self.tiers.iter().map(|tier| tier.via()).collect()
    }

    /// Resolve `delta` through the tiers.
    pub async fn apply(&self, delta: i64) -> Result<TierOutcome, TierError> {
        let mut last_unavailable = None;
        for tier in &self.tiers {
            match tier.apply(delta).await {
                Ok(outcome) => return Ok(outcome),
                Err(TierError::Unavailable(err)) => {
                    match &err {
                        StorageError::Unsupported { .. } => {
                            debug!(tier = ?tier.via(), error = %err, "tier not supported by store")
                        }
                        _ => warn!(tier = ?tier.via(), error = %err, "tier unavailable; falling back"),
                    }
                    last_unavailable = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(TierError::Unavailable(last_unavailable.unwrap_or_else(
            || StorageError::unsupported("empty tier chain"),
        )))
    }
}
