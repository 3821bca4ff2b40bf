#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use time::OffsetDateTime;

use crate::{
    dao::storage::StorageResult,
    domain::score::{CooldownRecord, HistoryEntry},
};

/// Change pushed by a store to every connected observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Score(i64),
    HistoryEntry(HistoryEntry),
}

/// Stream of remote changes; ends when the push channel is lost.
pub type StoreChangeStream = BoxStream<'static, StoreChange>;

/// Abstraction over the shared store holding the score, its history and the cooldown ledger.
///
/// Calls from different actors may overlap freely. Only [`ScoreStore::increment_score`]
/// is safe against concurrent writers; [`ScoreStore::update_score`] overwrites blindly.
pub trait ScoreStore: Send + Sync {
    /// Current score, created as zero on first access.
    fn get_score(&self) -> BoxFuture<'static, StorageResult<i64>>;
    /// Up to `limit` most recent entries, oldest first.
    fn get_history(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<HistoryEntry>>>;
    /// Atomically add `delta` and return the post-increment value.
    ///
    /// Backends without such a primitive return [`StorageError::Unsupported`].
    ///
    /// [`StorageError::Unsupported`]: crate::dao::storage::StorageError::Unsupported
    fn increment_score(&self, delta: i64) -> BoxFuture<'static, StorageResult<i64>>;
    /// Unconditionally overwrite the score.
    fn update_score(&self, value: i64) -> BoxFuture<'static, StorageResult<()>>;
    fn append_history(&self, entry: HistoryEntry) -> BoxFuture<'static, StorageResult<()>>;
    fn get_cooldown(&self, actor: &str)
    -> BoxFuture<'static, StorageResult<Option<OffsetDateTime>>>;
    fn set_cooldown(&self, record: CooldownRecord) -> BoxFuture<'static, StorageResult<()>>;
    /// Open the push channel notifying score and history changes from any writer.
    fn watch(&self) -> BoxFuture<'static, StorageResult<StoreChangeStream>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
