use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    options::{FullDocumentType, IndexOptions, ReturnDocument},
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoCooldownDocument, MongoHistoryDocument, MongoScoreDocument, doc_id},
};
use crate::{
    dao::{
        score_store::{ScoreStore, StoreChange, StoreChangeStream},
        storage::StorageResult,
    },
    domain::score::{CooldownRecord, HistoryEntry, SCORE_KEY},
};

const SCORE_COLLECTION_NAME: &str = "score";
const HISTORY_COLLECTION_NAME: &str = "history";
const COOLDOWN_COLLECTION_NAME: &str = "cooldowns";

/// MongoDB backend; the score lives in a single document mutated with `$inc`.
#[derive(Clone)]
pub struct MongoScoreStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoScoreStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.history_collection().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"timestamp": -1, "_id": -1})
            .options(
                IndexOptions::builder()
                    .name(Some("history_recent_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: HISTORY_COLLECTION_NAME,
                index: "timestamp,_id",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn score_collection(&self) -> Collection<MongoScoreDocument> {
        self.database().await.collection(SCORE_COLLECTION_NAME)
    }

    async fn history_collection(&self) -> Collection<MongoHistoryDocument> {
        self.database().await.collection(HISTORY_COLLECTION_NAME)
    }

    async fn cooldown_collection(&self) -> Collection<MongoCooldownDocument> {
        self.database().await.collection(COOLDOWN_COLLECTION_NAME)
    }

    async fn get_score(&self) -> MongoResult<i64> {
        let collection = self.score_collection().await;
        let document = collection
            .find_one_and_update(
                doc_id(SCORE_KEY),
                doc! {"$setOnInsert": {"value": 0_i64}},
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::LoadScore { source })?;

        document
            .map(|doc| doc.value)
            .ok_or(MongoDaoError::MissingScore)
    }

    async fn increment_score(&self, delta: i64) -> MongoResult<i64> {
        let collection = self.score_collection().await;
        let document = collection
            .find_one_and_update(doc_id(SCORE_KEY), doc! {"$inc": {"value": delta}})
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::IncrementScore { delta, source })?;

        document
            .map(|doc| doc.value)
            .ok_or(MongoDaoError::MissingScore)
    }

    async fn update_score(&self, value: i64) -> MongoResult<()> {
        let collection = self.score_collection().await;
        collection
            .update_one(doc_id(SCORE_KEY), doc! {"$set": {"value": value}})
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::UpdateScore { value, source })?;
        Ok(())
    }

    async fn append_history(&self, entry: HistoryEntry) -> MongoResult<()> {
        let document = MongoHistoryDocument::from(&entry);
        let collection = self.history_collection().await;
        collection
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::AppendHistory {
                id: entry.id.to_string(),
                source,
            })?;
        Ok(())
    }

    async fn get_history(&self, limit: usize) -> MongoResult<Vec<HistoryEntry>> {
        let collection = self.history_collection().await;
        let documents: Vec<MongoHistoryDocument> = collection
            .find(doc! {})
            .sort(doc! {"timestamp": -1, "_id": -1})
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(|source| MongoDaoError::ListHistory { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListHistory { source })?;

        let mut entries = documents
            .into_iter()
            .map(HistoryEntry::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| MongoDaoError::CorruptDocument {
                collection: HISTORY_COLLECTION_NAME,
                source,
            })?;
        entries.reverse();
        Ok(entries)
    }

    async fn get_cooldown(&self, actor: String) -> MongoResult<Option<OffsetDateTime>> {
        let collection = self.cooldown_collection().await;
        let document = collection
            .find_one(doc_id(&actor))
            .await
            .map_err(|source| MongoDaoError::LoadCooldown {
                actor: actor.clone(),
                source,
            })?;

        document
            .map(|doc| doc.last_mutation_at())
            .transpose()
            .map_err(|source| MongoDaoError::CorruptDocument {
                collection: COOLDOWN_COLLECTION_NAME,
                source,
            })
    }

    async fn set_cooldown(&self, record: CooldownRecord) -> MongoResult<()> {
        let actor = record.actor.clone();
        let document = MongoCooldownDocument::from(record);
        let collection = self.cooldown_collection().await;
        collection
            .replace_one(doc_id(&actor), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveCooldown { actor, source })?;
        Ok(())
    }

    /// Merge change streams of the score and history collections.
    ///
    /// Requires a replica set or sharded deployment; standalone servers reject the call.
    async fn watch(&self) -> MongoResult<StoreChangeStream> {
        let scores = self
            .score_collection()
            .await
            .watch()
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::Watch {
                collection: SCORE_COLLECTION_NAME,
                source,
            })?
            .map(|event| {
                event.map(|event| {
                    event
                        .full_document
                        .map(|doc| StoreChange::Score(doc.value))
                })
            });

        let history = self
            .history_collection()
            .await
            .watch()
            .await
            .map_err(|source| MongoDaoError::Watch {
                collection: HISTORY_COLLECTION_NAME,
                source,
            })?
            .map(|event| {
                event.map(|event| {
                    event
                        .full_document
                        .and_then(|doc| HistoryEntry::try_from(doc).ok())
                        .map(StoreChange::HistoryEntry)
                })
            });

        let mut merged = Box::pin(futures::stream::select(scores, history));
        let stream = async_stream::stream! {
            while let Some(item) = merged.next().await {
                match item {
                    Ok(Some(change)) => yield change,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(error = %err, "MongoDB change stream failed");
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

impl ScoreStore for MongoScoreStore {
    fn get_score(&self) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.get_score().await.map_err(Into::into) })
    }

    fn get_history(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<HistoryEntry>>> {
        let store = self.clone();
        Box::pin(async move { store.get_history(limit).await.map_err(Into::into) })
    }

    fn increment_score(&self, delta: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.increment_score(delta).await.map_err(Into::into) })
    }

    fn update_score(&self, value: i64) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_score(value).await.map_err(Into::into) })
    }

    fn append_history(&self, entry: HistoryEntry) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append_history(entry).await.map_err(Into::into) })
    }

    fn get_cooldown(
        &self,
        actor: &str,
    ) -> BoxFuture<'static, StorageResult<Option<OffsetDateTime>>> {
        let store = self.clone();
        let actor = actor.to_owned();
        Box::pin(async move { store.get_cooldown(actor).await.map_err(Into::into) })
    }

    fn set_cooldown(&self, record: CooldownRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_cooldown(record).await.map_err(Into::into) })
    }

    fn watch(&self) -> BoxFuture<'static, StorageResult<StoreChangeStream>> {
        let store = self.clone();
        Box::pin(async move { store.watch().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
