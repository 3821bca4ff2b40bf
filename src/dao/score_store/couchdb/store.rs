use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use time::OffsetDateTime;

use crate::{
    dao::{
        models::{HistoryEntity, from_unix_ms, to_unix_ms},
        score_store::{ScoreStore, StoreChangeStream},
        storage::{StorageError, StorageResult},
    },
    domain::score::{CooldownRecord, HistoryEntry},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchCooldownDocument, CouchHistoryDocument, CouchScoreDocument,
        END_SUFFIX, HISTORY_PREFIX, RevisionOnly, SCORE_DOC_ID, cooldown_doc_id,
    },
};

#[derive(Clone)]
pub struct CouchScoreStore {
    client: Client,
    config: Arc<CouchConfig>,
}

impl CouchScoreStore {
    /// Build the HTTP client and make sure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            config: Arc::new(config),
        };
        store.ensure_database().await?;
        Ok(store)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.credentials {
            Some(credentials) => {
                builder.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = self.config.document_url(path);
        self.authorized(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.config.database.clone();
        let url = self.config.database_url();

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorized(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412: another node created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn current_revision(&self, doc_id: &str) -> CouchResult<Option<String>> {
        Ok(self
            .get_document::<RevisionOnly>(doc_id)
            .await?
            .map(|doc| doc.rev))
    }

    async fn get_score(&self) -> CouchResult<i64> {
        if let Some(doc) = self.get_document::<CouchScoreDocument>(SCORE_DOC_ID).await? {
            return Ok(doc.value);
        }

        match self
            .put_document(SCORE_DOC_ID, &CouchScoreDocument::new(0, None))
            .await
        {
            Ok(()) => Ok(0),
            // Someone else initialised it between our read and write.
            Err(CouchDaoError::Conflict { .. }) => Ok(self
                .get_document::<CouchScoreDocument>(SCORE_DOC_ID)
                .await?
                .map(|doc| doc.value)
                .unwrap_or(0)),
            Err(err) => Err(err),
        }
    }

    /// Overwrite the score at whatever revision is current. A writer slipping in
    /// between the revision lookup and the PUT yields [`CouchDaoError::Conflict`].
    async fn update_score(&self, value: i64) -> CouchResult<()> {
        let rev = self.current_revision(SCORE_DOC_ID).await?;
        self.put_document(SCORE_DOC_ID, &CouchScoreDocument::new(value, rev))
            .await
    }

    async fn append_history(&self, entry: HistoryEntry) -> CouchResult<()> {
        let document = CouchHistoryDocument::from(HistoryEntity::from(&entry));
        self.put_document(&document.id.clone(), &document).await
    }

    async fn get_history(&self, limit: usize) -> CouchResult<Vec<HistoryEntry>> {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("descending", "true".to_string()),
            ("startkey", format!("\"{HISTORY_PREFIX}{END_SUFFIX}\"")),
            ("endkey", format!("\"{HISTORY_PREFIX}\"")),
            ("limit", limit.to_string()),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut entries = Vec::with_capacity(payload.rows.len());
        for row in payload.rows {
            let Some(doc) = row.doc else {
                continue;
            };
            let parsed: CouchHistoryDocument =
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id.clone(),
                    source,
                })?;
            let entry = HistoryEntry::try_from(parsed.entry)
                .map_err(|source| CouchDaoError::CorruptDocument { path: row.id, source })?;
            entries.push(entry);
        }

        entries.reverse();
        Ok(entries)
    }

    async fn get_cooldown(&self, actor: String) -> CouchResult<Option<OffsetDateTime>> {
        let doc_id = cooldown_doc_id(&actor);
        let Some(doc) = self.get_document::<CouchCooldownDocument>(&doc_id).await? else {
            return Ok(None);
        };
        from_unix_ms(doc.last_mutation_ms)
            .map(Some)
            .map_err(|source| CouchDaoError::CorruptDocument {
                path: doc_id,
                source,
            })
    }

    /// Last writer wins; a revision clash is retried once with the fresh revision.
    async fn set_cooldown(&self, record: CooldownRecord) -> CouchResult<()> {
        let doc_id = cooldown_doc_id(&record.actor);
        let last_mutation_ms = to_unix_ms(record.last_mutation_at);

        let mut retried = false;
        loop {
            let document = CouchCooldownDocument {
                id: doc_id.clone(),
                rev: self.current_revision(&doc_id).await?,
                last_mutation_ms,
            };
            match self.put_document(&doc_id, &document).await {
                Err(CouchDaoError::Conflict { .. }) if !retried => retried = true,
                other => return other,
            }
        }
    }

    async fn health_check(&self) -> CouchResult<()> {
        let url = self.config.database_url();
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: url,
                status: response.status(),
            })
        }
    }
}

impl ScoreStore for CouchScoreStore {
    fn get_score(&self) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.get_score().await.map_err(Into::into) })
    }

    fn get_history(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<HistoryEntry>>> {
        let store = self.clone();
        Box::pin(async move { store.get_history(limit).await.map_err(Into::into) })
    }

    fn increment_score(&self, _delta: i64) -> BoxFuture<'static, StorageResult<i64>> {
        Box::pin(async { Err(StorageError::unsupported("increment_score")) })
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
        Box::pin(async { Err(StorageError::unsupported("watch")) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.health_check().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
