//! Short text commentary about score changes.
//!
//! Commentary is decoration: it is fetched on demand, bounded by a timeout,
//! and replaced by a static line whenever the collaborator misbehaves. The
//! mutation path never waits on it.

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::timeout;
use tracing::warn;

/// Line served when no commentary could be produced.
pub const FALLBACK_COMMENTARY: &str = "The crowd holds its breath.";

#[derive(Debug, Error)]
pub enum CommentaryError {
    #[error("commentary request failed: {0}")]
    Request(String),
    #[error("commentary response was empty")]
    Empty,
}

/// Produces a short line of text about a score change.
pub trait Commentator: Send + Sync {
    fn comment(&self, score: i64, delta: i64) -> BoxFuture<'_, Result<String, CommentaryError>>;
}

/// Commentator that always answers with the same line.
#[derive(Debug, Clone)]
pub struct StaticCommentator {
    text: String,
}

impl StaticCommentator {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for StaticCommentator {
    fn default() -> Self {
        Self::new(FALLBACK_COMMENTARY)
    }
}

impl Commentator for StaticCommentator {
    fn comment(&self, _score: i64, _delta: i64) -> BoxFuture<'_, Result<String, CommentaryError>> {
        Box::pin(async move { Ok(self.text.clone()) })
    }
}

#[cfg(feature = "http-commentary")]
pub use self::http::HttpCommentator;

#[cfg(feature = "http-commentary")]
mod http {
    use futures::future::BoxFuture;
    use reqwest::Client;
    use serde::{Deserialize, Serialize};

    use super::{Commentator, CommentaryError};

    #[derive(Serialize)]
    struct CommentaryRequest {
        score: i64,
        delta: i64,
    }

    #[derive(Deserialize)]
    struct CommentaryResponse {
        text: String,
    }

    /// Commentator backed by an HTTP text service.
    ///
    /// POSTs `{"score", "delta"}` as JSON and expects `{"text"}` back.
    #[derive(Clone)]
    pub struct HttpCommentator {
        client: Client,
        url: String,
    }

    impl HttpCommentator {
        pub fn new(url: impl Into<String>) -> Result<Self, CommentaryError> {
            let client = Client::builder()
                .build()
                .map_err(|err| CommentaryError::Request(err.to_string()))?;
            Ok(Self {
                client,
                url: url.into(),
            })
        }
    }

    impl Commentator for HttpCommentator {
        fn comment(
            &self,
            score: i64,
            delta: i64,
        ) -> BoxFuture<'_, Result<String, CommentaryError>> {
            Box::pin(async move {
                let response = self
                    .client
                    .post(&self.url)
                    .json(&CommentaryRequest { score, delta })
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|err| CommentaryError::Request(err.to_string()))?;
                let body = response
                    .json::<CommentaryResponse>()
                    .await
                    .map_err(|err| CommentaryError::Request(err.to_string()))?;
                Ok(body.text)
            })
        }
    }
}

/// Ask `commentator` for a line, falling back to [`FALLBACK_COMMENTARY`] on
/// error, empty answer or timeout.
pub async fn comment_or_fallback(
    commentator: &dyn Commentator,
    score: i64,
    delta: i64,
    limit: Duration,
) -> String {
    let result = match timeout(limit, commentator.comment(score, delta)).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(CommentaryError::Empty),
        Ok(result) => result,
        Err(_) => Err(CommentaryError::Request(format!(
            "timed out after {}ms",
            limit.as_millis()
        ))),
    };

    result.map(|text| text.trim().to_owned()).unwrap_or_else(|err| {
        warn!(error = %err, "commentary unavailable; using fallback");
        FALLBACK_COMMENTARY.to_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Commentator for Failing {
        fn comment(&self, _: i64, _: i64) -> BoxFuture<'_, Result<String, CommentaryError>> {
            Box::pin(async { Err(CommentaryError::Request("boom".into())) })
        }
    }

    struct Silent;

    impl Commentator for Silent {
        fn comment(&self, _: i64, _: i64) -> BoxFuture<'_, Result<String, CommentaryError>> {
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test]
    async fn working_commentator_is_used() {
        let commentator = StaticCommentator::new("  What a swing!  ");
        let text = comment_or_fallback(&commentator, 10, 3, Duration::from_secs(1)).await;
        assert_eq!(text, "What a swing!");
    }

    #[tokio::test]
    async fn errors_fall_back_to_the_static_line() {
        let text = comment_or_fallback(&Failing, 10, 3, Duration::from_secs(1)).await;
        assert_eq!(text, FALLBACK_COMMENTARY);
    }

    #[tokio::test]
    async fn empty_answers_fall_back_to_the_static_line() {
        let commentator = StaticCommentator::new("   ");
        let text = comment_or_fallback(&commentator, 0, 0, Duration::from_secs(1)).await;
        assert_eq!(text, FALLBACK_COMMENTARY);
    }

    #[tokio::test]
    async fn slow_commentators_time_out() {
        let text = comment_or_fallback(&Silent, 1, 1, Duration::from_millis(20)).await;
        assert_eq!(text, FALLBACK_COMMENTARY);
    }
}
