use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::{
    domain::score::{HistoryEntry, RateSnapshot},
    dto::{
        score::{HistoryEntryView, RateView},
        sse::{HistoryEntryEvent, RateChangedEvent, ScoreChangedEvent, ServerEvent},
    },
    state::{FeedEvent, FeedHub},
};

const EVENT_SCORE: &str = "score";
const EVENT_HISTORY_ENTRY: &str = "history.entry";
const EVENT_RATE_CHANGED: &str = "rate.changed";

type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

/// Callbacks invoked for each kind of change; unset ones are skipped.
#[derive(Default)]
pub struct FeedHandlers {
    on_score: Option<Handler<i64>>,
    on_history_entry: Option<Handler<HistoryEntry>>,
    on_rate_change: Option<Handler<RateSnapshot>>,
}

impl FeedHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_score(mut self, handler: impl Fn(i64) + Send + Sync + 'static) -> Self {
        self.on_score = Some(Box::new(handler));
        self
    }

    pub fn on_history_entry(
        mut self,
        handler: impl Fn(HistoryEntry) + Send + Sync + 'static,
    ) -> Self {
        self.on_history_entry = Some(Box::new(handler));
        self
    }

    pub fn on_rate_change(
        mut self,
        handler: impl Fn(RateSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.on_rate_change = Some(Box::new(handler));
        self
    }

    fn dispatch(&self, event: FeedEvent) {
        match event {
            FeedEvent::Score(score) => {
                if let Some(handler) = &self.on_score {
                    handler(score);
                }
            }
            FeedEvent::HistoryEntry(entry) => {
                if let Some(handler) = &self.on_history_entry {
                    handler(entry);
                }
            }
            FeedEvent::Rate(snapshot) => {
                if let Some(handler) = &self.on_rate_change {
                    handler(snapshot);
                }
            }
        }
    }
}

/// Handle ending a subscription.
///
/// Unsubscribing is idempotent and also happens when the handle is dropped.
pub struct Unsubscribe {
    stop: watch::Sender<bool>,
}

impl Unsubscribe {
    /// Handle for a subscription that never got connected.
    pub fn detached() -> Self {
        let (stop, _receiver) = watch::channel(true);
        Self { stop }
    }

    /// Stop delivering events. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.stop.send_replace(true);
    }

    /// Whether events may still be delivered.
    pub fn is_active(&self) -> bool {
        !*self.stop.borrow() && !self.stop.is_closed()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Deliver every subsequent feed event to `handlers` until unsubscribed.
///
/// Delivery is at-least-once and unordered with respect to the caller's own
/// mutation results. Must be called from within a Tokio runtime.
pub fn subscribe(hub: &Arc<FeedHub>, handlers: FeedHandlers) -> Unsubscribe {
    let mut receiver = hub.subscribe();
    let (stop, mut stopped) = watch::channel(false);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                }
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(event) => handlers.dispatch(event),
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "feed subscriber lagged; skipping events");
                        }
                    }
                }
            }
        }
        debug!("feed subscription ended");
    });

    Unsubscribe { stop }
}

/// Serialize a feed event into its SSE representation.
pub fn to_server_event(event: &FeedEvent) -> serde_json::Result<ServerEvent> {
    match event {
        FeedEvent::Score(score) => {
            ServerEvent::json(EVENT_SCORE.to_string(), &ScoreChangedEvent { score: *score })
        }
        FeedEvent::HistoryEntry(entry) => ServerEvent::json(
            EVENT_HISTORY_ENTRY.to_string(),
            &HistoryEntryEvent(HistoryEntryView::from(entry)),
        ),
        FeedEvent::Rate(snapshot) => ServerEvent::json(
            EVENT_RATE_CHANGED.to_string(),
            &RateChangedEvent(RateView::from(*snapshot)),
        ),
    }
}

/// Convert a feed receiver into an SSE response, sending `initial` first and
/// forwarding events until the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<FeedEvent>,
    initial: Vec<FeedEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for event in initial {
            if !forward(&tx, &event).await {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(event) => {
                            if !forward(&tx, &event).await {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        // Skip lagged messages but keep the stream alive.
                        Err(RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }

        tracing::info!("score SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Push one event to the client; `false` once the client is gone.
async fn forward(tx: &mpsc::Sender<Result<Event, Infallible>>, event: &FeedEvent) -> bool {
    let payload = match to_server_event(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize feed event");
            return true;
        }
    };

    let mut sse = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        sse = sse.event(name);
    }
    tx.send(Ok(sse)).await.is_ok()
}
