//! score-sync binary entrypoint wiring REST, SSE, the local cache and the score store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use score_sync::{
    clock::SystemClock,
    config::{AppConfig, StoreBackend},
    dao::{
        local_cache::{FileCache, LocalCache, MemoryCache},
        score_store::{ScoreStore, memory::MemoryScoreStore},
        storage::StorageError,
    },
    routes,
    services::{
        commentary::{Commentator, StaticCommentator},
        rate_service, storage_supervisor,
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let cache = open_cache(&config)?;
    let app_state = AppState::new(
        config.clone(),
        cache,
        Arc::new(SystemClock),
        build_commentator(),
    );

    spawn_storage_supervisor(app_state.clone());
    tokio::spawn(rate_service::run_rollover(
        app_state.rates().clone(),
        app_state.clock().clone(),
        app_state.feed().clone(),
        config.rate_poll_interval,
    ));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, store = config.store.as_str(), "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    // Peer addresses identify actors for the cooldown.
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Open the device-local cache, keeping it in memory when no path is configured.
fn open_cache(config: &AppConfig) -> anyhow::Result<Arc<dyn LocalCache>> {
    match &config.cache_path {
        Some(path) => {
            let cache = FileCache::open(path)
                .with_context(|| format!("opening local cache `{}`", path.display()))?;
            info!(path = %cache.path().display(), "using file-backed local cache");
            Ok(Arc::new(cache))
        }
        None => {
            warn!("no cache path configured; local cache will not survive restarts");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

/// Start the supervisor for the configured backend; the node stays degraded
/// on its local cache until the store is reachable.
fn spawn_storage_supervisor(state: SharedState) {
    let backend = state.config().store;
    match backend {
        StoreBackend::Memory => {
            let store = MemoryScoreStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store: Arc<dyn ScoreStore> = Arc::new(store.clone());
                async move { Ok::<_, StorageError>(store) }
            }));
        }
        StoreBackend::Mongo => {
            #[cfg(feature = "mongo-store")]
            {
                tokio::spawn(storage_supervisor::run(state, connect_mongo));
            }
            #[cfg(not(feature = "mongo-store"))]
            {
                warn!("built without the mongo-store feature; running on the local cache only");
                drop(state);
            }
        }
        StoreBackend::Couch => {
            #[cfg(feature = "couch-store")]
            {
                tokio::spawn(storage_supervisor::run(state, connect_couch));
            }
            #[cfg(not(feature = "couch-store"))]
            {
                warn!("built without the couch-store feature; running on the local cache only");
                drop(state);
            }
        }
    }
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo() -> Result<Arc<dyn ScoreStore>, StorageError> {
    use score_sync::dao::score_store::mongodb::{MongoConfig, MongoScoreStore};

    let config = MongoConfig::from_env().await?;
    let store = MongoScoreStore::connect(config).await?;
    Ok(Arc::new(store))
}

#[cfg(feature = "couch-store")]
async fn connect_couch() -> Result<Arc<dyn ScoreStore>, StorageError> {
    use score_sync::dao::score_store::couchdb::{CouchConfig, CouchScoreStore};

    let config = CouchConfig::from_env()?;
    let store = CouchScoreStore::connect(config).await?;
    Ok(Arc::new(store))
}

/// Use the HTTP commentary service when `COMMENTARY_URL` is set, a static line otherwise.
fn build_commentator() -> Arc<dyn Commentator> {
    #[cfg(feature = "http-commentary")]
    {
        use score_sync::services::commentary::HttpCommentator;

        if let Ok(url) = env::var("COMMENTARY_URL") {
            match HttpCommentator::new(url) {
                Ok(commentator) => return Arc::new(commentator),
                Err(err) => warn!(error = %err, "failed to build commentary client; using static line"),
            }
        }
    }

    Arc::new(StaticCommentator::default())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
