//! Process wiring: assembles every shared service (store, caches, plugin
//! registry, search pipeline) into one `AppState`, spawns the background
//! keepalive sweep, and serves the HTTP/WebSocket router until a Ctrl-C
//! signal arrives. Grounded on the teacher's `server::bootstrap::run_server`
//! shape: infrastructure setup returns `anyhow::Result` with `.context(...)`
//! chains, while anything reachable from a client request is typed
//! `KansasError` (§7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::{ImageCache, QueryCache};
use crate::catalog::Catalog;
use crate::config::ServerConfig;
use crate::plugins::{LocalDbPlugin, MagicCardsInfoPlugin, Plugin, PluginRegistry, PokerCardsPlugin};
use crate::search::SearchService;
use crate::session::AppState;
use crate::store::Store;

use super::routes::build_router;

const LOG_TARGET: &str = "server::bootstrap";

/// Builds the plugin registry: the local image-directory source, the
/// fixed 52-card poker deck, and the remote `magiccards.info` scraper
/// (§4.4). The local plugin is backed by a catalog loaded from
/// `config.catalog_csv` when one is configured, enabling ranked inexact
/// search (§4.4.1) and deck synthesis (§4.4.2); without one it falls back
/// to plain substring matching.
fn build_plugins(config: &ServerConfig) -> Result<PluginRegistry> {
    let catalog = match &config.catalog_csv {
        Some(path) => {
            let catalog = Catalog::load_csv(path)
                .with_context(|| format!("failed to load catalog csv at {}", path.display()))?;
            Some(Arc::new(catalog))
        }
        None => {
            tracing::warn!(target: LOG_TARGET, "no KANSAS_CATALOG_CSV configured; local search falls back to substring matching and deck synthesis is unavailable");
            None
        }
    };

    let mut plugins: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
    plugins.insert(
        "poker".to_string(),
        Arc::new(PokerCardsPlugin::new(config.poker_cards_dir.clone(), "third_party/cards52/".to_string())),
    );
    plugins.insert(
        "local".to_string(),
        Arc::new(LocalDbPlugin::new(config.local_cards_dir.clone(), "local_cards/".to_string(), catalog)),
    );
    plugins.insert("magiccards.info".to_string(), Arc::new(MagicCardsInfoPlugin::new()));

    Ok(PluginRegistry::new(plugins))
}

/// Assembles the persistence layer and every service that sits on top of
/// it, returning the shared `AppState` every connection task dispatches
/// against.
fn build_app_state(config: ServerConfig) -> Result<Arc<AppState>> {
    let store = Store::open(&config.db_path)
        .with_context(|| format!("failed to open kv store at {}", config.db_path.display()))?;

    let query_cache = QueryCache::new(store.namespace("QueryCache", 0).context("open QueryCache namespace")?);
    let cache_map_ns = store.namespace("CacheMap", 0).context("open CacheMap namespace")?;
    let image_cache = ImageCache::new(config.cache_path.clone(), config.local_serving_address.clone(), cache_map_ns);

    let plugins = build_plugins(&config)?;
    let search = SearchService::new(plugins, query_cache, image_cache.clone());

    let games_ns = store.namespace("Games", 0).context("open Games namespace")?;
    let client_db_ns = store.namespace("ClientDB", 0).context("open ClientDB namespace")?;

    Ok(AppState::new(config, store, search, games_ns, client_db_ns, image_cache))
}

/// Sweeps every live `GameHandler` in every `SpaceHandler` on a fixed
/// interval to GC stale presence even for games that see no traffic
/// (§4.8, §10 "background keepalive-sweep task"). Mirrors the shape of
/// the teacher's `tokio::spawn`'d long-lived background workers.
fn spawn_keepalive_sweeper(app: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let spaces = app.all_spaces();
            let mut swept = 0usize;
            for space in spaces {
                for game in space.all_games() {
                    game.sweep_presence();
                    swept += 1;
                }
            }
            tracing::debug!(target: LOG_TARGET, swept, "keepalive sweep complete");
        }
    });
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let bind = config.bind;
    let sweep_interval = Duration::from_secs(config.keepalive_sweep_interval_secs);

    let app = build_app_state(config)?;
    spawn_keepalive_sweeper(Arc::clone(&app), sweep_interval);

    let router = build_router(Arc::clone(&app));

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local_addr = listener.local_addr()?;
    info!(target: LOG_TARGET, %local_addr, "kansas-table listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: LOG_TARGET, %err, "failed to install ctrl-c handler");
        return;
    }
    info!(target: LOG_TARGET, "shutdown signal received");
}
