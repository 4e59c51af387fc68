use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::ImageCache;
use crate::config::ServerConfig;
use crate::game::AssetCache;
use crate::search::SearchService;
use crate::store::{Namespace, Store};

use super::space::SpaceHandler;

/// Every shared, process-wide service a connection's handlers need:
/// configuration, the search pipeline, the persistence store, and the
/// registry of `SpaceHandler`s keyed by `(scope, sourceid)`. One instance
/// is constructed at startup and `Arc`-shared across every connection
/// task.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Store,
    pub search: SearchService,
    games_ns: Namespace,
    client_db_ns: Namespace,
    image_cache: ImageCache,
    spaces: RwLock<HashMap<(String, String), Arc<SpaceHandler>>>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Store,
        search: SearchService,
        games_ns: Namespace,
        client_db_ns: Namespace,
        image_cache: ImageCache,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            search,
            games_ns,
            client_db_ns,
            image_cache,
            spaces: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the root `Games` namespace a `SpaceHandler` subspaces by
    /// `(scope, sourceid)` to persist and restore its tables.
    pub fn games_namespace(&self) -> &Namespace {
        &self.games_ns
    }

    /// Returns the root `ClientDB` namespace a `SpaceHandler` subspaces by
    /// `(scope, sourceid)` into the per-game KV space `kvop` reaches.
    pub fn client_db_namespace(&self) -> &Namespace {
        &self.client_db_ns
    }

    /// Builds a fresh `AssetCache` from the process-wide image cache and
    /// configured small-image dimensions. Cheap: every field is a clone of
    /// an `Arc`-backed handle or a plain config value.
    pub fn build_asset_cache(&self) -> AssetCache {
        AssetCache::new(
            self.config.serving_prefix.clone(),
            vec![self.config.local_serving_address.clone()],
            self.image_cache.clone(),
            self.config.small_image_size,
        )
    }

    /// Returns the `SpaceHandler` for `(scope, sourceid)`, constructing
    /// (and resurrecting its persisted games) one if this is the first
    /// time the pair has been seen.
    pub fn get_or_create_space(self: &Arc<Self>, scope: &str, sourceid: &str) -> Arc<SpaceHandler> {
        let key = (scope.to_string(), sourceid.to_string());
        if let Some(existing) = self.spaces.read().get(&key) {
            return existing.clone();
        }
        let mut spaces = self.spaces.write();
        spaces
            .entry(key)
            .or_insert_with(|| SpaceHandler::restore(self.clone(), scope.to_string(), sourceid.to_string()))
            .clone()
    }

    pub fn all_spaces(&self) -> Vec<Arc<SpaceHandler>> {
        self.spaces.read().values().cloned().collect()
    }
}
