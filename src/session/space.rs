//! The per-`(scope, sourceid)` game registry (§4.7 SpaceHandler): holds
//! every live `GameHandler` for one space, restoring persisted games from
//! the store on first touch and evicting the least-recently-used idle
//! game once `max_games_per_scope` is exceeded.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::KansasError;
use crate::game::GameState;
use crate::store::Namespace;

use super::app::AppState;
use super::game_handler::GameHandler;

const LOG_TARGET: &str = "session::space";

pub struct SpaceHandler {
    app: Arc<AppState>,
    pub scope: String,
    pub sourceid: String,
    games_ns: Namespace,
    client_db_ns: Namespace,
    games: RwLock<Vec<Arc<GameHandler>>>,
}

impl SpaceHandler {
    /// Opens this space's subspace of the `Games` namespace and restores
    /// every persisted game found under it, rebuilding each one's derived
    /// index before it is reachable again.
    pub fn restore(app: Arc<AppState>, scope: String, sourceid: String) -> Arc<Self> {
        let games_ns = app
            .games_namespace()
            .subspace(scope.clone())
            .subspace(sourceid.clone());
        let client_db_ns = app
            .client_db_namespace()
            .subspace(scope.clone())
            .subspace(sourceid.clone());

        let mut restored = Vec::new();
        match games_ns.list::<GameState>() {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok((gameid, state)) => {
                            tracing::info!(target: LOG_TARGET, scope, sourceid, gameid, "restoring persisted game");
                            restored.push(GameHandler::restore(
                                app.clone(),
                                gameid,
                                state,
                                games_ns.clone(),
                                client_db_ns.clone(),
                                app.build_asset_cache(),
                            ));
                        }
                        Err(err) => {
                            tracing::warn!(target: LOG_TARGET, %err, scope, sourceid, "skipping unreadable persisted game");
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, %err, scope, sourceid, "failed to list persisted games");
            }
        }

        Arc::new(Self {
            app,
            scope,
            sourceid,
            games_ns,
            client_db_ns,
            games: RwLock::new(restored),
        })
    }

    /// Every currently-loaded `GameHandler` in this space, for the
    /// background keepalive sweep to GC presence on.
    pub fn all_games(&self) -> Vec<Arc<GameHandler>> {
        self.games.read().clone()
    }

    pub fn list_games(&self) -> Vec<String> {
        self.games.read().iter().map(|g| g.gameid.clone()).collect()
    }

    /// Games ranked `(has_presence desc, last_used desc)`, each reported
    /// with its live presence count, for the `list_games` reply.
    pub fn list_games_ranked(&self) -> Vec<serde_json::Value> {
        let mut entries: Vec<(String, bool, std::time::Instant, usize)> = self
            .games
            .read()
            .iter()
            .map(|g| (g.gameid.clone(), g.has_presence(), g.last_used(), g.presence_count()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        entries
            .into_iter()
            .map(|(gameid, _, _, presence)| serde_json::json!({ "gameid": gameid, "presence": presence }))
            .collect()
    }

    /// Every gameid ever persisted under this scope's namespace, including
    /// games not currently loaded into the registry.
    pub fn list_scope(&self) -> Vec<String> {
        self.games_ns.list_keys().unwrap_or_default()
    }

    pub fn get_game(&self, gameid: &str) -> Option<Arc<GameHandler>> {
        self.games.read().iter().find(|g| g.gameid == gameid).cloned()
    }

    /// Returns the named game, creating (and, if needed, evicting to make
    /// room for) it if it does not already exist.
    pub fn get_or_create_game(&self, gameid: &str) -> Arc<GameHandler> {
        if let Some(existing) = self.get_game(gameid) {
            return existing;
        }

        self.evict_if_full();

        let handler = GameHandler::new(
            self.app.clone(),
            gameid.to_string(),
            self.sourceid.clone(),
            self.games_ns.clone(),
            self.client_db_ns.clone(),
            self.app.build_asset_cache(),
        );
        self.games.write().push(handler.clone());
        tracing::info!(target: LOG_TARGET, scope = %self.scope, sourceid = %self.sourceid, gameid, "created game");
        handler
    }

    /// Drops the least-recently-used game with no connected presence once
    /// the space is at capacity. A space entirely full of games that all
    /// still have presence is left over capacity rather than terminating a
    /// live table.
    fn evict_if_full(&self) {
        let max = self.app.config.max_games_per_scope;
        loop {
            let over_capacity = self.games.read().len() >= max;
            if !over_capacity {
                return;
            }
            let victim = {
                let games = self.games.read();
                games
                    .iter()
                    .filter(|g| !g.has_presence())
                    .min_by_key(|g| g.last_used())
                    .cloned()
            };
            match victim {
                Some(victim) => {
                    tracing::info!(target: LOG_TARGET, gameid = %victim.gameid, "evicting idle game to make room");
                    self.end_game(&victim.gameid);
                }
                None => return,
            }
        }
    }

    /// Terminates and drops the named game, deleting its persisted
    /// snapshot. No-op if the game does not exist.
    pub fn end_game(&self, gameid: &str) {
        let mut games = self.games.write();
        if let Some(pos) = games.iter().position(|g| g.gameid == gameid) {
            let handler = games.remove(pos);
            drop(games);
            handler.terminate();
        }
    }

    /// Bulk-copies every persisted game snapshot from this Scope's
    /// namespace into `dest_scope`'s, for the same sourceid. A pure
    /// namespace-to-namespace key copy: in-memory registries (this one's
    /// and the destination's, if already loaded) are left untouched.
    pub fn clone_scope(&self, dest_scope: &str) -> Result<usize, KansasError> {
        let dest_ns = self
            .app
            .games_namespace()
            .subspace(dest_scope.to_string())
            .subspace(self.sourceid.clone());

        let mut copied = 0;
        for entry in self
            .games_ns
            .list::<GameState>()
            .map_err(|err| KansasError::Fatal(err.to_string()))?
        {
            let (gameid, state) = entry.map_err(|err| KansasError::Fatal(err.to_string()))?;
            dest_ns
                .put(gameid, &state)
                .map_err(|err| KansasError::Fatal(err.to_string()))?;
            copied += 1;
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ImageCache, QueryCache};
    use crate::config::ServerConfig;
    use crate::plugins::{Plugin, PluginRegistry, PokerCardsPlugin};
    use crate::search::SearchService;
    use crate::store::Store;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc as StdArc;

    fn test_app(max_games: usize) -> Arc<AppState> {
        let store = Store::open_temporary().unwrap();
        let query_cache = QueryCache::new(store.namespace("QueryCache", 0).unwrap());
        let image_cache = ImageCache::new(
            std::env::temp_dir(),
            "http://localhost:8000/".into(),
            store.namespace("CacheMap", 0).unwrap(),
        );
        let dir = std::env::temp_dir().join(format!("kansas-space-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut plugins: StdHashMap<String, StdArc<dyn Plugin>> = StdHashMap::new();
        plugins.insert("poker".into(), StdArc::new(PokerCardsPlugin::new(dir, "third_party/cards52/".into())));
        let search = SearchService::new(PluginRegistry::new(plugins), query_cache, image_cache.clone());

        let mut config = ServerConfig::default();
        config.max_games_per_scope = max_games;
        let games_ns = store.namespace("Games", 0).unwrap();
        let client_db_ns = store.namespace("ClientDB", 0).unwrap();
        AppState::new(config, store, search, games_ns, client_db_ns, image_cache)
    }

    #[test]
    fn get_or_create_game_is_idempotent() {
        let app = test_app(5);
        let space = SpaceHandler::restore(app, "scope-a".into(), "poker".into());
        let a = space.get_or_create_game("g1");
        let b = space.get_or_create_game("g1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(space.list_games(), vec!["g1".to_string()]);
    }

    #[test]
    fn end_game_removes_it_from_the_registry() {
        let app = test_app(5);
        let space = SpaceHandler::restore(app, "scope-b".into(), "poker".into());
        space.get_or_create_game("g1");
        space.end_game("g1");
        assert!(space.list_games().is_empty());
    }

    #[test]
    fn capacity_eviction_drops_the_oldest_idle_game() {
        let app = test_app(2);
        let space = SpaceHandler::restore(app, "scope-c".into(), "poker".into());
        space.get_or_create_game("g1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        space.get_or_create_game("g2");
        std::thread::sleep(std::time::Duration::from_millis(5));
        space.get_or_create_game("g3");
        let names = space.list_games();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"g1".to_string()));
    }
}
