//! Pluggable card sources (§4.4). Every plugin implements the capability
//! set `{fetch, back_url, sample, sample_deck, complete}`; the latter
//! three default to no-ops on the trait so a minimal plugin need only
//! implement `fetch`/`back_url`. Registered once at startup into a
//! string-keyed registry of trait objects, the same "dynamic dispatch via
//! an `Arc<dyn Trait + Send + Sync>` factory" shape the teacher uses for
//! `LobbyService`/`EventStore`/`SnapshotStore`.

mod local_db;
mod magiccards_info;
mod poker;

pub use local_db::LocalDbPlugin;
pub use magiccards_info::MagicCardsInfoPlugin;
pub use poker::PokerCardsPlugin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{CardResult, QueryMeta};
use crate::catalog::deck::DeckLine;
use crate::error::KansasError;

const LOG_TARGET: &str = "plugins";

#[async_trait]
pub trait Plugin: Send + Sync {
    async fn fetch(
        &self,
        term: &str,
        exact: bool,
        limit: Option<usize>,
    ) -> Result<(Vec<CardResult>, QueryMeta), KansasError>;

    fn back_url(&self) -> String;

    async fn sample(&self) -> Option<CardResult> {
        None
    }

    async fn sample_deck(&self, _term: &str, _num_decks: usize) -> Vec<(String, Vec<DeckLine>)> {
        Vec::new()
    }

    fn complete(&self, _prefix: &str) -> Vec<String> {
        Vec::new()
    }
}

/// A string-keyed registry of plugin instances, built once at startup.
#[derive(Clone)]
pub struct PluginRegistry {
    plugins: Arc<HashMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new(plugins: HashMap<String, Arc<dyn Plugin>>) -> Self {
        tracing::info!(target: LOG_TARGET, sources = ?plugins.keys().collect::<Vec<_>>(), "plugin registry ready");
        Self {
            plugins: Arc::new(plugins),
        }
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(source).cloned()
    }

    pub fn is_valid(&self, source: &str) -> bool {
        self.plugins.contains_key(source)
    }

    pub fn all_sources(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }
}
