//! The card-lookup pipeline (§4.3): query cache → plugin → image cache →
//! rewrite. `SearchService` is the single entry point the session layer
//! calls for `query`/`bulkquery`/`add_card` resolution and for deck
//! synthesis.

use crate::cache::{CardResult, ImageCache, QueryCache, QueryMeta};
use crate::catalog::deck::DeckLine;
use crate::error::KansasError;
use crate::plugins::PluginRegistry;

const LOG_TARGET: &str = "search";

#[derive(Clone)]
pub struct SearchService {
    plugins: PluginRegistry,
    query_cache: QueryCache,
    image_cache: ImageCache,
}

impl SearchService {
    pub fn new(plugins: PluginRegistry, query_cache: QueryCache, image_cache: ImageCache) -> Self {
        Self {
            plugins,
            query_cache,
            image_cache,
        }
    }

    /// `find(source, term, exact, limit)`: memoized lookup that falls
    /// through to the named plugin on a cache miss, rewriting each hit's
    /// `img_url` through the image cache before returning.
    pub async fn find(
        &self,
        source: &str,
        term: &str,
        exact: bool,
        limit: Option<usize>,
    ) -> Result<(Vec<CardResult>, QueryMeta), KansasError> {
        if let Some(hit) = self
            .query_cache
            .get(source, term, exact, limit)
            .map_err(|err| KansasError::Fatal(err.to_string()))?
        {
            tracing::debug!(target: LOG_TARGET, source, term, "query cache hit");
            return Ok(self.rewrite(hit));
        }

        let plugin = self
            .plugins
            .get(source)
            .ok_or_else(|| KansasError::SourceNotFound(source.to_string()))?;

        // Upstream failures are deliberately not cached, so the next call
        // retries rather than permanently remembering a transient error.
        let (cards, meta) = plugin.fetch(term, exact, limit).await?;

        self.query_cache
            .put(source, term, exact, limit, &cards, &meta)
            .map_err(|err| KansasError::Fatal(err.to_string()))?;

        Ok(self.rewrite((cards, meta)))
    }

    fn rewrite(&self, (mut cards, meta): (Vec<CardResult>, QueryMeta)) -> (Vec<CardResult>, QueryMeta) {
        for card in &mut cards {
            card.img_url = self.image_cache.cached_if_present(&card.img_url);
        }
        (cards, meta)
    }

    pub fn all_sources(&self) -> Vec<String> {
        self.plugins.all_sources()
    }

    pub fn is_valid(&self, source: &str) -> bool {
        self.plugins.is_valid(source)
    }

    pub fn back_url(&self, source: &str) -> Result<String, KansasError> {
        self.plugins
            .get(source)
            .map(|p| p.back_url())
            .ok_or_else(|| KansasError::SourceNotFound(source.to_string()))
    }

    pub async fn sample(&self, source: &str) -> Result<Option<CardResult>, KansasError> {
        let plugin = self
            .plugins
            .get(source)
            .ok_or_else(|| KansasError::SourceNotFound(source.to_string()))?;
        Ok(plugin.sample().await)
    }

    pub async fn sample_deck(
        &self,
        source: &str,
        term: &str,
        num_decks: usize,
    ) -> Result<Vec<(String, Vec<DeckLine>)>, KansasError> {
        let plugin = self
            .plugins
            .get(source)
            .ok_or_else(|| KansasError::SourceNotFound(source.to_string()))?;
        Ok(plugin.sample_deck(term, num_decks).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PokerCardsPlugin;
    use crate::store::Store;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn service_with_poker_dir(dir: std::path::PathBuf) -> SearchService {
        let store = Store::open_temporary().unwrap();
        let query_cache = QueryCache::new(store.namespace("QueryCache", 0).unwrap());
        let image_cache = ImageCache::new(
            std::env::temp_dir(),
            "http://localhost:8000/".into(),
            store.namespace("CacheMap", 0).unwrap(),
        );
        let mut plugins: HashMap<String, Arc<dyn crate::plugins::Plugin>> = HashMap::new();
        plugins.insert(
            "poker".into(),
            Arc::new(PokerCardsPlugin::new(dir, "third_party/cards52/".into())),
        );
        SearchService::new(PluginRegistry::new(plugins), query_cache, image_cache)
    }

    #[tokio::test]
    async fn unknown_source_fails_with_source_not_found() {
        let dir = std::env::temp_dir().join(format!("kansas-search-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let service = service_with_poker_dir(dir.clone());
        let err = service.find("nonexistent", "ace", true, None).await.unwrap_err();
        assert!(matches!(err, KansasError::SourceNotFound(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_call_for_same_key_is_served_from_cache() {
        let dir = std::env::temp_dir().join(format!("kansas-search-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("AS.png"), b"x").unwrap();
        let service = service_with_poker_dir(dir.clone());

        let (first, _) = service.find("poker", "as", true, None).await.unwrap();
        let (second, _) = service.find("poker", "as", true, None).await.unwrap();
        assert_eq!(first, second);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
