use serde::{Deserialize, Serialize};

use crate::store::Namespace;

/// A single card hit returned by a plugin fetch or catalog search.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CardResult {
    pub name: String,
    pub img_url: String,
    pub info_url: Option<String>,
}

/// Metadata accompanying a `find` result, e.g. pagination hints from a
/// scraped remote source.
///
/// `has_more`/`more_url` are serialized unconditionally (no
/// `skip_serializing_if`): this type round-trips through `bincode` via
/// `Namespace`, whose non-self-describing format needs every `Option` tag
/// present on the wire, not just the JSON-facing ones.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryMeta {
    pub has_more: Option<bool>,
    pub more_url: Option<String>,
}

/// Memoizes `(source, term, exact, limit) -> (cards, meta)` lookups.
/// Failures are deliberately never cached here: callers only call `put`
/// with a successful result.
#[derive(Clone)]
pub struct QueryCache {
    namespace: Namespace,
}

impl QueryCache {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    fn cache_key(source: &str, term: &str, exact: bool, limit: Option<usize>) -> String {
        format!("{source}\u{1}{term}\u{1}{exact}\u{1}{}", limit.map_or_else(|| "none".to_string(), |l| l.to_string()))
    }

    pub fn get(
        &self,
        source: &str,
        term: &str,
        exact: bool,
        limit: Option<usize>,
    ) -> anyhow::Result<Option<(Vec<CardResult>, QueryMeta)>> {
        self.namespace.get(Self::cache_key(source, term, exact, limit))
    }

    pub fn put(
        &self,
        source: &str,
        term: &str,
        exact: bool,
        limit: Option<usize>,
        cards: &[CardResult],
        meta: &QueryMeta,
    ) -> anyhow::Result<()> {
        self.namespace.put(
            Self::cache_key(source, term, exact, limit),
            &(cards.to_vec(), meta.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn hit_after_put() {
        let store = Store::open_temporary().unwrap();
        let cache = QueryCache::new(store.namespace("QueryCache", 0).unwrap());
        let cards = vec![CardResult {
            name: "Black Lotus".to_string(),
            img_url: "http://example.com/lotus.jpg".to_string(),
            info_url: None,
        }];
        let meta = QueryMeta::default();
        cache
            .put("magiccards.info", "black lotus", true, None, &cards, &meta)
            .unwrap();

        let hit = cache
            .get("magiccards.info", "black lotus", true, None)
            .unwrap();
        assert_eq!(hit, Some((cards, meta)));
    }

    #[test]
    fn distinguishes_exact_flag() {
        let store = Store::open_temporary().unwrap();
        let cache = QueryCache::new(store.namespace("QueryCache", 0).unwrap());
        let cards = vec![CardResult {
            name: "Forest".to_string(),
            img_url: "http://example.com/forest.jpg".to_string(),
            info_url: None,
        }];
        cache
            .put("local", "forest", true, None, &cards, &QueryMeta::default())
            .unwrap();
        assert_eq!(cache.get("local", "forest", false, None).unwrap(), None);
    }
}
