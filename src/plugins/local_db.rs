use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::cache::{CardResult, QueryMeta};
use crate::catalog::deck::{sample_deck, DeckLine};
use crate::catalog::{slugify, Catalog};
use crate::error::KansasError;

use super::Plugin;

const LOG_TARGET: &str = "plugins::local_db";
const BACK_URL: &str = "/third_party/images/card_back.jpg";

/// Scans a directory of per-card images at construction, building three
/// maps keyed by a normalized slug: slug -> URL-quoted file path, slug ->
/// display name, slug -> raw filename. Exact lookups hit these maps
/// directly; inexact lookups defer to the richer `Catalog` ranking
/// (§4.4.1) when one was supplied.
pub struct LocalDbPlugin {
    slug_to_path: HashMap<String, String>,
    slug_to_name: HashMap<String, String>,
    slug_to_filename: HashMap<String, String>,
    resource_prefix: String,
    catalog: Option<Arc<Catalog>>,
}

impl LocalDbPlugin {
    pub fn new(dir: PathBuf, resource_prefix: String, catalog: Option<Arc<Catalog>>) -> Self {
        let mut slug_to_path = HashMap::new();
        let mut slug_to_name = HashMap::new();
        let mut slug_to_filename = HashMap::new();

        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries.filter_map(|e| e.ok()) {
                    let Ok(filename) = entry.file_name().into_string() else {
                        continue;
                    };
                    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(&filename);
                    let display_name = stem.replace(['_', '-'], " ");
                    let slug = slugify(&display_name);
                    let quoted = utf8_percent_encode(&filename, NON_ALPHANUMERIC).to_string();
                    slug_to_path.insert(slug.clone(), quoted);
                    slug_to_name.insert(slug.clone(), display_name);
                    slug_to_filename.insert(slug, filename);
                }
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, %err, dir = %dir.display(), "could not scan local card directory");
            }
        }

        tracing::info!(target: LOG_TARGET, count = slug_to_path.len(), "local card db indexed");
        Self {
            slug_to_path,
            slug_to_name,
            slug_to_filename,
            resource_prefix,
            catalog,
        }
    }

    /// The raw, un-quoted filename backing `slug`, as scanned from disk —
    /// used by callers that need the original on-disk name rather than
    /// the URL-quoted path (e.g. a future filesystem-level operation on
    /// the card's image file).
    pub fn raw_filename(&self, slug: &str) -> Option<&str> {
        self.slug_to_filename.get(slug).map(String::as_str)
    }
}

#[async_trait]
impl Plugin for LocalDbPlugin {
    async fn fetch(
        &self,
        term: &str,
        exact: bool,
        limit: Option<usize>,
    ) -> Result<(Vec<CardResult>, QueryMeta), KansasError> {
        let slug = slugify(term);

        if exact {
            return match (self.slug_to_path.get(&slug), self.slug_to_name.get(&slug)) {
                (Some(path), Some(name)) => Ok((
                    vec![CardResult {
                        name: name.clone(),
                        img_url: format!("{}{}", self.resource_prefix, path),
                        info_url: None,
                    }],
                    QueryMeta::default(),
                )),
                _ => Ok((Vec::new(), QueryMeta::default())),
            };
        }

        if let Some(catalog) = &self.catalog {
            let mut ranked = crate::catalog::ranking::rank(catalog, term, limit);
            for hit in &mut ranked {
                if let Some(path) = self.slug_to_path.get(&slugify(&hit.name)) {
                    hit.img_url = format!("{}{}", self.resource_prefix, path);
                }
            }
            return Ok((ranked, QueryMeta::default()));
        }

        let needle = slug;
        let mut results: Vec<CardResult> = self
            .slug_to_name
            .iter()
            .filter(|(s, _)| s.contains(&needle))
            .map(|(s, name)| CardResult {
                name: name.clone(),
                img_url: format!("{}{}", self.resource_prefix, self.slug_to_path[s]),
                info_url: None,
            })
            .collect();
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok((results, QueryMeta::default()))
    }

    fn back_url(&self) -> String {
        BACK_URL.to_string()
    }

    async fn sample_deck(&self, term: &str, num_decks: usize) -> Vec<(String, Vec<DeckLine>)> {
        match &self.catalog {
            Some(catalog) => sample_deck(catalog, term, num_decks),
            None => Vec::new(),
        }
    }
}
