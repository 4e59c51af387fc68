use std::path::PathBuf;

use async_trait::async_trait;

use crate::cache::{CardResult, QueryMeta};
use crate::error::KansasError;

use super::Plugin;

const LOG_TARGET: &str = "plugins::poker";
const BACK_URL: &str = "/third_party/images/Blue_Back.png";

/// A fixed on-disk directory of 52 standard playing-card PNGs, no remote
/// I/O. `fetch` globs the directory and filters filenames by substring
/// (or equality when `exact`).
pub struct PokerCardsPlugin {
    dir: PathBuf,
    resource_prefix: String,
}

impl PokerCardsPlugin {
    pub fn new(dir: PathBuf, resource_prefix: String) -> Self {
        Self { dir, resource_prefix }
    }

    fn list_entries(&self) -> Vec<String> {
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.to_lowercase().ends_with(".png"))
                .collect(),
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, %err, dir = %self.dir.display(), "could not list poker card directory");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Plugin for PokerCardsPlugin {
    async fn fetch(
        &self,
        term: &str,
        exact: bool,
        limit: Option<usize>,
    ) -> Result<(Vec<CardResult>, QueryMeta), KansasError> {
        let needle = term.to_lowercase();
        let mut results: Vec<CardResult> = self
            .list_entries()
            .into_iter()
            .filter(|name| {
                let stem = name.trim_end_matches(".png").to_lowercase();
                if exact {
                    stem == needle
                } else {
                    stem.contains(&needle)
                }
            })
            .map(|name| CardResult {
                name: name.trim_end_matches(".png").to_string(),
                img_url: format!("{}{}", self.resource_prefix, name),
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
}
