use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::{CardResult, QueryMeta};
use crate::error::KansasError;

use super::Plugin;

const LOG_TARGET: &str = "plugins::magiccards_info";
const BACK_URL: &str = "/third_party/images/mtg_detail.jpg";

// Grounded directly on `server/plugins.py`'s `MagicCardsInfoPlugin.Fetch`:
// the anchor-plus-image markup the remote site renders for each hit.
static ANCHOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<a href="/([a-z0-9]*)/en/([a-z0-9]*)\.html">(.*?)</a>\s+<img"#).unwrap()
});

// Alternative markup observed on some responses: an `<img alt="...">`
// whose `src` carries the set/number pair directly, with no wrapping
// anchor tag.
static IMG_ALT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img[^>]*src="http://magiccards\.info/scans/en/([a-z0-9]*)/([a-z0-9]*)\.jpg"[^>]*alt="([^"]*)""#).unwrap()
});

const MORE_MARKER: &str = "magiccards.info/extras/more.gif";

/// Scrapes `magiccards.info`'s HTML query endpoint for card hits. The
/// response is matched against two alternative regex patterns depending
/// on which markup variant the marker `MORE_MARKER` indicates is present.
pub struct MagicCardsInfoPlugin {
    http: reqwest::Client,
    base_url: String,
}

impl MagicCardsInfoPlugin {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "http://magiccards.info".to_string(),
        }
    }

    fn query_url(&self, term: &str, exact: bool) -> String {
        let q = if exact {
            format!("!{}", term.split_whitespace().collect::<Vec<_>>().join("+"))
        } else {
            format!("l:en+{}", term.split_whitespace().collect::<Vec<_>>().join("+"))
        };
        format!("{}/query?q={}&v=card&s=cname", self.base_url, q)
    }

    fn parse(&self, body: &str) -> Vec<CardResult> {
        if body.contains(MORE_MARKER) {
            IMG_ALT_PATTERN
                .captures_iter(body)
                .map(|c| CardResult {
                    name: c[3].to_string(),
                    img_url: format!("{}/scans/en/{}/{}.jpg", self.base_url, &c[1], &c[2]),
                    info_url: Some(format!("{}/{}/en/{}.html", self.base_url, &c[1], &c[2])),
                })
                .collect()
        } else {
            ANCHOR_PATTERN
                .captures_iter(body)
                .map(|c| CardResult {
                    name: c[3].to_string(),
                    img_url: format!("{}/scans/en/{}/{}.jpg", self.base_url, &c[1], &c[2]),
                    info_url: Some(format!("{}/{}/en/{}.html", self.base_url, &c[1], &c[2])),
                })
                .collect()
        }
    }
}

impl Default for MagicCardsInfoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for MagicCardsInfoPlugin {
    async fn fetch(
        &self,
        term: &str,
        exact: bool,
        limit: Option<usize>,
    ) -> Result<(Vec<CardResult>, QueryMeta), KansasError> {
        let url = self.query_url(term, exact);
        tracing::info!(target: LOG_TARGET, %url, "GET");

        let body = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| KansasError::upstream(err.to_string()))?
            .text()
            .await
            .map_err(|err| KansasError::upstream(err.to_string()))?;

        let has_more = body.contains(r#"p=2""#);
        let mut cards = self.parse(&body);
        if let Some(limit) = limit {
            cards.truncate(limit);
        }

        Ok((
            cards,
            QueryMeta {
                has_more: Some(has_more),
                more_url: Some(format!("{}/query?q={}", self.base_url, term)),
            },
        ))
    }

    fn back_url(&self) -> String {
        BACK_URL.to_string()
    }
}
