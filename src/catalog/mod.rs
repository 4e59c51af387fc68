//! CSV-loaded index of card metadata, used to rank local search results
//! (§4.4.1) and to synthesize themed decks (§4.4.2). A CSV-driven catalog
//! has no direct counterpart in the teacher, so this follows the
//! specification directly, loaded with the `csv` crate the way the rest
//! of the corpus loads tabular fixtures.

pub mod card;
pub mod deck;
pub mod ranking;

pub use card::{slugify, CatalogCard};

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

const LOG_TARGET: &str = "catalog";

/// An in-memory index over every catalog entry, with the lookup tables
/// ranking and deck synthesis need: by slug, by color, and by free-text
/// token (the "theme pool" deck synthesis samples from).
pub struct Catalog {
    pub cards: Vec<CatalogCard>,
    pub by_slug: HashMap<String, usize>,
    pub by_token: HashMap<String, Vec<usize>>,
    pub by_color: HashMap<char, Vec<usize>>,
    pub by_colorless: Vec<usize>,
}

#[derive(Deserialize)]
struct CsvRow {
    name: String,
    cost: i64,
    colors: String,
    is_land: bool,
    good_quality: bool,
    searchtype: String,
    tokens: String,
    searchtext: String,
    img_url: String,
}

impl Catalog {
    /// Loads a catalog from a CSV file with columns
    /// `name,cost,colors,is_land,good_quality,searchtype,tokens,searchtext,img_url`
    /// where `colors` and `tokens` are `|`-separated lists.
    pub fn load_csv(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut cards = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row?;
            let colors = row.colors.chars().filter(|c| !c.is_whitespace() && *c != '|').collect();
            let tokens = row
                .tokens
                .split('|')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            cards.push(CatalogCard {
                slug: slugify(&row.name),
                name: row.name,
                cost: row.cost,
                colors,
                is_land: row.is_land,
                good_quality: row.good_quality,
                searchtype: row.searchtype.to_lowercase(),
                tokens,
                searchtext: row.searchtext.to_lowercase(),
                img_url: row.img_url,
            });
        }
        tracing::info!(target: LOG_TARGET, count = cards.len(), "loaded catalog");
        Ok(Self::from_cards(cards))
    }

    pub fn from_cards(cards: Vec<CatalogCard>) -> Self {
        let mut by_slug = HashMap::new();
        let mut by_token: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_color: HashMap<char, Vec<usize>> = HashMap::new();
        let mut by_colorless = Vec::new();

        for (i, card) in cards.iter().enumerate() {
            by_slug.insert(card.slug.clone(), i);
            for token in &card.tokens {
                by_token.entry(token.clone()).or_default().push(i);
            }
            if card.is_colorless() {
                by_colorless.push(i);
            }
            for &c in &card.colors {
                by_color.entry(c).or_default().push(i);
            }
        }

        Self {
            cards,
            by_slug,
            by_token,
            by_color,
            by_colorless,
        }
    }

    pub fn get(&self, idx: usize) -> &CatalogCard {
        &self.cards[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_catalog() -> Catalog {
        let cards = vec![
            CatalogCard {
                name: "Lightning Bolt".into(),
                slug: slugify("Lightning Bolt"),
                cost: 1,
                colors: ['r'].into_iter().collect(),
                is_land: false,
                good_quality: true,
                searchtype: "instant".into(),
                tokens: vec!["burn".into(), "aggro".into()],
                searchtext: "lightning bolt deals 3 damage to any target".into(),
                img_url: "http://example.com/bolt.jpg".into(),
            },
            CatalogCard {
                name: "Mountain".into(),
                slug: slugify("Mountain"),
                cost: 0,
                colors: Default::default(),
                is_land: true,
                good_quality: true,
                searchtype: "basic land".into(),
                tokens: vec![],
                searchtext: "mountain basic land".into(),
                img_url: "http://example.com/mountain.jpg".into(),
            },
            CatalogCard {
                name: "Counterspell".into(),
                slug: slugify("Counterspell"),
                cost: 2,
                colors: ['u'].into_iter().collect(),
                is_land: false,
                good_quality: true,
                searchtype: "instant".into(),
                tokens: vec!["control".into()],
                searchtext: "counter target spell".into(),
                img_url: "http://example.com/counterspell.jpg".into(),
            },
        ];
        Catalog::from_cards(cards)
    }

    #[test]
    fn indexes_by_slug_token_and_color() {
        let catalog = sample_catalog();
        assert_eq!(catalog.by_slug.get("lightning bolt"), Some(&0));
        assert_eq!(catalog.by_token.get("burn"), Some(&vec![0]));
        assert_eq!(catalog.by_color.get(&'r'), Some(&vec![0]));
        assert_eq!(catalog.by_colorless, vec![1]);
    }
}
