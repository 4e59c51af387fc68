use std::collections::HashSet;

/// A single catalog entry loaded from the card-metadata CSV, used both to
/// rank local search results (§4.4.1) and to feed deck synthesis (§4.4.2).
#[derive(Clone, Debug)]
pub struct CatalogCard {
    pub name: String,
    pub slug: String,
    pub cost: i64,
    pub colors: HashSet<char>,
    pub is_land: bool,
    pub good_quality: bool,
    pub searchtype: String,
    pub tokens: Vec<String>,
    pub searchtext: String,
    pub img_url: String,
}

impl CatalogCard {
    pub fn color_count(&self) -> usize {
        self.colors.len()
    }

    pub fn is_colorless(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Five standard Magic: the Gathering color letters plus deck-synthesis
/// helpers operate on exactly these.
pub const COLOR_LETTERS: [char; 5] = ['w', 'u', 'b', 'r', 'g'];

pub fn slugify(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_folds_case_and_punctuation() {
        assert_eq!(slugify("Lightning Bolt!"), "lightning bolt");
        assert_eq!(slugify("  Ætherize  "), "therize");
    }
}
