//! Local-catalog search ranking (§4.4.1): tokenize the query, pull out an
//! optional mana-cost predicate, expand color/arity words into synthetic
//! `mana=<word>` tokens, then score every catalog entry against the
//! (possibly expanded) token set.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::CardResult;

use super::Catalog;

static COST_PREDICATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(mana|cost|cmc)\s*(>=|<=|==|>|<|=)?\s*(\d+)").unwrap());

const COLOR_WORDS: [&str; 5] = ["red", "blue", "black", "white", "green"];
const ARITY_WORDS: [&str; 16] = [
    "mono", "dual", "tri", "quad", "five", "all", "multi", "colored", "colorless", "rainbow",
    "two", "three", "four", "single", "one", "mono-colored",
];

#[derive(Clone, Copy, Debug)]
enum Cmp {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Cmp {
    fn parse(op: Option<&str>) -> Cmp {
        match op {
            Some(">") => Cmp::Gt,
            Some("<") => Cmp::Lt,
            Some(">=") => Cmp::Ge,
            Some("<=") => Cmp::Le,
            _ => Cmp::Eq,
        }
    }

    fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Cmp::Eq => lhs == rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Ge => lhs >= rhs,
        }
    }
}

/// Tokenizes on shell-quoting rules (a double- or single-quoted run is one
/// token), falling back to plain whitespace splitting if a quote is left
/// unterminated.
fn shellwords_split(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut any_char = false;

    for ch in input.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
            }
            Some(_) => current.push(ch),
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                    any_char = true;
                } else if ch.is_whitespace() {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(ch);
                    any_char = true;
                }
            }
        }
    }

    if quote.is_some() {
        // Unterminated quote: fall back to plain whitespace splitting.
        return input.split_whitespace().map(str::to_string).collect();
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    if !any_char {
        return Vec::new();
    }
    tokens
}

fn extract_cost_predicates(needle: &str) -> (String, Vec<(Cmp, i64)>) {
    let mut predicates = Vec::new();
    let remaining = COST_PREDICATE.replace_all(needle, |caps: &regex::Captures| {
        let op = Cmp::parse(caps.get(2).map(|m| m.as_str()));
        if let Ok(n) = caps[3].parse::<i64>() {
            predicates.push((op, n));
        }
        String::new()
    });
    (remaining.trim().to_string(), predicates)
}

fn expand_tokens(tokens: &[String]) -> Vec<String> {
    let mut expanded = Vec::new();
    let mut color_count = 0;
    for t in tokens {
        if COLOR_WORDS.contains(&t.as_str()) {
            expanded.push(format!("mana={t}"));
            color_count += 1;
        } else if ARITY_WORDS.contains(&t.as_str()) {
            expanded.push(format!("mana={t}"));
        }
    }
    match color_count {
        1 => expanded.push("mana=mono".to_string()),
        2 => expanded.push("mana=dual".to_string()),
        _ => {}
    }
    expanded
}

fn score_token(card: &super::CatalogCard, token: &str, missing: &mut u32) -> f64 {
    let mut score = 0.0;
    if card.slug.contains(token) || card.searchtype.contains(token) {
        score += 1.0;
    }
    if card.tokens.iter().any(|t| t == token) {
        score += 1.0;
    }
    if card.searchtext.contains(token) {
        score += if token.contains(' ') {
            token.split_whitespace().count() as f64
        } else {
            1.0
        };
    } else {
        *missing += 1;
    }
    score
}

/// Ranks every entry of `catalog` against `needle`, returning up to
/// `limit` hits in descending-score order (ties preserve catalog order).
pub fn rank(catalog: &Catalog, needle: &str, limit: Option<usize>) -> Vec<CardResult> {
    let needle = needle.trim().to_lowercase();
    let (stripped, predicates) = extract_cost_predicates(&needle);
    let mut tokens = shellwords_split(&stripped);
    if tokens.is_empty() && !stripped.is_empty() {
        tokens = stripped.split_whitespace().map(str::to_string).collect();
    }
    let expanded = expand_tokens(&tokens);

    let mut scored: Vec<(f64, usize)> = Vec::new();
    for (i, card) in catalog.cards.iter().enumerate() {
        if predicates.iter().any(|(cmp, n)| !cmp.eval(card.cost, *n)) {
            continue;
        }

        let mut score = 0.0;
        if needle == card.slug {
            score += 20.0;
        }
        if card.good_quality {
            score += 0.5;
        }

        let mut missing = 0u32;
        for t in tokens.iter().chain(expanded.iter()) {
            score += score_token(card, t, &mut missing);
        }
        score -= 3.0 * missing as f64;

        if score >= 1.0 {
            scored.push((score, i));
        }
    }

    scored.sort_by(|a, b| {
        let bucket_a = a.0.floor() as i64;
        let bucket_b = b.0.floor() as i64;
        bucket_b.cmp(&bucket_a).then(a.1.cmp(&b.1))
    });

    let limit = limit.unwrap_or(usize::MAX);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, i)| {
            let card = &catalog.cards[i];
            CardResult {
                name: card.name.clone(),
                img_url: card.img_url.clone(),
                info_url: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;

    #[test]
    fn shellwords_splits_quoted_phrases_as_one_token() {
        assert_eq!(
            shellwords_split(r#"counter "target spell""#),
            vec!["counter".to_string(), "target spell".to_string()]
        );
    }

    #[test]
    fn shellwords_falls_back_to_whitespace_on_unterminated_quote() {
        assert_eq!(
            shellwords_split(r#"counter "target spell"#),
            vec!["counter".to_string(), "\"target".to_string(), "spell".to_string()]
        );
    }

    #[test]
    fn exact_slug_match_ranks_highest() {
        let catalog = sample_catalog();
        let results = rank(&catalog, "lightning bolt", None);
        assert_eq!(results[0].name, "Lightning Bolt");
    }

    #[test]
    fn cost_predicate_filters_out_non_matching_cost() {
        let catalog = sample_catalog();
        let results = rank(&catalog, "mana>=2 spell", None);
        assert!(results.iter().all(|r| r.name != "Lightning Bolt"));
    }

    #[test]
    fn token_match_in_searchtext_beats_no_match() {
        let catalog = sample_catalog();
        let results = rank(&catalog, "damage", None);
        assert_eq!(results.first().map(|r| r.name.as_str()), Some("Lightning Bolt"));
    }

    #[test]
    fn limit_truncates_results() {
        let catalog = sample_catalog();
        let results = rank(&catalog, "instant", Some(1));
        assert_eq!(results.len(), 1);
    }
}
