//! The per-table data model: board, hands, stacks, orientations, and the
//! asset maps that describe each card's artwork. Grounded on §3/§4.6 of the
//! specification; the shape mirrors the teacher's plain reducible records
//! (`ledger::state::GameState`) but the reduction here is direct mutation
//! under a lock rather than transcript replay, since there is no separate
//! append-only event log for table moves.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::KansasError;

use super::types::{coerce_board_key, valid_orientation, CardId, Location, StackOpType};

const LOG_TARGET: &str = "game::state";

/// The full persisted state of one table. `index` is derived and is
/// rebuilt by `rebuild_index` immediately after deserialization; it is
/// never itself persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameState {
    pub deck_name: String,
    pub resource_prefix: String,
    pub default_back_url: String,

    pub board: HashMap<i64, Vec<CardId>>,
    pub hands: HashMap<String, Vec<CardId>>,

    pub orientations: HashMap<CardId, i8>,
    pub urls: HashMap<CardId, String>,
    pub urls_small: HashMap<CardId, String>,
    pub back_urls: HashMap<CardId, String>,
    pub titles: HashMap<CardId, String>,

    pub highest_id: CardId,
    pub sourceid: String,
    pub seqno: u64,

    #[serde(skip)]
    pub index: HashMap<CardId, Location>,
}

impl GameState {
    pub fn new(deck_name: String, resource_prefix: String, default_back_url: String, sourceid: String) -> Self {
        Self {
            deck_name,
            resource_prefix,
            default_back_url,
            board: HashMap::new(),
            hands: HashMap::new(),
            orientations: HashMap::new(),
            urls: HashMap::new(),
            urls_small: HashMap::new(),
            back_urls: HashMap::new(),
            titles: HashMap::new(),
            highest_id: 0,
            sourceid,
            seqno: 1000,
            index: HashMap::new(),
        }
    }

    /// Rebuilds `index` as the inverse of `board ∪ hands`. Must be called
    /// once after restoring a snapshot from persistence, since `index` is
    /// never itself serialized.
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for (&key, stack) in &self.board {
            for &card in stack {
                self.index.insert(card, Location::Board(key));
            }
        }
        for (user, stack) in &self.hands {
            for &card in stack {
                self.index.insert(card, Location::Hands(user.clone()));
            }
        }
    }

    fn stack_mut(&mut self, loc: &Location) -> Option<&mut Vec<CardId>> {
        match loc {
            Location::Board(key) => self.board.get_mut(key),
            Location::Hands(user) => self.hands.get_mut(user),
        }
    }

    fn stack(&self, loc: &Location) -> Option<&Vec<CardId>> {
        match loc {
            Location::Board(key) => self.board.get(key),
            Location::Hands(user) => self.hands.get(user),
        }
    }

    fn remove_location(&mut self, loc: &Location) {
        match loc {
            Location::Board(key) => {
                self.board.remove(key);
            }
            Location::Hands(user) => {
                self.hands.remove(user);
            }
        }
    }

    fn push(&mut self, loc: &Location, card: CardId) {
        let stack = match loc {
            Location::Board(key) => self.board.entry(*key).or_default(),
            Location::Hands(user) => self.hands.entry(user.clone()).or_default(),
        };
        stack.push(card);
    }

    /// Removes `card` from whatever stack it currently occupies, deleting
    /// the Location entirely if that was its last card. No-op if the card
    /// is not placed anywhere.
    fn remove_from_current(&mut self, card: CardId) {
        if let Some(loc) = self.index.get(&card).cloned() {
            if let Some(stack) = self.stack_mut(&loc) {
                stack.retain(|&c| c != card);
                if stack.is_empty() {
                    self.remove_location(&loc);
                }
            }
        }
    }

    /// Moves `card` to `(dest_type, dest_key)` at `dest_orient`, returning
    /// the card's previous location. A move to the same Location with an
    /// unchanged orientation is a pure z-bump: the stack order is left
    /// untouched even though, for a single card, "untouched" and
    /// "re-appended" are observationally identical except when other
    /// cards share the stack.
    pub fn move_card(
        &mut self,
        card: CardId,
        dest_type: &str,
        dest_key: &serde_json::Value,
        dest_orient: i8,
    ) -> Result<Location, KansasError> {
        if !valid_orientation(dest_orient) {
            return Err(KansasError::state(format!(
                "orientation {dest_orient} out of range [-4,4]"
            )));
        }
        let dest = match dest_type {
            "board" => {
                let key = coerce_board_key(dest_key)
                    .ok_or_else(|| KansasError::state("board dest_key must be an integer"))?;
                Location::Board(key)
            }
            "hands" => {
                let user = dest_key
                    .as_str()
                    .ok_or_else(|| KansasError::state("hands dest_key must be a string"))?
                    .to_string();
                Location::Hands(user)
            }
            other => return Err(KansasError::state(format!("unknown dest_type {other}"))),
        };

        let src = self
            .index
            .get(&card)
            .cloned()
            .ok_or_else(|| KansasError::state(format!("unknown card {card}")))?;

        let same_orientation = self.orientations.get(&card).copied() == Some(dest_orient);
        if src == dest && same_orientation {
            tracing::debug!(target: LOG_TARGET, card, "z-bump, stack order unchanged");
            self.orientations.insert(card, dest_orient);
            return Ok(src);
        }

        self.remove_from_current(card);
        self.push(&dest, card);
        self.index.insert(card, dest.clone());
        self.orientations.insert(card, dest_orient);

        Ok(src)
    }

    /// Removes a card entirely: from its stack (deleting the Location if
    /// it was the last card) and from `index`. Leaves attribute maps in
    /// place until the next `gc`.
    pub fn remove_card(&mut self, card: CardId) -> Result<(), KansasError> {
        if !self.index.contains_key(&card) {
            return Err(KansasError::state(format!("unknown card {card}")));
        }
        self.remove_from_current(card);
        self.index.remove(&card);
        Ok(())
    }

    /// Drops any id from the attribute maps that no longer appears in
    /// `index`, restoring the invariant that every non-placed card has no
    /// lingering attributes.
    pub fn gc(&mut self) {
        let live: std::collections::HashSet<CardId> = self.index.keys().copied().collect();
        self.orientations.retain(|id, _| live.contains(id));
        self.urls.retain(|id, _| live.contains(id));
        self.urls_small.retain(|id, _| live.contains(id));
        self.back_urls.retain(|id, _| live.contains(id));
        self.titles.retain(|id, _| live.contains(id));
    }

    /// If `shuffle`, applies a uniform permutation to every board stack;
    /// fills in a default orientation for any card missing one; then
    /// garbage-collects stale attributes.
    pub fn initialize_stacks(&mut self, shuffle: bool) {
        if shuffle {
            let mut rng = rand::thread_rng();
            for stack in self.board.values_mut() {
                stack.shuffle(&mut rng);
            }
        }
        let cards: Vec<CardId> = self.index.keys().copied().collect();
        for card in cards {
            self.orientations.entry(card).or_insert(-1);
        }
        self.gc();
    }

    /// Applies a named stack operation to every card at `loc`, returning
    /// the post-state stack for the caller to include in a `stackupdate`.
    pub fn stackop(&mut self, loc: &Location, op: StackOpType) -> Result<Vec<CardId>, KansasError> {
        let stack = self
            .stack(loc)
            .cloned()
            .ok_or_else(|| KansasError::state("stackop on an empty location"))?;

        match op {
            StackOpType::Reverse => {
                for &card in &stack {
                    if let Some(o) = self.orientations.get_mut(&card) {
                        *o = -*o;
                    }
                }
                if let Some(s) = self.stack_mut(loc) {
                    s.reverse();
                }
            }
            StackOpType::Shuffle => {
                let top_orientation = stack.last().and_then(|c| self.orientations.get(c)).copied().unwrap_or(-1);
                for &card in &stack {
                    self.orientations.insert(card, top_orientation);
                }
                if let Some(s) = self.stack_mut(loc) {
                    let mut rng = rand::thread_rng();
                    s.shuffle(&mut rng);
                }
            }
        }

        Ok(self.stack(loc).cloned().unwrap_or_default())
    }

    /// Mints a new card with the supplied asset urls, placing it at
    /// `board[loc]` and initializing its orientation to -1 (matching
    /// `AssetCache::new_card`). Returns the new id.
    pub fn place_new_card(&mut self, loc: i64, url: String, url_small: String) -> CardId {
        self.highest_id += 1;
        let id = self.highest_id;
        self.urls.insert(id, url);
        self.urls_small.insert(id, url_small);
        self.orientations.insert(id, -1);
        self.board.entry(loc).or_default().push(id);
        self.index.insert(id, Location::Board(loc));
        id
    }

    pub fn bump_seqno(&mut self) -> u64 {
        self.seqno += 1;
        self.seqno
    }
}
