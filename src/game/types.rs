use serde::{Deserialize, Serialize};

pub type CardId = u64;

/// Either a numbered board position or a user's hand. Board keys carry no
/// numeric meaning beyond identity; hand keys are user-chosen strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    Board(i64),
    Hands(String),
}

impl Location {
    pub fn type_name(&self) -> &'static str {
        match self {
            Location::Board(_) => "board",
            Location::Hands(_) => "hands",
        }
    }
}

/// Destination of a move, as it arrives over the wire: a type tag plus a
/// key whose shape (integer vs string) depends on the tag.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MoveRequest {
    pub card: CardId,
    pub dest_type: String,
    pub dest_key: serde_json::Value,
    pub dest_orient: i8,
}

/// Orientation is clamped to `[-4, 4]`; sign is face up/down, magnitude is
/// rotation quadrant.
pub const MIN_ORIENTATION: i8 = -4;
pub const MAX_ORIENTATION: i8 = 4;

pub fn valid_orientation(o: i8) -> bool {
    (MIN_ORIENTATION..=MAX_ORIENTATION).contains(&o)
}

/// Coerces a wire-supplied board `dest_key` to an integer, accepting both
/// a JSON number and a numeric string (`"100"` -> `100`). Every reader of
/// a board key (`move_card`, `stackop`, the `bulkmove` z_stack lookup)
/// must agree on this coercion or a string-keyed move lands in one board
/// location while its z_stack is read from another.
pub fn coerce_board_key(dest_key: &serde_json::Value) -> Option<i64> {
    dest_key.as_i64().or_else(|| dest_key.as_str().and_then(|s| s.parse::<i64>().ok()))
}

/// One card newly minted by `add_card`, as reported in `bulk_add` deltas.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewCardRecord {
    pub id: CardId,
    pub loc: i64,
    pub url: String,
    pub url_small: String,
    pub orientation: i8,
}

/// One request entry for `add`: a board location plus a card name to
/// resolve through the search pipeline.
#[derive(Clone, Debug, Deserialize)]
pub struct AddCardRequest {
    pub loc: i64,
    pub name: String,
}

/// A named stack operation, applied in place to every card at a Location.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StackOpType {
    Reverse,
    Shuffle,
}
