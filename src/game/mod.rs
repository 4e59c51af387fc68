//! The game state engine: per-table board/hands/stacks/orientations and
//! the asset resolver that backs new cards. See §3 and §4.5-4.6 of the
//! specification.

pub mod asset;
pub mod state;
pub mod types;

pub use asset::AssetCache;
pub use state::GameState;
pub use types::{
    coerce_board_key, valid_orientation, AddCardRequest, CardId, Location, MoveRequest, NewCardRecord,
    StackOpType, MAX_ORIENTATION, MIN_ORIENTATION,
};
