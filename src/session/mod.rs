//! The connection/session layer (§4.7, §6): the three-tier handler state
//! machine (`Init` -> `Space` -> `Game`) a WebSocket connection drives
//! through, plus the shared process state every tier reads from.

mod app;
mod connection;
mod game_handler;
mod init;
mod space;
mod stream;
mod wire;

pub use app::AppState;
pub use connection::{handle_socket, ConnectionState};
pub use game_handler::GameHandler;
pub use init::InitHandler;
pub use space::SpaceHandler;
pub use stream::{Presence, StreamHandle};
pub use wire::{InboundFrame, OutboundFrame};
