pub mod bootstrap;
pub mod logging;
mod routes;

pub use bootstrap::run_server;
pub use routes::build_router;
