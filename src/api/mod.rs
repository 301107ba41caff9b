//! HTTP API
//!
//! Exposes bet placement, room/state/history queries and operator actions.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::AppState;
pub use routes::create_router;
pub use server::ApiServer;
