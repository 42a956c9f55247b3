//! Collaborator HTTP API for the Genforge generator economy.
//!
//! Presentation collaborators (labels, menus, dashboards) read generator,
//! network, and economy snapshots over REST and submit player actions as
//! mutations. The acting player is named by the `x-player-id` header.
//!
//! # Architecture
//!
//! Reads are served from the engines' concurrent maps and never wait on
//! the store. Mutations are queued on the foreground loop, so they run one
//! at a time in arrival order alongside store callbacks.
//!
//! # Modules
//!
//! - [`router`] -- Route table with CORS and request tracing
//! - [`handlers`] -- Endpoint handlers and request/response bodies
//! - [`state`] -- [`AppState`] shared by every handler
//! - [`server`] -- TCP bind and graceful shutdown
//! - [`error`] -- [`ApiError`] and its JSON response mapping
//!
//! [`AppState`]: state::AppState
//! [`ApiError`]: error::ApiError

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::AppState;
