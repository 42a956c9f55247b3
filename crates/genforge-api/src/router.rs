//! Axum router construction for the collaborator API.
//!
//! Assembles every route into a single [`Router`] with CORS and request
//! tracing enabled.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete API router.
///
/// See [`handlers`] for the endpoint table. CORS allows any origin so
/// presentation collaborators on other hosts can read snapshots.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status
        .route("/api/status", get(handlers::get_status))
        .route("/api/economy", get(handlers::get_economy))
        // Generators
        .route(
            "/api/generators",
            get(handlers::list_generators)
                .post(handlers::place_generator)
                .delete(handlers::pickup_generator),
        )
        .route("/api/generators/{id}", get(handlers::get_generator))
        .route("/api/generators/collect", post(handlers::collect))
        .route("/api/generators/collect-all", post(handlers::collect_all))
        .route("/api/generators/upgrade", post(handlers::upgrade_generator))
        .route("/api/generators/evolve", post(handlers::evolve_generator))
        .route("/api/generators/leave", post(handlers::leave_network))
        // Networks
        .route(
            "/api/networks",
            get(handlers::list_networks).post(handlers::create_network),
        )
        .route(
            "/api/networks/{id}",
            get(handlers::get_network)
                .patch(handlers::rename_network)
                .delete(handlers::dismantle_network),
        )
        .route("/api/networks/{id}/generators", post(handlers::join_network))
        .route("/api/networks/{id}/upgrade", post(handlers::upgrade_network))
        .route("/api/networks/{id}/members", put(handlers::set_member))
        .route(
            "/api/networks/{id}/members/{player}",
            delete(handlers::remove_member),
        )
        .route("/api/networks/{id}/transfer", post(handlers::transfer_network))
        // Players
        .route("/api/players/{id}/stats", get(handlers::get_player_stats))
        .route(
            "/api/players/notifications",
            post(handlers::toggle_notifications),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
