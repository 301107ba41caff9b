//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))

        // Player endpoints
        .route("/api/:game/bet", post(place_bet_handler))
        .route("/api/:game/cancel", post(cancel_order_handler))
        .route("/api/:game/rooms", get(room_info_handler))
        .route("/api/:game/state/:bet_type", get(state_sync_handler))
        .route("/api/:game/history/:bet_type", get(period_history_handler))

        // Operator endpoints
        .route("/api/admin/:game/settle", post(simulate_settle_handler))
        .route("/api/admin/:game/override", post(override_number_handler))
        .route("/api/admin/room-limit", post(room_limit_handler))
        .route("/api/admin/deposit", post(deposit_handler))

        .with_state(state)
}
