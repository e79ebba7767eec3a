//! DocSign API - HTTP surface over the package workflow engine

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use state::AppState;

/// Build the application router without middleware
pub fn router(state: Arc<AppState>) -> Router {
    // Directory, billing and initiator endpoints sit behind the API key
    let operator = Router::new()
        .route("/api/contacts", post(handlers::upsert_contact))
        .route("/api/credits", post(handlers::grant_credits))
        .route("/api/credits/:initiator", get(handlers::get_credits))
        .route("/api/packages", post(handlers::create_package))
        .route("/api/packages/:id", get(handlers::get_package))
        .route("/api/packages/:id/document", get(handlers::get_document))
        .route("/api/packages/:id/send", post(handlers::send_package))
        .route("/api/packages/:id/revoke", post(handlers::revoke_package))
        .route("/api/packages/:id/audit", get(handlers::get_audit))
        // Scheduler hook
        .route("/api/reminders/run", post(handlers::run_reminders))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    // Participant endpoints; the handle in the path is the credential
    let participant = Router::new()
        .route(
            "/api/packages/:id/participants/:pa",
            get(handlers::participant_view),
        )
        .route(
            "/api/packages/:id/participants/:pa/fields",
            post(handlers::submit_fields),
        )
        .route(
            "/api/packages/:id/participants/:pa/otp",
            post(handlers::issue_otp),
        )
        .route(
            "/api/packages/:id/participants/:pa/otp/verify",
            post(handlers::verify_otp),
        )
        .route(
            "/api/packages/:id/participants/:pa/reject",
            post(handlers::reject_package),
        )
        .route(
            "/api/packages/:id/participants/:pa/reassign",
            post(handlers::reassign),
        )
        .route(
            "/api/packages/:id/participants/:pa/receivers",
            post(handlers::add_receiver),
        );

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        .merge(operator)
        .merge(participant)
        .with_state(state)
}
