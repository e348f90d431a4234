// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{attempt, leaderboard},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (attempts, leaderboard, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (engine and config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let attempt_routes = Router::new()
        .route("/", post(attempt::start_attempt).get(attempt::list_attempts))
        .route("/{id}", get(attempt::get_attempt))
        .route(
            "/{id}/answers/{question_id}",
            put(attempt::update_answer),
        )
        .route(
            "/{id}/answers/{question_id}/review",
            put(attempt::update_review_flag),
        )
        .route(
            "/{id}/sections/{section_id}/submit",
            post(attempt::submit_section),
        )
        .route("/{id}/timer", get(attempt::check_section_timer))
        .route("/{id}/pause", post(attempt::pause_attempt))
        .route("/{id}/resume", post(attempt::resume_attempt))
        .route("/{id}/submit", post(attempt::submit_attempt))
        .route("/{id}/review", get(attempt::get_deep_dive))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    let leaderboard_routes = Router::new().route(
        "/{category_id}/{test_id}",
        get(leaderboard::get_leaderboard),
    );

    let admin_routes = Router::new()
        .route(
            "/leaderboard/recalculate",
            post(leaderboard::recalculate_ranks),
        )
        .route("/leaderboard/{id}", delete(leaderboard::delete_entry))
        .route("/attempts/sweep", post(leaderboard::sweep_stale_attempts))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/attempts", attempt_routes)
        .nest("/api/leaderboard", leaderboard_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
