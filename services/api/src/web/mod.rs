pub mod admin;
pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

// Re-export the pieces the binary needs to build the web server router.
pub use middleware::{require_admin, require_auth};
pub use rest::{submit_contact_handler, ApiDoc};
pub use state::{AppState, CurrentUser};

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

/// Builds the API router: public routes, signed-in routes, and the admin area.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/contact", post(submit_contact_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Routes for any signed-in user
    let signed_in_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Admin area; layers run bottom-up, so auth resolves the caller before the role check
    let admin_routes = Router::new()
        .route("/admin/messages", get(admin::list_messages_handler))
        .route("/admin/messages/pending", get(admin::pending_messages_handler))
        .route("/admin/messages/{id}", get(admin::view_message_handler))
        .route("/admin/messages/{id}/reply", post(admin::reply_message_handler))
        .route("/admin/messages/{id}/archive", post(admin::archive_message_handler))
        .route("/admin/audit", get(admin::audit_log_handler))
        .route("/admin/stats/activity", get(admin::activity_stats_handler))
        .route("/admin/users/{id}", delete(admin::delete_user_handler))
        .route("/admin/users/{id}/role", put(admin::set_role_handler))
        .route("/admin/users/{id}/sessions", get(admin::user_sessions_handler))
        .route("/admin/sessions/sweep", post(admin::sweep_sessions_handler))
        .route("/admin/sessions/{id}", delete(admin::revoke_session_handler))
        .layer(axum_middleware::from_fn(require_admin))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(signed_in_routes)
        .merge(admin_routes)
        .with_state(app_state)
}
