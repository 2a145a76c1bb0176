//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use agrisite_core::domain::Role;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::state::{AppState, CurrentUser};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Pulls the session token out of the `Cookie` header, if there is one.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            let (name, value) = c.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
        })
}

/// Best-effort client address, as reported by the reverse proxy in front of the service.
///
/// Only values that parse as an IP address are kept.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let header_ip = |name: &str, first_hop: bool| -> Option<IpAddr> {
        let value = headers.get(name)?.to_str().ok()?;
        let value = if first_hop { value.split(',').next()? } else { value };
        value.trim().parse::<IpAddr>().ok()
    };
    header_ip("x-forwarded-for", true)
        .or_else(|| header_ip("x-real-ip", false))
        .map(|ip| ip.to_string())
}

/// Resolves the session cookie to a live session and its user.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<CurrentUser, StatusCode> {
    // 1. Parse the session token from the cookie header
    let token = session_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Look up the live session; expired ones are reported as missing
    let session = state.db.get_session_by_token(token).await.map_err(|e| {
        warn!("Rejected session cookie: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    // 3. Load the owner
    let user = state.db.get_user(&session.user_id).await.map_err(|e| {
        error!("Session {} has no usable user: {:?}", session.id, e);
        StatusCode::UNAUTHORIZED
    })?;

    // 4. Record the activity
    state.db.touch_session(&session.id).await.map_err(|e| {
        warn!("Session {} vanished during the request: {}", session.id, e);
        StatusCode::UNAUTHORIZED
    })?;

    Ok(CurrentUser {
        user,
        session_id: session.id,
    })
}

/// Middleware that validates the session cookie and attaches the caller.
///
/// If valid, inserts a [`CurrentUser`] into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let current = authenticate(&state, req.headers()).await?;
    req.extensions_mut().insert(current);
    Ok(next.run(req).await)
}

/// Middleware for the admin area. Must run after [`require_auth`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response, StatusCode> {
    let current = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if current.user.role != Role::Admin {
        warn!("User {} tried to reach the admin area", current.user.id);
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(req).await)
}
