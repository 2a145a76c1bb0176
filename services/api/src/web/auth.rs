//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for the site's placeholder login page.
//!
//! The real identity provider lives outside this service; the login endpoint
//! trusts the identity it is handed, records the user and issues a session.
//! Admin accounts additionally need the password configured as `ADMIN_PASSWORD_HASH`.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use agrisite_core::domain::{NewAuditEntry, NewSession, Role, Session, UpsertUser};
use agrisite_core::ports::{PortError, PortResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::Config;
use crate::web::middleware::{client_ip, session_token, SESSION_COOKIE};
use crate::web::rest::{reject, UserResponse};
use crate::web::state::{AppState, CurrentUser};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Stable identifier issued by the identity provider.
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub login_method: Option<String>,
    /// Only checked for accounts holding the admin role.
    #[serde(default)]
    pub admin_password: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Session Issuing
//=========================================================================================

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Creates a session for `user_id`, retrying once with fresh keys on a collision.
pub async fn issue_session(
    state: &AppState,
    user_id: &str,
    ip_address: Option<String>,
    user_agent: Option<String>,
) -> PortResult<(Session, String)> {
    let expires_at = Utc::now()
        .checked_add_signed(state.config.session_ttl)
        .ok_or_else(|| PortError::Unexpected("session expiry is out of range".to_string()))?;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let token = new_token();
        let input = NewSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token: token.clone(),
            expires_at,
            ip_address: ip_address.clone(),
            user_agent: user_agent.clone(),
        };
        match state.db.create_session(input).await {
            Ok(session) => return Ok((session, token)),
            Err(PortError::DuplicateKey(what)) if attempts < 2 => {
                warn!("Session key collision ({}), retrying", what);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Checks `password` against the configured admin hash. No hash, no admin sign-in.
pub fn verify_admin_password(config: &Config, password: Option<&str>) -> bool {
    let (Some(hash), Some(password)) = (config.admin_password_hash.as_deref(), password) else {
        return false;
    };
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Failed to parse the admin password hash: {:?}", e);
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

fn session_cookie(state: &AppState, value: &str, max_age_secs: i64) -> String {
    let secure = if state.config.cookie_secure { " Secure;" } else { "" };
    format!(
        "{}={}; HttpOnly;{} SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, value, secure, max_age_secs
    )
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/login - Sign in with an identity from the identity provider
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Invalid identity"),
        (status = 401, description = "Admin account without a valid password"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let ip_address = client_ip(&headers);
    let admin_verified = verify_admin_password(&state.config, req.admin_password.as_deref());
    let denied = || (StatusCode::UNAUTHORIZED, "Admin sign-in needs a valid password".to_string());

    // 1. Admin accounts are not handed out on the identity alone
    match state.db.get_user(&req.open_id).await {
        Ok(existing) if existing.role == Role::Admin && !admin_verified => {
            warn!("Rejected sign-in to admin account {}", existing.id);
            state
                .record_audit(
                    NewAuditEntry::new("user.login_denied")
                        .on("user", existing.id)
                        .from_ip(ip_address),
                )
                .await;
            return Err(denied());
        }
        Ok(_) | Err(PortError::NotFound(_)) => {}
        Err(e) => return Err(reject(e, "Failed to sign in")),
    }

    // 2. Record the user and stamp the sign-in time
    let user = state
        .db
        .upsert_user(UpsertUser {
            id: req.open_id,
            name: req.name,
            email: req.email,
            login_method: req.login_method,
            role: None,
        })
        .await
        .map_err(|e| reject(e, "Failed to sign in"))?;
    // promoted in between the two calls
    if user.role == Role::Admin && !admin_verified {
        return Err(denied());
    }

    // 3. Issue the session
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let (session, token) = issue_session(&state, &user.id, ip_address.clone(), user_agent)
        .await
        .map_err(|e| {
            error!("Failed to create session for {}: {:?}", user.id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;

    state
        .record_audit(
            NewAuditEntry::new("user.login")
                .by(user.id.clone())
                .on("session", session.id.clone())
                .with_details(json!({ "login_method": user.login_method }))
                .from_ip(ip_address),
        )
        .await;
    info!("User {} signed in", user.id);

    // 4. Return the profile with the session cookie
    let cookie = session_cookie(&state, &token, state.config.session_ttl.num_seconds());
    let response = AuthResponse {
        user: UserResponse::from(user),
        session_id: session.id,
        expires_at: session.expires_at,
    };
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Resolve the session cookie
    let token = session_token(&headers)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;
    let session = state
        .db
        .get_session_by_token(token)
        .await
        .map_err(|_| (StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    // 2. Delete it; a concurrent sweep may already have done so
    match state.db.revoke_session(&session.id).await {
        Ok(()) | Err(PortError::NotFound(_)) => {}
        Err(e) => return Err(reject(e, "Failed to logout")),
    }
    state
        .record_audit(
            NewAuditEntry::new("user.logout")
                .by(session.user_id.clone())
                .on("session", session.id)
                .from_ip(client_ip(&headers)),
        )
        .await;

    // 3. Clear the cookie
    let cookie = session_cookie(&state, "", 0);
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]))
}

/// GET /auth/me - The signed-in user
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "No active session")
    )
)]
pub async fn me_handler(Extension(current): Extension<CurrentUser>) -> Json<UserResponse> {
    Json(UserResponse::from(current.user))
}
