//! services/api/src/web/rest.rs
//!
//! Contains the public REST handlers, the response payloads shared by every
//! handler module, and the master definition for the OpenAPI specification.

use crate::web::state::AppState;
use agrisite_core::domain::{
    AuditLogEntry, ContactMessage, ContactPreview, NewContactMessage, RoleActivity, Session, User,
};
use agrisite_core::ports::PortError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_contact_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        crate::web::auth::me_handler,
        crate::web::admin::list_messages_handler,
        crate::web::admin::pending_messages_handler,
        crate::web::admin::view_message_handler,
        crate::web::admin::reply_message_handler,
        crate::web::admin::archive_message_handler,
        crate::web::admin::audit_log_handler,
        crate::web::admin::activity_stats_handler,
        crate::web::admin::user_sessions_handler,
        crate::web::admin::set_role_handler,
        crate::web::admin::delete_user_handler,
        crate::web::admin::revoke_session_handler,
        crate::web::admin::sweep_sessions_handler,
    ),
    components(
        schemas(
            ContactRequest,
            ContactMessageResponse,
            ContactPreviewResponse,
            UserResponse,
            SessionResponse,
            AuditEntryResponse,
            RoleActivityResponse,
            crate::web::auth::LoginRequest,
            crate::web::auth::AuthResponse,
            crate::web::admin::SetRoleRequest,
            crate::web::admin::SweepResponse,
        )
    ),
    tags(
        (name = "Agrisite API", description = "Contact form, sign-in and site administration.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Port Error Translation
//=========================================================================================

/// Maps a port failure onto the status code and message returned to the caller.
pub fn reject(e: PortError, context: &str) -> (StatusCode, String) {
    match e {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        PortError::ForeignKeyViolation(msg) | PortError::DuplicateKey(msg) => {
            warn!("{}: {}", context, msg);
            (StatusCode::CONFLICT, msg)
        }
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        PortError::Unexpected(msg) => {
            error!("{}: {}", context, msg);
            (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
        }
    }
}

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

/// The contact form as submitted by the front end.
#[derive(Deserialize, ToSchema)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContactMessageResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    /// One of `new`, `read`, `replied`, `archived`.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
}

impl From<ContactMessage> for ContactMessageResponse {
    fn from(m: ContactMessage) -> Self {
        Self {
            id: m.id,
            name: m.name,
            email: m.email,
            phone: m.phone,
            message: m.message,
            status: m.status.as_str().to_string(),
            created_at: m.created_at,
            read_at: m.read_at,
            replied_at: m.replied_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContactPreviewResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

impl From<ContactPreview> for ContactPreviewResponse {
    fn from(p: ContactPreview) -> Self {
        Self {
            id: p.id,
            name: p.name,
            email: p.email,
            preview: p.preview,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub login_method: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_signed_in: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            login_method: u.login_method,
            role: u.role.as_str().to_string(),
            created_at: u.created_at,
            last_signed_in: u.last_signed_in,
        }
    }
}

/// A session as shown to administrators. Tokens are never listed.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            expires_at: s.expires_at,
            created_at: s.created_at,
            last_activity_at: s.last_activity_at,
            ip_address: s.ip_address,
            user_agent: s.user_agent,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEntryResponse {
    pub id: i64,
    pub user_id: Option<String>,
    pub action: String,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLogEntry> for AuditEntryResponse {
    fn from(e: AuditLogEntry) -> Self {
        Self {
            id: e.id,
            user_id: e.user_id,
            action: e.action,
            entity: e.entity,
            entity_id: e.entity_id,
            details: e.details,
            ip_address: e.ip_address,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleActivityResponse {
    pub role: String,
    pub today: i64,
    pub last_7_days: i64,
    pub last_30_days: i64,
}

impl From<RoleActivity> for RoleActivityResponse {
    fn from(a: RoleActivity) -> Self {
        Self {
            role: a.role.as_str().to_string(),
            today: a.today,
            last_7_days: a.last_7_days,
            last_30_days: a.last_30_days,
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Submit the public contact form.
///
/// The message is stored with status `new` and shows up in the admin's
/// pending list.
#[utoipa::path(
    post,
    path = "/contact",
    request_body = ContactRequest,
    responses(
        (status = 201, description = "Message received", body = ContactMessageResponse),
        (status = 400, description = "Missing field or malformed email"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn submit_contact_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<ContactRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let message = app_state
        .db
        .create_contact_message(NewContactMessage {
            name: req.name,
            email: req.email,
            phone: req.phone,
            message: req.message,
        })
        .await
        .map_err(|e| reject(e, "Failed to store contact message"))?;

    info!("Contact message {} received", message.id);
    Ok((StatusCode::CREATED, Json(ContactMessageResponse::from(message))))
}
