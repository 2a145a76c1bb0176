//! services/api/src/web/admin.rs
//!
//! Handlers for the admin area: the contact inbox, the audit log, activity
//! statistics and user/session housekeeping. Every route here sits behind
//! `require_auth` and `require_admin`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use agrisite_core::contact::{ContactEvent, ContactTransition};
use agrisite_core::domain::{
    AuditQuery, ContactMessage, ContactStatus, NewAuditEntry, Role, UnknownVariant,
};
use agrisite_core::ports::{PortError, PortResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::sweeper::SessionSweeper;
use crate::web::middleware::client_ip;
use crate::web::rest::{
    reject, AuditEntryResponse, ContactMessageResponse, ContactPreviewResponse,
    RoleActivityResponse, SessionResponse, UserResponse,
};
use crate::web::state::{AppState, CurrentUser};

type HandlerError = (StatusCode, String);

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MessageListParams {
    /// Only list messages with this status.
    pub status: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditParams {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
}

impl AuditParams {
    /// Exactly one filter has to be given: a user, an action, or an entity pair.
    fn into_query(self) -> Result<AuditQuery, HandlerError> {
        let bad = |msg: &str| (StatusCode::BAD_REQUEST, msg.to_string());
        match (self.user_id, self.action, self.entity, self.entity_id) {
            (Some(user_id), None, None, None) => Ok(AuditQuery::ByUser(user_id)),
            (None, Some(action), None, None) => Ok(AuditQuery::ByAction(action)),
            (None, None, Some(entity), Some(entity_id)) => {
                Ok(AuditQuery::ByEntity { entity, entity_id })
            }
            (None, None, Some(_), None) | (None, None, None, Some(_)) => {
                Err(bad("entity and entity_id must be given together"))
            }
            _ => Err(bad("give exactly one of user_id, action, or entity with entity_id")),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SetRoleRequest {
    /// `user` or `admin`.
    pub role: String,
}

#[derive(Serialize, ToSchema)]
pub struct SweepResponse {
    pub deleted: u64,
}

//=========================================================================================
// Contact Inbox
//=========================================================================================

/// List contact messages, newest first.
#[utoipa::path(
    get,
    path = "/admin/messages",
    params(MessageListParams),
    responses(
        (status = 200, description = "Messages", body = [ContactMessageResponse]),
        (status = 400, description = "Unknown status")
    )
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MessageListParams>,
) -> Result<Json<Vec<ContactMessageResponse>>, HandlerError> {
    let status = params
        .status
        .map(|s| s.parse::<ContactStatus>())
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let messages = state
        .db
        .list_contact_messages(status)
        .await
        .map_err(|e| reject(e, "Failed to list contact messages"))?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

/// Messages nobody has looked at yet, with a short preview of the body.
#[utoipa::path(
    get,
    path = "/admin/messages/pending",
    responses((status = 200, description = "Pending messages", body = [ContactPreviewResponse]))
)]
pub async fn pending_messages_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ContactPreviewResponse>>, HandlerError> {
    let previews = state
        .db
        .pending_contact_previews()
        .await
        .map_err(|e| reject(e, "Failed to list pending messages"))?;
    Ok(Json(previews.into_iter().map(Into::into).collect()))
}

/// Open a message. The first view marks it as read.
#[utoipa::path(
    get,
    path = "/admin/messages/{id}",
    params(("id" = i64, Path, description = "Contact message id")),
    responses(
        (status = 200, description = "The message", body = ContactMessageResponse),
        (status = 404, description = "No such message")
    )
)]
pub async fn view_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ContactMessageResponse>, HandlerError> {
    let message = match transition_and_audit(&state, &current, &headers, id, ContactEvent::View).await {
        Ok(message) => message,
        // archived messages can still be read, they just don't change
        Err(PortError::Validation(_)) => state
            .db
            .get_contact_message(id)
            .await
            .map_err(|e| reject(e, "Failed to load contact message"))?,
        Err(e) => return Err(reject(e, "Failed to load contact message")),
    };
    Ok(Json(message.into()))
}

/// Applies `event` and audits it. Views are only audited when they marked the message read.
async fn transition_and_audit(
    state: &AppState,
    current: &CurrentUser,
    headers: &HeaderMap,
    id: i64,
    event: ContactEvent,
) -> PortResult<ContactMessage> {
    let ContactTransition { message, changed } =
        state.db.transition_contact_message(id, event).await?;

    if changed || event != ContactEvent::View {
        state
            .record_audit(
                NewAuditEntry::new(format!("contact.{}", event.as_str()))
                    .by(current.user.id.clone())
                    .on("contact_message", id.to_string())
                    .with_details(json!({ "status": message.status.as_str() }))
                    .from_ip(client_ip(headers)),
            )
            .await;
        info!(id, event = event.as_str(), by = %current.user.id, "Contact message updated");
    }
    Ok(message)
}

/// Mark a message as answered.
#[utoipa::path(
    post,
    path = "/admin/messages/{id}/reply",
    params(("id" = i64, Path, description = "Contact message id")),
    responses(
        (status = 200, description = "Updated message", body = ContactMessageResponse),
        (status = 400, description = "Message is archived"),
        (status = 404, description = "No such message")
    )
)]
pub async fn reply_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ContactMessageResponse>, HandlerError> {
    transition_and_audit(&state, &current, &headers, id, ContactEvent::Reply)
        .await
        .map(|message| Json(message.into()))
        .map_err(|e| reject(e, "Failed to update contact message"))
}

/// Close a message.
#[utoipa::path(
    post,
    path = "/admin/messages/{id}/archive",
    params(("id" = i64, Path, description = "Contact message id")),
    responses(
        (status = 200, description = "Updated message", body = ContactMessageResponse),
        (status = 404, description = "No such message")
    )
)]
pub async fn archive_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ContactMessageResponse>, HandlerError> {
    transition_and_audit(&state, &current, &headers, id, ContactEvent::Archive)
        .await
        .map(|message| Json(message.into()))
        .map_err(|e| reject(e, "Failed to update contact message"))
}

//=========================================================================================
// Audit Log and Statistics
//=========================================================================================

/// Read the audit log, oldest entry first.
#[utoipa::path(
    get,
    path = "/admin/audit",
    params(AuditParams),
    responses(
        (status = 200, description = "Matching entries", body = [AuditEntryResponse]),
        (status = 400, description = "Missing or conflicting filters")
    )
)]
pub async fn audit_log_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditEntryResponse>>, HandlerError> {
    let query = params.into_query()?;
    let entries = state
        .db
        .query_audit_log(query)
        .await
        .map_err(|e| reject(e, "Failed to query the audit log"))?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

/// Sign-in activity per role for today and the last 7 and 30 days.
#[utoipa::path(
    get,
    path = "/admin/stats/activity",
    responses((status = 200, description = "Activity per role", body = [RoleActivityResponse]))
)]
pub async fn activity_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RoleActivityResponse>>, HandlerError> {
    let rows = state
        .db
        .user_activity_by_role(Utc::now())
        .await
        .map_err(|e| reject(e, "Failed to compute activity"))?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

//=========================================================================================
// Users and Sessions
//=========================================================================================

/// Live sessions of a user, newest first.
#[utoipa::path(
    get,
    path = "/admin/users/{id}/sessions",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Sessions", body = [SessionResponse]),
        (status = 404, description = "No such user")
    )
)]
pub async fn user_sessions_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<SessionResponse>>, HandlerError> {
    state
        .db
        .get_user(&user_id)
        .await
        .map_err(|e| reject(e, "Failed to load user"))?;
    let sessions = state
        .db
        .list_sessions_for_user(&user_id)
        .await
        .map_err(|e| reject(e, "Failed to list sessions"))?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// Change a user's role.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = String, Path, description = "User id")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Unknown role"),
        (status = 404, description = "No such user")
    )
)]
pub async fn set_role_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<UserResponse>, HandlerError> {
    let role: Role = req
        .role
        .parse()
        .map_err(|e: UnknownVariant| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let user = state
        .db
        .set_user_role(&user_id, role)
        .await
        .map_err(|e| reject(e, "Failed to update role"))?;

    state
        .record_audit(
            NewAuditEntry::new("user.set_role")
                .by(current.user.id.clone())
                .on("user", user_id)
                .with_details(json!({ "role": role.as_str() }))
                .from_ip(client_ip(&headers)),
        )
        .await;
    Ok(Json(user.into()))
}

/// Delete a user. Their sessions go with them; their audit entries stay, detached.
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Admins cannot delete themselves"),
        (status = 404, description = "No such user")
    )
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    if user_id == current.user.id {
        return Err((
            StatusCode::BAD_REQUEST,
            "Admins cannot delete their own account".to_string(),
        ));
    }
    state
        .db
        .delete_user(&user_id)
        .await
        .map_err(|e| reject(e, "Failed to delete user"))?;

    state
        .record_audit(
            NewAuditEntry::new("user.delete")
                .by(current.user.id.clone())
                .on("user", user_id.clone())
                .from_ip(client_ip(&headers)),
        )
        .await;
    info!(user_id = %user_id, by = %current.user.id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke a single session.
#[utoipa::path(
    delete,
    path = "/admin/sessions/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "No such session")
    )
)]
pub async fn revoke_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .db
        .revoke_session(&session_id)
        .await
        .map_err(|e| reject(e, "Failed to revoke session"))?;

    state
        .record_audit(
            NewAuditEntry::new("session.revoke")
                .by(current.user.id.clone())
                .on("session", session_id)
                .from_ip(client_ip(&headers)),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Run the expiry sweep now instead of waiting for the schedule.
#[utoipa::path(
    post,
    path = "/admin/sessions/sweep",
    responses((status = 200, description = "Sweep finished", body = SweepResponse))
)]
pub async fn sweep_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, HandlerError> {
    let deleted = SessionSweeper::new(state.db.clone())
        .run_once()
        .await
        .map_err(|e| reject(e, "Failed to sweep sessions"))?;

    state
        .record_audit(
            NewAuditEntry::new("session.sweep")
                .by(current.user.id.clone())
                .with_details(json!({ "deleted": deleted }))
                .from_ip(client_ip(&headers)),
        )
        .await;
    Ok(Json(SweepResponse { deleted }))
}
