//! crates/agrisite_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete store behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::contact::{ContactEvent, ContactTransition, TransitionError};
use crate::domain::{
    AuditLogEntry, AuditQuery, ContactMessage, ContactPreview, ContactStatus, NewAuditEntry,
    NewContactMessage, NewSession, Role, RoleActivity, Session, UpsertUser, User,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from the underlying store.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Referenced row does not exist: {0}")]
    ForeignKeyViolation(String),
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl From<TransitionError> for PortError {
    fn from(e: TransitionError) -> Self {
        PortError::Validation(e.to_string())
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users ---
    /// Creates the user or refreshes its profile, and stamps `last_signed_in`.
    async fn upsert_user(&self, input: UpsertUser) -> PortResult<User>;

    async fn get_user(&self, user_id: &str) -> PortResult<User>;

    async fn set_user_role(&self, user_id: &str, role: Role) -> PortResult<User>;

    /// Deletes the user, its sessions, and detaches its audit entries, atomically.
    async fn delete_user(&self, user_id: &str) -> PortResult<()>;

    // --- Sessions ---
    async fn create_session(&self, input: NewSession) -> PortResult<Session>;

    /// Expired sessions are reported as `NotFound` even if still stored.
    async fn get_session(&self, session_id: &str) -> PortResult<Session>;

    async fn get_session_by_token(&self, token: &str) -> PortResult<Session>;

    async fn touch_session(&self, session_id: &str) -> PortResult<()>;

    async fn revoke_session(&self, session_id: &str) -> PortResult<()>;

    async fn list_sessions_for_user(&self, user_id: &str) -> PortResult<Vec<Session>>;

    /// Deletes every session whose expiry is strictly before `now`.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<u64>;

    // --- Contact messages ---
    async fn create_contact_message(&self, input: NewContactMessage) -> PortResult<ContactMessage>;

    async fn get_contact_message(&self, id: i64) -> PortResult<ContactMessage>;

    /// Applies a workflow event atomically. The returned message is the stored row.
    async fn transition_contact_message(
        &self,
        id: i64,
        event: ContactEvent,
    ) -> PortResult<ContactTransition>;

    /// Newest first. `None` lists every status.
    async fn list_contact_messages(
        &self,
        status: Option<ContactStatus>,
    ) -> PortResult<Vec<ContactMessage>>;

    async fn pending_contact_previews(&self) -> PortResult<Vec<ContactPreview>>;

    // --- Audit log ---
    async fn append_audit_entry(&self, entry: NewAuditEntry) -> PortResult<AuditLogEntry>;

    async fn query_audit_log(&self, query: AuditQuery) -> PortResult<Vec<AuditLogEntry>>;

    // --- Derived views ---
    /// One row per role, including roles with no users.
    async fn user_activity_by_role(&self, now: DateTime<Utc>) -> PortResult<Vec<RoleActivity>>;
}

/// Cut-offs for the per-role activity counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindows {
    /// 00:00 UTC on the day containing `now`.
    pub start_of_day: DateTime<Utc>,
    pub week_ago: DateTime<Utc>,
    pub month_ago: DateTime<Utc>,
}

impl ActivityWindows {
    pub fn ending_at(now: DateTime<Utc>) -> Self {
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        Self {
            start_of_day,
            week_ago: now - chrono::Duration::days(7),
            month_ago: now - chrono::Duration::days(30),
        }
    }
}
