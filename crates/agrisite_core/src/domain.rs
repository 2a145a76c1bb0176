//! crates/agrisite_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

//=========================================================================================
// Users
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub const ALL: [Role; 2] = [Role::User, Role::Admin];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// An account known to the site. The id is whatever the identity provider hands us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub login_method: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_signed_in: DateTime<Utc>,
}

/// Input for the sign-in path: creates the user or refreshes its profile.
///
/// `role` is only applied when it is `Some`; a brand-new user without one
/// gets `Role::User`.
#[derive(Debug, Clone, Default)]
pub struct UpsertUser {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub login_method: Option<String>,
    pub role: Option<Role>,
}

//=========================================================================================
// Sessions
//=========================================================================================

/// A browser login session. The token never leaves the store, so it is not a field here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    /// A session is live strictly before its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

//=========================================================================================
// Contact messages
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactStatus {
    New,
    Read,
    Replied,
    Archived,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::New => "new",
            ContactStatus::Read => "read",
            ContactStatus::Replied => "replied",
            ContactStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ContactStatus::New),
            "read" => Ok(ContactStatus::Read),
            "replied" => Ok(ContactStatus::Replied),
            "archived" => Ok(ContactStatus::Archived),
            other => Err(UnknownVariant {
                kind: "contact status",
                value: other.to_string(),
            }),
        }
    }
}

/// A contact-form submission and where it stands in the reply workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMessage {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub status: ContactStatus,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewContactMessage {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
}

/// Number of characters of the body shown in the pending-messages preview.
pub const PREVIEW_CHARS: usize = 100;

/// One row of the pending contact messages view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactPreview {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ContactMessage> for ContactPreview {
    fn from(msg: &ContactMessage) -> Self {
        Self {
            id: msg.id,
            name: msg.name.clone(),
            email: msg.email.clone(),
            preview: msg.message.chars().take(PREVIEW_CHARS).collect(),
            created_at: msg.created_at,
        }
    }
}

//=========================================================================================
// Audit log
//=========================================================================================

/// An immutable record of an administrative action.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: Option<String>,
    pub action: String,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry {
    pub user_id: Option<String>,
    pub action: String,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
}

impl NewAuditEntry {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn on(mut self, entity: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn from_ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }
}

/// The supported audit log filters. Results are always oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditQuery {
    ByUser(String),
    ByAction(String),
    ByEntity { entity: String, entity_id: String },
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        match self {
            AuditQuery::ByUser(user_id) => entry.user_id.as_deref() == Some(user_id.as_str()),
            AuditQuery::ByAction(action) => entry.action == *action,
            AuditQuery::ByEntity { entity, entity_id } => {
                entry.entity.as_deref() == Some(entity.as_str())
                    && entry.entity_id.as_deref() == Some(entity_id.as_str())
            }
        }
    }
}

//=========================================================================================
// Derived views
//=========================================================================================

/// Sign-in counts for one role over the rolling windows of the activity view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleActivity {
    pub role: Role,
    pub today: i64,
    pub last_7_days: i64,
    pub last_30_days: i64,
}
