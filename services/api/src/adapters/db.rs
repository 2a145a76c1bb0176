//! services/api/src/adapters/db.rs
//!
//! This module contains the PostgreSQL adapter, the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the database using `sqlx`.

use agrisite_core::contact::{ContactEvent, ContactTransition};
use agrisite_core::domain::{
    AuditLogEntry, AuditQuery, ContactMessage, ContactPreview, ContactStatus, NewAuditEntry,
    NewContactMessage, NewSession, Role, RoleActivity, Session, UpsertUser, User, PREVIEW_CHARS,
};
use agrisite_core::ports::{ActivityWindows, DatabaseService, PortError, PortResult};
use agrisite_core::validation::{
    normalize_contact, validate_audit_entry, validate_new_session, validate_upsert_user,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port on PostgreSQL.
///
/// Foreign-key cascades (`sessions`) and set-null (`audit_log`) are enforced by
/// the schema itself, see `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Translates a `sqlx` error into the port taxonomy, using the SQLSTATE where there is one.
pub(crate) fn map_db_error(e: sqlx::Error, what: &str) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what.to_string()),
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some(code) => sqlstate_error(code, format!("{}: {}", what, db_err.message()))
                .unwrap_or_else(|| PortError::Unexpected(db_err.to_string())),
            None => PortError::Unexpected(db_err.to_string()),
        },
        other => PortError::Unexpected(other.to_string()),
    }
}

/// Constraint and data errors the caller can act on. Anything else is unexpected.
fn sqlstate_error(code: &str, detail: String) -> Option<PortError> {
    match code {
        "23503" => Some(PortError::ForeignKeyViolation(detail)),
        "23505" => Some(PortError::DuplicateKey(detail)),
        // check_violation, not_null_violation, string_data_right_truncation
        "23514" | "23502" | "22001" => Some(PortError::Validation(detail)),
        _ => None,
    }
}

fn corrupt(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(format!("stored row is invalid: {}", e))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_COLUMNS: &str = "id, name, email, login_method, role, created_at, last_signed_in";
const SESSION_COLUMNS: &str =
    "id, user_id, expires_at, created_at, last_activity_at, ip_address, user_agent";
const CONTACT_COLUMNS: &str =
    "id, name, email, phone, message, status, created_at, read_at, replied_at";
const AUDIT_COLUMNS: &str =
    "id, user_id, action, entity, entity_id, details, ip_address, created_at";

#[derive(FromRow)]
struct UserRecord {
    id: String,
    name: Option<String>,
    email: Option<String>,
    login_method: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
    last_signed_in: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            login_method: self.login_method,
            role: self.role.parse().map_err(corrupt)?,
            created_at: self.created_at,
            last_signed_in: self.last_signed_in,
        })
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: String,
    user_id: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}
impl SessionRecord {
    fn to_domain(self) -> Session {
        Session {
            id: self.id,
            user_id: self.user_id,
            expires_at: self.expires_at,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
        }
    }
}

#[derive(FromRow)]
struct ContactRecord {
    id: i64,
    name: String,
    email: String,
    phone: Option<String>,
    message: String,
    status: String,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
    replied_at: Option<DateTime<Utc>>,
}
impl ContactRecord {
    fn to_domain(self) -> PortResult<ContactMessage> {
        Ok(ContactMessage {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            message: self.message,
            status: self.status.parse().map_err(corrupt)?,
            created_at: self.created_at,
            read_at: self.read_at,
            replied_at: self.replied_at,
        })
    }
}

#[derive(FromRow)]
struct PreviewRecord {
    id: i64,
    name: String,
    email: String,
    preview: String,
    created_at: DateTime<Utc>,
}
impl PreviewRecord {
    fn to_domain(self) -> ContactPreview {
        ContactPreview {
            id: self.id,
            name: self.name,
            email: self.email,
            preview: self.preview,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct AuditRecord {
    id: i64,
    user_id: Option<String>,
    action: String,
    entity: Option<String>,
    entity_id: Option<String>,
    details: Option<serde_json::Value>,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
}
impl AuditRecord {
    fn to_domain(self) -> AuditLogEntry {
        AuditLogEntry {
            id: self.id,
            user_id: self.user_id,
            action: self.action,
            entity: self.entity,
            entity_id: self.entity_id,
            details: self.details,
            ip_address: self.ip_address,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ActivityRecord {
    role: String,
    today: i64,
    last_7_days: i64,
    last_30_days: i64,
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for PgStore {
    async fn upsert_user(&self, input: UpsertUser) -> PortResult<User> {
        validate_upsert_user(&input)?;
        let sql = format!(
            r#"
            INSERT INTO users (id, name, email, login_method, role, created_at, last_signed_in)
            VALUES ($1, $2, $3, $4, COALESCE($5, 'user'), $6, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, users.name),
                email = COALESCE(EXCLUDED.email, users.email),
                login_method = COALESCE(EXCLUDED.login_method, users.login_method),
                role = COALESCE($5, users.role),
                last_signed_in = EXCLUDED.last_signed_in
            RETURNING {USER_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(&input.id)
            .bind(&input.name)
            .bind(&input.email)
            .bind(&input.login_method)
            .bind(input.role.map(|r| r.as_str()))
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("user {}", input.id)))?;
        record.to_domain()
    }

    async fn get_user(&self, user_id: &str) -> PortResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("User {} not found", user_id)))?;
        record.to_domain()
    }

    async fn set_user_role(&self, user_id: &str, role: Role) -> PortResult<User> {
        let sql = format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("User {} not found", user_id)))?;
        record.to_domain()
    }

    async fn delete_user(&self, user_id: &str) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("user {}", user_id)))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn create_session(&self, input: NewSession) -> PortResult<Session> {
        validate_new_session(&input)?;
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO sessions (id, user_id, token, expires_at, created_at, last_activity_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $5, $6, $7)
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(&input.id)
            .bind(&input.user_id)
            .bind(&input.token)
            .bind(input.expires_at)
            .bind(now)
            .bind(&input.ip_address)
            .bind(&input.user_agent)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("session for user {}", input.user_id)))?;
        Ok(record.to_domain())
    }

    async fn get_session(&self, session_id: &str) -> PortResult<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND expires_at > $2");
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "session"))?
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        Ok(record.to_domain())
    }

    async fn get_session_by_token(&self, token: &str) -> PortResult<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token = $1 AND expires_at > $2");
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(token)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "session"))?
            .ok_or_else(|| PortError::NotFound("Session not found".to_string()))?;
        Ok(record.to_domain())
    }

    async fn touch_session(&self, session_id: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET last_activity_at = $2 WHERE id = $1 AND expires_at > $2",
        )
        .bind(session_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "session"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(())
    }

    async fn revoke_session(&self, session_id: &str) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "session"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(())
    }

    async fn list_sessions_for_user(&self, user_id: &str) -> PortResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 AND expires_at > $2 ORDER BY created_at DESC"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .bind(Utc::now())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "sessions"))?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "expired sessions"))?;
        Ok(result.rows_affected())
    }

    async fn create_contact_message(&self, input: NewContactMessage) -> PortResult<ContactMessage> {
        let input = normalize_contact(input)?;
        let sql = format!(
            r#"
            INSERT INTO contact_messages (name, email, phone, message, status, created_at)
            VALUES ($1, $2, $3, $4, 'new', $5)
            RETURNING {CONTACT_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, ContactRecord>(&sql)
            .bind(&input.name)
            .bind(&input.email)
            .bind(&input.phone)
            .bind(&input.message)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "contact message"))?;
        record.to_domain()
    }

    async fn get_contact_message(&self, id: i64) -> PortResult<ContactMessage> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contact_messages WHERE id = $1");
        let record = sqlx::query_as::<_, ContactRecord>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("Contact message {} not found", id)))?;
        record.to_domain()
    }

    async fn transition_contact_message(
        &self,
        id: i64,
        event: ContactEvent,
    ) -> PortResult<ContactTransition> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_error(e, "transaction"))?;

        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contact_messages WHERE id = $1 FOR UPDATE");
        let mut message = sqlx::query_as::<_, ContactRecord>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, &format!("Contact message {} not found", id)))?
            .to_domain()?;

        let changed = message.apply(event, Utc::now())?;
        if changed {
            // Hand back what Postgres stored; TIMESTAMPTZ keeps microseconds only.
            let sql = format!(
                r#"
                UPDATE contact_messages SET status = $2, read_at = $3, replied_at = $4
                WHERE id = $1
                RETURNING {CONTACT_COLUMNS}
                "#
            );
            message = sqlx::query_as::<_, ContactRecord>(&sql)
                .bind(id)
                .bind(message.status.as_str())
                .bind(message.read_at)
                .bind(message.replied_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_db_error(e, "contact message"))?
                .to_domain()?;
            debug!(id, event = event.as_str(), status = %message.status, "Contact message transitioned");
        }

        tx.commit().await.map_err(|e| map_db_error(e, "transaction"))?;
        Ok(ContactTransition { message, changed })
    }

    async fn list_contact_messages(
        &self,
        status: Option<ContactStatus>,
    ) -> PortResult<Vec<ContactMessage>> {
        let sql = format!(
            r#"
            SELECT {CONTACT_COLUMNS} FROM contact_messages
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            "#
        );
        let records = sqlx::query_as::<_, ContactRecord>(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "contact messages"))?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn pending_contact_previews(&self) -> PortResult<Vec<ContactPreview>> {
        let records = sqlx::query_as::<_, PreviewRecord>(
            r#"
            SELECT id, name, email, LEFT(message, $1) AS preview, created_at
            FROM contact_messages
            WHERE status = 'new'
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(PREVIEW_CHARS as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "pending contact messages"))?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn append_audit_entry(&self, entry: NewAuditEntry) -> PortResult<AuditLogEntry> {
        validate_audit_entry(&entry)?;
        let sql = format!(
            r#"
            INSERT INTO audit_log (user_id, action, entity, entity_id, details, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {AUDIT_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, AuditRecord>(&sql)
            .bind(&entry.user_id)
            .bind(&entry.action)
            .bind(&entry.entity)
            .bind(&entry.entity_id)
            .bind(&entry.details)
            .bind(&entry.ip_address)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "audit entry"))?;
        Ok(record.to_domain())
    }

    async fn query_audit_log(&self, query: AuditQuery) -> PortResult<Vec<AuditLogEntry>> {
        let base = format!("SELECT {AUDIT_COLUMNS} FROM audit_log");
        let order = "ORDER BY created_at ASC, id ASC";
        let records = match &query {
            AuditQuery::ByUser(user_id) => {
                let sql = format!("{base} WHERE user_id = $1 {order}");
                sqlx::query_as::<_, AuditRecord>(&sql)
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await
            }
            AuditQuery::ByAction(action) => {
                let sql = format!("{base} WHERE action = $1 {order}");
                sqlx::query_as::<_, AuditRecord>(&sql)
                    .bind(action)
                    .fetch_all(&self.pool)
                    .await
            }
            AuditQuery::ByEntity { entity, entity_id } => {
                let sql = format!("{base} WHERE entity = $1 AND entity_id = $2 {order}");
                sqlx::query_as::<_, AuditRecord>(&sql)
                    .bind(entity)
                    .bind(entity_id)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| map_db_error(e, "audit log"))?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn user_activity_by_role(&self, now: DateTime<Utc>) -> PortResult<Vec<RoleActivity>> {
        let windows = ActivityWindows::ending_at(now);
        let records = sqlx::query_as::<_, ActivityRecord>(
            r#"
            SELECT role,
                   COUNT(*) FILTER (WHERE last_signed_in >= $1) AS today,
                   COUNT(*) FILTER (WHERE last_signed_in >= $2) AS last_7_days,
                   COUNT(*) FILTER (WHERE last_signed_in >= $3) AS last_30_days
            FROM users
            GROUP BY role
            "#,
        )
        .bind(windows.start_of_day)
        .bind(windows.week_ago)
        .bind(windows.month_ago)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "user activity"))?;

        let mut rows: Vec<RoleActivity> = Role::ALL
            .iter()
            .map(|&role| RoleActivity {
                role,
                today: 0,
                last_7_days: 0,
                last_30_days: 0,
            })
            .collect();
        for record in records {
            let role: Role = record.role.parse().map_err(corrupt)?;
            if let Some(row) = rows.iter_mut().find(|r| r.role == role) {
                row.today = record.today;
                row.last_7_days = record.last_7_days;
                row.last_30_days = record.last_30_days;
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_map_to_not_found() {
        let err = map_db_error(sqlx::Error::RowNotFound, "User u-1 not found");
        assert!(matches!(err, PortError::NotFound(msg) if msg == "User u-1 not found"));
    }

    #[test]
    fn constraint_and_truncation_states_are_caller_errors() {
        let detail = || "users: value too long for type character varying(64)".to_string();
        assert!(matches!(sqlstate_error("22001", detail()), Some(PortError::Validation(_))));
        assert!(matches!(sqlstate_error("23514", detail()), Some(PortError::Validation(_))));
        assert!(matches!(sqlstate_error("23503", detail()), Some(PortError::ForeignKeyViolation(_))));
        assert!(matches!(sqlstate_error("23505", detail()), Some(PortError::DuplicateKey(_))));
        assert!(sqlstate_error("40001", detail()).is_none());
    }

    #[test]
    fn driver_failures_are_unexpected() {
        assert!(matches!(
            map_db_error(sqlx::Error::PoolTimedOut, "session"),
            PortError::Unexpected(_)
        ));
    }
}
