//! services/api/src/adapters/memory.rs
//!
//! In-process implementation of the `DatabaseService` port.
//!
//! There are no foreign keys here, so the cascade from users to sessions and
//! the set-null from users to audit entries are applied by hand, under the
//! same write lock as the parent delete.

use std::collections::BTreeMap;
use std::collections::HashMap;

use agrisite_core::contact::{ContactEvent, ContactTransition};
use agrisite_core::domain::{
    AuditLogEntry, AuditQuery, ContactMessage, ContactPreview, ContactStatus, NewAuditEntry,
    NewContactMessage, NewSession, Role, RoleActivity, Session, UpsertUser, User,
};
use agrisite_core::ports::{ActivityWindows, DatabaseService, PortError, PortResult};
use agrisite_core::validation::{
    normalize_contact, validate_audit_entry, validate_new_session, validate_upsert_user,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

struct SessionRow {
    session: Session,
    token: String,
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    sessions: HashMap<String, SessionRow>,
    contact_messages: BTreeMap<i64, ContactMessage>,
    audit_log: Vec<AuditLogEntry>,
    next_contact_id: i64,
    next_audit_id: i64,
}

impl Tables {
    fn live_session(&self, session_id: &str, now: DateTime<Utc>) -> Option<&SessionRow> {
        self.sessions
            .get(session_id)
            .filter(|row| !row.session.is_expired_at(now))
    }
}

/// A store that keeps every table in memory. Used by the test suites and for
/// running the API without a database.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included.
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    /// Overwrites a user's sign-in time; lets tests place users in the activity windows.
    pub async fn set_last_signed_in(&self, user_id: &str, at: DateTime<Utc>) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        user.last_signed_in = at;
        Ok(())
    }
}

#[async_trait]
impl DatabaseService for MemoryStore {
    async fn upsert_user(&self, input: UpsertUser) -> PortResult<User> {
        validate_upsert_user(&input)?;
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let user = tables.users.entry(input.id.clone()).or_insert_with(|| User {
            id: input.id.clone(),
            name: None,
            email: None,
            login_method: None,
            role: Role::default(),
            created_at: now,
            last_signed_in: now,
        });
        if input.name.is_some() {
            user.name = input.name;
        }
        if input.email.is_some() {
            user.email = input.email;
        }
        if input.login_method.is_some() {
            user.login_method = input.login_method;
        }
        if let Some(role) = input.role {
            user.role = role;
        }
        user.last_signed_in = now;
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: &str) -> PortResult<User> {
        self.tables
            .read()
            .await
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn set_user_role(&self, user_id: &str, role: Role) -> PortResult<User> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        user.role = role;
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: &str) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(user_id).is_none() {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        tables.sessions.retain(|_, row| row.session.user_id != user_id);
        for entry in tables.audit_log.iter_mut() {
            if entry.user_id.as_deref() == Some(user_id) {
                entry.user_id = None;
            }
        }
        Ok(())
    }

    async fn create_session(&self, input: NewSession) -> PortResult<Session> {
        validate_new_session(&input)?;
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&input.user_id) {
            return Err(PortError::ForeignKeyViolation(format!(
                "user {} does not exist",
                input.user_id
            )));
        }
        if tables.sessions.contains_key(&input.id) {
            return Err(PortError::DuplicateKey(format!("session {}", input.id)));
        }
        if tables.sessions.values().any(|row| row.token == input.token) {
            return Err(PortError::DuplicateKey("session token".to_string()));
        }
        let session = Session {
            id: input.id,
            user_id: input.user_id,
            expires_at: input.expires_at,
            created_at: now,
            last_activity_at: now,
            ip_address: input.ip_address,
            user_agent: input.user_agent,
        };
        tables.sessions.insert(
            session.id.clone(),
            SessionRow {
                session: session.clone(),
                token: input.token,
            },
        );
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> PortResult<Session> {
        self.tables
            .read()
            .await
            .live_session(session_id, Utc::now())
            .map(|row| row.session.clone())
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn get_session_by_token(&self, token: &str) -> PortResult<Session> {
        let now = Utc::now();
        self.tables
            .read()
            .await
            .sessions
            .values()
            .find(|row| row.token == token && !row.session.is_expired_at(now))
            .map(|row| row.session.clone())
            .ok_or_else(|| PortError::NotFound("Session not found".to_string()))
    }

    async fn touch_session(&self, session_id: &str) -> PortResult<()> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(session_id) {
            Some(row) if !row.session.is_expired_at(now) => {
                row.session.last_activity_at = now;
                Ok(())
            }
            _ => Err(PortError::NotFound(format!("Session {} not found", session_id))),
        }
    }

    async fn revoke_session(&self, session_id: &str) -> PortResult<()> {
        self.tables
            .write()
            .await
            .sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn list_sessions_for_user(&self, user_id: &str) -> PortResult<Vec<Session>> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|row| row.session.user_id == user_id && !row.session.is_expired_at(now))
            .map(|row| row.session.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, row| row.session.expires_at >= now);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn create_contact_message(&self, input: NewContactMessage) -> PortResult<ContactMessage> {
        let input = normalize_contact(input)?;
        let mut tables = self.tables.write().await;
        tables.next_contact_id += 1;
        let message = ContactMessage {
            id: tables.next_contact_id,
            name: input.name,
            email: input.email,
            phone: input.phone,
            message: input.message,
            status: ContactStatus::New,
            created_at: Utc::now(),
            read_at: None,
            replied_at: None,
        };
        tables.contact_messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_contact_message(&self, id: i64) -> PortResult<ContactMessage> {
        self.tables
            .read()
            .await
            .contact_messages
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Contact message {} not found", id)))
    }

    async fn transition_contact_message(
        &self,
        id: i64,
        event: ContactEvent,
    ) -> PortResult<ContactTransition> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .contact_messages
            .get_mut(&id)
            .ok_or_else(|| PortError::NotFound(format!("Contact message {} not found", id)))?;
        // work on a copy so a rejected transition leaves the row untouched
        let mut next = stored.clone();
        let changed = next.apply(event, Utc::now())?;
        *stored = next.clone();
        Ok(ContactTransition {
            message: next,
            changed,
        })
    }

    async fn list_contact_messages(
        &self,
        status: Option<ContactStatus>,
    ) -> PortResult<Vec<ContactMessage>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<ContactMessage> = tables
            .contact_messages
            .values()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(messages)
    }

    async fn pending_contact_previews(&self) -> PortResult<Vec<ContactPreview>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<&ContactMessage> =
            tables.contact_messages.values().filter(|m| m.is_pending()).collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(pending.into_iter().map(ContactPreview::from).collect())
    }

    async fn append_audit_entry(&self, entry: NewAuditEntry) -> PortResult<AuditLogEntry> {
        validate_audit_entry(&entry)?;
        let mut tables = self.tables.write().await;
        if let Some(user_id) = &entry.user_id {
            if !tables.users.contains_key(user_id) {
                return Err(PortError::ForeignKeyViolation(format!(
                    "user {} does not exist",
                    user_id
                )));
            }
        }
        tables.next_audit_id += 1;
        let written = AuditLogEntry {
            id: tables.next_audit_id,
            user_id: entry.user_id,
            action: entry.action,
            entity: entry.entity,
            entity_id: entry.entity_id,
            details: entry.details,
            ip_address: entry.ip_address,
            created_at: Utc::now(),
        };
        tables.audit_log.push(written.clone());
        Ok(written)
    }

    async fn query_audit_log(&self, query: AuditQuery) -> PortResult<Vec<AuditLogEntry>> {
        // appended in id order, which is also creation order
        Ok(self
            .tables
            .read()
            .await
            .audit_log
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect())
    }

    async fn user_activity_by_role(&self, now: DateTime<Utc>) -> PortResult<Vec<RoleActivity>> {
        let windows = ActivityWindows::ending_at(now);
        let tables = self.tables.read().await;
        Ok(Role::ALL
            .iter()
            .map(|&role| {
                let signed_in: Vec<DateTime<Utc>> = tables
                    .users
                    .values()
                    .filter(|u| u.role == role)
                    .map(|u| u.last_signed_in)
                    .collect();
                let since = |cutoff: DateTime<Utc>| signed_in.iter().filter(|t| **t >= cutoff).count() as i64;
                RoleActivity {
                    role,
                    today: since(windows.start_of_day),
                    last_7_days: since(windows.week_ago),
                    last_30_days: since(windows.month_ago),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn store_with_user(id: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .upsert_user(UpsertUser {
                id: id.to_string(),
                name: Some("Test User".into()),
                email: Some("test@agri.example".into()),
                login_method: Some("google".into()),
                role: None,
            })
            .await
            .unwrap();
        store
    }

    fn new_session(id: &str, user_id: &str, expires_at: DateTime<Utc>) -> NewSession {
        NewSession {
            id: id.to_string(),
            user_id: user_id.to_string(),
            token: format!("token-{}", id),
            expires_at,
            ip_address: Some("203.0.113.7".into()),
            user_agent: Some("test-agent".into()),
        }
    }

    fn contact(message: &str) -> NewContactMessage {
        NewContactMessage {
            name: "Joana".into(),
            email: "joana@quinta.pt".into(),
            phone: None,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn new_users_default_to_the_user_role() {
        let store = store_with_user("u1").await;
        let user = store.get_user("u1").await.unwrap();
        assert_eq!(user.role, Role::User);

        // re-signing in keeps fields the provider left out
        let again = store
            .upsert_user(UpsertUser {
                id: "u1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(again.email.as_deref(), Some("test@agri.example"));
        assert!(again.last_signed_in >= user.last_signed_in);
    }

    #[tokio::test]
    async fn expired_session_is_not_found_before_any_sweep() {
        let store = store_with_user("u1").await;
        let created = store
            .create_session(new_session("s1", "u1", Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();

        assert!(matches!(store.get_session(&created.id).await, Err(PortError::NotFound(_))));
        assert!(matches!(
            store.get_session_by_token("token-s1").await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(store.touch_session("s1").await, Err(PortError::NotFound(_))));
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn live_session_lookup_touch_and_revoke() {
        let store = store_with_user("u1").await;
        let created = store
            .create_session(new_session("s1", "u1", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        assert!(created.expires_at > created.created_at);

        let by_token = store.get_session_by_token("token-s1").await.unwrap();
        assert_eq!(by_token.id, "s1");

        store.touch_session("s1").await.unwrap();
        let touched = store.get_session("s1").await.unwrap();
        assert!(touched.last_activity_at >= created.last_activity_at);

        store.revoke_session("s1").await.unwrap();
        assert!(matches!(store.get_session("s1").await, Err(PortError::NotFound(_))));
        assert!(matches!(store.revoke_session("s1").await, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn session_for_unknown_user_is_a_foreign_key_violation() {
        let store = MemoryStore::new();
        let err = store
            .create_session(new_session("s1", "ghost", Utc::now() + Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::ForeignKeyViolation(_)));
    }

    #[tokio::test]
    async fn colliding_session_keys_are_rejected() {
        let store = store_with_user("u1").await;
        let expires = Utc::now() + Duration::hours(1);
        store.create_session(new_session("s1", "u1", expires)).await.unwrap();

        let same_id = store.create_session(new_session("s1", "u1", expires)).await;
        assert!(matches!(same_id, Err(PortError::DuplicateKey(_))));

        let mut same_token = new_session("s2", "u1", expires);
        same_token.token = "token-s1".into();
        assert!(matches!(
            store.create_session(same_token).await,
            Err(PortError::DuplicateKey(_))
        ));
    }

    #[tokio::test]
    async fn sweeping_twice_deletes_nothing_the_second_time() {
        let store = store_with_user("u1").await;
        let now = Utc::now();
        store.create_session(new_session("old", "u1", now - Duration::days(1))).await.unwrap();
        store.create_session(new_session("live", "u1", now + Duration::days(1))).await.unwrap();

        assert_eq!(store.delete_expired_sessions(now).await.unwrap(), 1);
        assert_eq!(store.delete_expired_sessions(now).await.unwrap(), 0);
        assert_eq!(store.session_count().await, 1);
        assert!(store.get_session("live").await.is_ok());
    }

    #[tokio::test]
    async fn sweep_keeps_sessions_expiring_exactly_now() {
        let store = store_with_user("u1").await;
        let now = Utc::now() + Duration::hours(2);
        store.create_session(new_session("edge", "u1", now)).await.unwrap();
        assert_eq!(store.delete_expired_sessions(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_sessions_and_detaches_audit_entries() {
        let store = store_with_user("u1").await;
        store
            .upsert_user(UpsertUser {
                id: "u2".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let expires = Utc::now() + Duration::hours(1);
        store.create_session(new_session("a", "u1", expires)).await.unwrap();
        store.create_session(new_session("b", "u1", expires)).await.unwrap();
        store.create_session(new_session("c", "u2", expires)).await.unwrap();
        let entry = store
            .append_audit_entry(NewAuditEntry::new("user.login").by("u1"))
            .await
            .unwrap();

        store.delete_user("u1").await.unwrap();

        assert_eq!(store.session_count().await, 1);
        assert!(store.list_sessions_for_user("u1").await.unwrap().is_empty());
        assert!(store.get_session("c").await.is_ok());

        let kept = store
            .query_audit_log(AuditQuery::ByAction("user.login".into()))
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, entry.id);
        assert_eq!(kept[0].user_id, None);
        assert!(matches!(store.delete_user("u1").await, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn audit_entries_need_an_existing_actor() {
        let store = MemoryStore::new();
        let err = store
            .append_audit_entry(NewAuditEntry::new("contact.archive").by("nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::ForeignKeyViolation(_)));

        let anonymous = store
            .append_audit_entry(NewAuditEntry::new("session.sweep").with_details(json!({ "deleted": 3 })))
            .await
            .unwrap();
        assert_eq!(anonymous.user_id, None);
        assert_eq!(anonymous.details, Some(json!({ "deleted": 3 })));
    }

    #[tokio::test]
    async fn audit_queries_filter_and_keep_creation_order() {
        let store = store_with_user("admin").await;
        for (action, id) in [("contact.reply", "1"), ("contact.archive", "1"), ("contact.reply", "2")] {
            store
                .append_audit_entry(NewAuditEntry::new(action).by("admin").on("contact_message", id))
                .await
                .unwrap();
        }

        let by_user = store.query_audit_log(AuditQuery::ByUser("admin".into())).await.unwrap();
        assert_eq!(by_user.len(), 3);
        assert!(by_user.windows(2).all(|w| w[0].id < w[1].id));

        let replies = store
            .query_audit_log(AuditQuery::ByAction("contact.reply".into()))
            .await
            .unwrap();
        assert_eq!(replies.len(), 2);

        let first = store
            .query_audit_log(AuditQuery::ByEntity {
                entity: "contact_message".into(),
                entity_id: "1".into(),
            })
            .await
            .unwrap();
        let actions: Vec<&str> = first.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["contact.reply", "contact.archive"]);
    }

    #[tokio::test]
    async fn pending_view_tracks_the_workflow() {
        let store = MemoryStore::new();
        let first = store.create_contact_message(contact("first")).await.unwrap();
        let second = store.create_contact_message(contact(&"y".repeat(300))).await.unwrap();
        assert_eq!(first.status, ContactStatus::New);

        let pending = store.pending_contact_previews().await.unwrap();
        let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(pending[0].preview.len(), 100);

        let replied = store
            .transition_contact_message(first.id, ContactEvent::Reply)
            .await
            .unwrap()
            .message;
        assert_eq!(replied.status, ContactStatus::Replied);

        let pending = store.pending_contact_previews().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn read_at_survives_the_reply() {
        let store = MemoryStore::new();
        let msg = store.create_contact_message(contact("hello")).await.unwrap();

        let read = store.transition_contact_message(msg.id, ContactEvent::View).await.unwrap();
        assert!(read.changed);
        let read_at = read.message.read_at.expect("view sets read_at");

        let again = store.transition_contact_message(msg.id, ContactEvent::View).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.message.read_at, Some(read_at));

        let replied = store
            .transition_contact_message(msg.id, ContactEvent::Reply)
            .await
            .unwrap()
            .message;
        assert_eq!(replied.read_at, Some(read_at));
        assert!(replied.replied_at.is_some());
        assert_eq!(store.get_contact_message(msg.id).await.unwrap(), replied);
    }

    #[tokio::test]
    async fn rejected_transition_leaves_the_row_alone() {
        let store = MemoryStore::new();
        let msg = store.create_contact_message(contact("bye")).await.unwrap();
        store.transition_contact_message(msg.id, ContactEvent::Archive).await.unwrap();

        let err = store
            .transition_contact_message(msg.id, ContactEvent::Reply)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));

        let stored = store.get_contact_message(msg.id).await.unwrap();
        assert_eq!(stored.status, ContactStatus::Archived);
        assert_eq!(stored.replied_at, None);
        assert!(matches!(
            store.transition_contact_message(999, ContactEvent::View).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_contact_input_is_declined() {
        let store = MemoryStore::new();
        let mut bad = contact("hi");
        bad.email = "nope".into();
        assert!(matches!(
            store.create_contact_message(bad).await,
            Err(PortError::Validation(_))
        ));
        assert!(store.list_contact_messages(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn values_wider_than_their_columns_are_declined() {
        let store = store_with_user("u1").await;
        let long_id = store
            .upsert_user(UpsertUser {
                id: "x".repeat(100),
                ..Default::default()
            })
            .await;
        assert!(matches!(long_id, Err(PortError::Validation(_))));

        let mut session = new_session("s1", "u1", Utc::now() + Duration::hours(1));
        session.ip_address = Some("1".repeat(60));
        assert!(matches!(store.create_session(session).await, Err(PortError::Validation(_))));
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn activity_counts_are_grouped_by_role() {
        let store = store_with_user("a").await;
        store
            .upsert_user(UpsertUser {
                id: "boss".into(),
                role: Some(Role::Admin),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .upsert_user(UpsertUser {
                id: "old".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let now = Utc::now();
        store.set_last_signed_in("a", now).await.unwrap();
        store.set_last_signed_in("boss", now - Duration::days(10)).await.unwrap();
        store.set_last_signed_in("old", now - Duration::days(60)).await.unwrap();

        let rows = store.user_activity_by_role(now).await.unwrap();
        let user = rows.iter().find(|r| r.role == Role::User).unwrap();
        let admin = rows.iter().find(|r| r.role == Role::Admin).unwrap();

        assert_eq!((user.today, user.last_7_days, user.last_30_days), (1, 1, 1));
        assert_eq!((admin.today, admin.last_7_days, admin.last_30_days), (0, 0, 1));
    }
}
