//! Handler-level tests against the in-memory store.
//!
//! Run with: cargo test -p api --test http_flows

use std::sync::Arc;

use agrisite_core::domain::{AuditQuery, ContactStatus, NewSession, Role, UpsertUser};
use agrisite_core::ports::{DatabaseService, PortError};
use api_lib::adapters::MemoryStore;
use api_lib::config::Config;
use api_lib::web::admin::{
    delete_user_handler, pending_messages_handler, reply_message_handler, sweep_sessions_handler,
    view_message_handler,
};
use api_lib::web::auth::{issue_session, login_handler, logout_handler, LoginRequest};
use api_lib::web::middleware::authenticate;
use api_lib::web::rest::{submit_contact_handler, ContactRequest};
use api_lib::web::state::{AppState, CurrentUser};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use axum::{Extension, Json};
use chrono::{Duration, Utc};

const ADMIN_PASSWORD: &str = "tractor-harvest-42";

/// Cheap argon2 parameters so the tests stay fast; verification reads them from the hash.
fn admin_password_hash() -> String {
    let salt = SaltString::from_b64("YWdyaXNpdGV0ZXN0c2FsdA").unwrap();
    let params = Params::new(1024, 1, 1, None).unwrap();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(ADMIN_PASSWORD.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

fn test_config_with(admin_hash: Option<String>) -> Arc<Config> {
    let config = Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://unused/agrisite".to_string()),
        "COOKIE_SECURE" => Some("false".to_string()),
        "ADMIN_PASSWORD_HASH" => admin_hash.clone(),
        _ => None,
    })
    .expect("test configuration is valid");
    Arc::new(config)
}

fn test_config() -> Arc<Config> {
    test_config_with(Some(admin_password_hash()))
}

fn setup() -> (Arc<MemoryStore>, Arc<AppState>) {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(store.clone(), test_config()));
    (store, state)
}

fn login_as(open_id: &str, admin_password: Option<&str>) -> LoginRequest {
    LoginRequest {
        open_id: open_id.into(),
        name: None,
        email: None,
        login_method: None,
        admin_password: admin_password.map(str::to_string),
    }
}

async fn admin(store: &MemoryStore) -> CurrentUser {
    let user = store
        .upsert_user(UpsertUser {
            id: "admin-1".into(),
            name: Some("Site Admin".into()),
            email: Some("admin@agri.example".into()),
            login_method: Some("email".into()),
            role: Some(Role::Admin),
        })
        .await
        .unwrap();
    CurrentUser {
        user,
        session_id: "admin-session".into(),
    }
}

fn contact_form(message: &str) -> ContactRequest {
    ContactRequest {
        name: "Carlos".into(),
        email: "carlos@fazenda.br".into(),
        phone: Some("+55 11 99999-0000".into()),
        message: message.into(),
    }
}

fn cookie_headers(set_cookie: &str) -> HeaderMap {
    let pair = set_cookie.split(';').next().unwrap().to_string();
    let mut headers = HeaderMap::new();
    headers.insert(header::COOKIE, HeaderValue::from_str(&pair).unwrap());
    headers
}

#[tokio::test]
async fn contact_message_leaves_the_pending_list_once_replied() {
    let (store, state) = setup();
    let current = admin(&store).await;

    let response = submit_contact_handler(State(state.clone()), Json(contact_form("Need soil analytics")))
        .await
        .unwrap()
        .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);

    let pending = pending_messages_handler(State(state.clone())).await.unwrap().0;
    assert_eq!(pending.len(), 1);
    let id = pending[0].id;
    assert_eq!(pending[0].preview, "Need soil analytics");

    let replied = reply_message_handler(
        State(state.clone()),
        Extension(current.clone()),
        HeaderMap::new(),
        Path(id),
    )
    .await
    .unwrap()
    .0;
    assert_eq!(replied.status, "replied");
    assert!(replied.read_at.is_some());

    assert!(pending_messages_handler(State(state.clone())).await.unwrap().0.is_empty());

    let trail = store
        .query_audit_log(AuditQuery::ByEntity {
            entity: "contact_message".into(),
            entity_id: id.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "contact.reply");
    assert_eq!(trail[0].user_id.as_deref(), Some("admin-1"));
}

#[tokio::test]
async fn viewing_marks_read_once_and_archived_messages_stay_viewable() {
    let (store, state) = setup();
    let current = admin(&store).await;
    submit_contact_handler(State(state.clone()), Json(contact_form("Drone imagery?")))
        .await
        .unwrap();
    let id = store.list_contact_messages(None).await.unwrap()[0].id;

    let view = |state: Arc<AppState>, id: i64| {
        view_message_handler(State(state), Extension(current.clone()), HeaderMap::new(), Path(id))
    };

    let first = view(state.clone(), id).await.unwrap().0;
    assert_eq!(first.status, "read");
    let second = view(state.clone(), id).await.unwrap().0;
    assert_eq!(second.read_at, first.read_at);

    let views = store
        .query_audit_log(AuditQuery::ByAction("contact.view".into()))
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].user_id.as_deref(), Some("admin-1"));
    assert_eq!(views[0].entity_id, Some(id.to_string()));

    api_lib::web::admin::archive_message_handler(
        State(state.clone()),
        Extension(current.clone()),
        HeaderMap::new(),
        Path(id),
    )
    .await
    .unwrap();
    let archived = view(state.clone(), id).await.unwrap().0;
    assert_eq!(archived.status, ContactStatus::Archived.as_str());

    let (status, _) = view(state, id + 100).await.unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_contact_submission_is_a_bad_request() {
    let (store, state) = setup();
    let mut form = contact_form("hello");
    form.email = "carlos-at-fazenda".into();

    let (status, message) = submit_contact_handler(State(state), Json(form)).await.err().unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message.contains("email"));
    assert!(store.list_contact_messages(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn login_issues_a_cookie_that_authenticates_until_logout() {
    let (store, state) = setup();
    let request = LoginRequest {
        open_id: "google|42".into(),
        name: Some("Ines".into()),
        email: Some("ines@olival.pt".into()),
        login_method: Some("google".into()),
        admin_password: None,
    };

    let response = login_handler(State(state.clone()), HeaderMap::new(), Json(request))
        .await
        .unwrap()
        .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("session="));
    assert!(set_cookie.contains("HttpOnly"));

    let headers = cookie_headers(&set_cookie);
    let current = authenticate(&state, &headers).await.unwrap();
    assert_eq!(current.user.id, "google|42");
    assert_eq!(current.user.role, Role::User);

    let logout = logout_handler(State(state.clone()), headers.clone())
        .await
        .unwrap()
        .into_response();
    assert_eq!(logout.status(), StatusCode::OK);
    assert_eq!(authenticate(&state, &headers).await.unwrap_err(), StatusCode::UNAUTHORIZED);
    assert_eq!(store.session_count().await, 0);

    let logins = store
        .query_audit_log(AuditQuery::ByAction("user.login".into()))
        .await
        .unwrap();
    assert_eq!(logins.len(), 1);
}

#[tokio::test]
async fn expired_cookie_is_rejected_without_a_sweep() {
    let (store, state) = setup();
    store
        .upsert_user(UpsertUser {
            id: "u-expired".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .create_session(NewSession {
            id: "s-expired".into(),
            user_id: "u-expired".into(),
            token: "stale-token".into(),
            expires_at: Utc::now() - Duration::seconds(1),
            ip_address: None,
            user_agent: None,
        })
        .await
        .unwrap();

    let headers = cookie_headers("session=stale-token");
    assert_eq!(authenticate(&state, &headers).await.unwrap_err(), StatusCode::UNAUTHORIZED);
    assert_eq!(store.session_count().await, 1);
}

#[tokio::test]
async fn deleting_a_user_keeps_their_audit_trail() {
    let (store, state) = setup();
    let current = admin(&store).await;
    store
        .upsert_user(UpsertUser {
            id: "farmer".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    login_handler(State(state.clone()), HeaderMap::new(), Json(login_as("farmer", None)))
        .await
        .unwrap();
    assert_eq!(store.list_sessions_for_user("farmer").await.unwrap().len(), 1);

    let response = delete_user_handler(
        State(state.clone()),
        Extension(current.clone()),
        HeaderMap::new(),
        Path("farmer".to_string()),
    )
    .await
    .unwrap()
    .into_response();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(store.session_count().await, 0);
    let logins = store
        .query_audit_log(AuditQuery::ByAction("user.login".into()))
        .await
        .unwrap();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].user_id, None);

    let deletions = store
        .query_audit_log(AuditQuery::ByUser("admin-1".into()))
        .await
        .unwrap();
    assert_eq!(deletions.len(), 1);
    assert_eq!(deletions[0].action, "user.delete");
    assert_eq!(deletions[0].entity_id.as_deref(), Some("farmer"));

    let (status, _) = delete_user_handler(
        State(state),
        Extension(current),
        HeaderMap::new(),
        Path("admin-1".to_string()),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_sweep_reports_and_audits_the_deleted_count() {
    let (store, state) = setup();
    let current = admin(&store).await;
    for (id, hours) in [("gone-1", -3), ("gone-2", -1), ("kept", 5)] {
        store
            .create_session(NewSession {
                id: id.into(),
                user_id: "admin-1".into(),
                token: format!("tok-{}", id),
                expires_at: Utc::now() + Duration::hours(hours),
                ip_address: None,
                user_agent: None,
            })
            .await
            .unwrap();
    }

    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("192.0.2.10"));
    let swept = sweep_sessions_handler(State(state.clone()), Extension(current.clone()), headers)
        .await
        .unwrap()
        .0;
    assert_eq!(swept.deleted, 2);

    let again = sweep_sessions_handler(State(state), Extension(current), HeaderMap::new())
        .await
        .unwrap()
        .0;
    assert_eq!(again.deleted, 0);

    let sweeps = store
        .query_audit_log(AuditQuery::ByAction("session.sweep".into()))
        .await
        .unwrap();
    assert_eq!(sweeps.len(), 2);
    assert_eq!(sweeps[0].ip_address.as_deref(), Some("192.0.2.10"));
    assert_eq!(sweeps[0].details, Some(serde_json::json!({ "deleted": 2 })));
}

#[tokio::test]
async fn admin_accounts_need_the_configured_password() {
    let (store, state) = setup();
    admin(&store).await;

    for password in [None, Some("guess")] {
        let (status, _) = login_handler(
            State(state.clone()),
            HeaderMap::new(),
            Json(login_as("admin-1", password)),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(store.session_count().await, 0);
    let denied = store
        .query_audit_log(AuditQuery::ByAction("user.login_denied".into()))
        .await
        .unwrap();
    assert_eq!(denied.len(), 2);
    assert_eq!(denied[0].user_id, None);

    let response = login_handler(
        State(state.clone()),
        HeaderMap::new(),
        Json(login_as("admin-1", Some(ADMIN_PASSWORD))),
    )
    .await
    .unwrap()
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    let current = authenticate(&state, &cookie_headers(set_cookie)).await.unwrap();
    assert_eq!(current.user.role, Role::Admin);
}

#[tokio::test]
async fn admin_sign_in_is_closed_without_a_configured_hash() {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(store.clone(), test_config_with(None)));
    admin(&store).await;

    let (status, _) = login_handler(
        State(state.clone()),
        HeaderMap::new(),
        Json(login_as("admin-1", Some(ADMIN_PASSWORD))),
    )
    .await
    .err()
    .unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // ordinary users are unaffected
    login_handler(State(state), HeaderMap::new(), Json(login_as("grower", None)))
        .await
        .unwrap();
    assert_eq!(store.session_count().await, 1);
}

#[tokio::test]
async fn unrepresentable_session_expiry_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    let mut config = (*test_config_with(None)).clone();
    config.session_ttl = Duration::days(100_000_000);
    let state = AppState::new(store.clone(), Arc::new(config));
    store
        .upsert_user(UpsertUser {
            id: "u1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = issue_session(&state, "u1", None, None).await.unwrap_err();
    assert!(matches!(err, PortError::Unexpected(_)));
    assert_eq!(store.session_count().await, 0);
}

#[tokio::test]
async fn junk_forwarded_address_does_not_break_login() {
    let (store, state) = setup();
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_str(&"9".repeat(60)).unwrap());

    let response = login_handler(State(state), headers, Json(login_as("grower", None)))
        .await
        .unwrap()
        .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let sessions = store.list_sessions_for_user("grower").await.unwrap();
    assert_eq!(sessions[0].ip_address, None);
}
