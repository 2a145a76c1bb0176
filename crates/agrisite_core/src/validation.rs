//! crates/agrisite_core/src/validation.rs
//!
//! Input checks applied before anything reaches a store.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::{NewAuditEntry, NewContactMessage, NewSession, UpsertUser};
use crate::ports::{PortError, PortResult};

// Mirrors the column widths in the migrations.
pub const MAX_ID_CHARS: usize = 64;
pub const MAX_LOGIN_METHOD_CHARS: usize = 64;
pub const MAX_TOKEN_CHARS: usize = 255;
pub const MAX_IP_CHARS: usize = 45;
pub const MAX_AUDIT_FIELD_CHARS: usize = 100;
pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_PHONE_CHARS: usize = 50;
pub const MAX_MESSAGE_CHARS: usize = 5000;
pub const MAX_EMAIL_CHARS: usize = 320;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
    })
}

pub fn is_valid_email(email: &str) -> bool {
    email.chars().count() <= MAX_EMAIL_CHARS && email_pattern().is_match(email)
}

fn required(field: &str, value: &str, max_chars: usize) -> PortResult<()> {
    if value.trim().is_empty() {
        return Err(PortError::Validation(format!("{} is required", field)));
    }
    if value.chars().count() > max_chars {
        return Err(PortError::Validation(format!(
            "{} must be at most {} characters",
            field, max_chars
        )));
    }
    Ok(())
}

fn optional(field: &str, value: Option<&str>, max_chars: usize) -> PortResult<()> {
    match value {
        Some(value) if value.chars().count() > max_chars => Err(PortError::Validation(format!(
            "{} must be at most {} characters",
            field, max_chars
        ))),
        _ => Ok(()),
    }
}

/// Trims every field and rejects blank or malformed input.
pub fn normalize_contact(input: NewContactMessage) -> PortResult<NewContactMessage> {
    let name = input.name.trim().to_string();
    let email = input.email.trim().to_string();
    let message = input.message.trim().to_string();
    let phone = input
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    required("name", &name, MAX_NAME_CHARS)?;
    required("email", &email, MAX_EMAIL_CHARS)?;
    required("message", &message, MAX_MESSAGE_CHARS)?;
    if let Some(phone) = &phone {
        required("phone", phone, MAX_PHONE_CHARS)?;
    }
    if !is_valid_email(&email) {
        return Err(PortError::Validation(format!("'{}' is not a valid email address", email)));
    }

    Ok(NewContactMessage {
        name,
        email,
        phone,
        message,
    })
}

/// Identity providers may leave out name and email, but the id is mandatory
/// and an email, when present, has to look like one.
pub fn validate_upsert_user(input: &UpsertUser) -> PortResult<()> {
    required("id", &input.id, MAX_ID_CHARS)?;
    optional("login_method", input.login_method.as_deref(), MAX_LOGIN_METHOD_CHARS)?;
    if let Some(email) = input.email.as_deref().filter(|e| !e.is_empty()) {
        if !is_valid_email(email) {
            return Err(PortError::Validation(format!("'{}' is not a valid email address", email)));
        }
    }
    Ok(())
}

pub fn validate_new_session(input: &NewSession) -> PortResult<()> {
    required("session id", &input.id, MAX_ID_CHARS)?;
    required("user id", &input.user_id, MAX_ID_CHARS)?;
    required("token", &input.token, MAX_TOKEN_CHARS)?;
    optional("ip_address", input.ip_address.as_deref(), MAX_IP_CHARS)
}

pub fn validate_audit_entry(entry: &NewAuditEntry) -> PortResult<()> {
    required("action", &entry.action, MAX_AUDIT_FIELD_CHARS)?;
    optional("entity", entry.entity.as_deref(), MAX_AUDIT_FIELD_CHARS)?;
    optional("entity_id", entry.entity_id.as_deref(), MAX_AUDIT_FIELD_CHARS)?;
    optional("ip_address", entry.ip_address.as_deref(), MAX_IP_CHARS)
}
