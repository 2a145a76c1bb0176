//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-request identity the
//! auth middleware attaches.

use crate::config::Config;
use agrisite_core::domain::{NewAuditEntry, User};
use agrisite_core::ports::DatabaseService;
use std::sync::Arc;
use tracing::error;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Arc<dyn DatabaseService>, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    /// Appends an audit entry for an action that has already happened.
    ///
    /// The action itself is not rolled back if this fails, so the failure is
    /// only logged.
    pub async fn record_audit(&self, entry: NewAuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.db.append_audit_entry(entry).await {
            error!(action = %action, error = %e, "Failed to write audit entry");
        }
    }
}

//=========================================================================================
// CurrentUser (Specific to One Authenticated Request)
//=========================================================================================

/// Inserted into the request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session_id: String,
}
