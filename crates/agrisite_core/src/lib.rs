pub mod contact;
pub mod domain;
pub mod ports;
pub mod validation;

pub use contact::{ContactEvent, ContactTransition, TransitionError};
pub use domain::{
    AuditLogEntry, AuditQuery, ContactMessage, ContactPreview, ContactStatus, NewAuditEntry,
    NewContactMessage, NewSession, Role, RoleActivity, Session, UpsertUser, User,
};
pub use ports::{ActivityWindows, DatabaseService, PortError, PortResult};
