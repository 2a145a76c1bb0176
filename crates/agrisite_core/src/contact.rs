//! crates/agrisite_core/src/contact.rs
//!
//! The contact message workflow. Every store adapter applies transitions
//! through [`ContactMessage::apply`] so the set-once timestamps behave the
//! same whatever holds the rows.

use chrono::{DateTime, Utc};

use crate::domain::{ContactMessage, ContactStatus};

/// Something an administrator does to a contact message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactEvent {
    View,
    Reply,
    Archive,
}

impl ContactEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactEvent::View => "view",
            ContactEvent::Reply => "reply",
            ContactEvent::Archive => "archive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} a contact message that is {}", .event.as_str(), .from.as_str())]
pub struct TransitionError {
    pub from: ContactStatus,
    pub event: ContactEvent,
}

/// What a store reports back after applying an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactTransition {
    pub message: ContactMessage,
    /// `false` when the event left the message exactly as it was.
    pub changed: bool,
}

impl ContactMessage {
    /// Applies `event` at time `now` and reports whether anything changed.
    ///
    /// `read_at` and `replied_at` are only ever written while still unset.
    pub fn apply(&mut self, event: ContactEvent, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        let before = (self.status, self.read_at, self.replied_at);

        match (self.status, event) {
            (ContactStatus::Archived, ContactEvent::Archive) => {}
            (ContactStatus::Archived, event) => {
                return Err(TransitionError {
                    from: ContactStatus::Archived,
                    event,
                })
            }
            (_, ContactEvent::Archive) => self.status = ContactStatus::Archived,
            (ContactStatus::New, ContactEvent::View) => self.mark_read(now),
            (_, ContactEvent::View) => {}
            (ContactStatus::New, ContactEvent::Reply) => {
                self.mark_read(now);
                self.mark_replied(now);
            }
            (ContactStatus::Read, ContactEvent::Reply) => self.mark_replied(now),
            (ContactStatus::Replied, ContactEvent::Reply) => {}
        }

        Ok(before != (self.status, self.read_at, self.replied_at))
    }

    fn mark_read(&mut self, now: DateTime<Utc>) {
        self.status = ContactStatus::Read;
        self.read_at.get_or_insert(now);
    }

    fn mark_replied(&mut self, now: DateTime<Utc>) {
        self.status = ContactStatus::Replied;
        self.replied_at.get_or_insert(now);
    }

    pub fn is_pending(&self) -> bool {
        self.status == ContactStatus::New
    }
}
