//! Mailbox transport boundary.
//!
//! The engine never holds on to a transport's own message objects. Each
//! enumeration returns owned [`Message`] snapshots, and every mutation goes
//! back through the [`Mailbox`] with a [`MessageRef`]. A mutating call may
//! invalidate any earlier enumeration of the same folder, so callers must
//! enumerate again rather than reuse old snapshots.

pub mod memory;

pub use memory::{MailboxOp, MemoryMailbox};

use crate::error::MailboxError;
use crate::normalization::combine_header_lines;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Location of a message inside a mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub folder: String,
    pub id: String,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.id)
    }
}

/// Read-only snapshot of one message as reported by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing)]
    pub folder: String,
    #[serde(default)]
    pub sender_address: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    /// Raw transport headers, unfolded.
    #[serde(default)]
    pub headers: String,
    #[serde(default = "Utc::now")]
    pub received: DateTime<Utc>,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            id: String::new(),
            folder: String::new(),
            sender_address: String::new(),
            sender_name: String::new(),
            subject: String::new(),
            body: String::new(),
            html_body: None,
            headers: String::new(),
            received: Utc::now(),
            unread: true,
            flagged: false,
            categories: Vec::new(),
        }
    }
}

impl Message {
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            folder: self.folder.clone(),
            id: self.id.clone(),
        }
    }

    /// Headers with continuation lines folded, sanitized and lowercased.
    pub fn header_text(&self) -> String {
        combine_header_lines(&self.headers)
    }

    pub fn sender_lower(&self) -> String {
        self.sender_address.trim().to_lowercase()
    }
}

/// Operations the engine may perform against a mail store.
///
/// Every mutating operation may fail transiently and is wrapped in a retry
/// by the caller.
pub trait Mailbox {
    /// Messages in `folder` received at or after `since`, most recent first.
    fn enumerate(
        &mut self,
        folder: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, MailboxError>;

    fn delete(&mut self, message: &MessageRef) -> Result<(), MailboxError>;

    /// Copy into `target`, returning the location of the copy.
    fn copy_to(&mut self, message: &MessageRef, target: &str)
        -> Result<MessageRef, MailboxError>;

    /// Move into `target`, returning the new location.
    fn move_to(&mut self, message: &MessageRef, target: &str)
        -> Result<MessageRef, MailboxError>;

    fn mark_read(&mut self, message: &MessageRef) -> Result<(), MailboxError>;

    fn clear_flag(&mut self, message: &MessageRef) -> Result<(), MailboxError>;

    fn set_category(&mut self, message: &MessageRef, category: &str)
        -> Result<(), MailboxError>;

    fn forward(&mut self, message: &MessageRef, recipients: &[String])
        -> Result<(), MailboxError>;
}
