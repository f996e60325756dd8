//! In-memory mailbox backed by a YAML snapshot.
//!
//! Used as the transport for offline runs (`--mailbox FILE`) and as the test
//! double for the engine. Failures can be injected per operation to exercise
//! the retry path.

use super::{Mailbox, Message, MessageRef};
use crate::error::{MailboxError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// A mutation recorded by [`MemoryMailbox`], in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxOp {
    Delete(MessageRef),
    Copy { from: MessageRef, to: MessageRef },
    Move { from: MessageRef, to: MessageRef },
    MarkRead(MessageRef),
    ClearFlag(MessageRef),
    SetCategory(MessageRef, String),
    Forward(MessageRef, Vec<String>),
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemoryMailbox {
    #[serde(default)]
    folders: BTreeMap<String, Vec<Message>>,
    #[serde(skip)]
    operations: Vec<MailboxOp>,
    #[serde(skip)]
    failures: HashMap<String, u32>,
    #[serde(skip)]
    next_id: u64,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut mailbox: MemoryMailbox = serde_yaml::from_str(&content)?;
        for (folder, messages) in mailbox.folders.iter_mut() {
            for (index, message) in messages.iter_mut().enumerate() {
                message.folder = folder.clone();
                if message.id.is_empty() {
                    message.id = format!("{folder}-{index}");
                }
            }
        }
        Ok(mailbox)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn add_folder(&mut self, name: &str) {
        self.folders.entry(name.to_string()).or_default();
    }

    /// Store a message in `folder`, creating the folder if needed.
    pub fn add_message(&mut self, folder: &str, mut message: Message) -> MessageRef {
        if message.id.is_empty() {
            message.id = self.allocate_id();
        }
        message.folder = folder.to_string();
        let reference = message.reference();
        self.folders
            .entry(folder.to_string())
            .or_default()
            .push(message);
        reference
    }

    /// Current contents of a folder in storage order.
    pub fn messages(&self, folder: &str) -> &[Message] {
        self.folders.get(folder).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, reference: &MessageRef) -> Option<&Message> {
        self.messages(&reference.folder)
            .iter()
            .find(|m| m.id == reference.id)
    }

    pub fn operations(&self) -> &[MailboxOp] {
        &self.operations
    }

    /// Make the next `times` calls of `operation` fail transiently.
    pub fn fail_next(&mut self, operation: &str, times: u32) {
        self.failures.insert(operation.to_string(), times);
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("msg-{}", self.next_id)
    }

    fn maybe_fail(&mut self, operation: &'static str) -> std::result::Result<(), MailboxError> {
        if let Some(remaining) = self.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MailboxError::Transient(format!(
                    "injected {operation} failure"
                )));
            }
        }
        Ok(())
    }

    fn folder_mut(&mut self, folder: &str) -> std::result::Result<&mut Vec<Message>, MailboxError> {
        self.folders
            .get_mut(folder)
            .ok_or_else(|| MailboxError::FolderNotFound(folder.to_string()))
    }

    fn message_mut(
        &mut self,
        reference: &MessageRef,
    ) -> std::result::Result<&mut Message, MailboxError> {
        self.folder_mut(&reference.folder)?
            .iter_mut()
            .find(|m| m.id == reference.id)
            .ok_or_else(|| MailboxError::MessageNotFound(reference.to_string()))
    }

    fn take(&mut self, reference: &MessageRef) -> std::result::Result<Message, MailboxError> {
        let folder = self.folder_mut(&reference.folder)?;
        let index = folder
            .iter()
            .position(|m| m.id == reference.id)
            .ok_or_else(|| MailboxError::MessageNotFound(reference.to_string()))?;
        Ok(folder.remove(index))
    }
}

impl Mailbox for MemoryMailbox {
    fn enumerate(
        &mut self,
        folder: &str,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<Message>, MailboxError> {
        self.maybe_fail("enumerate")?;
        let messages = self
            .folders
            .get(folder)
            .ok_or_else(|| MailboxError::FolderNotFound(folder.to_string()))?;

        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| m.received >= since)
            .cloned()
            .map(|mut m| {
                m.folder = folder.to_string();
                m
            })
            .collect();
        found.sort_by(|a, b| b.received.cmp(&a.received));
        Ok(found)
    }

    fn delete(&mut self, message: &MessageRef) -> std::result::Result<(), MailboxError> {
        self.maybe_fail("delete")?;
        self.take(message)?;
        self.operations.push(MailboxOp::Delete(message.clone()));
        Ok(())
    }

    fn copy_to(
        &mut self,
        message: &MessageRef,
        target: &str,
    ) -> std::result::Result<MessageRef, MailboxError> {
        self.maybe_fail("copy")?;
        self.folder_mut(target)?;
        let mut copy = self.message_mut(message)?.clone();
        copy.id = self.allocate_id();
        copy.folder = target.to_string();
        let to = copy.reference();
        self.folder_mut(target)?.push(copy);
        self.operations.push(MailboxOp::Copy {
            from: message.clone(),
            to: to.clone(),
        });
        Ok(to)
    }

    fn move_to(
        &mut self,
        message: &MessageRef,
        target: &str,
    ) -> std::result::Result<MessageRef, MailboxError> {
        self.maybe_fail("move")?;
        self.folder_mut(target)?;
        let mut moved = self.take(message)?;
        moved.folder = target.to_string();
        let to = moved.reference();
        self.folder_mut(target)?.push(moved);
        self.operations.push(MailboxOp::Move {
            from: message.clone(),
            to: to.clone(),
        });
        Ok(to)
    }

    fn mark_read(&mut self, message: &MessageRef) -> std::result::Result<(), MailboxError> {
        self.maybe_fail("mark_read")?;
        self.message_mut(message)?.unread = false;
        self.operations.push(MailboxOp::MarkRead(message.clone()));
        Ok(())
    }

    fn clear_flag(&mut self, message: &MessageRef) -> std::result::Result<(), MailboxError> {
        self.maybe_fail("clear_flag")?;
        self.message_mut(message)?.flagged = false;
        self.operations.push(MailboxOp::ClearFlag(message.clone()));
        Ok(())
    }

    fn set_category(
        &mut self,
        message: &MessageRef,
        category: &str,
    ) -> std::result::Result<(), MailboxError> {
        self.maybe_fail("set_category")?;
        self.message_mut(message)?.categories = vec![category.to_string()];
        self.operations
            .push(MailboxOp::SetCategory(message.clone(), category.to_string()));
        Ok(())
    }

    fn forward(
        &mut self,
        message: &MessageRef,
        recipients: &[String],
    ) -> std::result::Result<(), MailboxError> {
        self.maybe_fail("forward")?;
        self.message_mut(message)?;
        self.operations
            .push(MailboxOp::Forward(message.clone(), recipients.to_vec()));
        Ok(())
    }
}
