use thiserror::Error;

/// Failures reported by a mailbox transport.
///
/// Only [`MailboxError::Transient`] is worth retrying; the others describe a
/// message or folder that will not appear by waiting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailboxError {
    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("transient mailbox error: {0}")]
    Transient(String),
}

impl MailboxError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MailboxError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("invalid pattern '{pattern}': {message}")]
    PatternCompile { pattern: String, message: String },

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("corpus parse error in {path}: {message}")]
    CorpusParse { path: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, SweepError>;
