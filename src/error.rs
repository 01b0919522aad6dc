// src/error.rs

use thiserror::Error;

/// Errors surfaced by the chat core.
///
/// Transport variants end a stream with a `FAIL` marker, validation variants
/// reject an import before the store is touched, storage variants propagate to
/// whoever triggered the write.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid backup file format: {0}")]
    InvalidBackup(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Malformed stream chunk: {0}")]
    MalformedChunk(String),

    #[error("Render worker is not running")]
    WorkerClosed,

    #[error("Image error: {0}")]
    Image(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn invalid_backup(message: impl Into<String>) -> Self {
        Self::InvalidBackup(message.into())
    }

    /// Network failure, non-2xx status or a broken stream.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidBackup(_))
    }

    /// A single bad frame; the stream it came from is still healthy.
    pub fn is_malformed_chunk(&self) -> bool {
        matches!(self, Self::MalformedChunk(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_kinds() {
        assert!(ChatError::transport("down").is_transport());
        assert!(ChatError::Http {
            status: 401,
            message: "bad key".into()
        }
        .is_transport());
        assert!(ChatError::invalid_backup("missing sessions").is_validation());
        assert!(ChatError::MalformedChunk("{".into()).is_malformed_chunk());
        assert!(!ChatError::WorkerClosed.is_transport());
    }

    #[test]
    fn backup_error_message_names_the_format() {
        let err = ChatError::invalid_backup("Missing required fields (sessions/chats)");
        assert_eq!(
            err.to_string(),
            "Invalid backup file format: Missing required fields (sessions/chats)"
        );
    }
}
