//! Error taxonomy for command dispatch and alias persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Reply shown when the permission gate refuses a command.
pub const NOT_PERMITTED_REPLY: &str = "You do not have permissions to use this command.";

#[derive(Debug, Error)]
pub enum BotError {
    /// The first token of the line is not a registered keyword.
    #[error("Failed to recognise the command {0:?}")]
    UnknownCommand(String),

    /// An alias to remove or a command to describe does not exist.
    #[error("{kind} {name:?} doesn't exist")]
    NotFound { kind: &'static str, name: String },

    #[error("{0:?} is a registered command/alias and cannot be set as an alias")]
    ReservedName(String),

    #[error("{caller} is not allowed to execute the {keyword} command")]
    PermissionDenied { caller: String, keyword: String },

    /// Wrong number or shape of arguments for a built-in command.
    #[error("{0}")]
    Usage(String),

    #[error("Failed to read alias file {path:?}: {source}")]
    AliasLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save aliases to {path:?}: {source}")]
    AliasSave {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse alias file {path:?}: {source}")]
    AliasParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported alias file version {0}")]
    UnsupportedVersion(u32),

    /// A local program behind a built-in failed to start or exited non-zero.
    #[error("Failed to run {program}: {source}")]
    Process {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl BotError {
    /// Text to post back to the channel for this failure, or `None` when the
    /// bot should stay silent.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            BotError::UnknownCommand(_) => None,
            BotError::PermissionDenied { .. } => Some(NOT_PERMITTED_REPLY.to_string()),
            BotError::AliasSave { .. } => {
                Some("❌ Failed to save aliases, the change was not applied.".to_string())
            }
            other => Some(format!("❌ {}", other)),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        BotError::NotFound {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_is_silent() {
        let err = BotError::UnknownCommand("nope".to_string());
        assert!(err.reply_text().is_none());
    }

    #[test]
    fn test_permission_denied_uses_fixed_reply() {
        let err = BotError::PermissionDenied {
            caller: "someone#0001".to_string(),
            keyword: "config".to_string(),
        };
        assert_eq!(err.reply_text().as_deref(), Some(NOT_PERMITTED_REPLY));
    }

    #[test]
    fn test_save_failure_is_visible() {
        let err = BotError::AliasSave {
            path: PathBuf::from("aliases.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        assert!(err.reply_text().unwrap().contains("Failed to save"));
    }

    #[test]
    fn test_reserved_name_message() {
        let err = BotError::ReservedName("help".to_string());
        let text = err.reply_text().unwrap();
        assert!(text.contains("\"help\" is a registered command/alias"));
    }
}
