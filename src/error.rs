//! Unified error type for the crate.

use thiserror::Error;

/// Errors surfaced by the mailbox watcher and the message decoder.
///
/// Session-level failures that occur on the monitoring path are additionally
/// broadcast as [`WatcherEvent::Error`](crate::imap::WatcherEvent::Error) so
/// long-lived observers learn of them outside the call stack.
#[derive(Debug, Clone, Error)]
pub enum MailwatchError {
    #[error("IMAP not connected")]
    NotConnected,

    #[error("message {0} not found or has no body")]
    NotFound(u32),

    #[error("IMAP session error: {0}")]
    Session(String),

    #[error("cannot parse message: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MailwatchError {
    fn from(err: std::io::Error) -> Self {
        MailwatchError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for MailwatchError {
    fn from(err: toml::de::Error) -> Self {
        MailwatchError::Config(err.to_string())
    }
}

impl From<async_imap::error::Error> for MailwatchError {
    fn from(err: async_imap::error::Error) -> Self {
        MailwatchError::Session(err.to_string())
    }
}

impl From<mailparse::MailParseError> for MailwatchError {
    fn from(err: mailparse::MailParseError) -> Self {
        MailwatchError::Parse(err.to_string())
    }
}

/// Result type alias using [`MailwatchError`].
pub type Result<T> = std::result::Result<T, MailwatchError>;
