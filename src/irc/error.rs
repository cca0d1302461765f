use std::time::Duration;

use thiserror::Error;

/// Process exit statuses, one per phase that can end the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok = 0,
    Interrupt = 1,
    BadConfig = 2,
    ConnectionFailure = 11,
    MessageTimeout = 12,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Failures that end a session. Non-critical send timeouts, handler errors
/// and malformed lines are absorbed inside the session and never show up here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no address found for {host}")]
    NoAddress { host: String },

    #[error("timed out after {timeout:?} connecting to {host}:{port}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out sending critical message: {line}")]
    CriticalTimeout { line: String },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session is not connected")]
    NotConnected,
}

impl SessionError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            SessionError::Resolve { .. }
            | SessionError::NoAddress { .. }
            | SessionError::ConnectTimeout { .. }
            | SessionError::Connect { .. }
            | SessionError::NotConnected => ExitStatus::ConnectionFailure,
            SessionError::CriticalTimeout { .. } => ExitStatus::MessageTimeout,
            SessionError::Io(_) => ExitStatus::ConnectionFailure,
        }
    }
}
