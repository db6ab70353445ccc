//! Error handling for the chat relay

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat relay error types
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Socket-level errors: closed connections, read/write failures
    Connection(String),
    /// Input that failed validation: bad names, oversized messages
    Validation(String),
    /// Capacity limits: server full, name in use, name-change budget spent
    Capacity(String),
    /// Message sent inside the rate-limit window
    RateLimited(String),
    /// Server lifecycle misuse: double start, stopped server
    Lifecycle(String),
    /// Transcript log sink failures
    Logging(String),
}

impl ChatError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Connection(_) => 1000,
            ChatError::Validation(_) => 1001,
            ChatError::Capacity(_) => 1002,
            ChatError::RateLimited(_) => 1003,
            ChatError::Lifecycle(_) => 1004,
            ChatError::Logging(_) => 1005,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Connection(msg) => msg,
            ChatError::Validation(msg) => msg,
            ChatError::Capacity(msg) => msg,
            ChatError::RateLimited(msg) => msg,
            ChatError::Lifecycle(msg) => msg,
            ChatError::Logging(msg) => msg,
        }
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        ChatError::Connection(msg.into())
    }

    /// Create a validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        ChatError::Validation(msg.into())
    }

    /// Create a capacity error
    pub fn capacity<T: Into<String>>(msg: T) -> Self {
        ChatError::Capacity(msg.into())
    }

    /// Create a rate-limit error
    pub fn rate_limited<T: Into<String>>(msg: T) -> Self {
        ChatError::RateLimited(msg.into())
    }

    /// Create a lifecycle error
    pub fn lifecycle<T: Into<String>>(msg: T) -> Self {
        ChatError::Lifecycle(msg.into())
    }

    /// Create a logging error
    pub fn logging<T: Into<String>>(msg: T) -> Self {
        ChatError::Logging(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Connection(msg) => write!(f, "connection error: {}", msg),
            ChatError::Validation(msg) => write!(f, "validation error: {}", msg),
            ChatError::Capacity(msg) => write!(f, "capacity error: {}", msg),
            ChatError::RateLimited(msg) => write!(f, "rate limit: {}", msg),
            ChatError::Lifecycle(msg) => write!(f, "lifecycle error: {}", msg),
            ChatError::Logging(msg) => write!(f, "logging error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Connection(format!("IO error: {}", err))
    }
}
