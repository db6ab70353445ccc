//! Server configuration
//!
//! All knobs have working defaults; the chainable `with_*` setters exist so
//! tests and embedders can tune a single field without spelling out the rest.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ChatError, Result};

/// Chat relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the TCP listener to
    pub listen_addr: String,
    /// Maximum number of concurrently registered participants
    pub max_clients: usize,
    /// Inactivity deadline after which a participant is evicted
    pub client_timeout: Duration,
    /// Minimum interval between successive messages from one sender
    pub message_rate_limit: Duration,
    /// Maximum message content size in bytes, after trimming
    pub max_message_size: usize,
    /// Maximum display name length
    pub max_name_length: usize,
    /// Upper bound on per-session name changes
    pub max_name_changes: usize,
    /// Optional transcript log file; disabled when `None`
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8989".to_string(),
            max_clients: 10,
            client_timeout: Duration::from_secs(5 * 60),
            message_rate_limit: Duration::from_secs(1),
            max_message_size: 1024,
            max_name_length: 32,
            max_name_changes: 3,
            log_file: None,
        }
    }
}

impl Config {
    /// Set the listen address
    pub fn with_listen_addr<T: Into<String>>(mut self, addr: T) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of clients
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Set the inactivity timeout
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Set the per-sender message rate limit
    pub fn with_message_rate_limit(mut self, limit: Duration) -> Self {
        self.message_rate_limit = limit;
        self
    }

    /// Set the maximum message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum display name length
    pub fn with_max_name_length(mut self, length: usize) -> Self {
        self.max_name_length = length;
        self
    }

    /// Set the maximum number of name changes
    pub fn with_max_name_changes(mut self, changes: usize) -> Self {
        self.max_name_changes = changes;
        self
    }

    /// Set the transcript log file path
    pub fn with_log_file<T: Into<PathBuf>>(mut self, path: T) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Validate a port argument from the command line.
///
/// Accepts decimal numbers in 1..=65535; anything else is rejected.
pub fn validate_port(port: &str) -> Result<u16> {
    match port.parse::<u32>() {
        Ok(n) if (1..=65535).contains(&n) => Ok(n as u16),
        Ok(n) => Err(ChatError::validation(format!(
            "port out of range (1-65535): {}",
            n
        ))),
        Err(_) => Err(ChatError::validation(format!("invalid port: {}", port))),
    }
}
