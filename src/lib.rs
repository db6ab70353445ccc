//! Parley - Multi-User TCP Chat Relay
//!
//! This library provides a line-oriented chat relay: one process listens on
//! a TCP endpoint, authenticates each connection with a unique display name,
//! replays the transcript to newcomers and fans every message out to all
//! other active participants.
//!
//! ## Architecture
//!
//! - **Acceptor**: accepts connections and enforces the capacity ceiling
//! - **Session**: per-participant read loop, rate limiting, `/name` changes
//! - **Broadcast bus**: bounded queue between senders and the dispatcher
//! - **Dispatcher**: appends to the transcript and fans out concurrently
//! - **Reaper**: evicts sessions idle past the configured timeout
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley::{ChatServer, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ChatServer::new(Config::default());
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export error types
pub use error::{ChatError, Result};

// Re-export configuration
pub use config::{validate_port, Config};

// Re-export protocol types
pub use protocol::{Message, SessionState, SYSTEM_NAME, TIMESTAMP_FORMAT};

// Re-export server types
pub use server::{ChatServer, ServerStats, Session, Transcript};
