//! TCP chat relay server implementation
//!
//! This module provides the session and broadcast subsystem:
//!
//! - **ChatServer**: lifecycle, accept loop, registries and shutdown
//! - **Session**: one participant connection with its read loop
//! - **Dispatcher**: single consumer of the broadcast bus, fan-out
//! - **Reaper**: idle-session eviction sweep
//! - **Transcript**: ordered history replayed to new participants

pub(crate) mod chat_server;
pub(crate) mod dispatch;
pub(crate) mod reaper;
pub mod session;
pub mod transcript;

pub use chat_server::{ChatServer, ServerStats};
pub use session::{validate_username, Session};
pub use transcript::Transcript;
