//! Protocol layer for the chat relay
//!
//! This module provides:
//! - The `Message` value type and its wire formatting
//! - Session connection states

pub mod message;
pub mod state;

// Re-export commonly used types
pub use message::{Message, SYSTEM_NAME, TIMESTAMP_FORMAT};
pub use state::SessionState;
