//! Session connection states

use std::fmt;

/// Lifecycle state of a participant session.
///
/// States only ever advance: `Connecting` through `Disconnecting`, no
/// backward transitions and no skipping back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// TCP connection accepted, authentication not yet complete
    Connecting,
    /// Name accepted and reserved, not yet receiving broadcasts
    Authenticated,
    /// Fully admitted; sends and receives messages
    Active,
    /// Teardown in progress; no further sends
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "Connecting",
            SessionState::Authenticated => "Authenticated",
            SessionState::Active => "Active",
            SessionState::Disconnecting => "Disconnecting",
        };
        write!(f, "{}", s)
    }
}
