//! Chat message type and wire formatting
//!
//! Every line delivered to a client, every history line and every log sink
//! entry uses the same rendering: `[timestamp][from]:content`.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use crate::error::{ChatError, Result};

/// Reserved sender name for server-generated announcements.
///
/// Never occupies the name registry, so no participant can claim it.
pub const SYSTEM_NAME: &str = "SYSTEM";

/// Timestamp format used on the wire and in the transcript log
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A chat message with sender, content and admission timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Sender display name, or [`SYSTEM_NAME`]
    pub from: String,
    /// Trimmed message text
    pub content: String,
    /// Wall-clock instant the message was admitted
    pub timestamp: DateTime<Local>,
}

impl Message {
    /// Create a new message stamped with the current time
    pub fn new<F: Into<String>, C: Into<String>>(from: F, content: C) -> Self {
        Self {
            from: from.into(),
            content: content.into(),
            timestamp: Local::now(),
        }
    }

    /// Create a server announcement from the SYSTEM sender
    pub fn system<C: Into<String>>(content: C) -> Self {
        Self::new(SYSTEM_NAME, content)
    }

    /// True if this message is a server announcement
    pub fn is_system(&self) -> bool {
        self.from == SYSTEM_NAME
    }

    /// Parse a formatted delivery line back into a message.
    ///
    /// Inverse of `Display` to one-second granularity.
    pub fn parse(line: &str) -> Result<Self> {
        let rest = line
            .strip_prefix('[')
            .ok_or_else(|| ChatError::validation(format!("malformed message line: {}", line)))?;
        let (stamp, rest) = rest
            .split_once(']')
            .ok_or_else(|| ChatError::validation(format!("malformed message line: {}", line)))?;
        let rest = rest
            .strip_prefix('[')
            .ok_or_else(|| ChatError::validation(format!("malformed message line: {}", line)))?;
        let (from, content) = rest
            .split_once("]:")
            .ok_or_else(|| ChatError::validation(format!("malformed message line: {}", line)))?;

        let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|e| ChatError::validation(format!("bad timestamp {:?}: {}", stamp, e)))?;
        let timestamp = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| ChatError::validation(format!("unrepresentable timestamp: {}", stamp)))?;

        if from.is_empty() {
            return Err(ChatError::validation("empty sender in message line"));
        }

        Ok(Self {
            from: from.to_string(),
            content: content.to_string(),
            timestamp,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][{}]:{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.from,
            self.content
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("alice", "Hello!");
        assert_eq!(msg.from, "alice");
        assert_eq!(msg.content, "Hello!");
        assert!(!msg.is_system());
    }

    #[test]
    fn test_system_message() {
        let msg = Message::system("bob has joined our chat...");
        assert_eq!(msg.from, SYSTEM_NAME);
        assert!(msg.is_system());
    }

    #[test]
    fn test_display_format() {
        let msg = Message::new("alice", "hi");
        let line = msg.to_string();
        assert!(line.starts_with('['));
        assert!(line.ends_with("][alice]:hi"));
        // timestamp part is exactly 19 characters: YYYY-MM-DD HH:MM:SS
        let stamp = &line[1..line.find(']').unwrap()];
        assert_eq!(stamp.len(), 19);
    }

    #[test]
    fn test_parse_round_trip() {
        let original = Message::new("alice", "a message: with [brackets]");
        let parsed = Message::parse(&original.to_string()).unwrap();
        assert_eq!(parsed.from, original.from);
        assert_eq!(parsed.content, original.content);
        // round trip preserves the timestamp to one-second granularity
        assert_eq!(
            parsed.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            original.timestamp.format(TIMESTAMP_FORMAT).to_string()
        );
    }

    #[test]
    fn test_parse_known_line() {
        let msg = Message::parse("[2025-03-01 12:30:45][SYSTEM]:alice has joined our chat...")
            .unwrap();
        assert_eq!(msg.from, "SYSTEM");
        assert_eq!(msg.content, "alice has joined our chat...");
        assert!(msg.is_system());
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(Message::parse("").is_err());
        assert!(Message::parse("no brackets at all").is_err());
        assert!(Message::parse("[2025-03-01 12:30:45]missing sender").is_err());
        assert!(Message::parse("[not a timestamp][alice]:hi").is_err());
        assert!(Message::parse("[2025-03-01 12:30:45][]:empty sender").is_err());
    }

    #[test]
    fn test_parse_preserves_empty_content() {
        let msg = Message::parse("[2025-03-01 12:30:45][alice]:").unwrap();
        assert_eq!(msg.content, "");
    }
}
