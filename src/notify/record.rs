//! Notification records and the text policy applied to them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{ELLIPSIS, MAX_BODY_CHARS};

/// What a notification is about. Part of the de-duplication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// A chat message.
    Message,
    /// A shared file.
    File,
}

impl NotificationKind {
    /// Key prefix (`message` / `file`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::File => "file",
        }
    }

    /// De-duplication key for this kind and sender: `"<kind>-<senderId>"`.
    ///
    /// Background pushes use the same convention in their `tag`, so both
    /// paths supersede each other.
    #[must_use]
    pub fn key(self, sender_id: i64) -> String {
        format!("{}-{}", self.as_str(), sender_id)
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path created a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Live session, application running.
    Foreground,
    /// Push delivered to the background worker.
    Background,
}

/// One user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// De-duplication key (`tag` on the platform).
    pub key: String,
    /// Title line.
    pub title: String,
    /// Body text, already truncated.
    pub body: String,
    /// Icon URL.
    pub icon: String,
    /// Small badge icon URL.
    pub badge: String,
    /// Route opened on click-through.
    pub target_url: String,
    /// Sender the record is about, if known.
    pub sender_id: Option<i64>,
    /// Which path created it.
    pub origin: Origin,
    /// Stay on screen until the user acts.
    pub require_interaction: bool,
    /// When it was created.
    pub created_at: DateTime<Utc>,
    /// When it closes itself, if ever.
    pub auto_close_at: Option<DateTime<Utc>>,
}

/// Cut `content` to `max` characters, appending the ellipsis marker when
/// anything was cut.
#[must_use]
pub fn truncate(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &content[..cut], ELLIPSIS),
        None => content.to_string(),
    }
}

/// [`truncate`] at the default limit.
#[must_use]
pub fn truncate_body(content: &str) -> String {
    truncate(content, MAX_BODY_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_convention() {
        assert_eq!(NotificationKind::Message.key(42), "message-42");
        assert_eq!(NotificationKind::File.key(7), "file-7");
    }

    #[test]
    fn test_truncate_boundaries() {
        let exact = "a".repeat(100);
        assert_eq!(truncate_body(&exact), exact);

        let long = "b".repeat(101);
        let cut = truncate_body(&long);
        assert_eq!(cut.len(), 103);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_body(""), "");
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let content = "é".repeat(120);
        let cut = truncate(&content, 100);
        assert_eq!(cut.chars().count(), 103);
        assert!(cut.starts_with("éé"));
    }
}
