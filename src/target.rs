//! Click-through targets.
//!
//! A notification click must land on the conversation with its sender even
//! when the application is cold-started, so the target is a plain route the
//! router can parse without any live state.

use crate::constants::CHAT_ROUTE;

/// The chat screen, optionally scoped to one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatRoute {
    /// Conversation partner, `None` for the conversation list.
    pub user: Option<i64>,
}

impl ChatRoute {
    /// Conversation with `user_id`.
    #[must_use]
    pub fn with_user(user_id: i64) -> Self {
        Self {
            user: Some(user_id),
        }
    }

    /// Route string, e.g. `/dashboard/chat?user=42`.
    #[must_use]
    pub fn to_url(self) -> String {
        match self.user {
            Some(id) => format!("{CHAT_ROUTE}?user={id}"),
            None => CHAT_ROUTE.to_string(),
        }
    }

    /// Parse a route or absolute URL. Returns `None` for anything that is not
    /// the chat screen. An unparsable `user` parameter yields the plain list.
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let path_and_query = match url.split_once("://") {
            Some((_, rest)) => &rest[rest.find('/')?..],
            None => url,
        };
        let without_fragment = path_and_query
            .split_once('#')
            .map_or(path_and_query, |(head, _)| head);
        let (path, query) = without_fragment
            .split_once('?')
            .unwrap_or((without_fragment, ""));

        if path.trim_end_matches('/') != CHAT_ROUTE {
            return None;
        }

        let user = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "user")
            .and_then(|(_, value)| value.parse().ok());
        Some(Self { user })
    }
}

impl std::fmt::Display for ChatRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(ChatRoute::with_user(42).to_url(), "/dashboard/chat?user=42");
        assert_eq!(ChatRoute::default().to_string(), "/dashboard/chat");
    }

    #[test]
    fn test_parse_relative_and_absolute() {
        assert_eq!(
            ChatRoute::parse("/dashboard/chat?user=42"),
            Some(ChatRoute::with_user(42))
        );
        assert_eq!(
            ChatRoute::parse("https://snet.example/dashboard/chat?tab=1&user=7#bottom"),
            Some(ChatRoute::with_user(7))
        );
        assert_eq!(ChatRoute::parse("/dashboard/chat/"), Some(ChatRoute::default()));
    }

    #[test]
    fn test_parse_rejects_other_routes() {
        assert_eq!(ChatRoute::parse("/dashboard/profile?user=1"), None);
        assert_eq!(ChatRoute::parse("https://snet.example"), None);
        assert_eq!(
            ChatRoute::parse("/dashboard/chat?user=abc"),
            Some(ChatRoute::default())
        );
    }
}
