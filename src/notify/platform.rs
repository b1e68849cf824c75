//! Platform notification boundary.
//!
//! The presenter decides *whether* and *what* to show; a
//! [`NotificationPlatform`] does the showing. Desktop shells, browsers and the
//! terminal binary each supply their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::record::NotificationRecord;
use crate::error::PresentationError;

/// Platform permission to show notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Never asked, or the user dismissed the prompt.
    #[default]
    Default,
    /// User allowed notifications.
    Granted,
    /// User blocked notifications. Final for the session.
    Denied,
}

impl Permission {
    /// `true` only for `Granted`.
    #[must_use]
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Granted => "granted",
            Self::Denied => "denied",
        })
    }
}

/// What the host environment can do with notifications.
///
/// Calls to `show`, `close` and `open` are made while the presenter holds its
/// record lock; implementations must not call back into the presenter.
#[async_trait]
pub trait NotificationPlatform: Send + Sync + std::fmt::Debug {
    /// Whether notifications exist at all here.
    fn is_supported(&self) -> bool;

    /// Stored permission, read once when the presenter first needs it.
    fn permission(&self) -> Permission;

    /// Prompt the user. Only ever called from an explicit user action.
    async fn request_permission(&self) -> Permission;

    /// Whether the application currently has input focus.
    fn has_focus(&self) -> bool;

    /// Display `record`, replacing any platform notification with the same key.
    fn show(&self, record: &NotificationRecord) -> Result<(), PresentationError>;

    /// Remove the notification with `key` from the screen.
    fn close(&self, key: &str) -> Result<(), PresentationError>;

    /// Focus the application (opening it if needed) and navigate to `url`.
    fn open(&self, url: &str) -> Result<(), PresentationError>;

    /// Play the notification sound.
    fn play_sound(&self) -> Result<(), PresentationError> {
        Ok(())
    }
}
