//! Terminal notification platform used by the `snet` binary.
//!
//! Prints notifications to stdout. Focus is an explicit flag so a front end
//! can report whether the user is looking at the chat.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::platform::{NotificationPlatform, Permission};
use super::record::NotificationRecord;
use crate::error::PresentationError;

/// Writes notifications to stdout.
#[derive(Debug)]
pub struct TerminalPlatform {
    focused: AtomicBool,
    bell: bool,
}

impl TerminalPlatform {
    /// Unfocused terminal; `bell` rings the terminal bell as the sound.
    #[must_use]
    pub fn new(bell: bool) -> Self {
        Self {
            focused: AtomicBool::new(false),
            bell,
        }
    }

    /// Report whether the chat is in front of the user.
    pub fn set_focus(&self, focused: bool) {
        self.focused.store(focused, Ordering::Relaxed);
    }

    fn write(&self, line: &str) -> Result<(), PresentationError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}").map_err(|e| PresentationError::Platform(e.to_string()))
    }
}

#[async_trait]
impl NotificationPlatform for TerminalPlatform {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn has_focus(&self) -> bool {
        self.focused.load(Ordering::Relaxed)
    }

    fn show(&self, record: &NotificationRecord) -> Result<(), PresentationError> {
        self.write(&format!(
            "[{}] {}: {}  ({})",
            record.key, record.title, record.body, record.target_url
        ))
    }

    fn close(&self, key: &str) -> Result<(), PresentationError> {
        log::debug!("[Notify] {} closed", key);
        Ok(())
    }

    fn open(&self, url: &str) -> Result<(), PresentationError> {
        self.write(&format!("-> {url}"))
    }

    fn play_sound(&self) -> Result<(), PresentationError> {
        if !self.bell {
            return Ok(());
        }
        let mut out = std::io::stdout().lock();
        out.write_all(b"\x07")
            .and_then(|()| out.flush())
            .map_err(|e| PresentationError::Platform(e.to_string()))
    }
}
