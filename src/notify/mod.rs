//! Notification presenter.
//!
//! Turns application events into at most one visible notification per key,
//! applying the policy in order:
//!
//! 1. platform unsupported → suppressed
//! 2. permission not granted → suppressed (never prompts)
//! 3. application focused → suppressed
//! 4. same key already visible → old record closed, new one shown
//! 5. body truncated, auto-dismiss scheduled
//!
//! Platform failures are reported to [`Diagnostics`] and never propagate; the
//! dispatch path that triggered a notification cannot be interrupted by it.
//!
//! The presenter is constructed once by the composition root and shared by
//! cloning; there is no global instance.

// Rust guideline compliant 2026-02

mod platform;
mod record;
pub mod terminal;

pub use platform::{NotificationPlatform, Permission};
pub use record::{truncate, truncate_body, NotificationKind, NotificationRecord, Origin};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::constants::{AUTO_CLOSE_DELAY, DEFAULT_ICON, MAX_BODY_CHARS};
use crate::dispatch::{Diagnostics, LogDiagnostics};
use crate::error::PresentationError;
use crate::lock;
use crate::target::ChatRoute;

/// Presenter tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenterConfig {
    /// Icon for senders without an avatar, and the badge of every record.
    pub default_icon: String,
    /// Auto-dismiss delay for foreground records; `None` keeps them open.
    pub auto_close: Option<Duration>,
    /// Body length limit in characters.
    pub max_body_chars: usize,
    /// Play the platform sound after presenting.
    pub sound: bool,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            default_icon: DEFAULT_ICON.to_string(),
            auto_close: Some(AUTO_CLOSE_DELAY),
            max_body_chars: MAX_BODY_CHARS,
            sound: true,
        }
    }
}

/// Per-call presentation details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentOptions {
    /// Sender avatar URL.
    pub avatar: Option<String>,
    /// Sender has a verified badge.
    pub verified: bool,
    /// Name of the shared file, for [`NotificationKind::File`].
    pub file_name: Option<String>,
}

/// Why `present()` showed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// No notification support in this environment.
    Unsupported,
    /// Permission is `Default` or `Denied`.
    PermissionNotGranted,
    /// The application has input focus.
    Focused,
}

/// Result of a presentation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentOutcome {
    /// A record is now visible under `key`.
    Presented {
        /// Record key.
        key: String,
        /// An older record with the same key was closed.
        superseded: bool,
    },
    /// Policy said no.
    Suppressed(SuppressReason),
    /// The platform failed; already reported to diagnostics.
    Failed,
}

impl PresentOutcome {
    /// Whether a record is now visible.
    #[must_use]
    pub fn is_presented(&self) -> bool {
        matches!(self, Self::Presented { .. })
    }
}

#[derive(Debug)]
struct Visible {
    record: NotificationRecord,
    id: u64,
    timer: Option<JoinHandle<()>>,
}

impl Visible {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug)]
struct Inner {
    platform: Arc<dyn NotificationPlatform>,
    config: PresenterConfig,
    diagnostics: Arc<dyn Diagnostics>,
    permission: Mutex<Option<Permission>>,
    prompt: tokio::sync::Mutex<()>,
    records: Mutex<HashMap<String, Visible>>,
    next_id: AtomicU64,
}

/// Presents notifications through a [`NotificationPlatform`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationPresenter {
    inner: Arc<Inner>,
}

impl NotificationPresenter {
    /// Presenter with log-only diagnostics.
    pub fn new(platform: Arc<dyn NotificationPlatform>, config: PresenterConfig) -> Self {
        Self::with_diagnostics(platform, config, Arc::new(LogDiagnostics))
    }

    /// Presenter reporting platform failures to `diagnostics`.
    pub fn with_diagnostics(
        platform: Arc<dyn NotificationPlatform>,
        config: PresenterConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                config,
                diagnostics,
                permission: Mutex::new(None),
                prompt: tokio::sync::Mutex::new(()),
                records: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Presenter configuration.
    #[must_use]
    pub fn config(&self) -> &PresenterConfig {
        &self.inner.config
    }

    /// Current permission, read from the platform on first use.
    #[must_use]
    pub fn permission(&self) -> Permission {
        *lock(&self.inner.permission).get_or_insert_with(|| self.inner.platform.permission())
    }

    /// Ask the user for permission. Call only from an explicit user action.
    ///
    /// Resolves immediately once permission is `Granted` or `Denied`; a
    /// denied user is never prompted again.
    pub async fn request_permission(&self) -> Permission {
        if !self.inner.platform.is_supported() {
            return Permission::Denied;
        }
        let _prompt = self.inner.prompt.lock().await;
        let current = self.permission();
        if current != Permission::Default {
            log::debug!("[Notify] Permission already {}, not prompting", current);
            return current;
        }

        let answer = self.inner.platform.request_permission().await;
        log::info!("[Notify] Permission request answered: {}", answer);
        *lock(&self.inner.permission) = Some(answer);
        answer
    }

    /// Present a notification about `sender_id`.
    pub fn present(
        &self,
        kind: NotificationKind,
        sender_id: i64,
        sender_name: &str,
        content: &str,
        options: &PresentOptions,
    ) -> PresentOutcome {
        if let Some(reason) = self.suppression() {
            log::debug!(
                "[Notify] Suppressed {} ({:?})",
                kind.key(sender_id),
                reason
            );
            return PresentOutcome::Suppressed(reason);
        }

        let config = &self.inner.config;
        let (title, body) = match kind {
            NotificationKind::Message => {
                let title = if options.verified {
                    format!("{sender_name} ✓")
                } else {
                    sender_name.to_string()
                };
                (title, truncate(content, config.max_body_chars))
            }
            NotificationKind::File => {
                let file = options.file_name.as_deref().unwrap_or(content);
                (
                    format!("{sender_name} sent a file"),
                    truncate(&format!("📎 {file}"), config.max_body_chars),
                )
            }
        };

        let created_at = Utc::now();
        let auto_close_at = config
            .auto_close
            .and_then(|delay| chrono::Duration::from_std(delay).ok())
            .map(|delay| created_at + delay);

        let record = NotificationRecord {
            key: kind.key(sender_id),
            title,
            body,
            icon: options
                .avatar
                .clone()
                .unwrap_or_else(|| config.default_icon.clone()),
            badge: config.default_icon.clone(),
            target_url: ChatRoute::with_user(sender_id).to_url(),
            sender_id: Some(sender_id),
            origin: Origin::Foreground,
            require_interaction: false,
            created_at,
            auto_close_at,
        };
        self.show(record, config.auto_close)
    }

    /// Show a prepared record, superseding any visible record with its key.
    ///
    /// `auto_close` schedules the dismiss timer; the record's
    /// `auto_close_at` is informational.
    pub fn show(&self, record: NotificationRecord, auto_close: Option<Duration>) -> PresentOutcome {
        let key = record.key.clone();
        let platform = &self.inner.platform;
        let mut records = lock(&self.inner.records);

        let superseded = match records.remove(&key) {
            Some(mut old) => {
                old.cancel_timer();
                self.report(platform.close(&key), &key);
                true
            }
            None => false,
        };

        if let Err(e) = platform.show(&record) {
            self.inner.diagnostics.presentation_failed(&key, &e);
            return PresentOutcome::Failed;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let timer = auto_close.and_then(|delay| schedule_close(&self.inner, &key, id, delay));
        log::info!(
            "[Notify] Showing {} ({:?}{})",
            key,
            record.origin,
            if superseded { ", superseded" } else { "" }
        );
        records.insert(key.clone(), Visible { record, id, timer });
        drop(records);

        if self.inner.config.sound {
            self.report(platform.play_sound(), &key);
        }
        PresentOutcome::Presented { key, superseded }
    }

    /// The user clicked the record: open its target, then close it.
    ///
    /// Returns `false` when no record with `key` is visible.
    pub fn click(&self, key: &str) -> bool {
        let mut records = lock(&self.inner.records);
        let Some(mut visible) = records.remove(key) else {
            return false;
        };
        visible.cancel_timer();
        log::info!("[Notify] Click-through {} -> {}", key, visible.record.target_url);
        self.report(self.inner.platform.open(&visible.record.target_url), key);
        self.report(self.inner.platform.close(key), key);
        true
    }

    /// The user dismissed the record on the platform. Forgets it and cancels
    /// its timer.
    pub fn dismiss(&self, key: &str) -> bool {
        let removed = lock(&self.inner.records).remove(key);
        match removed {
            Some(mut visible) => {
                visible.cancel_timer();
                log::debug!("[Notify] Dismissed {}", key);
                true
            }
            None => false,
        }
    }

    /// Snapshot of visible records, oldest first.
    #[must_use]
    pub fn visible(&self) -> Vec<NotificationRecord> {
        let mut records: Vec<_> = lock(&self.inner.records)
            .values()
            .map(|visible| visible.record.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        records
    }

    /// Visible record with `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<NotificationRecord> {
        lock(&self.inner.records)
            .get(key)
            .map(|visible| visible.record.clone())
    }

    /// Reasons that apply to every presentation regardless of content.
    fn suppression(&self) -> Option<SuppressReason> {
        if !self.inner.platform.is_supported() {
            return Some(SuppressReason::Unsupported);
        }
        if !self.permission().is_granted() {
            return Some(SuppressReason::PermissionNotGranted);
        }
        if self.inner.platform.has_focus() {
            return Some(SuppressReason::Focused);
        }
        None
    }

    /// Permission and support only; the background path ignores focus.
    pub(crate) fn background_suppression(&self) -> Option<SuppressReason> {
        if !self.inner.platform.is_supported() {
            return Some(SuppressReason::Unsupported);
        }
        if !self.permission().is_granted() {
            return Some(SuppressReason::PermissionNotGranted);
        }
        None
    }

    fn report(&self, result: Result<(), PresentationError>, key: &str) {
        if let Err(e) = result {
            self.inner.diagnostics.presentation_failed(key, &e);
        }
    }
}

/// Spawn the auto-dismiss timer. Without a runtime records stay open.
fn schedule_close(inner: &Arc<Inner>, key: &str, id: u64, delay: Duration) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!("[Notify] No runtime, {} will not auto-close", key);
        return None;
    };
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let key = key.to_string();
    Some(runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
            expire(&inner, &key, id);
        }
    }))
}

/// Close `key` if it is still the record `id`.
fn expire(inner: &Inner, key: &str, id: u64) {
    let mut records = lock(&inner.records);
    if records.get(key).map(|visible| visible.id) != Some(id) {
        return;
    }
    records.remove(key);
    log::debug!("[Notify] Auto-closing {}", key);
    if let Err(e) = inner.platform.close(key) {
        inner.diagnostics.presentation_failed(key, &e);
    }
}
