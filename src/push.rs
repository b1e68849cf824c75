//! Background delivery path.
//!
//! A push-capable background worker receives payloads while the live session
//! may be down. It presents them through the same keyed record store as the
//! foreground presenter, so a push tagged `message-42` and a live message from
//! sender 42 supersede each other instead of stacking.
//!
//! ```json
//! { "title": "Alice", "body": "Hi", "tag": "message-42",
//!   "data": { "senderId": 42, "url": "/dashboard/chat?user=42" } }
//! ```
//!
//! Every field is optional.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::{APP_NAME, DEFAULT_PUSH_BODY, DEFAULT_PUSH_TAG, PUSH_ICON};
use crate::error::DecodeError;
use crate::notify::{NotificationPresenter, NotificationRecord, Origin, PresentOutcome};
use crate::target::ChatRoute;

/// Routing data attached to a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    /// Sender the push is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    /// Route to open on click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Push payload as delivered to the background worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    /// Title; defaults to the application name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Body; defaults to a generic new-message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// De-duplication key; defaults to `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Routing data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PushData>,
}

impl PushPayload {
    /// Decode raw push bytes. Empty input is the all-defaults payload.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(raw)?)
    }

    /// Effective title.
    #[must_use]
    pub fn title(&self) -> &str {
        non_empty(self.title.as_deref()).unwrap_or(APP_NAME)
    }

    /// Effective body.
    #[must_use]
    pub fn body(&self) -> &str {
        non_empty(self.body.as_deref()).unwrap_or(DEFAULT_PUSH_BODY)
    }

    /// Effective tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        non_empty(self.tag.as_deref()).unwrap_or(DEFAULT_PUSH_TAG)
    }

    /// Sender id from `data`, if any.
    #[must_use]
    pub fn sender_id(&self) -> Option<i64> {
        self.data.as_ref().and_then(|data| data.sender_id)
    }

    /// Click target: `data.url`, else the sender's conversation, else the chat list.
    #[must_use]
    pub fn target_url(&self) -> String {
        if let Some(url) = non_empty(self.data.as_ref().and_then(|data| data.url.as_deref())) {
            return url.to_string();
        }
        match self.sender_id() {
            Some(id) => ChatRoute::with_user(id).to_url(),
            None => ChatRoute::default().to_url(),
        }
    }

    /// Record for this payload. Background records wait for the user.
    #[must_use]
    pub fn to_record(&self, icon: &str) -> NotificationRecord {
        NotificationRecord {
            key: self.tag().to_string(),
            title: self.title().to_string(),
            body: self.body().to_string(),
            icon: icon.to_string(),
            badge: icon.to_string(),
            target_url: self.target_url(),
            sender_id: self.sender_id(),
            origin: Origin::Background,
            require_interaction: true,
            created_at: Utc::now(),
            auto_close_at: None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Presents pushes through a shared [`NotificationPresenter`].
#[derive(Debug, Clone)]
pub struct BackgroundDelivery {
    presenter: NotificationPresenter,
    icon: String,
}

impl BackgroundDelivery {
    /// Deliver through `presenter` with the default push icon.
    #[must_use]
    pub fn new(presenter: NotificationPresenter) -> Self {
        Self {
            presenter,
            icon: PUSH_ICON.to_string(),
        }
    }

    /// Override the icon.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Handle raw push bytes. Undecodable input is reported and presented
    /// with defaults.
    pub fn handle(&self, raw: &[u8]) -> PresentOutcome {
        let payload = PushPayload::decode(raw).unwrap_or_else(|e| {
            log::warn!("[Push] Undecodable payload ({}), using defaults", e);
            PushPayload::default()
        });
        self.present(&payload)
    }

    /// Present a decoded payload. Focus is not consulted.
    pub fn present(&self, payload: &PushPayload) -> PresentOutcome {
        if let Some(reason) = self.presenter.background_suppression() {
            log::debug!("[Push] Suppressed {} ({:?})", payload.tag(), reason);
            return PresentOutcome::Suppressed(reason);
        }
        log::debug!("[Push] Presenting {}", payload.tag());
        self.presenter.show(payload.to_record(&self.icon), None)
    }

    /// The user clicked the push notification with `tag`.
    pub fn click(&self, tag: &str) -> bool {
        self.presenter.click(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::MockPlatform;
    use crate::notify::{
        NotificationKind, NotificationPlatform, PresentOptions, PresenterConfig, SuppressReason,
    };
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn setup() -> (Arc<MockPlatform>, NotificationPresenter, BackgroundDelivery) {
        let platform = MockPlatform::granted();
        let dyn_platform: Arc<dyn NotificationPlatform> = Arc::clone(&platform) as _;
        let presenter = NotificationPresenter::new(dyn_platform, PresenterConfig::default());
        let delivery = BackgroundDelivery::new(presenter.clone());
        (platform, presenter, delivery)
    }

    #[test]
    fn test_empty_payload_uses_defaults() {
        let payload = PushPayload::decode(b"").unwrap();
        assert_eq!(payload.title(), "SNet");
        assert_eq!(payload.body(), "You have a new message");
        assert_eq!(payload.tag(), "message");
        assert_eq!(payload.target_url(), "/dashboard/chat");

        let payload = PushPayload::decode(b"{}").unwrap();
        assert_eq!(payload, PushPayload::default());
    }

    #[test]
    fn test_full_payload() {
        let raw = br#"{"title":"Alice","body":"Hi","tag":"message-42","data":{"senderId":42,"url":"/chat?user=42"}}"#;
        let payload = PushPayload::decode(raw).unwrap();
        assert_eq!(payload.title(), "Alice");
        assert_eq!(payload.sender_id(), Some(42));
        assert_eq!(payload.target_url(), "/chat?user=42");

        let record = payload.to_record(PUSH_ICON);
        assert_eq!(record.key, "message-42");
        assert!(record.require_interaction);
        assert_eq!(record.auto_close_at, None);
        assert_eq!(record.origin, Origin::Background);
    }

    #[test]
    fn test_target_falls_back_to_sender() {
        let payload = PushPayload {
            data: Some(PushData {
                sender_id: Some(7),
                url: None,
            }),
            ..PushPayload::default()
        };
        assert_eq!(payload.target_url(), "/dashboard/chat?user=7");
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        assert!(matches!(
            PushPayload::decode(b"not json"),
            Err(DecodeError::Payload(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_presents_defaults() {
        let (_platform, presenter, delivery) = setup();
        assert!(delivery.handle(b"{broken").is_presented());
        assert_eq!(presenter.get("message").unwrap().title, "SNet");
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_ignores_focus_but_not_permission() {
        let (platform, _presenter, delivery) = setup();
        platform.focused.store(true, Ordering::SeqCst);
        assert!(delivery.present(&PushPayload::default()).is_presented());

        let denied = Arc::new(MockPlatform::default());
        let dyn_platform: Arc<dyn NotificationPlatform> = Arc::clone(&denied) as _;
        let delivery = BackgroundDelivery::new(NotificationPresenter::new(
            dyn_platform,
            PresenterConfig::default(),
        ));
        assert_eq!(
            delivery.present(&PushPayload::default()),
            PresentOutcome::Suppressed(SuppressReason::PermissionNotGranted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_record_does_not_auto_close() {
        let (_platform, presenter, delivery) = setup();
        delivery.present(&PushPayload::default());
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(presenter.visible().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_supersedes_background() {
        let (platform, presenter, delivery) = setup();
        let raw = br#"{"title":"Alice","body":"Hi","tag":"message-42","data":{"senderId":42,"url":"/chat?user=42"}}"#;
        assert!(delivery.handle(raw).is_presented());

        let outcome = presenter.present(
            NotificationKind::Message,
            42,
            "Alice",
            "Hi again",
            &PresentOptions::default(),
        );
        assert_eq!(
            outcome,
            PresentOutcome::Presented {
                key: "message-42".into(),
                superseded: true
            }
        );

        let visible = presenter.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].origin, Origin::Foreground);
        assert_eq!(visible[0].body, "Hi again");
        assert!(platform.calls().contains(&"close message-42".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_opens_payload_url() {
        let (platform, _presenter, delivery) = setup();
        let raw = br#"{"tag":"message-3","data":{"url":"/dashboard/chat?user=3"}}"#;
        delivery.handle(raw);
        assert!(delivery.click("message-3"));
        assert!(platform
            .calls()
            .contains(&"open /dashboard/chat?user=3".to_string()));
    }
}
