//! ntfy push-notification provider.
//!
//! Wire contract: `POST {base_url}/{topic}` with the message as the body and
//! `Title`, `Priority` and (optionally) `Actions` headers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::{DeliveryResult, NotificationProvider};
use crate::error::NudgeError;
use crate::reminders::{CHANNEL_NTFY, Priority, Reminder};

pub const DEFAULT_NTFY_BASE_URL: &str = "https://ntfy.sh";

/// `[ntfy]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NtfyConfig {
    pub base_url: String,
    pub topic: String,
    /// Public base for action buttons, e.g. `https://host/reminders`.
    /// Buttons are only attached when this is set.
    pub callback_base_url: Option<String>,
    /// Shared secret echoed back in action callbacks.
    pub callback_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NtfyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NTFY_BASE_URL.to_owned(),
            topic: String::new(),
            callback_base_url: None,
            callback_token: None,
            timeout_secs: 10,
        }
    }
}

pub struct NtfyProvider {
    config: NtfyConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for NtfyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NtfyProvider")
            .field("base_url", &self.config.base_url)
            .field("topic", &self.config.topic)
            .field("callbacks", &self.config.callback_base_url.is_some())
            .finish()
    }
}

impl NtfyProvider {
    pub fn new(config: NtfyConfig) -> Result<Self, NudgeError> {
        if config.topic.trim().is_empty() {
            return Err(NudgeError::Config("ntfy topic must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| NudgeError::Notify(format!("cannot build ntfy client: {e}")))?;
        Ok(Self { config, client })
    }

    fn topic_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.topic.trim_matches('/')
        )
    }
}

/// ntfy priority scale: high=5, med=3, low=2.
pub fn ntfy_priority(priority: Priority) -> u8 {
    match priority {
        Priority::High => 5,
        Priority::Med => 3,
        Priority::Low => 2,
    }
}

/// Build the `Actions` header, one `http` clause per action label.
///
/// Returns `None` without a callback base or without actions.
pub fn actions_header(
    reminder_id: i64,
    actions: &[String],
    callback_base_url: Option<&str>,
    callback_token: Option<&str>,
) -> Option<String> {
    let base = callback_base_url?.trim_end_matches('/');
    if actions.is_empty() {
        return None;
    }
    let clauses: Vec<String> = actions
        .iter()
        .map(|label| {
            let mut body = serde_json::Map::new();
            body.insert("action".into(), label.as_str().into());
            if let Some(token) = callback_token {
                body.insert("token".into(), token.into());
            }
            let body = serde_json::Value::Object(body);
            format!("http, {label}, POST, {base}/{reminder_id}/action, body='{body}'")
        })
        .collect();
    Some(clauses.join("; "))
}

/// Header-safe title: control characters become spaces.
fn title_header(title: &str) -> Option<HeaderValue> {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    HeaderValue::from_bytes(cleaned.trim().as_bytes()).ok()
}

#[async_trait]
impl NotificationProvider for NtfyProvider {
    fn name(&self) -> &str {
        CHANNEL_NTFY
    }

    async fn send(
        &self,
        reminder: &Reminder,
        title: &str,
        body: &str,
        actions: &[String],
    ) -> DeliveryResult {
        let url = self.topic_url();
        let mut request = self
            .client
            .post(&url)
            .header("Priority", ntfy_priority(reminder.priority).to_string())
            .body(body.to_owned());

        if let Some(value) = title_header(title) {
            request = request.header("Title", value);
        }
        if let Some(value) = actions_header(
            reminder.id,
            actions,
            self.config.callback_base_url.as_deref(),
            self.config.callback_token.as_deref(),
        ) {
            request = request.header("Actions", value);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(reminder_id = reminder.id, "ntfy request failed: {e}");
                return DeliveryResult::failure(CHANNEL_NTFY, format!("request failed: {e}"));
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            warn!(reminder_id = reminder.id, status = status.as_u16(), "ntfy rejected message");
            return DeliveryResult::failure(
                CHANNEL_NTFY,
                format!("HTTP {}: {}", status.as_u16(), text.trim()),
            )
            .with_metadata("status", status.as_u16());
        }

        let message_id = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from));
        debug!(reminder_id = reminder.id, ?message_id, "ntfy delivered");
        DeliveryResult::success(CHANNEL_NTFY, message_id).with_metadata("status", status.as_u16())
    }
}
