//! Local speech provider: hands the reminder to a text-to-speech endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::provider::{DeliveryResult, NotificationProvider};
use crate::error::NudgeError;
use crate::reminders::{CHANNEL_VOICE, Reminder};

/// `[voice]` config section. The provider is only registered when
/// `base_url` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VoiceConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug)]
pub struct VoiceProvider {
    base_url: String,
    client: reqwest::Client,
}

impl VoiceProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NudgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NudgeError::Notify(format!("cannot build voice client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Build from config, or `None` when no endpoint is configured.
    pub fn from_config(config: &VoiceConfig) -> Result<Option<Self>, NudgeError> {
        match config.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(Some(Self::new(
                url,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl NotificationProvider for VoiceProvider {
    fn name(&self) -> &str {
        CHANNEL_VOICE
    }

    async fn send(
        &self,
        reminder: &Reminder,
        title: &str,
        body: &str,
        _actions: &[String],
    ) -> DeliveryResult {
        let url = format!("{}/speak", self.base_url.trim_end_matches('/'));
        let payload = serde_json::json!({
            "text": format!("{title}. {body}"),
            "priority": reminder.priority.as_str(),
            "reminder_id": reminder.id,
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                DeliveryResult::success(CHANNEL_VOICE, None)
                    .with_metadata("status", response.status().as_u16())
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                warn!(reminder_id = reminder.id, status, "voice endpoint rejected reminder");
                DeliveryResult::failure(CHANNEL_VOICE, format!("HTTP {status}: {}", text.trim()))
                    .with_metadata("status", status)
            }
            Err(e) => {
                warn!(reminder_id = reminder.id, "voice request failed: {e}");
                DeliveryResult::failure(CHANNEL_VOICE, format!("request failed: {e}"))
            }
        }
    }
}
