//! Provider trait and per-channel delivery result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::reminders::{AuditEntry, Reminder, now_epoch_secs};

/// Delivery error strings are cut to this many characters.
pub const MAX_ERROR_CHARS: usize = 200;

/// Outcome of one (reminder, channel) delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryResult {
    pub ok: bool,
    pub provider: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl DeliveryResult {
    pub fn success(provider: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            ok: true,
            provider: provider.into(),
            message_id,
            error: None,
            timestamp: now_epoch_secs(),
            metadata: serde_json::Map::new(),
        }
    }

    /// A failed result. The error text is truncated to [`MAX_ERROR_CHARS`].
    pub fn failure(provider: impl Into<String>, error: impl AsRef<str>) -> Self {
        Self {
            ok: false,
            provider: provider.into(),
            message_id: None,
            error: Some(truncate_error(error.as_ref())),
            timestamp: now_epoch_secs(),
            metadata: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Audit-log form of this result.
    pub fn to_audit_entry(&self) -> AuditEntry {
        AuditEntry::new(
            self.timestamp,
            if self.ok { "delivered" } else { "delivery_failed" },
            self.provider.clone(),
            serde_json::json!({
                "ok": self.ok,
                "message_id": self.message_id,
                "error": self.error,
                "metadata": self.metadata,
            }),
        )
    }
}

/// One delivery channel.
///
/// `send` never fails: transport and HTTP errors come back as a result with
/// `ok == false`.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Provider name recorded in results.
    fn name(&self) -> &str;

    async fn send(
        &self,
        reminder: &Reminder,
        title: &str,
        body: &str,
        actions: &[String],
    ) -> DeliveryResult;
}

pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_CHARS {
        error.to_owned()
    } else {
        error.chars().take(MAX_ERROR_CHARS).collect()
    }
}
