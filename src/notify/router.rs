//! Fans a reminder out across its channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use super::provider::{DeliveryResult, NotificationProvider};
use crate::reminders::Reminder;

/// Default per-channel time budget.
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel name to provider map with concurrent dispatch.
#[derive(Clone)]
pub struct NotificationRouter {
    providers: HashMap<String, Arc<dyn NotificationProvider>>,
    channel_timeout: Duration,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_TIMEOUT)
    }
}

impl NotificationRouter {
    pub fn new(channel_timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            channel_timeout,
        }
    }

    /// Register `provider` under `channel`, replacing any earlier one.
    pub fn register(&mut self, channel: impl Into<String>, provider: Arc<dyn NotificationProvider>) {
        let channel = channel.into().to_ascii_lowercase();
        debug!(channel = %channel, provider = provider.name(), "notification provider registered");
        self.providers.insert(channel, provider);
    }

    #[must_use]
    pub fn with_provider(
        mut self,
        channel: impl Into<String>,
        provider: Arc<dyn NotificationProvider>,
    ) -> Self {
        self.register(channel, provider);
        self
    }

    pub fn channels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn channel_timeout(&self) -> Duration {
        self.channel_timeout
    }

    /// Deliver to every channel and return one result per channel, in order.
    ///
    /// Channels run concurrently, each under the channel timeout, and are all
    /// joined before returning. Unknown channels, timeouts and provider panics
    /// become failed results; nothing here returns an error.
    pub async fn send_all(
        &self,
        reminder: &Reminder,
        channels: &[String],
        title: &str,
        body: &str,
    ) -> Vec<DeliveryResult> {
        let mut pending = Vec::with_capacity(channels.len());
        for channel in channels {
            let key = channel.trim().to_ascii_lowercase();
            let Some(provider) = self.providers.get(&key).cloned() else {
                warn!(reminder_id = reminder.id, channel = %channel, "no provider for channel");
                pending.push(Pending::Done(DeliveryResult::failure(
                    channel.as_str(),
                    format!("unknown channel '{channel}'"),
                )));
                continue;
            };

            let reminder = reminder.clone();
            let title = title.to_owned();
            let body = body.to_owned();
            let timeout = self.channel_timeout;
            let handle = tokio::spawn(async move {
                let send = provider.send(&reminder, &title, &body, &reminder.actions);
                match tokio::time::timeout(timeout, send).await {
                    Ok(result) => result,
                    Err(_) => DeliveryResult::failure(
                        provider.name(),
                        format!("timed out after {}s", timeout.as_secs()),
                    ),
                }
            });
            pending.push(Pending::Running(key, handle));
        }

        let reminder_id = reminder.id;
        join_all(pending.into_iter().map(|item| async move {
            match item {
                Pending::Done(result) => result,
                Pending::Running(channel, handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(reminder_id, channel = %channel, "provider task failed: {e}");
                        DeliveryResult::failure(channel, format!("provider task failed: {e}"))
                    }
                },
            }
        }))
        .await
    }
}

enum Pending {
    Done(DeliveryResult),
    Running(String, tokio::task::JoinHandle<DeliveryResult>),
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("channels", &self.channels())
            .field("channel_timeout", &self.channel_timeout)
            .finish()
    }
}
