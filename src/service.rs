//! Explicitly constructed service bundle.
//!
//! Opens the store and ledger on one database file, builds the notification
//! router from config, and hands out the scheduler, callback app and undo
//! registry wired to the same instances.

use std::sync::Arc;

use tracing::info;

use crate::callback::CallbackApp;
use crate::config::NudgeConfig;
use crate::error::{NudgeError, Result};
use crate::ledger::{ActionLedger, EntityType, UndoRegistry};
use crate::notify::{NotificationRouter, NtfyProvider, VoiceProvider};
use crate::reminders::{CHANNEL_NTFY, CHANNEL_VOICE, ReminderStore};
use crate::scheduler::ReminderScheduler;

pub struct NudgeService {
    config: NudgeConfig,
    store: Arc<ReminderStore>,
    ledger: Arc<ActionLedger>,
    router: Arc<NotificationRouter>,
}

impl NudgeService {
    /// Open storage at the configured path and build providers.
    pub fn open(config: NudgeConfig) -> Result<Self> {
        let db_path = config.store.effective_db_path();
        let store = ReminderStore::open(&db_path)?.with_claim_policy(config.scheduler.claim_policy());
        let ledger = ActionLedger::open(&db_path, config.ledger.clone())?;
        info!(path = %db_path.display(), "opened reminder database");
        let router = build_router(&config)?;
        Ok(Self::from_parts(config, store, ledger, router))
    }

    /// Assemble from already-open parts.
    pub fn from_parts(
        config: NudgeConfig,
        store: ReminderStore,
        ledger: ActionLedger,
        router: NotificationRouter,
    ) -> Self {
        Self {
            config,
            store: Arc::new(store),
            ledger: Arc::new(ledger),
            router: Arc::new(router),
        }
    }

    pub fn config(&self) -> &NudgeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ReminderStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<ActionLedger> {
        &self.ledger
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn scheduler(&self) -> ReminderScheduler {
        ReminderScheduler::new(Arc::clone(&self.store), Arc::clone(&self.router))
            .with_interval(self.config.scheduler.interval())
    }

    /// Appliers for entity types this crate owns (reminders).
    pub fn undo_registry(&self) -> UndoRegistry {
        UndoRegistry::new().with(EntityType::Reminder, self.store.clone())
    }

    pub fn callback_app(&self) -> CallbackApp {
        let app = CallbackApp::new(Arc::clone(&self.store)).with_ledger(Arc::clone(&self.ledger));
        match &self.config.ntfy.callback_token {
            Some(token) => app.with_token(token.clone()),
            None => app,
        }
    }
}

/// Router with ntfy (when a topic is set) and voice (when a URL is set).
pub fn build_router(config: &NudgeConfig) -> Result<NotificationRouter> {
    let mut router = NotificationRouter::new(config.scheduler.channel_timeout());
    if !config.ntfy.topic.trim().is_empty() {
        router.register(CHANNEL_NTFY, Arc::new(NtfyProvider::new(config.ntfy.clone())?));
    }
    if let Some(voice) = VoiceProvider::from_config(&config.voice)? {
        router.register(CHANNEL_VOICE, Arc::new(voice));
    }
    if router.channels().is_empty() {
        return Err(NudgeError::Config(
            "no notification channel configured: set [ntfy] topic or [voice] base_url".into(),
        ));
    }
    Ok(router)
}
