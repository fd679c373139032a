//! Shared helpers for integration tests.

use nudge::NudgeConfig;
use nudge::NudgeService;
use nudge::ledger::{ActionLedger, LedgerConfig};
use nudge::reminders::ReminderStore;
use nudge::service::build_router;
use wiremock::MockServer;

pub(crate) const TOPIC: &str = "nudge-it";

/// Config pointing ntfy at `server`, with the database inside `dir`.
pub(crate) fn config_for(server: &MockServer, dir: &tempfile::TempDir) -> NudgeConfig {
    let mut config = NudgeConfig::default();
    config.ntfy.base_url = server.uri();
    config.ntfy.topic = TOPIC.to_owned();
    config.ntfy.timeout_secs = 5;
    config.store.db_path = Some(dir.path().join("nudge.db"));
    config
}

/// File-backed service wired to a mock ntfy server.
pub(crate) fn file_service(server: &MockServer) -> (NudgeService, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let service = NudgeService::open(config_for(server, &dir)).expect("open service");
    (service, dir)
}

/// In-memory service wired to a mock ntfy server.
pub(crate) fn memory_service(server: &MockServer) -> NudgeService {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = config_for(server, &dir);
    let router = build_router(&config).expect("router");
    NudgeService::from_parts(
        config,
        ReminderStore::open_in_memory().expect("store"),
        ActionLedger::open_in_memory(LedgerConfig::default()).expect("ledger"),
        router,
    )
}

pub(crate) fn now() -> u64 {
    nudge::reminders::now_epoch_secs()
}
