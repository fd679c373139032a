//! Error types for the nudge reminder pipeline.

use crate::ledger::LedgerError;
use crate::reminders::StoreError;

/// Top-level error type for the reminder and ledger subsystems.
#[derive(Debug, thiserror::Error)]
pub enum NudgeError {
    /// Reminder store error (persistence, validation, lookup).
    #[error("reminder store error: {0}")]
    Store(#[from] StoreError),

    /// Action ledger error (persistence or undo denial).
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    /// Notification provider or router error.
    #[error("notify error: {0}")]
    Notify(String),

    /// Scheduler error (loop startup, task join).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Action-callback server error.
    #[error("callback server error: {0}")]
    Callback(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, NudgeError>;
