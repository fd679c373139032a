//! Nudge: reminder dispatch pipeline and undoable action ledger.
//!
//! # Architecture
//!
//! - **Reminder store** ([`reminders`]): SQLite table of scheduled reminders
//!   with an atomic claim step, so each due reminder fires at most once.
//! - **Notification providers** ([`notify`]): one per channel (ntfy push,
//!   local voice), fanned out concurrently by the router.
//! - **Scheduler** ([`scheduler`]): background loop, claim → dispatch → record.
//! - **Action ledger** ([`ledger`]): append-only log of mutations with
//!   receipts, short undo tokens and time-bounded undo.
//! - **Callback server** ([`callback`]): HTTP endpoint behind the
//!   notification action buttons.

pub mod callback;
pub mod config;
pub(crate) mod db;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod nudge_dirs;
pub mod reminders;
pub mod scheduler;
pub mod service;

pub use config::NudgeConfig;
pub use error::{NudgeError, Result};
pub use service::NudgeService;
