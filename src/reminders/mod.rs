//! Durable reminder storage.
//!
//! Reminders live in one SQLite table owned by [`ReminderStore`]. A reminder
//! is never physically deleted; cancellation and undo only flag it.

pub(crate) mod migrate;
pub(crate) mod schema;
pub mod store;
pub mod types;
mod undo;

pub use store::{AppliedAction, ClaimPolicy, ReminderPatch, ReminderStore, StoreError};
pub use types::{
    AuditEntry, CHANNEL_NTFY, CHANNEL_VOICE, KNOWN_CHANNELS, MAX_AUDIT_ENTRIES, NewReminder,
    Priority, Reminder, ReminderAction, ReminderSource, ReminderStatus, now_epoch_secs,
};
