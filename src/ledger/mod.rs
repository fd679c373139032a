//! Action ledger: append-only record of every state-changing operation,
//! with receipts, short undo tokens and time-bounded undo.

pub mod instruction;
pub(crate) mod schema;
pub mod store;
pub mod summary;
pub mod token;
pub mod types;

pub use instruction::{UndoApplier, UndoInstruction, UndoRegistry};
pub use store::{ActionLedger, LedgerError};
pub use types::{
    ActionReceipt, ActionRecord, DEFAULT_UNDO_WINDOW_SECS, EntityType, LedgerConfig, Operation,
    RecordParams,
};
