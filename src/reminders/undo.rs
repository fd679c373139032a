//! Undo support: lets the ledger replay instructions against the reminder store.

use crate::ledger::{EntityType, LedgerError, UndoApplier, UndoInstruction};

use super::store::{ReminderPatch, ReminderStore, StoreError};

impl UndoApplier for ReminderStore {
    /// `delete_reminder:<id>` retires the reminder; `restore_reminder:<id>:<json>`
    /// writes the snapshot's fields back.
    fn apply(&self, instruction: &UndoInstruction, now: u64) -> Result<(), LedgerError> {
        if instruction.entity_type() != EntityType::Reminder {
            return Err(LedgerError::NoHandler {
                entity_type: instruction.entity_type(),
            });
        }
        let id: i64 = instruction.entity_id().parse().map_err(|_| {
            LedgerError::Apply(format!("invalid reminder id '{}'", instruction.entity_id()))
        })?;

        match instruction {
            UndoInstruction::Delete { .. } => {
                self.retire_reminder(id, now).map_err(apply_error)?;
            }
            UndoInstruction::Restore { snapshot, .. } => {
                let patch: ReminderPatch = serde_json::from_value(snapshot.clone())
                    .map_err(|e| LedgerError::Apply(format!("bad reminder snapshot: {e}")))?;
                self.restore_reminder(id, &patch, now).map_err(apply_error)?;
            }
        }
        Ok(())
    }
}

fn apply_error(e: StoreError) -> LedgerError {
    LedgerError::Apply(e.to_string())
}
