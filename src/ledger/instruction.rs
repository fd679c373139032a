//! Undo instructions and the appliers that carry them out.
//!
//! The ledger decides *what* an undo means (`delete_<type>:<id>` or
//! `restore_<type>:<id>:<json>`); the subsystem owning the entity decides
//! *how* by implementing [`UndoApplier`].

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use super::store::LedgerError;
use super::types::EntityType;

/// A typed undo instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoInstruction {
    /// Undo of a create: remove (or retire) the entity.
    Delete {
        entity_type: EntityType,
        entity_id: String,
    },
    /// Undo of an update or delete: write the before-snapshot back.
    Restore {
        entity_type: EntityType,
        entity_id: String,
        snapshot: Value,
    },
}

impl UndoInstruction {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Delete { entity_type, .. } | Self::Restore { entity_type, .. } => *entity_type,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::Delete { entity_id, .. } | Self::Restore { entity_id, .. } => entity_id,
        }
    }
}

impl fmt::Display for UndoInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete {
                entity_type,
                entity_id,
            } => write!(f, "delete_{entity_type}:{entity_id}"),
            Self::Restore {
                entity_type,
                entity_id,
                snapshot,
            } => write!(
                f,
                "restore_{entity_type}:{entity_id}:{}",
                to_spaced_json(snapshot)
            ),
        }
    }
}

impl FromStr for UndoInstruction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::Invalid(format!("malformed undo instruction '{s}'"));

        if let Some(rest) = s.strip_prefix("delete_") {
            let (ty, id) = rest.split_once(':').ok_or_else(invalid)?;
            if id.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Delete {
                entity_type: ty.parse()?,
                entity_id: id.to_owned(),
            });
        }

        if let Some(rest) = s.strip_prefix("restore_") {
            let (ty, rest) = rest.split_once(':').ok_or_else(invalid)?;
            let (id, json) = rest.split_once(':').ok_or_else(invalid)?;
            if id.is_empty() {
                return Err(invalid());
            }
            let snapshot = serde_json::from_str(json)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
            return Ok(Self::Restore {
                entity_type: ty.parse()?,
                entity_id: id.to_owned(),
                snapshot,
            });
        }

        Err(invalid())
    }
}

/// Carries out undo instructions for one entity type.
pub trait UndoApplier: Send + Sync {
    fn apply(&self, instruction: &UndoInstruction, now: u64) -> Result<(), LedgerError>;
}

/// Appliers keyed by entity type.
#[derive(Clone, Default)]
pub struct UndoRegistry {
    appliers: HashMap<EntityType, Arc<dyn UndoApplier>>,
}

impl UndoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the applier for `entity_type`.
    pub fn register(&mut self, entity_type: EntityType, applier: Arc<dyn UndoApplier>) {
        self.appliers.insert(entity_type, applier);
    }

    #[must_use]
    pub fn with(mut self, entity_type: EntityType, applier: Arc<dyn UndoApplier>) -> Self {
        self.register(entity_type, applier);
        self
    }

    pub fn handles(&self, entity_type: EntityType) -> bool {
        self.appliers.contains_key(&entity_type)
    }

    pub fn apply(&self, instruction: &UndoInstruction, now: u64) -> Result<(), LedgerError> {
        let entity_type = instruction.entity_type();
        let applier = self
            .appliers
            .get(&entity_type)
            .ok_or(LedgerError::NoHandler { entity_type })?;
        applier.apply(instruction, now)
    }
}

impl fmt::Debug for UndoRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.appliers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("UndoRegistry").field("appliers", &types).finish()
    }
}

// ---------------------------------------------------------------------------
// JSON rendering
// ---------------------------------------------------------------------------

/// Compact JSON with `", "` and `": "` separators, e.g. `{"text": "A"}`.
pub(crate) fn to_spaced_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    if serde::Serialize::serialize(value, &mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|_| value.to_string())
}

struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
