//! In-memory schema snapshot model.
//!
//! A [`Snapshot`] is an arena: every object lives in a flat vector owned by
//! the snapshot and refers to related objects by typed integer id. Matching
//! results are kept outside the snapshot (see [`crate::matcher::PeerMap`]),
//! so a snapshot is never mutated once it has been built.

mod key;
mod objects;
mod snapshot;
mod table;

pub use key::{Key, KeyColumn, KeyType, RefConstraint};
pub use objects::{content_hash, CustomType, Routine, RoutineKind, Sequence};
pub use snapshot::Snapshot;
pub use table::{Column, ColumnFlags, ColumnType, Table, TableKind, ViewDef};

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl fmt::Debug for $name {
            fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(fmt, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(
    /// Index of a table (or view) in [`Snapshot::tables`].
    TableId
);
arena_id!(
    /// Index of a column in [`Snapshot::columns`].
    ColumnId
);
arena_id!(
    /// Index of a key in [`Snapshot::keys`].
    KeyId
);
arena_id!(
    /// Index of a referential constraint in [`Snapshot::ref_constraints`].
    RefConstraintId
);
arena_id!(SequenceId);
arena_id!(CustomTypeId);
arena_id!(RoutineId);

/// Join a schema and an object name into a full name.
///
/// Objects without a schema are addressed by their bare name.
pub fn full_name(schema: &str, name: &str) -> String {
    if schema.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", schema, name)
    }
}
