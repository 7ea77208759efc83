use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::{ColumnId, KeyId, RefConstraintId, TableId};

/// A primary key, foreign key, index or unique constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: KeyId,

    /// Owning table.
    pub table: TableId,

    pub name: String,

    pub key_type: KeyType,

    /// Participating columns in key order.
    pub columns: Vec<KeyColumn>,

    /// Non-key covering columns.
    #[serde(default)]
    pub included: Vec<ColumnId>,

    /// Predicate of a filtered (partial) index.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Key {
    /// True for anything that is neither a primary nor a foreign key.
    pub fn is_plain_index(&self) -> bool {
        self.key_type.is_plain_index()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    pub column: ColumnId,

    /// Descending sort order.
    #[serde(default)]
    pub desc: bool,
}

impl KeyColumn {
    pub fn asc(column: ColumnId) -> Self {
        Self { column, desc: false }
    }

    pub fn desc(column: ColumnId) -> Self {
        Self { column, desc: true }
    }
}

bitflags! {
    /// Key classification bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct KeyType: u8 {
        const PRIMARY_KEY = 1;
        const FOREIGN_KEY = 1 << 1;
        const INDEX = 1 << 2;
        const UNIQUE = 1 << 3;
        const CLUSTERED = 1 << 4;
        /// Created implicitly by the server; never scripted.
        const AUTO_CREATED = 1 << 5;

        const UNIQUE_INDEX = Self::INDEX.bits() | Self::UNIQUE.bits();
    }
}

impl KeyType {
    pub const fn is_primary(self) -> bool {
        self.contains(Self::PRIMARY_KEY)
    }

    pub const fn is_foreign(self) -> bool {
        self.contains(Self::FOREIGN_KEY)
    }

    pub const fn is_plain_index(self) -> bool {
        !self.is_primary() && !self.is_foreign()
    }
}

/// A foreign key relationship between two keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefConstraint {
    pub id: RefConstraintId,

    /// The foreign key on the referencing table.
    pub from_key: KeyId,

    /// The primary or unique key on the referenced table.
    pub to_key: KeyId,

    #[serde(default)]
    pub cascade_delete: bool,
}
