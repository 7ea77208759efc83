use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ColumnId, KeyId, RefConstraintId, RoutineId, TableId};

/// A table or view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,

    /// Schema the table lives in (empty for servers without schemas).
    pub schema: String,

    pub name: String,

    pub kind: TableKind,

    /// Columns in ordinal order.
    pub columns: Vec<ColumnId>,

    /// All keys defined on the table, the primary key included.
    pub keys: Vec<KeyId>,

    /// Outgoing referential constraints (this table holds the foreign key).
    pub ref_constraints: Vec<RefConstraintId>,

    pub primary_key: Option<KeyId>,

    /// Present only for views.
    pub view: Option<ViewDef>,

    /// Generated CRUD routines owned by the table.
    pub routines: Vec<RoutineId>,

    /// Names the table was known under in earlier versions of the model.
    #[serde(default)]
    pub previous_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Table,
    View,
}

/// Definition of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    /// SQL body of the view (the `SELECT`).
    pub definition: String,

    /// Content hash of the normalized definition.
    pub hash: u32,

    pub materialized: bool,
}

impl Table {
    pub fn full_name(&self) -> String {
        super::full_name(&self.schema, &self.name)
    }

    pub fn is_view(&self) -> bool {
        self.kind == TableKind::View
    }

    pub fn is_materialized_view(&self) -> bool {
        self.view.as_ref().is_some_and(|v| v.materialized)
    }
}

/// A table column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,

    /// Owning table.
    pub table: TableId,

    pub name: String,

    pub ty: ColumnType,

    pub flags: ColumnFlags,

    /// Default value expression, if any.
    pub default: Option<String>,

    /// Names of the model member in earlier versions, used for rename detection.
    #[serde(default)]
    pub previous_names: Vec<String>,
}

impl Column {
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }
}

/// Resolved storage type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    /// Base SQL type name, e.g. `varchar` or `numeric`.
    pub name: String,

    /// Length for character and binary types.
    pub size: Option<i64>,

    pub precision: Option<u8>,

    pub scale: Option<u8>,
}

impl ColumnType {
    /// A type with no size or precision arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            precision: None,
            scale: None,
        }
    }

    pub fn sized(name: impl Into<String>, size: i64) -> Self {
        Self {
            size: Some(size),
            ..Self::named(name)
        }
    }

    pub fn decimal(name: impl Into<String>, precision: u8, scale: u8) -> Self {
        Self {
            precision: Some(precision),
            scale: Some(scale),
            ..Self::named(name)
        }
    }

    /// The full type specification as it appears in DDL, e.g. `varchar(50)`.
    pub fn sql_spec(&self) -> String {
        match (self.size, self.precision, self.scale) {
            (Some(size), _, _) => format!("{}({})", self.name, size),
            (None, Some(p), Some(s)) => format!("{}({},{})", self.name, p, s),
            (None, Some(p), None) => format!("{}({})", self.name, p),
            _ => self.name.clone(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_spec())
    }
}

bitflags! {
    /// Column attribute bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ColumnFlags: u16 {
        const NULLABLE = 1;
        const PRIMARY_KEY = 1 << 1;
        /// Identity / auto-increment column.
        const IDENTITY = 1 << 2;
        const ROW_VERSION = 1 << 3;
        const COMPUTED = 1 << 4;
    }
}

impl ColumnFlags {
    pub const NONE: Self = Self::empty();
}
