//! Change records produced by the diff builder.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::error::{Result, ShiftplanError};
use crate::model::{
    ColumnId, CustomTypeId, KeyId, RefConstraintId, RoutineId, SequenceId, TableId,
};
use crate::script::Script;

/// Reference to an object in one of the two snapshots. Old-side references
/// index the deployed snapshot, new-side references the desired one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectRef {
    Schema(String),
    Table(TableId),
    Column(ColumnId),
    Key(KeyId),
    RefConstraint(RefConstraintId),
    Sequence(SequenceId),
    CustomType(CustomTypeId),
    Routine(RoutineId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectType {
    Schema,
    Table,
    Column,
    Key,
    RefConstraint,
    Sequence,
    CustomType,
    Routine,
}

impl ObjectRef {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectRef::Schema(_) => ObjectType::Schema,
            ObjectRef::Table(_) => ObjectType::Table,
            ObjectRef::Column(_) => ObjectType::Column,
            ObjectRef::Key(_) => ObjectType::Key,
            ObjectRef::RefConstraint(_) => ObjectType::RefConstraint,
            ObjectRef::Sequence(_) => ObjectType::Sequence,
            ObjectRef::CustomType(_) => ObjectType::CustomType,
            ObjectRef::Routine(_) => ObjectType::Routine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeKind {
    Add,
    Drop,
    Modify,
    Rename,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Add => "Add",
            ChangeKind::Drop => "Drop",
            ChangeKind::Modify => "Modify",
            ChangeKind::Rename => "Rename",
        };
        f.write_str(s)
    }
}

/// One atomic difference between the deployed and desired schema.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    // At least one endpoint is always set; only the constructors write them.
    old: Option<ObjectRef>,
    new: Option<ObjectRef>,
    pub kind: ChangeKind,
    pub description: String,

    /// Soft "not supported" notices. They are surfaced to the operator and
    /// never block the rest of the plan.
    pub notices: Vec<String>,

    /// Scripts rendered by the driver.
    pub scripts: Vec<Script>,
}

impl Change {
    /// Build a change from optional endpoints.
    ///
    /// Fails when both endpoints are missing, when they refer to different
    /// object types, or when `kind` is inconsistent with the endpoints.
    pub fn new(kind: ChangeKind, old: Option<ObjectRef>, new: Option<ObjectRef>) -> Result<Self> {
        match (&old, &new) {
            (None, None) => {
                return Err(ShiftplanError::InvalidChange(format!(
                    "{} change has neither an old nor a new object",
                    kind
                )))
            }
            (Some(o), Some(n)) if o.object_type() != n.object_type() => {
                return Err(ShiftplanError::InvalidChange(format!(
                    "{} change links a {:?} to a {:?}",
                    kind,
                    o.object_type(),
                    n.object_type()
                )))
            }
            _ => {}
        }
        let consistent = match kind {
            ChangeKind::Add => new.is_some(),
            ChangeKind::Drop => old.is_some() && new.is_none(),
            ChangeKind::Modify | ChangeKind::Rename => old.is_some() && new.is_some(),
        };
        if !consistent {
            return Err(ShiftplanError::InvalidChange(format!(
                "{} change with old={:?}, new={:?}",
                kind, old, new
            )));
        }
        Ok(Self {
            old,
            new,
            kind,
            description: String::new(),
            notices: vec![],
            scripts: vec![],
        })
    }

    pub fn add(new: ObjectRef) -> Self {
        Self::unchecked(ChangeKind::Add, None, Some(new))
    }

    pub fn drop(old: ObjectRef) -> Self {
        Self::unchecked(ChangeKind::Drop, Some(old), None)
    }

    pub fn modify(old: ObjectRef, new: ObjectRef) -> Self {
        Self::unchecked(ChangeKind::Modify, Some(old), Some(new))
    }

    pub fn rename(old: ObjectRef, new: ObjectRef) -> Self {
        Self::unchecked(ChangeKind::Rename, Some(old), Some(new))
    }

    /// An Add that replaces an optional old object (routines): Modify when the
    /// old object exists.
    pub fn replace(old: Option<ObjectRef>, new: ObjectRef) -> Self {
        match old {
            Some(old) => Self::modify(old, new),
            None => Self::add(new),
        }
    }

    fn unchecked(kind: ChangeKind, old: Option<ObjectRef>, new: Option<ObjectRef>) -> Self {
        Self {
            old,
            new,
            kind,
            description: String::new(),
            notices: vec![],
            scripts: vec![],
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notices.push(notice.into());
        self
    }

    /// The deployed object, absent for an Add.
    pub fn old_object(&self) -> Option<&ObjectRef> {
        self.old.as_ref()
    }

    /// The desired object, absent for a Drop.
    pub fn new_object(&self) -> Option<&ObjectRef> {
        self.new.as_ref()
    }

    /// Object type of whichever endpoint is present.
    pub fn object_type(&self) -> ObjectType {
        match (&self.new, &self.old) {
            (Some(r), _) | (None, Some(r)) => r.object_type(),
            (None, None) => unreachable!("change without endpoints cannot be constructed"),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// All changes that belong to one table. Used for reporting only.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeGroup {
    /// Display name of the table (new name when the table exists in the
    /// desired schema).
    pub table: String,
    pub old: Option<TableId>,
    pub new: Option<TableId>,
    pub changes: Vec<Change>,
}

/// Output of the diff builder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub groups: Vec<ChangeGroup>,

    /// Schema-level changes: schemas, sequences, custom types, standalone
    /// routines and referential constraints.
    pub changes: Vec<Change>,

    /// Old-side columns that were modified.
    pub changed_columns: HashSet<ColumnId>,

    /// Old-side keys that no longer match their desired shape.
    pub changed_keys: HashSet<KeyId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.changes.is_empty()) && self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.changes.len()).sum::<usize>() + self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> + '_ {
        self.groups
            .iter()
            .flat_map(|g| g.changes.iter())
            .chain(self.changes.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Change> + '_ {
        self.groups
            .iter_mut()
            .flat_map(|g| g.changes.iter_mut())
            .chain(self.changes.iter_mut())
    }

    /// Every notice across all changes, prefixed with the change description.
    pub fn notices(&self) -> Vec<String> {
        self.iter()
            .flat_map(|c| c.notices.iter().map(move |n| format!("{}: {}", c.description, n)))
            .collect()
    }

    /// Flattened copy of every rendered script, in emission order.
    pub fn scripts(&self) -> Vec<Script> {
        self.iter().flat_map(|c| c.scripts.iter().cloned()).collect()
    }
}
