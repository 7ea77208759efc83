//! Executable units of DDL produced by a driver.

use serde::Serialize;
use std::fmt;

/// What a script does. Declaration order is the precedence the scheduler uses
/// within a phase: drops that unblock other work come before the structural
/// change they unblock, and creation follows dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ScriptKind {
    SchemaAdd,
    CustomTypeAdd,
    SequenceAdd,
    RoutineDrop,
    ViewDrop,
    RefConstraintDrop,
    IndexDrop,
    PrimaryKeyDrop,
    TableRename,
    ColumnRename,
    TableAdd,
    ColumnAdd,
    ColumnModify,
    ColumnDrop,
    TableDrop,
    ViewAdd,
    PrimaryKeyAdd,
    IndexAdd,
    RefConstraintAdd,
    RoutineAdd,
    /// Hand-written data migration SQL.
    Custom,
    Grant,
    SequenceDrop,
    CustomTypeDrop,
}

/// Scheduling tier applied before script-kind precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum ApplyPhase {
    Early,
    #[default]
    Default,
    Late,
}

/// One unit of vendor SQL.
#[derive(Debug, Clone, Serialize)]
pub struct Script {
    pub kind: ScriptKind,
    pub phase: ApplyPhase,

    /// Name of the object the script touches, for logs and reports.
    pub object: String,

    pub sql: String,

    /// Execution time, recorded once the script has run.
    pub elapsed_ms: Option<u64>,
}

impl Script {
    pub fn new(kind: ScriptKind, object: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            kind,
            phase: ApplyPhase::Default,
            object: object.into(),
            sql: sql.into(),
            elapsed_ms: None,
        }
    }

    pub fn in_phase(mut self, phase: ApplyPhase) -> Self {
        self.phase = phase;
        self
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.phase, self.kind, self.object)
    }
}
