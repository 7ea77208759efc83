use serde::{Deserialize, Serialize};

use super::{CustomTypeId, RoutineId, SequenceId, TableId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: SequenceId,
    pub schema: String,
    pub name: String,
    /// Integer type of the sequence (e.g. `bigint`).
    pub data_type: String,
    pub start: i64,
    pub increment: i64,
}

impl Sequence {
    pub fn full_name(&self) -> String {
        super::full_name(&self.schema, &self.name)
    }
}

/// A user-defined type (enum, domain, composite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomType {
    pub id: CustomTypeId,
    pub schema: String,
    pub name: String,
    /// Type body as it follows `CREATE TYPE name AS`, e.g. `ENUM ('a', 'b')`.
    pub definition: String,
}

impl CustomType {
    pub fn full_name(&self) -> String {
        super::full_name(&self.schema, &self.name)
    }
}

/// A stored procedure or function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    pub id: RoutineId,

    /// Owning table for generated CRUD routines; `None` for standalone routines.
    pub table: Option<TableId>,

    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,

    /// Full source text of the routine.
    pub body: String,

    /// Content hash of the normalized body, see [`content_hash`].
    pub hash: u32,
}

impl Routine {
    pub fn full_name(&self) -> String {
        super::full_name(&self.schema, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutineKind {
    StoredProcedure,
    Function,
}

/// CRC32 of a SQL body with line endings unified and trailing whitespace
/// removed from every line, so that servers echoing the text back with
/// different line endings do not register as a change.
pub fn content_hash(text: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for line in text.trim().lines() {
        hasher.update(line.trim_end().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_ignores_line_endings() {
        let unix = "SELECT 1\nFROM t\n";
        let windows = "SELECT 1  \r\nFROM t\r\n";
        assert_eq!(content_hash(unix), content_hash(windows));
    }

    #[test]
    fn test_content_hash_detects_body_change() {
        assert_ne!(content_hash("SELECT 1"), content_hash("SELECT 2"));
    }
}
