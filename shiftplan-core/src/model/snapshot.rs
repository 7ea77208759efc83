use serde::{Deserialize, Serialize};

use super::{
    content_hash, Column, ColumnFlags, ColumnId, ColumnType, CustomType, CustomTypeId, Key,
    KeyColumn, KeyId, KeyType, RefConstraint, RefConstraintId, Routine, RoutineId, RoutineKind,
    Sequence, SequenceId, Table, TableId, TableKind, ViewDef,
};

/// One version of a relational schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub schemas: Vec<String>,
    pub tables: Vec<Table>,
    pub columns: Vec<Column>,
    pub keys: Vec<Key>,
    pub ref_constraints: Vec<RefConstraint>,
    pub sequences: Vec<Sequence>,
    pub custom_types: Vec<CustomType>,
    pub routines: Vec<Routine>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    pub fn column(&self, id: ColumnId) -> &Column {
        &self.columns[id.0]
    }

    pub fn key(&self, id: KeyId) -> &Key {
        &self.keys[id.0]
    }

    pub fn ref_constraint(&self, id: RefConstraintId) -> &RefConstraint {
        &self.ref_constraints[id.0]
    }

    pub fn sequence(&self, id: SequenceId) -> &Sequence {
        &self.sequences[id.0]
    }

    pub fn custom_type(&self, id: CustomTypeId) -> &CustomType {
        &self.custom_types[id.0]
    }

    pub fn routine(&self, id: RoutineId) -> &Routine {
        &self.routines[id.0]
    }

    /// Columns of a table in ordinal order.
    pub fn table_columns(&self, table: TableId) -> impl Iterator<Item = &Column> + '_ {
        self.table(table).columns.iter().map(|id| self.column(*id))
    }

    /// Case-insensitive lookup by schema-qualified name.
    pub fn find_table(&self, full_name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.full_name().eq_ignore_ascii_case(full_name))
    }

    /// Case-insensitive lookup of a column within a table.
    pub fn find_column(&self, table: TableId, name: &str) -> Option<&Column> {
        self.table_columns(table)
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn find_sequence(&self, full_name: &str) -> Option<&Sequence> {
        self.sequences
            .iter()
            .find(|s| s.full_name().eq_ignore_ascii_case(full_name))
    }

    pub fn find_custom_type(&self, full_name: &str) -> Option<&CustomType> {
        self.custom_types
            .iter()
            .find(|t| t.full_name().eq_ignore_ascii_case(full_name))
    }

    pub fn find_routine(&self, full_name: &str) -> Option<&Routine> {
        self.routines
            .iter()
            .find(|r| r.full_name().eq_ignore_ascii_case(full_name))
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    /// True if any object of this snapshot lives in `schema`.
    pub fn schema_in_use(&self, schema: &str) -> bool {
        let used = |s: &String| s.eq_ignore_ascii_case(schema);
        self.tables.iter().any(|t| used(&t.schema))
            || self.sequences.iter().any(|s| used(&s.schema))
            || self.custom_types.iter().any(|t| used(&t.schema))
            || self.routines.iter().any(|r| used(&r.schema))
    }

    pub fn add_schema(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.has_schema(&name) {
            self.schemas.push(name);
        }
    }

    pub fn add_table(&mut self, schema: impl Into<String>, name: impl Into<String>) -> TableId {
        self.push_table(schema.into(), name.into(), TableKind::Table, None)
    }

    pub fn add_view(
        &mut self,
        schema: impl Into<String>,
        name: impl Into<String>,
        definition: impl Into<String>,
        materialized: bool,
    ) -> TableId {
        let definition = definition.into();
        let view = ViewDef {
            hash: content_hash(&definition),
            definition,
            materialized,
        };
        self.push_table(schema.into(), name.into(), TableKind::View, Some(view))
    }

    fn push_table(
        &mut self,
        schema: String,
        name: String,
        kind: TableKind,
        view: Option<ViewDef>,
    ) -> TableId {
        let id = TableId(self.tables.len());
        self.tables.push(Table {
            id,
            schema,
            name,
            kind,
            columns: vec![],
            keys: vec![],
            ref_constraints: vec![],
            primary_key: None,
            view,
            routines: vec![],
            previous_names: vec![],
        });
        id
    }

    /// Record a historical name for rename detection.
    pub fn add_previous_table_name(&mut self, table: TableId, name: impl Into<String>) {
        self.tables[table.0].previous_names.push(name.into());
    }

    pub fn add_column(
        &mut self,
        table: TableId,
        name: impl Into<String>,
        ty: ColumnType,
        flags: ColumnFlags,
    ) -> ColumnId {
        let id = ColumnId(self.columns.len());
        self.columns.push(Column {
            id,
            table,
            name: name.into(),
            ty,
            flags,
            default: None,
            previous_names: vec![],
        });
        self.tables[table.0].columns.push(id);
        id
    }

    pub fn set_column_default(&mut self, column: ColumnId, default: impl Into<String>) {
        self.columns[column.0].default = Some(default.into());
    }

    pub fn add_previous_column_name(&mut self, column: ColumnId, name: impl Into<String>) {
        self.columns[column.0].previous_names.push(name.into());
    }

    /// Add a key to `table`. A primary key becomes the table's primary key.
    pub fn add_key(
        &mut self,
        table: TableId,
        name: impl Into<String>,
        key_type: KeyType,
        columns: Vec<KeyColumn>,
    ) -> KeyId {
        let id = KeyId(self.keys.len());
        self.keys.push(Key {
            id,
            table,
            name: name.into(),
            key_type,
            columns,
            included: vec![],
            filter: None,
        });
        let t = &mut self.tables[table.0];
        t.keys.push(id);
        if key_type.is_primary() {
            t.primary_key = Some(id);
        }
        id
    }

    pub fn set_key_included(&mut self, key: KeyId, included: Vec<ColumnId>) {
        self.keys[key.0].included = included;
    }

    pub fn set_key_filter(&mut self, key: KeyId, filter: impl Into<String>) {
        self.keys[key.0].filter = Some(filter.into());
    }

    /// Add a foreign key relationship. The constraint is owned by the table
    /// of `from_key`.
    pub fn add_ref_constraint(
        &mut self,
        from_key: KeyId,
        to_key: KeyId,
        cascade_delete: bool,
    ) -> RefConstraintId {
        let id = RefConstraintId(self.ref_constraints.len());
        self.ref_constraints.push(RefConstraint {
            id,
            from_key,
            to_key,
            cascade_delete,
        });
        let owner = self.keys[from_key.0].table;
        self.tables[owner.0].ref_constraints.push(id);
        id
    }

    pub fn add_sequence(
        &mut self,
        schema: impl Into<String>,
        name: impl Into<String>,
        data_type: impl Into<String>,
        start: i64,
        increment: i64,
    ) -> SequenceId {
        let id = SequenceId(self.sequences.len());
        self.sequences.push(Sequence {
            id,
            schema: schema.into(),
            name: name.into(),
            data_type: data_type.into(),
            start,
            increment,
        });
        id
    }

    pub fn add_custom_type(
        &mut self,
        schema: impl Into<String>,
        name: impl Into<String>,
        definition: impl Into<String>,
    ) -> CustomTypeId {
        let id = CustomTypeId(self.custom_types.len());
        self.custom_types.push(CustomType {
            id,
            schema: schema.into(),
            name: name.into(),
            definition: definition.into(),
        });
        id
    }

    /// Add a routine, optionally owned by a table.
    pub fn add_routine(
        &mut self,
        table: Option<TableId>,
        schema: impl Into<String>,
        name: impl Into<String>,
        kind: RoutineKind,
        body: impl Into<String>,
    ) -> RoutineId {
        let id = RoutineId(self.routines.len());
        let body = body.into();
        self.routines.push(Routine {
            id,
            table,
            schema: schema.into(),
            name: name.into(),
            kind,
            hash: content_hash(&body),
            body,
        });
        if let Some(table) = table {
            self.tables[table.0].routines.push(id);
        }
        id
    }

    /// Load a snapshot previously written with [`Snapshot::save`].
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::ShiftplanError::SnapshotError {
                reason: format!("Failed to read '{}': {}", path.display(), e),
            }
        })?;
        let snapshot: Self = serde_json::from_str(&content)?;
        snapshot.validate().map_err(|reason| crate::error::ShiftplanError::SnapshotError {
            reason: format!("Invalid snapshot '{}': {}", path.display(), reason),
        })?;
        Ok(snapshot)
    }

    /// Check that every stored id matches its position and every cross
    /// reference points at an existing object of the right table.
    pub fn validate(&self) -> std::result::Result<(), String> {
        fn positions<T>(kind: &str, items: &[T], id: impl Fn(&T) -> usize) -> std::result::Result<(), String> {
            match items.iter().enumerate().find(|(i, item)| id(item) != *i) {
                Some((i, item)) => Err(format!("{} at position {} carries id {}", kind, i, id(item))),
                None => Ok(()),
            }
        }
        positions("table", &self.tables, |t| t.id.0)?;
        positions("column", &self.columns, |c| c.id.0)?;
        positions("key", &self.keys, |k| k.id.0)?;
        positions("ref constraint", &self.ref_constraints, |r| r.id.0)?;
        positions("sequence", &self.sequences, |s| s.id.0)?;
        positions("custom type", &self.custom_types, |t| t.id.0)?;
        positions("routine", &self.routines, |r| r.id.0)?;

        let column_of = |owner: &Table, id: ColumnId| match self.columns.get(id.0) {
            Some(c) if c.table == owner.id => Ok(()),
            Some(_) => Err(format!("column {} does not belong to {}", id.0, owner.full_name())),
            None => Err(format!("{} references missing column {}", owner.full_name(), id.0)),
        };
        let key_of = |owner: &Table, id: KeyId| match self.keys.get(id.0) {
            Some(k) if k.table == owner.id => Ok(()),
            Some(_) => Err(format!("key {} does not belong to {}", id.0, owner.full_name())),
            None => Err(format!("{} references missing key {}", owner.full_name(), id.0)),
        };

        for t in &self.tables {
            for id in &t.columns {
                column_of(t, *id)?;
            }
            for id in t.keys.iter().chain(&t.primary_key) {
                key_of(t, *id)?;
            }
            for id in &t.ref_constraints {
                let rc = self
                    .ref_constraints
                    .get(id.0)
                    .ok_or_else(|| format!("{} references missing ref constraint {}", t.full_name(), id.0))?;
                key_of(t, rc.from_key)?;
            }
            for id in &t.routines {
                match self.routines.get(id.0) {
                    Some(r) if r.table == Some(t.id) => {}
                    _ => return Err(format!("{} references foreign or missing routine {}", t.full_name(), id.0)),
                }
            }
        }

        for c in &self.columns {
            if c.table.0 >= self.tables.len() {
                return Err(format!("column '{}' references missing table {}", c.name, c.table.0));
            }
        }
        for k in &self.keys {
            let owner = self
                .tables
                .get(k.table.0)
                .ok_or_else(|| format!("key '{}' references missing table {}", k.name, k.table.0))?;
            for id in k.columns.iter().map(|kc| kc.column).chain(k.included.iter().copied()) {
                column_of(owner, id)?;
            }
        }
        for rc in &self.ref_constraints {
            if rc.from_key.0 >= self.keys.len() || rc.to_key.0 >= self.keys.len() {
                return Err(format!("ref constraint {} references a missing key", rc.id.0));
            }
        }
        for r in &self.routines {
            if r.table.is_some_and(|t| t.0 >= self.tables.len()) {
                return Err(format!("routine '{}' references a missing table", r.full_name()));
            }
        }
        Ok(())
    }

    /// Write the snapshot as pretty-printed JSON.
    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| crate::error::ShiftplanError::SnapshotError {
            reason: format!("Failed to write '{}': {}", path.display(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_key_sets_primary_key() {
        let mut s = Snapshot::new();
        let t = s.add_table("public", "order");
        let id = s.add_column(t, "id", ColumnType::named("int4"), ColumnFlags::PRIMARY_KEY);
        let pk = s.add_key(t, "pk_order", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(id)]);
        let ix = s.add_key(t, "ix_order", KeyType::INDEX, vec![KeyColumn::asc(id)]);

        assert_eq!(s.table(t).primary_key, Some(pk));
        assert_eq!(s.table(t).keys, vec![pk, ix]);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut s = Snapshot::new();
        let t = s.add_table("Sales", "Order");
        s.add_column(t, "Total", ColumnType::named("int4"), ColumnFlags::NONE);

        assert!(s.find_table("sales.order").is_some());
        assert!(s.find_column(t, "TOTAL").is_some());
        assert!(s.find_table("sales.orders").is_none());
    }

    #[test]
    fn test_ref_constraint_owned_by_from_table() {
        let mut s = Snapshot::new();
        let customer = s.add_table("public", "customer");
        let cid = s.add_column(customer, "id", ColumnType::named("int4"), ColumnFlags::NONE);
        let pk = s.add_key(customer, "pk_customer", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(cid)]);
        let order = s.add_table("public", "order");
        let fk_col = s.add_column(order, "customer_id", ColumnType::named("int4"), ColumnFlags::NONE);
        let fk = s.add_key(order, "fk_order_customer", KeyType::FOREIGN_KEY, vec![KeyColumn::asc(fk_col)]);
        let rc = s.add_ref_constraint(fk, pk, false);

        assert_eq!(s.table(order).ref_constraints, vec![rc]);
        assert!(s.table(customer).ref_constraints.is_empty());
    }

    #[test]
    fn test_load_rejects_dangling_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        let mut s = Snapshot::new();
        let t = s.add_table("public", "order");
        s.tables[t.0].columns.push(ColumnId(7));
        s.save(&path).unwrap();

        let err = Snapshot::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing column 7"), "{}", err);
    }

    #[test]
    fn test_validate_catches_misplaced_and_foreign_ids() {
        let mut s = Snapshot::new();
        let a = s.add_table("public", "a");
        let b = s.add_table("public", "b");
        let col = s.add_column(b, "id", ColumnType::named("int4"), ColumnFlags::NONE);
        let key = s.add_key(b, "pk_b", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(col)]);
        assert!(s.validate().is_ok());

        let mut foreign = s.clone();
        foreign.tables[a.0].keys.push(key);
        assert!(foreign.validate().is_err());

        let mut misplaced = s.clone();
        misplaced.columns[0].id = ColumnId(3);
        assert_eq!(misplaced.validate().unwrap_err(), "column at position 0 carries id 3");

        let mut dangling = s;
        dangling.keys[0].columns[0].column = ColumnId(9);
        assert!(dangling.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut s = Snapshot::new();
        s.add_schema("public");
        let t = s.add_view("public", "v_totals", "SELECT 1", true);

        s.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap();

        assert_eq!(loaded.schemas, vec!["public"]);
        assert_eq!(loaded.table(t).view, s.table(t).view);
    }
}
