//! PostgreSQL DDL rendering.

use crate::capability::Capabilities;
use crate::change::{Change, ChangeKind, ObjectRef};
use crate::driver::{Driver, RenderContext};
use crate::error::{Result, ShiftplanError};
use crate::model::{
    Column, ColumnFlags, Key, KeyType, RefConstraintId, RoutineId, RoutineKind, Snapshot, Table, TableId,
};
use crate::script::{ApplyPhase, Script, ScriptKind};

use super::db::{quote_ident, quote_qualified};

#[derive(Debug, Clone, Default)]
pub struct PostgresDriver {
    /// Role granted access to every created table, view and routine.
    grant_role: Option<String>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant_role(mut self, role: impl Into<String>) -> Self {
        self.grant_role = Some(role.into());
        self
    }
}

impl Driver for PostgresDriver {
    fn capability(&self) -> &Capabilities {
        &Capabilities::POSTGRESQL
    }

    fn render_change(&self, cx: &RenderContext<'_>, change: &mut Change) -> Result<()> {
        let r = Renderer { cx, driver: self };
        let scripts = match (change.kind, change.old_object().cloned(), change.new_object().cloned()) {
            (ChangeKind::Add, _, Some(ObjectRef::Schema(name))) => vec![Script::new(
                ScriptKind::SchemaAdd,
                &name,
                format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&name)),
            )],

            (ChangeKind::Add, _, Some(ObjectRef::Table(id))) => r.create_table(cx.new.table(id)),
            (ChangeKind::Drop, Some(ObjectRef::Table(id)), _) => vec![r.drop_table(cx.old.table(id))],
            (ChangeKind::Rename, Some(ObjectRef::Table(o)), Some(ObjectRef::Table(n))) => {
                r.rename_table(cx.old.table(o), cx.new.table(n))
            }

            (ChangeKind::Add, _, Some(ObjectRef::Column(id))) => {
                let column = cx.new.column(id);
                if !column.is_nullable() && column.default.is_none() && !column.flags.contains(ColumnFlags::IDENTITY) {
                    change.notices.push(
                        "NOT NULL column without a default fails on a table that already holds rows".to_string(),
                    );
                }
                vec![r.add_column(column)]
            }
            (ChangeKind::Drop, Some(ObjectRef::Column(id)), _) => vec![r.drop_column(cx.old.column(id))],
            (ChangeKind::Rename, Some(ObjectRef::Column(o)), Some(ObjectRef::Column(n))) => {
                vec![r.rename_column(cx.old.column(o), cx.new.column(n))]
            }
            (ChangeKind::Modify, Some(ObjectRef::Column(o)), Some(ObjectRef::Column(n))) => {
                vec![r.modify_column(cx.old.column(o), cx.new.column(n))]
            }

            (ChangeKind::Add, _, Some(ObjectRef::Key(id))) => vec![r.create_key(cx.new.key(id))],
            (ChangeKind::Drop, Some(ObjectRef::Key(id)), _) => vec![r.drop_key(cx.old.key(id))],

            (ChangeKind::Add, _, Some(ObjectRef::RefConstraint(id))) => vec![r.add_ref_constraint(id)],
            (ChangeKind::Drop, Some(ObjectRef::RefConstraint(id)), _) => vec![r.drop_ref_constraint(id)],
            (ChangeKind::Modify, Some(ObjectRef::RefConstraint(o)), Some(ObjectRef::RefConstraint(n))) => {
                vec![r.drop_ref_constraint(o), r.add_ref_constraint(n)]
            }

            (ChangeKind::Add, _, Some(ObjectRef::Sequence(id))) => {
                let s = cx.new.sequence(id);
                vec![Script::new(
                    ScriptKind::SequenceAdd,
                    s.full_name(),
                    format!(
                        "CREATE SEQUENCE IF NOT EXISTS {} AS {} START WITH {} INCREMENT BY {}",
                        quote_qualified(&s.schema, &s.name),
                        s.data_type,
                        s.start,
                        s.increment
                    ),
                )]
            }
            (ChangeKind::Drop, Some(ObjectRef::Sequence(id)), _) => {
                let s = cx.old.sequence(id);
                vec![Script::new(
                    ScriptKind::SequenceDrop,
                    s.full_name(),
                    format!("DROP SEQUENCE IF EXISTS {}", quote_qualified(&s.schema, &s.name)),
                )]
            }

            (ChangeKind::Add, _, Some(ObjectRef::CustomType(id))) => {
                let t = cx.new.custom_type(id);
                vec![Script::new(
                    ScriptKind::CustomTypeAdd,
                    t.full_name(),
                    format!("CREATE TYPE {} AS {}", quote_qualified(&t.schema, &t.name), t.definition),
                )]
            }
            (ChangeKind::Drop, Some(ObjectRef::CustomType(id)), _) => {
                let t = cx.old.custom_type(id);
                vec![Script::new(
                    ScriptKind::CustomTypeDrop,
                    t.full_name(),
                    format!("DROP TYPE IF EXISTS {}", quote_qualified(&t.schema, &t.name)),
                )]
            }

            (ChangeKind::Add | ChangeKind::Modify, old, Some(ObjectRef::Routine(id))) => {
                let mut scripts = vec![];
                if let Some(ObjectRef::Routine(old_id)) = old {
                    scripts.push(r.drop_routine(cx.old, old_id));
                }
                scripts.extend(r.create_routine(id));
                scripts
            }
            (ChangeKind::Drop, Some(ObjectRef::Routine(id)), _) => {
                change.notices.push(
                    "routine is dropped by name; overloaded routines need an explicit signature".to_string(),
                );
                vec![r.drop_routine(cx.old, id)]
            }

            (kind, old, new) => {
                return Err(ShiftplanError::RenderFailed {
                    change: change.description.clone(),
                    reason: format!("{} of {:?} is not supported", kind, new.or(old).map(|o| o.object_type())),
                })
            }
        };
        change.scripts.extend(scripts);
        Ok(())
    }
}

struct Renderer<'r, 'a> {
    cx: &'r RenderContext<'a>,
    driver: &'r PostgresDriver,
}

impl Renderer<'_, '_> {
    fn create_table(&self, t: &Table) -> Vec<Script> {
        let name = quote_qualified(&t.schema, &t.name);
        let mut scripts = vec![];

        if let Some(view) = &t.view {
            let keyword = if view.materialized { "MATERIALIZED VIEW" } else { "VIEW" };
            scripts.push(Script::new(
                ScriptKind::ViewAdd,
                t.full_name(),
                format!("CREATE {} {} AS {}", keyword, name, view.definition.trim().trim_end_matches(';')),
            ));
            if let Some(role) = &self.driver.grant_role {
                scripts.push(Script::new(
                    ScriptKind::Grant,
                    t.full_name(),
                    format!("GRANT SELECT ON {} TO {}", name, quote_ident(role)),
                ));
            }
            return scripts;
        }

        let columns: Vec<String> = self
            .cx
            .new
            .table_columns(t.id)
            .map(|c| format!("    {}", column_definition(c)))
            .collect();
        scripts.push(Script::new(
            ScriptKind::TableAdd,
            t.full_name(),
            format!("CREATE TABLE {} (\n{}\n)", name, columns.join(",\n")),
        ));
        if let Some(role) = &self.driver.grant_role {
            scripts.push(Script::new(
                ScriptKind::Grant,
                t.full_name(),
                format!(
                    "GRANT SELECT, INSERT, UPDATE, DELETE ON TABLE {} TO {}",
                    name,
                    quote_ident(role)
                ),
            ));
        }
        scripts
    }

    fn drop_table(&self, t: &Table) -> Script {
        let name = quote_qualified(&t.schema, &t.name);
        match &t.view {
            Some(view) if view.materialized => Script::new(
                ScriptKind::ViewDrop,
                t.full_name(),
                format!("DROP MATERIALIZED VIEW IF EXISTS {}", name),
            ),
            Some(_) => Script::new(ScriptKind::ViewDrop, t.full_name(), format!("DROP VIEW IF EXISTS {}", name)),
            None => Script::new(
                ScriptKind::TableDrop,
                t.full_name(),
                format!("DROP TABLE IF EXISTS {} CASCADE", name),
            ),
        }
    }

    fn rename_table(&self, old: &Table, new: &Table) -> Vec<Script> {
        let keyword = relation_keyword(old);
        let mut scripts = vec![];
        let mut current = quote_qualified(&old.schema, &old.name);

        if !old.schema.eq_ignore_ascii_case(&new.schema) {
            scripts.push(Script::new(
                ScriptKind::TableRename,
                new.full_name(),
                format!("ALTER {} {} SET SCHEMA {}", keyword, current, quote_ident(&new.schema)),
            ));
            current = quote_qualified(&new.schema, &old.name);
        }
        if old.name != new.name {
            scripts.push(Script::new(
                ScriptKind::TableRename,
                new.full_name(),
                format!("ALTER {} {} RENAME TO {}", keyword, current, quote_ident(&new.name)),
            ));
        }
        scripts
    }

    /// Quoted name of a desired-side table.
    fn new_name(&self, table: TableId) -> String {
        let t = self.cx.new.table(table);
        quote_qualified(&t.schema, &t.name)
    }

    /// Quoted name a deployed table carries once renames have run.
    fn current_name(&self, old_table: TableId) -> String {
        let t = match self.cx.peers.tables.new_of(old_table) {
            Some(new_id) => self.cx.new.table(new_id),
            None => self.cx.old.table(old_table),
        };
        quote_qualified(&t.schema, &t.name)
    }

    fn add_column(&self, c: &Column) -> Script {
        let table = self.new_name(c.table);
        Script::new(
            ScriptKind::ColumnAdd,
            column_object(self.cx.new, c),
            format!("ALTER TABLE {} ADD COLUMN {}", table, column_definition(c)),
        )
    }

    fn drop_column(&self, c: &Column) -> Script {
        let table = self.current_name(c.table);
        Script::new(
            ScriptKind::ColumnDrop,
            column_object(self.cx.old, c),
            format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, quote_ident(&c.name)),
        )
    }

    fn rename_column(&self, old: &Column, new: &Column) -> Script {
        let table = self.new_name(new.table);
        Script::new(
            ScriptKind::ColumnRename,
            column_object(self.cx.new, new),
            format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                table,
                quote_ident(&old.name),
                quote_ident(&new.name)
            ),
        )
    }

    fn modify_column(&self, old: &Column, new: &Column) -> Script {
        let table = self.new_name(new.table);
        let column = quote_ident(&new.name);
        let mut actions = vec![];
        let new_type = new.ty.sql_spec();
        if !old.ty.sql_spec().eq_ignore_ascii_case(&new_type) {
            actions.push(format!(
                "ALTER COLUMN {} TYPE {} USING {}::{}",
                column, new_type, column, new_type
            ));
        }
        if old.is_nullable() != new.is_nullable() {
            let verb = if new.is_nullable() { "DROP" } else { "SET" };
            actions.push(format!("ALTER COLUMN {} {} NOT NULL", column, verb));
        }
        if old.default != new.default {
            match &new.default {
                Some(default) => actions.push(format!("ALTER COLUMN {} SET DEFAULT {}", column, default)),
                None => actions.push(format!("ALTER COLUMN {} DROP DEFAULT", column)),
            }
        }
        Script::new(
            ScriptKind::ColumnModify,
            column_object(self.cx.new, new),
            format!("ALTER TABLE {} {}", table, actions.join(", ")),
        )
    }

    fn create_key(&self, key: &Key) -> Script {
        let snapshot = self.cx.new;
        let t = snapshot.table(key.table);
        let table = quote_qualified(&t.schema, &t.name);
        let object = format!("{}.{}", t.full_name(), key.name);
        let columns = key
            .columns
            .iter()
            .map(|kc| {
                let name = quote_ident(&snapshot.column(kc.column).name);
                if kc.desc {
                    format!("{} DESC", name)
                } else {
                    name
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let script = if key.key_type.is_primary() {
            Script::new(
                ScriptKind::PrimaryKeyAdd,
                object,
                format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                    table,
                    quote_ident(&key.name),
                    columns
                ),
            )
        } else if key.key_type.contains(KeyType::UNIQUE) && !key.key_type.contains(KeyType::INDEX) {
            Script::new(
                ScriptKind::IndexAdd,
                object,
                format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                    table,
                    quote_ident(&key.name),
                    columns
                ),
            )
        } else {
            let unique = if key.key_type.contains(KeyType::UNIQUE) { "UNIQUE " } else { "" };
            let mut sql = format!(
                "CREATE {}INDEX {} ON {} ({})",
                unique,
                quote_ident(&key.name),
                table,
                columns
            );
            if !key.included.is_empty() {
                let included: Vec<String> = key
                    .included
                    .iter()
                    .map(|c| quote_ident(&snapshot.column(*c).name))
                    .collect();
                sql.push_str(&format!(" INCLUDE ({})", included.join(", ")));
            }
            if let Some(filter) = &key.filter {
                sql.push_str(&format!(" WHERE {}", filter));
            }
            Script::new(ScriptKind::IndexAdd, object, sql)
        };

        if !key.key_type.contains(KeyType::CLUSTERED) {
            script
        } else if t.is_view() {
            // Follows the late drop of the previous definition.
            if self.cx.peers.keys.old_of(key.id).is_some() {
                script.in_phase(ApplyPhase::Late)
            } else {
                script
            }
        } else if self.clusters_existing_table(key) {
            script.in_phase(ApplyPhase::Early)
        } else {
            script
        }
    }

    /// Whether a new clustered key targets a base table and columns that are
    /// already deployed under the same names, so it can be built before
    /// default-phase work.
    fn clusters_existing_table(&self, key: &Key) -> bool {
        let cx = self.cx;
        if cx.peers.keys.old_of(key.id).is_some() {
            return false;
        }
        let Some(old_t) = cx.peers.tables.old_of(key.table) else {
            return false;
        };
        let old_t = cx.old.table(old_t);
        if old_t.is_view() || !old_t.full_name().eq_ignore_ascii_case(&cx.new.table(key.table).full_name()) {
            return false;
        }
        key.columns
            .iter()
            .map(|kc| kc.column)
            .chain(key.included.iter().copied())
            .all(|id| {
                cx.peers
                    .columns
                    .old_of(id)
                    .is_some_and(|o| cx.old.column(o).name.eq_ignore_ascii_case(&cx.new.column(id).name))
            })
    }

    fn drop_key(&self, key: &Key) -> Script {
        let t = self.cx.old.table(key.table);
        let object = format!("{}.{}", t.full_name(), key.name);
        let script = if key.key_type.is_primary() || !key.key_type.contains(KeyType::INDEX) {
            let kind = if key.key_type.is_primary() {
                ScriptKind::PrimaryKeyDrop
            } else {
                ScriptKind::IndexDrop
            };
            Script::new(
                kind,
                object,
                format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                    quote_qualified(&t.schema, &t.name),
                    quote_ident(&key.name)
                ),
            )
        } else {
            Script::new(
                ScriptKind::IndexDrop,
                object,
                format!("DROP INDEX IF EXISTS {}", quote_qualified(&t.schema, &key.name)),
            )
        };

        if key.key_type.contains(KeyType::CLUSTERED) && t.is_view() {
            script.in_phase(ApplyPhase::Late)
        } else {
            script
        }
    }

    fn add_ref_constraint(&self, id: RefConstraintId) -> Script {
        let s = self.cx.new;
        let rc = s.ref_constraint(id);
        let (from, to) = (s.key(rc.from_key), s.key(rc.to_key));
        let (from_t, to_t) = (s.table(from.table), s.table(to.table));
        let column_list = |key: &Key| {
            key.columns
                .iter()
                .map(|kc| quote_ident(&s.column(kc.column).name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_qualified(&from_t.schema, &from_t.name),
            quote_ident(&from.name),
            column_list(from),
            quote_qualified(&to_t.schema, &to_t.name),
            column_list(to)
        );
        if rc.cascade_delete {
            sql.push_str(" ON DELETE CASCADE");
        }
        Script::new(
            ScriptKind::RefConstraintAdd,
            format!("{}.{}", from_t.full_name(), from.name),
            sql,
        )
    }

    fn drop_ref_constraint(&self, id: RefConstraintId) -> Script {
        let s = self.cx.old;
        let from = s.key(s.ref_constraint(id).from_key);
        let t = s.table(from.table);
        Script::new(
            ScriptKind::RefConstraintDrop,
            format!("{}.{}", t.full_name(), from.name),
            format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                quote_qualified(&t.schema, &t.name),
                quote_ident(&from.name)
            ),
        )
    }

    fn create_routine(&self, id: RoutineId) -> Vec<Script> {
        let r = self.cx.new.routine(id);
        let mut scripts = vec![Script::new(ScriptKind::RoutineAdd, r.full_name(), r.body.trim())];
        if let Some(role) = &self.driver.grant_role {
            scripts.push(Script::new(
                ScriptKind::Grant,
                r.full_name(),
                format!(
                    "GRANT EXECUTE ON {} {} TO {}",
                    routine_keyword(r.kind),
                    quote_qualified(&r.schema, &r.name),
                    quote_ident(role)
                ),
            ));
        }
        scripts
    }

    fn drop_routine(&self, snapshot: &Snapshot, id: RoutineId) -> Script {
        let r = snapshot.routine(id);
        Script::new(
            ScriptKind::RoutineDrop,
            r.full_name(),
            format!(
                "DROP {} IF EXISTS {}",
                routine_keyword(r.kind),
                quote_qualified(&r.schema, &r.name)
            ),
        )
    }
}

fn column_definition(c: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&c.name), c.ty.sql_spec());
    if c.flags.contains(ColumnFlags::IDENTITY) {
        def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    }
    if !c.is_nullable() {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &c.default {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    def
}

fn column_object(snapshot: &Snapshot, c: &Column) -> String {
    format!("{}.{}", snapshot.table(c.table).full_name(), c.name)
}

fn relation_keyword(t: &Table) -> &'static str {
    if t.is_materialized_view() {
        "MATERIALIZED VIEW"
    } else if t.is_view() {
        "VIEW"
    } else {
        "TABLE"
    }
}

fn routine_keyword(kind: RoutineKind) -> &'static str {
    match kind {
        RoutineKind::StoredProcedure => "PROCEDURE",
        RoutineKind::Function => "FUNCTION",
    }
}
