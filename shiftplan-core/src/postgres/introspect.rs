//! Build a [`Snapshot`] of the deployed schema from the PostgreSQL catalog.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex_lite::Regex;
use tokio_postgres::Client;

use crate::error::Result;
use crate::model::{
    full_name, ColumnFlags, ColumnId, ColumnType, KeyColumn, KeyId, KeyType, RoutineKind, Snapshot,
    TableId,
};
use crate::upgrade::SnapshotLoader;

/// Reads tables, views, columns, keys, foreign keys, sequences, enum types
/// and routines of the configured schemas.
pub struct PgLoader<'a> {
    client: &'a Client,
    schemas: Vec<String>,
    /// Tables left out of the snapshot, as `schema.name`.
    exclude: Vec<String>,
}

impl<'a> PgLoader<'a> {
    pub fn new(client: &'a Client, schemas: Vec<String>) -> Self {
        Self {
            client,
            schemas,
            exclude: vec![],
        }
    }

    pub fn exclude_table(mut self, schema: &str, name: &str) -> Self {
        self.exclude.push(full_name(schema, name));
        self
    }
}

/// Catalog ids of every loaded relation.
#[derive(Default)]
struct Catalog {
    tables: HashMap<u32, TableId>,
    columns: HashMap<(u32, i16), ColumnId>,
    /// Index oid to key, used to resolve the referenced side of foreign keys.
    indexes: HashMap<u32, KeyId>,
}

#[async_trait]
impl SnapshotLoader for PgLoader<'_> {
    async fn load(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        let mut catalog = Catalog::default();

        for schema in &self.schemas {
            let exists = self
                .client
                .query_one(
                    "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)",
                    &[schema],
                )
                .await?
                .get::<_, bool>(0);
            if !exists {
                log::debug!("Schema not deployed; schema={}", schema);
                continue;
            }
            snapshot.add_schema(schema.as_str());

            self.load_relations(schema, &mut snapshot, &mut catalog).await?;
            self.load_columns(schema, &mut snapshot, &mut catalog).await?;
            self.load_indexes(schema, &mut snapshot, &mut catalog).await?;
            self.load_sequences(schema, &mut snapshot).await?;
            self.load_enums(schema, &mut snapshot).await?;
            self.load_routines(schema, &mut snapshot).await?;
        }
        // Foreign keys can reference a key in any loaded schema.
        for schema in &self.schemas {
            self.load_foreign_keys(schema, &mut snapshot, &catalog).await?;
        }

        log::info!(
            "Loaded deployed snapshot; schemas={}, tables={}, keys={}, routines={}",
            snapshot.schemas.len(),
            snapshot.tables.len(),
            snapshot.keys.len(),
            snapshot.routines.len()
        );
        Ok(snapshot)
    }
}

impl PgLoader<'_> {
    async fn load_relations(&self, schema: &str, snapshot: &mut Snapshot, catalog: &mut Catalog) -> Result<()> {
        let rows = self
            .client
            .query(
                "SELECT c.oid, c.relname, c.relkind::text,
                        CASE WHEN c.relkind IN ('v', 'm') THEN pg_get_viewdef(c.oid, true) END
                 FROM pg_class c
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE n.nspname = $1
                   AND c.relkind IN ('r', 'p', 'v', 'm')
                   AND NOT EXISTS (
                       SELECT 1 FROM pg_depend d WHERE d.objid = c.oid AND d.deptype = 'e'
                   )
                 ORDER BY c.relname",
                &[&schema],
            )
            .await?;

        for row in &rows {
            let oid: u32 = row.get(0);
            let name: String = row.get(1);
            if self.exclude.contains(&full_name(schema, &name)) {
                continue;
            }
            let relkind: String = row.get(2);
            let id = match relkind.as_str() {
                "v" | "m" => {
                    let definition: Option<String> = row.get(3);
                    snapshot.add_view(schema, name, definition.unwrap_or_default(), relkind == "m")
                }
                _ => snapshot.add_table(schema, name),
            };
            catalog.tables.insert(oid, id);
        }
        Ok(())
    }

    async fn load_columns(&self, schema: &str, snapshot: &mut Snapshot, catalog: &mut Catalog) -> Result<()> {
        let rows = self
            .client
            .query(
                "SELECT a.attrelid, a.attnum, a.attname,
                        format_type(a.atttypid, a.atttypmod),
                        a.attnotnull,
                        pg_get_expr(d.adbin, d.adrelid),
                        a.attidentity::text,
                        a.attgenerated::text
                 FROM pg_attribute a
                 JOIN pg_class c ON c.oid = a.attrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
                 WHERE n.nspname = $1
                   AND c.relkind IN ('r', 'p', 'v', 'm')
                   AND a.attnum > 0
                   AND NOT a.attisdropped
                 ORDER BY a.attrelid, a.attnum",
                &[&schema],
            )
            .await?;

        for row in &rows {
            let relid: u32 = row.get(0);
            let Some(&table) = catalog.tables.get(&relid) else {
                continue;
            };
            let attnum: i16 = row.get(1);
            let name: String = row.get(2);
            let type_name: String = row.get(3);
            let not_null: bool = row.get(4);
            let default: Option<String> = row.get(5);
            let identity: String = row.get(6);
            let generated: String = row.get(7);

            let mut flags = ColumnFlags::NONE;
            if !not_null {
                flags = flags | ColumnFlags::NULLABLE;
            }
            if !identity.is_empty() {
                flags = flags | ColumnFlags::IDENTITY;
            }
            if !generated.is_empty() {
                flags = flags | ColumnFlags::COMPUTED;
            }

            let id = snapshot.add_column(table, name, parse_column_type(&type_name), flags);
            // Generated columns carry their expression as a default.
            if let Some(default) = default.filter(|_| generated.is_empty()) {
                snapshot.set_column_default(id, default);
            }
            catalog.columns.insert((relid, attnum), id);
        }
        Ok(())
    }

    async fn load_indexes(&self, schema: &str, snapshot: &mut Snapshot, catalog: &mut Catalog) -> Result<()> {
        let rows = self
            .client
            .query(
                "SELECT i.indexrelid, i.indrelid, ic.relname,
                        i.indisprimary, i.indisunique, i.indisclustered,
                        i.indnkeyatts::int4,
                        i.indkey::int2[],
                        i.indoption::int2[],
                        pg_get_expr(i.indpred, i.indrelid),
                        con.contype::text
                 FROM pg_index i
                 JOIN pg_class ic ON ic.oid = i.indexrelid
                 JOIN pg_class c ON c.oid = i.indrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 LEFT JOIN pg_constraint con
                        ON con.conindid = i.indexrelid AND con.contype IN ('p', 'u', 'x')
                 WHERE n.nspname = $1
                 ORDER BY c.relname, ic.relname",
                &[&schema],
            )
            .await?;

        for row in &rows {
            let index_oid: u32 = row.get(0);
            let relid: u32 = row.get(1);
            let Some(&table) = catalog.tables.get(&relid) else {
                continue;
            };
            let name: String = row.get(2);
            let primary: bool = row.get(3);
            let unique: bool = row.get(4);
            let clustered: bool = row.get(5);
            let key_count = row.get::<_, i32>(6) as usize;
            let attnums: Vec<i16> = row.get(7);
            let options: Vec<i16> = row.get(8);
            let predicate: Option<String> = row.get(9);
            let constraint: Option<String> = row.get(10);

            // Expression indexes have no column to point at.
            if attnums.contains(&0) {
                log::debug!("Skipping expression index; index={}.{}", schema, name);
                continue;
            }
            let column = |attnum: &i16| catalog.columns.get(&(relid, *attnum)).copied();

            let mut columns = vec![];
            for (i, attnum) in attnums.iter().take(key_count).enumerate() {
                let Some(id) = column(attnum) else { continue };
                // Bit 0 of indoption is DESC.
                let desc = options.get(i).is_some_and(|o| o & 1 != 0);
                columns.push(if desc { KeyColumn::desc(id) } else { KeyColumn::asc(id) });
            }
            let included: Vec<ColumnId> = attnums.iter().skip(key_count).filter_map(column).collect();

            let mut key_type = match (primary, constraint.as_deref()) {
                (true, _) => KeyType::PRIMARY_KEY,
                (false, Some("u")) => KeyType::UNIQUE,
                (false, Some("x")) => KeyType::INDEX | KeyType::AUTO_CREATED,
                _ if unique => KeyType::UNIQUE_INDEX,
                _ => KeyType::INDEX,
            };
            if clustered {
                key_type = key_type | KeyType::CLUSTERED;
            }

            let key = snapshot.add_key(table, name, key_type, columns);
            if !included.is_empty() {
                snapshot.set_key_included(key, included);
            }
            if let Some(predicate) = predicate {
                snapshot.set_key_filter(key, predicate);
            }
            if primary {
                let pk_columns: Vec<ColumnId> = snapshot.key(key).columns.iter().map(|kc| kc.column).collect();
                for c in pk_columns {
                    let flags = snapshot.columns[c.0].flags;
                    snapshot.columns[c.0].flags = flags | ColumnFlags::PRIMARY_KEY;
                }
            }
            catalog.indexes.insert(index_oid, key);
        }
        Ok(())
    }

    async fn load_foreign_keys(&self, schema: &str, snapshot: &mut Snapshot, catalog: &Catalog) -> Result<()> {
        let rows = self
            .client
            .query(
                "SELECT con.conrelid, con.conname, con.conkey::int2[], con.conindid,
                        con.confdeltype::text
                 FROM pg_constraint con
                 JOIN pg_namespace n ON n.oid = con.connamespace
                 WHERE n.nspname = $1 AND con.contype = 'f'
                 ORDER BY con.conname",
                &[&schema],
            )
            .await?;

        for row in &rows {
            let relid: u32 = row.get(0);
            let name: String = row.get(1);
            let Some(&table) = catalog.tables.get(&relid) else {
                continue;
            };
            let attnums: Vec<i16> = row.get(2);
            let index_oid: u32 = row.get(3);
            let delete_action: String = row.get(4);

            let Some(&to_key) = catalog.indexes.get(&index_oid) else {
                log::warn!(
                    "Foreign key references a table outside the loaded schemas; constraint={}.{}",
                    schema,
                    name
                );
                continue;
            };
            let columns: Vec<KeyColumn> = attnums
                .iter()
                .filter_map(|a| catalog.columns.get(&(relid, *a)).copied())
                .map(KeyColumn::asc)
                .collect();

            let from_key = snapshot.add_key(table, name, KeyType::FOREIGN_KEY, columns);
            snapshot.add_ref_constraint(from_key, to_key, delete_action == "c");
        }
        Ok(())
    }

    async fn load_sequences(&self, schema: &str, snapshot: &mut Snapshot) -> Result<()> {
        // Sequences owned by serial or identity columns belong to their table.
        let rows = self
            .client
            .query(
                "SELECT s.relname, format_type(seq.seqtypid, NULL), seq.seqstart, seq.seqincrement
                 FROM pg_sequence seq
                 JOIN pg_class s ON s.oid = seq.seqrelid
                 JOIN pg_namespace n ON n.oid = s.relnamespace
                 WHERE n.nspname = $1
                   AND NOT EXISTS (
                       SELECT 1 FROM pg_depend d
                       WHERE d.objid = s.oid AND d.deptype IN ('a', 'i', 'e')
                   )
                 ORDER BY s.relname",
                &[&schema],
            )
            .await?;

        for row in &rows {
            snapshot.add_sequence(
                schema,
                row.get::<_, String>(0),
                row.get::<_, String>(1),
                row.get::<_, i64>(2),
                row.get::<_, i64>(3),
            );
        }
        Ok(())
    }

    async fn load_enums(&self, schema: &str, snapshot: &mut Snapshot) -> Result<()> {
        let rows = self
            .client
            .query(
                "SELECT t.typname, array_agg(e.enumlabel ORDER BY e.enumsortorder)::text[]
                 FROM pg_type t
                 JOIN pg_enum e ON e.enumtypid = t.oid
                 JOIN pg_namespace n ON n.oid = t.typnamespace
                 WHERE n.nspname = $1
                 GROUP BY t.typname
                 ORDER BY t.typname",
                &[&schema],
            )
            .await?;

        for row in &rows {
            let labels: Vec<String> = row.get(1);
            snapshot.add_custom_type(schema, row.get::<_, String>(0), enum_definition(&labels));
        }
        Ok(())
    }

    async fn load_routines(&self, schema: &str, snapshot: &mut Snapshot) -> Result<()> {
        let rows = self
            .client
            .query(
                "SELECT p.proname, p.prokind::text, pg_get_functiondef(p.oid)
                 FROM pg_proc p
                 JOIN pg_namespace n ON n.oid = p.pronamespace
                 WHERE n.nspname = $1
                   AND p.prokind IN ('f', 'p')
                   AND NOT EXISTS (
                       SELECT 1 FROM pg_depend d WHERE d.objid = p.oid AND d.deptype = 'e'
                   )
                 ORDER BY p.proname",
                &[&schema],
            )
            .await?;

        for row in &rows {
            let kind = match row.get::<_, String>(1).as_str() {
                "p" => RoutineKind::StoredProcedure,
                _ => RoutineKind::Function,
            };
            let body = row.get::<_, Option<String>>(2).unwrap_or_default();
            snapshot.add_routine(None, schema, row.get::<_, String>(0), kind, body);
        }
        Ok(())
    }
}

static TYPE_MODIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9_ .]+?)\((\d+)(?:,(\d+))?\)$").unwrap());

/// Parse `format_type` output into a [`ColumnType`]. Types whose modifier
/// is not a trailing `(n)` or `(p,s)` keep their full text as the name.
fn parse_column_type(text: &str) -> ColumnType {
    let Some(caps) = TYPE_MODIFIER_RE.captures(text) else {
        return ColumnType::named(text);
    };
    let name = &caps[1];
    let first = &caps[2];
    match (name, caps.get(3)) {
        ("numeric" | "decimal", Some(scale)) => match (first.parse(), scale.as_str().parse()) {
            (Ok(p), Ok(s)) => ColumnType::decimal(name, p, s),
            _ => ColumnType::named(text),
        },
        (_, None) => match first.parse() {
            Ok(size) => ColumnType::sized(name, size),
            Err(_) => ColumnType::named(text),
        },
        _ => ColumnType::named(text),
    }
}

fn enum_definition(labels: &[String]) -> String {
    let quoted: Vec<String> = labels
        .iter()
        .map(|l| format!("'{}'", l.replace('\'', "''")))
        .collect();
    format!("ENUM ({})", quoted.join(", "))
}
