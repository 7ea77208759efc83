//! Diff builder: turns a matched pair of snapshots into [`Change`] records.
//!
//! The builder is a pure function of (old snapshot, new snapshot, peer map,
//! capabilities, options). The sets of changed columns and keys are carried
//! in an explicit [`DiffState`] handed to each step, and end up on the
//! returned [`ChangeSet`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::capability::{Capabilities, Feature};
use crate::change::{Change, ChangeGroup, ChangeSet, ObjectRef};
use crate::matcher::PeerMap;
use crate::model::{
    Column, ColumnId, Key, KeyId, KeyType, RefConstraintId, RoutineId, RoutineKind, Snapshot,
    Table,
};

/// Which object categories to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    pub tables: bool,
    pub indexes: bool,
    pub views: bool,
    pub routines: bool,
    pub ref_integrity: bool,

    /// Drop deployed objects that have no counterpart in the desired schema.
    pub drop_unknown: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            tables: true,
            indexes: true,
            views: true,
            routines: true,
            ref_integrity: true,
            drop_unknown: false,
        }
    }
}

/// Accumulated facts one diff step hands to the next.
#[derive(Debug, Default)]
pub struct DiffState {
    /// Old-side columns emitted as Modify.
    pub changed_columns: HashSet<ColumnId>,

    /// Old-side keys whose shape no longer matches.
    pub changed_keys: HashSet<KeyId>,
}

/// Structural key comparison shared by the matcher and the diff builder.
pub(crate) struct KeyComparer<'a> {
    peers: &'a PeerMap,
    caps: Capabilities,
}

impl<'a> KeyComparer<'a> {
    pub(crate) fn new(peers: &'a PeerMap, caps: Capabilities) -> Self {
        Self { peers, caps }
    }

    /// True when `old_key` can not be kept as the deployed form of `new_key`.
    pub(crate) fn key_changed(
        &self,
        old_key: &Key,
        new_key: &Key,
        changed_columns: &HashSet<ColumnId>,
    ) -> bool {
        let included = self.caps.supports(Feature::IncludedIndexColumns);

        if old_key.columns.len() != new_key.columns.len() {
            return true;
        }
        if included && old_key.included.len() != new_key.included.len() {
            return true;
        }

        let touched = old_key
            .columns
            .iter()
            .any(|kc| changed_columns.contains(&kc.column))
            || (included && old_key.included.iter().any(|c| changed_columns.contains(c)));
        if touched {
            return true;
        }

        let ordered = self.caps.supports(Feature::OrderedIndexColumns);
        for (o, n) in old_key.columns.iter().zip(&new_key.columns) {
            if self.peers.columns.new_of(o.column) != Some(n.column) {
                return true;
            }
            if ordered && o.desc != n.desc {
                return true;
            }
        }

        if included {
            for (o, n) in old_key.included.iter().zip(&new_key.included) {
                if self.peers.columns.new_of(*o) != Some(*n) {
                    return true;
                }
            }
        }

        self.caps.supports(Feature::FilteredIndexes)
            && normalize_filter(old_key.filter.as_deref()) != normalize_filter(new_key.filter.as_deref())
    }
}

/// Canonical form of a filter predicate: parentheses and whitespace
/// removed, case folded. Servers reformat predicates on read-back.
pub fn normalize_filter(filter: Option<&str>) -> String {
    filter
        .unwrap_or("")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Build the change set for a matched pair of snapshots.
pub fn build_changes(
    old: &Snapshot,
    new: &Snapshot,
    peers: &PeerMap,
    caps: Capabilities,
    options: &CompareOptions,
) -> ChangeSet {
    DiffBuilder {
        old,
        new,
        peers,
        caps,
        options,
    }
    .build()
}

struct DiffBuilder<'a> {
    old: &'a Snapshot,
    new: &'a Snapshot,
    peers: &'a PeerMap,
    caps: Capabilities,
    options: &'a CompareOptions,
}

impl<'a> DiffBuilder<'a> {
    fn build(&self) -> ChangeSet {
        let mut state = DiffState::default();
        let mut set = ChangeSet::default();

        self.diff_schemas(&mut set.changes);

        for old_t in &self.old.tables {
            if !self.table_enabled(old_t) {
                continue;
            }
            let group = match self.peers.tables.new_of(old_t.id) {
                Some(new_id) => Some(self.diff_matched_table(old_t, self.new.table(new_id), &mut state)),
                None => self.diff_orphan_table(old_t),
            };
            if let Some(group) = group.filter(|g| !g.changes.is_empty()) {
                set.groups.push(group);
            }
        }

        for new_t in &self.new.tables {
            if self.table_enabled(new_t) && self.peers.tables.old_of(new_t.id).is_none() {
                set.groups.push(self.diff_new_table(new_t));
            }
        }

        if self.options.ref_integrity && self.caps.supports(Feature::ReferentialConstraints) {
            self.diff_ref_constraints(&state, &mut set.changes);
        }

        self.diff_sequences(&mut set.changes);
        self.diff_custom_types(&mut set.changes);
        if self.routines_enabled() {
            self.diff_standalone_routines(&mut set.changes);
        }

        log::debug!(
            "Built change set; groups={}, changes={}, changed_columns={}, changed_keys={}",
            set.groups.len(),
            set.len(),
            state.changed_columns.len(),
            state.changed_keys.len()
        );

        set.changed_columns = state.changed_columns;
        set.changed_keys = state.changed_keys;
        set
    }

    fn table_enabled(&self, t: &Table) -> bool {
        if t.is_view() {
            self.options.views && self.caps.supports(Feature::Views)
        } else {
            self.options.tables
        }
    }

    fn routines_enabled(&self) -> bool {
        self.options.routines
            && self.caps.supports(Feature::StoredRoutines)
            && (!self.old.routines.is_empty() || !self.new.routines.is_empty())
    }

    fn diff_schemas(&self, changes: &mut Vec<Change>) {
        if !self.caps.supports(Feature::Schemas) {
            return;
        }
        for schema in &self.new.schemas {
            if !self.old.has_schema(schema) && self.new.schema_in_use(schema) {
                changes.push(
                    Change::add(ObjectRef::Schema(schema.clone()))
                        .with_description(format!("Add schema {}", schema)),
                );
            }
        }
    }

    fn diff_orphan_table(&self, old_t: &Table) -> Option<ChangeGroup> {
        if !self.options.drop_unknown {
            return None;
        }
        let mut changes = vec![Change::drop(ObjectRef::Table(old_t.id))
            .with_description(format!("Drop {}", table_label(old_t)))];

        for key in old_t.keys.iter().map(|id| self.old.key(*id)) {
            let kt = key.key_type;
            if kt.is_primary() || kt.is_foreign() || kt.contains(KeyType::AUTO_CREATED) {
                continue;
            }
            changes.push(
                Change::drop(ObjectRef::Key(key.id))
                    .with_description(format!("Drop {}", key_label(self.old, key))),
            );
        }

        // A routine peered with the desired snapshot is replaced by the new
        // side's routine change instead.
        for &r in &old_t.routines {
            if self.peers.routines.new_of(r).is_none() {
                changes.push(
                    Change::drop(ObjectRef::Routine(r))
                        .with_description(format!("Drop routine {}", self.old.routine(r).full_name())),
                );
            }
        }

        Some(ChangeGroup {
            table: old_t.full_name(),
            old: Some(old_t.id),
            new: None,
            changes,
        })
    }

    fn diff_matched_table(&self, old_t: &Table, new_t: &Table, state: &mut DiffState) -> ChangeGroup {
        let mut changes = vec![];

        let recreate = (old_t.is_view() || new_t.is_view()) && view_changed(old_t, new_t);

        if recreate {
            changes.push(
                Change::drop(ObjectRef::Table(old_t.id))
                    .with_description(format!("Drop {}", table_label(old_t))),
            );
            changes.push(
                Change::add(ObjectRef::Table(new_t.id))
                    .with_description(format!("Add {}", table_label(new_t))),
            );
        } else {
            if !old_t.full_name().eq_ignore_ascii_case(&new_t.full_name()) {
                changes.push(
                    Change::rename(ObjectRef::Table(old_t.id), ObjectRef::Table(new_t.id))
                        .with_description(format!(
                            "Rename {} to {}",
                            table_label(old_t),
                            new_t.full_name()
                        )),
                );
            }
            if !new_t.is_view() {
                self.diff_columns(old_t, new_t, state, &mut changes);
            }
        }

        self.diff_keys(old_t, new_t, recreate, state, &mut changes);

        if self.routines_enabled() {
            self.diff_table_routines(new_t, &mut changes);
        }

        ChangeGroup {
            table: new_t.full_name(),
            old: Some(old_t.id),
            new: Some(new_t.id),
            changes,
        }
    }

    fn diff_columns(&self, old_t: &Table, new_t: &Table, state: &mut DiffState, changes: &mut Vec<Change>) {
        let table = new_t.full_name();

        for old_c in self.old.table_columns(old_t.id) {
            let Some(new_id) = self.peers.columns.new_of(old_c.id) else {
                changes.push(
                    Change::drop(ObjectRef::Column(old_c.id))
                        .with_description(format!("Drop column {}.{}", old_t.full_name(), old_c.name)),
                );
                continue;
            };
            let new_c = self.new.column(new_id);
            let diff = column_diff(old_c, new_c);

            if !old_c.name.eq_ignore_ascii_case(&new_c.name) {
                let mut change = Change::rename(ObjectRef::Column(old_c.id), ObjectRef::Column(new_id))
                    .with_description(format!(
                        "Rename column {}.{} to {}",
                        table, old_c.name, new_c.name
                    ));
                if let Some(diff) = diff {
                    change = change.with_notice(format!(
                        "column is renamed and modified at once ({}); the modification is left for a later upgrade",
                        diff
                    ));
                }
                changes.push(change);
            } else if let Some(diff) = diff {
                state.changed_columns.insert(old_c.id);
                changes.push(
                    Change::modify(ObjectRef::Column(old_c.id), ObjectRef::Column(new_id))
                        .with_description(format!("Modify column {}.{}: {}", table, new_c.name, diff)),
                );
            }
        }

        for new_c in self.new.table_columns(new_t.id) {
            if self.peers.columns.old_of(new_c.id).is_none() {
                changes.push(
                    Change::add(ObjectRef::Column(new_c.id))
                        .with_description(format!("Add column {}.{}", table, new_c.name)),
                );
            }
        }
    }

    fn diff_keys(
        &self,
        old_t: &Table,
        new_t: &Table,
        regenerate: bool,
        state: &mut DiffState,
        changes: &mut Vec<Change>,
    ) {
        let comparer = KeyComparer::new(self.peers, self.caps);

        for old_key in old_t.keys.iter().map(|id| self.old.key(*id)) {
            if old_key.key_type.contains(KeyType::AUTO_CREATED) {
                continue;
            }
            let peer = self.peers.keys.new_of(old_key.id).map(|id| self.new.key(id));
            let changed = regenerate
                || match peer {
                    Some(new_key) => comparer.key_changed(old_key, new_key, &state.changed_columns),
                    None => true,
                };
            if !changed {
                continue;
            }

            state.changed_keys.insert(old_key.id);
            if self.skip_key(old_key) {
                continue;
            }
            // A recreated relation takes its keys with it.
            if !regenerate {
                changes.push(
                    Change::drop(ObjectRef::Key(old_key.id))
                        .with_description(format!("Drop {}", key_label(self.old, old_key))),
                );
            }
            if let Some(new_key) = peer {
                changes.push(
                    Change::add(ObjectRef::Key(new_key.id))
                        .with_description(format!("Add {}", key_label(self.new, new_key))),
                );
            }
        }

        for new_key in new_t.keys.iter().map(|id| self.new.key(*id)) {
            if self.peers.keys.old_of(new_key.id).is_some()
                || self.skip_key(new_key)
                || new_key.key_type.contains(KeyType::AUTO_CREATED)
            {
                continue;
            }
            changes.push(
                Change::add(ObjectRef::Key(new_key.id))
                    .with_description(format!("Add {}", key_label(self.new, new_key))),
            );
        }
    }

    /// Foreign keys are carried by referential constraint changes; plain
    /// indexes are ignored when index comparison is off.
    fn skip_key(&self, key: &Key) -> bool {
        key.key_type.is_foreign() || (key.is_plain_index() && !self.options.indexes)
    }

    fn diff_table_routines(&self, new_t: &Table, changes: &mut Vec<Change>) {
        for r in new_t.routines.iter().map(|id| self.new.routine(*id)) {
            if r.kind != RoutineKind::StoredProcedure {
                continue;
            }
            if let Some(change) = self.routine_change(r.id) {
                changes.push(change);
            }
        }
    }

    /// Modify against the peer (or Add) when the body hash differs.
    fn routine_change(&self, new_id: RoutineId) -> Option<Change> {
        let r = self.new.routine(new_id);
        let old = self.peers.routines.old_of(new_id);
        if let Some(old_id) = old {
            if self.old.routine(old_id).hash == r.hash {
                return None;
            }
        }
        let verb = if old.is_some() { "Modify" } else { "Add" };
        Some(
            Change::replace(old.map(ObjectRef::Routine), ObjectRef::Routine(new_id))
                .with_description(format!("{} routine {}", verb, r.full_name())),
        )
    }

    fn diff_new_table(&self, new_t: &Table) -> ChangeGroup {
        let mut changes = vec![Change::add(ObjectRef::Table(new_t.id))
            .with_description(format!("Add {}", table_label(new_t)))];

        for key in new_t.keys.iter().map(|id| self.new.key(*id)) {
            if key.key_type.is_foreign() || key.key_type.contains(KeyType::AUTO_CREATED) {
                continue;
            }
            changes.push(
                Change::add(ObjectRef::Key(key.id))
                    .with_description(format!("Add {}", key_label(self.new, key))),
            );
        }

        if self.routines_enabled() {
            // A same-named old routine can outlive a dropped table; the
            // change replaces it.
            self.diff_table_routines(new_t, &mut changes);
        }

        ChangeGroup {
            table: new_t.full_name(),
            old: None,
            new: Some(new_t.id),
            changes,
        }
    }

    fn diff_ref_constraints(&self, state: &DiffState, changes: &mut Vec<Change>) {
        for old_t in &self.old.tables {
            if !self.table_enabled(old_t) {
                continue;
            }
            let peered = self.peers.tables.new_of(old_t.id).is_some();
            if !peered && !self.options.drop_unknown {
                continue;
            }
            for &rc_id in &old_t.ref_constraints {
                let rc = self.old.ref_constraint(rc_id);
                match self.peers.ref_constraints.new_of(rc_id) {
                    None => changes.push(
                        Change::drop(ObjectRef::RefConstraint(rc_id))
                            .with_description(format!("Drop {}", ref_label(self.old, rc_id))),
                    ),
                    Some(new_id) => {
                        let endpoint_changed = state.changed_keys.contains(&rc.from_key)
                            || state.changed_keys.contains(&rc.to_key);
                        let cascade_changed =
                            rc.cascade_delete != self.new.ref_constraint(new_id).cascade_delete;
                        if endpoint_changed || cascade_changed {
                            changes.push(
                                Change::modify(
                                    ObjectRef::RefConstraint(rc_id),
                                    ObjectRef::RefConstraint(new_id),
                                )
                                .with_description(format!("Modify {}", ref_label(self.new, new_id))),
                            );
                        }
                    }
                }
            }
        }

        for new_t in &self.new.tables {
            if !self.table_enabled(new_t) {
                continue;
            }
            for &rc_id in &new_t.ref_constraints {
                if self.peers.ref_constraints.old_of(rc_id).is_none() {
                    changes.push(
                        Change::add(ObjectRef::RefConstraint(rc_id))
                            .with_description(format!("Add {}", ref_label(self.new, rc_id))),
                    );
                }
            }
        }
    }

    fn diff_sequences(&self, changes: &mut Vec<Change>) {
        if !self.caps.supports(Feature::Sequences) {
            return;
        }
        for s in &self.new.sequences {
            if self.peers.sequences.old_of(s.id).is_none() {
                changes.push(
                    Change::add(ObjectRef::Sequence(s.id))
                        .with_description(format!("Add sequence {}", s.full_name())),
                );
            }
        }
    }

    fn diff_custom_types(&self, changes: &mut Vec<Change>) {
        if !self.caps.supports(Feature::CustomTypes) {
            return;
        }
        for t in &self.new.custom_types {
            if self.peers.custom_types.old_of(t.id).is_none() {
                changes.push(
                    Change::add(ObjectRef::CustomType(t.id))
                        .with_description(format!("Add type {}", t.full_name())),
                );
            }
        }
    }

    fn diff_standalone_routines(&self, changes: &mut Vec<Change>) {
        for r in self.new.routines.iter().filter(|r| r.table.is_none()) {
            if let Some(change) = self.routine_change(r.id) {
                changes.push(change);
            }
        }
        if !self.options.drop_unknown {
            return;
        }
        for r in self.old.routines.iter().filter(|r| r.table.is_none()) {
            if self.peers.routines.new_of(r.id).is_none() {
                changes.push(
                    Change::drop(ObjectRef::Routine(r.id))
                        .with_description(format!("Drop routine {}", r.full_name())),
                );
            }
        }
    }
}

fn view_changed(old_t: &Table, new_t: &Table) -> bool {
    match (&old_t.view, &new_t.view) {
        (Some(o), Some(n)) => o.materialized != n.materialized || o.hash != n.hash,
        _ => true,
    }
}

/// Human readable difference between two peered columns, if any.
fn column_diff(old_c: &Column, new_c: &Column) -> Option<String> {
    let mut parts = vec![];
    let (old_ty, new_ty) = (old_c.ty.sql_spec(), new_c.ty.sql_spec());
    if !old_ty.eq_ignore_ascii_case(&new_ty) {
        parts.push(format!("type {} -> {}", old_ty, new_ty));
    }
    if old_c.is_nullable() != new_c.is_nullable() {
        let label = |nullable: bool| if nullable { "null" } else { "not null" };
        parts.push(format!(
            "{} -> {}",
            label(old_c.is_nullable()),
            label(new_c.is_nullable())
        ));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn table_label(t: &Table) -> String {
    if t.is_materialized_view() {
        format!("materialized view {}", t.full_name())
    } else if t.is_view() {
        format!("view {}", t.full_name())
    } else {
        format!("table {}", t.full_name())
    }
}

fn key_label(snapshot: &Snapshot, key: &Key) -> String {
    let kt = key.key_type;
    let what = if kt.is_primary() {
        "primary key"
    } else if kt.is_foreign() {
        "foreign key"
    } else if kt.contains(KeyType::UNIQUE) {
        "unique index"
    } else {
        "index"
    };
    format!("{} {}.{}", what, snapshot.table(key.table).full_name(), key.name)
}

fn ref_label(snapshot: &Snapshot, id: RefConstraintId) -> String {
    let rc = snapshot.ref_constraint(id);
    let from = snapshot.key(rc.from_key);
    let to_table = snapshot.key(rc.to_key).table;
    format!(
        "reference {} ({} -> {})",
        from.name,
        snapshot.table(from.table).full_name(),
        snapshot.table(to_table).full_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeKind, ObjectType};
    use crate::matcher::match_snapshots;
    use crate::model::{ColumnFlags, ColumnType, KeyColumn, TableId};

    const PG: Capabilities = Capabilities::POSTGRESQL;

    fn int() -> ColumnType {
        ColumnType::named("int4")
    }

    /// customer(id pk, email) <- order(id pk, customer_id fk, total), with an
    /// index on customer.email and a CRUD routine on order.
    fn shop(total: ColumnType) -> Snapshot {
        let mut s = Snapshot::new();
        s.add_schema("public");
        let customer = s.add_table("public", "customer");
        let cid = s.add_column(customer, "id", int(), ColumnFlags::PRIMARY_KEY);
        let email = s.add_column(customer, "email", ColumnType::sized("varchar", 200), ColumnFlags::NULLABLE);
        let pk_customer = s.add_key(customer, "pk_customer", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(cid)]);
        s.add_key(customer, "ix_customer_email", KeyType::INDEX, vec![KeyColumn::asc(email)]);

        let order = s.add_table("public", "order");
        let oid = s.add_column(order, "id", int(), ColumnFlags::PRIMARY_KEY);
        let fk_col = s.add_column(order, "customer_id", int(), ColumnFlags::NONE);
        s.add_column(order, "total", total, ColumnFlags::NONE);
        s.add_key(order, "pk_order", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(oid)]);
        let fk = s.add_key(order, "fk_order_customer", KeyType::FOREIGN_KEY, vec![KeyColumn::asc(fk_col)]);
        s.add_ref_constraint(fk, pk_customer, false);
        s.add_routine(Some(order), "public", "order_insert", RoutineKind::StoredProcedure, "INSERT 1");
        s
    }

    fn diff(old: &Snapshot, new: &Snapshot, options: &CompareOptions) -> ChangeSet {
        let peers = match_snapshots(old, new, PG);
        build_changes(old, new, &peers, PG, options)
    }

    fn kinds(set: &ChangeSet) -> Vec<(ChangeKind, ObjectType)> {
        set.iter().map(|c| (c.kind, c.object_type())).collect()
    }

    #[test]
    fn test_identical_snapshots_yield_no_changes() {
        let old = shop(ColumnType::decimal("numeric", 10, 2));
        let new = old.clone();
        let set = diff(&old, &new, &CompareOptions { drop_unknown: true, ..Default::default() });
        assert!(set.is_empty(), "unexpected changes: {:?}", kinds(&set));
    }

    #[test]
    fn test_table_rename_by_previous_name() {
        let old = shop(int());
        let mut new = old.clone();
        new.tables[1].name = "purchase".into();
        new.add_previous_table_name(TableId(1), "order");

        let set = diff(&old, &new, &CompareOptions::default());
        assert_eq!(kinds(&set), vec![(ChangeKind::Rename, ObjectType::Table)]);
        assert_eq!(set.iter().next().unwrap().description, "Rename table public.order to public.purchase");
    }

    #[test]
    fn test_new_schema_and_table() {
        let old = Snapshot::new();
        let mut new = Snapshot::new();
        new.add_schema("sales");
        new.add_schema("unused");
        let t = new.add_table("sales", "lead");
        let id = new.add_column(t, "id", int(), ColumnFlags::PRIMARY_KEY);
        new.add_key(t, "pk_lead", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(id)]);

        let set = diff(&old, &new, &CompareOptions::default());
        assert_eq!(
            kinds(&set),
            vec![
                (ChangeKind::Add, ObjectType::Table),
                (ChangeKind::Add, ObjectType::Key),
                (ChangeKind::Add, ObjectType::Schema),
            ]
        );
    }

    #[test]
    fn test_column_type_change_regenerates_ref_constraint() {
        let mut old = shop(int());
        let mut new = shop(int());
        // customer.id int4 -> int8 touches pk_customer, the target of the
        // order -> customer constraint.
        old.columns[0].ty = int();
        new.columns[0].ty = ColumnType::named("int8");

        let set = diff(&old, &new, &CompareOptions::default());
        assert!(set.changed_columns.contains(&ColumnId(0)));
        assert!(set.changed_keys.contains(&KeyId(0)));
        let rc_changes: Vec<_> = set
            .iter()
            .filter(|c| c.object_type() == ObjectType::RefConstraint)
            .collect();
        assert_eq!(rc_changes.len(), 1);
        assert_eq!(rc_changes[0].kind, ChangeKind::Modify);
        assert!(set
            .iter()
            .any(|c| c.description == "Modify column public.customer.id: type int4 -> int8"));
    }

    #[test]
    fn test_index_skip_policy() {
        let old = shop(int());
        let mut new = shop(int());
        new.keys[1].columns[0].desc = true;

        let off = diff(&old, &new, &CompareOptions { indexes: false, ..Default::default() });
        assert!(off.is_empty());

        let on = diff(&old, &new, &CompareOptions::default());
        assert_eq!(
            kinds(&on),
            vec![(ChangeKind::Drop, ObjectType::Key), (ChangeKind::Add, ObjectType::Key)]
        );
    }

    #[test]
    fn test_drop_unknown_gating() {
        let mut old = shop(int());
        let total = old.find_column(TableId(1), "total").unwrap().id;
        old.add_key(TableId(1), "ix_order_total", KeyType::INDEX, vec![KeyColumn::asc(total)]);
        let mut new = shop(int());
        // Drop "order" from the desired side by rebuilding it without it.
        new.tables.truncate(1);
        new.columns.truncate(2);
        new.keys.truncate(2);
        new.ref_constraints.clear();
        new.routines.clear();

        let off = diff(&old, &new, &CompareOptions::default());
        assert!(off.is_empty());

        let on = diff(&old, &new, &CompareOptions { drop_unknown: true, ..Default::default() });
        let group = &on.groups[0];
        assert_eq!(group.table, "public.order");
        assert_eq!(
            group.changes.iter().map(|c| (c.kind, c.object_type())).collect::<Vec<_>>(),
            vec![
                (ChangeKind::Drop, ObjectType::Table),
                (ChangeKind::Drop, ObjectType::Key),
                (ChangeKind::Drop, ObjectType::Routine),
            ]
        );
        // The primary and foreign keys go with the table.
        assert_eq!(group.changes[1].description, "Drop index public.order.ix_order_total");
        assert_eq!(
            on.changes.iter().map(|c| (c.kind, c.object_type())).collect::<Vec<_>>(),
            vec![(ChangeKind::Drop, ObjectType::RefConstraint)]
        );
    }

    #[test]
    fn test_rename_and_retype_reports_notice() {
        let mut old = Snapshot::new();
        let ot = old.add_table("public", "user");
        old.add_column(ot, "mail", ColumnType::sized("varchar", 100), ColumnFlags::NONE);
        let mut new = Snapshot::new();
        let nt = new.add_table("public", "user");
        let nc = new.add_column(nt, "email", ColumnType::sized("varchar", 200), ColumnFlags::NONE);
        new.add_previous_column_name(nc, "mail");

        let set = diff(&old, &new, &CompareOptions::default());
        assert_eq!(kinds(&set), vec![(ChangeKind::Rename, ObjectType::Column)]);
        assert_eq!(set.notices().len(), 1);
        assert!(set.changed_columns.is_empty());
    }

    #[test]
    fn test_view_change_recreates_view_and_keys() {
        let build = |definition: &str| {
            let mut s = Snapshot::new();
            let v = s.add_view("public", "v_sales", definition, true);
            let c = s.add_column(v, "region", ColumnType::named("text"), ColumnFlags::NONE);
            s.add_key(v, "ix_v_sales_region", KeyType::INDEX, vec![KeyColumn::asc(c)]);
            s
        };
        let old = build("SELECT region FROM sales");
        let same = build("SELECT region FROM sales  \r\n");
        assert!(diff(&old, &same, &CompareOptions::default()).is_empty());

        let new = build("SELECT region FROM sales WHERE region <> ''");
        let set = diff(&old, &new, &CompareOptions::default());
        assert_eq!(
            kinds(&set),
            vec![
                (ChangeKind::Drop, ObjectType::Table),
                (ChangeKind::Add, ObjectType::Table),
                (ChangeKind::Add, ObjectType::Key),
            ]
        );
        assert_eq!(set.iter().next().unwrap().description, "Drop materialized view public.v_sales");
        assert_eq!(set.changed_keys.len(), 1);

        let no_views = diff(&old, &new, &CompareOptions { views: false, ..Default::default() });
        assert!(no_views.is_empty());
    }

    #[test]
    fn test_routine_hash_change() {
        let old = shop(int());
        let mut new = shop(int());
        let body = "INSERT 2";
        new.routines[0].body = body.into();
        new.routines[0].hash = crate::model::content_hash(body);

        let set = diff(&old, &new, &CompareOptions::default());
        assert_eq!(kinds(&set), vec![(ChangeKind::Modify, ObjectType::Routine)]);

        let off = diff(&old, &new, &CompareOptions { routines: false, ..Default::default() });
        assert!(off.is_empty());
    }

    #[test]
    fn test_filtered_index_compared_normalized() {
        let build = |filter: &str| {
            let mut s = Snapshot::new();
            let t = s.add_table("public", "job");
            let c = s.add_column(t, "state", int(), ColumnFlags::NONE);
            let k = s.add_key(t, "ix_job_open", KeyType::INDEX, vec![KeyColumn::asc(c)]);
            s.set_key_filter(k, filter);
            s
        };
        let old = build("(state = 1)");
        let new = build("STATE=1");
        assert!(diff(&old, &new, &CompareOptions::default()).is_empty());

        let changed = build("state = 2");
        assert_eq!(diff(&old, &changed, &CompareOptions::default()).len(), 2);
    }

    #[test]
    fn test_sequences_and_types_added_never_dropped() {
        let mut old = Snapshot::new();
        old.add_sequence("public", "seq_old", "bigint", 1, 1);
        let mut new = Snapshot::new();
        new.add_sequence("public", "seq_invoice", "bigint", 1000, 1);
        new.add_custom_type("public", "mood", "ENUM ('happy', 'sad')");

        let set = diff(&old, &new, &CompareOptions { drop_unknown: true, ..Default::default() });
        assert_eq!(
            kinds(&set),
            vec![
                (ChangeKind::Add, ObjectType::Sequence),
                (ChangeKind::Add, ObjectType::CustomType),
            ]
        );
    }

    #[test]
    fn test_auto_created_keys_are_ignored() {
        let mut old = Snapshot::new();
        let t = old.add_table("public", "t");
        let c = old.add_column(t, "a", int(), ColumnFlags::NONE);
        old.add_key(t, "t_a_auto", KeyType::INDEX | KeyType::AUTO_CREATED, vec![KeyColumn::asc(c)]);
        let mut new = Snapshot::new();
        let t = new.add_table("public", "t");
        new.add_column(t, "a", int(), ColumnFlags::NONE);

        assert!(diff(&old, &new, &CompareOptions::default()).is_empty());
    }

    #[test]
    fn test_normalize_filter() {
        assert_eq!(normalize_filter(Some("( [Deleted] = 0 )")), "[deleted]=0");
        assert_eq!(normalize_filter(None), "");
    }
}
