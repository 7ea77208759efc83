//! Pairs objects of the deployed ("old") and desired ("new") snapshots.
//!
//! The result is a [`PeerMap`]: a side table of old↔new id pairs owned by
//! one comparison run. An object without a peer is new (desired side) or
//! orphaned (deployed side); matching itself never fails.

use std::collections::BTreeMap;

use crate::capability::Capabilities;
use crate::diff::KeyComparer;
use crate::model::{
    full_name, ColumnId, CustomTypeId, Key, KeyId, RefConstraintId, RoutineId, SequenceId,
    Snapshot, Table, TableId,
};

/// Bidirectional one-to-one pairing of old and new ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing<I: Ord + Copy> {
    forward: BTreeMap<I, I>,
    backward: BTreeMap<I, I>,
}

impl<I: Ord + Copy> Default for Pairing<I> {
    fn default() -> Self {
        Self {
            forward: BTreeMap::new(),
            backward: BTreeMap::new(),
        }
    }
}

impl<I: Ord + Copy> Pairing<I> {
    /// Pair `old` with `new`, replacing any pairing either side had.
    pub fn link(&mut self, old: I, new: I) {
        if let Some(prev_new) = self.forward.insert(old, new) {
            self.backward.remove(&prev_new);
        }
        if let Some(prev_old) = self.backward.insert(new, old) {
            if prev_old != old {
                self.forward.remove(&prev_old);
            }
        }
    }

    /// Peer of an old object.
    pub fn new_of(&self, old: I) -> Option<I> {
        self.forward.get(&old).copied()
    }

    /// Peer of a new object.
    pub fn old_of(&self, new: I) -> Option<I> {
        self.backward.get(&new).copied()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// `(old, new)` pairs ordered by old id.
    pub fn pairs(&self) -> impl Iterator<Item = (I, I)> + '_ {
        self.forward.iter().map(|(o, n)| (*o, *n))
    }
}

/// Peer links for every object category of one comparison run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMap {
    pub tables: Pairing<TableId>,
    pub columns: Pairing<ColumnId>,
    pub keys: Pairing<KeyId>,
    pub ref_constraints: Pairing<RefConstraintId>,
    pub sequences: Pairing<SequenceId>,
    pub custom_types: Pairing<CustomTypeId>,
    pub routines: Pairing<RoutineId>,
}

/// Match `old` against `new` from scratch.
pub fn match_snapshots(old: &Snapshot, new: &Snapshot, caps: Capabilities) -> PeerMap {
    Matcher::new(old, new, caps).run()
}

pub struct Matcher<'a> {
    old: &'a Snapshot,
    new: &'a Snapshot,
    caps: Capabilities,
    previous: Option<&'a PeerMap>,
}

impl<'a> Matcher<'a> {
    pub fn new(old: &'a Snapshot, new: &'a Snapshot, caps: Capabilities) -> Self {
        Self {
            old,
            new,
            caps,
            previous: None,
        }
    }

    /// Carry a key pairing from an earlier run forward, so keys of identical
    /// shape keep their partners.
    pub fn with_previous(mut self, previous: &'a PeerMap) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn run(&self) -> PeerMap {
        let mut peers = PeerMap::default();

        self.match_tables(&mut peers);

        let table_pairs: Vec<(TableId, TableId)> = peers.tables.pairs().collect();
        for &(old_t, new_t) in &table_pairs {
            self.match_columns(old_t, new_t, &mut peers);
            self.match_keys(old_t, new_t, &mut peers);
        }

        self.match_ref_constraints(&table_pairs, &mut peers);
        self.match_named_objects(&mut peers);

        log::debug!(
            "Matched snapshots; tables={}, columns={}, keys={}, ref_constraints={}, routines={}",
            peers.tables.len(),
            peers.columns.len(),
            peers.keys.len(),
            peers.ref_constraints.len(),
            peers.routines.len()
        );
        peers
    }

    fn match_tables(&self, peers: &mut PeerMap) {
        // Exact names first, so a historical name never steals a table that
        // another desired table still carries under its current name.
        for new_t in &self.new.tables {
            if let Some(old_t) = self.unclaimed_table(&new_t.full_name(), peers) {
                peers.tables.link(old_t.id, new_t.id);
            }
        }

        for new_t in &self.new.tables {
            if peers.tables.old_of(new_t.id).is_some() {
                continue;
            }
            let found = new_t.previous_names.iter().find_map(|prev| {
                let qualified = qualify(prev, &new_t.schema);
                self.unclaimed_table(&qualified, peers).or_else(|| {
                    strip_interface_prefix(&qualified)
                        .and_then(|stripped| self.unclaimed_table(&stripped, peers))
                })
            });
            if let Some(old_t) = found {
                log::debug!(
                    "Matched table by previous name; old={}, new={}",
                    old_t.full_name(),
                    new_t.full_name()
                );
                peers.tables.link(old_t.id, new_t.id);
            }
        }
    }

    fn unclaimed_table(&self, full_name: &str, peers: &PeerMap) -> Option<&'a Table> {
        self.old.tables.iter().find(|t| {
            peers.tables.new_of(t.id).is_none() && t.full_name().eq_ignore_ascii_case(full_name)
        })
    }

    fn match_columns(&self, old_t: TableId, new_t: TableId, peers: &mut PeerMap) {
        let unclaimed = |name: &str, peers: &PeerMap| {
            self.old
                .table_columns(old_t)
                .find(|c| peers.columns.new_of(c.id).is_none() && c.name.eq_ignore_ascii_case(name))
                .map(|c| c.id)
        };

        for new_c in self.new.table_columns(new_t) {
            if let Some(old_c) = unclaimed(&new_c.name, peers) {
                peers.columns.link(old_c, new_c.id);
            }
        }

        for new_c in self.new.table_columns(new_t) {
            if peers.columns.old_of(new_c.id).is_some() {
                continue;
            }
            let found = new_c
                .previous_names
                .iter()
                .find_map(|prev| unclaimed(prev, peers));
            if let Some(old_c) = found {
                peers.columns.link(old_c, new_c.id);
            }
        }
    }

    fn match_keys(&self, old_t: TableId, new_t: TableId, peers: &mut PeerMap) {
        for &new_key_id in &self.new.table(new_t).keys {
            let new_key = self.new.key(new_key_id);
            if let Some(old_key) = self.pick_key(old_t, new_key, peers) {
                peers.keys.link(old_key, new_key_id);
            }
        }
    }

    /// Tables may legally hold several keys of the same type and column
    /// count, so candidates are resolved in a fixed order: a pairing carried
    /// over from an earlier run, then the first unclaimed structural match.
    fn pick_key(&self, old_t: TableId, new_key: &Key, peers: &PeerMap) -> Option<KeyId> {
        let candidates: Vec<&Key> = self
            .old
            .table(old_t)
            .keys
            .iter()
            .map(|id| self.old.key(*id))
            .filter(|k| {
                k.key_type == new_key.key_type
                    && k.columns.len() == new_key.columns.len()
                    && peers.keys.new_of(k.id).is_none()
            })
            .collect();

        let previous_peer = |k: &Key| self.previous.and_then(|p| p.keys.new_of(k.id));

        if let Some(k) = candidates
            .iter()
            .find(|k| previous_peer(k) == Some(new_key.id))
        {
            return Some(k.id);
        }

        let comparer = KeyComparer::new(peers, self.caps);
        let no_changed_columns = Default::default();
        candidates
            .iter()
            .filter(|k| previous_peer(k).is_none())
            .find(|k| !comparer.key_changed(k, new_key, &no_changed_columns))
            .map(|k| k.id)
    }

    fn match_ref_constraints(&self, table_pairs: &[(TableId, TableId)], peers: &mut PeerMap) {
        for &(old_t, new_t) in table_pairs {
            for &new_rc_id in &self.new.table(new_t).ref_constraints {
                let new_rc = self.new.ref_constraint(new_rc_id);
                let found = self.old.table(old_t).ref_constraints.iter().copied().find(|id| {
                    let old_rc = self.old.ref_constraint(*id);
                    peers.ref_constraints.new_of(*id).is_none()
                        && peers.keys.new_of(old_rc.from_key) == Some(new_rc.from_key)
                        && peers.keys.new_of(old_rc.to_key) == Some(new_rc.to_key)
                });
                if let Some(old_rc) = found {
                    peers.ref_constraints.link(old_rc, new_rc_id);
                }
            }
        }
    }

    fn match_named_objects(&self, peers: &mut PeerMap) {
        for r in &self.new.routines {
            if let Some(old) = self.old.find_routine(&r.full_name()) {
                if peers.routines.new_of(old.id).is_none() {
                    peers.routines.link(old.id, r.id);
                }
            }
        }
        for s in &self.new.sequences {
            if let Some(old) = self.old.find_sequence(&s.full_name()) {
                peers.sequences.link(old.id, s.id);
            }
        }
        for t in &self.new.custom_types {
            if let Some(old) = self.old.find_custom_type(&t.full_name()) {
                peers.custom_types.link(old.id, t.id);
            }
        }
    }
}

fn qualify(name: &str, schema: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        full_name(schema, name)
    }
}

/// `sales.IOrder` → `sales.Order`. Returns `None` when the name carries no
/// interface-style prefix.
fn strip_interface_prefix(full: &str) -> Option<String> {
    let (schema, name) = match full.rsplit_once('.') {
        Some((schema, name)) => (schema, name),
        None => ("", full),
    };
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some('I'), Some(second)) if second.is_ascii_uppercase() => {
            Some(full_name(schema, &name[1..]))
        }
        _ => None,
    }
}
