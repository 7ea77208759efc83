//! Vendor driver seam: capability query plus change rendering.

use crate::capability::Capabilities;
use crate::change::{Change, ChangeSet};
use crate::error::Result;
use crate::matcher::PeerMap;
use crate::model::{Snapshot, TableId};

/// Everything a driver may consult while rendering a change.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub old: &'a Snapshot,
    pub new: &'a Snapshot,
    pub peers: &'a PeerMap,
}

impl<'a> RenderContext<'a> {
    pub fn new(old: &'a Snapshot, new: &'a Snapshot, peers: &'a PeerMap) -> Self {
        Self { old, new, peers }
    }

    /// Name an old-side table carries once renames have run: the peer's
    /// name when the table survives, its own name otherwise.
    pub fn current_table_name(&self, old_table: TableId) -> String {
        match self.peers.tables.new_of(old_table) {
            Some(new_id) => self.new.table(new_id).full_name(),
            None => self.old.table(old_table).full_name(),
        }
    }
}

/// A database vendor.
pub trait Driver: Send + Sync {
    fn capability(&self) -> &Capabilities;

    /// Append the scripts (and any soft notices) that realize `change`.
    fn render_change(&self, cx: &RenderContext<'_>, change: &mut Change) -> Result<()>;
}

/// Render every change of `changes` in place.
pub fn render_changes(driver: &dyn Driver, cx: &RenderContext<'_>, changes: &mut ChangeSet) -> Result<()> {
    for change in changes.iter_mut() {
        driver.render_change(cx, change)?;
    }
    Ok(())
}
