//! Script scheduler.
//!
//! Flattens the scripts of every change into one list ordered by apply
//! phase, then by [`ScriptKind`] precedence. The sort is stable, so scripts
//! of equal rank keep the order they were emitted in (per table, per change).

use crate::change::ChangeSet;
use crate::script::Script;

/// Order `scripts` for sequential execution.
pub fn schedule(mut scripts: Vec<Script>) -> Vec<Script> {
    scripts.sort_by_key(|s| (s.phase, s.kind));
    scripts
}

/// Collect the scripts of every change in `changes` plus `extra` (data
/// migrations) and schedule them together.
pub fn schedule_change_set(changes: &ChangeSet, extra: Vec<Script>) -> Vec<Script> {
    let mut scripts = changes.scripts();
    scripts.extend(extra);
    let scripts = schedule(scripts);
    log::debug!("Scheduled scripts; count={}", scripts.len());
    scripts
}
