//! Terminal output formatting for all shiftplan commands.
//! Uses comfy-table for tabular output and colored for
//! status-aware terminal styling.

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use shiftplan_core::{InfoReport, Script, SnapshotReport, UpgradePlan, UpgradeStatus};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.into_iter().map(Cell::new).collect::<Vec<_>>());
    table
}

/// Return a colored string representation of a plan status.
fn format_status(status: UpgradeStatus) -> String {
    match status {
        UpgradeStatus::Unknown => "Unknown".dimmed().to_string(),
        UpgradeStatus::NotAllowed => "Not Allowed".red().to_string(),
        UpgradeStatus::HigherVersionDetected => "Higher Version Detected".red().bold().to_string(),
        UpgradeStatus::NoChanges => "No Changes".green().to_string(),
        UpgradeStatus::ChangesDetected => "Changes Detected".yellow().to_string(),
        UpgradeStatus::Applied => "Applied".green().bold().to_string(),
    }
}

fn print_plan_header(plan: &UpgradePlan) {
    let db_version = plan
        .db_info
        .as_ref()
        .map(|i| i.version.to_string())
        .unwrap_or_else(|| "(none)".to_string());
    println!("Status:        {}", format_status(plan.status));
    println!("Database:      {}", db_version);
    println!("Application:   {}", plan.app_version);
    println!("Instance kind: {}", plan.instance_kind);
}

fn print_notices(plan: &UpgradePlan) {
    for notice in plan.notices() {
        println!("{} {}", "NOTICE:".yellow().bold(), notice);
    }
}

fn print_scripts(scripts: &[Script], sql: bool) {
    let mut table = new_table(vec!["#", "Phase", "Kind", "Object", "Time"]);
    for (i, script) in scripts.iter().enumerate() {
        let elapsed = script
            .elapsed_ms
            .map(|t| format!("{}ms", t))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(format!("{:?}", script.phase)),
            Cell::new(format!("{:?}", script.kind)),
            Cell::new(&script.object),
            Cell::new(elapsed),
        ]);
    }
    println!("{table}");

    if sql {
        for (i, script) in scripts.iter().enumerate() {
            println!();
            println!("{}", format!("-- #{} {}", i + 1, script.object).dimmed());
            println!("{};", script.sql.trim_end_matches(';'));
        }
    }
}

/// Print an upgrade plan: status, changes, notices and the ordered scripts.
pub fn print_plan(plan: &UpgradePlan, sql: bool) {
    print_plan_header(plan);

    match plan.status {
        UpgradeStatus::NoChanges => {
            println!("{}", "Schema is up to date. No upgrade necessary.".green());
            return;
        }
        UpgradeStatus::ChangesDetected => {}
        _ => return,
    }

    if plan.changes.is_empty() {
        println!("{}", "No structural changes; only the recorded version moves.".dimmed());
    } else {
        println!();
        let mut table = new_table(vec!["Change", "Description"]);
        for change in plan.changes.iter() {
            table.add_row(vec![Cell::new(change.kind.to_string()), Cell::new(&change.description)]);
        }
        println!("{table}");
    }

    print_notices(plan);

    if !plan.scripts.is_empty() {
        println!();
        println!("{}", format!("{} script(s) to run:", plan.scripts.len()).bold());
        print_scripts(&plan.scripts, sql);
    }
}

/// Print the outcome of an upgrade.
pub fn print_upgrade_result(plan: &UpgradePlan) {
    match plan.status {
        UpgradeStatus::Applied => {
            let total: u64 = plan.applied.iter().filter_map(|s| s.elapsed_ms).sum();
            println!(
                "{}",
                format!(
                    "Successfully upgraded to {} with {} script(s) (execution time {}ms)",
                    plan.app_version,
                    plan.applied.len(),
                    total
                )
                .green()
                .bold()
            );
            print_notices(plan);
            if !plan.applied.is_empty() {
                print_scripts(&plan.applied, false);
            }
        }
        UpgradeStatus::NoChanges => {
            println!("{}", "Schema is up to date. No upgrade necessary.".green());
        }
        _ => print_plan_header(plan),
    }
}

/// Print a snapshot report.
pub fn print_snapshot_report(report: &SnapshotReport) {
    let mut table = new_table(vec!["Object", "Count"]);
    for (label, count) in [
        ("Schemas", report.schemas),
        ("Tables", report.tables),
        ("Views", report.views),
        ("Keys", report.keys),
        ("References", report.ref_constraints),
        ("Sequences", report.sequences),
        ("Types", report.custom_types),
        ("Routines", report.routines),
    ] {
        table.add_row(vec![Cell::new(label), Cell::new(count)]);
    }
    println!("{table}");

    if let Some(path) = &report.path {
        println!(
            "{}",
            format!("Snapshot written to {}", path.display()).green()
        );
    }
}

/// Print the recorded version and the upgrade log.
pub fn print_info(report: &InfoReport) {
    match &report.db_info {
        Some(info) => {
            let updated_on = info
                .updated_on
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("Version:       {}", info.version.to_string().bold());
            println!("Instance kind: {}", info.instance_kind);
            println!("Updated on:    {}", updated_on);
        }
        None => {
            println!("{}", "No schema version recorded.".yellow());
        }
    }

    if report.log.is_empty() {
        return;
    }

    println!();
    let mut table = new_table(vec!["Run On", "From", "To", "#", "Kind", "Object", "Time", "Result"]);
    for entry in &report.log {
        let result = match &entry.error {
            _ if entry.success => "OK".green().to_string(),
            Some(e) => format!("{} {}", "Failed:".red().bold(), e),
            None => "Failed".red().bold().to_string(),
        };
        table.add_row(vec![
            Cell::new(entry.run_on.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(entry.from_version.as_deref().unwrap_or("")),
            Cell::new(&entry.to_version),
            Cell::new(entry.ordinal),
            Cell::new(&entry.kind),
            Cell::new(&entry.object),
            Cell::new(
                entry
                    .duration_ms
                    .map(|t| format!("{}ms", t))
                    .unwrap_or_default(),
            ),
            Cell::new(result),
        ]);
    }
    println!("{table}");
}
