//! Sync command handler

use anyhow::{anyhow, bail, Result};

use roost_core::mirror::reconcile_all;
use roost_core::{Config, Table};
use roost_server::AppState;

use crate::output::Output;

/// Push local tables to the cloud mirror
///
/// With a table name only that table is merged; otherwise every mirrored
/// table is reconciled.
pub async fn sync(config: Config, table: Option<String>, output: &Output) -> Result<()> {
    let (state, _events) = AppState::connect(config).await?;

    if !state.mirror.is_mirrored() {
        bail!(
            "Cloud mirror is not available. Configure it with:\n  \
             SUPABASE_URL=https://<project>.supabase.co\n  \
             SUPABASE_KEY=<service key>"
        );
    }

    match table {
        Some(name) => {
            let table: Table = name.parse().map_err(|e: String| anyhow!(e))?;
            if !table.is_mirrored() {
                bail!("Table '{}' is not mirrored", table);
            }
            output.message(&format!("Syncing {}...", table));
            let local = state.store.read(table).await?;
            let rows = state.mirror.sync_table(table, local).await?;

            if output.is_json() {
                output.json(&serde_json::json!({"table": table, "rows": rows}));
            } else {
                output.success(&format!("Synced {} rows to {}", rows, table));
            }
        }
        None => {
            output.message("Reconciling all mirrored tables...");
            let report = reconcile_all(&state.mirror, &state.store).await;

            if output.is_json() {
                output.json(&report);
            } else if report.failed.is_empty() {
                output.success(&format!(
                    "Sync complete - {} tables, {} rows",
                    report.tables, report.rows
                ));
            } else {
                output.message(&format!(
                    "Synced {} tables ({} rows), failed: {}",
                    report.tables,
                    report.rows,
                    report.failed.join(", ")
                ));
                bail!("{} tables failed to sync", report.failed.len());
            }
        }
    }

    Ok(())
}
