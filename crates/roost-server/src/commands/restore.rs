//! Restore command handler

use anyhow::Result;

use roost_core::Config;
use roost_server::AppState;

use crate::output::Output;

/// Run the boot sequence without starting the server
///
/// Blank tables are hydrated from the cloud mirror when it is reachable and
/// initialised empty otherwise. Tables that already hold data are untouched.
pub async fn restore(config: Config, output: &Output) -> Result<()> {
    let (state, _events) = AppState::connect(config).await?;
    let report = state.store.boot(&state.mirror).await?;

    if output.is_json() {
        output.json(&report);
        return Ok(());
    }

    if report.restored.is_empty() && report.defaulted.is_empty() {
        output.success("All tables already present - nothing to restore");
        return Ok(());
    }

    for table in &report.restored {
        output.message(&format!("  restored    {}", table));
    }
    for table in &report.defaulted {
        output.message(&format!("  initialised {}", table));
    }
    output.success(&format!(
        "Restore complete - {} from cloud, {} empty",
        report.restored.len(),
        report.defaulted.len()
    ));

    Ok(())
}
