//! Status command handler

use anyhow::Result;

use roost_core::Config;
use roost_server::AppState;

use crate::output::{label, Output, OutputFormat};

/// Show data directory, mirror, attachment providers and table counts
pub async fn show(config: Config, output: &Output) -> Result<()> {
    let (state, _events) = AppState::connect(config).await?;
    let stats = state.store.stats().await?;
    let mirror_state = state.mirror.state();
    let providers: Vec<String> = state
        .blobs
        .available()
        .into_iter()
        .map(str::to_string)
        .collect();

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "data_dir": state.config.data_dir,
                "environment": state.config.server.environment,
                "mirror": {
                    "state": mirror_state,
                    "backend": state.mirror.backend_name(),
                },
                "blob": {
                    "active": state.blobs.active_name(),
                    "available": providers,
                },
                "counts": stats.tables,
                "total": stats.total,
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", serde_json::to_value(mirror_state)?.as_str().unwrap_or("unknown"));
        }
        OutputFormat::Human => {
            println!("Roost Status");
            println!("============");
            println!();
            println!("{} {}", label("Data dir", 11), state.config.data_dir.display());
            println!("{} {}", label("Environment", 11), state.config.server.environment);
            println!();
            println!("Cloud mirror:");
            println!("  {} {:?}", label("State", 7), mirror_state);
            println!(
                "  {} {}",
                label("Backend", 7),
                state.mirror.backend_name().unwrap_or("(not configured)")
            );
            println!();
            println!("Attachments:");
            println!(
                "  {} {}",
                label("Active", 9),
                state.blobs.active_name().unwrap_or("(none)")
            );
            println!(
                "  {} {}",
                label("Available", 9),
                if providers.is_empty() {
                    "(none)".to_string()
                } else {
                    providers.join(", ")
                }
            );
            println!();
            println!("Tables:");
            for (table, count) in &stats.tables {
                println!("  {} {}", label(table.name(), 12), count);
            }
            println!("  {} {}", label("total", 12), stats.total);
        }
    }

    Ok(())
}
