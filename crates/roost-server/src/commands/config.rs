//! Config command handlers

use std::path::PathBuf;

use anyhow::Result;

use roost_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &Config, config_path: &PathBuf, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(config)?;
            // Never print the mirror key
            if let Some(sync) = value.get_mut("sync").and_then(|s| s.as_object_mut()) {
                if sync.get("api_key").is_some_and(|k| !k.is_null()) {
                    sync.insert("api_key".to_string(), serde_json::json!("<set>"));
                }
            }
            output.json(&value);
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:        {}", config.data_dir.display());
            println!(
                "  log_level:       {}",
                config.log_level.as_deref().unwrap_or("(default)")
            );
            println!("  server.host:     {}", config.server.host);
            println!("  server.port:     {}", config.server.port);
            println!("  server.env:      {}", config.server.environment);
            println!(
                "  sync.url:        {}",
                config.sync.url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  sync.api_key:    {}",
                if config.sync.api_key.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!(
                "  sync.mode:       {}",
                if config.sync.is_configured() {
                    "mirrored"
                } else {
                    "local only"
                }
            );
            println!("  sync.flush:      {}s", config.sync.flush_interval_secs);
            println!("  sync.reconcile:  {}s", config.sync.reconcile_interval_secs);
            println!(
                "  blob.local_dir:  {}",
                config
                    .blob
                    .local_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Print where the config file is read from
pub fn path(config_path: &PathBuf, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "path": config_path,
            "exists": config_path.exists(),
        })),
        _ => println!("{}", config_path.display()),
    }
    Ok(())
}
