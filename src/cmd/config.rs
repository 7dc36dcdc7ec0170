//! Configuration view and validation commands: `runsync config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use runsync::config::{CONFIG_DIR, CONFIG_FILE, SyncConfig, SyncToml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Runsync Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No runsync.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include RUNSYNC_* overrides
            let config = SyncConfig::new(project_dir.to_path_buf())?;
            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();
            println!("Effective values:");
            println!("  battle tick = {}ms", config.battle_polling().tick_delay().as_millis());
            println!("  run id file = {}", config.run_id_path().display());
            println!();

            if !config_path.exists() {
                println!("Run 'runsync config init' to create a runsync.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No runsync.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = SyncToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("runsync.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            let toml = SyncToml::default();
            toml.save(&config_path)?;

            println!("Created runsync.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [transport] base_url and endpoint paths");
            println!("  - [polling], [map] and [battle] cadences");
            println!("  - [automation] enabled, reduced_motion and per-action delays");
            println!();
        }
    }

    Ok(())
}
