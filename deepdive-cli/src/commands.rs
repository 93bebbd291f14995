//! Configuration subcommands.

use crate::ConfigAction;
use deepdive_core::config::{DeepdiveConfig, load_config, to_toml};
use std::path::Path;

/// Handle `deepdive config`.
pub fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".deepdive");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            std::fs::write(&config_path, to_toml(&DeepdiveConfig::default())?)?;
            println!("Created default configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            println!("{}", to_toml(&config)?);
            Ok(())
        }
    }
}
