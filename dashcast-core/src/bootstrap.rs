use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};

/// Config file lookup order: `DASHCAST_CONFIG_PATH`, `./config.yaml`, `/config/config.yaml`
fn config_path() -> Option<String> {
    std::env::var("DASHCAST_CONFIG_PATH")
        .ok()
        .into_iter()
        .chain(["config.yaml".to_string(), "/config/config.yaml".to_string()])
        .find(|path| Path::new(path).exists())
}

/// Load and validate configuration. Runs before logging is up, so progress goes to stderr.
pub fn load_config() -> Result<Config> {
    let config = match config_path() {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path)?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env()?
        }
    };

    check(config)
}

fn check(config: Config) -> Result<Config> {
    config.validate().map_err(Error::InvalidConfig)?;
    Ok(config)
}
