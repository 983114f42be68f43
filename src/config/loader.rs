// Configuration file loading and creation

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::Config;

/// Get the path to the configuration file
pub fn get_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("p2party");

    // Create config directory if it doesn't exist
    fs::create_dir_all(&path).ok();

    path.push("config.toml");
    path
}

/// Load configuration from file, or create default if it doesn't exist
pub fn load_config() -> Result<Config, io::Error> {
    let config_path = get_config_path();
    load_config_from(&config_path)
}

/// Load configuration from an explicit path (used by tests)
pub fn load_config_from(config_path: &Path) -> Result<Config, io::Error> {
    if config_path.exists() {
        let contents = fs::read_to_string(config_path)?;
        match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("failed to parse config file, using defaults: {e}");
                Ok(Config::default())
            }
        }
    } else {
        // Create default config file
        create_default_config(config_path)?;
        Ok(Config::default())
    }
}

/// Create a default configuration file with helpful comments
pub fn create_default_config(path: &Path) -> Result<(), io::Error> {
    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    // Add helpful header comments
    let commented_toml = format!(
        "# p2party configuration file\n\
         # Edit this file to tune session behavior\n\
         #\n\
         # Reconnect delays double from the initial value up to the maximum\n\
         # and retry forever; delays are in milliseconds\n\n\
         {}",
        toml_string
    );

    fs::write(path, commented_toml)?;
    Ok(())
}
