// Configuration module
// Handles loading session configuration from a TOML file

pub mod loader;
pub mod types;

pub use loader::{create_default_config, get_config_path, load_config};
pub use types::{Config, NetworkConfig, ShellConfig};
