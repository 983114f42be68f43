// Configuration types
// All settings carry defaults matching the tuned in-tree values

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub shell: ShellConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    // First reconnect delay after a drop, in milliseconds
    pub reconnect_initial_delay_ms: u64,

    // Ceiling for the doubling reconnect delay
    pub reconnect_max_delay_ms: u64,

    // Actions a disconnected client will hold before dropping the oldest
    pub offline_queue_limit: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 5_000,
            offline_queue_limit: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShellConfig {
    // Where bare game pages are redirected so they always run inside the
    // party shell
    pub shell_url: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell_url: "/".to_string(),
        }
    }
}
