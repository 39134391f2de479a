use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Lifetime of cached position, state and attribute reads.
    pub default_ttl: Duration,
    pub cache_capacity: usize,
    pub command_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(100),
            cache_capacity: 1000,
            command_buffer: 100,
        }
    }
}
