use serde::{Deserialize, Serialize};

use super::{CONNECTION_WORKER, GET_PUT_WORKER, MONITOR_WORKER, UTILITY_WORKER};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub workers: Vec<String>,
    pub utility_worker: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: vec![
                MONITOR_WORKER.to_string(),
                GET_PUT_WORKER.to_string(),
                CONNECTION_WORKER.to_string(),
            ],
            utility_worker: UTILITY_WORKER.to_string(),
        }
    }
}
