use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketServerConfig {
    pub socket_path: String,
    pub max_connections: usize,
}

impl Default for SocketServerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/beamdev.sock".to_string(),
            max_connections: 100,
        }
    }
}
