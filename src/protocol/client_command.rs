use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "move")]
    Move {
        device: String,
        axis: String,
        target: f64,
        /// Reply only after the move finished.
        #[serde(default)]
        wait: bool,
        /// Seconds.
        #[serde(default)]
        timeout: Option<f64>,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "stop")]
    Stop {
        device: String,
        axis: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "get_state")]
    GetState {
        device: String,
        axis: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "get_position")]
    GetPosition {
        device: String,
        axis: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "get_attribute")]
    GetAttribute {
        device: String,
        axis: String,
        attribute: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "get_available_attributes")]
    GetAvailableAttributes {
        device: String,
        axis: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "read")]
    Read {
        device: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "list_devices")]
    ListDevices {
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "list_axes")]
    ListAxes {
        device: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
}

impl ClientCommand {
    pub fn id(&self) -> Option<&String> {
        match self {
            ClientCommand::Move { id, .. } => id.as_ref(),
            ClientCommand::Stop { id, .. } => id.as_ref(),
            ClientCommand::GetState { id, .. } => id.as_ref(),
            ClientCommand::GetPosition { id, .. } => id.as_ref(),
            ClientCommand::GetAttribute { id, .. } => id.as_ref(),
            ClientCommand::GetAvailableAttributes { id, .. } => id.as_ref(),
            ClientCommand::Read { id, .. } => id.as_ref(),
            ClientCommand::ListDevices { id, .. } => id.as_ref(),
            ClientCommand::ListAxes { id, .. } => id.as_ref(),
            ClientCommand::Ping { id, .. } => id.as_ref(),
        }
    }
}
