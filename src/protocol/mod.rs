pub mod client_command;
pub mod error;
pub mod server_response;

use std::time::Duration;

use client_command::ClientCommand;
use error::ProtocolError;
use server_response::ServerResponse;

pub fn parse_command(json_str: &str) -> Result<ClientCommand, ProtocolError> {
    serde_json::from_str(json_str).map_err(ProtocolError::from)
}

pub fn serialize_response(response: &ServerResponse) -> Result<String, ProtocolError> {
    serde_json::to_string(response).map_err(ProtocolError::from)
}

/// Converts a timeout in seconds; negative and non-finite values are rejected.
pub fn parse_timeout(seconds: Option<f64>) -> Result<Option<Duration>, ProtocolError> {
    seconds
        .map(|s| Duration::try_from_secs_f64(s).map_err(|_| ProtocolError::InvalidTimeout(s)))
        .transpose()
}
