//! Error type shared by signals, statuses and devices.
//!
//! Motion failures detected from callbacks are never raised from the callback
//! itself; they resolve a [`MoveStatus`](crate::status::MoveStatus) as failed and
//! only turn into [`DeviceError::MotionFailed`] for a caller that waits on it.

use std::time::Duration;

use thiserror::Error;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("{pvname} is disconnected")]
    Disconnected { pvname: String },

    #[error("{pvname} is read-only")]
    ReadOnly { pvname: String },

    #[error("{name}: value {value} outside of limits [{low}, {high}]")]
    OutOfLimits {
        name: String,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("{pvname} does not hold a {expected} value")]
    TypeMismatch {
        pvname: String,
        expected: &'static str,
    },

    #[error("Invalid prefix '{0}': expected at least three ':' separated segments")]
    InvalidPrefix(String),

    #[error("Unknown component '{attr}' on {device}")]
    UnknownComponent { device: String, attr: String },

    #[error("Unknown attribute '{attr}' on {device}")]
    UnknownAttribute { device: String, attr: String },

    #[error("Invalid channel {index} on {device} ({count} channels)")]
    InvalidChannel {
        device: String,
        index: usize,
        count: usize,
    },

    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("Cannot convert {from} to {to}")]
    IncompatibleUnits { from: String, to: String },

    #[error("Motion of {name} failed")]
    MotionFailed { name: String },

    #[error("Status of {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Move of {name} interrupted")]
    Interrupted { name: String },

    #[error("Status {id} already resolved")]
    AlreadyResolved { id: String },
}

impl DeviceError {
    pub fn disconnected(pvname: impl Into<String>) -> Self {
        DeviceError::Disconnected {
            pvname: pvname.into(),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, DeviceError::Disconnected { .. })
    }

    /// Stable machine-readable code, reported to socket clients.
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::Disconnected { .. } => "disconnected",
            DeviceError::ReadOnly { .. } => "read_only",
            DeviceError::OutOfLimits { .. } => "out_of_limits",
            DeviceError::TypeMismatch { .. } => "type_mismatch",
            DeviceError::InvalidPrefix(_) => "invalid_prefix",
            DeviceError::UnknownComponent { .. } => "unknown_component",
            DeviceError::UnknownAttribute { .. } => "unknown_attribute",
            DeviceError::InvalidChannel { .. } => "invalid_channel",
            DeviceError::UnknownUnit(_) => "unknown_unit",
            DeviceError::IncompatibleUnits { .. } => "incompatible_units",
            DeviceError::MotionFailed { .. } => "motion_failed",
            DeviceError::Timeout { .. } => "timeout",
            DeviceError::Interrupted { .. } => "interrupted",
            DeviceError::AlreadyResolved { .. } => "already_resolved",
        }
    }
}
