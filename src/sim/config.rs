use serde::{Deserialize, Serialize};

use crate::signal::limits::Limits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimMotorConfig {
    pub initial_position: f64,
    /// Engineering units per second, written to VELO at start.
    pub velocity: f64,
    pub acceleration: f64,
    pub tick_ms: u64,
    pub precision: u32,
    /// Control limits published on the setpoint.
    pub limits: Limits,
    /// Positions at which LLS/HLS trip.
    pub low_switch: Option<f64>,
    pub high_switch: Option<f64>,
}

impl Default for SimMotorConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            velocity: 10.0,
            acceleration: 0.1,
            tick_ms: 10,
            precision: 3,
            limits: Limits::unlimited(),
            low_switch: None,
            high_switch: None,
        }
    }
}
