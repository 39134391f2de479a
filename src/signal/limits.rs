use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

/// Control limits of a setpoint. `low >= high` means the PV is unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub low: f64,
    pub high: f64,
}

impl Limits {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_bounded(&self) -> bool {
        self.low < self.high
    }

    pub fn contains(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        !self.is_bounded() || (self.low..=self.high).contains(&value)
    }

    pub fn check(&self, name: &str, value: f64) -> DeviceResult<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(DeviceError::OutOfLimits {
                name: name.to_string(),
                value,
                low: self.low,
                high: self.high,
            })
        }
    }
}
