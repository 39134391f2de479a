//! Temperature sensors.

use std::sync::Arc;

use super::Device;
use crate::{
    axis::Positioner,
    component::{ComponentSpec, Kind, Reading, SignalGroup},
    error::DeviceResult,
    signal::{ControlLayer, Value},
};

pub const THERMOCOUPLE_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec::ro("temperature", ":STC:TEMP", Kind::Normal),
    ComponentSpec::ro("sensor_connected", ":STC:CONN", Kind::Normal),
    ComponentSpec::ro("error", ":STC:ERR", Kind::Normal),
];

/// Thermocouple served by the PLC thermocouple function block.
#[derive(Debug)]
pub struct TwinCATThermocouple {
    group: SignalGroup,
}

impl TwinCATThermocouple {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str) -> Self {
        Self {
            group: SignalGroup::build(layer, name, prefix, THERMOCOUPLE_COMPONENTS),
        }
    }

    pub fn temperature(&self) -> DeviceResult<f64> {
        self.group.get_f64("temperature")
    }

    /// Whether the PLC sees the sensor wired, not whether the PV is reachable.
    pub fn sensor_connected(&self) -> DeviceResult<bool> {
        Ok(self.group.get_f64("sensor_connected")? != 0.0)
    }

    pub fn error(&self) -> DeviceResult<bool> {
        Ok(self.group.get_f64("error")? != 0.0)
    }
}

#[async_trait::async_trait]
impl Device for TwinCATThermocouple {
    fn name(&self) -> &str {
        self.group.name()
    }

    fn axes(&self) -> Vec<Arc<dyn Positioner>> {
        Vec::new()
    }

    fn read(&self) -> Vec<Reading> {
        self.group.read()
    }
}

const NOT_IMPLEMENTED: &str = "Not Implemented";

/// Resistive temperature device. No PVs are served for it yet.
#[derive(Debug)]
pub struct Rtd {
    name: String,
    prefix: String,
}

impl Rtd {
    pub fn new(prefix: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait::async_trait]
impl Device for Rtd {
    fn name(&self) -> &str {
        &self.name
    }

    fn axes(&self) -> Vec<Arc<dyn Positioner>> {
        Vec::new()
    }

    fn read(&self) -> Vec<Reading> {
        vec![Reading {
            attr: format!("{}_not_implemented", self.name),
            pvname: String::new(),
            value: Some(Value::from(NOT_IMPLEMENTED)),
        }]
    }
}
