//! Coupling between the two gantry motors of one axis.

use crate::{
    axis::limit_switches::LimitSwitches,
    component::{ComponentSpec, Kind, Reading, SignalGroup},
    error::DeviceResult,
    signal::ControlLayer,
};

pub const COUPLING_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec::ro("gdif", ":GDIF", Kind::Config),
    ComponentSpec::rw("gtol", ":GTOL", Kind::Config),
    ComponentSpec::rw("enabled", ":ENABLED", Kind::Config),
    ComponentSpec::rw("decouple", ":DECOUPLE", Kind::Config),
    ComponentSpec::rw("high_limit_switch", ":HLS", Kind::Config),
    ComponentSpec::rw("low_limit_switch", ":LLS", Kind::Config),
    ComponentSpec::ro("fault", ":FAULT", Kind::Config),
];

#[derive(Debug)]
pub struct CouplingMotor {
    group: SignalGroup,
}

impl CouplingMotor {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str) -> Self {
        Self {
            group: SignalGroup::build(layer, name, prefix, COUPLING_COMPONENTS),
        }
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    pub fn prefix(&self) -> &str {
        self.group.prefix()
    }

    pub fn signals(&self) -> &SignalGroup {
        &self.group
    }

    /// Position difference between the two gantry motors.
    pub fn gantry_difference(&self) -> DeviceResult<f64> {
        self.group.get_f64("gdif")
    }

    pub fn tolerance(&self) -> DeviceResult<f64> {
        self.group.get_f64("gtol")
    }

    /// Writes GTOL after checking it against the PV's control limits.
    pub fn set_tolerance(&self, tolerance: f64) -> DeviceResult<()> {
        let gtol = self.group.signal("gtol")?;
        gtol.check_value(tolerance)?;
        gtol.put_f64(tolerance, true)
    }

    pub fn enabled(&self) -> DeviceResult<bool> {
        Ok(self.group.get_f64("enabled")? != 0.0)
    }

    pub fn decoupled(&self) -> DeviceResult<bool> {
        Ok(self.group.get_f64("decouple")? != 0.0)
    }

    pub fn faulted(&self) -> DeviceResult<bool> {
        Ok(self.group.get_f64("fault")? != 0.0)
    }

    pub fn limit_switches(&self) -> DeviceResult<LimitSwitches> {
        Ok(LimitSwitches::from_flags(
            self.group.get_f64("low_limit_switch")? == 1.0,
            self.group.get_f64("high_limit_switch")? == 1.0,
        ))
    }

    pub fn read_configuration(&self) -> Vec<Reading> {
        self.group.read_configuration()
    }
}
