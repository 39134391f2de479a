//! Spectrometer assemblies built from motor-record axes.

use std::sync::Arc;

use super::{motor::Motor, Device};
use crate::{
    axis::Positioner,
    component::{ComponentSpec, Kind, Reading, SignalGroup},
    error::{DeviceError, DeviceResult},
    signal::{ControlLayer, Value},
};

fn child(name: &str, attr: &str) -> String {
    format!("{}_{}", name, attr)
}

fn as_axes(motors: &[&Arc<Motor>]) -> Vec<Arc<dyn Positioner>> {
    motors
        .iter()
        .map(|m| Arc::clone(*m) as Arc<dyn Positioner>)
        .collect()
}

fn read_all(motors: &[&Arc<Motor>]) -> Vec<Reading> {
    motors.iter().flat_map(|m| m.read()).collect()
}

/// K-edge monochromator used for undulator tuning.
#[derive(Debug)]
pub struct Kmono {
    name: String,
    pub xtal_angle: Arc<Motor>,
    pub xtal_vert: Arc<Motor>,
    pub ret_horiz: Arc<Motor>,
    pub ret_vert: Arc<Motor>,
    pub diode_horiz: Arc<Motor>,
    pub diode_vert: Arc<Motor>,
}

impl Kmono {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str) -> DeviceResult<Self> {
        let axis = |suffix: &str, attr: &str| {
            Motor::new(layer, &format!("{}{}", prefix, suffix), &child(name, attr))
        };
        Ok(Self {
            name: name.to_string(),
            xtal_angle: axis(":XTAL_ANGLE", "xtal_angle")?,
            xtal_vert: axis(":XTAL_VERT", "xtal_vert")?,
            ret_horiz: axis(":RET_HORIZ", "ret_horiz")?,
            ret_vert: axis(":RET_VERT", "ret_vert")?,
            diode_horiz: axis(":DIODE_HORIZ", "diode_horiz")?,
            diode_vert: axis(":DIODE_VERT", "diode_vert")?,
        })
    }

    fn motors(&self) -> [&Arc<Motor>; 6] {
        [
            &self.xtal_angle,
            &self.xtal_vert,
            &self.ret_horiz,
            &self.ret_vert,
            &self.diode_horiz,
            &self.diode_vert,
        ]
    }
}

#[async_trait::async_trait]
impl Device for Kmono {
    fn name(&self) -> &str {
        &self.name
    }

    fn axes(&self) -> Vec<Arc<dyn Positioner>> {
        as_axes(&self.motors())
    }

    fn read(&self) -> Vec<Reading> {
        read_all(&self.motors())
    }
}

/// Pitch, yaw and translation of a single von Hamos crystal.
#[derive(Debug)]
pub struct VonHamosCrystal {
    name: String,
    pub pitch: Arc<Motor>,
    pub yaw: Arc<Motor>,
    pub trans: Arc<Motor>,
}

impl VonHamosCrystal {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str) -> DeviceResult<Self> {
        let axis = |suffix: &str, attr: &str| {
            Motor::new(layer, &format!("{}{}", prefix, suffix), &child(name, attr))
        };
        Ok(Self {
            name: name.to_string(),
            pitch: axis(":Pitch", "pitch")?,
            yaw: axis(":Yaw", "yaw")?,
            trans: axis(":Translation", "trans")?,
        })
    }

    fn motors(&self) -> [&Arc<Motor>; 3] {
        [&self.pitch, &self.yaw, &self.trans]
    }
}

#[async_trait::async_trait]
impl Device for VonHamosCrystal {
    fn name(&self) -> &str {
        &self.name
    }

    fn axes(&self) -> Vec<Arc<dyn Positioner>> {
        as_axes(&self.motors())
    }

    fn read(&self) -> Vec<Reading> {
        read_all(&self.motors())
    }
}

/// Prefixes of the common focus, energy and rotation stages.
#[derive(Debug, Clone)]
pub struct VonHamosCommonPrefixes {
    pub focus: String,
    pub energy: String,
    pub rotation: String,
}

/// von Hamos spectrometer with common motors and four crystals.
#[derive(Debug)]
pub struct VonHamos4Crystal {
    name: String,
    pub f: Arc<Motor>,
    pub e: Arc<Motor>,
    pub rot: Arc<Motor>,
    pub crystals: [VonHamosCrystal; 4],
}

impl VonHamos4Crystal {
    pub fn new(
        layer: &dyn ControlLayer,
        prefix: &str,
        name: &str,
        common: &VonHamosCommonPrefixes,
    ) -> DeviceResult<Self> {
        let crystal = |index: usize| {
            VonHamosCrystal::new(
                layer,
                &format!("{}:{}", prefix, index),
                &child(name, &format!("c{}", index)),
            )
        };
        Ok(Self {
            name: name.to_string(),
            f: Motor::new(layer, &common.focus, &child(name, "f"))?,
            e: Motor::new(layer, &common.energy, &child(name, "e"))?,
            rot: Motor::new(layer, &common.rotation, &child(name, "rot"))?,
            crystals: [crystal(1)?, crystal(2)?, crystal(3)?, crystal(4)?],
        })
    }

    /// Crystal `index` counted from 1.
    pub fn crystal(&self, index: usize) -> Option<&VonHamosCrystal> {
        index.checked_sub(1).and_then(|i| self.crystals.get(i))
    }
}

#[async_trait::async_trait]
impl Device for VonHamos4Crystal {
    fn name(&self) -> &str {
        &self.name
    }

    fn axes(&self) -> Vec<Arc<dyn Positioner>> {
        let mut axes = as_axes(&[&self.f, &self.e, &self.rot]);
        for crystal in &self.crystals {
            axes.extend(crystal.axes());
        }
        axes
    }

    fn read(&self) -> Vec<Reading> {
        let mut readings = read_all(&[&self.f, &self.e, &self.rot]);
        for crystal in &self.crystals {
            readings.extend(crystal.read());
        }
        readings
    }
}

pub const QMINI_TRIGGER_MODES: [&str; 3] = ["Free Run Start", "Free Run End", "HW Trigger"];

pub const QMINI_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec::ro("status", ":STATUS", Kind::Normal),
    ComponentSpec::ro("temperature", ":TEMP", Kind::Config),
    ComponentSpec::rw("exposure", ":SET_EXPOSURE_TIME", Kind::Config),
    ComponentSpec::ro("exposure_rbv", ":GET_EXPOSURE_TIME", Kind::Config),
    ComponentSpec::rw("trig_mode", ":TRIG_MODE", Kind::Config),
    ComponentSpec::ro("trig_mode_rbv", ":TRIG_MODE_RBV", Kind::Config),
    ComponentSpec::rw("trig_delay", ":SET_TRIG_DELAY", Kind::Config),
    ComponentSpec::ro("trig_delay_rbv", ":GET_TRIG_DELAY", Kind::Config),
    ComponentSpec::rw("trig_pin", ":SET_TRIG_PIN", Kind::Config),
    ComponentSpec::ro("trig_pin_rbv", ":TRIG_PIN_RBV", Kind::Config),
    ComponentSpec::rw("trig_edge", ":SET_TRIG_EDGE", Kind::Config),
    ComponentSpec::ro("trig_edge_rbv", ":TRIG_EDGE_RBV", Kind::Config),
    ComponentSpec::rw("trig_enable", ":SET_TRIG_ENABLE", Kind::Config),
    ComponentSpec::ro("trig_enable_rbv", ":GET_TRIG_ENABLE", Kind::Config),
    ComponentSpec::rw("scan_rate", ":START_EXPOSURE.SCAN", Kind::Config),
    ComponentSpec::rw("reset", ":CLEAR_SPECTROMETER", Kind::Config),
    ComponentSpec::ro("spectrum", ":SPECTRUM", Kind::Normal),
    ComponentSpec::ro("wavelengths", ":WAVELENGTHS", Kind::Normal),
    ComponentSpec::ro("model", ":MODEL_CODE", Kind::Config),
    ComponentSpec::ro("serial_number", ":SERIAL_NUMBER", Kind::Config),
    ComponentSpec::rw("adjust_offset", ":ADJUST_OFFSET", Kind::Omitted),
    ComponentSpec::rw("correct_nonlinearity", ":CORRECT_NONLINEARITY", Kind::Omitted),
    ComponentSpec::rw("remove_bad_pixels", ":REMOVE_BAD_PIXELS", Kind::Omitted),
    ComponentSpec::rw("subtract_dark", ":SUBTRACT_DARK", Kind::Omitted),
    ComponentSpec::rw("remove_temp_bad_pixels", ":REMOVE_TEMP_BAD_PIXELS", Kind::Omitted),
    ComponentSpec::rw("normalize_exposure", ":NORMALIZE_EXPOSURE", Kind::Omitted),
    ComponentSpec::rw("sensitivity_cal", ":SENSITIVITY_CAL", Kind::Omitted),
    ComponentSpec::rw("correct_prnu", ":CORRECT_PRNU", Kind::Omitted),
    ComponentSpec::rw("additional_filtering", ":ADDITIONAL_FILTERING", Kind::Omitted),
    ComponentSpec::rw("scale_to_16_bit", ":SCALE_TO_16BIT", Kind::Omitted),
    ComponentSpec::rw("set_processing_steps", ":SET_PROCESSING_STEPS", Kind::Omitted),
    ComponentSpec::ro("get_processing_steps", ":GET_PROCESSING_STEPS", Kind::Omitted),
    ComponentSpec::rw("fit_on", ":FIT_ON", Kind::Config),
    ComponentSpec::rw("fit_width", ":WIDTH", Kind::Config),
    ComponentSpec::rw("w0_guess", ":W0_GUESS", Kind::Config),
    ComponentSpec::ro("w0_fit", ":W0_FIT", Kind::Normal),
    ComponentSpec::ro("fit_fwhm", ":FWHM", Kind::Config),
    ComponentSpec::ro("fit_amplitude", ":AMPLITUDE", Kind::Config),
    ComponentSpec::ro("fit_stdev", ":STDEV", Kind::Config),
    ComponentSpec::ro("fit_chisq", ":CHISQ", Kind::Config),
];

/// Qmini compact spectrometer.
#[derive(Debug)]
pub struct QminiSpectrometer {
    group: SignalGroup,
}

impl QminiSpectrometer {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str) -> Self {
        Self {
            group: SignalGroup::build(layer, name, prefix, QMINI_COMPONENTS),
        }
    }

    pub fn signals(&self) -> &SignalGroup {
        &self.group
    }

    pub fn set_exposure(&self, exposure: f64) -> DeviceResult<()> {
        let signal = self.group.signal("exposure")?;
        signal.check_value(exposure)?;
        signal.put_f64(exposure, false)
    }

    /// Writes one of [`QMINI_TRIGGER_MODES`].
    pub fn set_trigger_mode(&self, mode: &str) -> DeviceResult<()> {
        let signal = self.group.signal("trig_mode")?;
        if !QMINI_TRIGGER_MODES.contains(&mode) {
            return Err(DeviceError::TypeMismatch {
                pvname: signal.pvname().to_string(),
                expected: "trigger mode",
            });
        }
        signal.put(Value::from(mode), false)
    }

    pub fn spectrum(&self) -> DeviceResult<Vec<f64>> {
        match self.group.get("spectrum")? {
            Value::Array(values) => Ok(values),
            _ => Err(DeviceError::TypeMismatch {
                pvname: self.group.signal("spectrum")?.pvname().to_string(),
                expected: "array",
            }),
        }
    }
}

#[async_trait::async_trait]
impl Device for QminiSpectrometer {
    fn name(&self) -> &str {
        self.group.name()
    }

    fn axes(&self) -> Vec<Arc<dyn Positioner>> {
        Vec::new()
    }

    fn read(&self) -> Vec<Reading> {
        self.group.read()
    }

    fn read_configuration(&self) -> Vec<Reading> {
        self.group.read_configuration()
    }
}
