//! Offset mirror: pitch motor, piezo, gantry motors and gantry coupling.

use std::sync::Arc;

use tracing::info;

use super::{coupling::CouplingMotor, motor::Motor, piezo::Piezo, Device};
use crate::{
    axis::Positioner,
    component::Reading,
    error::{DeviceError, DeviceResult},
    signal::ControlLayer,
};

/// Area and mirror segments of a `XXX:AREA:MIRROR[:...]` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPrefix {
    pub prefix: String,
    pub area: String,
    pub mirror: String,
}

impl MirrorPrefix {
    pub fn parse(prefix: &str) -> DeviceResult<Self> {
        let segments: Vec<&str> = prefix.split(':').collect();
        match segments.as_slice() {
            [_, area, mirror, ..] if !area.is_empty() && !mirror.is_empty() => Ok(Self {
                prefix: prefix.to_string(),
                area: area.to_string(),
                mirror: mirror.to_string(),
            }),
            _ => Err(DeviceError::InvalidPrefix(prefix.to_string())),
        }
    }

    pub fn gantry(&self, axis: char, side: char) -> String {
        format!("STEP:{}:{}:{}", self.mirror, axis, side)
    }

    pub fn piezo(&self) -> String {
        format!("PIEZO:{}:{}", self.area, self.mirror)
    }

    pub fn coupling(&self, section: &str) -> String {
        format!("STEP:{}:{}:MOTR", self.area, section)
    }
}

#[derive(Debug)]
pub struct OffsetMirror {
    name: String,
    prefix: MirrorPrefix,
    section: String,
    pub pitch: Arc<Motor>,
    pub piezo: Arc<Piezo>,
    pub gan_x_p: Arc<Motor>,
    pub gan_x_s: Arc<Motor>,
    pub gan_y_p: Arc<Motor>,
    pub gan_y_s: Arc<Motor>,
    pub coupling: CouplingMotor,
}

impl OffsetMirror {
    pub fn new(
        layer: &dyn ControlLayer,
        prefix: &str,
        name: &str,
        section: &str,
    ) -> DeviceResult<Self> {
        let parsed = MirrorPrefix::parse(prefix)?;
        let child = |attr: &str| format!("{}_{}", name, attr);

        let mirror = Self {
            pitch: Motor::new(layer, prefix, &child("pitch"))?,
            piezo: Piezo::new(layer, &parsed.piezo(), &child("piezo"))?,
            gan_x_p: Motor::new(layer, &parsed.gantry('X', 'P'), &child("gan_x_p"))?,
            gan_x_s: Motor::new(layer, &parsed.gantry('X', 'S'), &child("gan_x_s"))?,
            gan_y_p: Motor::new(layer, &parsed.gantry('Y', 'P'), &child("gan_y_p"))?,
            gan_y_s: Motor::new(layer, &parsed.gantry('Y', 'S'), &child("gan_y_s"))?,
            coupling: CouplingMotor::new(layer, &parsed.coupling(section), &child("coupling")),
            name: name.to_string(),
            prefix: parsed,
            section: section.to_string(),
        };

        info!(
            "Created offset mirror {} (area={}, mirror={})",
            mirror.name, mirror.prefix.area, mirror.prefix.mirror
        );
        Ok(mirror)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix.prefix
    }

    pub fn area(&self) -> &str {
        &self.prefix.area
    }

    pub fn mirror(&self) -> &str {
        &self.prefix.mirror
    }

    pub fn section(&self) -> &str {
        &self.section
    }
}

#[async_trait::async_trait]
impl Device for OffsetMirror {
    fn name(&self) -> &str {
        &self.name
    }

    fn axes(&self) -> Vec<Arc<dyn Positioner>> {
        vec![
            self.pitch.clone() as Arc<dyn Positioner>,
            self.piezo.clone() as Arc<dyn Positioner>,
            self.gan_x_p.clone(),
            self.gan_x_s.clone(),
            self.gan_y_p.clone(),
            self.gan_y_s.clone(),
        ]
    }

    fn read(&self) -> Vec<Reading> {
        [
            self.pitch.read(),
            self.piezo.read(),
            self.gan_x_p.read(),
            self.gan_x_s.read(),
        ]
        .concat()
    }

    fn read_configuration(&self) -> Vec<Reading> {
        [
            self.pitch.read_configuration(),
            self.piezo.read_configuration(),
            self.gan_x_p.read_configuration(),
            self.gan_x_s.read_configuration(),
            self.gan_y_p.read_configuration(),
            self.gan_y_s.read_configuration(),
            self.coupling.read_configuration(),
        ]
        .concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{axis::move_options::MoveOptions, signal::sim::SimLayer};

    #[test]
    fn test_prefix_segments() {
        let parsed = MirrorPrefix::parse("MIRR:FEE1:M1H").unwrap();
        assert_eq!(parsed.area, "FEE1");
        assert_eq!(parsed.mirror, "M1H");
        assert_eq!(parsed.gantry('Y', 'S'), "STEP:M1H:Y:S");
        assert_eq!(parsed.piezo(), "PIEZO:FEE1:M1H");
        assert_eq!(parsed.coupling("611"), "STEP:FEE1:611:MOTR");

        assert!(MirrorPrefix::parse("MIRR:FEE1:M1H:EXTRA").is_ok());
        assert_eq!(
            MirrorPrefix::parse("MIRR:FEE1"),
            Err(DeviceError::InvalidPrefix("MIRR:FEE1".to_string()))
        );
        assert!(MirrorPrefix::parse("MIRR::M1H").is_err());
    }

    #[test]
    fn test_children_are_wired_from_prefix() {
        let layer = SimLayer::new();
        let mirror = OffsetMirror::new(&layer, "MIRR:FEE1:M1H", "m1h", "611").unwrap();

        assert_eq!(mirror.pitch.readback_pv(), "MIRR:FEE1:M1H:RBV");
        assert_eq!(mirror.piezo.readback_pv(), "PIEZO:FEE1:M1H:VRBV");
        assert_eq!(mirror.gan_x_p.readback_pv(), "STEP:M1H:X:P:RBV");
        assert_eq!(mirror.gan_y_p.readback_pv(), "STEP:M1H:Y:P:RBV");
        assert_eq!(mirror.gan_y_s.readback_pv(), "STEP:M1H:Y:S:RBV");
        assert_eq!(mirror.coupling.prefix(), "STEP:FEE1:611:MOTR");
        assert_eq!(mirror.gan_y_s.name(), "m1h_gan_y_s");

        let names: Vec<String> = mirror.axes().iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names.len(), 6);
        assert!(mirror.get_axis("pitch").is_ok());
        assert!(mirror.get_axis("m1h_piezo").is_ok());
        assert!(matches!(
            mirror.get_axis("roll"),
            Err(DeviceError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn test_invalid_prefix_is_rejected() {
        let layer = SimLayer::new();
        assert!(matches!(
            OffsetMirror::new(&layer, "MIRR", "m", ""),
            Err(DeviceError::InvalidPrefix(_))
        ));
    }

    #[tokio::test]
    async fn test_move_on_disconnected_axis_fails() {
        let layer = SimLayer::new();
        let mirror = OffsetMirror::new(&layer, "MIRR:FEE1:M1H", "m1h", "611").unwrap();
        let err = mirror
            .move_axis("pitch", 1.0, MoveOptions::no_wait())
            .await
            .unwrap_err();
        assert!(err.is_disconnected());
        assert!(mirror.get_attribute("pitch", "nope").is_err());
        assert_eq!(mirror.read().len(), 9);
    }
}
