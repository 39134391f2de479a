//! Intensity position monitor readout boxes.

use std::sync::Arc;

use super::Device;
use crate::{
    axis::Positioner,
    component::{Kind, Reading, SignalGroup},
    error::{DeviceError, DeviceResult},
    signal::{Access, ControlLayer},
};

pub const IPIMB_CHANNELS: usize = 4;
pub const WAVE8_CHANNELS: usize = 16;

/// One digitizer channel. PV names embed the channel index.
#[derive(Debug)]
pub struct Channel {
    index: usize,
    group: SignalGroup,
}

impl Channel {
    fn ipimb(layer: &dyn ControlLayer, prefix: &str, name: &str, index: usize) -> Self {
        let group = SignalGroup::new(format!("{}_ch{}", name, index), prefix)
            .with_pv(layer, "amplitude", &format!("{}:CH{}", prefix, index), Access::ReadWrite, Kind::Hinted)
            .with_pv(
                layer,
                "gain",
                &format!("{}:ChargeAmpRangeCH{}", prefix, index),
                Access::ReadWrite,
                Kind::Config,
            )
            .with_pv(layer, "base", &format!("{}:CH{}_BASE", prefix, index), Access::ReadWrite, Kind::Config)
            .with_pv(layer, "scale", &format!("{}:CH{}_SCALE", prefix, index), Access::ReadWrite, Kind::Config);
        Self { index, group }
    }

    fn wave8(layer: &dyn ControlLayer, prefix: &str, name: &str, index: usize) -> Self {
        let group = SignalGroup::new(format!("{}_ch{}", name, index), prefix)
            .with_pv(layer, "amplitude", &format!("{}:AMPL_{}", prefix, index), Access::ReadWrite, Kind::Hinted)
            .with_pv(layer, "tpos", &format!("{}:TPOS_{}", prefix, index), Access::ReadWrite, Kind::Normal)
            .with_pv(
                layer,
                "number_of_samples",
                &format!("{}:NumberOfSamples{}_RBV", prefix, index),
                Access::ReadWrite,
                Kind::Config,
            )
            .with_pv(layer, "delay", &format!("{}:Delay{}", prefix, index), Access::ReadWrite, Kind::Config);
        Self { index, group }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn signals(&self) -> &SignalGroup {
        &self.group
    }

    pub fn amplitude(&self) -> DeviceResult<f64> {
        self.group.get_f64("amplitude")
    }
}

/// Summed intensity and beam position plus per-channel readings.
#[derive(Debug)]
pub struct IpmReadout {
    group: SignalGroup,
    prefix_ioc: String,
    channels: Vec<Channel>,
}

impl IpmReadout {
    fn channel(&self, index: usize) -> DeviceResult<&Channel> {
        self.channels.get(index).ok_or_else(|| DeviceError::InvalidChannel {
            device: self.group.name().to_string(),
            index,
            count: self.channels.len(),
        })
    }

    fn read(&self) -> Vec<Reading> {
        let mut readings = self.group.read();
        for channel in &self.channels {
            readings.extend(channel.group.read());
        }
        readings
    }

    fn read_configuration(&self) -> Vec<Reading> {
        let mut readings = self.group.read_configuration();
        for channel in &self.channels {
            readings.extend(channel.group.read_configuration());
        }
        readings
    }
}

fn ioc_prefix(prefix: &str, prefix_ioc: Option<&str>) -> String {
    match prefix_ioc {
        Some(ioc) if !ioc.is_empty() => ioc.to_string(),
        _ => format!("IOC:{}", prefix),
    }
}

macro_rules! readout_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn isum(&self) -> DeviceResult<f64> {
                self.0.group.get_f64("isum")
            }

            pub fn xpos(&self) -> DeviceResult<f64> {
                self.0.group.get_f64("xpos")
            }

            pub fn ypos(&self) -> DeviceResult<f64> {
                self.0.group.get_f64("ypos")
            }

            pub fn prefix_ioc(&self) -> &str {
                &self.0.prefix_ioc
            }

            pub fn channel_count(&self) -> usize {
                self.0.channels.len()
            }

            /// Channel `index`, counted from 0.
            pub fn channel(&self, index: usize) -> DeviceResult<&Channel> {
                self.0.channel(index)
            }

            pub fn channels(&self) -> &[Channel] {
                &self.0.channels
            }
        }

        #[async_trait::async_trait]
        impl Device for $ty {
            fn name(&self) -> &str {
                self.0.group.name()
            }

            fn axes(&self) -> Vec<Arc<dyn Positioner>> {
                Vec::new()
            }

            fn read(&self) -> Vec<Reading> {
                self.0.read()
            }

            fn read_configuration(&self) -> Vec<Reading> {
                self.0.read_configuration()
            }
        }
    };
}

/// Four-channel IPIMB box.
#[derive(Debug)]
pub struct Ipimb(IpmReadout);

impl Ipimb {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str, prefix_ioc: Option<&str>) -> Self {
        let group = SignalGroup::new(name, prefix)
            .with_pv(layer, "isum", &format!("{}:SUM", prefix), Access::ReadWrite, Kind::Hinted)
            .with_pv(layer, "xpos", &format!("{}:XPOS", prefix), Access::ReadWrite, Kind::Normal)
            .with_pv(layer, "ypos", &format!("{}:YPOS", prefix), Access::ReadWrite, Kind::Normal)
            .with_pv(layer, "delay", &format!("{}:TrigDelay", prefix), Access::ReadWrite, Kind::Config)
            .with_pv(layer, "bias", &format!("{}:DiodeBias", prefix), Access::ReadWrite, Kind::Config);
        Self(IpmReadout {
            group,
            prefix_ioc: ioc_prefix(prefix, prefix_ioc),
            channels: (0..IPIMB_CHANNELS)
                .map(|i| Channel::ipimb(layer, prefix, name, i))
                .collect(),
        })
    }
}

readout_accessors!(Ipimb);

/// Sixteen-channel Wave8 digitizer.
#[derive(Debug)]
pub struct Wave8(IpmReadout);

impl Wave8 {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str, prefix_ioc: Option<&str>) -> Self {
        let group = SignalGroup::new(name, prefix)
            .with_pv(layer, "isum", &format!("{}:SUM", prefix), Access::ReadWrite, Kind::Normal)
            .with_pv(layer, "xpos", &format!("{}:XPOS", prefix), Access::ReadWrite, Kind::Normal)
            .with_pv(layer, "ypos", &format!("{}:YPOS", prefix), Access::ReadWrite, Kind::Normal);
        Self(IpmReadout {
            group,
            prefix_ioc: ioc_prefix(prefix, prefix_ioc),
            channels: (0..WAVE8_CHANNELS)
                .map(|i| Channel::wave8(layer, prefix, name, i))
                .collect(),
        })
    }
}

readout_accessors!(Wave8);
