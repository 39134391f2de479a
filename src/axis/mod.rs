pub mod limit_switches;
pub mod move_options;
pub mod state;
pub mod state_info;

use serde::Serialize;

use crate::{error::DeviceResult, status::MoveStatus};
use move_options::MoveOptions;
use state_info::AxisStateInfo;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportedPosition {
    Value(f64),
    Missing(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionerReport {
    pub name: String,
    pub position: ReportedPosition,
    pub pv: String,
}

#[async_trait::async_trait]
pub trait Positioner: Send + Sync {
    fn name(&self) -> &str;

    async fn move_to(&self, target: f64, options: MoveOptions) -> DeviceResult<MoveStatus>;
    async fn stop(&self) -> DeviceResult<()>;

    fn state(&self) -> DeviceResult<AxisStateInfo>;
    fn get_attribute(&self, name: &str) -> DeviceResult<f64>;

    /// PV name of the readback, used in reports.
    fn readback_pv(&self) -> &str;

    fn position(&self) -> DeviceResult<f64> {
        self.get_attribute("position")
    }

    fn available_attributes(&self) -> Vec<String> {
        vec!["position".to_string()]
    }

    fn report(&self) -> PositionerReport {
        let position = match self.position() {
            Ok(value) => ReportedPosition::Value(value),
            Err(e) if e.is_disconnected() => ReportedPosition::Missing("disconnected".to_string()),
            Err(e) => ReportedPosition::Missing(e.to_string()),
        };
        PositionerReport {
            name: self.name().to_string(),
            position,
            pv: self.readback_pv().to_string(),
        }
    }
}
