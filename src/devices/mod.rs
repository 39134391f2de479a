pub mod coupling;
pub mod ipm;
pub mod mirror;
pub mod motor;
pub mod piezo;
pub mod sensors;
pub mod spectrometer;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    axis::{move_options::MoveOptions, state_info::AxisStateInfo, Positioner},
    component::Reading,
    error::{DeviceError, DeviceResult},
    status::MoveStatus,
};

/// A named device exposing zero or more positioners and a set of readings.
#[async_trait::async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn axes(&self) -> Vec<Arc<dyn Positioner>>;

    /// Looks an axis up by its full name or by the attribute after `{device}_`.
    fn get_axis(&self, axis: &str) -> DeviceResult<Arc<dyn Positioner>> {
        let qualified = format!("{}_{}", self.name(), axis);
        self.axes()
            .into_iter()
            .find(|a| a.name() == axis || a.name() == qualified)
            .ok_or_else(|| DeviceError::UnknownComponent {
                device: self.name().to_string(),
                attr: axis.to_string(),
            })
    }

    fn read(&self) -> Vec<Reading>;

    fn read_configuration(&self) -> Vec<Reading> {
        Vec::new()
    }

    async fn shutdown(&self) -> DeviceResult<()> {
        for axis in self.axes() {
            axis.stop().await?;
        }
        Ok(())
    }

    async fn move_axis(
        &self,
        axis: &str,
        target: f64,
        options: MoveOptions,
    ) -> DeviceResult<MoveStatus> {
        let ax = self.get_axis(axis)?;
        ax.move_to(target, options).await
    }

    async fn stop(&self, axis: &str) -> DeviceResult<()> {
        let ax = self.get_axis(axis)?;
        ax.stop().await
    }

    fn state(&self, axis: &str) -> DeviceResult<AxisStateInfo> {
        self.get_axis(axis)?.state()
    }

    fn get_attribute(&self, axis: &str, attribute: &str) -> DeviceResult<f64> {
        let ax = self.get_axis(axis)?;
        if !ax.available_attributes().iter().any(|a| a == attribute) {
            return Err(DeviceError::UnknownAttribute {
                device: ax.name().to_string(),
                attr: attribute.to_string(),
            });
        }
        ax.get_attribute(attribute)
    }

    fn available_attributes(&self, axis: &str) -> DeviceResult<Vec<String>> {
        Ok(self.get_axis(axis)?.available_attributes())
    }
}

/// Waits on `status`; when `cancel` fires first the positioner is stopped
/// and the wait ends with [`DeviceError::Interrupted`].
pub(crate) async fn wait_or_stop<P>(
    positioner: &P,
    status: &MoveStatus,
    cancel: Option<&CancellationToken>,
) -> DeviceResult<()>
where
    P: Positioner + ?Sized,
{
    let Some(cancel) = cancel else {
        return status.wait().await;
    };

    tokio::select! {
        result = status.wait() => result,
        _ = cancel.cancelled() => {
            warn!("Move of {} interrupted, stopping", positioner.name());
            positioner.stop().await?;
            Err(DeviceError::Interrupted { name: positioner.name().to_string() })
        }
    }
}
