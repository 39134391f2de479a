//! Piezo driver used for fine pitch adjustments.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    axis::{move_options::MoveOptions, state::AxisState, state_info::AxisStateInfo, Positioner},
    component::{ComponentSpec, Kind, Reading, SignalGroup},
    error::{DeviceError, DeviceResult},
    signal::{limits::Limits, Callback, ControlLayer, Signal, SignalUpdate, SubscriptionId},
    status::MoveStatus,
};

pub const PIEZO_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec::ro("user_readback", ":VRBV", Kind::Hinted),
    ComponentSpec::rw("user_setpoint", ":VSET", Kind::Normal),
    ComponentSpec::rw("high_limit", ":VMAX", Kind::Config),
    ComponentSpec::rw("low_limit", ":VMIN", Kind::Config),
    ComponentSpec::ro("enable", ":Enable", Kind::Normal),
    ComponentSpec::rw("stop_signal", ":STOP", Kind::Omitted),
];

#[derive(Debug, Default)]
struct PiezoState {
    position: Option<f64>,
    pending: Option<MoveStatus>,
}

#[derive(Debug)]
pub struct Piezo {
    name: String,
    group: SignalGroup,
    user_readback: Arc<dyn Signal>,
    user_setpoint: Arc<dyn Signal>,
    stop_signal: Arc<dyn Signal>,
    state: Mutex<PiezoState>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Piezo {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str) -> DeviceResult<Arc<Self>> {
        let group = SignalGroup::build(layer, name, prefix, PIEZO_COMPONENTS);
        let piezo = Arc::new(Piezo {
            name: name.to_string(),
            user_readback: group.signal("user_readback")?,
            user_setpoint: group.signal("user_setpoint")?,
            stop_signal: group.signal("stop_signal")?,
            group,
            state: Mutex::new(PiezoState::default()),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&piezo);
        let callback: Callback = Arc::new(move |update| {
            if let Some(piezo) = weak.upgrade() {
                piezo.readback_changed(update);
            }
        });
        let id = piezo.user_readback.subscribe(callback);
        *piezo
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);

        Ok(piezo)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signals(&self) -> &SignalGroup {
        &self.group
    }

    pub fn precision(&self) -> DeviceResult<u32> {
        self.user_readback.precision()
    }

    /// Travel range from VMIN/VMAX.
    pub fn limits(&self) -> DeviceResult<Limits> {
        Ok(Limits::new(
            self.group.get_f64("low_limit")?,
            self.group.get_f64("high_limit")?,
        ))
    }

    pub fn check_value(&self, position: f64) -> DeviceResult<()> {
        self.limits()?.check(&self.name, position)
    }

    pub fn position(&self) -> DeviceResult<f64> {
        if !self.user_readback.connected() {
            return Err(DeviceError::disconnected(self.user_readback.pvname()));
        }
        self.lock_state()
            .position
            .ok_or_else(|| DeviceError::disconnected(self.user_readback.pvname()))
    }

    pub fn set_current_position(&self, position: f64) -> DeviceResult<()> {
        self.user_setpoint.put_f64(position, true)
    }

    pub async fn move_to(&self, position: f64, options: MoveOptions) -> DeviceResult<MoveStatus> {
        self.check_value(position)?;
        let tolerance = self.tolerance();

        let status = MoveStatus::new(&self.name, position, options.timeout);
        let previous = self.lock_state().pending.replace(status.clone());
        if let Some(previous) = previous {
            let _ = previous.finish(false);
        }

        info!("Moving {} to {}", self.name, position);
        if let Err(e) = self.user_setpoint.put_f64(position, false) {
            self.lock_state().pending.take();
            let _ = status.finish(false);
            return Err(e);
        }

        // Already there, or the readback arrived before the status was armed.
        if let Ok(current) = self.user_readback.get_f64() {
            self.resolve_if_arrived(current, tolerance);
        }

        if options.wait {
            super::wait_or_stop(self, &status, options.cancel.as_ref()).await?;
        }
        Ok(status)
    }

    pub async fn stop(&self) -> DeviceResult<()> {
        info!("Stopping {}", self.name);
        let result = self.stop_signal.put_f64(1.0, false);
        let pending = self.lock_state().pending.take();
        if let Some(status) = pending {
            let _ = status.finish(false);
        }
        result
    }

    fn tolerance(&self) -> f64 {
        let precision = self.precision().unwrap_or_else(|e| {
            warn!("{}: precision unavailable ({}), assuming 3", self.name, e);
            3
        });
        10f64.powi(-(precision as i32))
    }

    fn readback_changed(&self, update: &SignalUpdate) {
        let Some(value) = update.value.as_f64() else {
            warn!("{}: non-numeric readback {:?}", self.name, update.value);
            return;
        };
        self.lock_state().position = Some(value);
        self.resolve_if_arrived(value, self.tolerance());
    }

    fn resolve_if_arrived(&self, position: f64, tolerance: f64) {
        let arrived = {
            let mut state = self.lock_state();
            match &state.pending {
                Some(status) if (position - status.target()).abs() <= tolerance => {
                    state.pending.take()
                }
                _ => None,
            }
        };
        if let Some(status) = arrived {
            debug!("{} reached {}", self.name, status.target());
            let _ = status.finish(true);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PiezoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> Vec<Reading> {
        self.group.read()
    }

    pub fn read_configuration(&self) -> Vec<Reading> {
        self.group.read_configuration()
    }
}

impl Drop for Piezo {
    fn drop(&mut self) {
        let subscription = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            self.user_readback.unsubscribe(id);
        }
    }
}

#[async_trait]
impl Positioner for Piezo {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_to(&self, target: f64, options: MoveOptions) -> DeviceResult<MoveStatus> {
        Piezo::move_to(self, target, options).await
    }

    async fn stop(&self) -> DeviceResult<()> {
        Piezo::stop(self).await
    }

    fn state(&self) -> DeviceResult<AxisStateInfo> {
        if !self.user_readback.connected() {
            return Ok(AxisStateInfo::disconnected(self.user_readback.pvname()));
        }
        let alarm = self.user_readback.alarm()?;
        let state = if alarm.is_active() {
            AxisState::Alarm
        } else if self.lock_state().pending.is_some() {
            AxisState::Moving
        } else {
            AxisState::Idle
        };
        Ok(AxisStateInfo::new(state).with_alarm(alarm))
    }

    fn get_attribute(&self, name: &str) -> DeviceResult<f64> {
        match name {
            "position" => Piezo::position(self),
            "precision" => Ok(self.precision()? as f64),
            "user_setpoint" | "high_limit" | "low_limit" | "enable" => self.group.get_f64(name),
            _ => Err(DeviceError::UnknownAttribute {
                device: self.name.clone(),
                attr: name.to_string(),
            }),
        }
    }

    fn readback_pv(&self) -> &str {
        self.user_readback.pvname()
    }

    fn position(&self) -> DeviceResult<f64> {
        Piezo::position(self)
    }

    fn available_attributes(&self) -> Vec<String> {
        ["position", "precision", "user_setpoint", "high_limit", "low_limit", "enable"]
            .iter()
            .map(|a| a.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::sim::SimLayer;

    const PREFIX: &str = "PIEZO:FEE1:M1H";

    fn layer() -> SimLayer {
        let layer = SimLayer::new();
        for (suffix, value) in [
            (":VRBV", 50.0),
            (":VSET", 50.0),
            (":VMAX", 100.0),
            (":VMIN", 0.0),
            (":Enable", 1.0),
            (":STOP", 0.0),
        ] {
            layer.pv(&format!("{}{}", PREFIX, suffix)).sim_put(value);
        }
        layer
    }

    #[tokio::test]
    async fn test_move_resolves_within_precision() {
        let layer = layer();
        let piezo = Piezo::new(&layer, PREFIX, "m1h_piezo").unwrap();

        let status = Piezo::move_to(&piezo, 60.0, MoveOptions::no_wait()).await.unwrap();
        layer.pv("PIEZO:FEE1:M1H:VRBV").sim_put(59.5);
        assert!(!status.done());

        layer.pv("PIEZO:FEE1:M1H:VRBV").sim_put(60.0004);
        assert_eq!(status.success(), Some(true));
        assert_eq!(piezo.get_attribute("position").unwrap(), 60.0004);
    }

    #[tokio::test]
    async fn test_move_to_current_position_resolves_immediately() {
        let layer = layer();
        let piezo = Piezo::new(&layer, PREFIX, "m1h_piezo").unwrap();
        let status = Piezo::move_to(&piezo, 50.0, MoveOptions::new()).await.unwrap();
        assert_eq!(status.success(), Some(true));
    }

    #[tokio::test]
    async fn test_limits_come_from_vmin_vmax() {
        let layer = layer();
        let piezo = Piezo::new(&layer, PREFIX, "m1h_piezo").unwrap();

        let err = Piezo::move_to(&piezo, 120.0, MoveOptions::no_wait())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::OutOfLimits { high, .. } if high == 100.0));
        assert_eq!(layer.pv("PIEZO:FEE1:M1H:VSET").client_puts(), 0);
    }

    #[tokio::test]
    async fn test_stop_fails_pending_move() {
        let layer = layer();
        let piezo = Piezo::new(&layer, PREFIX, "m1h_piezo").unwrap();

        let status = Piezo::move_to(&piezo, 70.0, MoveOptions::no_wait()).await.unwrap();
        assert_eq!(piezo.state().unwrap().state, AxisState::Moving);

        Piezo::stop(&piezo).await.unwrap();
        assert_eq!(status.success(), Some(false));
        assert_eq!(layer.pv("PIEZO:FEE1:M1H:STOP").value_f64(), Some(1.0));
        assert_eq!(piezo.state().unwrap().state, AxisState::Idle);
    }
}
