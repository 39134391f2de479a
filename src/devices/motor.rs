//! Motor record positioner used on offset mirror gantries and Beckhoff axes.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    axis::{
        limit_switches::LimitSwitches, move_options::MoveOptions, state::AxisState,
        state_info::AxisStateInfo, Positioner,
    },
    component::{ComponentSpec, Kind, Reading, SignalGroup},
    error::{DeviceError, DeviceResult},
    motion::{CompletionSnapshot, Direction, MotionEvent, MotionTracker},
    signal::{
        alarm::Alarm, limits::Limits, Callback, ControlLayer, Signal, SignalUpdate,
        SubscriptionId,
    },
    status::MoveStatus,
};

const EVENT_CAPACITY: usize = 64;

pub const MOTOR_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec::ro("user_readback", ":RBV", Kind::Hinted),
    ComponentSpec::rw("user_setpoint", ":VAL", Kind::Normal),
    ComponentSpec::rw("velocity", ":VELO", Kind::Config),
    ComponentSpec::rw("acceleration", ":ACCL", Kind::Config),
    ComponentSpec::ro("motor_is_moving", ":MOVN", Kind::Omitted),
    ComponentSpec::ro("motor_done_move", ":DMOV", Kind::Omitted),
    ComponentSpec::rw("high_limit_switch", ":HLS", Kind::Omitted),
    ComponentSpec::rw("low_limit_switch", ":LLS", Kind::Omitted),
    ComponentSpec::ro("direction_of_travel", ":TDIR", Kind::Omitted),
    ComponentSpec::rw("motor_stop", ":STOP", Kind::Omitted),
    ComponentSpec::ro("interlock", ":INTERLOCK", Kind::Config),
    ComponentSpec::ro("enabled", ":ENABLED", Kind::Config),
];

const ATTRIBUTES: &[&str] = &[
    "position",
    "user_setpoint",
    "velocity",
    "acceleration",
    "precision",
    "low_limit",
    "high_limit",
    "moving",
    "done_moving",
    "low_limit_switch",
    "high_limit_switch",
    "interlock",
    "enabled",
];

/// True when a limit-switch style signal reads exactly 1.
pub(crate) fn switch_active(signal: &dyn Signal) -> bool {
    match signal.get_f64() {
        Ok(value) => value == 1.0,
        Err(e) => {
            warn!("Could not read {}: {}", signal.pvname(), e);
            false
        }
    }
}

#[derive(Debug)]
pub struct Motor {
    name: String,
    prefix: String,
    group: SignalGroup,
    user_readback: Arc<dyn Signal>,
    user_setpoint: Arc<dyn Signal>,
    motor_is_moving: Arc<dyn Signal>,
    motor_done_move: Arc<dyn Signal>,
    high_limit_switch: Arc<dyn Signal>,
    low_limit_switch: Arc<dyn Signal>,
    direction_of_travel: Arc<dyn Signal>,
    motor_stop: Arc<dyn Signal>,
    tracker: MotionTracker,
    pending: Mutex<Option<MoveStatus>>,
    events: broadcast::Sender<MotionEvent>,
    subscriptions: Mutex<Vec<(Arc<dyn Signal>, SubscriptionId)>>,
}

impl Motor {
    pub fn new(layer: &dyn ControlLayer, prefix: &str, name: &str) -> DeviceResult<Arc<Self>> {
        let group = SignalGroup::build(layer, name, prefix, MOTOR_COMPONENTS);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let motor = Arc::new(Motor {
            name: name.to_string(),
            prefix: prefix.to_string(),
            user_readback: group.signal("user_readback")?,
            user_setpoint: group.signal("user_setpoint")?,
            motor_is_moving: group.signal("motor_is_moving")?,
            motor_done_move: group.signal("motor_done_move")?,
            high_limit_switch: group.signal("high_limit_switch")?,
            low_limit_switch: group.signal("low_limit_switch")?,
            direction_of_travel: group.signal("direction_of_travel")?,
            motor_stop: group.signal("motor_stop")?,
            group,
            tracker: MotionTracker::new(name),
            pending: Mutex::new(None),
            events,
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&motor);
        motor.watch(&motor.motor_done_move, &weak, Motor::done_moving_changed);
        motor.watch(&motor.user_readback, &weak, Motor::readback_changed);

        Ok(motor)
    }

    fn watch(&self, signal: &Arc<dyn Signal>, weak: &Weak<Motor>, handler: fn(&Motor, &SignalUpdate)) {
        let weak = weak.clone();
        let callback: Callback = Arc::new(move |update| {
            if let Some(motor) = weak.upgrade() {
                handler(&motor, update);
            }
        });
        let id = signal.subscribe(callback);
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((signal.clone(), id));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn signals(&self) -> &SignalGroup {
        &self.group
    }

    pub fn motion_events(&self) -> broadcast::Receiver<MotionEvent> {
        self.events.subscribe()
    }

    /// Precision of the readback PV.
    pub fn precision(&self) -> DeviceResult<u32> {
        self.user_readback.precision()
    }

    pub fn limits(&self) -> DeviceResult<Limits> {
        self.user_setpoint.limits()
    }

    /// Reads MOVN directly rather than the tracked state.
    pub fn moving(&self) -> DeviceResult<bool> {
        Ok(self.motor_is_moving.get_f64()? != 0.0)
    }

    /// Last readback delivered to the tracker.
    pub fn position(&self) -> DeviceResult<f64> {
        if !self.user_readback.connected() {
            return Err(DeviceError::disconnected(self.user_readback.pvname()));
        }
        self.tracker
            .position()
            .ok_or_else(|| DeviceError::disconnected(self.user_readback.pvname()))
    }

    pub fn check_value(&self, position: f64) -> DeviceResult<()> {
        self.limits()?.check(&self.name, position)
    }

    pub fn set_current_position(&self, position: f64) -> DeviceResult<()> {
        self.user_setpoint.put_f64(position, true)
    }

    pub fn pending_status(&self) -> Option<MoveStatus> {
        self.lock_pending().clone()
    }

    pub async fn move_to(&self, position: f64, options: MoveOptions) -> DeviceResult<MoveStatus> {
        self.check_value(position)?;

        self.tracker.reset_started();
        let status = MoveStatus::new(&self.name, position, options.timeout);
        let previous = self.lock_pending().replace(status.clone());
        if let Some(previous) = previous {
            if previous.finish(false).is_ok() {
                warn!(
                    "Move of {} to {} superseded by move to {}",
                    self.name,
                    previous.target(),
                    position
                );
            }
        }

        info!("Moving {} to {}", self.name, position);
        if let Err(e) = self.user_setpoint.put_f64(position, false) {
            self.take_pending_if(&status);
            let _ = status.finish(false);
            return Err(e);
        }

        if options.wait {
            super::wait_or_stop(self, &status, options.cancel.as_ref()).await?;
        }
        Ok(status)
    }

    /// Requests a stop and fails the pending move.
    pub async fn stop(&self) -> DeviceResult<()> {
        info!("Stopping {}", self.name);
        let result = self.motor_stop.put_f64(1.0, false);
        let pending = self.lock_pending().take();
        if let Some(status) = pending {
            let _ = status.finish(false);
        }
        result
    }

    fn readback_changed(&self, update: &SignalUpdate) {
        match update.value.as_f64() {
            Some(value) => self.tracker.on_readback(update.timestamp, value),
            None => warn!("{}: non-numeric readback {:?}", self.name, update.value),
        }
    }

    fn done_moving_changed(&self, update: &SignalUpdate) {
        let Some(value) = update.value.as_f64() else {
            warn!("{}: non-numeric done-move value {:?}", self.name, update.value);
            return;
        };

        let event = self
            .tracker
            .on_done_moving(update.timestamp, value, || self.completion_snapshot());
        if let Some(event) = event {
            self.handle_event(event);
        }
    }

    fn completion_snapshot(&self) -> CompletionSnapshot {
        let direction = match self.direction_of_travel.get_f64() {
            Ok(raw) => Direction::from_raw(raw),
            Err(e) => {
                warn!("{}: direction of travel unavailable: {}", self.name, e);
                Direction::Unknown
            }
        };
        let alarm = self.user_readback.alarm().unwrap_or_else(|e| {
            warn!("{}: readback alarm unavailable: {}", self.name, e);
            Alarm::disconnected()
        });

        CompletionSnapshot::clear(direction)
            .with_limits(
                switch_active(self.low_limit_switch.as_ref()),
                switch_active(self.high_limit_switch.as_ref()),
            )
            .with_alarm(alarm)
    }

    fn handle_event(&self, event: MotionEvent) {
        match &event {
            MotionEvent::Started { .. } => debug!("{} started moving", self.name),
            MotionEvent::Finished { success, .. } => {
                let pending = self.lock_pending().take();
                match pending {
                    Some(status) => {
                        info!("{} finished moving (success={})", self.name, success);
                        if let Err(e) = status.finish(*success) {
                            debug!("{}: {}", self.name, e);
                        }
                    }
                    None => debug!("{} stopped with no move pending", self.name),
                }
            }
        }
        let _ = self.events.send(event);
    }

    fn take_pending_if(&self, status: &MoveStatus) {
        let mut pending = self.lock_pending();
        if pending.as_ref().is_some_and(|p| p.same_as(status)) {
            pending.take();
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<MoveStatus>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> Vec<Reading> {
        self.group.read()
    }

    pub fn read_configuration(&self) -> Vec<Reading> {
        self.group.read_configuration()
    }
}

impl Drop for Motor {
    fn drop(&mut self) {
        let subscriptions = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (signal, id) in subscriptions.drain(..) {
            signal.unsubscribe(id);
        }
    }
}

#[async_trait]
impl Positioner for Motor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_to(&self, target: f64, options: MoveOptions) -> DeviceResult<MoveStatus> {
        Motor::move_to(self, target, options).await
    }

    async fn stop(&self) -> DeviceResult<()> {
        Motor::stop(self).await
    }

    fn state(&self) -> DeviceResult<AxisStateInfo> {
        if !self.user_readback.connected() {
            return Ok(AxisStateInfo::disconnected(self.user_readback.pvname()));
        }

        let alarm = self.user_readback.alarm()?;
        let switches = LimitSwitches::from_flags(
            switch_active(self.low_limit_switch.as_ref()),
            switch_active(self.high_limit_switch.as_ref()),
        );
        let state = if alarm.is_active() {
            AxisState::Alarm
        } else if self.tracker.is_moving() {
            AxisState::Moving
        } else {
            AxisState::Idle
        };

        let info = AxisStateInfo::new(state)
            .with_limit_switches(switches)
            .with_alarm(alarm);
        Ok(if alarm.is_active() {
            info.with_message(format!("{} {}", alarm.severity, alarm.status))
        } else {
            info
        })
    }

    fn get_attribute(&self, name: &str) -> DeviceResult<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match name {
            "position" => Motor::position(self),
            "precision" => Ok(self.precision()? as f64),
            "low_limit" => Ok(self.limits()?.low),
            "high_limit" => Ok(self.limits()?.high),
            "moving" => Ok(flag(self.moving()?)),
            "done_moving" => self.motor_done_move.get_f64(),
            "user_setpoint" | "velocity" | "acceleration" | "low_limit_switch"
            | "high_limit_switch" | "interlock" | "enabled" => self.group.get_f64(name),
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
        Motor::position(self)
    }

    fn available_attributes(&self) -> Vec<String> {
        ATTRIBUTES.iter().map(|a| a.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        axis::ReportedPosition,
        dispatcher::{config::DispatcherConfig, Dispatcher},
        signal::{
            alarm::{AlarmSeverity, AlarmStatus},
            sim::SimLayer,
        },
    };
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio_util::sync::CancellationToken;

    const PREFIX: &str = "TST:M1:PITCH";

    fn pv(name: &str) -> String {
        format!("{}{}", PREFIX, name)
    }

    /// Record fields as an idle IOC would publish them.
    fn idle_layer(position: f64) -> SimLayer {
        let layer = SimLayer::new();
        publish_idle(&layer, position);
        layer
    }

    fn publish_idle(layer: &SimLayer, position: f64) {
        for (suffix, value) in [
            (":RBV", position),
            (":VAL", position),
            (":VELO", 1.0),
            (":ACCL", 0.1),
            (":MOVN", 0.0),
            (":DMOV", 1.0),
            (":HLS", 0.0),
            (":LLS", 0.0),
            (":TDIR", 1.0),
            (":STOP", 0.0),
            (":INTERLOCK", 0.0),
            (":ENABLED", 1.0),
        ] {
            layer.pv(&pv(suffix)).sim_put(value);
        }
    }

    fn script_move(layer: &SimLayer, target: f64, direction: f64) {
        layer.pv(&pv(":TDIR")).sim_put(direction);
        layer.pv(&pv(":DMOV")).sim_put(0.0);
        layer.pv(&pv(":RBV")).sim_put(target);
        layer.pv(&pv(":DMOV")).sim_put(1.0);
    }

    #[test]
    fn test_components_wired_from_prefix() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();

        assert_eq!(motor.readback_pv(), "TST:M1:PITCH:RBV");
        assert_eq!(
            motor.signals().signal("motor_done_move").unwrap().pvname(),
            "TST:M1:PITCH:DMOV"
        );
        assert_eq!(Motor::position(&motor).unwrap(), 0.0);
        assert_eq!(motor.precision().unwrap(), 3);
        assert!(!motor.moving().unwrap());
    }

    #[test]
    fn test_readback_subscription_tracks_position() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();
        layer.pv(&pv(":RBV")).sim_put(3.25);
        assert_eq!(motor.get_attribute("position").unwrap(), 3.25);
    }

    #[tokio::test]
    async fn test_move_without_wait_resolves_on_done_edge() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();
        let mut events = motor.motion_events();

        let status = Motor::move_to(&motor, 5.0, MoveOptions::no_wait()).await.unwrap();
        assert!(!status.done());
        assert_eq!(layer.pv(&pv(":VAL")).value_f64(), Some(5.0));

        script_move(&layer, 5.0, 1.0);

        assert_eq!(status.success(), Some(true));
        assert!(events.recv().await.unwrap().is_start());
        assert_eq!(events.recv().await.unwrap().outcome(), Some(true));
        assert_eq!(Motor::position(&motor).unwrap(), 5.0);
    }

    #[tokio::test]
    async fn test_move_rejected_outside_limits_before_write() {
        let layer = idle_layer(0.0);
        layer.pv(&pv(":VAL")).set_limits(Limits::new(-10.0, 10.0));
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();

        let err = Motor::move_to(&motor, 20.0, MoveOptions::no_wait())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::OutOfLimits { .. }));
        assert_eq!(layer.pv(&pv(":VAL")).client_puts(), 0);
        assert!(motor.pending_status().is_none());
    }

    #[tokio::test]
    async fn test_high_limit_switch_fails_move() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();

        let status = Motor::move_to(&motor, 5.0, MoveOptions::no_wait()).await.unwrap();
        layer.pv(&pv(":TDIR")).sim_put(1.0);
        layer.pv(&pv(":DMOV")).sim_put(0.0);
        layer.pv(&pv(":HLS")).sim_put(1.0);
        layer.pv(&pv(":DMOV")).sim_put(1.0);

        assert_eq!(status.success(), Some(false));
        assert!(matches!(
            status.wait().await,
            Err(DeviceError::MotionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_alarm_at_completion_fails_move() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();

        let status = Motor::move_to(&motor, 5.0, MoveOptions::no_wait()).await.unwrap();
        layer.pv(&pv(":DMOV")).sim_put(0.0);
        layer
            .pv(&pv(":RBV"))
            .set_alarm(Alarm::new(AlarmSeverity::Major, AlarmStatus::HwLimit));
        layer.pv(&pv(":DMOV")).sim_put(1.0);

        assert_eq!(status.success(), Some(false));
        assert_eq!(motor.state().unwrap().state, AxisState::Alarm);
    }

    #[tokio::test]
    async fn test_cancel_during_wait_stops_once() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let options = MoveOptions::new().with_cancel(cancel);
        let err = Motor::move_to(&motor, 5.0, options).await.unwrap_err();

        assert!(matches!(err, DeviceError::Interrupted { .. }));
        assert_eq!(layer.pv(&pv(":STOP")).client_puts(), 1);
        assert!(motor.pending_status().is_none());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();
        let options = MoveOptions::new().with_timeout(Duration::from_millis(20));

        let err = Motor::move_to(&motor, 1.0, options).await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_new_move_supersedes_pending_status() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();

        let first = Motor::move_to(&motor, 1.0, MoveOptions::no_wait()).await.unwrap();
        let second = Motor::move_to(&motor, 2.0, MoveOptions::no_wait()).await.unwrap();
        assert_eq!(first.success(), Some(false));

        script_move(&layer, 2.0, 1.0);
        assert_eq!(second.success(), Some(true));
    }

    #[test]
    fn test_disconnected_readback() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();
        layer.pv(&pv(":RBV")).set_online(false);

        assert!(Motor::position(&motor).unwrap_err().is_disconnected());
        assert!(motor.precision().unwrap_err().is_disconnected());
        assert_eq!(motor.state().unwrap().state, AxisState::Disconnected);

        let report = motor.report();
        assert_eq!(
            report.position,
            ReportedPosition::Missing("disconnected".to_string())
        );
        assert_eq!(report.pv, "TST:M1:PITCH:RBV");
    }

    #[test]
    fn test_state_reports_limit_switches() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();
        layer.pv(&pv(":LLS")).sim_put(1.0);

        let info = motor.state().unwrap();
        assert_eq!(info.state, AxisState::Idle);
        assert!(info.limit_switches.has_low());
        assert!(!info.is_ready());
    }

    #[test]
    fn test_set_current_position_and_attributes() {
        let layer = idle_layer(0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();

        motor.set_current_position(1.5).unwrap();
        assert_eq!(motor.get_attribute("user_setpoint").unwrap(), 1.5);
        assert_eq!(motor.get_attribute("velocity").unwrap(), 1.0);
        assert_eq!(motor.get_attribute("enabled").unwrap(), 1.0);
        assert!(matches!(
            motor.get_attribute("bogus"),
            Err(DeviceError::UnknownAttribute { .. })
        ));
        assert_eq!(motor.available_attributes().len(), ATTRIBUTES.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waited_move_with_callbacks_on_monitor_worker() {
        let layer = SimLayer::with_dispatcher(Dispatcher::new(DispatcherConfig::default()));
        publish_idle(&layer, 0.0);
        let motor = Motor::new(&layer, PREFIX, "m1_pitch").unwrap();
        let mut events = motor.motion_events();

        let mover = motor.clone();
        let waited = tokio::spawn(async move {
            let options = MoveOptions::new().with_timeout(Duration::from_secs(2));
            Motor::move_to(&mover, 5.0, options).await
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while layer.pv(&pv(":VAL")).client_puts() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        script_move(&layer, 5.0, 1.0);

        let status = waited.await.unwrap().unwrap();
        assert_eq!(status.success(), Some(true));

        assert!(events.recv().await.unwrap().is_start());
        assert_eq!(events.recv().await.unwrap().outcome(), Some(true));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(Motor::position(&motor).unwrap(), 5.0);
    }
}
