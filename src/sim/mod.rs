//! Simulated motor record served through a [`SimLayer`].
//!
//! The driver publishes the record fields a [`Motor`](crate::devices::motor::Motor)
//! connects to and plays the IOC side of a move: a client write to VAL sets
//! TDIR, drops DMOV and raises MOVN, then RBV steps toward the target at VELO
//! every tick until the target or a limit switch is reached.

pub mod config;

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::signal::{
    sim::{SimLayer, SimPv},
    Access, Callback, ControlLayer, Signal, SubscriptionId,
};
use config::SimMotorConfig;

#[derive(Debug, Clone, Copy)]
enum DriverEvent {
    Setpoint,
    Stop,
}

struct RecordPvs {
    rbv: Arc<SimPv>,
    val: Arc<SimPv>,
    velo: Arc<SimPv>,
    movn: Arc<SimPv>,
    dmov: Arc<SimPv>,
    hls: Arc<SimPv>,
    lls: Arc<SimPv>,
    tdir: Arc<SimPv>,
    stop: Arc<SimPv>,
}

impl RecordPvs {
    fn new(layer: &SimLayer, prefix: &str) -> Self {
        let pv = |suffix: &str| layer.pv(&format!("{}{}", prefix, suffix));
        Self {
            rbv: pv(":RBV"),
            val: pv(":VAL"),
            velo: pv(":VELO"),
            movn: pv(":MOVN"),
            dmov: pv(":DMOV"),
            hls: pv(":HLS"),
            lls: pv(":LLS"),
            tdir: pv(":TDIR"),
            stop: pv(":STOP"),
        }
    }
}

struct Motion {
    config: SimMotorConfig,
    pvs: RecordPvs,
    position: f64,
    target: Option<f64>,
    handled_puts: usize,
}

impl Motion {
    fn publish_switches(&self) {
        let low = self.config.low_switch.is_some_and(|l| self.position <= l);
        let high = self.config.high_switch.is_some_and(|h| self.position >= h);
        self.pvs.lls.sim_put(if low { 1.0 } else { 0.0 });
        self.pvs.hls.sim_put(if high { 1.0 } else { 0.0 });
    }

    fn on_setpoint(&mut self) {
        // Only client writes start a move; the driver's own VAL updates do not.
        // Queued updates may be stale, so the target is the latest VAL.
        let puts = self.pvs.val.client_puts();
        if puts == self.handled_puts {
            return;
        }
        self.handled_puts = puts;
        let Some(target) = self.pvs.val.value_f64() else {
            return;
        };

        debug!("sim motor: move {} -> {}", self.position, target);
        self.pvs
            .tdir
            .sim_put(if target >= self.position { 1.0 } else { 0.0 });
        if self.target.is_none() {
            self.pvs.movn.sim_put(1.0);
            self.pvs.dmov.sim_put(0.0);
        }
        self.target = Some(target);
    }

    fn on_stop(&mut self) {
        if self.pvs.stop.value_f64() != Some(1.0) {
            return;
        }
        self.pvs.stop.sim_put(0.0);
        if self.target.is_some() {
            info!("sim motor: stopped at {}", self.position);
            self.finish();
        }
    }

    fn step(&mut self, tick: Duration) {
        let Some(target) = self.target else {
            return;
        };
        let velocity = self
            .pvs
            .velo
            .value_f64()
            .filter(|v| *v > 0.0)
            .unwrap_or(self.config.velocity);
        let max_step = velocity * tick.as_secs_f64();
        let remaining = target - self.position;

        let mut next = if remaining.abs() <= max_step {
            target
        } else {
            self.position + max_step * remaining.signum()
        };
        let mut tripped = false;
        if let Some(high) = self.config.high_switch {
            if remaining > 0.0 && next >= high {
                next = high;
                tripped = true;
            }
        }
        if let Some(low) = self.config.low_switch {
            if remaining < 0.0 && next <= low {
                next = low;
                tripped = true;
            }
        }

        self.position = next;
        self.pvs.rbv.sim_put(next);
        if tripped || next == target {
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.target = None;
        self.publish_switches();
        self.pvs.movn.sim_put(0.0);
        self.pvs.dmov.sim_put(1.0);
    }
}

/// IOC-side motion of one motor record. Dropping the driver stops it.
pub struct SimMotorDriver {
    prefix: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    subscriptions: Vec<(Arc<dyn Signal>, SubscriptionId)>,
}

impl SimMotorDriver {
    /// Publishes the record fields and starts the driver on the current runtime.
    pub fn start(layer: &SimLayer, prefix: &str, config: SimMotorConfig) -> Self {
        let pvs = RecordPvs::new(layer, prefix);
        pvs.val.set_limits(config.limits);
        pvs.val.set_precision(config.precision);
        pvs.rbv.set_precision(config.precision);

        let position = config.initial_position;
        pvs.rbv.sim_put(position);
        pvs.val.sim_put(position);
        pvs.velo.sim_put(config.velocity);
        layer
            .pv(&format!("{}:ACCL", prefix))
            .sim_put(config.acceleration);
        pvs.movn.sim_put(0.0);
        pvs.dmov.sim_put(1.0);
        pvs.tdir.sim_put(1.0);
        pvs.stop.sim_put(0.0);
        layer.pv(&format!("{}:INTERLOCK", prefix)).sim_put(0.0);
        layer.pv(&format!("{}:ENABLED", prefix)).sim_put(1.0);

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = vec![
            Self::forward(layer, &format!("{}:VAL", prefix), tx.clone(), DriverEvent::Setpoint),
            Self::forward(layer, &format!("{}:STOP", prefix), tx, DriverEvent::Stop),
        ];

        let tick = Duration::from_millis(config.tick_ms.max(1));
        let motion = Motion {
            handled_puts: pvs.val.client_puts(),
            config,
            pvs,
            position,
            target: None,
        };
        motion.publish_switches();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run(motion, rx, tick, cancel.clone()));
        info!("Simulated motor {} started at {}", prefix, position);

        Self {
            prefix: prefix.to_string(),
            cancel,
            task,
            subscriptions,
        }
    }

    fn forward(
        layer: &SimLayer,
        pvname: &str,
        tx: mpsc::UnboundedSender<DriverEvent>,
        event: DriverEvent,
    ) -> (Arc<dyn Signal>, SubscriptionId) {
        let signal = layer.connect(pvname, Access::ReadOnly);
        let callback: Callback = Arc::new(move |_| {
            let _ = tx.send(event);
        });
        let id = signal.subscribe(callback);
        (signal, id)
    }

    async fn run(
        mut motion: Motion,
        mut rx: mpsc::UnboundedReceiver<DriverEvent>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(DriverEvent::Setpoint) => motion.on_setpoint(),
                    Some(DriverEvent::Stop) => motion.on_stop(),
                    None => break,
                },
                _ = interval.tick(), if motion.target.is_some() => motion.step(tick),
            }
        }
        debug!("sim motor driver exiting");
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SimMotorDriver {
    fn drop(&mut self) {
        for (signal, id) in self.subscriptions.drain(..) {
            signal.unsubscribe(id);
        }
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        axis::{move_options::MoveOptions, state::AxisState, Positioner},
        devices::motor::Motor,
        error::DeviceError,
        signal::limits::Limits,
    };

    const PREFIX: &str = "SIM:MMS:01";

    fn fast() -> SimMotorConfig {
        SimMotorConfig {
            velocity: 200.0,
            tick_ms: 2,
            ..SimMotorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_waited_move_reaches_target() {
        let layer = SimLayer::new();
        let _driver = SimMotorDriver::start(&layer, PREFIX, fast());
        let motor = Motor::new(&layer, PREFIX, "mms1").unwrap();

        let status = Motor::move_to(&motor, 5.0, MoveOptions::new()).await.unwrap();

        assert_eq!(status.success(), Some(true));
        assert_eq!(Motor::position(&motor).unwrap(), 5.0);
        assert_eq!(motor.state().unwrap().state, AxisState::Idle);
        assert_eq!(layer.pv("SIM:MMS:01:TDIR").value_f64(), Some(1.0));
    }

    #[tokio::test]
    async fn test_move_into_high_switch_fails() {
        let layer = SimLayer::new();
        let config = SimMotorConfig {
            high_switch: Some(3.0),
            ..fast()
        };
        let _driver = SimMotorDriver::start(&layer, PREFIX, config);
        let motor = Motor::new(&layer, PREFIX, "mms1").unwrap();

        let err = Motor::move_to(&motor, 5.0, MoveOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceError::MotionFailed { .. }));
        assert_eq!(Motor::position(&motor).unwrap(), 3.0);
        assert!(motor.state().unwrap().limit_switches.has_high());
    }

    #[tokio::test]
    async fn test_move_away_from_tripped_switch_succeeds() {
        let layer = SimLayer::new();
        let config = SimMotorConfig {
            initial_position: 3.0,
            high_switch: Some(3.0),
            ..fast()
        };
        let _driver = SimMotorDriver::start(&layer, PREFIX, config);
        let motor = Motor::new(&layer, PREFIX, "mms1").unwrap();

        Motor::move_to(&motor, 1.0, MoveOptions::new()).await.unwrap();
        assert_eq!(layer.pv("SIM:MMS:01:TDIR").value_f64(), Some(0.0));
        assert_eq!(layer.pv("SIM:MMS:01:HLS").value_f64(), Some(0.0));
    }

    #[tokio::test]
    async fn test_cancelled_move_stops_short() {
        let layer = SimLayer::new();
        let config = SimMotorConfig {
            velocity: 10.0,
            tick_ms: 5,
            ..SimMotorConfig::default()
        };
        let _driver = SimMotorDriver::start(&layer, PREFIX, config);
        let motor = Motor::new(&layer, PREFIX, "mms1").unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = Motor::move_to(&motor, 100.0, MoveOptions::new().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Interrupted { .. }));
        assert_eq!(layer.pv("SIM:MMS:01:STOP").client_puts(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(layer.pv("SIM:MMS:01:DMOV").value_f64(), Some(1.0));
        assert!(Motor::position(&motor).unwrap() < 100.0);
    }

    #[tokio::test]
    async fn test_setpoint_limits_published() {
        let layer = SimLayer::new();
        let config = SimMotorConfig {
            limits: Limits::new(-1.0, 1.0),
            ..fast()
        };
        let driver = SimMotorDriver::start(&layer, PREFIX, config);
        let motor = Motor::new(&layer, PREFIX, "mms1").unwrap();

        assert!(matches!(
            Motor::move_to(&motor, 2.0, MoveOptions::no_wait()).await,
            Err(DeviceError::OutOfLimits { .. })
        ));
        assert!(driver.is_running());
        driver.shutdown();
    }

    #[tokio::test]
    async fn test_back_to_back_setpoints_follow_latest_target() {
        let layer = SimLayer::new();
        let _driver = SimMotorDriver::start(&layer, PREFIX, fast());
        let motor = Motor::new(&layer, PREFIX, "mms1").unwrap();

        let first = Motor::move_to(&motor, 1.0, MoveOptions::no_wait()).await.unwrap();
        let second = Motor::move_to(&motor, 2.0, MoveOptions::no_wait()).await.unwrap();
        second.wait().await.unwrap();

        assert_eq!(first.success(), Some(false));
        assert_eq!(second.success(), Some(true));
        assert_eq!(Motor::position(&motor).unwrap(), 2.0);
        assert_eq!(layer.pv("SIM:MMS:01:RBV").value_f64(), Some(2.0));
    }

    #[tokio::test]
    async fn test_initial_setpoint_does_not_start_a_move() {
        let layer = SimLayer::new();
        let config = SimMotorConfig {
            initial_position: 4.0,
            ..fast()
        };
        let _driver = SimMotorDriver::start(&layer, PREFIX, config);
        let motor = Motor::new(&layer, PREFIX, "mms1").unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!motor.moving().unwrap());
        assert_eq!(layer.pv("SIM:MMS:01:DMOV").value_f64(), Some(1.0));

        Motor::move_to(&motor, 6.0, MoveOptions::new()).await.unwrap();
        assert_eq!(Motor::position(&motor).unwrap(), 6.0);
    }
}
