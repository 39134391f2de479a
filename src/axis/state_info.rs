use serde::{Deserialize, Serialize};

use super::limit_switches::LimitSwitches;
use super::state::AxisState;
use crate::signal::alarm::Alarm;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisStateInfo {
    pub state: AxisState,
    pub message: Option<String>,
    pub limit_switches: LimitSwitches,
    pub alarm: Alarm,
}

impl AxisStateInfo {
    pub fn new(state: AxisState) -> Self {
        Self {
            state,
            message: None,
            limit_switches: LimitSwitches::None,
            alarm: Alarm::NONE,
        }
    }

    pub fn disconnected(pvname: &str) -> Self {
        Self::new(AxisState::Disconnected).with_message(format!("{} is disconnected", pvname))
    }

    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_limit_switches(mut self, limit_switches: LimitSwitches) -> Self {
        self.limit_switches = limit_switches;
        self
    }

    pub fn with_alarm(mut self, alarm: Alarm) -> Self {
        self.alarm = alarm;
        self
    }

    pub fn is_moving(&self) -> bool {
        self.state == AxisState::Moving
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state, AxisState::Alarm | AxisState::Disconnected)
    }

    pub fn is_ready(&self) -> bool {
        self.state == AxisState::Idle && !self.limit_switches.any_active()
    }
}
