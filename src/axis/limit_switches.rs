use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitSwitches {
    None,
    High,
    Low,
    Both,
}

impl LimitSwitches {
    pub fn from_flags(low: bool, high: bool) -> Self {
        match (low, high) {
            (false, false) => LimitSwitches::None,
            (true, false) => LimitSwitches::Low,
            (false, true) => LimitSwitches::High,
            (true, true) => LimitSwitches::Both,
        }
    }

    pub fn has_high(&self) -> bool {
        matches!(self, LimitSwitches::High | LimitSwitches::Both)
    }

    pub fn has_low(&self) -> bool {
        matches!(self, LimitSwitches::Low | LimitSwitches::Both)
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, LimitSwitches::None)
    }

    pub fn any_active(&self) -> bool {
        !self.is_clear()
    }
}
